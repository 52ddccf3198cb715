//! Error taxonomy.
//!
//! None of these are fatal to the room: per-entity and per-mutation failures
//! are logged by whoever catches them and processing continues with the next
//! entity. The one exception is [`Error::ChannelJoinFailed`], which the UI layer
//! surfaces by sending the user back to the room list.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A mutation or interaction referenced a node/entity that does not exist.
    #[error("missing referent '{0}'")]
    MissingReferent(String),

    /// A component value did not have the shape its decoder expects.
    #[error("malformed '{component}' component: {reason}")]
    MalformedComponent {
        component: &'static str,
        reason: String,
    },

    #[error("unsupported mesh type '{0}'")]
    UnsupportedMesh(String),

    #[error("unsupported material '{0}'")]
    UnsupportedMaterial(String),

    /// Inbound event name this client does not understand.
    #[error("unknown inbound event '{0}'")]
    UnknownEvent(String),

    #[error("invalid '{event}' payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("scene node '{0}' already exists")]
    NodeExists(String),

    #[error("parenting '{child}' to '{parent}' would create a cycle")]
    ParentCycle { child: String, parent: String },

    #[error("unable to join room channel: {0}")]
    ChannelJoinFailed(String),
}

impl Error {
    pub(crate) fn malformed(component: &'static str, reason: impl Into<String>) -> Self {
        Error::MalformedComponent {
            component,
            reason: reason.into(),
        }
    }

    /// True for the "nothing to act on" class of failures, which are logged
    /// at debug level only.
    pub fn is_missing_referent(&self) -> bool {
        matches!(self, Error::MissingReferent(_))
    }
}
