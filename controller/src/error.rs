use std::fmt;

use comms::{ChannelError, CodecError};

use crate::session::SessionState;

/// The controller's result type.
pub type Result<T> = std::result::Result<T, SessionError>;

/// All errors that can occur while driving a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// A request/response call did not complete, returned a non-2xx status or an
    /// unreadable body.
    Transport {
        operation: &'static str,
        detail: String,
    },
    /// The training channel ended without a `complete` frame.
    Channel(String),
    /// Imported parameter text held no usable row.
    EmptyParameterSet,
    /// A parameter field edit could not be parsed as a number.
    InvalidEdit {
        index: u32,
        field: &'static str,
        value: String,
    },
    /// No primitive with this index exists in the store.
    UnknownParameter(u32),
    /// The named parameter field does not exist.
    UnknownField(String),
    /// Invalid settings, caught before contacting the service.
    InvalidConfig(String),
    /// The command is not legal in the current state.
    IllegalTransition {
        state: SessionState,
        action: &'static str,
    },
    /// Another gated call is still outstanding.
    Busy { action: &'static str },
}

impl SessionError {
    pub(crate) fn transport(operation: &'static str, detail: impl fmt::Display) -> Self {
        Self::Transport {
            operation,
            detail: detail.to_string(),
        }
    }

    /// Whether this error only rejected a command without anything being attempted.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::IllegalTransition { .. } | Self::Busy { .. })
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { operation, detail } => write!(f, "{operation} failed: {detail}"),
            Self::Channel(msg) => write!(f, "training channel failed: {msg}"),
            Self::EmptyParameterSet => write!(f, "no valid parameter rows found"),
            Self::InvalidEdit {
                index,
                field,
                value,
            } => write!(f, "invalid value '{value}' for {field} of gaussian {index}"),
            Self::UnknownParameter(index) => write!(f, "no gaussian with index {index}"),
            Self::UnknownField(name) => write!(f, "unknown parameter field '{name}'"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::IllegalTransition { state, action } => {
                write!(f, "cannot {action} while {state}")
            }
            Self::Busy { action } => {
                write!(f, "cannot {action} while another request is in flight")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CodecError> for SessionError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::EmptyParameterSet => Self::EmptyParameterSet,
        }
    }
}

impl From<ChannelError> for SessionError {
    fn from(value: ChannelError) -> Self {
        Self::Channel(value.to_string())
    }
}

