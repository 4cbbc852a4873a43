use std::fmt;

use displaydoc::Display;

/// Failures of the link to the peripheral-control service.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// peripheral service unavailable
    Unavailable,
    /// peripheral index {index} is out of range (count {count})
    IndexOutOfRange { index: usize, count: usize },
    /// peripheral service rejected the request: {0}
    Rejected(String),
    /// unexpected response from the peripheral service
    UnexpectedResponse,
}

impl std::error::Error for LinkError {}

/// Reasons an animation could not be started.
#[derive(Debug, Display, Clone, PartialEq)]
pub enum AnimationError {
    /// unknown animation type `{0}`
    UnknownKind(String),
    /// animation duration is zero or too long
    InvalidDuration,
    /// there are no peripherals to animate
    NoPeripherals,
    /// {0}
    Link(LinkError),
}

impl std::error::Error for AnimationError {}

impl From<LinkError> for AnimationError {
    fn from(e: LinkError) -> Self {
        AnimationError::Link(e)
    }
}

pub const SYSTEM_ERROR: &str = "_system_error";
pub const INVALID_PARAMETER: &str = "_invalid_parameter";
pub const UNKNOWN_ANIMATION: &str = "_unknown_animation";
pub const UNKNOWN_COMMAND: &str = "_unknown_command";

/// The payload a command is aborted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub code: &'static str,
    pub message: String,
}

impl CommandError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        CommandError {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMETER, message)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<LinkError> for CommandError {
    fn from(e: LinkError) -> Self {
        CommandError::new(SYSTEM_ERROR, e.to_string())
    }
}

impl From<AnimationError> for CommandError {
    fn from(e: AnimationError) -> Self {
        match e {
            AnimationError::UnknownKind(_) => CommandError::new(UNKNOWN_ANIMATION, e.to_string()),
            AnimationError::InvalidDuration => CommandError::invalid_parameter(e.to_string()),
            AnimationError::NoPeripherals => CommandError::new(SYSTEM_ERROR, e.to_string()),
            AnimationError::Link(link) => link.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_come_from_docs() {
        let e = LinkError::IndexOutOfRange { index: 7, count: 4 };
        assert_eq!(e.to_string(), "peripheral index 7 is out of range (count 4)");

        let e = CommandError::from(AnimationError::UnknownKind("spin".to_string()));
        assert_eq!(e.code, UNKNOWN_ANIMATION);
        assert_eq!(e.to_string(), "_unknown_animation: unknown animation type `spin`");
    }

    #[test]
    fn link_failures_abort_as_system_errors() {
        let e = CommandError::from(AnimationError::Link(LinkError::Unavailable));
        assert_eq!(e.code, SYSTEM_ERROR);
        assert_eq!(e.message, "peripheral service unavailable");
    }
}
