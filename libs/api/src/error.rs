/// Category of a channel error. Lets the harness tell a failed
/// publish apart from a closed subscription or an undecodable payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network / broker failure of a single publish or subscribe.
    Transport,
    /// Channel or subscription is closed.
    Closed,
    /// Payload could not be encoded or decoded.
    Format,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transport => f.write_str("transport"),
            ErrorKind::Closed => f.write_str("closed"),
            ErrorKind::Format => f.write_str("format"),
        }
    }
}

/// Unified error type for all channel trait methods.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// Encoding failures convert via `From<serde_json::Error>` as `Format`.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelError {
    kind: ErrorKind,
    message: String,
}

impl ChannelError {
    /// Transport error: a publish or subscribe did not go through.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Transport, message: msg.into() }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Closed, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl std::fmt::Debug for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ChannelError {}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Format, message: e.to_string() } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_constructor() {
        let e = ChannelError::transport("broker unreachable");
        assert_eq!(e.kind(), ErrorKind::Transport);
        assert_eq!(e.to_string(), "broker unreachable");
        assert_eq!(format!("{e:?}"), "[transport] broker unreachable");

        assert_eq!(ChannelError::closed("gone").kind(), ErrorKind::Closed);

        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(ChannelError::from(bad).kind(), ErrorKind::Format);
    }
}
