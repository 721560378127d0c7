use std::fmt;

/// Unified error type for resolver, codec, transport and handler operations.
///
/// Variants map to the failure points of a telemetry record's life:
/// resolving its format, decoding it, handing it to a callback,
/// encoding the reply and publishing it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// Format/dependency document could not be fetched or is unknown.
    #[error("unresolved format '{id}': {reason}")]
    UnresolvedFormat { id: String, reason: String },

    /// Broker unavailable, publish failed, subscription broken.
    #[error("transport: {0}")]
    Transport(String),

    /// Malformed bytes or unknown message kind.
    #[error("decode: {0}")]
    Decode(String),

    /// Value shape does not match its declared format.
    #[error("encode: {0}")]
    Encode(String),

    #[error("config: {0}")]
    Config(String),

    /// Error returned by a user callback or stream input.
    #[error("handler: {0}")]
    Handler(String),
}

impl StreamError {
    pub fn unresolved(id: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::UnresolvedFormat {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// Bad input record: the consumer loop logs it and moves on to the next one.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::UnresolvedFormat { .. })
    }

    /// Add context to the error, preserving the variant.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        match self {
            Self::UnresolvedFormat { id, reason } => Self::UnresolvedFormat {
                id,
                reason: format!("{ctx}: {reason}"),
            },
            Self::Transport(msg) => Self::Transport(format!("{ctx}: {msg}")),
            Self::Decode(msg) => Self::Decode(format!("{ctx}: {msg}")),
            Self::Encode(msg) => Self::Encode(format!("{ctx}: {msg}")),
            Self::Config(msg) => Self::Config(format!("{ctx}: {msg}")),
            Self::Handler(msg) => Self::Handler(format!("{ctx}: {msg}")),
        }
    }
}

impl From<std::str::Utf8Error> for StreamError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::decode(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for StreamError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_variant() {
        let e = StreamError::decode("bad json").with_context("topic 'MIST'");
        assert_eq!(e, StreamError::Decode("topic 'MIST': bad json".into()));

        let e = StreamError::unresolved("ab12", "404").with_context("tdata");
        assert_eq!(e.to_string(), "unresolved format 'ab12': tdata: 404");
    }

    #[test]
    fn only_input_errors_are_skippable() {
        assert!(StreamError::decode("x").is_skippable());
        assert!(StreamError::unresolved("x", "y").is_skippable());
        assert!(!StreamError::transport("x").is_skippable());
        assert!(!StreamError::handler("x").is_skippable());
        assert!(!StreamError::encode("x").is_skippable());
    }
}
