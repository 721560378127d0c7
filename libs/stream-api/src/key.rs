use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator that selects the codec for a record's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Parameter-indexed time series.
    #[serde(alias = "tsample")]
    TSamples,
    /// Feed-scoped bundle: parameters × time matrix.
    TData,
    /// Session lifecycle and format references.
    Session,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [MessageKind::TSamples, MessageKind::TData, MessageKind::Session];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::TSamples => "tsamples",
            MessageKind::TData => "tdata",
            MessageKind::Session => "session",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record key: message kind + producer-chosen UID.
///
/// The UID doubles as the stream id of the logical session the record
/// belongs to, and as the broker partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub uid: Uuid,
}

impl Key {
    pub fn new(kind: MessageKind, uid: Uuid) -> Self {
        Self { kind, uid }
    }

    pub fn stream_id(&self) -> String {
        self.uid.to_string()
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_wire_shape() {
        let uid = Uuid::parse_str("6f2c1a52-2d6e-4b8e-9d43-6b8f2a9e0c11").unwrap();
        let key = Key::new(MessageKind::TSamples, uid);
        let json = serde_json::to_value(key).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "tsamples", "uid": "6f2c1a52-2d6e-4b8e-9d43-6b8f2a9e0c11"})
        );
        assert_eq!(key.stream_id(), "6f2c1a52-2d6e-4b8e-9d43-6b8f2a9e0c11");
    }

    #[test]
    fn legacy_singular_kind_accepted() {
        let key: Key = serde_json::from_str(
            r#"{"type":"tsample","uid":"6f2c1a52-2d6e-4b8e-9d43-6b8f2a9e0c11"}"#,
        )
        .unwrap();
        assert_eq!(key.kind, MessageKind::TSamples);
    }

    #[test]
    fn unknown_kind_rejected() {
        let res: Result<Key, _> =
            serde_json::from_str(r#"{"type":"lap","uid":"6f2c1a52-2d6e-4b8e-9d43-6b8f2a9e0c11"}"#);
        assert!(res.is_err());
    }
}
