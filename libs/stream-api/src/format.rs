use serde::{Deserialize, Serialize};

/// Content hash of a registered dependency document (lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatId(String);

impl FormatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormatId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Collection on the dependency server a document lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    DataFormat,
    AtlasConfiguration,
}

impl DependencyKind {
    /// Path segment used by the HTTP dependency server.
    pub fn path(&self) -> &'static str {
        match self {
            DependencyKind::DataFormat => "dataformat",
            DependencyKind::AtlasConfiguration => "atlasconfiguration",
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Named group of parameters inside a data format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedFormat {
    /// `""` is the default feed.
    #[serde(default)]
    pub name: String,
    pub parameters: Vec<String>,
}

/// Layout of telemetry payloads: which parameters a feed carries, in which order.
///
/// Immutable once resolved — shared as `Arc<FormatDefinition>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDefinition {
    pub feeds: Vec<FeedFormat>,
}

impl FormatDefinition {
    /// Single default feed with the given parameters.
    pub fn single_feed(name: impl Into<String>, parameters: Vec<String>) -> Self {
        Self {
            feeds: vec![FeedFormat {
                name: name.into(),
                parameters,
            }],
        }
    }

    pub fn feed(&self, name: &str) -> Option<&FeedFormat> {
        self.feeds.iter().find(|f| f.name == name)
    }

    pub fn default_feed(&self) -> Option<&FeedFormat> {
        self.feed("")
    }
}

/// Hashes produced while sending, kept for reuse by other message kinds
/// (e.g. a session message advertising the data format of its samples).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatState {
    pub data_format_id: Option<FormatId>,
    pub atlas_configuration_id: Option<FormatId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_id_is_normalised() {
        assert_eq!(FormatId::new("ABcd01").as_str(), "abcd01");
        assert_eq!(FormatId::from("ff"), FormatId::new("FF"));
    }

    #[test]
    fn feed_lookup() {
        let def = FormatDefinition {
            feeds: vec![
                FeedFormat { name: "".into(), parameters: vec!["vCar".into()] },
                FeedFormat { name: "engine".into(), parameters: vec!["nEngine".into(), "pOil".into()] },
            ],
        };
        assert_eq!(def.default_feed().map(|f| f.parameters.len()), Some(1));
        assert_eq!(def.feed("engine").map(|f| f.parameters.len()), Some(2));
        assert!(def.feed("brakes").is_none());
    }

    #[test]
    fn definition_json_shape() {
        let def = FormatDefinition::single_feed("", vec!["a".into(), "b".into()]);
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json, serde_json::json!({"feeds": [{"name": "", "parameters": ["a", "b"]}]}));

        // feed name is optional in documents coming from the server
        let parsed: FormatDefinition =
            serde_json::from_value(serde_json::json!({"feeds": [{"parameters": ["x"]}]})).unwrap();
        assert_eq!(parsed.default_feed().map(|f| f.parameters.clone()), Some(vec!["x".to_string()]));
    }
}
