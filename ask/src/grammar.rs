use crate::activation::Secret;

pub const INERT_API_KEY: &str = "INERT_API_KEY_PLACEHOLDER";

/// Fixed texts that make up the line grammar of an activatable artifact.
///
/// Every lookup is a prefix match against the trimmed line, so indentation and
/// trailing commentary on marker lines are tolerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactGrammar {
    pub region_start: String,
    pub region_end: String,
    pub anchor: String,
    pub key: String,
    pub separator: String,
    pub inert_value: String,
    pub annotation: String,
}

impl ArtifactGrammar {
    /// Grammar of the shipped `config.yaml`.
    pub fn config_yaml() -> Self {
        Self {
            region_start: "# --- BEGIN ACTIVATION BLOCK".to_string(),
            region_end: "# --- END ACTIVATION BLOCK".to_string(),
            anchor: "# --- end of permanent configuration ---".to_string(),
            key: "api_key".to_string(),
            separator: ": ".to_string(),
            inert_value: INERT_API_KEY.to_string(),
            annotation: "# embedded by activation".to_string(),
        }
    }

    pub fn placeholder_site(&self) -> String {
        format!("{}{}{}", self.key, self.separator, quote_literal(&self.inert_value))
    }

    pub fn is_inert(&self, value: &str) -> bool {
        value == self.inert_value
    }

    pub fn render_assignment(&self, secret: &Secret) -> String {
        format!(
            "{}{}{} {}",
            self.key,
            self.separator,
            quote_literal(secret.expose()),
            self.annotation
        )
    }
}

impl Default for ArtifactGrammar {
    fn default() -> Self {
        Self::config_yaml()
    }
}

/// Double-quoted literal with JSON escaping. The result is a valid YAML
/// double-quoted scalar and a valid TOML basic string, and never spans lines.
pub fn quote_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
