//! The inbound conversational turn handed to the resolver.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter values extracted by the upstream classifier, ordered by name so
/// that serialization (and therefore cache keys) is deterministic.
pub type Parameters = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub context: Option<String>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Whitespace runs collapsed to one space, then truncated to `max_chars`.
    /// Both the cache key and the upstream prompt derive from this, so they
    /// always cut at the same point.
    fn collapsed(&self, max_chars: usize) -> String {
        let collapsed = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        truncate_chars(&collapsed, max_chars).to_string()
    }

    /// Collapsed, truncated and lower-cased. This is the form used for
    /// knowledge matching and cache keys.
    pub fn normalized(&self, max_chars: usize) -> String {
        self.collapsed(max_chars).to_lowercase()
    }

    /// Collapsed and truncated, case preserved. Sent upstream.
    pub fn prompt_text(&self, max_chars: usize) -> String {
        self.collapsed(max_chars)
    }

    /// Parameter values rendered as plain strings, skipping nulls and empty
    /// strings (platforms send `""` for slots they did not fill).
    pub fn parameter_strings(&self) -> BTreeMap<&str, String> {
        self.parameters
            .iter()
            .filter_map(|(name, value)| {
                let rendered = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s.trim().to_string(),
                    serde_json::Value::Array(items) => items
                        .iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(", "),
                    other => other.to_string(),
                };
                if rendered.is_empty() {
                    None
                } else {
                    Some((name.as_str(), rendered))
                }
            })
            .collect()
    }
}

/// Truncate on a character boundary, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
