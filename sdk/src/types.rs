//! Tool argument and outcome types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Arguments for one tool invocation, as requested by the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolArgs {
    pub tool: String,
    pub params: HashMap<String, serde_json::Value>,
}

impl ToolArgs {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: HashMap::new(),
        }
    }

    /// Build from a model-emitted argument object. Non-object values are
    /// treated as a single `query` argument.
    pub fn from_value(tool: impl Into<String>, value: serde_json::Value) -> Self {
        let params = match value {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            serde_json::Value::Null => HashMap::new(),
            serde_json::Value::String(s) => HashMap::from([("query".to_string(), s.into())]),
            other => HashMap::from([("query".to_string(), other)]),
        };
        Self {
            tool: tool.into(),
            params,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a non-empty string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        match self.params.get(key) {
            None | Some(serde_json::Value::Null) => {
                Err(ToolError::MissingParameter(key.to_string()))
            }
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => {
                Err(ToolError::MissingParameter(key.to_string()))
            }
            Some(serde_json::Value::String(s)) => Ok(s.trim().to_string()),
            // numbers and bools are accepted in their textual form
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            Some(serde_json::Value::Bool(b)) => Ok(b.to_string()),
            Some(_) => Err(ToolError::InvalidParameter(key.to_string())),
        }
    }

    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.param_str(key).ok()
    }

    pub fn param_u64_opt(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// Stable fingerprint of the arguments, used to spot repeated calls
    pub fn fingerprint(&self) -> String {
        let mut keys: Vec<&String> = self.params.keys().collect();
        keys.sort();
        let parts: Vec<String> = keys
            .into_iter()
            .map(|k| format!("{}={}", k, self.params[k]))
            .collect();
        format!("{}({})", self.tool, parts.join(","))
    }
}

/// Result of invoking a tool. Every variant renders to text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "text", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The lookup succeeded
    Found(String),
    /// The lookup ran but produced nothing; the tool must not be retried
    NotFound(String),
    /// The collaborator failed or is unavailable
    Failed(String),
}

impl ToolOutcome {
    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Found(t) | ToolOutcome::NotFound(t) | ToolOutcome::Failed(t) => t,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ToolOutcome::NotFound(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ToolOutcome::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ToolOutcome::Found(_) => "found",
            ToolOutcome::NotFound(_) => "not_found",
            ToolOutcome::Failed(_) => "failed",
        }
    }
}

impl From<ToolError> for ToolOutcome {
    fn from(err: ToolError) -> Self {
        ToolOutcome::Failed(err.to_string())
    }
}

/// Argument errors raised before a tool does any work
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_object() {
        let args = ToolArgs::from_value(
            "query_fare",
            json!({"start_station": "A", "end_station": "B"}),
        );
        assert_eq!(args.tool, "query_fare");
        assert_eq!(args.param_str("start_station").unwrap(), "A");
        assert_eq!(args.param_str("end_station").unwrap(), "B");
    }

    #[test]
    fn test_from_value_bare_string_becomes_query() {
        let args = ToolArgs::from_value("lookup_policy", json!("luggage size"));
        assert_eq!(args.param_str("query").unwrap(), "luggage size");
    }

    #[test]
    fn test_param_str_missing_and_blank() {
        let args = ToolArgs::new("x").with_param("blank", json!("   "));
        assert!(matches!(
            args.param_str("missing"),
            Err(ToolError::MissingParameter(_))
        ));
        assert!(matches!(
            args.param_str("blank"),
            Err(ToolError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_param_str_rejects_objects() {
        let args = ToolArgs::new("x").with_param("q", json!({"a": 1}));
        assert!(matches!(
            args.param_str("q"),
            Err(ToolError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_param_u64_opt_accepts_strings() {
        let args = ToolArgs::new("x")
            .with_param("k", json!("3"))
            .with_param("n", json!(5));
        assert_eq!(args.param_u64_opt("k"), Some(3));
        assert_eq!(args.param_u64_opt("n"), Some(5));
        assert_eq!(args.param_u64_opt("missing"), None);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = ToolArgs::new("t")
            .with_param("x", json!(1))
            .with_param("y", json!("b"));
        let b = ToolArgs::new("t")
            .with_param("y", json!("b"))
            .with_param("x", json!(1));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_outcome_text_and_labels() {
        let found = ToolOutcome::Found("4 CNY".into());
        let missing = ToolOutcome::NotFound("nothing".into());
        let failed: ToolOutcome = ToolError::UnknownTool("teleport".into()).into();

        assert_eq!(found.text(), "4 CNY");
        assert!(missing.is_not_found());
        assert!(failed.is_failed());
        assert_eq!(failed.text(), "Unknown tool: teleport");
        assert_eq!(missing.label(), "not_found");
    }
}
