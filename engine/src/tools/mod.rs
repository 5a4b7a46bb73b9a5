pub mod metro;
pub mod policy;
pub mod search;

pub use metro::{ComplaintTool, FareTool, TrainTimesTool};
pub use policy::PolicyLookupTool;
pub use search::WebSearchTool;

use crate::config::Config;
use crate::knowledge::KnowledgeStore;
use async_trait::async_trait;
use sdk::types::{ToolArgs, ToolError, ToolOutcome};
use std::sync::Arc;
use tracing::{debug, warn};

/// A collaborator a worker may call from inside its tool loop.
///
/// `invoke` never fails: argument errors, empty lookups and unavailable
/// backends all come back as a [`ToolOutcome`] the model can read.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Example argument object shown to the model
    fn arguments(&self) -> &'static str;

    async fn invoke(&self, args: &ToolArgs) -> ToolOutcome;
}

/// Ordered set of tools that can be dispatched by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry with no tools enabled.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every tool the configuration enables, sharing one knowledge store
    pub fn from_config(config: &Config, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(FareTool::new(&config.metro.fares)));
        registry.register(Arc::new(TrainTimesTool::new(&config.metro)));
        registry.register(Arc::new(ComplaintTool::new(config.metro.complaint_sla_hours)));
        registry.register(Arc::new(PolicyLookupTool::new(
            knowledge,
            config.knowledge.top_k,
        )));
        if config.search.enabled {
            registry.register(Arc::new(WebSearchTool::new(&config.search)));
        }
        registry
    }

    /// Add a tool, replacing any tool already registered under its name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The registered tools among `names`. Names with no tool are skipped.
    pub fn subset(&self, names: &[&str]) -> ToolRegistry {
        Self {
            tools: self
                .tools
                .iter()
                .filter(|t| names.contains(&t.name()))
                .cloned()
                .collect(),
        }
    }

    /// Dispatch a tool call by name.
    ///
    /// Unknown tools come back as `Failed` so the model can see the error and
    /// self-correct.
    pub async fn dispatch(&self, args: &ToolArgs) -> ToolOutcome {
        debug!("Dispatching tool '{}'", args.fingerprint());

        match self.get(&args.tool) {
            Some(tool) => tool.invoke(args).await,
            None => {
                warn!("Unknown tool requested: {}", args.tool);
                ToolOutcome::Failed(format!(
                    "{}. Available tools: {}",
                    ToolError::UnknownTool(args.tool.clone()),
                    self.names().join(", ")
                ))
            }
        }
    }

    /// Tool-calling instructions for a worker system prompt.
    ///
    /// Empty when no tools are registered.
    pub fn prompt_section(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }

        let mut parts = vec![
            "TOOLS".to_string(),
            "To call a tool, your ENTIRE response must be ONLY this JSON object, with no text before or after:".to_string(),
            r#"{"function": "tool_name", "arguments": {"arg": "value"}}"#.to_string(),
            "When you have the answer, reply in plain text with no JSON. Never guess tool output.".to_string(),
            String::new(),
            "Available tools:".to_string(),
        ];

        for tool in &self.tools {
            parts.push(String::new());
            parts.push(format!("## {}", tool.name()));
            parts.push(tool.description().to_string());
            parts.push(format!("Arguments: {}", tool.arguments()));
        }

        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::UnavailableKnowledgeStore;

    fn registry() -> ToolRegistry {
        let mut config = Config::default();
        config.search.enabled = false;
        ToolRegistry::from_config(&config, Arc::new(UnavailableKnowledgeStore::new("test")))
    }

    #[test]
    fn test_from_config_registers_enabled_tools() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            vec!["query_fare", "query_train_times", "submit_complaint", "lookup_policy"]
        );

        let mut config = Config::default();
        config.search.enabled = true;
        let registry =
            ToolRegistry::from_config(&config, Arc::new(UnavailableKnowledgeStore::new("test")));
        assert!(registry.get("web_search").is_some());
    }

    #[test]
    fn test_subset_skips_missing() {
        let subset = registry().subset(&["query_fare", "web_search"]);
        assert_eq!(subset.names(), vec!["query_fare"]);
        assert!(registry().subset(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let outcome = registry()
            .subset(&["query_fare"])
            .dispatch(&ToolArgs::new("rm_rf"))
            .await;
        assert!(outcome.is_failed());
        assert!(outcome.text().contains("rm_rf"));
        assert!(outcome.text().contains("query_fare"));
    }

    #[test]
    fn test_prompt_section() {
        assert!(ToolRegistry::empty().prompt_section().is_empty());
        let prompt = registry().subset(&["lookup_policy"]).prompt_section();
        assert!(prompt.contains("## lookup_policy"));
        assert!(prompt.contains(r#""function""#));
    }
}
