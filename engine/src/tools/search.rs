//! `web_search`: DuckDuckGo Instant Answer lookup
//!
//! Uses the keyless JSON endpoint (`/?q=...&format=json`). The abstract and
//! the first related topics are returned, each with its source URL.

use super::Tool;
use crate::config::SearchConfig;
use async_trait::async_trait;
use reqwest::Client;
use sdk::types::{ToolArgs, ToolOutcome};
use serde::Deserialize;
use std::time::Duration;

pub struct WebSearchTool {
    client: Client,
    base_url: String,
    max_results: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a plain topic or a named group of topics
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Topic {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

impl RelatedTopic {
    fn flatten<'a>(&'a self, out: &mut Vec<(&'a str, &'a str)>) {
        match self {
            RelatedTopic::Topic { text, first_url } => {
                if !text.trim().is_empty() {
                    out.push((text.as_str(), first_url.as_str()));
                }
            }
            RelatedTopic::Group { topics } => {
                for topic in topics {
                    topic.flatten(out);
                }
            }
        }
    }
}

impl WebSearchTool {
    pub fn new(config: &SearchConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_results: config.max_results,
        }
    }

    async fn fetch(&self, query: &str) -> Result<InstantAnswer, String> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        // served as application/x-javascript, so parse the text ourselves
        let body = response.text().await.map_err(|e| e.to_string())?;
        serde_json::from_str(&body).map_err(|e| format!("malformed response: {}", e))
    }

    fn render(&self, answer: &InstantAnswer) -> Option<String> {
        let mut lines = Vec::new();

        if !answer.abstract_text.trim().is_empty() {
            let heading = if answer.heading.is_empty() {
                String::new()
            } else {
                format!("{}: ", answer.heading)
            };
            let source = if answer.abstract_url.is_empty() {
                String::new()
            } else {
                format!(" (Source: {})", answer.abstract_url)
            };
            lines.push(format!("{}{}{}", heading, answer.abstract_text.trim(), source));
        }

        let mut topics = Vec::new();
        for topic in &answer.related_topics {
            topic.flatten(&mut topics);
        }
        for (text, url) in topics.into_iter().take(self.max_results) {
            if url.is_empty() {
                lines.push(format!("- {}", text));
            } else {
                lines.push(format!("- {} (Source: {})", text, url));
            }
        }

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for news, incidents, causes of disruptions and public opinion."
    }

    fn arguments(&self) -> &'static str {
        r#"{"query": "search terms"}"#
    }

    async fn invoke(&self, args: &ToolArgs) -> ToolOutcome {
        let query = match args.param_str("query") {
            Ok(q) => q,
            Err(e) => return e.into(),
        };

        match self.fetch(&query).await {
            Ok(answer) => match self.render(&answer) {
                Some(text) => ToolOutcome::Found(text),
                None => ToolOutcome::NotFound(format!(
                    "No web results for '{}'. Answer from general knowledge, note that sources were limited and do not search again.",
                    query
                )),
            },
            Err(e) => {
                tracing::warn!("Web search failed: {}", e);
                ToolOutcome::Failed(format!("web search unavailable ({})", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool_for(server: &MockServer) -> WebSearchTool {
        WebSearchTool::new(&SearchConfig {
            base_url: server.uri(),
            max_results: 2,
            ..SearchConfig::default()
        })
    }

    fn args(q: &str) -> ToolArgs {
        ToolArgs::new("web_search").with_param("query", json!(q))
    }

    #[tokio::test]
    async fn test_abstract_and_topics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "line 1 outage"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                json!({
                    "Heading": "Line 1",
                    "AbstractText": "Line 1 was suspended for 40 minutes.",
                    "AbstractURL": "https://news.example/l1",
                    "RelatedTopics": [
                        {"Text": "Signal fault", "FirstURL": "https://news.example/signal"},
                        {"Name": "More", "Topics": [
                            {"Text": "Crowding at 杭州东站", "FirstURL": "https://news.example/crowd"},
                            {"Text": "Third topic", "FirstURL": "https://news.example/3"}
                        ]}
                    ]
                })
                .to_string(),
            ))
            .mount(&server)
            .await;

        let outcome = tool_for(&server).invoke(&args("line 1 outage")).await;
        let text = outcome.text();
        assert!(matches!(outcome, ToolOutcome::Found(_)));
        assert!(text.starts_with("Line 1: Line 1 was suspended for 40 minutes. (Source: https://news.example/l1)"));
        assert!(text.contains("- Signal fault (Source: https://news.example/signal)"));
        assert!(text.contains("Crowding at 杭州东站"));
        assert!(!text.contains("Third topic"));
    }

    #[tokio::test]
    async fn test_empty_answer_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                json!({"Heading": "", "AbstractText": "", "RelatedTopics": []}).to_string(),
            ))
            .mount(&server)
            .await;

        let outcome = tool_for(&server).invoke(&args("zzzz")).await;
        assert!(outcome.is_not_found());
    }

    #[tokio::test]
    async fn test_http_error_is_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let outcome = tool_for(&server).invoke(&args("news")).await;
        assert!(outcome.is_failed());
        assert!(outcome.text().contains("web search unavailable"));
    }
}
