//! Metro business-data tools
//!
//! Fares and timetables come from the `[metro]` config section; complaints
//! are acknowledged with a generated ticket number.

use super::Tool;
use crate::config::{FareRule, MetroConfig, TrainTimes};
use async_trait::async_trait;
use sdk::types::{ToolArgs, ToolOutcome};
use std::collections::HashMap;

/// Symmetric point-to-point fare lookup
pub struct FareTool {
    fares: HashMap<(String, String), u32>,
}

impl FareTool {
    pub fn new(rules: &[FareRule]) -> Self {
        let mut fares = HashMap::new();
        for rule in rules {
            fares.insert((rule.from.trim().to_string(), rule.to.trim().to_string()), rule.fare);
        }
        Self { fares }
    }

    /// Fare between two stations in either direction
    pub fn fare(&self, a: &str, b: &str) -> Option<u32> {
        self.fares
            .get(&(a.to_string(), b.to_string()))
            .or_else(|| self.fares.get(&(b.to_string(), a.to_string())))
            .copied()
    }
}

#[async_trait]
impl Tool for FareTool {
    fn name(&self) -> &'static str {
        "query_fare"
    }

    fn description(&self) -> &'static str {
        "Look up the single-journey fare between two metro stations."
    }

    fn arguments(&self) -> &'static str {
        r#"{"start_station": "station name", "end_station": "station name"}"#
    }

    async fn invoke(&self, args: &ToolArgs) -> ToolOutcome {
        let start = match args.param_str("start_station") {
            Ok(s) => s,
            Err(e) => return e.into(),
        };
        let end = match args.param_str("end_station") {
            Ok(s) => s,
            Err(e) => return e.into(),
        };

        match self.fare(&start, &end) {
            Some(fare) => ToolOutcome::Found(format!(
                "The fare from {} to {} is {} yuan.",
                start, end, fare
            )),
            None => ToolOutcome::NotFound(format!(
                "No fare on record between {} and {}. Ask the passenger to check the station names.",
                start, end
            )),
        }
    }
}

/// First and last train times per station
pub struct TrainTimesTool {
    default_times: TrainTimes,
    timetable: HashMap<String, TrainTimes>,
}

impl TrainTimesTool {
    pub fn new(metro: &MetroConfig) -> Self {
        Self {
            default_times: TrainTimes {
                first: metro.first_train.clone(),
                last: metro.last_train.clone(),
            },
            timetable: metro.timetable.clone(),
        }
    }

    pub fn times(&self, station: &str) -> &TrainTimes {
        self.timetable.get(station).unwrap_or(&self.default_times)
    }
}

#[async_trait]
impl Tool for TrainTimesTool {
    fn name(&self) -> &'static str {
        "query_train_times"
    }

    fn description(&self) -> &'static str {
        "Look up the first and last train times at a station."
    }

    fn arguments(&self) -> &'static str {
        r#"{"station": "station name"}"#
    }

    async fn invoke(&self, args: &ToolArgs) -> ToolOutcome {
        let station = match args.param_str("station") {
            Ok(s) => s,
            Err(e) => return e.into(),
        };
        let times = self.times(&station);
        ToolOutcome::Found(format!(
            "At {} the first train is at {} and the last train is at {}.",
            station, times.first, times.last
        ))
    }
}

/// Files a passenger complaint and returns its ticket number
pub struct ComplaintTool {
    sla_hours: u32,
}

impl ComplaintTool {
    pub fn new(sla_hours: u32) -> Self {
        Self { sla_hours }
    }
}

/// `CPT-` followed by eight upper-case hex digits
pub fn complaint_ticket_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("CPT-{}", hex[..8].to_uppercase())
}

#[async_trait]
impl Tool for ComplaintTool {
    fn name(&self) -> &'static str {
        "submit_complaint"
    }

    fn description(&self) -> &'static str {
        "File a passenger complaint and get a ticket number. Category is e.g. staff attitude, equipment fault or cleanliness."
    }

    fn arguments(&self) -> &'static str {
        r#"{"category": "equipment fault", "detail": "what happened, where and when"}"#
    }

    async fn invoke(&self, args: &ToolArgs) -> ToolOutcome {
        let detail = match args.param_str("detail") {
            Ok(d) => d,
            Err(e) => return e.into(),
        };
        let category = args
            .param_str_opt("category")
            .unwrap_or_else(|| "other".to_string());

        let ticket_id = complaint_ticket_id();
        tracing::info!("Filed complaint {} ({}): {}", ticket_id, category, detail);

        ToolOutcome::Found(format!(
            "Complaint filed. Ticket number: {}. Category: {}. It will be handled within {} hours.",
            ticket_id, category, self.sla_hours
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fare_args(from: &str, to: &str) -> ToolArgs {
        ToolArgs::new("query_fare")
            .with_param("start_station", json!(from))
            .with_param("end_station", json!(to))
    }

    #[tokio::test]
    async fn test_fare_is_symmetric() {
        let tool = FareTool::new(&MetroConfig::default().fares);

        let forward = tool.invoke(&fare_args("杭州东站", "武林广场")).await;
        let backward = tool.invoke(&fare_args("武林广场", "杭州东站")).await;
        assert!(matches!(forward, ToolOutcome::Found(_)));
        assert!(forward.text().contains("4 yuan"));
        assert!(backward.text().contains("4 yuan"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let tool = FareTool::new(&MetroConfig::default().fares);
        let outcome = tool.invoke(&fare_args("A", "B")).await;
        assert!(outcome.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_argument_is_failed() {
        let tool = FareTool::new(&MetroConfig::default().fares);
        let outcome = tool
            .invoke(&ToolArgs::new("query_fare").with_param("start_station", json!("A")))
            .await;
        assert!(outcome.is_failed());
        assert!(outcome.text().contains("end_station"));
    }

    #[tokio::test]
    async fn test_train_times_defaults_and_overrides() {
        let mut metro = MetroConfig::default();
        metro.timetable.insert(
            "西湖".to_string(),
            TrainTimes {
                first: "06:30".to_string(),
                last: "23:00".to_string(),
            },
        );
        let tool = TrainTimesTool::new(&metro);

        let args = |s: &str| ToolArgs::new("query_train_times").with_param("station", json!(s));

        let default = tool.invoke(&args("龙朔")).await;
        assert!(default.text().contains("06:05"));
        assert!(default.text().contains("22:30"));

        let custom = tool.invoke(&args("西湖")).await;
        assert!(custom.text().contains("23:00"));
    }

    #[tokio::test]
    async fn test_complaint_ticket() {
        let tool = ComplaintTool::new(24);
        let outcome = tool
            .invoke(
                &ToolArgs::new("submit_complaint")
                    .with_param("category", json!("equipment fault"))
                    .with_param("detail", json!("escalator at station A is broken")),
            )
            .await;

        assert!(matches!(outcome, ToolOutcome::Found(_)));
        assert!(outcome.text().contains("CPT-"));
        assert!(outcome.text().contains("24 hours"));
    }

    #[test]
    fn test_ticket_id_format() {
        let id = complaint_ticket_id();
        assert_eq!(id.len(), 12);
        assert!(id.starts_with("CPT-"));
        assert!(id[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }
}
