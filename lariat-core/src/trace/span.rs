//! Span data model
//!
//! A [`Span`] is one executed unit of work (an agent, LLM call, tool call...).
//! Spans sharing a `trace_id` form a trace. Every field except `trace_id` has a
//! default so partially populated records still deserialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of work a span measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    #[default]
    Agent,
    Llm,
    Tool,
    Chain,
    Prompt,
    SessionOrchestration,
    AgentOrchestration,
    /// Any value not recognised above
    #[serde(other)]
    Other,
}

impl ComponentType {
    /// Internal components that nest under an agent
    pub fn is_component(&self) -> bool {
        matches!(
            self,
            ComponentType::Llm | ComponentType::Tool | ComponentType::Chain | ComponentType::Prompt
        )
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Agent => "agent",
            ComponentType::Llm => "llm",
            ComponentType::Tool => "tool",
            ComponentType::Chain => "chain",
            ComponentType::Prompt => "prompt",
            ComponentType::SessionOrchestration => "session_orchestration",
            ComponentType::AgentOrchestration => "agent_orchestration",
            ComponentType::Other => "other",
        }
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Running,
    #[default]
    Completed,
    Failed,
}

impl SpanStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Running => "running",
            SpanStatus::Completed => "completed",
            SpanStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed unit of work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    /// Groups spans into one trace; a span without it is dropped
    pub trace_id: Option<String>,
    /// Producer-assigned span identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub agent_name: String,
    pub function_name: String,
    pub component_type: ComponentType,
    #[serde(with = "timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub inputs: serde_json::Value,
    pub outputs: serde_json::Value,
    pub error: Option<String>,
    pub tags: HashMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,

    // Token usage and cost
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,

    // Model information
    pub model_name: Option<String>,
    pub model_provider: Option<String>,
    pub model_parameters: Option<serde_json::Value>,

    // Session linkage
    pub session_id: Option<String>,
    pub session_type: Option<String>,
    pub chat_session_id: Option<String>,
    pub message_type: Option<String>,
    pub message_sequence: Option<u64>,
    pub message_content: Option<String>,
    pub user_message_id: Option<String>,
    pub agent_orchestration_id: Option<String>,

    /// Explicit parent hint (name of the owning agent)
    pub parent_agent_id: Option<String>,
    /// Framework tag set by the producer
    pub framework: Option<String>,
}

impl Span {
    /// Start a running span for `agent_name` in `trace_id`
    pub fn new(trace_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        let agent_name = agent_name.into();
        Self {
            trace_id: Some(trace_id.into()),
            span_id: Some(uuid::Uuid::new_v4().to_string()),
            function_name: agent_name.clone(),
            agent_name,
            start_time: Some(Utc::now()),
            status: SpanStatus::Running,
            inputs: serde_json::Value::Null,
            outputs: serde_json::Value::Null,
            ..Default::default()
        }
    }

    pub fn with_function_name(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = function_name.into();
        self
    }

    pub fn with_component_type(mut self, component_type: ComponentType) -> Self {
        self.component_type = component_type;
        self
    }

    pub fn with_times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: serde_json::Value) -> Self {
        self.outputs = outputs;
        self
    }

    /// Set token usage; `total_tokens` is derived
    pub fn with_tokens(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.total_tokens = input_tokens + output_tokens;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_model(
        mut self,
        model_name: impl Into<String>,
        model_provider: Option<String>,
        model_parameters: Option<serde_json::Value>,
    ) -> Self {
        self.model_name = Some(model_name.into());
        self.model_provider = model_provider;
        self.model_parameters = model_parameters;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        self.session_id = Some(session_id.clone());
        self.chat_session_id = Some(session_id);
        self
    }

    pub fn with_orchestration(mut self, orchestration_id: impl Into<String>) -> Self {
        self.agent_orchestration_id = Some(orchestration_id.into());
        self
    }

    pub fn with_parent_agent(mut self, parent: impl Into<String>) -> Self {
        self.parent_agent_id = Some(parent.into());
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mark the span completed now
    pub fn complete(mut self) -> Self {
        self.end_time = Some(Utc::now());
        self.status = SpanStatus::Completed;
        self
    }

    /// Mark the span failed now
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.end_time = Some(Utc::now());
        self.status = SpanStatus::Failed;
        self.error = Some(error.into());
        self
    }

    /// The trace id, if present and non-empty
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref().filter(|id| !id.is_empty())
    }

    /// `input_tokens + output_tokens`
    pub fn token_sum(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Either session identifier, preferring `chat_session_id`
    pub fn any_session_id(&self) -> Option<&str> {
        self.chat_session_id
            .as_deref()
            .or(self.session_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Timestamp wire format.
///
/// Always written fixed-width (`YYYY-MM-DDTHH:MM:SS.ffffffZ`) so that string
/// order equals time order. Reading accepts RFC 3339 and offset-less ISO-8601
/// (taken as UTC); an unparseable value reads as absent.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Render a timestamp in the fixed-width wire form
    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Parse a timestamp leniently
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(serde_json::Value::String(s)) => parse(&s),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_defaults() {
        let span = Span::new("t1", "explainer");
        assert_eq!(span.trace_id(), Some("t1"));
        assert_eq!(span.function_name, "explainer");
        assert_eq!(span.status, SpanStatus::Running);
        assert!(span.start_time.is_some());
        assert!(span.end_time.is_none());
    }

    #[test]
    fn test_complete_and_fail() {
        let done = Span::new("t1", "a").complete();
        assert_eq!(done.status, SpanStatus::Completed);
        assert!(done.end_time.is_some());

        let failed = Span::new("t1", "a").fail("boom");
        assert_eq!(failed.status, SpanStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_tokens() {
        let span = Span::new("t1", "a").with_tokens(120, 30);
        assert_eq!(span.total_tokens, 150);
        assert_eq!(span.token_sum(), 150);
    }

    #[test]
    fn test_empty_trace_id_is_absent() {
        let mut span = Span::new("", "a");
        assert_eq!(span.trace_id(), None);
        span.trace_id = None;
        assert_eq!(span.trace_id(), None);
    }

    #[test]
    fn test_component_classification() {
        assert!(ComponentType::Llm.is_component());
        assert!(ComponentType::Tool.is_component());
        assert!(!ComponentType::Agent.is_component());
        assert!(!ComponentType::SessionOrchestration.is_component());
    }

    #[test]
    fn test_timestamp_fixed_width() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        let a = timestamp::format(&early);
        let b = timestamp::format(&late);
        assert_eq!(a, "2024-01-02T03:04:05.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_timestamp_parse_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(timestamp::parse("2024-05-01T12:00:00Z"), Some(expected));
        assert_eq!(timestamp::parse("2024-05-01T14:00:00+02:00"), Some(expected));
        assert_eq!(timestamp::parse("2024-05-01T12:00:00.000000"), Some(expected));
        assert_eq!(timestamp::parse("yesterday"), None);
        assert_eq!(timestamp::parse(""), None);
    }

    #[test]
    fn test_partial_record_deserializes() {
        let span: Span = serde_json::from_str(
            r#"{"trace_id": "t1", "agent_name": "explainer", "start_time": "garbage", "component_type": "retriever"}"#,
        )
        .unwrap();
        assert_eq!(span.trace_id(), Some("t1"));
        assert_eq!(span.start_time, None);
        assert_eq!(span.component_type, ComponentType::Other);
        assert_eq!(span.input_tokens, 0);
        assert_eq!(span.status, SpanStatus::Completed);
    }

    #[test]
    fn test_missing_trace_id_deserializes_as_none() {
        let span: Span = serde_json::from_str(r#"{"agent_name": "orphan"}"#).unwrap();
        assert_eq!(span.trace_id(), None);
    }
}
