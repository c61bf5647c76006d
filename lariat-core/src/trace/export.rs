//! Trace export: batch payload records and text rendering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::hierarchy::{AgentEntry, HierarchicalTrace};
use super::span::{ComponentType, SpanStatus, timestamp};
use crate::conversation::ChatSessionSnapshot;

/// Export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceFormat {
    /// JSON format
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Indented tree summary
    #[default]
    Summary,
}

impl std::str::FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(TraceFormat::Json),
            "pretty" | "json-pretty" => Ok(TraceFormat::JsonPretty),
            "summary" => Ok(TraceFormat::Summary),
            other => Err(format!("unknown trace format: {}", other)),
        }
    }
}

/// Trace summary sent in the `traces` array of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: String,
    pub name: String,
    pub status: SpanStatus,
    #[serde(with = "timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub session_id: Option<String>,
    pub session_type: Option<String>,
    #[serde(with = "timestamp")]
    pub session_start_time: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub session_end_time: Option<DateTime<Utc>>,
    pub session_timeout_minutes: Option<i64>,
    pub message_count: Option<u64>,
    pub chat_session_id: Option<String>,
    pub environment: String,
    pub tags: HashMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TraceRecord {
    /// Summarize a reconstructed trace.
    ///
    /// Session fields come from `session` when the session is still tracked;
    /// otherwise only the ids found on the spans are reported.
    pub fn from_trace(
        trace: &HierarchicalTrace,
        session: Option<&ChatSessionSnapshot>,
        environment: &str,
        tags: &HashMap<String, String>,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(
            "framework".to_string(),
            serde_json::json!(trace.metadata.framework.as_str()),
        );
        metadata.insert(
            "agent_count".to_string(),
            serde_json::json!(trace.metadata.agent_count),
        );
        metadata.insert(
            "orchestration_count".to_string(),
            serde_json::json!(trace.metadata.orchestration_count),
        );
        metadata.insert(
            "span_count".to_string(),
            serde_json::json!(trace.metadata.span_count),
        );
        metadata.insert(
            "dependencies".to_string(),
            serde_json::to_value(&trace.dependencies).unwrap_or_default(),
        );

        let status = trace
            .agents
            .iter()
            .map(|root| root.status)
            .fold(SpanStatus::Completed, worse);

        Self {
            trace_id: trace.trace_id.clone(),
            name: trace.name.clone(),
            status,
            start_time: trace.start_time(),
            end_time: trace.end_time(),
            duration_ms: trace.duration_ms(),
            session_id: session
                .map(|s| s.session_id.clone())
                .or_else(|| trace.metadata.session_id.clone()),
            session_type: session.map(|s| s.session_type.clone()),
            session_start_time: session.map(|s| s.start_time),
            session_end_time: session.and_then(|s| s.end_time),
            session_timeout_minutes: session.map(|s| s.timeout_minutes),
            message_count: session.map(|s| s.message_count),
            chat_session_id: trace.metadata.chat_session_id.clone(),
            environment: environment.to_string(),
            tags: tags.clone(),
            metadata,
        }
    }
}

fn worse(a: SpanStatus, b: SpanStatus) -> SpanStatus {
    match (a, b) {
        (SpanStatus::Failed, _) | (_, SpanStatus::Failed) => SpanStatus::Failed,
        (SpanStatus::Running, _) | (_, SpanStatus::Running) => SpanStatus::Running,
        _ => SpanStatus::Completed,
    }
}

/// One flattened tree node in the `agents` array of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub trace_id: String,
    pub name: String,
    pub level: u8,
    pub framework: String,
    pub component_type: ComponentType,
    pub parent_agent_id: Option<String>,
    #[serde(with = "timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub status: SpanStatus,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub model_name: Option<String>,
    pub model_provider: Option<String>,
    pub model_parameters: Option<serde_json::Value>,
    pub session_id: Option<String>,
    pub chat_session_id: Option<String>,
    pub agent_orchestration_id: Option<String>,
    pub message_type: Option<String>,
    pub message_sequence: Option<u64>,
    pub span_count: usize,
}

impl AgentRecord {
    pub fn from_node(trace_id: &str, node: &AgentEntry) -> Self {
        let model = node.model_info.as_ref();
        Self {
            agent_id: uuid::Uuid::new_v4().to_string(),
            trace_id: trace_id.to_string(),
            name: node.name.clone(),
            level: node.level,
            framework: node.framework.as_str().to_string(),
            component_type: node.component_type,
            parent_agent_id: node.parent_agent_id.clone(),
            start_time: node.start_time,
            end_time: node.end_time,
            duration_ms: node.duration_ms,
            status: node.status,
            input_tokens: node.input_tokens,
            output_tokens: node.output_tokens,
            total_tokens: node.total_tokens,
            total_cost: node.total_cost,
            model_name: model.map(|m| m.model_name.clone()),
            model_provider: model.and_then(|m| m.model_provider.clone()),
            model_parameters: model.and_then(|m| m.model_parameters.clone()),
            session_id: node.session_id.clone(),
            chat_session_id: node.chat_session_id.clone(),
            agent_orchestration_id: node.agent_orchestration_id.clone(),
            message_type: node.message_type.clone(),
            message_sequence: node.message_sequence,
            span_count: node.span_count,
        }
    }
}

/// Payload of `POST /api/v1/traces/batch`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceBatch {
    pub traces: Vec<TraceRecord>,
    pub agents: Vec<AgentRecord>,
}

impl TraceBatch {
    /// Build the batch for one finalized trace; agents are listed in
    /// pre-order so parents precede their descendants
    pub fn from_trace(
        trace: &HierarchicalTrace,
        session: Option<&ChatSessionSnapshot>,
        environment: &str,
        tags: &HashMap<String, String>,
    ) -> Self {
        Self {
            traces: vec![TraceRecord::from_trace(trace, session, environment, tags)],
            agents: trace
                .nodes()
                .into_iter()
                .map(|node| AgentRecord::from_node(&trace.trace_id, node))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty() && self.agents.is_empty()
    }
}

/// Trace exporter
pub struct TraceExporter;

impl TraceExporter {
    /// Export to JSON
    pub fn to_json(trace: &HierarchicalTrace) -> Result<String, serde_json::Error> {
        serde_json::to_string(trace)
    }

    /// Export to pretty JSON
    pub fn to_json_pretty(trace: &HierarchicalTrace) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(trace)
    }

    /// Export to an indented tree summary
    pub fn to_summary(trace: &HierarchicalTrace) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Trace: {}", trace.name));
        lines.push(format!("ID: {}", trace.trace_id));
        lines.push(format!("Framework: {}", trace.metadata.framework));
        if let Some(ref session) = trace.metadata.chat_session_id {
            lines.push(format!("Session: {}", session));
        }
        lines.push(format!("Duration: {}ms", trace.duration_ms()));
        lines.push(format!(
            "Nodes: {} (orchestrations: {}, spans: {})",
            trace.metadata.agent_count,
            trace.metadata.orchestration_count,
            trace.metadata.span_count
        ));

        lines.push(String::new());
        lines.push("Hierarchy:".to_string());
        for root in &trace.agents {
            Self::push_node(&mut lines, root, 1);
        }

        lines.join("\n")
    }

    fn push_node(lines: &mut Vec<String>, node: &AgentEntry, depth: usize) {
        let mut line = format!(
            "{}[{}] {} ({}) {} {}ms",
            "  ".repeat(depth),
            node.level,
            node.name,
            node.component_type,
            node.status,
            node.duration_ms
        );
        if node.total_tokens > 0 {
            line.push_str(&format!(" tokens={}", node.total_tokens));
        }
        if node.total_cost > 0.0 {
            line.push_str(&format!(" cost=${:.6}", node.total_cost));
        }
        if let Some(ref model) = node.model_info {
            line.push_str(&format!(" model={}", model.model_name));
        }
        lines.push(line);

        for child in &node.agents {
            Self::push_node(lines, child, depth + 1);
        }
    }

    /// Export in specified format
    pub fn export(
        trace: &HierarchicalTrace,
        format: TraceFormat,
    ) -> Result<String, serde_json::Error> {
        match format {
            TraceFormat::Json => Self::to_json(trace),
            TraceFormat::JsonPretty => Self::to_json_pretty(trace),
            TraceFormat::Summary => Ok(Self::to_summary(trace)),
        }
    }
}
