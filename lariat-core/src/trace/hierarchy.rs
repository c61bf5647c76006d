//! Reconstructed trace hierarchy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::framework::Framework;
use super::span::{ComponentType, SpanStatus, timestamp};

/// Node level of the session root
pub const LEVEL_SESSION: u8 = 1;
/// Node level of an agent orchestration
pub const LEVEL_ORCHESTRATION: u8 = 2;
/// Node level of an agent inside an orchestration
pub const LEVEL_AGENT: u8 = 3;
/// Node level of an internal component (llm/tool/chain/prompt)
pub const LEVEL_COMPONENT: u8 = 4;

/// First model seen on a node's spans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_parameters: Option<serde_json::Value>,
}

/// One node of the reconstructed tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub name: String,
    /// 1-4; see the `LEVEL_*` constants
    pub level: u8,
    pub framework: Framework,
    pub component_type: ComponentType,
    /// Name of the parent node
    pub parent_agent_id: Option<String>,
    pub session_id: Option<String>,
    pub chat_session_id: Option<String>,
    pub agent_orchestration_id: Option<String>,
    pub message_type: Option<String>,
    pub message_sequence: Option<u64>,
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
    pub model_info: Option<ModelInfo>,
    /// Spans that contributed directly to this node
    pub span_count: usize,
    /// Child nodes
    pub agents: Vec<AgentEntry>,
}

impl AgentEntry {
    /// Depth-first, parents first
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a AgentEntry>) {
        out.push(self);
        for child in &self.agents {
            child.walk(out);
        }
    }

    /// Find a direct child by name
    pub fn child(&self, name: &str) -> Option<&AgentEntry> {
        self.agents.iter().find(|a| a.name == name)
    }
}

/// A cross-agent edge; reserved, never populated yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDependency {
    pub from: String,
    pub to: String,
    pub kind: String,
}

/// Trace-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub framework: Framework,
    pub session_id: Option<String>,
    pub chat_session_id: Option<String>,
    /// Total number of nodes at every level
    pub agent_count: usize,
    /// Number of orchestration buckets (0 without a session)
    pub orchestration_count: usize,
    /// Number of buffered spans reconstructed
    pub span_count: usize,
}

/// The finalize-time output of a processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalTrace {
    pub trace_id: String,
    pub name: String,
    /// Top-level nodes; children nest under `agents`
    pub agents: Vec<AgentEntry>,
    pub dependencies: Vec<TraceDependency>,
    pub metadata: TraceMetadata,
}

impl HierarchicalTrace {
    /// Every node in pre-order, so parents always precede descendants
    pub fn nodes(&self) -> Vec<&AgentEntry> {
        let mut out = Vec::new();
        for root in &self.agents {
            root.walk(&mut out);
        }
        out
    }

    /// Nodes at a given level
    pub fn nodes_at_level(&self, level: u8) -> Vec<&AgentEntry> {
        self.nodes()
            .into_iter()
            .filter(|node| node.level == level)
            .collect()
    }

    /// Earliest start over all nodes
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.nodes().iter().filter_map(|n| n.start_time).min()
    }

    /// Latest end over all nodes
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.nodes().iter().filter_map(|n| n.end_time).max()
    }

    /// Whole milliseconds between `start_time` and `end_time`
    pub fn duration_ms(&self) -> u64 {
        duration_ms(self.start_time(), self.end_time())
    }
}

/// Truncated whole milliseconds between two optional instants, 0 if either
/// is missing or the interval is negative
pub fn duration_ms(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> u64 {
    match (start, end) {
        (Some(start), Some(end)) => u64::try_from((end - start).num_milliseconds()).unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn leaf(name: &str, level: u8) -> AgentEntry {
        AgentEntry {
            name: name.to_string(),
            level,
            framework: Framework::Generic,
            component_type: ComponentType::Agent,
            parent_agent_id: None,
            session_id: None,
            chat_session_id: None,
            agent_orchestration_id: None,
            message_type: None,
            message_sequence: None,
            start_time: None,
            end_time: None,
            duration_ms: 0,
            status: SpanStatus::Completed,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            total_cost: 0.0,
            model_info: None,
            span_count: 0,
            agents: Vec::new(),
        }
    }

    #[test]
    fn test_duration_truncates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = start + Duration::microseconds(1_999_900);
        assert_eq!(duration_ms(Some(start), Some(end)), 1999);
        assert_eq!(duration_ms(Some(end), Some(start)), 0);
        assert_eq!(duration_ms(None, Some(end)), 0);
    }

    #[test]
    fn test_nodes_preorder() {
        let mut root = leaf("root", 1);
        let mut mid = leaf("mid", 2);
        mid.agents.push(leaf("leaf", 3));
        root.agents.push(mid);
        root.agents.push(leaf("sibling", 2));

        let trace = HierarchicalTrace {
            trace_id: "t".to_string(),
            name: "test".to_string(),
            agents: vec![root],
            dependencies: Vec::new(),
            metadata: TraceMetadata {
                framework: Framework::Generic,
                session_id: None,
                chat_session_id: None,
                agent_count: 4,
                orchestration_count: 0,
                span_count: 0,
            },
        };

        let names: Vec<&str> = trace.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["root", "mid", "leaf", "sibling"]);
        assert_eq!(trace.nodes_at_level(2).len(), 2);
    }
}
