//! Per-trace span accumulation and hierarchy reconstruction
//!
//! A [`TraceProcessor`] buffers every span of one trace in arrival order and,
//! on finalize, rebuilds the agent tree:
//!
//! - **With a session** (any span carries `chat_session_id` or `session_id`):
//!   one level-1 session node; one level-2 node per orchestration bucket
//!   (spans without `agent_orchestration_id` share a default bucket); one
//!   level-3 node per agent name inside a bucket; llm/tool/chain/prompt spans
//!   whose `parent_agent_id` names a level-3 agent become level-4 children.
//! - **Without a session**: one flat level-1 node per distinct agent name.
//!
//! Missing optional fields never fail reconstruction; they are treated as
//! absent (empty names, zero tokens, no timing).

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::framework::Framework;
use super::hierarchy::{
    AgentEntry, HierarchicalTrace, LEVEL_AGENT, LEVEL_COMPONENT, LEVEL_ORCHESTRATION,
    LEVEL_SESSION, ModelInfo, TraceMetadata, duration_ms,
};
use super::span::{ComponentType, Span, SpanStatus};

/// Name of the bucket for spans without an orchestration id
pub const DEFAULT_ORCHESTRATION: &str = "agent_orchestration";

/// Accumulates the spans of a single trace
#[derive(Debug, Clone)]
pub struct TraceProcessor {
    trace_id: String,
    framework: Framework,
    /// All spans, in arrival order
    spans: Vec<Span>,
    /// agent_name -> indices into `spans`
    agents: HashMap<String, Vec<usize>>,
    agent_order: Vec<String>,
    /// orchestration id (None = default bucket) -> indices into `spans`
    orchestrations: HashMap<Option<String>, Vec<usize>>,
    orchestration_order: Vec<Option<String>>,
}

/// Session linkage found on a trace
#[derive(Debug, Clone, Default)]
struct SessionLink {
    session_id: Option<String>,
    chat_session_id: Option<String>,
}

impl SessionLink {
    fn scan(spans: &[Span]) -> Self {
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(String::from);
        Self {
            session_id: spans.iter().find_map(|s| non_empty(&s.session_id)),
            chat_session_id: spans.iter().find_map(|s| non_empty(&s.chat_session_id)),
        }
    }

    fn root_id(&self) -> Option<&str> {
        self.chat_session_id.as_deref().or(self.session_id.as_deref())
    }
}

/// A group of spans becoming one node, plus the node's placement
struct NodeParts<'a> {
    name: String,
    level: u8,
    component_type: ComponentType,
    parent: Option<String>,
    orchestration_id: Option<String>,
    spans: Vec<&'a Span>,
}

impl TraceProcessor {
    /// Create an empty processor for `trace_id`
    pub fn new(trace_id: impl Into<String>, framework: Framework) -> Self {
        Self {
            trace_id: trace_id.into(),
            framework,
            spans: Vec::new(),
            agents: HashMap::new(),
            agent_order: Vec::new(),
            orchestrations: HashMap::new(),
            orchestration_order: Vec::new(),
        }
    }

    /// Create a processor whose framework is detected from its first span
    pub fn for_span(trace_id: impl Into<String>, first: &Span) -> Self {
        Self::new(trace_id, Framework::detect(first))
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn framework(&self) -> Framework {
        self.framework
    }

    /// Buffered spans in arrival order
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Distinct agent names in first-seen order
    pub fn agent_names(&self) -> &[String] {
        &self.agent_order
    }

    /// Buffer a span
    pub fn add_span(&mut self, span: Span) {
        let index = self.spans.len();

        let agent = span.agent_name.clone();
        if !self.agents.contains_key(&agent) {
            self.agent_order.push(agent.clone());
        }
        self.agents.entry(agent).or_default().push(index);

        let bucket = span
            .agent_orchestration_id
            .clone()
            .filter(|id| !id.is_empty());
        if !self.orchestrations.contains_key(&bucket) {
            self.orchestration_order.push(bucket.clone());
        }
        self.orchestrations.entry(bucket).or_default().push(index);

        tracing::debug!(
            trace_id = %self.trace_id,
            agent_name = %span.agent_name,
            component_type = %span.component_type,
            "Buffered span"
        );
        self.spans.push(span);
    }

    /// Reconstruct the hierarchy from everything buffered so far
    pub fn process_trace(&self) -> HierarchicalTrace {
        let link = SessionLink::scan(&self.spans);

        let (agents, orchestration_count) = match link.root_id() {
            Some(root_id) => {
                let root = self.build_session_tree(root_id, &link);
                let buckets = root.agents.len();
                (vec![root], buckets)
            }
            None => (self.build_flat(&link), 0),
        };

        let agent_count = agents
            .iter()
            .map(|root| {
                let mut nodes = Vec::new();
                root.walk(&mut nodes);
                nodes.len()
            })
            .sum();

        let kind = if link.root_id().is_some() {
            "Session"
        } else {
            "Workflow"
        };

        let trace = HierarchicalTrace {
            trace_id: self.trace_id.clone(),
            name: format!("{} {}", self.framework.display_name(), kind),
            agents,
            dependencies: Vec::new(),
            metadata: TraceMetadata {
                framework: self.framework,
                session_id: link.session_id.clone(),
                chat_session_id: link.chat_session_id.clone(),
                agent_count,
                orchestration_count,
                span_count: self.spans.len(),
            },
        };

        tracing::info!(
            trace_id = %self.trace_id,
            framework = %self.framework,
            nodes = agent_count,
            orchestrations = orchestration_count,
            "Reconstructed trace hierarchy"
        );
        trace
    }

    fn build_flat(&self, link: &SessionLink) -> Vec<AgentEntry> {
        self.agent_order
            .iter()
            .map(|name| {
                let spans = self.spans_at(&self.agents[name]);
                let component_type = spans
                    .first()
                    .map(|s| s.component_type)
                    .unwrap_or_default();
                self.build_node(
                    NodeParts {
                        name: name.clone(),
                        level: LEVEL_SESSION,
                        component_type,
                        parent: None,
                        orchestration_id: None,
                        spans,
                    },
                    link,
                    Vec::new(),
                )
            })
            .collect()
    }

    fn build_session_tree(&self, root_id: &str, link: &SessionLink) -> AgentEntry {
        let root_name = format!("chat_session_{}", short_id(root_id));

        // Level-3 agents per bucket, in bucket order, then agent order
        let mut bucket_agents: Vec<Vec<(String, Vec<&Span>)>> = Vec::new();
        for bucket in &self.orchestration_order {
            let mut grouped: Vec<(String, Vec<&Span>)> = Vec::new();
            for span in self.spans_at(&self.orchestrations[bucket]) {
                if span.component_type.is_component() {
                    continue;
                }
                match grouped.iter_mut().find(|(name, _)| *name == span.agent_name) {
                    Some((_, spans)) => spans.push(span),
                    None => grouped.push((span.agent_name.clone(), vec![span])),
                }
            }
            bucket_agents.push(grouped);
        }

        // Level-4 components keyed by (bucket index, agent name)
        let mut components: HashMap<(usize, String), Vec<(String, Vec<&Span>)>> = HashMap::new();
        for (bucket_index, bucket) in self.orchestration_order.iter().enumerate() {
            for span in self.spans_at(&self.orchestrations[bucket]) {
                if !span.component_type.is_component() {
                    continue;
                }
                let Some(parent) = span.parent_agent_id.as_deref() else {
                    continue;
                };
                let Some(owner) = locate_agent(&bucket_agents, bucket_index, parent) else {
                    tracing::debug!(
                        trace_id = %self.trace_id,
                        component = %span.agent_name,
                        parent = %parent,
                        "Component parent is not a known agent; not nesting"
                    );
                    continue;
                };
                let children = components.entry((owner, parent.to_string())).or_default();
                match children.iter_mut().find(|(name, _)| *name == span.agent_name) {
                    Some((_, spans)) => spans.push(span),
                    None => children.push((span.agent_name.clone(), vec![span])),
                }
            }
        }

        let mut orchestration_nodes = Vec::with_capacity(self.orchestration_order.len());
        for (bucket_index, bucket) in self.orchestration_order.iter().enumerate() {
            let orchestration_name = match bucket {
                Some(id) => format!("{}_{}", DEFAULT_ORCHESTRATION, short_id(id)),
                None => DEFAULT_ORCHESTRATION.to_string(),
            };

            let agent_nodes = bucket_agents[bucket_index]
                .iter()
                .map(|(agent_name, spans)| {
                    let component_nodes = components
                        .remove(&(bucket_index, agent_name.clone()))
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(component_name, component_spans)| {
                            let component_type = component_spans
                                .first()
                                .map(|s| s.component_type)
                                .unwrap_or_default();
                            self.build_node(
                                NodeParts {
                                    name: component_name,
                                    level: LEVEL_COMPONENT,
                                    component_type,
                                    parent: Some(agent_name.clone()),
                                    orchestration_id: bucket.clone(),
                                    spans: component_spans,
                                },
                                link,
                                Vec::new(),
                            )
                        })
                        .collect();

                    self.build_node(
                        NodeParts {
                            name: agent_name.clone(),
                            level: LEVEL_AGENT,
                            component_type: ComponentType::Agent,
                            parent: Some(orchestration_name.clone()),
                            orchestration_id: bucket.clone(),
                            spans: spans.clone(),
                        },
                        link,
                        component_nodes,
                    )
                })
                .collect();

            orchestration_nodes.push(self.build_node(
                NodeParts {
                    name: orchestration_name,
                    level: LEVEL_ORCHESTRATION,
                    component_type: ComponentType::AgentOrchestration,
                    parent: Some(root_name.clone()),
                    orchestration_id: bucket.clone(),
                    spans: self.spans_at(&self.orchestrations[bucket]),
                },
                link,
                agent_nodes,
            ));
        }

        self.build_node(
            NodeParts {
                name: root_name,
                level: LEVEL_SESSION,
                component_type: ComponentType::SessionOrchestration,
                parent: None,
                orchestration_id: None,
                spans: self.spans.iter().collect(),
            },
            link,
            orchestration_nodes,
        )
    }

    fn build_node(&self, parts: NodeParts<'_>, link: &SessionLink, children: Vec<AgentEntry>) -> AgentEntry {
        let spans = &parts.spans;
        let start_time = earliest_start(spans);
        let end_time = latest_end(spans);

        let model_info = spans.iter().find_map(|s| {
            s.model_name.as_ref().map(|name| ModelInfo {
                model_name: name.clone(),
                model_provider: s.model_provider.clone(),
                model_parameters: s.model_parameters.clone(),
            })
        });

        let input_tokens = spans.iter().map(|s| s.input_tokens).sum();
        let output_tokens = spans.iter().map(|s| s.output_tokens).sum();

        AgentEntry {
            name: parts.name,
            level: parts.level,
            framework: self.framework,
            component_type: parts.component_type,
            parent_agent_id: parts.parent,
            session_id: link.session_id.clone(),
            chat_session_id: link.chat_session_id.clone(),
            agent_orchestration_id: parts.orchestration_id,
            message_type: spans.iter().find_map(|s| s.message_type.clone()),
            message_sequence: spans.iter().find_map(|s| s.message_sequence),
            start_time,
            end_time,
            duration_ms: duration_ms(start_time, end_time),
            status: aggregate_status(spans),
            input_tokens,
            output_tokens,
            total_tokens: spans.iter().map(|s| s.token_sum()).sum(),
            total_cost: spans.iter().map(|s| s.cost).sum(),
            model_info,
            span_count: spans.len(),
            agents: children,
        }
    }

    fn spans_at(&self, indices: &[usize]) -> Vec<&Span> {
        indices.iter().map(|&i| &self.spans[i]).collect()
    }
}

/// Bucket index owning agent `name`: the component's own bucket first, then
/// the earliest bucket that has it
fn locate_agent(
    bucket_agents: &[Vec<(String, Vec<&Span>)>],
    own_bucket: usize,
    name: &str,
) -> Option<usize> {
    let has = |bucket: &Vec<(String, Vec<&Span>)>| bucket.iter().any(|(n, _)| n == name);
    if has(&bucket_agents[own_bucket]) {
        return Some(own_bucket);
    }
    bucket_agents.iter().position(has)
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn earliest_start(spans: &[&Span]) -> Option<DateTime<Utc>> {
    spans.iter().filter_map(|s| s.start_time).min()
}

fn latest_end(spans: &[&Span]) -> Option<DateTime<Utc>> {
    spans.iter().filter_map(|s| s.end_time).max()
}

fn aggregate_status(spans: &[&Span]) -> SpanStatus {
    if spans.iter().any(|s| s.status == SpanStatus::Failed) {
        SpanStatus::Failed
    } else if spans.iter().any(|s| s.status == SpanStatus::Running) {
        SpanStatus::Running
    } else {
        SpanStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn span(agent: &str, start: i64, end: i64) -> Span {
        Span::new("t1", agent)
            .with_times(at(start), at(end))
            .with_status(SpanStatus::Completed)
    }

    fn processor(spans: Vec<Span>) -> TraceProcessor {
        let mut processor = TraceProcessor::for_span("t1", &spans[0]);
        for span in spans {
            processor.add_span(span);
        }
        processor
    }

    #[test]
    fn test_flat_without_session() {
        let trace = processor(vec![
            span("explainer", 0, 5),
            span("summarizer", 5, 9),
            span("explainer", 10, 12),
        ])
        .process_trace();

        assert_eq!(trace.name, "Agent Workflow");
        assert_eq!(trace.agents.len(), 2);
        assert!(trace.agents.iter().all(|a| a.level == LEVEL_SESSION));
        assert!(trace.agents.iter().all(|a| a.agents.is_empty()));

        let explainer = &trace.agents[0];
        assert_eq!(explainer.name, "explainer");
        assert_eq!(explainer.span_count, 2);
        assert_eq!(explainer.duration_ms, 12_000);
        assert_eq!(trace.metadata.orchestration_count, 0);
        assert_eq!(trace.metadata.agent_count, 2);
    }

    #[test]
    fn test_session_buckets_include_default() {
        let trace = processor(vec![
            span("developer", 0, 4).with_session("s1").with_orchestration("o1"),
            span("summarizer", 4, 6).with_session("s1").with_orchestration("o1"),
            span("explainer", 7, 9).with_session("s1"),
        ])
        .process_trace();

        assert_eq!(trace.name, "LangGraph Session");
        assert_eq!(trace.agents.len(), 1);
        let root = &trace.agents[0];
        assert_eq!(root.level, LEVEL_SESSION);
        assert_eq!(root.name, "chat_session_s1");
        assert_eq!(root.component_type, ComponentType::SessionOrchestration);
        assert_eq!(root.start_time, Some(at(0)));
        assert_eq!(root.end_time, Some(at(9)));

        assert_eq!(root.agents.len(), 2);
        let o1 = root.child("agent_orchestration_o1").unwrap();
        assert_eq!(o1.level, LEVEL_ORCHESTRATION);
        assert_eq!(o1.parent_agent_id.as_deref(), Some("chat_session_s1"));
        assert_eq!(o1.agents.len(), 2);
        assert_eq!(o1.duration_ms, 6_000);

        let default = root.child(DEFAULT_ORCHESTRATION).unwrap();
        assert_eq!(default.agents.len(), 1);
        assert_eq!(default.agents[0].name, "explainer");
        assert_eq!(default.agents[0].level, LEVEL_AGENT);
        assert_eq!(
            default.agents[0].parent_agent_id.as_deref(),
            Some(DEFAULT_ORCHESTRATION)
        );

        assert_eq!(trace.metadata.orchestration_count, 2);
        assert_eq!(trace.metadata.agent_count, 6);
        assert_eq!(trace.metadata.chat_session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_orchestration_typed_spans_become_agents() {
        let trace = processor(vec![
            span("graph", 0, 4)
                .with_session("s1")
                .with_orchestration("o1")
                .with_component_type(ComponentType::AgentOrchestration),
            span("router", 4, 5)
                .with_session("s1")
                .with_orchestration("o1")
                .with_component_type(ComponentType::SessionOrchestration)
                .with_tokens(3, 2),
        ])
        .process_trace();

        let o1 = trace.agents[0].child("agent_orchestration_o1").unwrap();
        let names: Vec<&str> = o1.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["graph", "router"]);
        assert!(o1.agents.iter().all(|a| a.level == LEVEL_AGENT));
        assert_eq!(o1.agents[1].total_tokens, 5);
    }

    #[test]
    fn test_level_four_components_and_agent_token_totals() {
        let trace = processor(vec![
            span("developer", 0, 10)
                .with_session("s1")
                .with_orchestration("o1")
                .with_tokens(100, 20)
                .with_cost(0.5),
            span("gpt-call", 1, 3)
                .with_session("s1")
                .with_orchestration("o1")
                .with_component_type(ComponentType::Llm)
                .with_parent_agent("developer")
                .with_tokens(1000, 500)
                .with_model("gpt-4o", Some("openai".to_string()), None),
            span("search", 3, 4)
                .with_session("s1")
                .with_orchestration("o1")
                .with_component_type(ComponentType::Tool)
                .with_parent_agent("nobody"),
            span("developer", 11, 12)
                .with_session("s1")
                .with_orchestration("o1")
                .with_tokens(7, 3)
                .with_cost(0.25),
        ])
        .process_trace();

        let o1 = &trace.agents[0].agents[0];
        assert_eq!(o1.agents.len(), 1);
        let developer = &o1.agents[0];
        assert_eq!(developer.total_tokens, 130);
        assert_eq!(developer.total_cost, 0.75);
        assert_eq!(developer.span_count, 2);
        assert!(developer.model_info.is_none());

        assert_eq!(developer.agents.len(), 1);
        let llm = &developer.agents[0];
        assert_eq!(llm.level, LEVEL_COMPONENT);
        assert_eq!(llm.component_type, ComponentType::Llm);
        assert_eq!(llm.parent_agent_id.as_deref(), Some("developer"));
        assert_eq!(llm.total_tokens, 1500);
        assert_eq!(
            llm.model_info.as_ref().map(|m| m.model_name.as_str()),
            Some("gpt-4o")
        );

        // the orphaned tool span stays buffered but is not nested
        assert_eq!(trace.metadata.span_count, 4);
        assert!(trace.nodes().iter().all(|n| n.name != "search"));
    }

    #[test]
    fn test_component_parent_in_other_bucket() {
        let trace = processor(vec![
            span("developer", 0, 5).with_session("s1").with_orchestration("o1"),
            span("lookup", 1, 2)
                .with_session("s1")
                .with_component_type(ComponentType::Tool)
                .with_parent_agent("developer"),
        ])
        .process_trace();

        let root = &trace.agents[0];
        let o1 = root.child("agent_orchestration_o1").unwrap();
        assert_eq!(o1.agents[0].agents.len(), 1);
        assert_eq!(o1.agents[0].agents[0].name, "lookup");
        // the default bucket still exists as a sibling, with no agents
        let default = root.child(DEFAULT_ORCHESTRATION).unwrap();
        assert!(default.agents.is_empty());
    }

    #[test]
    fn test_status_aggregation() {
        let trace = processor(vec![
            span("a", 0, 1),
            span("a", 1, 2).with_status(SpanStatus::Failed),
            span("b", 0, 1).with_status(SpanStatus::Running),
        ])
        .process_trace();

        assert_eq!(trace.agents[0].status, SpanStatus::Failed);
        assert_eq!(trace.agents[1].status, SpanStatus::Running);
    }

    #[test]
    fn test_missing_optional_fields() {
        let mut bare = Span::default();
        bare.trace_id = Some("t1".to_string());
        bare.session_id = Some("s-bare".to_string());

        let mut processor = TraceProcessor::new("t1", Framework::Generic);
        processor.add_span(bare);
        let trace = processor.process_trace();

        let root = &trace.agents[0];
        assert_eq!(root.name, "chat_session_s-bare");
        assert_eq!(root.duration_ms, 0);
        assert_eq!(root.start_time, None);
        let agent = &root.agents[0].agents[0];
        assert_eq!(agent.name, "");
        assert_eq!(agent.total_tokens, 0);
    }

    #[test]
    fn test_long_session_id_is_shortened() {
        let trace = processor(vec![
            span("a", 0, 1)
                .with_session("0123456789abcdef")
                .with_orchestration("fedcba9876543210"),
        ])
        .process_trace();
        let root = &trace.agents[0];
        assert_eq!(root.name, "chat_session_01234567");
        assert_eq!(root.agents[0].name, "agent_orchestration_fedcba98");
    }
}
