//! Framework detection
//!
//! A trace's framework is chosen once, from its first span, by an ordered
//! rule chain. The first rule that matches wins; an unknown framework is not
//! an error, it falls back to [`Framework::Generic`].

use serde::{Deserialize, Serialize};

use super::span::Span;

/// The closed set of processor variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// Graph/swarm workflows, usually session-oriented
    LangGraph,
    /// Chain-style pipelines
    LangChain,
    /// Fallback for everything else
    Generic,
}

/// Which rule of the chain selected a framework
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionRule {
    AgentPrefix,
    ExplicitField,
    SessionPresent,
    Default,
}

impl Framework {
    /// Variants that can be named explicitly, in detection priority order
    pub const KNOWN: [Framework; 2] = [Framework::LangGraph, Framework::LangChain];

    /// Identifier used in span fields and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::LangGraph => "langgraph",
            Framework::LangChain => "langchain",
            Framework::Generic => "generic",
        }
    }

    /// Human-readable name used in trace titles
    pub fn display_name(&self) -> &'static str {
        match self {
            Framework::LangGraph => "LangGraph",
            Framework::LangChain => "LangChain",
            Framework::Generic => "Agent",
        }
    }

    /// Prefix an `agent_name` carries when produced by this framework
    pub fn agent_prefix(&self) -> Option<&'static str> {
        match self {
            Framework::LangGraph => Some("langgraph:"),
            Framework::LangChain => Some("langchain:"),
            Framework::Generic => None,
        }
    }

    /// Parse an explicit identifier
    pub fn from_identifier(raw: &str) -> Option<Framework> {
        let raw = raw.trim();
        Framework::KNOWN
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(raw))
    }

    /// Run the detection chain on a span
    pub fn detect(span: &Span) -> Framework {
        Self::detect_with_rule(span).0
    }

    /// Run the detection chain, reporting which rule matched
    pub fn detect_with_rule(span: &Span) -> (Framework, DetectionRule) {
        // (a) framework-specific agent name prefix
        for framework in Framework::KNOWN {
            if let Some(prefix) = framework.agent_prefix()
                && span.agent_name.starts_with(prefix)
            {
                return (framework, DetectionRule::AgentPrefix);
            }
        }

        // (b) explicit framework field, then metadata entry
        let explicit = span.framework.as_deref().or_else(|| {
            span.metadata
                .get("framework")
                .and_then(|value| value.as_str())
        });
        if let Some(framework) = explicit.and_then(Framework::from_identifier) {
            return (framework, DetectionRule::ExplicitField);
        }

        // (c) a chat session implies the session-oriented variant
        if span
            .chat_session_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
        {
            return (Framework::LangGraph, DetectionRule::SessionPresent);
        }

        (Framework::Generic, DetectionRule::Default)
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
