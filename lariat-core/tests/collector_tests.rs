//! Collector scenarios through the public API

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use lariat_core::dispatch::MemorySink;
use lariat_core::trace::{
    ComponentType, DEFAULT_ORCHESTRATION, Framework, LEVEL_AGENT, LEVEL_ORCHESTRATION,
    LEVEL_SESSION, Span, SpanStatus, UnifiedTraceCollector,
};

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
}

fn span(trace_id: &str, agent: &str, start: i64, end: i64) -> Span {
    Span::new(trace_id, agent)
        .with_times(at(start), at(end))
        .with_status(SpanStatus::Completed)
}

fn collector() -> (Arc<UnifiedTraceCollector>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Arc::new(UnifiedTraceCollector::new(sink.clone())), sink)
}

#[tokio::test]
async fn test_flat_workflow_without_session() {
    let (collector, sink) = collector();
    collector.process_span(span("t1", "explainer", 0, 3)).await;
    collector.process_span(span("t1", "summarizer", 3, 5)).await;

    let trace = collector.finalize_trace("t1").await.unwrap();
    assert_eq!(trace.agents.len(), 2);
    assert!(trace.agents.iter().all(|node| node.level == LEVEL_SESSION));
    assert!(trace.agents.iter().all(|node| node.agents.is_empty()));
    assert_eq!(trace.agents[0].name, "explainer");
    assert_eq!(trace.agents[1].name, "summarizer");

    let batches = sink.batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].agents.len(), 2);
    assert_eq!(batches[0].traces[0].duration_ms, 5_000);
}

#[tokio::test]
async fn test_session_with_mixed_orchestrations() {
    let (collector, _) = collector();
    collector
        .process_span(span("t1", "developer", 0, 4).with_session("s1").with_orchestration("o1"))
        .await;
    collector
        .process_span(span("t1", "summarizer", 4, 6).with_session("s1").with_orchestration("o1"))
        .await;
    collector
        .process_span(span("t1", "explainer", 6, 8).with_session("s1"))
        .await;

    let trace = collector.finalize_trace("t1").await.unwrap();
    assert_eq!(trace.metadata.framework, Framework::LangGraph);
    assert_eq!(trace.agents.len(), 1);

    let root = &trace.agents[0];
    assert_eq!(root.level, LEVEL_SESSION);
    assert_eq!(root.agents.len(), 2);
    assert!(root.agents.iter().all(|n| n.level == LEVEL_ORCHESTRATION));

    let o1 = root.child("agent_orchestration_o1").unwrap();
    let names: Vec<&str> = o1.agents.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["developer", "summarizer"]);

    let default = root.child(DEFAULT_ORCHESTRATION).unwrap();
    assert_eq!(default.agents.len(), 1);
    assert_eq!(default.agents[0].name, "explainer");
}

#[tokio::test]
async fn test_level_three_tokens_exclude_components() {
    let (collector, _) = collector();
    collector
        .process_span(
            span("t1", "developer", 0, 10)
                .with_session("s1")
                .with_tokens(300, 200)
                .with_cost(0.02),
        )
        .await;
    collector
        .process_span(
            span("t1", "planner-llm", 1, 2)
                .with_session("s1")
                .with_component_type(ComponentType::Llm)
                .with_parent_agent("developer")
                .with_tokens(4_000, 1_000)
                .with_cost(0.5),
        )
        .await;
    collector
        .process_span(span("t1", "developer", 11, 12).with_session("s1").with_tokens(7, 0))
        .await;

    let trace = collector.finalize_trace("t1").await.unwrap();
    let agents = trace.nodes_at_level(LEVEL_AGENT);
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].total_tokens, 507);
    assert_eq!(agents[0].total_cost, 0.02);
    assert_eq!(agents[0].agents.len(), 1);
    assert_eq!(agents[0].agents[0].total_tokens, 5_000);
}

#[tokio::test]
async fn test_finalize_unknown_trace_is_noop() {
    let (collector, sink) = collector();
    assert!(collector.finalize_trace("missing").await.is_none());
    assert_eq!(sink.batch_count().await, 0);
}

#[tokio::test]
async fn test_span_without_trace_id_creates_nothing() {
    let (collector, _) = collector();
    let mut orphan = span("ignored", "explainer", 0, 1);
    orphan.trace_id = None;
    collector.process_span(orphan).await;
    assert!(collector.open_traces().await.is_empty());
}

#[tokio::test]
async fn test_late_span_starts_new_trace() {
    let (collector, sink) = collector();
    collector.process_span(span("t1", "explainer", 0, 1)).await;
    collector.finalize_trace("t1").await.unwrap();

    collector.process_span(span("t1", "summarizer", 2, 3)).await;
    assert_eq!(collector.span_count("t1").await, Some(1));

    let second = collector.finalize_trace("t1").await.unwrap();
    assert_eq!(second.agents.len(), 1);
    assert_eq!(second.agents[0].name, "summarizer");
    assert_eq!(sink.batch_count().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_lose_nothing() {
    let (collector, _) = collector();
    let mut handles = Vec::new();

    for worker in 0..8 {
        let collector = collector.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let agent = format!("agent-{}", worker);
                collector
                    .process_span(span("shared", &agent, i, i + 1).with_session("s1"))
                    .await;
                collector
                    .process_span(span(&format!("own-{}", worker), &agent, i, i + 1))
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(collector.open_traces().await.len(), 9);
    assert_eq!(collector.span_count("shared").await, Some(400));

    let trace = collector.finalize_trace("shared").await.unwrap();
    assert_eq!(trace.metadata.span_count, 400);
    assert_eq!(trace.nodes_at_level(LEVEL_AGENT).len(), 8);
    assert!(
        trace
            .nodes_at_level(LEVEL_AGENT)
            .iter()
            .all(|agent| agent.span_count == 50)
    );
}

#[tokio::test]
async fn test_shutdown_drains_and_rejects_late_spans() {
    let (collector, sink) = collector();
    for id in ["a", "b", "c"] {
        collector.process_span(span(id, "worker", 0, 1)).await;
    }

    assert_eq!(collector.shutdown().await, 3);
    assert_eq!(sink.batch_count().await, 3);
    assert!(collector.open_traces().await.is_empty());

    collector.process_span(span("d", "worker", 0, 1)).await;
    assert!(collector.open_traces().await.is_empty());
    assert_eq!(collector.shutdown().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_shutdown_racing_writers_leaves_nothing_open() {
    for round in 0..50 {
        let (collector, sink) = collector();
        let mut handles = Vec::new();
        for worker in 0..16 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..4 {
                    let trace_id = format!("r{}-w{}-{}", round, worker, i);
                    collector.process_span(span(&trace_id, "worker", 0, 1)).await;
                    tokio::task::yield_now().await;
                }
            }));
        }

        tokio::task::yield_now().await;
        let drained = collector.shutdown().await;
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(collector.open_traces().await.is_empty());
        assert_eq!(sink.batch_count().await, drained);
    }
}
