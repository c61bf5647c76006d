//! Chat session example
//!
//! Runs a two-turn conversation through a session trace handler and prints
//! the reconstructed hierarchy. Batches go to an in-memory sink, so no
//! backend is needed.

use lariat_core::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,lariat_core=debug")),
        )
        .init();

    let sink = Arc::new(MemorySink::new());
    let lariat = Lariat::builder().sink(sink.clone()).build()?;

    let chat = lariat
        .start_chat(SessionOptions::new().name("support").timeout_minutes(15))
        .await;

    chat.user_message("My deploy fails with exit code 137", None).await;
    chat.agent_started("run-1", "developer", serde_json::json!({"question": "exit 137"}))
        .await;
    chat.record_span(
        Span::new(chat.trace_id(), "planner-llm")
            .with_component_type(ComponentType::Llm)
            .with_parent_agent("developer")
            .with_model("gpt-4o-mini", Some("openai".to_string()), None)
            .with_tokens(512, 128)
            .with_cost(0.0004)
            .complete(),
    )
    .await;
    chat.agent_finished(
        "run-1",
        serde_json::json!({"answer": "The container ran out of memory"}),
        640,
        96,
        0.0011,
    )
    .await;

    chat.user_message("How much memory should I request?", None).await;
    chat.agent_started("run-2", "explainer", serde_json::json!({})).await;
    chat.agent_finished("run-2", serde_json::json!({"answer": "Start with 1Gi"}), 300, 40, 0.0005)
        .await;

    if let Some(trace) = chat.end_session(SessionStatus::Ended).await {
        println!("{}", TraceExporter::to_summary(&trace));
    }

    let report = lariat.shutdown().await;
    println!(
        "\nDelivered {} batch(es), drained {} open trace(s) at shutdown",
        sink.batch_count().await,
        report.drained
    );

    Ok(())
}
