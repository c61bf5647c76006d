//! Lariat CLI - offline replay and configuration tools

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lariat_core::config::LariatConfig;
use lariat_core::dispatch::{HttpSink, MemorySink, TraceSink};
use lariat_core::trace::{Span, TraceExporter, TraceFormat, UnifiedTraceCollector};

#[derive(Parser)]
#[command(name = "lariat")]
#[command(about = "Lariat trace collector CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to lariat.toml and LARIAT_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON Lines span file through the collector
    Replay {
        /// File with one span per line
        file: PathBuf,
        /// Output format for each reconstructed trace
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Summary)]
        format: OutputFormat,
        /// Deliver the batches to the configured backend
        #[arg(long)]
        send: bool,
    },
    /// Print the effective configuration
    Config,
    /// Version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
    Pretty,
}

impl From<OutputFormat> for TraceFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Summary => TraceFormat::Summary,
            OutputFormat::Json => TraceFormat::Json,
            OutputFormat::Pretty => TraceFormat::JsonPretty,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("lariat {}", env!("CARGO_PKG_VERSION"));
            println!("lariat-core {}", lariat_core::VERSION);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        Commands::Replay { file, format, send } => {
            let config = load_config(cli.config.as_deref())?;
            replay(&config, &file, format.into(), send).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<LariatConfig> {
    let config = match path {
        Some(path) => LariatConfig::from_file(path),
        None => LariatConfig::load(),
    };
    config.context("Failed to load configuration")
}

async fn replay(config: &LariatConfig, file: &Path, format: TraceFormat, send: bool) -> Result<()> {
    let reader = std::io::BufReader::new(
        std::fs::File::open(file).with_context(|| format!("Cannot open {}", file.display()))?,
    );
    let (spans, skipped) = parse_spans(reader)?;
    if skipped > 0 {
        tracing::warn!(skipped, "Skipped unparseable lines");
    }

    let sink: Arc<dyn TraceSink> = if send {
        Arc::new(HttpSink::new(config)?)
    } else {
        Arc::new(MemorySink::new())
    };
    let collector = UnifiedTraceCollector::new(sink.clone())
        .with_environment(config.environment.clone())
        .with_tags(config.tags.clone());

    let trace_ids = trace_order(&spans);
    for span in spans {
        collector.process_span(span).await;
    }

    for trace_id in &trace_ids {
        if let Some(trace) = collector.finalize_trace(trace_id).await {
            println!("{}", TraceExporter::export(&trace, format)?);
            println!();
        }
    }

    sink.close().await?;
    tracing::info!(traces = trace_ids.len(), sent = send, "Replay complete");
    Ok(())
}

/// Parse JSON Lines into spans, skipping blank lines and counting bad ones
fn parse_spans(reader: impl BufRead) -> Result<(Vec<Span>, usize)> {
    let mut spans = Vec::new();
    let mut skipped = 0;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Span>(&line) {
            Ok(span) => spans.push(span),
            Err(e) => {
                skipped += 1;
                tracing::debug!(line = number + 1, error = %e, "Unparseable span line");
            }
        }
    }
    Ok((spans, skipped))
}

/// Distinct trace ids in first-seen order
fn trace_order(spans: &[Span]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for id in spans.iter().filter_map(|s| s.trace_id()) {
        if !order.iter().any(|seen| seen == id) {
            order.push(id.to_string());
        }
    }
    order
}
