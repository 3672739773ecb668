//! Command-line interface for Conduit.
//!
//! # Usage
//!
//! ```bash
//! # Replay newline-delimited JSON events through a subscription
//! conduit replay events.ndjson --field onMessage --select id,text
//!
//! # Read events from stdin, keep nulls out of the output
//! cat events.ndjson | conduit replay - --field onMessage --null-ignore all
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use conduit_runtime::source_stream::channel;
use conduit_runtime::{
    DefaultErrorHandler, ErrorHandlerOptions, ExecutionError, FnSubscribeResolver,
    NullIgnoreCondition, Operation, OperationContextPool, OperationResult, PoolConfig,
    QueryExecutor, RequestContext, ResolverExecutor, ResolverExecutorConfig, ResolverMap,
    Selection, ServiceProvider, SourceStream, SubscriptionExecutor,
};
use serde_json::Value;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum NullIgnore {
    /// Keep every null
    #[default]
    None,
    /// Drop null object fields
    Fields,
    /// Drop null list items
    Lists,
    /// Drop both
    All,
}

impl From<NullIgnore> for NullIgnoreCondition {
    fn from(value: NullIgnore) -> Self {
        match value {
            NullIgnore::None => Self::None,
            NullIgnore::Fields => Self::Fields,
            NullIgnore::Lists => Self::Lists,
            NullIgnore::All => Self::All,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay recorded events through a subscription
    Replay {
        /// Newline-delimited JSON events (`-` reads stdin)
        events: PathBuf,

        /// Root field of the subscription
        #[arg(short, long)]
        field: String,

        /// Comma-separated fields selected from each event
        #[arg(short, long, value_delimiter = ',')]
        select: Vec<String>,

        /// Stop after this many results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Which nulls to leave out of the output
        #[arg(long, value_enum, default_value = "none")]
        null_ignore: NullIgnore,

        /// Show the messages of internal errors
        #[arg(long)]
        include_exception_details: bool,

        /// Operation contexts kept for reuse
        #[arg(long, default_value = "16")]
        pool_size: usize,
    },

    /// Print version information
    Version,
}

/// Options of a replay run.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub field: String,
    pub select: Vec<String>,
    pub limit: Option<usize>,
    pub null_ignore: NullIgnoreCondition,
    pub include_exception_details: bool,
    pub pool: PoolConfig,
}

/// Counts collected while replaying.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub results: usize,
    pub error_results: usize,
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Replay {
            events,
            field,
            select,
            limit,
            null_ignore,
            include_exception_details,
            pool_size,
        } => {
            let options = ReplayOptions {
                field,
                select,
                limit,
                null_ignore: null_ignore.into(),
                include_exception_details,
                pool: PoolConfig {
                    max_retained: pool_size,
                    ..PoolConfig::default()
                },
            };
            replay_file(&events, options, cli.quiet).await
        }
        Commands::Version => {
            println!("conduit {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

async fn replay_file(
    path: &Path,
    options: ReplayOptions,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let source = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };
    let events = parse_events(&source);
    info!(events = events.len(), field = %options.field, "replaying events");

    let mut stdout = std::io::stdout().lock();
    match replay(events, &options, &mut stdout).await {
        Ok(summary) => {
            if !quiet {
                let errors = if summary.error_results > 0 {
                    summary.error_results.to_string().red().bold()
                } else {
                    summary.error_results.to_string().green()
                };
                eprintln!(
                    "{} {} result(s), {} with errors",
                    "Done:".green().bold(),
                    summary.results,
                    errors
                );
            }
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            Ok(1)
        }
    }
}

/// Parses newline-delimited JSON. Lines that are not JSON become source
/// stream errors; blank lines are skipped.
pub fn parse_events(source: &str) -> Vec<Result<Value, ExecutionError>> {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                ExecutionError::SourceStream(format!("line {}: {}", index + 1, e))
            })
        })
        .collect()
}

/// Builds a subscription whose root field reads from `source`.
pub fn build_operation(field: &str, select: &[String], source: Arc<dyn SourceStream>) -> Operation {
    let mut root = Selection::new(field).with_subscribe(FnSubscribeResolver::new(
        move |_, _, _| Ok(Arc::clone(&source)),
    ));
    for name in select.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        root = root.with_selection(Selection::new(name));
    }
    Operation::subscription(format!("replay_{field}"), root).with_name("Replay")
}

/// Runs `events` through a subscription and writes one JSON result per line.
pub async fn replay<W: Write>(
    events: Vec<Result<Value, ExecutionError>>,
    options: &ReplayOptions,
    out: &mut W,
) -> Result<ReplaySummary, Box<dyn std::error::Error>> {
    let query_executor = ResolverExecutor::with_config(
        ResolverMap::new(),
        ResolverExecutorConfig {
            null_ignore_condition: options.null_ignore,
        },
    );
    replay_with(events, options, Arc::new(query_executor), out).await
}

/// Like [`replay`], with a caller-supplied executor for each event.
///
/// Every result is cleaned up once it has been written.
pub async fn replay_with<W: Write>(
    events: Vec<Result<Value, ExecutionError>>,
    options: &ReplayOptions,
    query_executor: Arc<dyn QueryExecutor>,
    out: &mut W,
) -> Result<ReplaySummary, Box<dyn std::error::Error>> {
    let (tx, source) = channel(events.len().max(1));
    for event in events {
        tx.send(event).await?;
    }
    drop(tx);

    let operation = build_operation(&options.field, &options.select, Arc::new(source));
    let executor = SubscriptionExecutor::new(
        OperationContextPool::new(options.pool.clone()),
        query_executor,
    )
    .with_error_handler(Arc::new(DefaultErrorHandler::new(ErrorHandlerOptions {
        include_exception_details: options.include_exception_details,
    })));

    let request = RequestContext::new(operation, ServiceProvider::default());
    let subscription = executor.execute(request).await?;
    let mut results = subscription.execute().enumerator(CancellationToken::new());

    let mut summary = ReplaySummary::default();
    while options.limit.map_or(true, |limit| summary.results < limit) {
        let Some(result) = results.next().await else {
            break;
        };
        summary.results += 1;
        if result.errors().is_some() {
            summary.error_results += 1;
        }
        let written = write_result(out, &result);
        result.cleanup().await;
        written?;
    }

    results.dispose().await;
    subscription.dispose().await;
    debug!(?summary, "replay finished");
    Ok(summary)
}

fn write_result<W: Write>(out: &mut W, result: &OperationResult) -> Result<(), Box<dyn std::error::Error>> {
    serde_json::to_writer(&mut *out, result)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_runtime::{OperationContext, ScopedContextData};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registers a cleanup hook on every result it builds.
    struct CountingExecutor {
        cleaned: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute(
            &self,
            ctx: &mut OperationContext,
            _scoped: ScopedContextData,
        ) -> Result<OperationResult, ExecutionError> {
            let cleaned = Arc::clone(&self.cleaned);
            let mut builder = ctx.take_result();
            builder
                .register_for_cleanup(move || async move {
                    cleaned.fetch_add(1, Ordering::SeqCst);
                })
                .set_data(Some(serde_json::Map::new()));
            Ok(builder.build())
        }
    }

    fn options(field: &str, select: &[&str]) -> ReplayOptions {
        ReplayOptions {
            field: field.to_string(),
            select: select.iter().map(ToString::to_string).collect(),
            limit: None,
            null_ignore: NullIgnoreCondition::None,
            include_exception_details: false,
            pool: PoolConfig::default(),
        }
    }

    fn lines(out: &[u8]) -> Vec<Value> {
        std::str::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_replay_args() {
        let cli = Cli::parse_from([
            "conduit",
            "replay",
            "events.ndjson",
            "--field",
            "onMessage",
            "--select",
            "id,text",
            "--null-ignore",
            "fields",
        ]);
        let Commands::Replay {
            field,
            select,
            null_ignore,
            ..
        } = cli.command
        else {
            panic!("expected replay");
        };
        assert_eq!(field, "onMessage");
        assert_eq!(select, vec!["id", "text"]);
        assert!(matches!(null_ignore, NullIgnore::Fields));
    }

    #[test]
    fn test_parse_events() {
        let events = parse_events("{\"id\": 1}\n\nnot json\n[1, 2]\n");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().unwrap(), &json!({"id": 1}));
        assert!(matches!(&events[1], Err(ExecutionError::SourceStream(msg)) if msg.starts_with("line 3")));
        assert_eq!(events[2].as_ref().unwrap(), &json!([1, 2]));
    }

    #[tokio::test]
    async fn test_replay_writes_results() {
        let events = parse_events("{\"id\": 1, \"text\": \"a\"}\n{\"id\": 2}\n");
        let mut out = Vec::new();

        let summary = replay(events, &options("onMessage", &["id", "text"]), &mut out)
            .await
            .unwrap();

        assert_eq!(summary, ReplaySummary { results: 2, error_results: 0 });
        assert_eq!(
            lines(&out),
            vec![
                json!({"data": {"onMessage": {"id": 1, "text": "a"}}}),
                json!({"data": {"onMessage": {"id": 2, "text": null}}}),
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_stops_at_bad_line() {
        let events = parse_events("{\"id\": 1}\n{oops\n{\"id\": 3}\n");
        let mut out = Vec::new();

        let summary = replay(events, &options("onMessage", &["id"]), &mut out)
            .await
            .unwrap();

        assert_eq!(summary, ReplaySummary { results: 2, error_results: 1 });
        let written = lines(&out);
        assert_eq!(written[1]["errors"][0]["message"], json!("Unexpected Execution Error"));
    }

    #[tokio::test]
    async fn test_replay_limit_and_null_ignore() {
        let events = parse_events("{\"id\": 1}\n{\"id\": 2}\n{\"id\": 3}\n");
        let mut opts = options("onMessage", &["id", "text"]);
        opts.limit = Some(2);
        opts.null_ignore = NullIgnoreCondition::Fields;
        let mut out = Vec::new();

        let summary = replay(events, &opts, &mut out).await.unwrap();

        assert_eq!(summary.results, 2);
        assert_eq!(lines(&out)[0], json!({"data": {"onMessage": {"id": 1}}}));
    }

    #[tokio::test]
    async fn test_replay_cleans_up_each_result() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(CountingExecutor {
            cleaned: Arc::clone(&cleaned),
        });
        let events = parse_events("{\"id\": 1}\n{\"id\": 2}\n{\"id\": 3}\n");
        let mut out = Vec::new();

        let summary = replay_with(events, &options("onMessage", &["id"]), executor, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.results, 3);
        assert_eq!(cleaned.load(Ordering::SeqCst), 3);
        assert_eq!(lines(&out)[0], json!({"data": {}}));
    }
}
