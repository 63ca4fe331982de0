use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use dtm_explorer::algo::categories::DocumentCategoryIndex;
use dtm_explorer::algo::sparse::MatrixPayload;
use dtm_explorer::algo::words::TopicWordsPayload;
use dtm_explorer::{EngineConfig, EngineError, Request, Response, WorkerClient};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "dtm-explorer",
    version,
    about = "Query engine for sparse document-topic matrices"
)]
struct Cli {
    /// JSON config file (proper_tolerance, insertion_ratio, queue_capacity)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Override the row-sum tolerance for "proper" matrices
    #[arg(long, global = true)]
    proper_tolerance: Option<f64>,

    /// Override the n/k ratio at which top-k switches to bounded insertion
    #[arg(long, global = true)]
    insertion_ratio: Option<usize>,

    /// Override the worker queue capacity
    #[arg(long, global = true)]
    queue_capacity: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DataArgs {
    /// Document-topic matrix in CSC form: {"i": [...], "p": [...], "x": [...]}
    #[arg(long)]
    dt: PathBuf,
    /// Per-document category keys, as VARIABLE=PATH (repeatable)
    #[arg(long = "categories", value_parser = parse_categories)]
    categories: Vec<(String, PathBuf)>,
    /// Topic-word weights: {"alpha": [...], "tw": [{"words": [...], "weights": [...]}]}
    #[arg(long)]
    tw: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the data, then answer newline-delimited JSON requests from stdin
    Serve {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Load the data and answer a single JSON request
    Query {
        #[command(flatten)]
        data: DataArgs,
        /// Request object, e.g. '{"kind": "topic_docs", "topic": 3, "n": 20}'
        request: String,
    },
}

fn parse_categories(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((variable, path)) if !variable.is_empty() && !path.is_empty() => {
            Ok((variable.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected VARIABLE=PATH, got '{s}'")),
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dtm-explorer: {e}");
            std::process::exit(2);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("dtm-explorer: failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = rt.block_on(async move {
        let outcome = match cli.command {
            Commands::Serve { data } => cmd_serve(config, &data).await,
            Commands::Query { data, request } => cmd_query(config, &data, &request).await,
        };
        match outcome {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "dtm-explorer failed");
                1
            }
        }
    });
    std::process::exit(code);
}

fn build_config(cli: &Cli) -> Result<EngineConfig, EngineError> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(tol) = cli.proper_tolerance {
        config.proper_tolerance = tol;
    }
    if let Some(ratio) = cli.insertion_ratio {
        config.insertion_ratio = ratio;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.queue_capacity = capacity;
    }
    config.validate()?;
    Ok(config)
}

// ── Loading ──────────────────────────────────────────────────────────────────

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Push every data file through the worker. Returns the first rejected load,
/// if any.
async fn load_data(client: &WorkerClient, data: &DataArgs) -> Result<Option<Response>, EngineError> {
    let mut loads = vec![Request::LoadMatrix {
        dt: read_json::<MatrixPayload>(&data.dt)?,
    }];
    for (variable, path) in &data.categories {
        loads.push(Request::LoadCategories {
            variable: variable.clone(),
            keys: read_json::<DocumentCategoryIndex>(path)?,
        });
    }
    if let Some(path) = &data.tw {
        loads.push(Request::LoadTopicWords {
            tw: read_json::<TopicWordsPayload>(path)?,
        });
    }

    for request in loads {
        let response = client.request(request).await?;
        if !response.is_ok() {
            tracing::error!(key = %response.key, result = %response.result, "load rejected");
            return Ok(Some(response));
        }
    }
    Ok(None)
}

async fn write_line(out: &mut tokio::io::Stdout, response: &Response) -> Result<(), EngineError> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────────────────

async fn cmd_query(config: EngineConfig, data: &DataArgs, request: &str) -> Result<i32, EngineError> {
    let mut stdout = tokio::io::stdout();
    let request = match Request::from_line(request) {
        Ok(request) => request,
        Err(rejected) => {
            write_line(&mut stdout, &rejected).await?;
            return Ok(1);
        }
    };
    let client = WorkerClient::spawn(config)?;

    if let Some(rejected) = load_data(&client, data).await? {
        write_line(&mut stdout, &rejected).await?;
        return Ok(1);
    }
    let response = client.request(request).await?;
    write_line(&mut stdout, &response).await?;
    Ok(if response.is_ok() { 0 } else { 1 })
}

async fn cmd_serve(config: EngineConfig, data: &DataArgs) -> Result<i32, EngineError> {
    let client = WorkerClient::spawn(config)?;
    if let Some(rejected) = load_data(&client, data).await? {
        write_line(&mut tokio::io::stdout(), &rejected).await?;
        return Ok(1);
    }
    tracing::info!("dtm-explorer ready");

    // Responses are written as they complete, not in request order.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = out_rx.recv().await {
            write_line(&mut stdout, &response).await?;
        }
        Ok::<(), EngineError>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request = match Request::from_line(line) {
            Ok(request) => request,
            Err(rejected) => {
                tracing::warn!(key = %rejected.key, result = %rejected.result, "unparsable request line");
                let _ = out_tx.send(rejected);
                continue;
            }
        };
        let ticket = client.submit(request).await?;
        let out = out_tx.clone();
        tokio::spawn(async move {
            match ticket.wait().await {
                Ok(response) => {
                    let _ = out.send(response);
                }
                Err(e) => tracing::error!(error = %e, "request abandoned"),
            }
        });
    }

    drop(out_tx);
    writer
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;
    tracing::info!("stdin closed, shutting down");
    Ok(0)
}
