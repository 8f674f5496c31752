use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use corpus_search_core::{
    provider_from_settings, sanitize_query_bytes, BuildPhase, CompositeExtractor, EndpointOcr,
    MetadataStore, NoOcr, OcrEngine, QueryRequest, SearchCoordinator, SearchError, Settings,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "corpus-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (TOML). Defaults are used when it does not exist.
    #[arg(long, env = "CORPUS_SEARCH_CONFIG", default_value = "corpus-search.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Index a document folder, rebuilding only when it changed.
    Index {
        /// Folder whose top-level documents are indexed.
        #[arg(long, env = "CORPUS_SEARCH_FOLDER")]
        folder: PathBuf,
    },
    /// Bring the index up to date, then run a query against it.
    Search {
        #[arg(long, env = "CORPUS_SEARCH_FOLDER")]
        folder: PathBuf,
        /// Query text.
        #[arg(long, required_unless_present = "stdin")]
        query: Option<String>,
        /// Read the query from standard input instead.
        #[arg(long, default_value_t = false, conflicts_with = "query")]
        stdin: bool,
        /// Results per page; the configured top_k when omitted.
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Case-insensitive substring the file name must contain.
        #[arg(long)]
        file_filter: Option<String>,
        /// Drop hits scoring below this value.
        #[arg(long)]
        score_threshold: Option<f32>,
    },
    /// Show chunk count and artifact integrity.
    Status,
    /// Exit non-zero unless the artifact matches its manifest.
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(Some(&cli.config))
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        config_found = cli.config.exists(),
        started_at = %Utc::now().to_rfc3339(),
        "corpus-search boot"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            on_interrupt.cancel();
        }
    });

    // Extraction, embedding and the blocking HTTP clients all stay off the
    // async workers.
    tokio::task::spawn_blocking(move || run(cli.command, settings, cancel)).await?
}

fn build_coordinator(settings: &Settings) -> anyhow::Result<SearchCoordinator> {
    settings.storage.ensure_dirs()?;
    let store = Arc::new(MetadataStore::open(&settings.storage.db_path)?);
    let embedder = provider_from_settings(&settings.embedding)?;
    let ocr: Arc<dyn OcrEngine> = match EndpointOcr::from_settings(&settings.ocr)? {
        Some(engine) => Arc::new(engine),
        None => Arc::new(NoOcr),
    };

    let progress = |phase: BuildPhase, done: usize, total: usize| {
        debug!(?phase, done, total, "build progress");
    };

    Ok(SearchCoordinator::new(
        settings,
        store,
        embedder,
        Arc::new(CompositeExtractor::new(ocr)),
    )
    .with_progress(Arc::new(progress)))
}

fn run(command: Command, settings: Settings, cancel: CancellationToken) -> anyhow::Result<()> {
    let coordinator = build_coordinator(&settings)?;

    match command {
        Command::Index { folder } => {
            let summary = coordinator.ensure_index_with(&folder, &cancel)?;
            println!(
                "{} chunks indexed ({})",
                summary.chunks_indexed,
                if summary.rebuilt { "rebuilt" } else { "up to date" }
            );
            for skipped in &summary.skipped {
                println!("skipped {}: {}", skipped.path.display(), skipped.reason);
            }
        }
        Command::Search {
            folder,
            query,
            stdin,
            top_k,
            offset,
            file_filter,
            score_threshold,
        } => {
            let text = match (query, stdin) {
                (Some(query), false) => query,
                _ => {
                    let mut raw = Vec::new();
                    std::io::stdin().read_to_end(&mut raw)?;
                    sanitize_query_bytes(&raw, settings.search.max_query_length)
                        .map_err(SearchError::InvalidQuery)?
                }
            };

            coordinator.ensure_index_with(&folder, &cancel)?;

            let request = QueryRequest {
                text,
                top_k: top_k.unwrap_or(settings.search.top_k),
                offset,
                file_filter,
                score_threshold,
            };
            let page = coordinator.query(&request)?;

            println!(
                "{} of {} hits (offset {}, limit {})",
                page.hits.len(),
                page.total,
                page.offset,
                page.limit
            );
            for (rank, hit) in page.hits.iter().enumerate() {
                println!(
                    "[{}] {} unit={} score={:.4}",
                    page.offset + rank + 1,
                    hit.file,
                    hit.unit_id,
                    hit.score
                );
                println!("  {}", hit.text);
            }
        }
        Command::Status => {
            if let Err(error) = coordinator.load_persisted() {
                warn!(%error, "persisted index not loadable");
            }
            let status = coordinator.status()?;

            println!("chunks: {}", status.chunks);
            println!("artifact: {}", settings.storage.index_path.display());
            println!("artifact_present: {}", status.artifact_present);
            println!("verified: {}", status.verified);
            if let Some(kind) = status.kind {
                println!("index_kind: {kind}");
            }
            if let Some(manifest) = status.manifest {
                println!("created_at: {}", manifest.created_at);
                println!("index_hash: {}", manifest.index_hash);
            }
        }
        Command::Verify => {
            if !coordinator.verify() {
                bail!(
                    "{} does not match {}",
                    settings.storage.index_path.display(),
                    settings.storage.manifest_path.display()
                );
            }
            println!("ok");
        }
    }

    Ok(())
}
