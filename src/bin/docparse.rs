//! CLI binary for edgequake-docparse.
//!
//! Maps flags onto `ParseConfig` / `ServerConfig`, brings the inference
//! backend up once and serves the HTTP API until Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docparse::pipeline::rasterize::bind_pdfium;
use edgequake_docparse::{
    router, AppState, Backend, BackendOptions, LayoutModel, ParseConfig, RemoteModel, ServerConfig,
};
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on :8000 against a model server on :8001
  docparse --model-url http://127.0.0.1:8001

  # Refuse to start serving parses unless the model runs on a GPU
  docparse --require-gpu

  # Check the backend and exit (non-zero when unavailable)
  docparse --check-backend

  # Parse a scan
  curl -F file=@scan.png http://localhost:8000/parse
  curl -F file=@report.pdf -F detect_tables=false -F max_dim=2048 http://localhost:8000/parse

ENVIRONMENT VARIABLES:
  DOCPARSE_MODEL_URL      Base URL of the model server
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  PDFIUM_AUTO_CACHE_DIR   Where a downloaded libpdfium is cached
  RUST_LOG                Log filter, overrides --verbose
"#;

/// Document parsing service: OCR text and layout regions for images and PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "docparse",
    version,
    about = "Serve OCR and layout parsing of images and PDFs over HTTP",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "DOCPARSE_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to bind.
    #[arg(short, long, env = "DOCPARSE_PORT", default_value_t = 8000)]
    port: u16,

    /// Base URL of the model server.
    #[arg(long, env = "DOCPARSE_MODEL_URL", default_value = "http://127.0.0.1:8001")]
    model_url: String,

    /// The model server handles concurrent inference calls itself.
    #[arg(long, env = "DOCPARSE_MODEL_REENTRANT")]
    model_reentrant: bool,

    /// Longest page side fed to the model, in pixels.
    #[arg(long, env = "DOCPARSE_MAX_DIM", default_value_t = 4000,
          value_parser = clap::value_parser!(u32).range(64..=20_000))]
    max_dim: u32,

    /// DPI for PDF page rendering (72–600).
    #[arg(long, env = "DOCPARSE_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Do not request table regions by default.
    #[arg(long, env = "DOCPARSE_NO_DETECT_TABLES")]
    no_detect_tables: bool,

    /// Per-page inference timeout in seconds.
    #[arg(long, env = "DOCPARSE_PAGE_TIMEOUT", default_value_t = 120)]
    page_timeout: u64,

    /// Pad pages with a white border before inference.
    #[arg(long, env = "DOCPARSE_PAD_EDGES")]
    pad_edges: bool,

    /// Treat a CPU-only model as unavailable.
    #[arg(long, env = "DOCPARSE_REQUIRE_GPU")]
    require_gpu: bool,

    /// Skip the warmup inference at startup.
    #[arg(long, env = "DOCPARSE_NO_WARMUP")]
    no_warmup: bool,

    /// Largest accepted upload in MiB.
    #[arg(long, env = "DOCPARSE_MAX_UPLOAD_MB", default_value_t = 200)]
    max_upload_mb: usize,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Never download pdfium; bind only an installed or cached library.
    #[arg(long, env = "DOCPARSE_NO_PDFIUM_DOWNLOAD")]
    no_pdfium_download: bool,

    /// Initialise the backend, report its state and exit.
    #[arg(long)]
    check_backend: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCPARSE_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let mut builder = ParseConfig::builder()
        .max_dim(cli.max_dim)
        .dpi(cli.dpi)
        .detect_tables(!cli.no_detect_tables)
        .page_timeout_secs(cli.page_timeout)
        .pad_edges(cli.pad_edges);
    if let Some(path) = &cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }
    let parse_config = builder.build().context("Invalid parse configuration")?;

    let server_config = ServerConfig {
        host: cli.host,
        port: cli.port,
        max_upload_bytes: cli.max_upload_mb.saturating_mul(1024 * 1024),
        require_gpu: cli.require_gpu,
        warmup: !cli.no_warmup,
    };

    // ── Inference backend ────────────────────────────────────────────────
    let model = RemoteModel::connect(&cli.model_url, Duration::from_secs(cli.page_timeout))
        .await
        .map(|m| Arc::new(m.with_reentrant(cli.model_reentrant)) as Arc<dyn LayoutModel>);
    let backend = Arc::new(
        Backend::initialize(
            model,
            BackendOptions {
                require_gpu: server_config.require_gpu,
                warmup: server_config.warmup,
            },
        )
        .await,
    );

    // ── PDF engine ───────────────────────────────────────────────────────
    // Without an explicit library, make sure pdfium-auto has one cached
    // (downloaded once, ~30 MB) so request-time binding never hits the network.
    if parse_config.pdfium_lib_path.is_none()
        && !cli.no_pdfium_download
        && !pdfium_auto::is_pdfium_cached()
    {
        tracing::info!("Fetching PDF engine (pdfium {})", pdfium_auto::PDFIUM_VERSION);
        if let Err(e) = tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None)) {
            tracing::warn!("PDF engine download failed: {}", e);
        }
    }

    let lib_path = parse_config.pdfium_lib_path.clone();
    let pdf_engine = tokio::task::spawn_blocking(move || bind_pdfium(lib_path.as_deref()).map(|_| ()))
        .await
        .context("pdfium probe task failed")?;
    if let Err(e) = &pdf_engine {
        tracing::warn!("PDF uploads will fail: {}", e);
    }

    if cli.check_backend {
        return report_backend(&backend, pdf_engine.is_ok());
    }

    // ── Serve ────────────────────────────────────────────────────────────
    let addr = server_config.socket_addr();
    let app = router(AppState::new(Arc::clone(&backend), parse_config, &server_config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("docparse v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    backend.shutdown();
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn report_backend(backend: &Backend, pdf_engine: bool) -> Result<()> {
    match backend.unavailable_reason() {
        None => {
            println!(
                "backend: ready\nmodel:   {}\ndevice:  {}\ngpu:     {}\npdfium:  {}",
                backend.model_name().unwrap_or("unknown"),
                backend
                    .device()
                    .map(|d| format!("{d:?}").to_lowercase())
                    .unwrap_or_default(),
                if backend.gpu_enabled() { "enabled" } else { "disabled" },
                if pdf_engine { "ok" } else { "unavailable" },
            );
            Ok(())
        }
        Some(reason) => {
            println!("backend: unavailable\nreason:  {reason}");
            anyhow::bail!("inference backend unavailable")
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown..."),
    }
}
