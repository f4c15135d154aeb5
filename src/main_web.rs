// Streaming chat server for Gemma, Mistral and Qwen dialects
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use llama_stream_config::{ConfigOverrides, ModelSize, ServerConfig};
use llama_stream_engine::mock::canned_engine;
use llama_stream_engine::{dialect_for, SessionRegistry};
use llama_stream_types::DialectKind;
use llama_stream_web::{serve, shutdown, AppState};

mod logging;

const MOCK_REPLY: &str = "Hello! This reply comes from the built-in mock engine.";

#[derive(Debug, Parser)]
#[command(name = "llama_stream_web", version, about = "Stream chat model replies over HTTP as NDJSON")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "LLAMA_STREAM_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// gemma, mistral or qwen
    #[arg(long)]
    dialect: Option<DialectKind>,

    /// Generated token ceiling per request
    #[arg(long)]
    max_tokens: Option<usize>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// off, error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    model_path: Option<PathBuf>,

    /// small, medium or large
    #[arg(long)]
    model_size: Option<ModelSize>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            dialect: self.dialect,
            max_tokens: self.max_tokens,
            log_dir: self.log_dir.clone(),
            log_level: self.log_level.clone(),
            model_path: self.model_path.clone(),
            model_size: self.model_size,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref(), &args.overrides()).context("Failed to load configuration")?;

    if let Err(e) = logging::setup_logging(&config.log_dir, &config.log_level) {
        eprintln!("Failed to set up logging: {e}");
    }

    let dialect = dialect_for(config.dialect);
    let params = config.model.params();
    info!(
        "Dialect: {}, model profile: {:?} (context {}, batch {}, threads {}, gpu layers {})",
        config.dialect,
        config.model.effective_size(),
        params.context_size,
        params.batch_size,
        params.threads,
        params.gpu_layers
    );
    if let Some(path) = &config.model.path {
        warn!("No inference backend is linked into this build, ignoring model {}", path.display());
    }
    warn!("Serving replies from the mock engine");

    let engine = canned_engine(dialect, MOCK_REPLY)?;
    let registry = Arc::new(SessionRegistry::new(dialect, engine).with_max_tokens(config.max_tokens));
    let state = Arc::new(AppState::new(registry, &config));

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.bind_addr()))?;
    serve(addr, state, shutdown::wait_for_signal()).await?;

    info!("Server stopped");
    Ok(())
}
