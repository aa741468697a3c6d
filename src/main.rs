use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use qwen_ask::{
    config::{EngineConfig, LogLevel, ModelSource, TokenizerSource},
    model::ChatTemplate,
    server,
    utils::{setup_logging, LogConfig},
    AskEngine, Features, VERSION,
};

/// Serve a Qwen chat model behind a single HTTP route
#[derive(Debug, Parser)]
#[command(name = "qwen-ask", version)]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// HuggingFace Hub repository id
    #[arg(long, conflicts_with = "model_dir")]
    model_repo: Option<String>,

    /// Hub revision, used together with a Hub source
    #[arg(long)]
    revision: Option<String>,

    /// Local directory holding config.json, tokenizer.json and safetensors
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Word-level vocabulary file used instead of tokenizer.json
    #[arg(long)]
    vocab_file: Option<PathBuf>,

    #[arg(long)]
    max_new_tokens: Option<usize>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Log span close events with timing
    #[arg(long)]
    log_spans: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => EngineConfig::default(),
        };

        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = self.model_dir {
            config.model.source = ModelSource::Local { path };
        }
        if let Some(repo) = self.model_repo {
            let revision = match &config.model.source {
                ModelSource::Hub { revision, .. } => revision.clone(),
                ModelSource::Local { .. } => "main".to_string(),
            };
            config.model.source = ModelSource::Hub {
                repo_id: repo,
                revision,
            };
        }
        if let Some(new_revision) = self.revision {
            if let ModelSource::Hub { revision, .. } = &mut config.model.source {
                *revision = new_revision;
            }
        }
        if let Some(path) = self.vocab_file {
            // A word-level vocabulary cannot encode ChatML markers
            config.model.tokenizer = TokenizerSource::Vocabulary { path };
            config.generation.chat_template = ChatTemplate::Plain;
        }
        if let Some(max_new_tokens) = self.max_new_tokens {
            config.generation.max_new_tokens = max_new_tokens;
        }
        if let Some(secs) = self.timeout_secs {
            config.processing.request_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = self.log_level {
            config.monitoring.log_level = level;
        }
        if self.log_spans {
            config.monitoring.log_spans = true;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    setup_logging(LogConfig::from(&config.monitoring)).map_err(anyhow::Error::msg)?;

    let features = Features::detect();
    info!(
        version = VERSION,
        cuda = features.cuda,
        cuda_devices = features.cuda_devices,
        "Starting qwen-ask"
    );

    let engine = Arc::new(AskEngine::builder().with_config(config).build()?);

    // Requests are answered with 503 until the load finishes
    let loading = engine.clone();
    tokio::spawn(async move {
        match loading.initialize().await {
            Ok(()) => info!("Model ready"),
            Err(e) => error!(error = %e.report(), "Model initialization failed"),
        }
    });

    server::serve(engine).await?;
    Ok(())
}
