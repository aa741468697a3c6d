// Location: src/model/loader.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use hf_hub::{api::tokio::Api, Repo, RepoType};
use tracing::{debug, info};

use crate::{
    config::{EngineConfig, ModelSource, TokenizerSource},
    error::{EngineError, Result},
};

use super::{
    qwen::QwenEngine,
    runtime::GenerationEngine,
    tokenizer::{PretrainedTokenizer, TextTokenizer, VocabTokenizer},
};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Produces the two process-wide resources.
///
/// The lifecycle manager calls each method at most once per process and
/// runs them concurrently.
#[async_trait::async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_engine(&self) -> Result<Arc<dyn GenerationEngine>>;

    async fn load_tokenizer(&self) -> Result<Arc<dyn TextTokenizer>>;
}

/// Resolves artifact names to local paths
pub enum FileLocator {
    Local(PathBuf),
    Hub(hf_hub::api::tokio::ApiRepo),
}

impl FileLocator {
    pub fn from_source(source: &ModelSource) -> Result<Self> {
        match source {
            ModelSource::Local { path } => Ok(FileLocator::Local(path.clone())),
            ModelSource::Hub { repo_id, revision } => {
                let api = Api::new()
                    .map_err(|e| EngineError::initialization("Failed to create HuggingFace Hub client", e))?;
                let repo = Repo::with_revision(repo_id.clone(), RepoType::Model, revision.clone());
                Ok(FileLocator::Hub(api.repo(repo)))
            }
        }
    }

    /// Whether the source holds `name`, without downloading it
    pub async fn contains(&self, name: &str) -> Result<bool> {
        match self {
            FileLocator::Local(dir) => tokio::fs::try_exists(dir.join(name))
                .await
                .map_err(|e| EngineError::initialization(format!("Failed to access model file {}", name), e)),
            FileLocator::Hub(repo) => {
                let info = repo
                    .info()
                    .await
                    .map_err(|e| EngineError::initialization("Failed to fetch repository info", e))?;
                Ok(info.siblings.iter().any(|sibling| sibling.rfilename == name))
            }
        }
    }

    /// Local path of `name`, downloading it first when backed by the Hub
    pub async fn get(&self, name: &str) -> Result<PathBuf> {
        match self {
            FileLocator::Local(dir) => {
                if self.contains(name).await? {
                    Ok(dir.join(name))
                } else {
                    Err(EngineError::Initialization {
                        message: format!("Missing model file {}", name),
                        source: None,
                    })
                }
            }
            FileLocator::Hub(repo) => {
                debug!(file = name, "Fetching from HuggingFace Hub");
                repo.get(name)
                    .await
                    .map_err(|e| EngineError::initialization(format!("Failed to fetch {}", name), e))
            }
        }
    }

    /// Safetensors shards: the single weights file, or every file named in the index
    pub async fn weight_files(&self) -> Result<Vec<PathBuf>> {
        if self.contains(SINGLE_WEIGHTS_FILE).await? {
            return Ok(vec![self.get(SINGLE_WEIGHTS_FILE).await?]);
        }
        debug!("No single weights file, reading the shard index");

        let index_path = self.get(WEIGHTS_INDEX_FILE).await?;
        let index = tokio::fs::read(&index_path)
            .await
            .map_err(|e| EngineError::initialization("Failed to read weights index", e))?;
        let shards = shard_names(&index)?;

        let mut paths = Vec::with_capacity(shards.len());
        for shard in shards {
            paths.push(self.get(&shard).await?);
        }
        Ok(paths)
    }
}

/// Unique shard file names from a `model.safetensors.index.json` body
fn shard_names(index: &[u8]) -> Result<Vec<String>> {
    let index: serde_json::Value = serde_json::from_slice(index)
        .map_err(|e| EngineError::initialization("Malformed weights index", e))?;

    let weight_map = index
        .get("weight_map")
        .and_then(|map| map.as_object())
        .ok_or_else(|| EngineError::Initialization {
            message: "Weights index has no weight_map".to_string(),
            source: None,
        })?;

    let shards: BTreeSet<String> = weight_map
        .values()
        .filter_map(|file| file.as_str().map(str::to_string))
        .collect();

    if shards.is_empty() {
        return Err(EngineError::Initialization {
            message: "Weights index lists no shards".to_string(),
            source: None,
        });
    }

    Ok(shards.into_iter().collect())
}

/// Loads the Qwen2 engine and tokenizer described by the engine config
pub struct QwenLoader {
    config: Arc<EngineConfig>,
}

impl QwenLoader {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl ModelLoader for QwenLoader {
    async fn load_engine(&self) -> Result<Arc<dyn GenerationEngine>> {
        let locator = FileLocator::from_source(&self.config.model.source)?;
        let config_path = locator.get(CONFIG_FILE).await?;
        let weight_paths = locator.weight_files().await?;

        let config = self.config.clone();
        let engine = tokio::task::spawn_blocking(move || {
            QwenEngine::load(&config_path, &weight_paths, &config.model, &config.generation)
        })
        .await
        .map_err(|e| EngineError::initialization("Model loading task failed", e))??;

        info!("Model engine loaded");
        Ok(Arc::new(engine))
    }

    async fn load_tokenizer(&self) -> Result<Arc<dyn TextTokenizer>> {
        let tokenizer: Arc<dyn TextTokenizer> = match &self.config.model.tokenizer {
            TokenizerSource::Vocabulary { path } => Arc::new(VocabTokenizer::from_file(path).await?),
            TokenizerSource::Pretrained => {
                let locator = FileLocator::from_source(&self.config.model.source)?;
                let path = locator.get(TOKENIZER_FILE).await?;
                Arc::new(load_pretrained(path).await?)
            }
        };

        info!(vocab_size = tokenizer.vocab_size(), "Tokenizer loaded");
        Ok(tokenizer)
    }
}

async fn load_pretrained(path: impl AsRef<Path>) -> Result<PretrainedTokenizer> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || PretrainedTokenizer::from_file(path))
        .await
        .map_err(|e| EngineError::initialization("Tokenizer loading task failed", e))?
}
