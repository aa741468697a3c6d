// Location: src/model/tokenizer.rs

use std::collections::HashMap;
use std::path::Path;
use tokenizers::Tokenizer as HfTokenizer;

use crate::error::{EngineError, Result};
use crate::types::TokenSequence;

/// Marker emitted for ids that have no surface form
pub const UNKNOWN_TOKEN: &str = "[UNK]";

/// Id used for unknown words when the vocabulary has no `[UNK]` entry
pub const DEFAULT_UNKNOWN_ID: u32 = 0;

/// Text <-> token id conversion.
///
/// `decode(encode(x))` is allowed to differ from `x`: words missing from the
/// vocabulary collapse to the unknown token.
pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<TokenSequence>;

    /// Empty input decodes to an empty string
    fn decode(&self, ids: &[u32]) -> Result<String>;

    fn vocab_size(&self) -> usize;
}

/// Word-level tokenizer over a fixed vocabulary.
///
/// Encoding splits on whitespace, decoding joins with a single space.
#[derive(Debug, Clone)]
pub struct VocabTokenizer {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    unk_id: u32,
}

impl VocabTokenizer {
    pub fn new(vocab: HashMap<String, u32>) -> Self {
        let unk_id = vocab.get(UNKNOWN_TOKEN).copied().unwrap_or(DEFAULT_UNKNOWN_ID);
        let id_to_token = vocab.iter().map(|(token, id)| (*id, token.clone())).collect();

        Self {
            token_to_id: vocab,
            id_to_token,
            unk_id,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let vocab: HashMap<String, u32> = serde_json::from_str(json)
            .map_err(|e| EngineError::tokenizer("Malformed vocabulary file", e))?;

        if vocab.is_empty() {
            return Err(EngineError::Tokenizer {
                message: "Vocabulary is empty".to_string(),
                source: None,
            });
        }

        Ok(Self::new(vocab))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| EngineError::tokenizer("Failed to read vocabulary file", e))?;
        Self::from_json_str(&raw)
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }
}

impl TextTokenizer for VocabTokenizer {
    fn encode(&self, text: &str) -> Result<TokenSequence> {
        Ok(text
            .split_whitespace()
            .map(|word| self.token_to_id(word).unwrap_or(self.unk_id))
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Ok(ids
            .iter()
            .map(|id| {
                self.id_to_token
                    .get(id)
                    .map(String::as_str)
                    .unwrap_or(UNKNOWN_TOKEN)
            })
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn vocab_size(&self) -> usize {
        self.token_to_id.len()
    }
}

/// HuggingFace `tokenizer.json` tokenizer
pub struct PretrainedTokenizer {
    tokenizer: HfTokenizer,
    vocab_size: usize,
}

impl PretrainedTokenizer {
    pub fn new(tokenizer: HfTokenizer) -> Self {
        let vocab_size = tokenizer.get_vocab_size(true);
        Self {
            tokenizer,
            vocab_size,
        }
    }

    /// Load `tokenizer.json` from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = HfTokenizer::from_file(path)
            .map_err(|e| EngineError::tokenizer("Failed to load tokenizer", e))?;
        Ok(Self::new(tokenizer))
    }

    fn decode_known(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| EngineError::tokenizer("Decoding failed", e))
    }
}

impl TextTokenizer for PretrainedTokenizer {
    fn encode(&self, text: &str) -> Result<TokenSequence> {
        // The chat template already carries the special tokens
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| EngineError::tokenizer("Tokenization failed", e))?;

        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let mut text = String::new();
        let mut run_start = 0;

        // Decode runs of known ids, emitting the marker for ids outside the vocabulary
        for (index, id) in ids.iter().enumerate() {
            if self.tokenizer.id_to_token(*id).is_none() {
                text.push_str(&self.decode_known(&ids[run_start..index])?);
                text.push_str(UNKNOWN_TOKEN);
                run_start = index + 1;
            }
        }
        text.push_str(&self.decode_known(&ids[run_start..])?);

        Ok(text)
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}
