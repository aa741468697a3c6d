// Location: src/model/qwen.rs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::qwen2::{Config, ModelForCausalLM};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    config::{GenerationConfig, ModelConfig},
    error::{EngineError, Result},
    types::EngineOutput,
};

use super::runtime::GenerationEngine;

/// Qwen2 causal language model running on candle
pub struct QwenEngine {
    model: Arc<Mutex<ModelForCausalLM>>,
    device: Device,
    sampling: SamplingParams,
    eos_token_ids: Arc<[u32]>,
}

#[derive(Debug, Clone)]
struct SamplingParams {
    seed: u64,
    temperature: Option<f64>,
    top_p: Option<f64>,
    repetition_penalty: f32,
    repeat_last_n: usize,
}

/// Raises the cancellation flag when the request future is dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl QwenEngine {
    /// Build the model from `config.json` and safetensors shards. Blocking.
    pub fn load(
        config_path: &Path,
        weight_paths: &[PathBuf],
        model_config: &ModelConfig,
        generation: &GenerationConfig,
    ) -> Result<Self> {
        let raw = std::fs::read(config_path)
            .map_err(|e| EngineError::initialization("Failed to read model config", e))?;
        let config: Config = serde_json::from_slice(&raw)
            .map_err(|e| EngineError::initialization("Malformed model config", e))?;

        let device = select_device(model_config.use_cuda)?;
        let dtype = if device.is_cuda() { DType::BF16 } else { DType::F32 };
        info!(?dtype, shards = weight_paths.len(), "Loading model weights");

        // Create the variable builder with proper dtype
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(weight_paths, dtype, &device)
                .map_err(|e| EngineError::initialization("Failed to map model weights", e))?
        };

        let model = ModelForCausalLM::new(&config, vb)
            .map_err(|e| EngineError::initialization("Failed to build model", e))?;

        Ok(Self::new(model, device, model_config, generation))
    }

    /// Wrap an already built model
    pub fn new(
        model: ModelForCausalLM,
        device: Device,
        model_config: &ModelConfig,
        generation: &GenerationConfig,
    ) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            device,
            sampling: SamplingParams {
                seed: generation.seed,
                temperature: (generation.temperature > 0.0).then_some(generation.temperature),
                top_p: generation.top_p,
                repetition_penalty: generation.repetition_penalty,
                repeat_last_n: generation.repeat_last_n,
            },
            eos_token_ids: model_config.eos_token_ids.clone().into(),
        }
    }
}

fn select_device(use_cuda: bool) -> Result<Device> {
    if use_cuda {
        Device::cuda_if_available(0)
            .map_err(|e| EngineError::initialization("Failed to open CUDA device", e))
    } else {
        Ok(Device::Cpu)
    }
}

fn run_generation(
    model: &mut ModelForCausalLM,
    device: &Device,
    sampling: &SamplingParams,
    eos_token_ids: &[u32],
    prompt: &[u32],
    max_new_tokens: usize,
    cancelled: &AtomicBool,
) -> candle_core::Result<Vec<u32>> {
    model.clear_kv_cache();

    let mut logits_processor =
        LogitsProcessor::new(sampling.seed, sampling.temperature, sampling.top_p);
    let mut tokens = prompt.to_vec();
    let mut generated = Vec::with_capacity(max_new_tokens);

    for index in 0..max_new_tokens {
        if cancelled.load(Ordering::SeqCst) {
            debug!(generated = generated.len(), "Generation cancelled");
            break;
        }

        let context_size = if index > 0 { 1 } else { tokens.len() };
        let start_pos = tokens.len().saturating_sub(context_size);
        let input = Tensor::new(&tokens[start_pos..], device)?.unsqueeze(0)?;

        let logits = model.forward(&input, start_pos)?;
        let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;
        let logits = if sampling.repetition_penalty == 1.0 {
            logits
        } else {
            let start_at = tokens.len().saturating_sub(sampling.repeat_last_n);
            candle_transformers::utils::apply_repeat_penalty(
                &logits,
                sampling.repetition_penalty,
                &tokens[start_at..],
            )?
        };

        let next_token = logits_processor.sample(&logits)?;
        if eos_token_ids.contains(&next_token) {
            break;
        }
        tokens.push(next_token);
        generated.push(next_token);
    }

    Ok(generated)
}

#[async_trait::async_trait]
impl GenerationEngine for QwenEngine {
    async fn generate(&self, prompt: &[u32], max_new_tokens: usize) -> Result<EngineOutput> {
        let model = Arc::clone(&self.model);
        let device = self.device.clone();
        let sampling = self.sampling.clone();
        let eos_token_ids = Arc::clone(&self.eos_token_ids);
        let prompt = prompt.to_vec();

        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(Arc::clone(&cancelled));

        let generated = tokio::task::spawn_blocking(move || {
            let mut model = model.lock();
            run_generation(
                &mut model,
                &device,
                &sampling,
                &eos_token_ids,
                &prompt,
                max_new_tokens,
                &cancelled,
            )
        })
        .await
        .map_err(|e| EngineError::inference("Generation task aborted", e))?
        .map_err(|e| EngineError::inference("Model forward pass failed", e))?;

        Ok(EngineOutput::Tokens(generated))
    }

    fn name(&self) -> &str {
        "qwen2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOCAB_SIZE: u32 = 32;

    fn tiny_model() -> ModelForCausalLM {
        let config: Config = serde_json::from_str(
            r#"{
                "vocab_size": 32,
                "hidden_size": 16,
                "intermediate_size": 32,
                "num_hidden_layers": 1,
                "num_attention_heads": 2,
                "num_key_value_heads": 1,
                "max_position_embeddings": 64,
                "sliding_window": 64,
                "max_window_layers": 1,
                "tie_word_embeddings": false,
                "rope_theta": 10000.0,
                "rms_norm_eps": 1e-6,
                "use_sliding_window": false,
                "hidden_act": "silu"
            }"#,
        )
        .unwrap();

        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        ModelForCausalLM::new(&config, vb).unwrap()
    }

    fn greedy(repetition_penalty: f32) -> SamplingParams {
        SamplingParams {
            seed: 42,
            temperature: None,
            top_p: None,
            repetition_penalty,
            repeat_last_n: 64,
        }
    }

    #[test]
    fn test_generation_is_bounded() {
        let mut model = tiny_model();
        let cancelled = AtomicBool::new(false);

        for penalty in [1.0, 1.1] {
            let generated =
                run_generation(&mut model, &Device::Cpu, &greedy(penalty), &[], &[1, 2, 3], 5, &cancelled)
                    .unwrap();
            assert_eq!(generated.len(), 5);
            assert!(generated.iter().all(|id| *id < VOCAB_SIZE));
        }
    }

    #[test]
    fn test_generation_stops_at_eos() {
        let mut model = tiny_model();
        let cancelled = AtomicBool::new(false);
        // Every id ends generation, so the first sample stops it
        let eos: Vec<u32> = (0..VOCAB_SIZE).collect();

        let generated =
            run_generation(&mut model, &Device::Cpu, &greedy(1.0), &eos, &[1, 2, 3], 5, &cancelled).unwrap();
        assert!(generated.is_empty());
    }

    #[test]
    fn test_cancelled_generation_is_empty() {
        let mut model = tiny_model();
        let cancelled = AtomicBool::new(true);

        let generated =
            run_generation(&mut model, &Device::Cpu, &greedy(1.0), &[], &[1, 2, 3], 5, &cancelled).unwrap();
        assert!(generated.is_empty());
    }

    #[tokio::test]
    async fn test_engine_generate() -> Result<()> {
        let mut model_config = ModelConfig::default();
        model_config.eos_token_ids = Vec::new();
        let generation = GenerationConfig {
            temperature: 0.0,
            ..Default::default()
        };
        let engine = QwenEngine::new(tiny_model(), Device::Cpu, &model_config, &generation);

        assert_eq!(engine.name(), "qwen2");
        match engine.generate(&[1, 2, 3], 4).await? {
            EngineOutput::Tokens(tokens) => assert_eq!(tokens.len(), 4),
            other => panic!("unexpected output {:?}", other),
        }
        Ok(())
    }
}
