use std::sync::{Arc, OnceLock};
use std::time::Instant;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
    error::{EngineError, Result},
    types::ReadinessState,
};

use super::{
    loader::ModelLoader,
    runtime::ModelRuntime,
    tokenizer::TextTokenizer,
};

/// Resources available once the service is ready
pub struct LoadedResources {
    pub runtime: ModelRuntime,
    pub tokenizer: Arc<dyn TextTokenizer>,
}

type InitOutcome = std::result::Result<Arc<LoadedResources>, String>;

/// Limits handed to the runtime once the engine is loaded
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    pub max_new_tokens: usize,
    pub queue_capacity: usize,
}

/// Owns process-wide initialization of the model and tokenizer.
///
/// The load runs at most once per process. Callers that arrive while it is
/// in flight await the same shared future, and a failure is final: there is
/// no retry path short of a restart.
pub struct LifecycleManager {
    loader: Arc<dyn ModelLoader>,
    limits: RuntimeLimits,
    state: Arc<watch::Sender<ReadinessState>>,
    resources: Arc<OnceLock<Arc<LoadedResources>>>,
    init: Mutex<Option<Shared<BoxFuture<'static, InitOutcome>>>>,
}

impl LifecycleManager {
    pub fn new(loader: Arc<dyn ModelLoader>, limits: RuntimeLimits) -> Self {
        let (state, _) = watch::channel(ReadinessState::Uninitialized);
        Self {
            loader,
            limits,
            state: Arc::new(state),
            resources: Arc::new(OnceLock::new()),
            init: Mutex::new(None),
        }
    }

    /// Load the engine and tokenizer, or join the load already in flight
    pub async fn initialize(&self) -> Result<Arc<LoadedResources>> {
        let load = {
            let mut init = self.init.lock();
            init.get_or_insert_with(|| self.spawn_load()).clone()
        };

        load.await.map_err(|reason| EngineError::Initialization {
            message: reason,
            source: None,
        })
    }

    // Runs on its own task so a dropped caller cannot abandon the load
    fn spawn_load(&self) -> Shared<BoxFuture<'static, InitOutcome>> {
        transition(&self.state, ReadinessState::Loading);

        let loader = Arc::clone(&self.loader);
        let limits = self.limits;
        let state = Arc::clone(&self.state);
        let resources = Arc::clone(&self.resources);

        let task = tokio::spawn(async move {
            let start_time = Instant::now();
            info!("Loading model and tokenizer");

            match tokio::try_join!(loader.load_engine(), loader.load_tokenizer()) {
                Ok((engine, tokenizer)) => {
                    let loaded = Arc::new(LoadedResources {
                        runtime: ModelRuntime::new(engine, limits.max_new_tokens, limits.queue_capacity),
                        tokenizer,
                    });
                    // Resources are published before the state flips to Ready
                    let _ = resources.set(Arc::clone(&loaded));
                    transition(&state, ReadinessState::Ready);
                    info!(elapsed = ?start_time.elapsed(), "Model loaded");
                    Ok(loaded)
                }
                Err(e) => {
                    error!(error = %e.report(), "Model initialization failed");
                    let reason = e.to_string();
                    transition(&state, ReadinessState::Failed { reason: reason.clone() });
                    Err(reason)
                }
            }
        });

        let state = Arc::clone(&self.state);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = format!("Initialization task failed: {}", e);
                    error!("{}", reason);
                    transition(&state, ReadinessState::Failed { reason: reason.clone() });
                    Err(reason)
                }
            }
        }
        .boxed()
        .shared()
    }

    pub fn state(&self) -> ReadinessState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Suspend until the state is `Ready` or `Failed`.
    /// Never returns if `initialize` is never called.
    pub async fn wait_until_ready(&self) -> ReadinessState {
        let mut receiver = self.state.subscribe();
        let result = receiver.wait_for(ReadinessState::is_terminal).await;
        match result {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so the channel cannot close first
            Err(_) => self.state(),
        }
    }

    /// Loaded resources, or `NotReady` carrying the current phase
    pub fn resources(&self) -> Result<Arc<LoadedResources>> {
        let state = self.state();
        if !state.is_ready() {
            return Err(EngineError::NotReady { state });
        }
        self.resources
            .get()
            .cloned()
            .ok_or(EngineError::NotReady { state })
    }

    pub fn tokenizer(&self) -> Result<Arc<dyn TextTokenizer>> {
        self.resources()
            .map(|loaded| Arc::clone(&loaded.tokenizer))
            .map_err(|_| EngineError::TokenizerNotLoaded)
    }
}

fn transition(state: &watch::Sender<ReadinessState>, next: ReadinessState) {
    state.send_if_modified(|current| {
        if current.can_transition_to(&next) {
            *current = next;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::model::{runtime::GenerationEngine, tokenizer::VocabTokenizer};
    use crate::types::EngineOutput;

    pub(crate) struct EchoEngine;

    #[async_trait::async_trait]
    impl GenerationEngine for EchoEngine {
        async fn generate(&self, prompt: &[u32], _max_new_tokens: usize) -> Result<EngineOutput> {
            Ok(EngineOutput::Tokens(prompt.to_vec()))
        }
    }

    /// Counts loads and can be told to delay or fail
    pub(crate) struct CountingLoader {
        pub engine: Arc<dyn GenerationEngine>,
        pub vocab: HashMap<String, u32>,
        pub delay: Duration,
        pub fail_tokenizer: bool,
        pub engine_loads: AtomicUsize,
        pub tokenizer_loads: AtomicUsize,
    }

    impl CountingLoader {
        pub(crate) fn new(engine: Arc<dyn GenerationEngine>, vocab: &[(&str, u32)]) -> Self {
            Self {
                engine,
                vocab: vocab.iter().map(|(t, id)| (t.to_string(), *id)).collect(),
                delay: Duration::from_millis(10),
                fail_tokenizer: false,
                engine_loads: AtomicUsize::new(0),
                tokenizer_loads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ModelLoader for CountingLoader {
        async fn load_engine(&self) -> Result<Arc<dyn GenerationEngine>> {
            self.engine_loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.engine.clone())
        }

        async fn load_tokenizer(&self) -> Result<Arc<dyn TextTokenizer>> {
            self.tokenizer_loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_tokenizer {
                return Err(EngineError::Tokenizer {
                    message: "Malformed vocabulary file".to_string(),
                    source: None,
                });
            }
            Ok(Arc::new(VocabTokenizer::new(self.vocab.clone())))
        }
    }

    pub(crate) const LIMITS: RuntimeLimits = RuntimeLimits {
        max_new_tokens: 512,
        queue_capacity: 64,
    };

    #[tokio::test]
    async fn test_concurrent_initialize_loads_once() -> Result<()> {
        let loader = Arc::new(CountingLoader::new(Arc::new(EchoEngine), &[("hello", 1)]));
        let manager = Arc::new(LifecycleManager::new(loader.clone(), LIMITS));
        assert_eq!(manager.state(), ReadinessState::Uninitialized);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.initialize().await.map(|_| ()) })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            handle.unwrap()?;
        }

        assert_eq!(loader.engine_loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.tokenizer_loads.load(Ordering::SeqCst), 1);
        assert!(manager.is_ready());

        // Later calls reuse the finished load
        manager.initialize().await?;
        assert_eq!(loader.engine_loads.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_loading_state_and_wait() -> Result<()> {
        let loader = Arc::new(CountingLoader::new(Arc::new(EchoEngine), &[("hello", 1)]));
        let manager = Arc::new(LifecycleManager::new(loader, LIMITS));

        let init = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.initialize().await.map(|_| ()) })
        };
        while manager.state() == ReadinessState::Uninitialized {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.state(), ReadinessState::Loading);
        assert!(matches!(
            manager.resources(),
            Err(EngineError::NotReady { state: ReadinessState::Loading })
        ));
        assert!(matches!(manager.tokenizer(), Err(EngineError::TokenizerNotLoaded)));

        assert_eq!(manager.wait_until_ready().await, ReadinessState::Ready);
        init.await.unwrap()?;

        let tokenizer = manager.tokenizer()?;
        assert_eq!(tokenizer.encode("hello")?, vec![1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_initialization_is_final() {
        let mut loader = CountingLoader::new(Arc::new(EchoEngine), &[]);
        loader.fail_tokenizer = true;
        let loader = Arc::new(loader);
        let manager = LifecycleManager::new(loader.clone(), LIMITS);

        assert!(manager.initialize().await.is_err());
        assert!(matches!(manager.state(), ReadinessState::Failed { .. }));
        assert!(matches!(
            manager.wait_until_ready().await,
            ReadinessState::Failed { .. }
        ));

        // No implicit retry
        assert!(manager.initialize().await.is_err());
        assert_eq!(loader.tokenizer_loads.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.resources(),
            Err(EngineError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_restart_load() -> Result<()> {
        let mut loader = CountingLoader::new(Arc::new(EchoEngine), &[("hello", 1)]);
        loader.delay = Duration::from_millis(50);
        let loader = Arc::new(loader);
        let manager = LifecycleManager::new(loader.clone(), LIMITS);

        let abandoned = tokio::time::timeout(Duration::from_millis(5), manager.initialize()).await;
        assert!(abandoned.is_err());

        manager.initialize().await?;
        assert_eq!(loader.engine_loads.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
