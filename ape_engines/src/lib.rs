pub mod config;
#[cfg(feature = "native")]
pub mod native;
pub mod reference;
pub mod status;

pub use config::{EngineConfig, EngineKind};
#[cfg(feature = "native")]
pub use native::NativeEngine;
pub use reference::ReferenceEngine;

use ape_core::Engine;
use std::sync::{Arc, OnceLock};

static DEFAULT_ENGINE: OnceLock<Arc<dyn Engine>> = OnceLock::new();

/// Build the engine `config` asks for.
///
/// Called once per process by the CLI; sessions then share the returned
/// engine, so the native library is loaded a single time.
pub fn select_engine(config: &EngineConfig) -> anyhow::Result<Arc<dyn Engine>> {
    match config.kind {
        EngineKind::Reference => Ok(Arc::new(ReferenceEngine::new())),
        #[cfg(feature = "native")]
        EngineKind::Native => Ok(Arc::new(NativeEngine::load(config.library_path.as_deref())?)),
        #[cfg(not(feature = "native"))]
        EngineKind::Native => anyhow::bail!(
            "native engine requested but this build lacks the `native` feature; \
             rebuild with --features native or use --engine reference"
        ),
    }
}

/// Process-wide engine chosen from the environment (`APE_ENGINE`,
/// `APE_LIBRARY_PATH`). Resolved on first use.
pub fn default_engine() -> anyhow::Result<Arc<dyn Engine>> {
    if let Some(engine) = DEFAULT_ENGINE.get() {
        return Ok(Arc::clone(engine));
    }
    let engine = select_engine(&EngineConfig::from_env()?)?;
    Ok(Arc::clone(DEFAULT_ENGINE.get_or_init(|| engine)))
}
