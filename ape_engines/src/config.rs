//! Engine selection settings.
//!
//! Resolved from the environment, then overridden by CLI flags:
//! - `APE_ENGINE`: `reference` (default) or `native`
//! - `APE_LIBRARY_PATH`: explicit path to the native library

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

pub const ENGINE_ENV: &str = "APE_ENGINE";
pub const LIBRARY_PATH_ENV: &str = "APE_LIBRARY_PATH";

/// Which engine implementation sessions talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineKind {
    /// The in-process engine; always available.
    #[default]
    Reference,
    /// The Monkey's Audio library, loaded at runtime.
    Native,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Reference => "reference",
            EngineKind::Native => "native",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" | "ref" => Ok(EngineKind::Reference),
            "native" | "mac" => Ok(EngineKind::Native),
            other => Err(format!(
                "unknown engine '{}': expected 'reference' or 'native'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Native library to load instead of the default `MACDll64`/`MACDll32`.
    pub library_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let kind = match std::env::var(ENGINE_ENV) {
            Ok(value) if !value.trim().is_empty() => value
                .parse::<EngineKind>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {}", ENGINE_ENV))?,
            _ => EngineKind::default(),
        };
        let library_path = std::env::var_os(LIBRARY_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        Ok(Self { kind, library_path })
    }

    /// Apply explicit overrides on top of `self`.
    pub fn with_overrides(mut self, kind: Option<EngineKind>, library: Option<PathBuf>) -> Self {
        if let Some(kind) = kind {
            self.kind = kind;
        }
        if library.is_some() {
            self.library_path = library;
        }
        self
    }
}
