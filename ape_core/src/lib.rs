pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod format;
mod handle;
pub mod info;
pub mod tag;

pub use decoder::{DecodeSession, StreamInfo};
pub use encoder::{BufferLease, EncodeOptions, EncodeSession, EncodeState};
pub use engine::{Engine, EngineResult, LockedRegion, RawHandle, StatusCode};
pub use error::{Error, Result};
pub use format::{CompressionLevel, WaveFormat};
pub use info::{InfoField, InfoShape, InfoValue};
pub use tag::TagFields;
