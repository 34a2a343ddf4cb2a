//! In-process engine that speaks the full call interface.
//!
//! Audio is kept in a simple framed container (see [`format`]) rather than
//! the Monkey's Audio bitstream. Frames are compressed with general-purpose
//! codecs, so the engine is lossless but makes no claim to the native ratio.

mod codec;
mod decoder;
mod encoder;
pub mod format;
mod tags;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ape_core::tag::ID3V1_TAG_SIZE;
use ape_core::{
    CompressionLevel, Engine, EngineResult, InfoField, InfoValue, LockedRegion, RawHandle,
    TagFields, WaveFormat,
};
use log::debug;
use parking_lot::Mutex;

use crate::status::ERROR_BAD_PARAMETER;
use decoder::DecoderState;
use encoder::EncoderState;

type Table<T> = Mutex<HashMap<usize, Arc<Mutex<T>>>>;

pub struct ReferenceEngine {
    next_handle: AtomicUsize,
    frame_blocks: Option<u32>,
    decoders: Table<DecoderState>,
    encoders: Table<EncoderState>,
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicUsize::new(1),
            frame_blocks: None,
            decoders: Mutex::new(HashMap::new()),
            encoders: Mutex::new(HashMap::new()),
        }
    }

    /// Override the per-level frame size. Small frames make multi-frame
    /// streams cheap to produce in tests.
    pub fn with_frame_blocks(blocks: u32) -> Self {
        Self {
            frame_blocks: Some(blocks),
            ..Self::new()
        }
    }

    /// Handles issued and not yet destroyed.
    pub fn live_handles(&self) -> usize {
        self.decoders.lock().len() + self.encoders.lock().len()
    }

    fn issue(&self) -> EngineResult<RawHandle> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        RawHandle::from_raw(id).ok_or(ERROR_BAD_PARAMETER)
    }

    // Clone the entry out so the table lock is not held across the call.
    fn decoder(&self, handle: RawHandle) -> EngineResult<Arc<Mutex<DecoderState>>> {
        self.decoders
            .lock()
            .get(&handle.get())
            .cloned()
            .ok_or(ERROR_BAD_PARAMETER)
    }

    fn encoder(&self, handle: RawHandle) -> EngineResult<Arc<Mutex<EncoderState>>> {
        self.encoders
            .lock()
            .get(&handle.get())
            .cloned()
            .ok_or(ERROR_BAD_PARAMETER)
    }
}

impl Engine for ReferenceEngine {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn version(&self) -> i32 {
        format::FILE_VERSION as i32
    }

    fn decompress_create(&self, path: &Path) -> EngineResult<RawHandle> {
        let state = DecoderState::open(path)?;
        let handle = self.issue()?;
        self.decoders
            .lock()
            .insert(handle.get(), Arc::new(Mutex::new(state)));
        Ok(handle)
    }

    fn decompress_destroy(&self, handle: RawHandle) {
        if self.decoders.lock().remove(&handle.get()).is_none() {
            debug!("destroy of unknown decoder handle {}", handle.get());
        }
    }

    fn decompress_info(
        &self,
        handle: RawHandle,
        field: InfoField,
        param1: i64,
        param2: i64,
    ) -> EngineResult<InfoValue> {
        self.decoder(handle)?.lock().info(field, param1, param2)
    }

    fn decompress_get_data(
        &self,
        handle: RawHandle,
        buffer: &mut [u8],
        blocks: usize,
    ) -> EngineResult<usize> {
        self.decoder(handle)?.lock().get_data(buffer, blocks)
    }

    fn decompress_seek(&self, handle: RawHandle, block_offset: u64) -> EngineResult<()> {
        self.decoder(handle)?.lock().seek(block_offset)
    }

    fn compress_create(&self) -> EngineResult<RawHandle> {
        let handle = self.issue()?;
        self.encoders
            .lock()
            .insert(handle.get(), Arc::new(Mutex::new(EncoderState::default())));
        Ok(handle)
    }

    fn compress_destroy(&self, handle: RawHandle) {
        if self.encoders.lock().remove(&handle.get()).is_none() {
            debug!("destroy of unknown encoder handle {}", handle.get());
        }
    }

    fn compress_start(
        &self,
        handle: RawHandle,
        output: &Path,
        format: &WaveFormat,
        max_audio_bytes: Option<u64>,
        level: CompressionLevel,
        header: Option<&[u8]>,
    ) -> EngineResult<()> {
        self.encoder(handle)?.lock().start(
            output,
            format,
            max_audio_bytes,
            level,
            header,
            self.frame_blocks,
        )
    }

    fn compress_add_data(&self, handle: RawHandle, data: &[u8]) -> EngineResult<()> {
        self.encoder(handle)?.lock().add_data(data)
    }

    fn compress_buffer_bytes_available(&self, handle: RawHandle) -> EngineResult<usize> {
        self.encoder(handle)?.lock().bytes_available()
    }

    fn compress_lock_buffer(&self, handle: RawHandle) -> EngineResult<LockedRegion> {
        self.encoder(handle)?.lock().lock()
    }

    fn compress_unlock_buffer(
        &self,
        handle: RawHandle,
        bytes_added: usize,
        process: bool,
    ) -> EngineResult<()> {
        self.encoder(handle)?.lock().unlock(bytes_added, process)
    }

    fn compress_finish(
        &self,
        handle: RawHandle,
        terminating: &[u8],
        wav_terminating_bytes: usize,
    ) -> EngineResult<()> {
        self.encoder(handle)?
            .lock()
            .finish(terminating, wav_terminating_bytes)
    }

    fn compress_kill(&self, handle: RawHandle) -> EngineResult<()> {
        self.encoder(handle)?.lock().kill()
    }

    fn tag_file_simple(
        &self,
        path: &Path,
        fields: &TagFields,
        clear_first: bool,
        use_old_id3: bool,
    ) -> EngineResult<()> {
        tags::tag_file_simple(path, fields, clear_first, use_old_id3)
    }

    fn get_id3_tag(&self, path: &Path) -> EngineResult<[u8; ID3V1_TAG_SIZE]> {
        tags::get_id3_tag(path)
    }

    fn remove_tag(&self, path: &Path) -> EngineResult<()> {
        tags::remove_tag(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{
        ERROR_INPUT_FILE_UNSUPPORTED_CHANNEL_COUNT, ERROR_INVALID_INPUT_FILE, ERROR_UNDEFINED,
    };

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ape_ref_{}_{}.ape", std::process::id(), name))
    }

    #[test]
    fn unknown_handles_are_bad_parameters() {
        let engine = ReferenceEngine::new();
        let stray = RawHandle::from_raw(999).unwrap();
        assert_eq!(engine.decompress_seek(stray, 0), Err(ERROR_BAD_PARAMETER));
        assert_eq!(engine.compress_add_data(stray, &[0; 4]), Err(ERROR_BAD_PARAMETER));
        // destroying a handle nobody issued is ignored
        engine.decompress_destroy(stray);
        engine.compress_destroy(stray);
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn idle_encoder_handle() {
        let engine = ReferenceEngine::new();
        let h = engine.compress_create().unwrap();
        assert_eq!(engine.live_handles(), 1);
        assert_eq!(engine.compress_lock_buffer(h).err(), Some(ERROR_BAD_PARAMETER));
        assert_eq!(engine.compress_kill(h), Ok(()));
        engine.compress_destroy(h);
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn second_lock_is_refused_until_unlock() {
        let engine = ReferenceEngine::with_frame_blocks(16);
        let path = temp_path("double_lock");
        let h = engine.compress_create().unwrap();
        engine
            .compress_start(
                h,
                &path,
                &WaveFormat::new(44100, 16, 2),
                None,
                CompressionLevel::Normal,
                None,
            )
            .unwrap();
        let region = engine.compress_lock_buffer(h).unwrap();
        assert_eq!(region.len(), 16 * 4 * 2);
        assert_eq!(engine.compress_lock_buffer(h).err(), Some(ERROR_BAD_PARAMETER));
        assert_eq!(engine.compress_add_data(h, &[0; 4]), Err(ERROR_BAD_PARAMETER));
        engine.compress_unlock_buffer(h, 0, false).unwrap();
        assert_eq!(engine.compress_buffer_bytes_available(h), Ok(16 * 4 * 2));
        engine.compress_kill(h).unwrap();
        engine.compress_destroy(h);
        assert!(!path.exists());
    }

    #[test]
    fn oversized_channel_count_is_refused_at_start() {
        let engine = ReferenceEngine::new();
        let path = temp_path("too_many_channels");
        let h = engine.compress_create().unwrap();
        // 16384 channels of 32-bit audio would not fit the u16 block alignment
        let result = engine.compress_start(
            h,
            &path,
            &WaveFormat::new(44100, 32, 16_384),
            None,
            CompressionLevel::Normal,
            None,
        );
        assert_eq!(result, Err(ERROR_INPUT_FILE_UNSUPPORTED_CHANNEL_COUNT));
        assert!(!path.exists());
        engine.compress_destroy(h);
    }

    #[test]
    fn tag_calls_on_missing_file() {
        let engine = ReferenceEngine::new();
        let path = temp_path("no_such_file");
        let fields = TagFields::default();
        assert_eq!(
            engine.tag_file_simple(&path, &fields, true, false),
            Err(ERROR_UNDEFINED)
        );
        assert_eq!(
            engine.tag_file_simple(&path, &fields, true, true),
            Err(ERROR_INVALID_INPUT_FILE)
        );
        assert_eq!(engine.get_id3_tag(&path), Err(ERROR_INVALID_INPUT_FILE));
    }
}
