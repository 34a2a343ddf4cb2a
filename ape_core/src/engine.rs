use std::fmt;
use std::num::{NonZeroI32, NonZeroUsize};
use std::path::Path;
use std::ptr::NonNull;

use crate::format::{CompressionLevel, WaveFormat};
use crate::info::{InfoField, InfoValue};
use crate::tag::{TagFields, ID3V1_TAG_SIZE};

/// Result of a single engine call.
pub type EngineResult<T> = std::result::Result<T, StatusCode>;

/// Non-zero status returned by the engine.
///
/// The numbering is engine-defined. Sessions carry it through to the caller
/// untouched and never branch on its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(NonZeroI32);

impl StatusCode {
    /// Build a status constant. Panics at compile time on zero.
    pub const fn known(raw: i32) -> Self {
        match NonZeroI32::new(raw) {
            Some(code) => Self(code),
            None => panic!("status code 0 means success"),
        }
    }

    /// `None` for zero (success), otherwise the failing status.
    pub fn new(raw: i32) -> Option<Self> {
        NonZeroI32::new(raw).map(Self)
    }

    /// Map a raw engine return value onto an [`EngineResult`].
    pub fn check(raw: i32) -> EngineResult<()> {
        match Self::new(raw) {
            None => Ok(()),
            Some(code) => Err(code),
        }
    }

    pub fn get(self) -> i32 {
        self.0.get()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine status {}", self.0)
    }
}

/// Opaque identifier of one engine instance (decoder or encoder).
///
/// Only meaningful to the engine that issued it. Sessions own exactly one and
/// never hand it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(NonZeroUsize);

impl RawHandle {
    pub fn from_raw(value: usize) -> Option<Self> {
        NonZeroUsize::new(value).map(Self)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// Writable window into engine-owned memory, returned by
/// [`Engine::compress_lock_buffer`].
#[derive(Debug)]
pub struct LockedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl LockedRegion {
    /// Wrap an engine buffer.
    ///
    /// # Safety
    /// `ptr` must be valid for writes of `len` bytes, and the engine must not
    /// read, write, move or free that memory until the matching
    /// [`Engine::compress_unlock_buffer`] call on the same handle returns.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// A zero-capacity lease (engine buffer currently full).
    pub fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// Caller must hold the lock this region came from and must drop the
    /// slice before unlocking.
    pub(crate) unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }
}

/// The codec engine's call interface.
///
/// Every operation is a blocking call that completes before returning. An
/// implementation need not tolerate concurrent calls on one handle (the
/// sessions serialize those) but must keep distinct handles independent.
///
/// Handle lifecycle:
/// - `decompress_create` / `compress_create` issue a handle.
/// - `*_destroy` releases it; it is called exactly once per issued handle.
pub trait Engine: Send + Sync {
    /// Human-readable engine name for CLI display.
    fn name(&self) -> &'static str;

    /// Engine version number (3.99 = 3990).
    fn version(&self) -> i32;

    // ── Decompression ──────────────────────────────────────────────────────

    fn decompress_create(&self, path: &Path) -> EngineResult<RawHandle>;

    fn decompress_destroy(&self, handle: RawHandle);

    /// Answer one information query.
    ///
    /// `param1` is the frame index for frame-indexed fields and is ignored
    /// elsewhere; `param2` is reserved. The returned value must have the
    /// shape `field.shape()` declares.
    fn decompress_info(
        &self,
        handle: RawHandle,
        field: InfoField,
        param1: i64,
        param2: i64,
    ) -> EngineResult<InfoValue>;

    /// Fill `buffer` with up to `blocks` blocks and return how many were
    /// produced. A short count is not a failure. `buffer` holds at least
    /// `blocks × block_align` bytes.
    fn decompress_get_data(
        &self,
        handle: RawHandle,
        buffer: &mut [u8],
        blocks: usize,
    ) -> EngineResult<usize>;

    fn decompress_seek(&self, handle: RawHandle, block_offset: u64) -> EngineResult<()>;

    // ── Compression ────────────────────────────────────────────────────────

    fn compress_create(&self) -> EngineResult<RawHandle>;

    fn compress_destroy(&self, handle: RawHandle);

    /// Open `output` and prepare to encode audio of `format`.
    ///
    /// `max_audio_bytes = None` lets the engine size its seek table for the
    /// largest stream it supports. `header = None` asks the engine to
    /// synthesise the WAV header on decompression.
    fn compress_start(
        &self,
        handle: RawHandle,
        output: &Path,
        format: &WaveFormat,
        max_audio_bytes: Option<u64>,
        level: CompressionLevel,
        header: Option<&[u8]>,
    ) -> EngineResult<()>;

    /// Copy-in submission.
    fn compress_add_data(&self, handle: RawHandle, data: &[u8]) -> EngineResult<()>;

    fn compress_buffer_bytes_available(&self, handle: RawHandle) -> EngineResult<usize>;

    fn compress_lock_buffer(&self, handle: RawHandle) -> EngineResult<LockedRegion>;

    fn compress_unlock_buffer(
        &self,
        handle: RawHandle,
        bytes_added: usize,
        process: bool,
    ) -> EngineResult<()>;

    /// Flush, append `terminating` (the first `wav_terminating_bytes` of which
    /// belong to the decoded WAV), and close the output.
    fn compress_finish(
        &self,
        handle: RawHandle,
        terminating: &[u8],
        wav_terminating_bytes: usize,
    ) -> EngineResult<()>;

    /// Stop encoding and delete the output.
    fn compress_kill(&self, handle: RawHandle) -> EngineResult<()>;

    // ── Tags ───────────────────────────────────────────────────────────────

    fn tag_file_simple(
        &self,
        path: &Path,
        fields: &TagFields,
        clear_first: bool,
        use_old_id3: bool,
    ) -> EngineResult<()>;

    /// Raw ID3v1 block of `path`; all zeros when the file carries no tag.
    fn get_id3_tag(&self, path: &Path) -> EngineResult<[u8; ID3V1_TAG_SIZE]>;

    fn remove_tag(&self, path: &Path) -> EngineResult<()>;
}
