//! Monkey's Audio library, loaded at runtime.
//!
//! The library ships as `MACDll64` for 64-bit processes and `MACDll32` for
//! 32-bit ones; the name is picked once at load time from the target's
//! pointer width. `APE_LIBRARY_PATH` (or `--library`) points at a specific
//! file instead.
//!
//! All entry points use the `system` calling convention and take ANSI paths.

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;
use std::ptr::{self, NonNull};

use anyhow::Context;
use ape_core::format::WAVEFORMATEX_SIZE;
use ape_core::tag::ID3V1_TAG_SIZE;
use ape_core::{
    CompressionLevel, Engine, EngineResult, InfoField, InfoShape, InfoValue, LockedRegion,
    RawHandle, StatusCode, TagFields, WaveFormat,
};
use libloading::Library;
use log::{debug, info};

use crate::status::{
    ERROR_BAD_PARAMETER, ERROR_INVALID_FUNCTION_PARAMETER, ERROR_INVALID_INPUT_FILE,
    ERROR_UNDEFINED,
};

#[cfg(target_pointer_width = "64")]
pub const LIBRARY_STEM: &str = "MACDll64";
#[cfg(not(target_pointer_width = "64"))]
pub const LIBRARY_STEM: &str = "MACDll32";

/// `max_audio_bytes` value asking the engine to size for the largest stream.
const MAX_AUDIO_BYTES_UNKNOWN: c_int = -1;
/// `header_bytes` value asking the engine to synthesise the WAV header.
const CREATE_WAV_HEADER_ON_DECOMPRESSION: c_int = -1;

type Bool = c_int;
type Handle = *mut c_void;

type GetVersionNumberFn = unsafe extern "system" fn() -> c_int;
type TagFileSimpleFn = unsafe extern "system" fn(
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    Bool,
    Bool,
) -> c_int;
type GetId3TagFn = unsafe extern "system" fn(*const c_char, *mut u8) -> c_int;
type RemoveTagFn = unsafe extern "system" fn(*const c_char) -> c_int;

type DecompressCreateFn = unsafe extern "system" fn(*const c_char, *mut c_int) -> Handle;
type DestroyFn = unsafe extern "system" fn(Handle);
type DecompressGetDataFn = unsafe extern "system" fn(Handle, *mut c_char, c_int, *mut c_int) -> c_int;
type DecompressSeekFn = unsafe extern "system" fn(Handle, c_int) -> c_int;
type DecompressGetInfoFn = unsafe extern "system" fn(Handle, c_int, isize, isize) -> isize;

type CompressCreateFn = unsafe extern "system" fn(*mut c_int) -> Handle;
type CompressStartFn =
    unsafe extern "system" fn(Handle, *const c_char, *const u8, c_int, c_int, *const u8, c_int) -> c_int;
type CompressAddDataFn = unsafe extern "system" fn(Handle, *const u8, c_int) -> c_int;
type CompressBytesAvailableFn = unsafe extern "system" fn(Handle) -> c_int;
type CompressLockBufferFn = unsafe extern "system" fn(Handle, *mut c_int) -> *mut u8;
type CompressUnlockBufferFn = unsafe extern "system" fn(Handle, c_int, Bool) -> c_int;
type CompressFinishFn = unsafe extern "system" fn(Handle, *const u8, c_int, c_int) -> c_int;
type CompressKillFn = unsafe extern "system" fn(Handle) -> c_int;

/// Resolved entry points. The library stays loaded for the engine's lifetime.
pub struct NativeEngine {
    _library: Library,
    get_version_number: GetVersionNumberFn,
    tag_file_simple: TagFileSimpleFn,
    get_id3_tag: GetId3TagFn,
    remove_tag: RemoveTagFn,
    decompress_create: DecompressCreateFn,
    decompress_destroy: DestroyFn,
    decompress_get_data: DecompressGetDataFn,
    decompress_seek: DecompressSeekFn,
    decompress_get_info: DecompressGetInfoFn,
    compress_create: CompressCreateFn,
    compress_destroy: DestroyFn,
    compress_start: CompressStartFn,
    compress_add_data: CompressAddDataFn,
    compress_bytes_available: CompressBytesAvailableFn,
    compress_lock_buffer: CompressLockBufferFn,
    compress_unlock_buffer: CompressUnlockBufferFn,
    compress_finish: CompressFinishFn,
    compress_kill: CompressKillFn,
}

/// Copy a function pointer out of the library.
///
/// # Safety
/// `T` must match the symbol's real signature.
unsafe fn symbol<T: Copy>(lib: &Library, name: &str) -> anyhow::Result<T> {
    let sym: libloading::Symbol<'_, T> =
        unsafe { lib.get(name.as_bytes()) }.with_context(|| format!("symbol {}", name))?;
    Ok(*sym)
}

impl NativeEngine {
    /// Load `path`, or the platform library for this process's bitness.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let target = match path {
            Some(p) => p.as_os_str().to_owned(),
            None => libloading::library_filename(LIBRARY_STEM),
        };
        // SAFETY: loading the codec library runs its initialisers; it is
        // trusted the same way any linked dependency is.
        let lib = unsafe { Library::new(&target) }
            .with_context(|| format!("cannot load {:?}", target))?;

        // SAFETY: signatures follow the library's exported C interface.
        let engine = unsafe {
            Self {
                get_version_number: symbol(&lib, "GetVersionNumber")?,
                tag_file_simple: symbol(&lib, "TagFileSimple")?,
                get_id3_tag: symbol(&lib, "GetID3Tag")?,
                remove_tag: symbol(&lib, "RemoveTag")?,
                decompress_create: symbol(&lib, "c_APEDecompress_Create")?,
                decompress_destroy: symbol(&lib, "c_APEDecompress_Destroy")?,
                decompress_get_data: symbol(&lib, "c_APEDecompress_GetData")?,
                decompress_seek: symbol(&lib, "c_APEDecompress_Seek")?,
                decompress_get_info: symbol(&lib, "c_APEDecompress_GetInfo")?,
                compress_create: symbol(&lib, "c_APECompress_Create")?,
                compress_destroy: symbol(&lib, "c_APECompress_Destroy")?,
                compress_start: symbol(&lib, "c_APECompress_Start")?,
                compress_add_data: symbol(&lib, "c_APECompress_AddData")?,
                compress_bytes_available: symbol(&lib, "c_APECompress_GetBufferBytesAvailable")?,
                compress_lock_buffer: symbol(&lib, "c_APECompress_LockBuffer")?,
                compress_unlock_buffer: symbol(&lib, "c_APECompress_UnlockBuffer")?,
                compress_finish: symbol(&lib, "c_APECompress_Finish")?,
                compress_kill: symbol(&lib, "c_APECompress_Kill")?,
                _library: lib,
            }
        };
        info!(
            "loaded Monkey's Audio {} from {:?}",
            engine.version(),
            target
        );
        Ok(engine)
    }

    fn get_info(&self, handle: RawHandle, id: i32, param1: isize, param2: isize) -> isize {
        // SAFETY: handle was issued by decompress_create and not destroyed.
        unsafe { (self.decompress_get_info)(as_ptr(handle), id, param1, param2) }
    }

    /// Bytes-shaped fields: ask for the size, then hand over a buffer.
    fn info_bytes(
        &self,
        handle: RawHandle,
        size_field: InfoField,
        data_field: InfoField,
    ) -> EngineResult<Vec<u8>> {
        let len = self.get_info(handle, size_field.id(), 0, 0);
        let len = usize::try_from(len).map_err(|_| ERROR_UNDEFINED)?;
        let mut buf = vec![0u8; len];
        if len == 0 {
            return Ok(buf);
        }
        let rc = self.get_info(
            handle,
            data_field.id(),
            buf.as_mut_ptr() as isize,
            len as isize,
        );
        check(rc as c_int)?;
        Ok(buf)
    }
}

fn as_ptr(handle: RawHandle) -> Handle {
    handle.get() as Handle
}

fn from_ptr(ptr: Handle, status: c_int) -> EngineResult<RawHandle> {
    check(status)?;
    RawHandle::from_raw(ptr as usize).ok_or(ERROR_UNDEFINED)
}

fn check(raw: c_int) -> EngineResult<()> {
    StatusCode::check(raw)
}

fn c_path(path: &Path) -> EngineResult<CString> {
    let s = path.to_str().ok_or(ERROR_INVALID_FUNCTION_PARAMETER)?;
    CString::new(s).map_err(|_| ERROR_INVALID_FUNCTION_PARAMETER)
}

fn c_text(text: &str) -> EngineResult<CString> {
    CString::new(text).map_err(|_| ERROR_INVALID_FUNCTION_PARAMETER)
}

fn c_len(len: usize) -> EngineResult<c_int> {
    c_int::try_from(len).map_err(|_| ERROR_BAD_PARAMETER)
}

impl Engine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn version(&self) -> i32 {
        // SAFETY: no arguments, no state.
        unsafe { (self.get_version_number)() }
    }

    fn decompress_create(&self, path: &Path) -> EngineResult<RawHandle> {
        let path = c_path(path)?;
        let mut status: c_int = 0;
        // SAFETY: path is NUL-terminated and outlives the call.
        let ptr = unsafe { (self.decompress_create)(path.as_ptr(), &mut status) };
        if ptr.is_null() && status == 0 {
            return Err(ERROR_INVALID_INPUT_FILE);
        }
        from_ptr(ptr, status)
    }

    fn decompress_destroy(&self, handle: RawHandle) {
        debug!("native decoder destroy {:#x}", handle.get());
        // SAFETY: called once per issued handle.
        unsafe { (self.decompress_destroy)(as_ptr(handle)) }
    }

    fn decompress_info(
        &self,
        handle: RawHandle,
        field: InfoField,
        param1: i64,
        param2: i64,
    ) -> EngineResult<InfoValue> {
        match field {
            InfoField::WavHeaderData => self
                .info_bytes(handle, InfoField::WavHeaderBytes, field)
                .map(InfoValue::Bytes),
            InfoField::WavTerminatingData => self
                .info_bytes(handle, InfoField::WavTerminatingBytes, field)
                .map(InfoValue::Bytes),
            InfoField::WaveFormatEx => {
                let mut wfx = [0u8; WAVEFORMATEX_SIZE];
                let rc = self.get_info(handle, field.id(), wfx.as_mut_ptr() as isize, 0);
                check(rc as c_int)?;
                WaveFormat::from_waveformatex(&wfx)
                    .map(InfoValue::Format)
                    .map_err(|_| ERROR_INVALID_INPUT_FILE)
            }
            // Answers with a pointer to a library object, which has no
            // meaning outside the library.
            InfoField::Tag => {
                debug!("tag object query is not supported by the native engine");
                Err(ERROR_UNDEFINED)
            }
            _ => {
                debug_assert_eq!(field.shape(), InfoShape::Integer);
                let p1 = isize::try_from(param1).map_err(|_| ERROR_BAD_PARAMETER)?;
                let p2 = isize::try_from(param2).map_err(|_| ERROR_BAD_PARAMETER)?;
                Ok(InfoValue::Integer(
                    self.get_info(handle, field.id(), p1, p2) as i64
                ))
            }
        }
    }

    fn decompress_get_data(
        &self,
        handle: RawHandle,
        buffer: &mut [u8],
        blocks: usize,
    ) -> EngineResult<usize> {
        let blocks = c_len(blocks)?;
        let mut retrieved: c_int = 0;
        // SAFETY: buffer holds at least `blocks` blocks (trait contract).
        let rc = unsafe {
            (self.decompress_get_data)(
                as_ptr(handle),
                buffer.as_mut_ptr().cast(),
                blocks,
                &mut retrieved,
            )
        };
        check(rc)?;
        usize::try_from(retrieved).map_err(|_| ERROR_UNDEFINED)
    }

    fn decompress_seek(&self, handle: RawHandle, block_offset: u64) -> EngineResult<()> {
        let offset = c_int::try_from(block_offset).map_err(|_| ERROR_BAD_PARAMETER)?;
        // SAFETY: live handle.
        check(unsafe { (self.decompress_seek)(as_ptr(handle), offset) })
    }

    fn compress_create(&self) -> EngineResult<RawHandle> {
        let mut status: c_int = 0;
        // SAFETY: status is a valid out pointer.
        let ptr = unsafe { (self.compress_create)(&mut status) };
        from_ptr(ptr, status)
    }

    fn compress_destroy(&self, handle: RawHandle) {
        debug!("native encoder destroy {:#x}", handle.get());
        // SAFETY: called once per issued handle.
        unsafe { (self.compress_destroy)(as_ptr(handle)) }
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
        let output = c_path(output)?;
        let wfx = format.to_waveformatex();
        let max_bytes = match max_audio_bytes {
            Some(n) => c_int::try_from(n).map_err(|_| ERROR_BAD_PARAMETER)?,
            None => MAX_AUDIO_BYTES_UNKNOWN,
        };
        let (header_ptr, header_len) = match header {
            Some(h) => (h.as_ptr(), c_len(h.len())?),
            None => (ptr::null(), CREATE_WAV_HEADER_ON_DECOMPRESSION),
        };
        // SAFETY: every pointer is valid for the duration of the call; the
        // library copies what it keeps.
        check(unsafe {
            (self.compress_start)(
                as_ptr(handle),
                output.as_ptr(),
                wfx.as_ptr(),
                max_bytes,
                level.value(),
                header_ptr,
                header_len,
            )
        })
    }

    fn compress_add_data(&self, handle: RawHandle, data: &[u8]) -> EngineResult<()> {
        let len = c_len(data.len())?;
        // SAFETY: data is valid for reads of len bytes.
        check(unsafe { (self.compress_add_data)(as_ptr(handle), data.as_ptr(), len) })
    }

    fn compress_buffer_bytes_available(&self, handle: RawHandle) -> EngineResult<usize> {
        // SAFETY: live handle.
        let n = unsafe { (self.compress_bytes_available)(as_ptr(handle)) };
        usize::try_from(n).map_err(|_| ERROR_UNDEFINED)
    }

    fn compress_lock_buffer(&self, handle: RawHandle) -> EngineResult<LockedRegion> {
        let mut available: c_int = 0;
        // SAFETY: available is a valid out pointer.
        let ptr = unsafe { (self.compress_lock_buffer)(as_ptr(handle), &mut available) };
        let ptr = NonNull::new(ptr).ok_or(ERROR_UNDEFINED)?;
        let len = usize::try_from(available).map_err(|_| ERROR_UNDEFINED)?;
        if len == 0 {
            return Ok(LockedRegion::empty());
        }
        // SAFETY: the library keeps this region writable and untouched until
        // the matching unlock.
        Ok(unsafe { LockedRegion::from_raw_parts(ptr, len) })
    }

    fn compress_unlock_buffer(
        &self,
        handle: RawHandle,
        bytes_added: usize,
        process: bool,
    ) -> EngineResult<()> {
        let added = c_len(bytes_added)?;
        // SAFETY: live handle with an outstanding lock.
        check(unsafe {
            (self.compress_unlock_buffer)(as_ptr(handle), added, Bool::from(process))
        })
    }

    fn compress_finish(
        &self,
        handle: RawHandle,
        terminating: &[u8],
        wav_terminating_bytes: usize,
    ) -> EngineResult<()> {
        let data = if terminating.is_empty() {
            ptr::null()
        } else {
            terminating.as_ptr()
        };
        let len = c_len(terminating.len())?;
        let wav_len = c_len(wav_terminating_bytes)?;
        // SAFETY: terminating is valid for reads of len bytes.
        check(unsafe { (self.compress_finish)(as_ptr(handle), data, len, wav_len) })
    }

    fn compress_kill(&self, handle: RawHandle) -> EngineResult<()> {
        // SAFETY: live handle.
        check(unsafe { (self.compress_kill)(as_ptr(handle)) })
    }

    fn tag_file_simple(
        &self,
        path: &Path,
        fields: &TagFields,
        clear_first: bool,
        use_old_id3: bool,
    ) -> EngineResult<()> {
        let path = c_path(path)?;
        let artist = c_text(&fields.artist)?;
        let album = c_text(&fields.album)?;
        let title = c_text(&fields.title)?;
        let comment = c_text(&fields.comment)?;
        let genre = c_text(&fields.genre)?;
        let year = c_text(&fields.year)?;
        let track = c_text(&fields.track)?;
        // SAFETY: all strings are NUL-terminated and outlive the call.
        check(unsafe {
            (self.tag_file_simple)(
                path.as_ptr(),
                artist.as_ptr(),
                album.as_ptr(),
                title.as_ptr(),
                comment.as_ptr(),
                genre.as_ptr(),
                year.as_ptr(),
                track.as_ptr(),
                Bool::from(clear_first),
                Bool::from(use_old_id3),
            )
        })
    }

    fn get_id3_tag(&self, path: &Path) -> EngineResult<[u8; ID3V1_TAG_SIZE]> {
        let path = c_path(path)?;
        let mut block = [0u8; ID3V1_TAG_SIZE];
        // SAFETY: block is exactly one ID3v1 tag long.
        let rc = unsafe { (self.get_id3_tag)(path.as_ptr(), block.as_mut_ptr()) };
        match check(rc) {
            Ok(()) => Ok(block),
            // Files without a tag report the undefined status.
            Err(code) if code == ERROR_UNDEFINED => Ok([0u8; ID3V1_TAG_SIZE]),
            Err(code) => Err(code),
        }
    }

    fn remove_tag(&self, path: &Path) -> EngineResult<()> {
        let path = c_path(path)?;
        // SAFETY: path is NUL-terminated and outlives the call.
        check(unsafe { (self.remove_tag)(path.as_ptr()) })
    }
}
