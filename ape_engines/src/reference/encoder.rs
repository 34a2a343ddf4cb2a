use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use ape_core::format::MAX_CHANNELS;
use ape_core::{CompressionLevel, LockedRegion, StatusCode, WaveFormat};
use log::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::codec::{codec_for_level, compress_frame, FrameCodec};
use super::format::{
    blocks_per_frame, FileHeader, FrameEntry, FILE_VERSION, FLAG_HAS_CHECKSUM,
    FLAG_WAV_HEADER_STORED, HEADER_SIZE,
};
use crate::status::{
    ERROR_APE_COMPRESS_TOO_MUCH_DATA, ERROR_BAD_PARAMETER, ERROR_INPUT_FILE_UNSUPPORTED_BIT_DEPTH,
    ERROR_INPUT_FILE_UNSUPPORTED_CHANNEL_COUNT, ERROR_INVALID_FUNCTION_PARAMETER,
    ERROR_INVALID_OUTPUT_FILE, ERROR_IO_WRITE,
};

/// Live state behind one encoder handle.
///
/// A handle starts idle and becomes an [`Encoding`] at `start`. `finish` and
/// `kill` return it to idle.
#[derive(Default)]
pub(crate) struct EncoderState {
    encoding: Option<Encoding>,
}

impl EncoderState {
    pub(crate) fn start(
        &mut self,
        output: &Path,
        format: &WaveFormat,
        max_audio_bytes: Option<u64>,
        level: CompressionLevel,
        header: Option<&[u8]>,
        frame_blocks: Option<u32>,
    ) -> Result<(), StatusCode> {
        if self.encoding.is_some() {
            return Err(ERROR_BAD_PARAMETER);
        }
        self.encoding = Some(Encoding::start(
            output,
            format,
            max_audio_bytes,
            level,
            header,
            frame_blocks,
        )?);
        Ok(())
    }

    fn active(&mut self) -> Result<&mut Encoding, StatusCode> {
        self.encoding.as_mut().ok_or(ERROR_BAD_PARAMETER)
    }

    pub(crate) fn add_data(&mut self, data: &[u8]) -> Result<(), StatusCode> {
        self.active()?.add_data(data)
    }

    pub(crate) fn bytes_available(&mut self) -> Result<usize, StatusCode> {
        Ok(self.active()?.space())
    }

    pub(crate) fn lock(&mut self) -> Result<LockedRegion, StatusCode> {
        self.active()?.lock()
    }

    pub(crate) fn unlock(&mut self, bytes_added: usize, process: bool) -> Result<(), StatusCode> {
        self.active()?.unlock(bytes_added, process)
    }

    pub(crate) fn finish(
        &mut self,
        terminating: &[u8],
        wav_terminating_bytes: usize,
    ) -> Result<(), StatusCode> {
        let result = self.active()?.finish(terminating, wav_terminating_bytes);
        if result.is_ok() {
            self.encoding = None;
        }
        result
    }

    /// Drop the output. Idle handles have nothing to kill.
    pub(crate) fn kill(&mut self) -> Result<(), StatusCode> {
        match self.encoding.take() {
            Some(encoding) => encoding.kill(),
            None => Ok(()),
        }
    }
}

/// Streaming writer for one output file.
///
/// # Buffer contract
/// PCM is gathered in a fixed buffer of two frames. `add_data` copies in and
/// compresses every completed frame. A lock hands out the free tail of the
/// buffer; while locked the buffer is never moved or read. `unlock` with
/// `process` compresses completed frames, without it data just accumulates.
pub(crate) struct Encoding {
    file: File,
    path: PathBuf,
    format: WaveFormat,
    level: CompressionLevel,
    codec: Box<dyn FrameCodec>,
    block_align: usize,
    blocks_per_frame: u32,
    max_audio_bytes: Option<u64>,
    wav_header_bytes: u32,
    flags: u32,
    buffer: Vec<u8>,
    filled: usize,
    locked: bool,
    audio_bytes: u64,
    entries: Vec<FrameEntry>,
    /// Current write position in the file (mirrors the file cursor).
    current_offset: u64,
}

impl Encoding {
    fn start(
        output: &Path,
        format: &WaveFormat,
        max_audio_bytes: Option<u64>,
        level: CompressionLevel,
        header: Option<&[u8]>,
        frame_blocks: Option<u32>,
    ) -> Result<Self, StatusCode> {
        if format.validate().is_err() {
            if format.channels == 0 || format.channels > MAX_CHANNELS {
                return Err(ERROR_INPUT_FILE_UNSUPPORTED_CHANNEL_COUNT);
            }
            return Err(ERROR_INPUT_FILE_UNSUPPORTED_BIT_DEPTH);
        }
        // The header stores block alignment as u16
        let block_align = u16::try_from(format.block_align())
            .map_err(|_| ERROR_INVALID_FUNCTION_PARAMETER)? as usize;
        let blocks_per_frame = frame_blocks.unwrap_or_else(|| blocks_per_frame(level));
        if blocks_per_frame == 0 {
            return Err(ERROR_INVALID_FUNCTION_PARAMETER);
        }
        let header = header.unwrap_or_default();
        let wav_header_bytes =
            u32::try_from(header.len()).map_err(|_| ERROR_INVALID_FUNCTION_PARAMETER)?;

        let mut file = File::create(output).map_err(|e| {
            warn!("cannot create {:?}: {}", output, e);
            ERROR_INVALID_OUTPUT_FILE
        })?;
        // Placeholder header, overwritten in finish()
        file.write_all(&[0u8; HEADER_SIZE as usize])
            .map_err(io_write)?;
        file.write_all(header).map_err(io_write)?;

        let mut flags = FLAG_HAS_CHECKSUM;
        if !header.is_empty() {
            flags |= FLAG_WAV_HEADER_STORED;
        }
        let frame_bytes = blocks_per_frame as usize * block_align;

        Ok(Self {
            file,
            path: output.to_path_buf(),
            format: *format,
            level,
            codec: codec_for_level(level),
            block_align,
            blocks_per_frame,
            max_audio_bytes,
            wav_header_bytes,
            flags,
            buffer: vec![0u8; frame_bytes * 2],
            filled: 0,
            locked: false,
            audio_bytes: 0,
            entries: Vec::new(),
            current_offset: HEADER_SIZE + wav_header_bytes as u64,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.blocks_per_frame as usize * self.block_align
    }

    fn space(&self) -> usize {
        self.buffer.len() - self.filled
    }

    fn admit(&mut self, bytes: usize) -> Result<(), StatusCode> {
        let total = self.audio_bytes + bytes as u64;
        if self.max_audio_bytes.is_some_and(|max| total > max) {
            return Err(ERROR_APE_COMPRESS_TOO_MUCH_DATA);
        }
        self.audio_bytes = total;
        Ok(())
    }

    fn add_data(&mut self, mut data: &[u8]) -> Result<(), StatusCode> {
        if self.locked {
            return Err(ERROR_BAD_PARAMETER);
        }
        self.admit(data.len())?;
        while !data.is_empty() {
            let n = self.space().min(data.len());
            self.buffer[self.filled..self.filled + n].copy_from_slice(&data[..n]);
            self.filled += n;
            data = &data[n..];
            self.process()?;
        }
        Ok(())
    }

    fn lock(&mut self) -> Result<LockedRegion, StatusCode> {
        if self.locked {
            return Err(ERROR_BAD_PARAMETER);
        }
        self.locked = true;
        let space = self.space();
        if space == 0 {
            return Ok(LockedRegion::empty());
        }
        let tail = &mut self.buffer[self.filled..];
        let ptr = NonNull::new(tail.as_mut_ptr()).ok_or(ERROR_BAD_PARAMETER)?;
        // SAFETY: `buffer` is never resized, and while `locked` is set no
        // method reads or writes `buffer[filled..]`.
        Ok(unsafe { LockedRegion::from_raw_parts(ptr, space) })
    }

    fn unlock(&mut self, bytes_added: usize, process: bool) -> Result<(), StatusCode> {
        if !self.locked {
            return Err(ERROR_BAD_PARAMETER);
        }
        self.locked = false;
        if bytes_added > self.space() {
            return Err(ERROR_BAD_PARAMETER);
        }
        self.admit(bytes_added)?;
        self.filled += bytes_added;
        if process {
            self.process()?;
        }
        Ok(())
    }

    /// Compress every completed frame at the front of the buffer.
    fn process(&mut self) -> Result<(), StatusCode> {
        let frame_bytes = self.frame_bytes();
        let mut start = 0;
        while self.filled - start >= frame_bytes {
            let frame = self.buffer[start..start + frame_bytes].to_vec();
            self.write_frame(&frame)?;
            start += frame_bytes;
        }
        if start > 0 {
            self.buffer.copy_within(start..self.filled, 0);
            self.filled -= start;
        }
        Ok(())
    }

    fn write_frame(&mut self, raw: &[u8]) -> Result<(), StatusCode> {
        let (codec, payload) = compress_frame(self.codec.as_ref(), raw).map_err(|e| {
            warn!("{:?}: frame compression failed: {}", self.path, e);
            ERROR_IO_WRITE
        })?;
        self.file.write_all(&payload).map_err(io_write)?;

        let compressed_len = payload.len() as u32;
        self.entries.push(FrameEntry {
            offset: self.current_offset,
            compressed_len,
            blocks: (raw.len() / self.block_align) as u32,
            checksum: xxh3_64(&payload),
            codec,
        });
        self.current_offset += compressed_len as u64;
        Ok(())
    }

    /// Flush buffered audio, append terminating data, the frame index and the
    /// footer, then seal the file by writing the final header.
    fn finish(&mut self, terminating: &[u8], wav_terminating_bytes: usize) -> Result<(), StatusCode> {
        if self.locked || wav_terminating_bytes > terminating.len() {
            return Err(ERROR_BAD_PARAMETER);
        }
        let terminating_bytes =
            u32::try_from(terminating.len()).map_err(|_| ERROR_INVALID_FUNCTION_PARAMETER)?;

        self.process()?;
        let whole = self.filled - self.filled % self.block_align;
        if whole != self.filled {
            warn!(
                "{:?}: dropping {} bytes of incomplete trailing block",
                self.path,
                self.filled - whole
            );
        }
        if whole > 0 {
            let tail = self.buffer[..whole].to_vec();
            self.write_frame(&tail)?;
        }
        self.filled = 0;

        self.file.write_all(terminating).map_err(io_write)?;
        self.current_offset += terminating.len() as u64;

        // ── Frame index ────────────────────────────────────────────────────
        let index_offset = self.current_offset;
        for entry in &self.entries {
            self.file.write_all(&entry.to_bytes()).map_err(io_write)?;
        }

        // ── Footer: 8-byte u64 LE offset of frame index start ──────────────
        self.file
            .write_all(&index_offset.to_le_bytes())
            .map_err(io_write)?;

        // ── Seek back to 0 and write the real header ────────────────────────
        let total_blocks: u64 = self.entries.iter().map(|e| e.blocks as u64).sum();
        let header = FileHeader {
            version: FILE_VERSION,
            compression_level: self.level.value() as u16,
            format: self.format,
            block_align: self.block_align as u16,
            blocks_per_frame: self.blocks_per_frame,
            frame_count: self.entries.len() as u32,
            total_blocks,
            wav_header_bytes: self.wav_header_bytes,
            terminating_bytes,
            wav_terminating_bytes: wav_terminating_bytes as u32,
            flags: self.flags,
        };
        self.file.seek(SeekFrom::Start(0)).map_err(io_write)?;
        self.file.write_all(&header.to_bytes()).map_err(io_write)?;
        self.file.flush().map_err(io_write)?;
        self.file.sync_all().map_err(io_write)?;

        debug!(
            "{:?}: sealed {} frames, {} blocks",
            self.path,
            self.entries.len(),
            total_blocks
        );
        Ok(())
    }

    fn kill(self) -> Result<(), StatusCode> {
        let Encoding { file, path, .. } = self;
        drop(file);
        fs::remove_file(&path).map_err(|e| {
            warn!("cannot remove {:?}: {}", path, e);
            ERROR_IO_WRITE
        })
    }
}

fn io_write(e: std::io::Error) -> StatusCode {
    warn!("engine write failed: {}", e);
    ERROR_IO_WRITE
}
