use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::format::WaveFormat;
use crate::handle::HandleSlot;
use crate::info::{InfoField, InfoShape, InfoValue};

/// Stream facts gathered from the decoder in one pass (for display).
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub format: WaveFormat,
    pub block_align: u32,
    pub file_version: i64,
    pub compression_level: i64,
    pub average_bitrate: i64,
    pub blocks_per_frame: i64,
    pub total_frames: i64,
    pub total_blocks: u64,
    pub ape_total_bytes: i64,
    pub length_ms: i64,
}

/// Seekable byte stream over one decoder handle.
///
/// # Open sequence
/// 1. `decompress_create` on the path.
/// 2. Query sample rate, bits per sample and channel count (format).
/// 3. Query block alignment, then total blocks. Both are cached.
///
/// If any step after 1 fails the handle is destroyed before `open` returns.
///
/// # Addressing
/// The engine counts blocks (sample-frames); this type counts bytes. Byte
/// position is always `block × block_align`. Seeks floor a byte offset to the
/// block that contains it.
///
/// # Reads
/// [`Read::read`] asks the engine for `buf.len() / block_align` blocks and
/// returns however many bytes it produced, which may be fewer than asked and
/// is zero at end of stream. A buffer narrower than one block is served from a
/// one-block carry so any chunk size walks the whole stream.
pub struct DecodeSession {
    slot: HandleSlot,
    format: WaveFormat,
    block_align: usize,
    total_blocks: u64,
    /// One decoded block being handed out to narrow reads.
    carry: Vec<u8>,
    carry_pos: usize,
}

impl DecodeSession {
    /// Open a compressed file for decoding.
    pub fn open(engine: Arc<dyn Engine>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let handle = engine
            .decompress_create(path)
            .map_err(|code| Error::Init { code })?;
        let slot = HandleSlot::decoder(engine, handle);

        let sample_rate = narrow(InfoField::SampleRate, query_int(&slot, InfoField::SampleRate)?)?;
        let bits_per_sample =
            narrow(InfoField::BitsPerSample, query_int(&slot, InfoField::BitsPerSample)?)?;
        let channels = narrow(InfoField::Channels, query_int(&slot, InfoField::Channels)?)?;
        let format = WaveFormat::new(sample_rate, bits_per_sample, channels);

        let block_align: usize =
            narrow(InfoField::BlockAlignment, query_int(&slot, InfoField::BlockAlignment)?)?;
        if block_align == 0 {
            return Err(Error::InvalidFormat(format!(
                "engine reported block alignment 0 for {path:?}"
            )));
        }
        let total_blocks = narrow(InfoField::TotalBlocks, query_int(&slot, InfoField::TotalBlocks)?)?;

        debug!(
            "opened {:?}: {}, block align {}, {} blocks",
            path, format, block_align, total_blocks
        );

        Ok(Self {
            slot,
            format,
            block_align,
            total_blocks,
            carry: Vec::new(),
            carry_pos: 0,
        })
    }

    #[inline]
    pub fn format(&self) -> WaveFormat {
        self.format
    }

    /// Bytes per block, as reported by the engine.
    #[inline]
    pub fn block_align(&self) -> usize {
        self.block_align
    }

    #[inline]
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Decoded stream length in bytes.
    pub fn length(&self) -> u64 {
        self.total_blocks * self.block_align as u64
    }

    /// Engine's current block, queried live.
    pub fn current_block(&self) -> Result<u64> {
        narrow(InfoField::CurrentBlock, query_int(&self.slot, InfoField::CurrentBlock)?)
    }

    /// Current byte position, queried live from the engine.
    pub fn position(&self) -> Result<u64> {
        let block = self.current_block()?;
        let pending = (self.carry.len() - self.carry_pos) as u64;
        Ok((block * self.block_align as u64).saturating_sub(pending))
    }

    /// Seek to `offset` bytes, flooring to the containing block. Returns the
    /// resulting byte position.
    pub fn seek_bytes(&mut self, offset: u64) -> Result<u64> {
        let align = self.block_align as u64;
        let block = offset / align;
        if offset % align != 0 {
            debug!(
                "byte offset {} is not block aligned; flooring to block {}",
                offset, block
            );
        }
        self.seek_block(block)?;
        self.position()
    }

    /// Seek to an absolute block.
    pub fn seek_block(&mut self, block: u64) -> Result<()> {
        self.slot
            .call(|engine, h| engine.decompress_seek(h, block))?
            .map_err(|code| Error::Seek { code })?;
        self.carry.clear();
        self.carry_pos = 0;
        Ok(())
    }

    /// Seek to a time offset, in milliseconds from the start. Times past the
    /// end land at the end of the stream.
    pub fn seek_ms(&mut self, ms: u64) -> Result<u64> {
        let block = (ms.saturating_mul(self.format.sample_rate as u64) / 1000)
            .min(self.total_blocks);
        self.seek_block(block)?;
        self.position()
    }

    /// Decode up to `blocks` whole blocks into `buf` and return how many were
    /// produced. Bytes left over from an earlier narrow read are dropped, so
    /// the stream realigns to the engine's block position.
    pub fn read_blocks(&mut self, buf: &mut [u8], blocks: usize) -> Result<usize> {
        let needed = blocks
            .checked_mul(self.block_align)
            .ok_or_else(|| Error::protocol("block request overflows the address space"))?;
        if buf.len() < needed {
            return Err(Error::protocol(format!(
                "buffer of {} bytes cannot hold {} blocks of {} bytes",
                buf.len(),
                blocks,
                self.block_align
            )));
        }
        self.carry.clear();
        self.carry_pos = 0;
        fetch_blocks(&self.slot, &mut buf[..needed], blocks)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Drain a partially handed-out block first
        if self.carry_pos < self.carry.len() {
            let n = (self.carry.len() - self.carry_pos).min(buf.len());
            buf[..n].copy_from_slice(&self.carry[self.carry_pos..self.carry_pos + n]);
            self.carry_pos += n;
            return Ok(n);
        }

        let blocks = buf.len() / self.block_align;
        if blocks > 0 {
            let needed = blocks * self.block_align;
            let got = fetch_blocks(&self.slot, &mut buf[..needed], blocks)?;
            return Ok(got * self.block_align);
        }

        // Narrower than one block: decode a single block into the carry
        self.carry.clear();
        self.carry.resize(self.block_align, 0);
        self.carry_pos = 0;
        let got = fetch_blocks(&self.slot, &mut self.carry, 1)?;
        if got == 0 {
            self.carry.clear();
            return Ok(0);
        }
        let n = buf.len();
        buf.copy_from_slice(&self.carry[..n]);
        self.carry_pos = n;
        Ok(n)
    }

    /// Integer-valued query.
    pub fn info_int(&self, field: InfoField) -> Result<i64> {
        query_int(&self.slot, field)
    }

    /// Query of any shape, with both parameters zero.
    pub fn info(&self, field: InfoField) -> Result<InfoValue> {
        self.info_with(field, 0, 0)
    }

    /// Query of any shape with explicit parameters (frame index for
    /// frame-indexed fields).
    pub fn info_with(&self, field: InfoField, param1: i64, param2: i64) -> Result<InfoValue> {
        query(&self.slot, field, param1, param2)
    }

    /// Bytes that precede the PCM data in the decoded WAV.
    pub fn wav_header_data(&self) -> Result<Vec<u8>> {
        query_bytes(&self.slot, InfoField::WavHeaderData)
    }

    /// Bytes that follow the PCM data in the decoded WAV.
    pub fn wav_terminating_data(&self) -> Result<Vec<u8>> {
        query_bytes(&self.slot, InfoField::WavTerminatingData)
    }

    pub fn stream_info(&self) -> Result<StreamInfo> {
        Ok(StreamInfo {
            format: self.format,
            block_align: self.block_align as u32,
            file_version: self.info_int(InfoField::FileVersion)?,
            compression_level: self.info_int(InfoField::CompressionLevel)?,
            average_bitrate: self.info_int(InfoField::AverageBitrate)?,
            blocks_per_frame: self.info_int(InfoField::BlocksPerFrame)?,
            total_frames: self.info_int(InfoField::TotalFrames)?,
            total_blocks: self.total_blocks,
            ape_total_bytes: self.info_int(InfoField::ApeTotalBytes)?,
            length_ms: self.info_int(InfoField::LengthMs)?,
        })
    }

    /// Destroy the decoder handle. Calling again is a no-op.
    pub fn close(&mut self) {
        self.slot.destroy();
    }

    pub fn is_closed(&self) -> bool {
        !self.slot.is_live()
    }
}

impl Read for DecodeSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf)?)
    }
}

impl Seek for DecodeSession {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.length().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        Ok(self.seek_bytes(target)?)
    }
}

// ── helpers ────────────────────────────────────────────────────────────────

fn fetch_blocks(slot: &HandleSlot, buf: &mut [u8], blocks: usize) -> Result<usize> {
    let got = slot
        .call(|engine, h| engine.decompress_get_data(h, buf, blocks))?
        .map_err(|code| Error::Read { code })?;
    if got > blocks {
        return Err(Error::protocol(format!(
            "engine retrieved {got} blocks but only {blocks} were requested"
        )));
    }
    Ok(got)
}

fn query(slot: &HandleSlot, field: InfoField, param1: i64, param2: i64) -> Result<InfoValue> {
    let value = slot
        .call(|engine, h| engine.decompress_info(h, field, param1, param2))?
        .map_err(|code| Error::Query { field, code })?;
    if value.shape() != field.shape() {
        return Err(Error::protocol(format!(
            "engine answered {:?} with {:?}, expected {:?}",
            field,
            value.shape(),
            field.shape()
        )));
    }
    Ok(value)
}

fn query_int(slot: &HandleSlot, field: InfoField) -> Result<i64> {
    if field.shape() != InfoShape::Integer {
        return Err(Error::protocol(format!(
            "{:?} is a {:?} field, not an integer",
            field,
            field.shape()
        )));
    }
    let value = query(slot, field, 0, 0)?;
    value
        .as_int()
        .ok_or_else(|| Error::protocol(format!("{:?} answered with {:?}", field, value.shape())))
}

fn query_bytes(slot: &HandleSlot, field: InfoField) -> Result<Vec<u8>> {
    match query(slot, field, 0, 0)? {
        InfoValue::Bytes(b) => Ok(b),
        other => Err(Error::protocol(format!(
            "{:?} answered with {:?}",
            field,
            other.shape()
        ))),
    }
}

fn narrow<T: TryFrom<i64>>(field: InfoField, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        Error::InvalidFormat(format!("engine reported {field:?} = {value}, out of range"))
    })
}
