use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use ape_core::tag::ID3V1_TAG_SIZE;
use ape_core::{InfoField, InfoValue, StatusCode};
use log::warn;
use xxhash_rust::xxh3::xxh3_64;

use super::codec::codec_by_id;
use super::format::{
    FileHeader, FrameEntry, FLAG_HAS_CHECKSUM, FLAG_WAV_HEADER_STORED, FOOTER_SIZE,
    FRAME_ENTRY_SIZE, HEADER_SIZE,
};
use crate::status::{
    ERROR_BAD_PARAMETER, ERROR_DECOMPRESSING_FRAME, ERROR_INVALID_CHECKSUM,
    ERROR_INVALID_INPUT_FILE, ERROR_IO_READ,
};

/// Live state behind one decoder handle.
///
/// # Open sequence
/// 1. Read the 64-byte header (magic, version, format).
/// 2. Find the end of the audio: the file end, or 128 bytes earlier if an
///    ID3v1 tag is appended.
/// 3. Read the footer just before that point → frame index offset, then
///    load the whole frame index.
///
/// Frames are decoded lazily; the most recent one is cached so sequential
/// reads decode each frame once.
pub(crate) struct DecoderState {
    file: File,
    path: PathBuf,
    header: FileHeader,
    entries: Vec<FrameEntry>,
    file_size: u64,
    index_offset: u64,
    current_block: u64,
    cached: Option<(usize, Vec<u8>)>,
}

impl DecoderState {
    pub(crate) fn open(path: &Path) -> Result<Self, StatusCode> {
        let mut file = File::open(path).map_err(|e| {
            warn!("cannot open {:?}: {}", path, e);
            ERROR_INVALID_INPUT_FILE
        })?;
        let file_size = file.metadata().map_err(io_read)?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(ERROR_INVALID_INPUT_FILE);
        }

        // ── Read and validate header ────────────────────────────────────────
        let mut header_buf = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header_buf).map_err(io_read)?;
        let header = FileHeader::from_bytes(&header_buf)?;

        // ── Footer → index offset ───────────────────────────────────────────
        let audio_end = audio_end(&mut file, file_size)?;
        file.seek(SeekFrom::Start(audio_end - FOOTER_SIZE))
            .map_err(io_read)?;
        let mut footer_buf = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer_buf).map_err(io_read)?;
        let index_offset = u64::from_le_bytes(footer_buf);

        let index_len = header.frame_count as u64 * FRAME_ENTRY_SIZE;
        if index_offset.checked_add(index_len) != Some(audio_end - FOOTER_SIZE) {
            return Err(ERROR_INVALID_INPUT_FILE);
        }

        // ── Load frame index ────────────────────────────────────────────────
        file.seek(SeekFrom::Start(index_offset)).map_err(io_read)?;
        let mut entries = Vec::with_capacity(header.frame_count as usize);
        let mut entry_buf = [0u8; FRAME_ENTRY_SIZE as usize];
        for _ in 0..header.frame_count {
            file.read_exact(&mut entry_buf).map_err(io_read)?;
            entries.push(FrameEntry::from_bytes(&entry_buf));
        }
        check_frame_layout(&header, &entries)?;
        let data_start = HEADER_SIZE + header.wav_header_bytes as u64;
        if entries
            .iter()
            .any(|e| e.offset < data_start || e.offset + e.compressed_len as u64 > index_offset)
        {
            warn!("{:?}: frame index points outside the frame area", path);
            return Err(ERROR_INVALID_INPUT_FILE);
        }
        if header.terminating_bytes as u64 > index_offset.saturating_sub(data_start)
            || header.wav_terminating_bytes > header.terminating_bytes
        {
            warn!("{:?}: terminating data overruns the frame area", path);
            return Err(ERROR_INVALID_INPUT_FILE);
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            entries,
            file_size,
            index_offset,
            current_block: 0,
            cached: None,
        })
    }

    fn block_align(&self) -> usize {
        self.header.block_align as usize
    }

    pub(crate) fn get_data(&mut self, buffer: &mut [u8], blocks: usize) -> Result<usize, StatusCode> {
        let align = self.block_align();
        if buffer.len() < blocks.saturating_mul(align) {
            return Err(ERROR_BAD_PARAMETER);
        }

        let bpf = self.header.blocks_per_frame as u64;
        let mut produced = 0usize;
        while produced < blocks && self.current_block < self.header.total_blocks {
            let frame = (self.current_block / bpf) as usize;
            let within = (self.current_block % bpf) as usize;
            let frame_blocks = self.entries[frame].blocks as usize;
            let take = (blocks - produced).min(frame_blocks - within);

            let pcm = self.frame(frame)?;
            buffer[produced * align..(produced + take) * align]
                .copy_from_slice(&pcm[within * align..(within + take) * align]);

            produced += take;
            self.current_block += take as u64;
        }
        Ok(produced)
    }

    /// Position at `block`, clamped to the end of the stream.
    pub(crate) fn seek(&mut self, block: u64) -> Result<(), StatusCode> {
        self.current_block = block.min(self.header.total_blocks);
        Ok(())
    }

    /// Decoded PCM of frame `idx`, from cache when possible.
    fn frame(&mut self, idx: usize) -> Result<&[u8], StatusCode> {
        if self.cached.as_ref().map(|(i, _)| *i) != Some(idx) {
            let pcm = self.decode_frame(idx)?;
            self.cached = Some((idx, pcm));
        }
        match &self.cached {
            Some((_, pcm)) => Ok(pcm),
            None => Err(ERROR_DECOMPRESSING_FRAME),
        }
    }

    fn decode_frame(&mut self, idx: usize) -> Result<Vec<u8>, StatusCode> {
        let entry = self.entries[idx].clone();
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .map_err(io_read)?;
        let mut compressed = vec![0u8; entry.compressed_len as usize];
        self.file.read_exact(&mut compressed).map_err(io_read)?;

        if self.header.has_flag(FLAG_HAS_CHECKSUM) && xxh3_64(&compressed) != entry.checksum {
            warn!("{:?}: frame {} checksum mismatch", self.path, idx);
            return Err(ERROR_INVALID_CHECKSUM);
        }

        let pcm = codec_by_id(entry.codec)
            .and_then(|codec| codec.decompress(&compressed))
            .map_err(|e| {
                warn!("{:?}: frame {} failed to decode: {}", self.path, idx, e);
                ERROR_DECOMPRESSING_FRAME
            })?;
        if pcm.len() != entry.blocks as usize * self.block_align() {
            warn!(
                "{:?}: frame {} decoded to {} bytes, index says {} blocks",
                self.path,
                idx,
                pcm.len(),
                entry.blocks
            );
            return Err(ERROR_DECOMPRESSING_FRAME);
        }
        Ok(pcm)
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, StatusCode> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset)).map_err(io_read)?;
        self.file.read_exact(&mut buf).map_err(io_read)?;
        Ok(buf)
    }

    fn frame_entry(&self, param: i64) -> Result<&FrameEntry, StatusCode> {
        usize::try_from(param)
            .ok()
            .and_then(|i| self.entries.get(i))
            .ok_or(ERROR_BAD_PARAMETER)
    }

    fn length_ms(&self) -> i64 {
        blocks_to_ms(self.header.total_blocks, self.header.format.sample_rate)
    }

    /// kbps over `bytes` of compressed data spanning `blocks` of audio.
    fn bitrate(&self, bytes: u64, blocks: u64) -> i64 {
        let ms = blocks_to_ms(blocks, self.header.format.sample_rate);
        if ms == 0 {
            return 0;
        }
        (bytes as i64 * 8) / ms
    }

    fn wav_data_bytes(&self) -> u64 {
        self.header.total_blocks * self.block_align() as u64
    }

    pub(crate) fn info(
        &mut self,
        field: InfoField,
        param1: i64,
        _param2: i64,
    ) -> Result<InfoValue, StatusCode> {
        let h = &self.header;
        let int = |v: i64| Ok(InfoValue::Integer(v));
        match field {
            InfoField::FileVersion => int(h.version as i64),
            InfoField::CompressionLevel => int(h.compression_level as i64),
            InfoField::FormatFlags => int(0),
            InfoField::SampleRate => int(h.format.sample_rate as i64),
            InfoField::BitsPerSample => int(h.format.bits_per_sample as i64),
            InfoField::BytesPerSample => int(h.format.bits_per_sample as i64 / 8),
            InfoField::Channels => int(h.format.channels as i64),
            InfoField::BlockAlignment => int(h.block_align as i64),
            InfoField::BlocksPerFrame => int(h.blocks_per_frame as i64),
            InfoField::FinalFrameBlocks => int(self.entries.last().map_or(0, |e| e.blocks as i64)),
            InfoField::TotalFrames => int(h.frame_count as i64),
            InfoField::WavHeaderBytes => int(self.wav_header_len() as i64),
            InfoField::WavTerminatingBytes => int(h.wav_terminating_bytes as i64),
            InfoField::WavDataBytes => int(self.wav_data_bytes() as i64),
            InfoField::WavTotalBytes => int(
                (self.wav_header_len() as u64 + self.wav_data_bytes() + h.wav_terminating_bytes as u64)
                    as i64,
            ),
            InfoField::ApeTotalBytes => int(self.file_size as i64),
            InfoField::TotalBlocks | InfoField::DecompressTotalBlocks => int(h.total_blocks as i64),
            InfoField::LengthMs | InfoField::DecompressLengthMs => int(self.length_ms()),
            InfoField::AverageBitrate | InfoField::DecompressAverageBitrate => {
                int(self.bitrate(self.file_size, h.total_blocks))
            }
            InfoField::DecompressedBitrate => int(h.format.byte_rate() as i64 * 8 / 1000),
            InfoField::PeakLevel => int(-1),
            InfoField::FrameBitrate => {
                let e = self.frame_entry(param1)?;
                int(self.bitrate(e.compressed_len as u64, e.blocks as u64))
            }
            InfoField::SeekBit => {
                self.frame_entry(param1)?;
                int(0)
            }
            InfoField::SeekByte => int(self.frame_entry(param1)?.offset as i64),
            InfoField::FrameBytes => int(self.frame_entry(param1)?.compressed_len as i64),
            InfoField::FrameBlocks => int(self.frame_entry(param1)?.blocks as i64),
            InfoField::CurrentBlock => int(self.current_block as i64),
            InfoField::CurrentMs => int(blocks_to_ms(self.current_block, h.format.sample_rate)),
            InfoField::CurrentFrame => int(self.current_frame() as i64),
            InfoField::CurrentBitrate => {
                let frame = self.current_frame().min(self.entries.len().saturating_sub(1));
                match self.entries.get(frame) {
                    Some(e) => int(self.bitrate(e.compressed_len as u64, e.blocks as u64)),
                    None => int(0),
                }
            }
            InfoField::WavHeaderData => Ok(InfoValue::Bytes(self.wav_header_data()?)),
            InfoField::WavTerminatingData => {
                let start = self.index_offset - h.terminating_bytes as u64;
                let len = h.wav_terminating_bytes as usize;
                Ok(InfoValue::Bytes(self.read_at(start, len)?))
            }
            InfoField::WaveFormatEx => Ok(InfoValue::Format(h.format)),
            InfoField::Tag => Ok(InfoValue::Bytes(self.tag_bytes()?)),
        }
    }

    fn current_frame(&self) -> usize {
        (self.current_block / self.header.blocks_per_frame as u64) as usize
    }

    fn wav_header_len(&self) -> usize {
        if self.header.has_flag(FLAG_WAV_HEADER_STORED) {
            self.header.wav_header_bytes as usize
        } else {
            ape_core::format::CANONICAL_WAV_HEADER_SIZE
        }
    }

    /// Stored WAV header, or a canonical one synthesised from the format.
    fn wav_header_data(&mut self) -> Result<Vec<u8>, StatusCode> {
        if self.header.has_flag(FLAG_WAV_HEADER_STORED) {
            let len = self.header.wav_header_bytes as usize;
            return self.read_at(HEADER_SIZE, len);
        }
        let data_bytes = u32::try_from(self.wav_data_bytes()).unwrap_or(u32::MAX);
        Ok(self.header.format.wav_header(data_bytes).to_vec())
    }

    /// Trailing ID3v1 block, empty if the file has none.
    fn tag_bytes(&mut self) -> Result<Vec<u8>, StatusCode> {
        let end = audio_end(&mut self.file, self.file_size)?;
        if end == self.file_size {
            return Ok(Vec::new());
        }
        self.read_at(end, ID3V1_TAG_SIZE)
    }
}

/// Offset one past the footer: the file end, or the start of an appended
/// ID3v1 tag.
pub(crate) fn audio_end(file: &mut File, file_size: u64) -> Result<u64, StatusCode> {
    let tag_size = ID3V1_TAG_SIZE as u64;
    if file_size < HEADER_SIZE + FOOTER_SIZE + tag_size {
        return Ok(file_size);
    }
    file.seek(SeekFrom::Start(file_size - tag_size))
        .map_err(io_read)?;
    let mut magic = [0u8; 3];
    file.read_exact(&mut magic).map_err(io_read)?;
    if &magic == b"TAG" {
        Ok(file_size - tag_size)
    } else {
        Ok(file_size)
    }
}

/// Frames are located by `block / blocks_per_frame`, so every frame but the
/// last must be full and the last must hold between 1 and a full frame.
fn check_frame_layout(header: &FileHeader, entries: &[FrameEntry]) -> Result<(), StatusCode> {
    let bpf = header.blocks_per_frame as u64;
    if entries.len() as u64 != header.total_blocks.div_ceil(bpf) {
        warn!(
            "{} frames indexed, {} blocks at {} per frame need {}",
            entries.len(),
            header.total_blocks,
            bpf,
            header.total_blocks.div_ceil(bpf)
        );
        return Err(ERROR_INVALID_INPUT_FILE);
    }
    let Some((last, inner)) = entries.split_last() else {
        return Ok(());
    };
    if let Some(i) = inner.iter().position(|e| e.blocks as u64 != bpf) {
        warn!("frame {} holds {} blocks, expected {}", i, inner[i].blocks, bpf);
        return Err(ERROR_INVALID_INPUT_FILE);
    }
    if last.blocks == 0 || last.blocks as u64 > bpf {
        warn!("final frame holds {} blocks of at most {}", last.blocks, bpf);
        return Err(ERROR_INVALID_INPUT_FILE);
    }
    let indexed: u64 = entries.iter().map(|e| e.blocks as u64).sum();
    if indexed != header.total_blocks {
        return Err(ERROR_INVALID_INPUT_FILE);
    }
    Ok(())
}

fn blocks_to_ms(blocks: u64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    (blocks * 1000 / sample_rate as u64) as i64
}

fn io_read(e: std::io::Error) -> StatusCode {
    warn!("engine read failed: {}", e);
    ERROR_IO_READ
}
