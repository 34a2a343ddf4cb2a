//! On-disk layout of reference-engine files.
//!
//! ```text
//! [HEADER: 64 bytes]                 ← placeholder until finish
//! [WAV HEADER BYTES]                 ← optional, as handed to start
//! [FRAME 0] [FRAME 1] ... [FRAME N-1] ← independently compressed
//! [TERMINATING BYTES]
//! [FRAME INDEX: 32 bytes × N]
//! [FOOTER: 8 bytes, u64 LE offset of frame index]
//! [ID3v1 TAG: 128 bytes]             ← optional
//! ```

use ape_core::{CompressionLevel, StatusCode, WaveFormat};

use crate::status::{ERROR_INVALID_INPUT_FILE, ERROR_UNSUPPORTED_FILE_VERSION};

/// Magic bytes: "APEREF1\n".
pub const MAGIC: &[u8; 8] = b"APEREF1\n";

/// Version reported through the file-version query (3.99 = 3990).
pub const FILE_VERSION: u16 = 3990;

/// Fixed size of the file header in bytes.
///   magic[8] + version:u16 + level:u16 + sample_rate:u32 + bits:u16
///   + channels:u16 + block_align:u16 + reserved:u16 + blocks_per_frame:u32
///   + frame_count:u32 + total_blocks:u64 + wav_header_bytes:u32
///   + terminating_bytes:u32 + wav_terminating_bytes:u32 + flags:u32
///   + reserved[8]
///   = 8 + 2 + 2 + 4 + 2 + 2 + 2 + 2 + 4 + 4 + 8 + 4 + 4 + 4 + 4 + 8 = 64
pub const HEADER_SIZE: u64 = 64;

/// Size of each FrameEntry in the frame index, in bytes.
///   offset:u64 + compressed_len:u32 + blocks:u32 + checksum:u64
///   + codec:u8 + _pad[7]
///   = 8 + 4 + 4 + 8 + 1 + 7 = 32
pub const FRAME_ENTRY_SIZE: u64 = 32;

/// Size of the index footer (single u64 offset) in bytes.
pub const FOOTER_SIZE: u64 = 8;

/// Blocks per frame for fast/normal/high.
pub const BLOCKS_PER_FRAME: u32 = 73_728;

/// Blocks per frame for extra high and insane.
pub const BLOCKS_PER_FRAME_LARGE: u32 = 294_912;

// ── Flags ──────────────────────────────────────────────────────────────────

/// Each frame carries an xxhash3-64 checksum.
pub const FLAG_HAS_CHECKSUM: u32 = 1 << 0;

/// The WAV header was stored at start rather than synthesised on decode.
pub const FLAG_WAV_HEADER_STORED: u32 = 1 << 1;

pub fn blocks_per_frame(level: CompressionLevel) -> u32 {
    match level {
        CompressionLevel::ExtraHigh | CompressionLevel::Insane => BLOCKS_PER_FRAME_LARGE,
        _ => BLOCKS_PER_FRAME,
    }
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 64-byte file header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub version: u16,
    pub compression_level: u16,
    pub format: WaveFormat,
    pub block_align: u16,
    pub blocks_per_frame: u32,
    pub frame_count: u32,
    pub total_blocks: u64,
    pub wav_header_bytes: u32,
    pub terminating_bytes: u32,
    pub wav_terminating_bytes: u32,
    pub flags: u32,
}

impl FileHeader {
    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.compression_level.to_le_bytes());
        buf[12..16].copy_from_slice(&self.format.sample_rate.to_le_bytes());
        buf[16..18].copy_from_slice(&self.format.bits_per_sample.to_le_bytes());
        buf[18..20].copy_from_slice(&self.format.channels.to_le_bytes());
        buf[20..22].copy_from_slice(&self.block_align.to_le_bytes());
        // buf[22..24] reserved
        buf[24..28].copy_from_slice(&self.blocks_per_frame.to_le_bytes());
        buf[28..32].copy_from_slice(&self.frame_count.to_le_bytes());
        buf[32..40].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[40..44].copy_from_slice(&self.wav_header_bytes.to_le_bytes());
        buf[44..48].copy_from_slice(&self.terminating_bytes.to_le_bytes());
        buf[48..52].copy_from_slice(&self.wav_terminating_bytes.to_le_bytes());
        buf[52..56].copy_from_slice(&self.flags.to_le_bytes());
        // buf[56..64] reserved
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes, checking magic and version.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self, StatusCode> {
        if &buf[..8] != MAGIC {
            return Err(ERROR_INVALID_INPUT_FILE);
        }
        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);

        let version = u16_at(8);
        if version != FILE_VERSION {
            return Err(ERROR_UNSUPPORTED_FILE_VERSION);
        }
        let mut total = [0u8; 8];
        total.copy_from_slice(&buf[32..40]);

        let header = Self {
            version,
            compression_level: u16_at(10),
            format: WaveFormat::new(u32_at(12), u16_at(16), u16_at(18)),
            block_align: u16_at(20),
            blocks_per_frame: u32_at(24),
            frame_count: u32_at(28),
            total_blocks: u64::from_le_bytes(total),
            wav_header_bytes: u32_at(40),
            terminating_bytes: u32_at(44),
            wav_terminating_bytes: u32_at(48),
            flags: u32_at(52),
        };
        if header.block_align == 0 || header.blocks_per_frame == 0 {
            return Err(ERROR_INVALID_INPUT_FILE);
        }
        Ok(header)
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn level(&self) -> CompressionLevel {
        CompressionLevel::from_value(self.compression_level as i32).unwrap_or_default()
    }
}

// ── Frame index entry ──────────────────────────────────────────────────────

/// One entry in the frame index: where a frame lives and how to decode it.
#[derive(Debug, Clone, Default)]
pub struct FrameEntry {
    /// Byte offset of this frame from the start of the file.
    pub offset: u64,
    pub compressed_len: u32,
    /// Blocks of audio in this frame.
    pub blocks: u32,
    /// xxhash3-64 of the compressed bytes.
    pub checksum: u64,
    /// Payload codec id (see `codec`).
    pub codec: u8,
}

impl FrameEntry {
    /// Serialize to exactly `FRAME_ENTRY_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; FRAME_ENTRY_SIZE as usize] {
        let mut buf = [0u8; FRAME_ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.compressed_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.blocks.to_le_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf[24] = self.codec;
        // buf[25..32] = 7 bytes padding, stays zero
        buf
    }

    /// Deserialize from `FRAME_ENTRY_SIZE` bytes.
    pub fn from_bytes(buf: &[u8; FRAME_ENTRY_SIZE as usize]) -> Self {
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&buf[0..8]);
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&buf[16..24]);
        Self {
            offset: u64::from_le_bytes(offset),
            compressed_len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            blocks: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            checksum: u64::from_le_bytes(checksum),
            codec: buf[24],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ERROR_INVALID_INPUT_FILE;

    fn header() -> FileHeader {
        FileHeader {
            version: FILE_VERSION,
            compression_level: 2000,
            format: WaveFormat::new(44100, 16, 2),
            block_align: 4,
            blocks_per_frame: BLOCKS_PER_FRAME,
            frame_count: 3,
            total_blocks: 200_000,
            wav_header_bytes: 44,
            terminating_bytes: 10,
            wav_terminating_bytes: 6,
            flags: FLAG_HAS_CHECKSUM | FLAG_WAV_HEADER_STORED,
        }
    }

    #[test]
    fn header_survives_serialization() {
        let parsed = FileHeader::from_bytes(&header().to_bytes()).unwrap();
        assert_eq!(parsed.format, WaveFormat::new(44100, 16, 2));
        assert_eq!(parsed.total_blocks, 200_000);
        assert_eq!(parsed.wav_terminating_bytes, 6);
        assert_eq!(parsed.level(), CompressionLevel::Normal);
        assert!(parsed.has_flag(FLAG_WAV_HEADER_STORED));
    }

    #[test]
    fn foreign_bytes_are_not_a_reference_file() {
        let mut bytes = header().to_bytes();
        bytes[0] = b'M';
        assert_eq!(FileHeader::from_bytes(&bytes).err(), Some(ERROR_INVALID_INPUT_FILE));
    }

    #[test]
    fn large_levels_use_larger_frames() {
        assert_eq!(blocks_per_frame(CompressionLevel::Fast), BLOCKS_PER_FRAME);
        assert_eq!(blocks_per_frame(CompressionLevel::Insane), BLOCKS_PER_FRAME_LARGE);
    }
}
