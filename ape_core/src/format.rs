use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of a PCM `WAVEFORMATEX` record in bytes.
///   format_tag:u16 + channels:u16 + samples_per_sec:u32
///   + avg_bytes_per_sec:u32 + block_align:u16 + bits_per_sample:u16
///   + cb_size:u16
///   = 2 + 2 + 4 + 4 + 2 + 2 + 2 = 18
pub const WAVEFORMATEX_SIZE: usize = 18;

/// Size of the canonical RIFF/WAVE header (RIFF + fmt + data chunk heads).
pub const CANONICAL_WAV_HEADER_SIZE: usize = 44;

/// Most channels a Monkey's Audio stream can carry.
pub const MAX_CHANNELS: u16 = 32;

const WAVE_FORMAT_PCM: u16 = 0x0001;

// ── Format descriptor ──────────────────────────────────────────────────────

/// PCM format facts of a stream. Immutable once a session is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    /// Samples per second (Hz).
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl WaveFormat {
    pub const fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }

    /// Bytes per block: one sample-frame across all channels.
    pub fn block_align(&self) -> u32 {
        self.channels as u32 * (self.bits_per_sample as u32 / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align()
    }

    /// Reject formats no engine could address by block.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidFormat("sample rate is 0".into()));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(Error::InvalidFormat(format!(
                "channel count {} outside 1..={}",
                self.channels, MAX_CHANNELS
            )));
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(Error::InvalidFormat(format!(
                "unsupported bits per sample {}",
                self.bits_per_sample
            )));
        }
        Ok(())
    }

    /// Serialize as a PCM `WAVEFORMATEX`.
    pub fn to_waveformatex(&self) -> [u8; WAVEFORMATEX_SIZE] {
        let mut buf = [0u8; WAVEFORMATEX_SIZE];
        buf[0..2].copy_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
        buf[2..4].copy_from_slice(&self.channels.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf[8..12].copy_from_slice(&self.byte_rate().to_le_bytes());
        buf[12..14].copy_from_slice(&(self.block_align() as u16).to_le_bytes());
        buf[14..16].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        // cb_size stays zero
        buf
    }

    /// Parse the first 16 bytes of a `WAVEFORMATEX` / `fmt ` chunk.
    pub fn from_waveformatex(buf: &[u8]) -> Result<Self> {
        if buf.len() < 16 {
            return Err(Error::InvalidFormat(format!(
                "WAVEFORMATEX needs 16 bytes, got {}",
                buf.len()
            )));
        }
        let format_tag = u16::from_le_bytes([buf[0], buf[1]]);
        if format_tag != WAVE_FORMAT_PCM && format_tag != 0xFFFE {
            return Err(Error::InvalidFormat(format!(
                "format tag 0x{format_tag:04x} is not PCM"
            )));
        }
        Ok(Self {
            channels: u16::from_le_bytes([buf[2], buf[3]]),
            sample_rate: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            bits_per_sample: u16::from_le_bytes([buf[14], buf[15]]),
        })
    }

    /// Canonical 44-byte WAV header announcing `data_bytes` of PCM.
    pub fn wav_header(&self, data_bytes: u32) -> [u8; CANONICAL_WAV_HEADER_SIZE] {
        let mut buf = [0u8; CANONICAL_WAV_HEADER_SIZE];
        buf[0..4].copy_from_slice(b"RIFF");
        let riff_len = data_bytes.saturating_add(CANONICAL_WAV_HEADER_SIZE as u32 - 8);
        buf[4..8].copy_from_slice(&riff_len.to_le_bytes());
        buf[8..12].copy_from_slice(b"WAVE");
        buf[12..16].copy_from_slice(b"fmt ");
        buf[16..20].copy_from_slice(&16u32.to_le_bytes());
        buf[20..36].copy_from_slice(&self.to_waveformatex()[..16]);
        buf[36..40].copy_from_slice(b"data");
        buf[40..44].copy_from_slice(&data_bytes.to_le_bytes());
        buf
    }
}

impl fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {} ch",
            self.sample_rate, self.bits_per_sample, self.channels
        )
    }
}

// ── Compression level ──────────────────────────────────────────────────────

/// Engine compression level. Numeric values match the engine's constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionLevel {
    Fast,
    #[default]
    Normal,
    High,
    ExtraHigh,
    Insane,
}

impl CompressionLevel {
    pub const fn value(self) -> i32 {
        match self {
            CompressionLevel::Fast => 1000,
            CompressionLevel::Normal => 2000,
            CompressionLevel::High => 3000,
            CompressionLevel::ExtraHigh => 4000,
            CompressionLevel::Insane => 5000,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            1000 => Some(CompressionLevel::Fast),
            2000 => Some(CompressionLevel::Normal),
            3000 => Some(CompressionLevel::High),
            4000 => Some(CompressionLevel::ExtraHigh),
            5000 => Some(CompressionLevel::Insane),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionLevel::Fast => "fast",
            CompressionLevel::Normal => "normal",
            CompressionLevel::High => "high",
            CompressionLevel::ExtraHigh => "extra-high",
            CompressionLevel::Insane => "insane",
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.value())
    }
}

impl FromStr for CompressionLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" | "1" | "1000" => Ok(CompressionLevel::Fast),
            "normal" | "2" | "2000" => Ok(CompressionLevel::Normal),
            "high" | "3" | "3000" => Ok(CompressionLevel::High),
            "extra-high" | "extrahigh" | "4" | "4000" => Ok(CompressionLevel::ExtraHigh),
            "insane" | "5" | "5000" => Ok(CompressionLevel::Insane),
            other => Err(format!(
                "unknown compression level '{other}'. Valid options: fast, normal, high, extra-high, insane"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_align_is_channels_times_sample_bytes() {
        assert_eq!(WaveFormat::new(44100, 16, 2).block_align(), 4);
        assert_eq!(WaveFormat::new(48000, 24, 6).block_align(), 18);
        assert_eq!(WaveFormat::new(8000, 8, 1).block_align(), 1);
    }

    #[test]
    fn wav_header_describes_pcm_layout() {
        let format = WaveFormat::new(44100, 16, 2);
        let header = format.wav_header(4000);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 4036);
        assert_eq!(&header[8..16], b"WAVEfmt ");
        assert_eq!(u32::from_le_bytes(header[28..32].try_into().unwrap()), 176_400);
        assert_eq!(u16::from_le_bytes([header[32], header[33]]), 4);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 4000);

        let parsed = WaveFormat::from_waveformatex(&header[20..36]).unwrap();
        assert_eq!(parsed, format);
    }

    #[test]
    fn validate_rejects_unaddressable_formats() {
        assert!(WaveFormat::new(0, 16, 2).validate().is_err());
        assert!(WaveFormat::new(44100, 12, 2).validate().is_err());
        assert!(WaveFormat::new(44100, 16, 0).validate().is_err());
        assert!(WaveFormat::new(44100, 32, 16_384).validate().is_err());
        assert!(WaveFormat::new(44100, 16, MAX_CHANNELS + 1).validate().is_err());
        assert!(WaveFormat::new(44100, 32, MAX_CHANNELS).validate().is_ok());
        assert!(WaveFormat::new(44100, 24, 2).validate().is_ok());
    }

    #[test]
    fn compression_level_parses_names_and_numbers() {
        assert_eq!("extra-high".parse(), Ok(CompressionLevel::ExtraHigh));
        assert_eq!("3000".parse(), Ok(CompressionLevel::High));
        assert!("ludicrous".parse::<CompressionLevel>().is_err());
        assert_eq!(CompressionLevel::from_value(5000), Some(CompressionLevel::Insane));
    }
}
