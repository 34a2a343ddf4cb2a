//! RIFF/WAVE input parsing for `ape encode`.
//!
//! Only the layout matters here: where the PCM payload starts and ends, and
//! which bytes surround it. The bytes before the payload are handed to the
//! engine as the WAV header; the bytes after it become terminating data, so a
//! decode with `--wav` reproduces the input file.

use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, Context};
use ape_core::WaveFormat;

/// Layout of a WAV file on disk.
#[derive(Debug, Clone)]
pub struct WavLayout {
    pub format: WaveFormat,
    /// Every byte before the PCM payload (RIFF head, fmt, any other chunks,
    /// the data chunk head).
    pub header: Vec<u8>,
    pub data_offset: u64,
    /// PCM payload length, clamped to what the file actually holds.
    pub data_len: u64,
    /// Bytes after the payload (padding and trailing chunks).
    pub trailer_len: u64,
}

/// `true` when `prefix` starts like a RIFF/WAVE file.
pub fn looks_like_wav(prefix: &[u8]) -> bool {
    prefix.len() >= 12 && &prefix[0..4] == b"RIFF" && &prefix[8..12] == b"WAVE"
}

impl WavLayout {
    /// Walk the chunk list up to the `data` chunk.
    pub fn read<R: Read + Seek>(reader: &mut R) -> anyhow::Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut riff = [0u8; 12];
        reader
            .read_exact(&mut riff)
            .context("reading RIFF header")?;
        if !looks_like_wav(&riff) {
            bail!("not a RIFF/WAVE file");
        }

        let mut format = None;
        let mut pos = 12u64;
        loop {
            let mut chunk = [0u8; 8];
            reader
                .read_exact(&mut chunk)
                .context("WAV file ends before its data chunk")?;
            let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as u64;
            pos += 8;

            match &chunk[0..4] {
                b"fmt " => {
                    let mut body = vec![0u8; size as usize];
                    reader.read_exact(&mut body).context("reading fmt chunk")?;
                    format = Some(WaveFormat::from_waveformatex(&body)?);
                    // Chunks are word aligned
                    if size % 2 == 1 {
                        reader.seek(SeekFrom::Current(1))?;
                    }
                }
                b"data" => {
                    let Some(format) = format else {
                        bail!("data chunk before fmt chunk");
                    };
                    let data_offset = pos;
                    let available = file_len.saturating_sub(data_offset);
                    let align = format.block_align() as u64;
                    let mut data_len = size.min(available);
                    if align > 0 {
                        data_len -= data_len % align;
                    }

                    let mut header = vec![0u8; data_offset as usize];
                    reader.seek(SeekFrom::Start(0))?;
                    reader.read_exact(&mut header)?;

                    return Ok(Self {
                        format,
                        header,
                        data_offset,
                        data_len,
                        trailer_len: file_len - data_offset - data_len,
                    });
                }
                _ => {
                    reader.seek(SeekFrom::Current((size + size % 2) as i64))?;
                }
            }
            pos += size + size % 2;
        }
    }

    pub fn trailer_offset(&self) -> u64 {
        self.data_offset + self.data_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_with_list_chunk(pcm: &[u8], trailer: &[u8]) -> Vec<u8> {
        let format = WaveFormat::new(22050, 16, 1);
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&format.to_waveformatex()[..16]);
        // odd-sized chunk, padded
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(b"abc\0");
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
        out.extend_from_slice(pcm);
        out.extend_from_slice(trailer);
        out
    }

    #[test]
    fn layout_locates_payload_and_trailer() {
        let pcm: Vec<u8> = (0..200u8).collect();
        let bytes = wav_with_list_chunk(&pcm, b"tail");
        let layout = WavLayout::read(&mut Cursor::new(&bytes)).unwrap();

        assert_eq!(layout.format, WaveFormat::new(22050, 16, 1));
        assert_eq!(layout.data_offset, 56);
        assert_eq!(layout.data_len, 200);
        assert_eq!(layout.trailer_len, 4);
        assert_eq!(layout.header, bytes[..56].to_vec());
        assert_eq!(layout.trailer_offset(), 256);
    }

    #[test]
    fn truncated_payload_is_clamped_to_whole_blocks() {
        let mut bytes = wav_with_list_chunk(&[0u8; 100], &[]);
        bytes.truncate(bytes.len() - 31);
        let layout = WavLayout::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(layout.data_len, 68);
        assert_eq!(layout.trailer_len, 1);
    }

    #[test]
    fn non_wav_input_is_rejected() {
        let raw = vec![0u8; 64];
        assert!(!looks_like_wav(&raw));
        assert!(WavLayout::read(&mut Cursor::new(&raw)).is_err());
    }
}
