use ape_core::CompressionLevel;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

/// Frame payload stored verbatim.
pub const CODEC_STORED: u8 = 0;
pub const CODEC_ZSTD: u8 = 1;
pub const CODEC_LZ4: u8 = 2;

/// Compression of one frame of PCM.
///
/// Frames are compressed independently so any frame can be decoded after a
/// seek without touching its neighbours.
pub trait FrameCodec: Send + Sync {
    /// Codec id stored in the frame index entry.
    fn id(&self) -> u8;

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn decompress(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Codec an encoder at `level` compresses with.
pub fn codec_for_level(level: CompressionLevel) -> Box<dyn FrameCodec> {
    match level {
        CompressionLevel::Fast => Box::new(Lz4Codec),
        CompressionLevel::Normal => Box::new(ZstdCodec::new(3)),
        CompressionLevel::High => Box::new(ZstdCodec::new(9)),
        CompressionLevel::ExtraHigh => Box::new(ZstdCodec::new(15)),
        CompressionLevel::Insane => Box::new(ZstdCodec::new(19)),
    }
}

/// Resolve the codec of a stored frame from its id.
pub fn codec_by_id(id: u8) -> anyhow::Result<Box<dyn FrameCodec>> {
    match id {
        CODEC_STORED => Ok(Box::new(StoredCodec)),
        CODEC_ZSTD => Ok(Box::new(ZstdCodec::default())),
        CODEC_LZ4 => Ok(Box::new(Lz4Codec)),
        _ => anyhow::bail!("unknown frame codec id {}", id),
    }
}

/// No-op codec: frames that would grow under compression (noise, dither)
/// are kept as is.
pub struct StoredCodec;

impl FrameCodec for StoredCodec {
    fn id(&self) -> u8 {
        CODEC_STORED
    }

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}

/// Zstandard frame codec at a fixed level (1 = fast, 22 = smallest).
pub struct ZstdCodec {
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl FrameCodec for ZstdCodec {
    fn id(&self) -> u8 {
        CODEC_ZSTD
    }

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(zstd::bulk::compress(raw, self.level)?)
    }

    fn decompress(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        // The zstd frame carries its own content size.
        Ok(zstd::decode_all(compressed)?)
    }
}

/// LZ4 frame codec, used for the fast level.
pub struct Lz4Codec;

impl FrameCodec for Lz4Codec {
    fn id(&self) -> u8 {
        CODEC_LZ4
    }

    fn compress(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(compress_prepend_size(raw))
    }

    fn decompress(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        decompress_size_prepended(compressed)
            .map_err(|e| anyhow::anyhow!("lz4 decompress error: {}", e))
    }
}

/// Compress `raw` with `codec`, falling back to storing it when compression
/// does not shrink it. Returns the codec id actually used.
pub fn compress_frame(codec: &dyn FrameCodec, raw: &[u8]) -> anyhow::Result<(u8, Vec<u8>)> {
    let packed = codec.compress(raw)?;
    if packed.len() >= raw.len() {
        return Ok((CODEC_STORED, raw.to_vec()));
    }
    Ok((codec.id(), packed))
}
