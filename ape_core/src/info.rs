use crate::format::WaveFormat;

/// Result shape of an information query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoShape {
    Integer,
    Bytes,
    Format,
}

/// Answer to an information query, tagged by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    Integer(i64),
    Bytes(Vec<u8>),
    Format(WaveFormat),
}

impl InfoValue {
    pub fn shape(&self) -> InfoShape {
        match self {
            InfoValue::Integer(_) => InfoShape::Integer,
            InfoValue::Bytes(_) => InfoShape::Bytes,
            InfoValue::Format(_) => InfoShape::Format,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            InfoValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            InfoValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_format(&self) -> Option<&WaveFormat> {
        match self {
            InfoValue::Format(f) => Some(f),
            _ => None,
        }
    }
}

/// Closed set of facts a decoder can be asked about.
///
/// The `APE_INFO_*` range (1000s) describes the file; the
/// `APE_DECOMPRESS_*` range (2000s) describes the decompressor, which may
/// cover only part of a file. Fields that hand out pointers to engine
/// internals (I/O source, internal file info) are not part of the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoField {
    FileVersion,
    CompressionLevel,
    FormatFlags,
    SampleRate,
    BitsPerSample,
    BytesPerSample,
    Channels,
    BlockAlignment,
    BlocksPerFrame,
    FinalFrameBlocks,
    TotalFrames,
    WavHeaderBytes,
    WavTerminatingBytes,
    WavDataBytes,
    WavTotalBytes,
    ApeTotalBytes,
    TotalBlocks,
    LengthMs,
    AverageBitrate,
    /// `param1` = frame index.
    FrameBitrate,
    DecompressedBitrate,
    /// -1 when unknown.
    PeakLevel,
    /// `param1` = frame index.
    SeekBit,
    /// `param1` = frame index.
    SeekByte,
    WavHeaderData,
    WavTerminatingData,
    WaveFormatEx,
    /// `param1` = frame index.
    FrameBytes,
    /// `param1` = frame index.
    FrameBlocks,
    /// Raw tag bytes.
    Tag,
    CurrentBlock,
    CurrentMs,
    DecompressTotalBlocks,
    DecompressLengthMs,
    CurrentBitrate,
    DecompressAverageBitrate,
    CurrentFrame,
}

impl InfoField {
    pub const ALL: [InfoField; 37] = [
        InfoField::FileVersion,
        InfoField::CompressionLevel,
        InfoField::FormatFlags,
        InfoField::SampleRate,
        InfoField::BitsPerSample,
        InfoField::BytesPerSample,
        InfoField::Channels,
        InfoField::BlockAlignment,
        InfoField::BlocksPerFrame,
        InfoField::FinalFrameBlocks,
        InfoField::TotalFrames,
        InfoField::WavHeaderBytes,
        InfoField::WavTerminatingBytes,
        InfoField::WavDataBytes,
        InfoField::WavTotalBytes,
        InfoField::ApeTotalBytes,
        InfoField::TotalBlocks,
        InfoField::LengthMs,
        InfoField::AverageBitrate,
        InfoField::FrameBitrate,
        InfoField::DecompressedBitrate,
        InfoField::PeakLevel,
        InfoField::SeekBit,
        InfoField::SeekByte,
        InfoField::WavHeaderData,
        InfoField::WavTerminatingData,
        InfoField::WaveFormatEx,
        InfoField::FrameBytes,
        InfoField::FrameBlocks,
        InfoField::Tag,
        InfoField::CurrentBlock,
        InfoField::CurrentMs,
        InfoField::DecompressTotalBlocks,
        InfoField::DecompressLengthMs,
        InfoField::CurrentBitrate,
        InfoField::DecompressAverageBitrate,
        InfoField::CurrentFrame,
    ];

    /// Numeric field identifier used on the native call interface.
    pub const fn id(self) -> i32 {
        match self {
            InfoField::FileVersion => 1000,
            InfoField::CompressionLevel => 1001,
            InfoField::FormatFlags => 1002,
            InfoField::SampleRate => 1003,
            InfoField::BitsPerSample => 1004,
            InfoField::BytesPerSample => 1005,
            InfoField::Channels => 1006,
            InfoField::BlockAlignment => 1007,
            InfoField::BlocksPerFrame => 1008,
            InfoField::FinalFrameBlocks => 1009,
            InfoField::TotalFrames => 1010,
            InfoField::WavHeaderBytes => 1011,
            InfoField::WavTerminatingBytes => 1012,
            InfoField::WavDataBytes => 1013,
            InfoField::WavTotalBytes => 1014,
            InfoField::ApeTotalBytes => 1015,
            InfoField::TotalBlocks => 1016,
            InfoField::LengthMs => 1017,
            InfoField::AverageBitrate => 1018,
            InfoField::FrameBitrate => 1019,
            InfoField::DecompressedBitrate => 1020,
            InfoField::PeakLevel => 1021,
            InfoField::SeekBit => 1022,
            InfoField::SeekByte => 1023,
            InfoField::WavHeaderData => 1024,
            InfoField::WavTerminatingData => 1025,
            InfoField::WaveFormatEx => 1026,
            InfoField::FrameBytes => 1028,
            InfoField::FrameBlocks => 1029,
            InfoField::Tag => 1030,
            InfoField::CurrentBlock => 2000,
            InfoField::CurrentMs => 2001,
            InfoField::DecompressTotalBlocks => 2002,
            InfoField::DecompressLengthMs => 2003,
            InfoField::CurrentBitrate => 2004,
            InfoField::DecompressAverageBitrate => 2005,
            InfoField::CurrentFrame => 2006,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.id() == id)
    }

    /// Shape every engine must answer this field with.
    pub const fn shape(self) -> InfoShape {
        match self {
            InfoField::WavHeaderData | InfoField::WavTerminatingData | InfoField::Tag => {
                InfoShape::Bytes
            }
            InfoField::WaveFormatEx => InfoShape::Format,
            _ => InfoShape::Integer,
        }
    }

    /// Whether `param1` selects a frame.
    pub const fn takes_frame_index(self) -> bool {
        matches!(
            self,
            InfoField::FrameBitrate
                | InfoField::SeekBit
                | InfoField::SeekByte
                | InfoField::FrameBytes
                | InfoField::FrameBlocks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_resolve_back() {
        for field in InfoField::ALL {
            assert_eq!(InfoField::from_id(field.id()), Some(field));
        }
        assert_eq!(InfoField::from_id(1027), None, "I/O source pointer is not exposed");
        assert_eq!(InfoField::from_id(3000), None, "internal info pointer is not exposed");
    }

    #[test]
    fn structured_fields_are_not_integers() {
        assert_eq!(InfoField::WavHeaderData.shape(), InfoShape::Bytes);
        assert_eq!(InfoField::WaveFormatEx.shape(), InfoShape::Format);
        assert_eq!(InfoField::SampleRate.shape(), InfoShape::Integer);
        assert!(InfoField::FrameBytes.takes_frame_index());
        assert!(!InfoField::TotalBlocks.takes_frame_index());
    }
}
