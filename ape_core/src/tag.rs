//! Stateless tag calls, keyed by file path.
//!
//! Tags are ID3v1.1 blocks: 128 bytes at the very end of the file, starting
//! with `"TAG"`. No session or handle is involved; each call is forwarded to
//! the engine as is.

use std::path::Path;

use serde::Serialize;

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Size of an ID3v1 tag in bytes.
///   "TAG"[3] + title[30] + artist[30] + album[30] + year[4]
///   + comment[28] + zero[1] + track[1] + genre[1]
///   = 3 + 30 + 30 + 30 + 4 + 28 + 1 + 1 + 1 = 128
pub const ID3V1_TAG_SIZE: usize = 128;

const ID3V1_MAGIC: &[u8; 3] = b"TAG";
const NO_GENRE: u8 = 255;

/// Standard ID3v1 genres 0–79.
const GENRES: [&str; 80] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop",
    "Jazz", "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap",
    "Reggae", "Rock", "Techno", "Industrial", "Alternative", "Ska", "Death Metal", "Pranks",
    "Soundtrack", "Euro-Techno", "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance",
    "Classical", "Instrumental", "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise",
    "AlternRock", "Bass", "Soul", "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock",
    "Ethnic", "Gothic", "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap", "Pop/Funk", "Jungle",
    "Native American", "Cabaret", "New Wave", "Psychadelic", "Rave", "Showtunes", "Trailer", "Lo-Fi",
    "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll", "Hard Rock",
];

/// Simple tag fields, as accepted by `TagFileSimple`.
///
/// Empty strings mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagFields {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub comment: String,
    pub genre: String,
    pub year: String,
    pub track: String,
}

impl TagFields {
    /// Encode as an ID3v1.1 block. Long fields are truncated; the genre is
    /// looked up by name or number.
    pub fn to_id3v1(&self) -> [u8; ID3V1_TAG_SIZE] {
        let mut buf = [0u8; ID3V1_TAG_SIZE];
        buf[0..3].copy_from_slice(ID3V1_MAGIC);
        put_text(&mut buf[3..33], &self.title);
        put_text(&mut buf[33..63], &self.artist);
        put_text(&mut buf[63..93], &self.album);
        put_text(&mut buf[93..97], &self.year);
        put_text(&mut buf[97..125], &self.comment);
        // buf[125] stays zero: marks ID3v1.1 (track byte follows)
        buf[126] = self.track.trim().parse::<u8>().unwrap_or(0);
        buf[127] = genre_index(&self.genre);
        buf
    }

    /// Decode an ID3v1 block. `None` if it does not start with `"TAG"`.
    pub fn from_id3v1(buf: &[u8]) -> Option<Self> {
        if buf.len() < ID3V1_TAG_SIZE || &buf[0..3] != ID3V1_MAGIC {
            return None;
        }
        // ID3v1.1 stores a track number in the last comment byte
        let (comment, track) = if buf[125] == 0 && buf[126] != 0 {
            (get_text(&buf[97..125]), buf[126].to_string())
        } else {
            (get_text(&buf[97..127]), String::new())
        };
        Some(Self {
            title: get_text(&buf[3..33]),
            artist: get_text(&buf[33..63]),
            album: get_text(&buf[63..93]),
            year: get_text(&buf[93..97]),
            comment,
            track,
            genre: GENRES
                .get(buf[127] as usize)
                .map(|g| g.to_string())
                .unwrap_or_default(),
        })
    }

    /// `self` with every empty field filled in from `base`.
    pub fn merged_over(&self, base: &TagFields) -> TagFields {
        fn pick(new: &str, old: &str) -> String {
            let chosen = if new.is_empty() { old } else { new };
            chosen.to_string()
        }
        TagFields {
            artist: pick(&self.artist, &base.artist),
            album: pick(&self.album, &base.album),
            title: pick(&self.title, &base.title),
            comment: pick(&self.comment, &base.comment),
            genre: pick(&self.genre, &base.genre),
            year: pick(&self.year, &base.year),
            track: pick(&self.track, &base.track),
        }
    }
}

/// Write `fields` as the file's tag. With `clear_first` any existing tag is
/// replaced outright; otherwise its fields survive where `fields` is empty.
pub fn tag_file(
    engine: &dyn Engine,
    path: impl AsRef<Path>,
    fields: &TagFields,
    clear_first: bool,
) -> Result<()> {
    engine
        .tag_file_simple(path.as_ref(), fields, clear_first, true)
        .map_err(|code| Error::Tag { code })
}

/// Read the file's tag, `None` if it has none.
pub fn read_tag(engine: &dyn Engine, path: impl AsRef<Path>) -> Result<Option<TagFields>> {
    let raw = engine
        .get_id3_tag(path.as_ref())
        .map_err(|code| Error::Tag { code })?;
    Ok(TagFields::from_id3v1(&raw))
}

pub fn remove_tag(engine: &dyn Engine, path: impl AsRef<Path>) -> Result<()> {
    engine
        .remove_tag(path.as_ref())
        .map_err(|code| Error::Tag { code })
}

// ── helpers ────────────────────────────────────────────────────────────────

fn put_text(dst: &mut [u8], text: &str) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn get_text(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).trim_end().to_string()
}

fn genre_index(genre: &str) -> u8 {
    let genre = genre.trim();
    if genre.is_empty() {
        return NO_GENRE;
    }
    if let Ok(n) = genre.parse::<u8>() {
        return n;
    }
    GENRES
        .iter()
        .position(|g| g.eq_ignore_ascii_case(genre))
        .map(|i| i as u8)
        .unwrap_or(NO_GENRE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TagFields {
        TagFields {
            artist: "Field Recordings".into(),
            album: "Harbour".into(),
            title: "Foghorn at Dawn".into(),
            comment: "recorded 2019".into(),
            genre: "ambient".into(),
            year: "2019".into(),
            track: "7".into(),
        }
    }

    #[test]
    fn id3v1_block_keeps_all_fields() {
        let block = sample().to_id3v1();
        assert_eq!(&block[0..3], b"TAG");
        assert_eq!(block[127], 26, "Ambient is genre 26");

        let back = TagFields::from_id3v1(&block).unwrap();
        assert_eq!(back.title, "Foghorn at Dawn");
        assert_eq!(back.track, "7");
        assert_eq!(back.genre, "Ambient");
        assert_eq!(back.comment, "recorded 2019");
    }

    #[test]
    fn long_fields_are_truncated_to_their_slot() {
        let fields = TagFields {
            title: "x".repeat(64),
            ..TagFields::default()
        };
        let back = TagFields::from_id3v1(&fields.to_id3v1()).unwrap();
        assert_eq!(back.title.len(), 30);
        assert_eq!(back.genre, "", "no genre set");
    }

    #[test]
    fn zeroed_block_is_no_tag() {
        assert!(TagFields::from_id3v1(&[0u8; ID3V1_TAG_SIZE]).is_none());
    }

    #[test]
    fn merge_keeps_existing_fields_where_new_is_empty() {
        let update = TagFields {
            title: "Second Take".into(),
            ..TagFields::default()
        };
        let merged = update.merged_over(&sample());
        assert_eq!(merged.title, "Second Take");
        assert_eq!(merged.artist, "Field Recordings");
    }
}
