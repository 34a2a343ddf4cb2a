use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use ape_core::tag::ID3V1_TAG_SIZE;
use ape_core::{StatusCode, TagFields};
use log::{debug, warn};

use super::decoder::audio_end;
use crate::status::{ERROR_INVALID_INPUT_FILE, ERROR_IO_READ, ERROR_IO_WRITE, ERROR_UNDEFINED};

fn open_rw(path: &Path) -> Result<(File, u64), StatusCode> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| {
            warn!("cannot open {:?} for tagging: {}", path, e);
            ERROR_INVALID_INPUT_FILE
        })?;
    let size = file.metadata().map_err(|_| ERROR_IO_READ)?.len();
    Ok((file, size))
}

fn existing_tag(file: &mut File, size: u64) -> Result<Option<[u8; ID3V1_TAG_SIZE]>, StatusCode> {
    let end = audio_end(file, size)?;
    if end == size {
        return Ok(None);
    }
    let mut block = [0u8; ID3V1_TAG_SIZE];
    file.seek(SeekFrom::Start(end)).map_err(|_| ERROR_IO_READ)?;
    file.read_exact(&mut block).map_err(|_| ERROR_IO_READ)?;
    Ok(Some(block))
}

/// Write an ID3v1 tag, overwriting one already present.
///
/// Only ID3v1 is written; asking for the newer APE tag format fails.
pub(crate) fn tag_file_simple(
    path: &Path,
    fields: &TagFields,
    clear_first: bool,
    use_old_id3: bool,
) -> Result<(), StatusCode> {
    if !use_old_id3 {
        return Err(ERROR_UNDEFINED);
    }
    let (mut file, size) = open_rw(path)?;
    let existing = existing_tag(&mut file, size)?;

    let fields = match (&existing, clear_first) {
        (Some(block), false) => match TagFields::from_id3v1(block) {
            Some(old) => fields.merged_over(&old),
            None => fields.clone(),
        },
        _ => fields.clone(),
    };
    let at = if existing.is_some() {
        size - ID3V1_TAG_SIZE as u64
    } else {
        size
    };
    file.seek(SeekFrom::Start(at)).map_err(|_| ERROR_IO_WRITE)?;
    file.write_all(&fields.to_id3v1()).map_err(|_| ERROR_IO_WRITE)?;
    file.flush().map_err(|_| ERROR_IO_WRITE)?;
    debug!("{:?}: tag written at offset {}", path, at);
    Ok(())
}

pub(crate) fn get_id3_tag(path: &Path) -> Result<[u8; ID3V1_TAG_SIZE], StatusCode> {
    let mut file = File::open(path).map_err(|_| ERROR_INVALID_INPUT_FILE)?;
    let size = file.metadata().map_err(|_| ERROR_IO_READ)?.len();
    Ok(existing_tag(&mut file, size)?.unwrap_or([0u8; ID3V1_TAG_SIZE]))
}

/// Truncate the tag away. Untagged files are left alone.
pub(crate) fn remove_tag(path: &Path) -> Result<(), StatusCode> {
    let (mut file, size) = open_rw(path)?;
    if existing_tag(&mut file, size)?.is_some() {
        file.set_len(size - ID3V1_TAG_SIZE as u64)
            .map_err(|_| ERROR_IO_WRITE)?;
        debug!("{:?}: tag removed", path);
    }
    Ok(())
}
