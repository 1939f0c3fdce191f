// Flat disk image layout
// 80 tracks, 2 sides, 5 sectors of 1024 bytes, no header or checksum

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::disk_error::DiskError;

pub const SECTOR_SIZE: usize = 1024;
pub const SECTORS_PER_TRACK: u8 = 5;
pub const TRACKS: u8 = 80;
pub const SIDES: u8 = 2;

/// Total image length in bytes (819,200).
pub const IMAGE_SIZE: u64 =
    TRACKS as u64 * SIDES as u64 * SECTORS_PER_TRACK as u64 * SECTOR_SIZE as u64;

/// Sector ID size code reported by Read Address for 1024-byte sectors.
pub const SIZE_CODE: u8 = 3;

const FORMAT_FILLER: u8 = 0xE5;

/// Byte offset of `sector` (1-based) on `track`/`side`.
///
/// Returns `None` when any coordinate lies outside the fixed geometry.
pub fn sector_offset(track: u8, side: u8, sector: u8) -> Option<u64> {
    if track >= TRACKS || side >= SIDES || sector == 0 || sector > SECTORS_PER_TRACK {
        return None;
    }

    let track_side = 2 * track as u64 + side as u64;
    let index = SECTORS_PER_TRACK as u64 * track_side + (sector as u64 - 1);
    Some(SECTOR_SIZE as u64 * index)
}

pub fn validate_image_len(path: &Path, len: u64) -> Result<(), DiskError> {
    if len != IMAGE_SIZE {
        return Err(DiskError::InvalidSize {
            path: path.to_path_buf(),
            len,
            expected: IMAGE_SIZE,
        });
    }

    Ok(())
}

/// Writes a freshly formatted image to `path`, replacing any existing file.
pub fn create_blank_image<P: AsRef<Path>>(path: P) -> Result<(), DiskError> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    let sector = [FORMAT_FILLER; SECTOR_SIZE];

    for _ in 0..IMAGE_SIZE / SECTOR_SIZE as u64 {
        writer.write_all(&sector)?;
    }
    writer.flush()?;

    tracing::info!("[DSK] Created blank image {:?}", path);
    Ok(())
}
