// Disk Drive emulation
// One physical drive: an optional open image, its write protection and the head position

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{
    disk_error::DiskError,
    dsk_image::{self, SECTOR_SIZE, TRACKS},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    A = 0,
    B = 1,
}

impl Drive {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u8) -> Result<Self, DiskError> {
        match index {
            0 => Ok(Drive::A),
            1 => Ok(Drive::B),
            n => Err(DiskError::InvalidDrive(n)),
        }
    }
}

impl fmt::Display for Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drive::A => write!(f, "A:"),
            Drive::B => write!(f, "B:"),
        }
    }
}

#[derive(Debug)]
pub struct DiskDrive {
    drive: Drive,
    image: Option<File>,
    path: Option<PathBuf>,
    read_only: bool,
    track: u8,
}

impl DiskDrive {
    pub fn new(drive: Drive) -> Self {
        Self {
            drive,
            image: None,
            path: None,
            read_only: false,
            track: 0,
        }
    }

    /// Opens `path` as the drive's medium.
    ///
    /// The image is write protected when `write_protect` is set or when the
    /// file cannot be opened for writing.
    pub fn insert(&mut self, path: &Path, write_protect: bool) -> Result<(), DiskError> {
        let metadata = std::fs::metadata(path).map_err(|e| open_error(path, e))?;
        dsk_image::validate_image_len(path, metadata.len())?;

        let writable = !write_protect && !metadata.permissions().readonly();
        let (file, read_only) = if writable {
            match OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => (file, false),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    (File::open(path).map_err(|e| open_error(path, e))?, true)
                }
                Err(e) => return Err(open_error(path, e)),
            }
        } else {
            (File::open(path).map_err(|e| open_error(path, e))?, true)
        };

        self.image = Some(file);
        self.path = Some(path.to_path_buf());
        self.read_only = read_only;

        tracing::info!(
            "Disk {:?} inserted in drive {}{}",
            path,
            self.drive,
            if read_only { " (write protected)" } else { "" }
        );
        Ok(())
    }

    pub fn eject(&mut self) -> Result<(), DiskError> {
        let Some(file) = self.image.take() else {
            return Err(DiskError::NoDisk);
        };
        let path = self.path.take();
        let read_only = std::mem::replace(&mut self.read_only, false);

        if !read_only {
            file.sync_all()?;
        }

        tracing::info!("Disk {:?} ejected from drive {}", path.unwrap_or_default(), self.drive);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.image.is_some()
    }

    pub fn is_write_protected(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn track(&self) -> u8 {
        self.track
    }

    /// Moves the head one track inward (`+1`) or outward (`-1`), stopping at the end stops.
    pub fn step(&mut self, direction: i8) {
        self.track = if direction < 0 {
            self.track.saturating_sub(1)
        } else {
            (self.track + 1).min(TRACKS - 1)
        };
    }

    pub fn read_sector(
        &mut self,
        track: u8,
        side: u8,
        sector: u8,
        buffer: &mut [u8; SECTOR_SIZE],
    ) -> io::Result<()> {
        let file = self.seek_to(track, side, sector)?;
        file.read_exact(buffer)
    }

    pub fn write_sector(
        &mut self,
        track: u8,
        side: u8,
        sector: u8,
        buffer: &[u8; SECTOR_SIZE],
    ) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "disk is write protected",
            ));
        }

        let file = self.seek_to(track, side, sector)?;
        file.write_all(buffer)?;
        file.flush()
    }

    fn seek_to(&mut self, track: u8, side: u8, sector: u8) -> io::Result<&mut File> {
        let offset = dsk_image::sector_offset(track, side, sector).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no sector {} on track {} side {}", sector, track, side),
            )
        })?;

        let file = self
            .image
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no disk in drive"))?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file)
    }
}

fn open_error(path: &Path, error: io::Error) -> DiskError {
    if error.kind() == io::ErrorKind::PermissionDenied {
        DiskError::PermissionDenied(path.to_path_buf())
    } else {
        DiskError::Io(error)
    }
}
