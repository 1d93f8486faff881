//! AES-256 zip implementation of [`ArchivePackager`].

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

use drivesync_common::{Error, Result};

use crate::packager::{archive_name, copy_mtime, payload_name, ArchivePackager, Extraction};

/// Zip packager writing one deflated, AES-256 encrypted entry per archive.
#[derive(Debug, Clone, Default)]
pub struct ZipPackager {
    require_password: bool,
}

impl ZipPackager {
    /// Create a packager that accepts unprotected archives on extraction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject archives that carry no password.
    pub fn require_password(mut self, require: bool) -> Self {
        self.require_password = require;
        self
    }

    fn open(archive: &Path) -> Result<ZipArchive<BufReader<File>>> {
        let file = File::open(archive)?;
        let zip = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(archive, e))?;
        match zip.len() {
            0 => Err(Error::ArchiveCorrupt(format!(
                "{}: archive is empty",
                archive.display()
            ))),
            1 => Ok(zip),
            n => {
                warn!(archive = %archive.display(), entries = n, "Archive holds extra entries; using the first");
                Ok(zip)
            }
        }
    }

    fn write_pack(source: &Path, archive: &Path, entry_name: &str, password: &str) -> Result<()> {
        let mut input = BufReader::new(File::open(source)?);
        let size = std::fs::metadata(source)?.len();

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u64::from(u32::MAX))
            .with_aes_encryption(AesMode::Aes256, password);

        let mut zip = ZipWriter::new(BufWriter::new(File::create(archive)?));
        zip.start_file(entry_name, options)
            .map_err(|e| from_zip(archive, e))?;
        io::copy(&mut input, &mut zip)?;
        let writer = zip.finish().map_err(|e| from_zip(archive, e))?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }
}

impl ArchivePackager for ZipPackager {
    fn pack(&self, source: &Path, target_dir: &Path, password: &str) -> Result<PathBuf> {
        if password.is_empty() {
            return Err(Error::InvalidArgument("Archive password is empty".to_string()));
        }
        let entry_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::InvalidArgument(format!("No usable file name: {}", source.display()))
            })?;

        let archive = target_dir.join(archive_name(entry_name));
        if let Err(e) = Self::write_pack(source, &archive, entry_name, password) {
            remove_quietly(&archive);
            return Err(e);
        }

        copy_mtime(source, &archive)?;
        debug!(source = %source.display(), archive = %archive.display(), "Packed");
        Ok(archive)
    }

    fn try_extract_unprotected(&self, archive: &Path, dest_dir: &Path) -> Result<Extraction> {
        let mut zip = Self::open(archive)?;

        let encrypted = zip
            .by_index_raw(0)
            .map_err(|e| corrupt(archive, e))?
            .encrypted();
        if encrypted {
            return Ok(Extraction::PasswordRequired);
        }
        if self.require_password {
            return Err(Error::ArchiveCorrupt(format!(
                "{}: archive is not password protected",
                archive.display()
            )));
        }

        let mut entry = zip.by_index(0).map_err(|e| corrupt(archive, e))?;
        let target = extract_target(archive, dest_dir)?;
        write_entry(&mut entry, archive, &target)?;
        Ok(Extraction::Extracted(target))
    }

    fn extract_with_password(
        &self,
        archive: &Path,
        password: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let mut zip = Self::open(archive)?;
        let mut entry = zip
            .by_index_decrypt(0, password.as_bytes())
            .map_err(|e| corrupt(archive, e))?;

        let target = extract_target(archive, dest_dir)?;
        write_entry(&mut entry, archive, &target)?;
        Ok(target)
    }
}

/// Destination path of an archive's payload inside `dest_dir`.
fn extract_target(archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
    archive
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(payload_name)
        .map(|name| dest_dir.join(name))
        .ok_or_else(|| {
            Error::ArchiveCorrupt(format!("{}: not an archive name", archive.display()))
        })
}

/// Stream an entry into `target` through a partial file, replacing any
/// existing file only once the entry has been read completely.
///
/// A folder already at `target` is never replaced.
fn write_entry(entry: &mut impl Read, archive: &Path, target: &Path) -> Result<()> {
    if target.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "{}: a folder occupies {}",
            archive.display(),
            target.display()
        )));
    }
    let partial = partial_path(target);

    let written = File::create(&partial).and_then(|file| {
        let mut out = BufWriter::new(file);
        io::copy(entry, &mut out)?;
        out.into_inner().map_err(|e| e.into_error())?.sync_all()
    });

    if let Err(e) = written {
        remove_quietly(&partial);
        return Err(match e.kind() {
            // Bad CRC, bad MAC and truncated streams all surface here.
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                Error::ArchiveCorrupt(format!("{}: {}", archive.display(), e))
            }
            _ => Error::Io(e),
        });
    }

    if target.exists() {
        std::fs::remove_file(target)?;
    }
    std::fs::rename(&partial, target).inspect_err(|_| remove_quietly(&partial))?;
    Ok(())
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial file");
        }
    }
}

/// Map a zip error raised while reading an archive.
fn corrupt(archive: &Path, err: ZipError) -> Error {
    match err {
        ZipError::Io(e) if e.kind() != io::ErrorKind::InvalidData => Error::Io(e),
        ZipError::InvalidPassword => {
            Error::ArchiveCorrupt(format!("{}: wrong password", archive.display()))
        }
        other => Error::ArchiveCorrupt(format!("{}: {}", archive.display(), other)),
    }
}

/// Map a zip error raised while writing an archive.
fn from_zip(archive: &Path, err: ZipError) -> Error {
    match err {
        ZipError::Io(e) => Error::Io(e),
        other => Error::Io(io::Error::other(format!("{}: {}", archive.display(), other))),
    }
}
