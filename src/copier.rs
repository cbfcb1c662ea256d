//! Mirrors a directory tree (or a single file) from one place to another.
//!
//! Symlinks are followed and their targets copied as regular content. FIFOs,
//! sockets and device nodes have no sensible copy and fail the operation.

use crate::archive::Archive;
use crate::error::{Error, IoContext, IoOp, Result};
use crate::models::SaveKind;
use filetime::FileTime;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopiedFile {
    /// Relative to the copy's destination root.
    pub relative_path: PathBuf,
    pub hash: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct CopyReport {
    pub files: Vec<CopiedFile>,
    pub directories: usize,
}

impl CopyReport {
    pub fn entries(&self) -> usize {
        self.files.len() + self.directories
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Copier {
    hash_seed: Option<u64>,
}

impl Copier {
    pub fn new() -> Copier {
        Copier::default()
    }

    /// A copier that also records the xxHash64 of every file it writes.
    pub fn hashing(seed: u64) -> Copier {
        Copier {
            hash_seed: Some(seed),
        }
    }

    /// Copies `source` into `destination`.
    ///
    /// A directory has its contents mirrored under `destination`; a single
    /// file lands at `destination/<file name>`. Existing files are overwritten.
    pub fn copy(&self, source: &Path, destination: &Path) -> Result<CopyReport> {
        let meta = source_metadata(source)?;

        if meta.is_dir() {
            self.copy_tree(source, destination, &meta)
        } else if meta.is_file() {
            let name = source
                .file_name()
                .ok_or_else(|| Error::PathNotFound(source.to_path_buf()))?;
            fs::create_dir_all(destination).with_path(IoOp::CreateDir, destination)?;

            let mut report = CopyReport::default();
            let target = destination.join(name);
            let hash = self.copy_file(source, &target, &meta)?;

            report.files.push(CopiedFile {
                relative_path: PathBuf::from(name),
                hash,
            });
            Ok(report)
        } else {
            Err(unsupported(source))
        }
    }

    /// Writes a backup made by [`Copier::copy`] back onto its original location.
    pub fn restore(
        &self,
        backup_dir: &Path,
        original: &Path,
        kind: SaveKind,
    ) -> Result<CopyReport> {
        match kind {
            SaveKind::Directory => {
                let meta = source_metadata(backup_dir)?;
                self.copy_tree(backup_dir, original, &meta)
            }
            SaveKind::File => {
                let name = original
                    .file_name()
                    .ok_or_else(|| Error::PathNotFound(original.to_path_buf()))?;
                let source = backup_dir.join(name);
                let meta = source_metadata(&source)?;

                if let Some(parent) = original.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).with_path(IoOp::CreateDir, parent)?;
                    }
                }

                let hash = self.copy_file(&source, original, &meta)?;

                Ok(CopyReport {
                    files: vec![CopiedFile {
                        relative_path: PathBuf::from(name),
                        hash,
                    }],
                    directories: 0,
                })
            }
        }
    }

    fn copy_tree(
        &self,
        source: &Path,
        destination: &Path,
        root_meta: &Metadata,
    ) -> Result<CopyReport> {
        fs::create_dir_all(destination).with_path(IoOp::CreateDir, destination)?;

        let mut report = CopyReport::default();
        let mut dirs: Vec<(PathBuf, Metadata)> =
            vec![(destination.to_path_buf(), root_meta.clone())];

        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(true)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));

        for entry in walker {
            let step = entry.map_err(walk_error).and_then(|entry| {
                self.copy_entry(source, destination, &entry, &mut report, &mut dirs)
            });

            if let Err(err) = step {
                return Err(Error::PartialCopy {
                    copied: report.entries(),
                    source: Box::new(err),
                });
            }
        }

        // Children were written after their parent directory, so directory
        // times can only be pinned once the walk is done.
        for (dir, meta) in dirs.iter().rev() {
            if let Err(err) = apply_dir_metadata(dir, meta) {
                return Err(Error::PartialCopy {
                    copied: report.entries(),
                    source: Box::new(err),
                });
            }
        }

        Ok(report)
    }

    fn copy_entry(
        &self,
        source: &Path,
        destination: &Path,
        entry: &walkdir::DirEntry,
        report: &mut CopyReport,
        dirs: &mut Vec<(PathBuf, Metadata)>,
    ) -> Result<()> {
        let relative = entry
            .path()
            .strip_prefix(source)
            .map(Path::to_path_buf)
            .map_err(|_| unsupported(entry.path()))?;
        let target = destination.join(&relative);
        let meta = entry.metadata().map_err(walk_error)?;

        if meta.is_dir() {
            fs::create_dir_all(&target).with_path(IoOp::CreateDir, &target)?;
            dirs.push((target, meta));
            report.directories += 1;
        } else if meta.is_file() {
            let hash = self.copy_file(entry.path(), &target, &meta)?;
            report.files.push(CopiedFile {
                relative_path: relative,
                hash,
            });
        } else {
            return Err(unsupported(entry.path()));
        }

        tracing::debug!(entry = %entry.path().display(), "copied");
        Ok(())
    }

    fn copy_file(&self, source: &Path, target: &Path, meta: &Metadata) -> Result<Option<u64>> {
        fs::copy(source, target).map_err(|e| {
            // Name whichever side actually failed.
            if fs::metadata(source).is_err() {
                Error::io(IoOp::Read, source, e)
            } else {
                Error::io(IoOp::Copy, target, e)
            }
        })?;

        let atime = FileTime::from_last_access_time(meta);
        let mtime = FileTime::from_last_modification_time(meta);
        filetime::set_file_times(target, atime, mtime).with_path(IoOp::SetTimes, target)?;

        match self.hash_seed {
            Some(seed) => Archive::calc_hash(target, seed).map(Some),
            None => Ok(None),
        }
    }
}

fn source_metadata(source: &Path) -> Result<Metadata> {
    match fs::metadata(source) {
        Ok(meta) => Ok(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(Error::PathNotFound(source.to_path_buf()))
        }
        Err(e) => Err(Error::io(IoOp::Read, source, e)),
    }
}

fn apply_dir_metadata(dir: &Path, meta: &Metadata) -> Result<()> {
    fs::set_permissions(dir, meta.permissions()).with_path(IoOp::SetTimes, dir)?;

    let atime = FileTime::from_last_access_time(meta);
    let mtime = FileTime::from_last_modification_time(meta);
    filetime::set_file_times(dir, atime, mtime).with_path(IoOp::SetTimes, dir)
}

/// Gives the owner full access to every directory under `root`, so a backup
/// that mirrored read-only source directories can be removed again.
pub(crate) fn make_removable(dir: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(dir).with_path(IoOp::Read, dir)?;
    if !meta.is_dir() {
        return Ok(());
    }

    // Fixed before listing, a 0o000 directory couldn't be read otherwise.
    let mut perms = meta.permissions();
    if grant_owner_access(&mut perms) {
        fs::set_permissions(dir, perms).with_path(IoOp::Write, dir)?;
    }

    for entry in fs::read_dir(dir).with_path(IoOp::Read, dir)? {
        let entry = entry.with_path(IoOp::Read, dir)?;
        if entry.file_type().with_path(IoOp::Read, entry.path())?.is_dir() {
            make_removable(&entry.path())?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn grant_owner_access(perms: &mut fs::Permissions) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let mode = perms.mode();
    perms.set_mode(mode | 0o700);
    mode & 0o700 != 0o700
}

#[cfg(not(unix))]
fn grant_owner_access(perms: &mut fs::Permissions) -> bool {
    let readonly = perms.readonly();
    perms.set_readonly(false);
    readonly
}

pub(crate) fn walk_error(err: walkdir::Error) -> Error {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let source = match err.into_io_error() {
        Some(io_err) => io_err,
        None => io::Error::new(io::ErrorKind::Other, "symbolic link loop"),
    };

    Error::io(IoOp::Read, path, source)
}

fn unsupported(path: &Path) -> Error {
    let source = io::Error::new(io::ErrorKind::Other, "not a regular file or directory");
    Error::io(IoOp::Copy, path, source)
}
