use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No game with {0} exists.")]
    GameNotFound(String),
    #[error("No save with {0} exists.")]
    SaveNotFound(String),
    #[error("\"{}\" does not exist on disk.", .0.display())]
    PathNotFound(PathBuf),
    #[error("A game with external id \"{0}\" already exists.")]
    DuplicateGame(String),
    #[error("Unable to find a free backup directory next to \"{}\".", .0.display())]
    BackupDirTaken(PathBuf),
    #[error("Backup directory \"{}\" of save {save_id} is missing.", .path.display())]
    BackupMissing { save_id: i32, path: PathBuf },
    #[error("\"{0}\" can not be used as an external id.")]
    InvalidExternalId(String),
    #[error("\"{}\" is not valid UTF-8.", .0.display())]
    NonUtf8Path(PathBuf),
    #[error("\"{}\" overlaps the backup root and can not be backed up.", .0.display())]
    OverlapsBackupRoot(PathBuf),
    #[error("Save {save_id} has unknown kind \"{kind}\".")]
    UnknownSaveKind { save_id: i32, kind: String },
    #[error("Failed to {op} \"{}\": {source}", .path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Copy stopped after {copied} entries: {source}")]
    PartialCopy {
        copied: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("{cause} Putting \"{}\" back failed as well: {source}", .trash.display())]
    Unstage {
        trash: PathBuf,
        cause: Box<Error>,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    #[error(transparent)]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("Failed to run embedded database migrations: {0}")]
    Migration(#[from] diesel_migrations::RunMigrationsError),
    #[error("Failed to parse config: {0}")]
    ConfigRead(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
    #[error("No valid home directory could be retrieved from the Operating System.")]
    NoHomeDir,
}

/// The coarse categories callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BackupMissing,
    InvalidInput,
    Io,
    Database,
    Config,
}

impl ErrorKind {
    /// HTTP status an API front end should answer with.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound | ErrorKind::BackupMissing => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::InvalidInput => 400,
            ErrorKind::Io | ErrorKind::Database | ErrorKind::Config => 500,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::GameNotFound(_) | Error::SaveNotFound(_) | Error::PathNotFound(_) => {
                ErrorKind::NotFound
            }
            Error::DuplicateGame(_) | Error::BackupDirTaken(_) => ErrorKind::Conflict,
            Error::BackupMissing { .. } => ErrorKind::BackupMissing,
            Error::InvalidExternalId(_) | Error::NonUtf8Path(_) | Error::OverlapsBackupRoot(_) => {
                ErrorKind::InvalidInput
            }
            Error::Io { .. } | Error::PartialCopy { .. } | Error::Unstage { .. } => ErrorKind::Io,
            Error::Database(_)
            | Error::Pool(_)
            | Error::Migration(_)
            | Error::UnknownSaveKind { .. } => ErrorKind::Database,
            Error::ConfigRead(_) | Error::ConfigWrite(_) | Error::NoHomeDir => ErrorKind::Config,
        }
    }

    pub(crate) fn io<P: AsRef<Path>>(op: IoOp, path: P, source: io::Error) -> Error {
        Error::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// The filesystem operation an `Error::Io` failed during.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Copy,
    CreateDir,
    SetTimes,
    Remove,
    Rename,
    Write,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoOp::Read => "read",
            IoOp::Copy => "copy",
            IoOp::CreateDir => "create directory",
            IoOp::SetTimes => "set timestamps of",
            IoOp::Remove => "remove",
            IoOp::Rename => "move",
            IoOp::Write => "write",
        };

        f.write_str(s)
    }
}

/// Attaches the failing operation and path to a raw `io::Result`.
pub(crate) trait IoContext<T> {
    fn with_path<P: AsRef<Path>>(self, op: IoOp, path: P) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path<P: AsRef<Path>>(self, op: IoOp, path: P) -> Result<T> {
        self.map_err(|source| Error::io(op, path, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_operation_and_path() {
        let raw = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = Error::io(IoOp::Remove, "/tmp/saves/123/backup_x", raw);

        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(
            err.to_string(),
            "Failed to remove \"/tmp/saves/123/backup_x\": denied"
        );
    }

    #[test]
    fn partial_copy_counts_as_io() {
        let raw = io::Error::new(io::ErrorKind::Other, "disk full");
        let err = Error::PartialCopy {
            copied: 3,
            source: Box::new(Error::io(IoOp::Copy, "a.sav", raw)),
        };

        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.kind().status_code(), 500);
    }

    #[test]
    fn status_codes_follow_kind() {
        assert_eq!(Error::GameNotFound("id 4".into()).kind().status_code(), 404);
        assert_eq!(Error::DuplicateGame("1245620".into()).kind().status_code(), 409);
        assert_eq!(
            Error::BackupMissing {
                save_id: 1,
                path: PathBuf::from("gone"),
            }
            .kind(),
            ErrorKind::BackupMissing
        );
        assert_eq!(Error::InvalidExternalId("..".into()).kind().status_code(), 400);
        assert_eq!(
            Error::OverlapsBackupRoot(PathBuf::from("/home/u")).kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn unstage_keeps_original_cause() {
        let cause = Error::io(
            IoOp::Remove,
            "saves/1245620/.trash-a",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let err = Error::Unstage {
            trash: PathBuf::from("saves/1245620/.trash-a"),
            cause: Box::new(cause),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };

        assert_eq!(err.kind(), ErrorKind::Io);
        let message = err.to_string();
        assert!(message.starts_with("Failed to remove"));
        assert!(message.ends_with("failed as well: gone"));
    }
}
