//! Where backups live: `<root>/<external_id>/backup_<YYYY-MM-DD_HH-MM-SS>`.
//!
//! Timestamps only resolve to the second, so two backups of one game inside
//! the same second would share a name. [`claim`] settles that by creating the
//! directory itself and falling back to `backup_<ts>_1`, `backup_<ts>_2`, ...

use crate::error::{Error, IoContext, IoOp, Result};
use chrono::NaiveDateTime;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const MAX_SUFFIX: u32 = 99;

pub fn game_dir(root: &Path, external_id: &str) -> PathBuf {
    root.join(external_id)
}

pub fn backup_dir(root: &Path, external_id: &str, now: NaiveDateTime) -> PathBuf {
    let name = format!("backup_{}", now.format(TIMESTAMP_FORMAT));
    game_dir(root, external_id).join(name)
}

/// Creates and returns a backup directory no earlier call has handed out.
pub fn claim(root: &Path, external_id: &str, now: NaiveDateTime) -> Result<PathBuf> {
    let parent = game_dir(root, external_id);
    fs::create_dir_all(&parent).with_path(IoOp::CreateDir, &parent)?;

    let base = backup_dir(root, external_id, now);

    for suffix in 0..=MAX_SUFFIX {
        let candidate = match suffix {
            0 => base.clone(),
            n => {
                let mut name = base.clone().into_os_string();
                name.push(format!("_{}", n));
                PathBuf::from(name)
            }
        };

        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %candidate.display(), "backup directory taken");
                continue;
            }
            Err(e) => return Err(Error::io(IoOp::CreateDir, &candidate, e)),
        }
    }

    Err(Error::BackupDirTaken(base))
}

/// External ids become a single path component under the backup root.
pub fn validate_external_id(external_id: &str) -> Result<()> {
    let mut components = Path::new(external_id).components();

    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == external_id => Ok(()),
        _ => Err(Error::InvalidExternalId(external_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd(2024, 3, 9).and_hms(12, 4, 5)
    }

    #[test]
    fn backup_dir_shape() {
        let actual = backup_dir(Path::new("saves"), "1245620", noon());

        assert_eq!(
            actual,
            PathBuf::from("saves/1245620/backup_2024-03-09_12-04-05")
        );
    }

    #[test]
    fn claim_creates_directory() {
        let test_dir = TempDir::new().unwrap();

        let path = claim(test_dir.path(), "1245620", noon()).unwrap();

        assert!(path.is_dir());
        assert_eq!(path, backup_dir(test_dir.path(), "1245620", noon()));
    }

    #[test]
    fn claim_same_second_suffixes() {
        let test_dir = TempDir::new().unwrap();

        let first = claim(test_dir.path(), "1245620", noon()).unwrap();
        let second = claim(test_dir.path(), "1245620", noon()).unwrap();
        let third = claim(test_dir.path(), "1245620", noon()).unwrap();

        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap(),
            "backup_2024-03-09_12-04-05_1"
        );
        assert_eq!(third.file_name().unwrap(), "backup_2024-03-09_12-04-05_2");
        assert!(first.is_dir() && second.is_dir() && third.is_dir());
    }

    #[test]
    fn claim_exhausted_is_conflict() {
        let test_dir = TempDir::new().unwrap();

        for _ in 0..=MAX_SUFFIX {
            claim(test_dir.path(), "1245620", noon()).unwrap();
        }

        let err = claim(test_dir.path(), "1245620", noon()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn external_id_validation() {
        assert!(validate_external_id("1245620").is_ok());
        assert!(validate_external_id("elden-ring.v2").is_ok());

        for bad in &["", ".", "..", "a/b", "/abs", "../up", "x/"] {
            let err = validate_external_id(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{:?}", bad);
        }
    }
}
