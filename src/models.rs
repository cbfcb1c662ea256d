use crate::error::Error;
use crate::schema::{files, games, saves};
use chrono::naive::NaiveDateTime;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Queryable)]
pub struct Game {
    pub id: i32,
    pub title: String,
    pub external_id: String,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "games"]
pub struct NewGame<'a> {
    pub title: &'a str,
    pub external_id: &'a str,
}

#[derive(Clone, Copy, Debug, AsChangeset)]
#[table_name = "games"]
pub struct EditGame<'a> {
    pub title: &'a str,
    pub external_id: &'a str,
}

impl PartialEq<NewGame<'_>> for Game {
    fn eq(&self, other: &NewGame) -> bool {
        self.title == other.title && self.external_id == other.external_id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Queryable)]
pub struct Save {
    pub id: i32,
    pub game_id: i32,
    pub source_path: String,
    pub backup_path: String,
    pub kind: String,
    pub created_at: NaiveDateTime,
}

impl Save {
    pub fn save_kind(&self) -> Result<SaveKind, Error> {
        self.kind.parse().map_err(|_| Error::UnknownSaveKind {
            save_id: self.id,
            kind: self.kind.clone(),
        })
    }

    pub fn backup_dir(&self) -> &Path {
        Path::new(&self.backup_path)
    }

    pub fn source(&self) -> &Path {
        Path::new(&self.source_path)
    }
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "saves"]
pub struct NewSave<'a> {
    pub game_id: i32,
    pub source_path: &'a str,
    pub backup_path: &'a str,
    pub kind: &'a str,
    pub created_at: NaiveDateTime,
}

impl PartialEq<NewSave<'_>> for Save {
    fn eq(&self, other: &NewSave) -> bool {
        self.game_id == other.game_id
            && self.source_path == other.source_path
            && self.backup_path == other.backup_path
            && self.kind == other.kind
            && self.created_at == other.created_at
    }
}

/// Whether a save was taken from a directory tree or from a single file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveKind {
    Directory,
    File,
}

impl SaveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveKind::Directory => "directory",
            SaveKind::File => "file",
        }
    }
}

impl FromStr for SaveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(SaveKind::Directory),
            "file" => Ok(SaveKind::File),
            other => Err(format!("unknown save kind \"{}\"", other)),
        }
    }
}

impl fmt::Display for SaveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backed-up file: its path relative to the backup directory and its xxHash64.
#[derive(Clone, Debug, Queryable)]
pub struct File {
    pub id: i32,
    pub save_id: i32,
    pub file_path: String,
    pub file_hash: Vec<u8>,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "files"]
pub struct NewFile<'a> {
    pub save_id: i32,
    pub file_path: &'a str,
    pub file_hash: &'a [u8],
    pub created_at: NaiveDateTime,
}

/// A manifest line handed to the store alongside the save it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file_path: String,
    pub file_hash: Vec<u8>,
}

impl PartialEq<ManifestEntry> for File {
    fn eq(&self, other: &ManifestEntry) -> bool {
        self.file_path == other.file_path && self.file_hash == other.file_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archive;
    use crate::error::ErrorKind;

    fn save_of_kind(kind: &str) -> Save {
        Save {
            id: 7,
            game_id: 1,
            source_path: "/home/u/saves/elden".to_string(),
            backup_path: "/data/saves/1245620/backup_2020-06-01_12-00-00".to_string(),
            kind: kind.to_string(),
            created_at: Archive::get_utc_unix_time(),
        }
    }

    #[test]
    fn save_kind_parses_stored_value() {
        assert_eq!(save_of_kind("file").save_kind().unwrap(), SaveKind::File);
        assert_eq!(
            save_of_kind("directory").save_kind().unwrap(),
            SaveKind::Directory
        );
    }

    #[test]
    fn unknown_save_kind_is_an_error() {
        let err = save_of_kind("tarball").save_kind().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Database);
        assert!(matches!(err, Error::UnknownSaveKind { save_id: 7, .. }));
    }
}
