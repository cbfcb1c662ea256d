use crate::error::{IoContext, IoOp, Result};
use chrono::prelude::{NaiveDateTime, Utc};
use std::fs::File;
use std::hash::Hasher;
use std::io::Read;
use std::path::Path;
use twox_hash::XxHash64;

const CHUNK_SIZE: usize = 0x4000;

pub struct Archive {}

impl Archive {
    pub fn u64_to_byte_vec(num: u64) -> Vec<u8> {
        use byteorder::{LittleEndian, WriteBytesExt};

        let mut bytes: Vec<u8> = Vec::with_capacity(8);
        // Writing into a Vec can't fail.
        let _ = bytes.write_u64::<LittleEndian>(num);
        bytes
    }

    /// Streams `path` through xxHash64.
    pub fn calc_hash<P: AsRef<Path>>(path: P, seed: u64) -> Result<u64> {
        let path = path.as_ref();
        let mut file = File::open(path).with_path(IoOp::Read, path)?;
        let mut hasher = XxHash64::with_seed(seed);
        let mut chunk = vec![0; CHUNK_SIZE];

        loop {
            let n = file.read(&mut chunk).with_path(IoOp::Read, path)?;
            if n == 0 {
                break;
            }
            hasher.write(&chunk[..n]);
        }

        Ok(hasher.finish())
    }

    /// Gets a unix time stamp in UTC±0:00
    pub fn get_utc_unix_time() -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

pub mod query {
    use std::path::PathBuf;

    #[derive(Debug, Default, PartialEq, Eq)]
    pub struct GameQuery {
        pub id: Option<i32>,
        pub external_id: Option<String>,
    }

    impl GameQuery {
        pub fn new() -> GameQuery {
            GameQuery::default()
        }

        pub fn with_id(mut self, id: i32) -> GameQuery {
            self.id = Some(id);
            self
        }

        pub fn with_external_id(mut self, external_id: &str) -> GameQuery {
            self.external_id = Some(external_id.to_string());
            self
        }

        pub(crate) fn describe(&self) -> String {
            match (self.id, &self.external_id) {
                (Some(id), _) => format!("id {}", id),
                (None, Some(external_id)) => format!("external id \"{}\"", external_id),
                (None, None) => String::from("no criteria"),
            }
        }
    }

    #[derive(Debug, Default, PartialEq, Eq)]
    pub struct SaveQuery {
        pub id: Option<i32>,
        pub game_id: Option<i32>,
        pub backup_path: Option<PathBuf>,
    }

    impl SaveQuery {
        pub fn new() -> SaveQuery {
            SaveQuery::default()
        }

        pub fn with_id(mut self, id: i32) -> SaveQuery {
            self.id = Some(id);
            self
        }

        pub fn with_game_id(mut self, id: i32) -> SaveQuery {
            self.game_id = Some(id);
            self
        }

        pub fn with_backup_path(mut self, path: PathBuf) -> SaveQuery {
            self.backup_path = Some(path);
            self
        }

        pub(crate) fn describe(&self) -> String {
            match (self.id, &self.backup_path) {
                (Some(id), _) => format!("id {}", id),
                (None, Some(path)) => format!("backup path \"{}\"", path.display()),
                (None, None) => String::from("no criteria"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::query::*;
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn convert_u64_to_bytes_valid() {
        let expected: Vec<u8> = vec![162, 237, 204, 196, 230, 7, 254, 234];
        let num: u64 = 16932980336685280674;

        let actual = Archive::u64_to_byte_vec(num);

        assert_eq!(actual, expected);
    }

    #[test]
    fn calc_hash_from_file() {
        let test_dir = TempDir::new().unwrap();
        let file_path = test_dir.path().join("rand.bin");
        let bytes: [u8; 32] = rand::random();

        let mut file = File::create(&file_path).unwrap();
        file.write_all(&bytes).unwrap();

        let expected = {
            let mut hasher = XxHash64::with_seed(1337); // Make sure same seed
            hasher.write(&bytes);

            hasher.finish()
        };

        let actual = Archive::calc_hash(&file_path, 1337).unwrap();

        assert_eq!(actual, expected);
    }

    #[test]
    fn calc_hash_spans_chunks() {
        let test_dir = TempDir::new().unwrap();
        let file_path = test_dir.path().join("big.bin");
        let bytes: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file_path, &bytes).unwrap();

        let expected = {
            let mut hasher = XxHash64::with_seed(7);
            hasher.write(&bytes);
            hasher.finish()
        };

        assert_eq!(Archive::calc_hash(&file_path, 7).unwrap(), expected);
    }

    #[test]
    fn calc_hash_missing_file() {
        use crate::error::ErrorKind;

        let err = Archive::calc_hash("./does/not/exist.sav", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn example_game_query() {
        let actual = GameQuery::new().with_external_id("1245620");

        let expected = GameQuery {
            id: None,
            external_id: Some(String::from("1245620")),
        };

        assert_eq!(actual, expected);
        assert_eq!(actual.describe(), "external id \"1245620\"");
    }

    #[test]
    fn example_save_query() {
        let actual = SaveQuery::new()
            .with_game_id(1)
            .with_backup_path(PathBuf::from("saves/1245620/backup_2024-01-01_00-00-00"));

        let expected = SaveQuery {
            id: None,
            game_id: Some(1),
            backup_path: Some(PathBuf::from("saves/1245620/backup_2024-01-01_00-00-00")),
        };

        assert_eq!(actual, expected);
    }
}
