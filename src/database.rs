use crate::archive::query::{GameQuery, SaveQuery};
use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::models::*;
use crate::schema;
use crate::store::MetadataStore;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::DatabaseErrorKind;
use diesel::SqliteConnection;
use std::path::Path;

embed_migrations!("./migrations");

/// SQLite only enforces `REFERENCES` when asked to, per connection.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub struct Database {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Database {
    pub fn new(db_url: &Path) -> Result<Database> {
        let url = db_url
            .to_str()
            .ok_or_else(|| Error::NonUtf8Path(db_url.to_path_buf()))?;
        let manager = ConnectionManager::new(url);
        let pool = Pool::builder()
            .max_size(15)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)?;

        Self::check_db(&pool)?;

        Ok(Database { pool })
    }

    fn check_db(pool: &Pool<ConnectionManager<SqliteConnection>>) -> Result<()> {
        let conn = pool.get()?;

        embedded_migrations::run(&*conn)?;
        Ok(())
    }

    fn get_conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
        Ok(self.pool.get()?)
    }

    fn find_game(conn: &SqliteConnection, query: &GameQuery) -> Result<Option<Game>> {
        use crate::schema::games::dsl::*;

        let found = if let Some(search_id) = query.id {
            games.filter(id.eq(search_id)).first::<Game>(conn).optional()?
        } else if let Some(search_external_id) = &query.external_id {
            games
                .filter(external_id.eq(search_external_id))
                .first::<Game>(conn)
                .optional()?
        } else {
            None
        };

        Ok(found)
    }

    fn find_save_by_backup_path(conn: &SqliteConnection, path: &str) -> Result<Option<Save>> {
        use crate::schema::saves::dsl::*;

        Ok(saves
            .filter(backup_path.eq(path))
            .first::<Save>(conn)
            .optional()?)
    }
}

impl MetadataStore for Database {
    fn create_game(&self, title: &str, external_id: &str) -> Result<Game> {
        let conn = self.get_conn()?;
        let query = GameQuery::new().with_external_id(external_id);

        conn.transaction::<_, Error, _>(|| {
            if Self::find_game(&conn, &query)?.is_some() {
                return Err(Error::DuplicateGame(external_id.to_string()));
            }

            let new_game = NewGame { title, external_id };

            diesel::insert_into(schema::games::table)
                .values(&new_game)
                .execute(&conn)
                .map_err(|e| match e {
                    diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        Error::DuplicateGame(external_id.to_string())
                    }
                    other => Error::Database(other),
                })?;

            Self::find_game(&conn, &query)?
                .ok_or_else(|| Error::GameNotFound(query.describe()))
        })
    }

    fn update_game(&self, game_id: i32, title: &str, external_id: &str) -> Result<Game> {
        let conn = self.get_conn()?;
        let by_id = GameQuery::new().with_id(game_id);

        conn.transaction::<_, Error, _>(|| {
            if Self::find_game(&conn, &by_id)?.is_none() {
                return Err(Error::GameNotFound(by_id.describe()));
            }

            let by_external_id = GameQuery::new().with_external_id(external_id);
            if let Some(other) = Self::find_game(&conn, &by_external_id)? {
                if other.id != game_id {
                    return Err(Error::DuplicateGame(external_id.to_string()));
                }
            }

            let edit = EditGame { title, external_id };
            diesel::update(schema::games::table.find(game_id))
                .set(&edit)
                .execute(&conn)?;

            Self::find_game(&conn, &by_id)?.ok_or_else(|| Error::GameNotFound(by_id.describe()))
        })
    }

    fn get_game(&self, query: GameQuery) -> Result<Option<Game>> {
        let conn = self.get_conn()?;
        Self::find_game(&conn, &query)
    }

    fn get_all_games(&self) -> Result<Vec<Game>> {
        use crate::schema::games::dsl::*;

        let conn = self.get_conn()?;
        Ok(games.order(id.asc()).load::<Game>(&conn)?)
    }

    fn create_save(&self, save: NewSave, manifest: &[ManifestEntry]) -> Result<Save> {
        let conn = self.get_conn()?;
        let game_query = GameQuery::new().with_id(save.game_id);

        conn.transaction::<_, Error, _>(|| {
            if Self::find_game(&conn, &game_query)?.is_none() {
                return Err(Error::GameNotFound(game_query.describe()));
            }

            diesel::insert_into(schema::saves::table)
                .values(&save)
                .execute(&conn)
                .map_err(|e| match e {
                    diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        Error::BackupDirTaken(save.backup_path.into())
                    }
                    other => Error::Database(other),
                })?;

            let created = Self::find_save_by_backup_path(&conn, save.backup_path)?
                .ok_or_else(|| {
                    Error::SaveNotFound(format!("backup path \"{}\"", save.backup_path))
                })?;

            let time = Archive::get_utc_unix_time();
            for entry in manifest {
                let new_file = NewFile {
                    save_id: created.id,
                    file_path: &entry.file_path,
                    file_hash: &entry.file_hash,
                    created_at: time,
                };

                diesel::insert_into(schema::files::table)
                    .values(&new_file)
                    .execute(&conn)?;
            }

            Ok(created)
        })
    }

    fn get_save(&self, query: SaveQuery) -> Result<Option<Save>> {
        use crate::schema::saves::dsl::*;

        let conn = self.get_conn()?;

        if let Some(search_id) = query.id {
            Ok(saves.filter(id.eq(search_id)).first::<Save>(&conn).optional()?)
        } else if let Some(path) = &query.backup_path {
            let path_str = path.to_str().ok_or_else(|| Error::NonUtf8Path(path.clone()))?;
            let found = Self::find_save_by_backup_path(&conn, path_str)?;

            // A backup path only counts when it belongs to the requested game.
            Ok(found.filter(|save| query.game_id.map_or(true, |g| save.game_id == g)))
        } else {
            Ok(None)
        }
    }

    fn get_saves(&self, search_game_id: i32) -> Result<Vec<Save>> {
        use crate::schema::saves::dsl::*;

        let conn = self.get_conn()?;
        Ok(saves
            .filter(game_id.eq(search_game_id))
            .order((created_at.asc(), id.asc()))
            .load::<Save>(&conn)?)
    }

    fn get_files(&self, search_save_id: i32) -> Result<Vec<File>> {
        use crate::schema::files::dsl::*;

        let conn = self.get_conn()?;
        Ok(files
            .filter(save_id.eq(search_save_id))
            .order(file_path.asc())
            .load::<File>(&conn)?)
    }

    fn delete_save(&self, save_id: i32) -> Result<()> {
        let conn = self.get_conn()?;

        conn.transaction::<_, Error, _>(|| {
            use crate::schema::{files, saves};

            diesel::delete(files::table.filter(files::save_id.eq(save_id))).execute(&conn)?;
            let removed = diesel::delete(saves::table.find(save_id)).execute(&conn)?;

            match removed {
                0 => Err(Error::SaveNotFound(format!("id {}", save_id))),
                _ => Ok(()),
            }
        })
    }

    fn delete_game(&self, game_id: i32) -> Result<()> {
        let conn = self.get_conn()?;

        conn.transaction::<_, Error, _>(|| {
            use crate::schema::{files, games, saves};

            let save_ids: Vec<i32> = saves::table
                .filter(saves::game_id.eq(game_id))
                .select(saves::id)
                .load(&conn)?;

            diesel::delete(files::table.filter(files::save_id.eq_any(save_ids))).execute(&conn)?;
            diesel::delete(saves::table.filter(saves::game_id.eq(game_id))).execute(&conn)?;
            let removed = diesel::delete(games::table.find(game_id)).execute(&conn)?;

            match removed {
                0 => Err(Error::GameNotFound(format!("id {}", game_id))),
                _ => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Utc;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn open(test_dir: &TempDir) -> Database {
        let db_path: PathBuf = [test_dir.path(), Path::new("test.db")].iter().collect();
        Database::new(&db_path).unwrap()
    }

    fn new_save<'a>(game_id: i32, backup_path: &'a str) -> NewSave<'a> {
        NewSave {
            game_id,
            source_path: "/home/user/Documents/elden",
            backup_path,
            kind: SaveKind::Directory.as_str(),
            created_at: Utc::now().naive_utc(),
        }
    }

    fn manifest() -> Vec<ManifestEntry> {
        vec![
            ManifestEntry {
                file_path: String::from("ER0000.sl2"),
                file_hash: vec![1, 2, 3, 4, 5, 6, 7, 8],
            },
            ManifestEntry {
                file_path: String::from("steam_autocloud.vdf"),
                file_hash: vec![8, 7, 6, 5, 4, 3, 2, 1],
            },
        ]
    }

    #[test]
    fn write_to_and_migrate_database() {
        let test_dir = TempDir::new().unwrap();
        let db_path: PathBuf = [test_dir.path(), Path::new("test.db")].iter().collect();

        let db = Database::new(&db_path).unwrap();
        let result = db_path.exists();

        drop(db);
        // Migrating an already migrated database is a no-op.
        Database::new(&db_path).unwrap();

        assert!(result);
    }

    #[test]
    fn create_and_get_game() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);

        let game = db.create_game("Elden Ring", "1245620").unwrap();
        let expected = NewGame {
            title: "Elden Ring",
            external_id: "1245620",
        };

        assert_eq!(game, expected);
        assert_eq!(
            db.get_game(GameQuery::new().with_id(game.id)).unwrap(),
            Some(game.clone())
        );
        assert_eq!(
            db.get_game(GameQuery::new().with_external_id("1245620")).unwrap(),
            Some(game)
        );
        assert_eq!(db.get_game(GameQuery::new()).unwrap(), None);
    }

    #[test]
    fn duplicate_external_id_is_conflict() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);

        db.create_game("Elden Ring", "1245620").unwrap();
        let err = db.create_game("Elden Ring (again)", "1245620").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        let all = db.get_all_games().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Elden Ring");
    }

    #[test]
    fn update_game_checks_existence_and_uniqueness() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);

        let elden = db.create_game("Elden Ring", "1245620").unwrap();
        let sekiro = db.create_game("Sekiro", "814380").unwrap();

        let renamed = db.update_game(elden.id, "ELDEN RING", "1245620").unwrap();
        assert_eq!(renamed.title, "ELDEN RING");

        let err = db.update_game(sekiro.id, "Sekiro", "1245620").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = db.update_game(999, "Nope", "0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn create_save_with_manifest() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);

        let game = db.create_game("Elden Ring", "1245620").unwrap();
        let new = new_save(game.id, "saves/1245620/backup_2024-03-09_12-04-05");
        let save = db.create_save(new, &manifest()).unwrap();

        assert_eq!(save, new);
        assert_eq!(save.save_kind().unwrap(), SaveKind::Directory);

        let tracked = db.get_files(save.id).unwrap();
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked[0], manifest()[0]);
        assert_eq!(tracked[1], manifest()[1]);
    }

    #[test]
    fn orphan_save_is_rejected() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);

        let err = db
            .create_save(new_save(42, "saves/x/backup_1"), &manifest())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(db.get_saves(42).unwrap().is_empty());
    }

    #[test]
    fn get_save_by_backup_path_respects_game() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);

        let elden = db.create_game("Elden Ring", "1245620").unwrap();
        let sekiro = db.create_game("Sekiro", "814380").unwrap();
        let path = "saves/1245620/backup_2024-03-09_12-04-05";
        let save = db.create_save(new_save(elden.id, path), &[]).unwrap();

        let query = SaveQuery::new()
            .with_game_id(elden.id)
            .with_backup_path(PathBuf::from(path));
        assert_eq!(db.get_save(query).unwrap(), Some(save));

        let query = SaveQuery::new()
            .with_game_id(sekiro.id)
            .with_backup_path(PathBuf::from(path));
        assert_eq!(db.get_save(query).unwrap(), None);
    }

    #[test]
    fn delete_save_removes_manifest() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);

        let game = db.create_game("Elden Ring", "1245620").unwrap();
        let save = db
            .create_save(new_save(game.id, "saves/1245620/backup_1"), &manifest())
            .unwrap();

        db.delete_save(save.id).unwrap();

        assert!(db.get_saves(game.id).unwrap().is_empty());
        assert!(db.get_files(save.id).unwrap().is_empty());
        assert_eq!(db.delete_save(save.id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn delete_game_cascades() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);

        let game = db.create_game("Elden Ring", "1245620").unwrap();
        let other = db.create_game("Sekiro", "814380").unwrap();
        let first = db
            .create_save(new_save(game.id, "saves/1245620/backup_1"), &manifest())
            .unwrap();
        db.create_save(new_save(game.id, "saves/1245620/backup_2"), &manifest())
            .unwrap();
        let kept = db
            .create_save(new_save(other.id, "saves/814380/backup_1"), &manifest())
            .unwrap();

        db.delete_game(game.id).unwrap();

        assert_eq!(db.get_game(GameQuery::new().with_id(game.id)).unwrap(), None);
        assert!(db.get_saves(game.id).unwrap().is_empty());
        assert!(db.get_files(first.id).unwrap().is_empty());
        assert_eq!(db.get_saves(other.id).unwrap(), vec![kept.clone()]);
        assert_eq!(db.get_files(kept.id).unwrap().len(), 2);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let test_dir = TempDir::new().unwrap();
        let db = open(&test_dir);
        let conn = db.get_conn().unwrap();

        let result = diesel::insert_into(schema::saves::table)
            .values(&new_save(7, "saves/7/backup_1"))
            .execute(&conn);

        assert!(result.is_err());
    }
}
