use crate::archive::query::{GameQuery, SaveQuery};
use crate::archive::Archive;
use crate::config::Config;
use crate::copier::{make_removable, walk_error, Copier};
use crate::database::Database;
use crate::error::{Error, IoContext, IoOp, Result};
use crate::lock::GameLocks;
use crate::models::{Game, ManifestEntry, NewSave, Save, SaveKind};
use crate::namer;
use crate::store::MetadataStore;
use chrono::Local;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;
use walkdir::WalkDir;

/// Backup directories waiting to be purged are renamed to `.trash-<uuid>`
/// inside their game directory.
pub const TRASH_PREFIX: &str = ".trash-";

/// Everything an [`Engine`] needs, handed over at construction.
pub struct EngineConfig<S> {
    pub store: S,
    pub backup_root: PathBuf,
    pub hash_seed: u64,
}

/// Files of a save's source that differ from what its backup recorded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    pub added: Vec<PathBuf>,
    pub changed: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
struct Staged {
    original: PathBuf,
    trash: PathBuf,
}

pub struct Engine<S: MetadataStore = Database> {
    store: S,
    backup_root: PathBuf,
    hash_seed: u64,
    locks: GameLocks,
    /// Held shared by deletes while they have directories staged, and
    /// exclusively by `purge_trash`.
    trash: RwLock<()>,
}

impl Engine<Database> {
    /// Opens (and migrates) the SQLite store named by `config`.
    pub fn open(config: &Config) -> Result<Engine<Database>> {
        if let Some(parent) = config.db_location.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_path(IoOp::CreateDir, parent)?;
            }
        }

        let store = Database::new(&config.db_location)?;

        Engine::new(EngineConfig {
            store,
            backup_root: config.backup_root.clone(),
            hash_seed: config.hash_seed,
        })
    }
}

impl<S: MetadataStore> Engine<S> {
    pub fn new(config: EngineConfig<S>) -> Result<Engine<S>> {
        let root = &config.backup_root;
        fs::create_dir_all(root).with_path(IoOp::CreateDir, root)?;
        // Save rows outlive the working directory, so they must hold absolute paths.
        let backup_root = fs::canonicalize(root).with_path(IoOp::Read, root)?;

        Ok(Engine {
            store: config.store,
            backup_root,
            hash_seed: config.hash_seed,
            locks: GameLocks::new(),
            trash: RwLock::new(()),
        })
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn register_game(&self, title: &str, external_id: &str) -> Result<Game> {
        namer::validate_external_id(external_id)?;

        let game = self.store.create_game(title, external_id)?;
        tracing::info!(game_id = game.id, external_id, "registered game");
        Ok(game)
    }

    /// Existing backups keep their paths when `external_id` changes.
    pub fn update_game(&self, game_id: i32, title: &str, external_id: &str) -> Result<Game> {
        namer::validate_external_id(external_id)?;

        self.locks.with(game_id, || {
            let game = self.store.update_game(game_id, title, external_id)?;
            tracing::info!(game_id, external_id, "updated game");
            Ok(game)
        })
    }

    pub fn find_game(&self, external_id: &str) -> Result<Game> {
        let query = GameQuery::new().with_external_id(external_id);
        let description = query.describe();

        self.store
            .get_game(query)?
            .ok_or(Error::GameNotFound(description))
    }

    pub fn list_games(&self) -> Result<Vec<Game>> {
        self.store.get_all_games()
    }

    pub fn list_saves(&self, game_id: i32) -> Result<Vec<Save>> {
        self.game_by_id(game_id)?;
        self.store.get_saves(game_id)
    }

    pub fn get_save(&self, save_id: i32) -> Result<Save> {
        self.store
            .get_save(SaveQuery::new().with_id(save_id))?
            .ok_or_else(|| Error::SaveNotFound(format!("id {}", save_id)))
    }

    /// Copies `source` into a fresh backup directory and records it.
    ///
    /// The Save row is only written once every file is on disk. If the copy
    /// or the insert fails, the new backup directory is removed again.
    pub fn backup_save(&self, external_id: &str, source: &Path) -> Result<Save> {
        let game = self.find_game(external_id)?;

        self.locks.with(game.id, || {
            // Deleted while we waited for the lock?
            let game = self.game_by_id(game.id)?;

            let source = match fs::canonicalize(source) {
                Ok(path) => path,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::PathNotFound(source.to_path_buf()))
                }
                Err(e) => return Err(Error::io(IoOp::Read, source, e)),
            };
            if self.backup_root.starts_with(&source) || source.starts_with(&self.backup_root) {
                return Err(Error::OverlapsBackupRoot(source));
            }

            let source_path = source
                .to_str()
                .ok_or_else(|| Error::NonUtf8Path(source.clone()))?;
            let kind = if fs::metadata(&source).with_path(IoOp::Read, &source)?.is_dir() {
                SaveKind::Directory
            } else {
                SaveKind::File
            };

            let now = Local::now().naive_local();
            let destination = namer::claim(&self.backup_root, &game.external_id, now)?;

            let result = self.copy_and_record(&game, &source, source_path, kind, &destination);
            if result.is_err() {
                discard(&destination);
            }

            result
        })
    }

    fn copy_and_record(
        &self,
        game: &Game,
        source: &Path,
        source_path: &str,
        kind: SaveKind,
        destination: &Path,
    ) -> Result<Save> {
        let report = Copier::hashing(self.hash_seed).copy(source, destination)?;

        let manifest: Vec<ManifestEntry> = report
            .files
            .iter()
            .filter_map(|file| {
                file.hash.map(|hash| ManifestEntry {
                    file_path: file.relative_path.to_string_lossy().into_owned(),
                    file_hash: Archive::u64_to_byte_vec(hash),
                })
            })
            .collect();

        let backup_path = destination
            .to_str()
            .ok_or_else(|| Error::NonUtf8Path(destination.to_path_buf()))?;

        let new_save = NewSave {
            game_id: game.id,
            source_path,
            backup_path,
            kind: kind.as_str(),
            created_at: Archive::get_utc_unix_time(),
        };

        let save = self.store.create_save(new_save, &manifest)?;

        tracing::info!(
            save_id = save.id,
            external_id = %game.external_id,
            files = report.files.len(),
            backup = %save.backup_path,
            "backed up save"
        );
        Ok(save)
    }

    /// Copies the backup at `backup_path` back onto the save's original location.
    ///
    /// Nothing is written if the backup directory has gone missing.
    pub fn restore_save(&self, external_id: &str, backup_path: &Path) -> Result<()> {
        let game = self.find_game(external_id)?;
        let backup_path = absolute(backup_path)?;

        self.locks.with(game.id, || {
            let query = SaveQuery::new()
                .with_game_id(game.id)
                .with_backup_path(backup_path);
            let description = query.describe();
            let save = self
                .store
                .get_save(query)?
                .ok_or(Error::SaveNotFound(description))?;

            self.check_backup(&save)?;

            let report =
                Copier::new().restore(save.backup_dir(), save.source(), save.save_kind()?)?;

            tracing::info!(
                save_id = save.id,
                files = report.files.len(),
                target = %save.source_path,
                "restored save"
            );
            Ok(())
        })
    }

    fn check_backup(&self, save: &Save) -> Result<()> {
        let missing = || Error::BackupMissing {
            save_id: save.id,
            path: save.backup_dir().to_path_buf(),
        };

        if !save.backup_dir().is_dir() {
            return Err(missing());
        }

        if save.save_kind()? == SaveKind::File {
            let name = save.source().file_name().ok_or_else(missing)?;
            if !save.backup_dir().join(name).is_file() {
                return Err(missing());
            }
        }

        Ok(())
    }

    /// Removes a save's backup directory, then its row.
    ///
    /// If the directory can't be removed the row is kept.
    pub fn delete_save(&self, save_id: i32) -> Result<()> {
        let save = self.get_save(save_id)?;
        let _trash = self.trash.read().unwrap_or_else(PoisonError::into_inner);

        self.locks.with(save.game_id, || {
            let save = self.get_save(save_id)?;
            self.remove_backups(std::slice::from_ref(&save))?;
            self.store.delete_save(save.id)?;

            tracing::info!(save_id, backup = %save.backup_path, "deleted save");
            Ok(())
        })
    }

    /// Removes a game with all of its saves and their backup directories.
    ///
    /// All backup directories are moved aside before any of them is removed;
    /// if one can't be moved or removed, the ones still intact are put back
    /// and no row is deleted.
    pub fn delete_game(&self, game_id: i32) -> Result<()> {
        let _trash = self.trash.read().unwrap_or_else(PoisonError::into_inner);

        self.locks.with(game_id, || {
            let game = self.game_by_id(game_id)?;
            let saves = self.store.get_saves(game_id)?;
            let removed = self.remove_backups(&saves)?;
            self.store.delete_game(game_id)?;

            tracing::info!(
                game_id,
                external_id = %game.external_id,
                saves = saves.len(),
                "deleted game"
            );

            // Backups taken before an external id change live under the old name.
            let mut game_dirs: BTreeSet<PathBuf> = removed
                .iter()
                .filter_map(|dir| dir.parent().map(Path::to_path_buf))
                .collect();
            game_dirs.insert(namer::game_dir(&self.backup_root, &game.external_id));
            for dir in game_dirs.iter().filter(|dir| **dir != self.backup_root) {
                prune_if_empty(dir);
            }

            Ok(())
        })
    }

    /// Removes trash left behind by deletes that couldn't put a directory back.
    pub fn purge_trash(&self) -> Result<usize> {
        let _trash = self.trash.write().unwrap_or_else(PoisonError::into_inner);
        let mut leftovers = vec![];

        for entry in WalkDir::new(&self.backup_root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(walk_error)?;

            let is_trash = entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.starts_with(TRASH_PREFIX));

            if is_trash && entry.file_type().is_dir() {
                leftovers.push(entry.into_path());
            }
        }

        let mut first_err = None;
        for dir in &leftovers {
            if let Err(err) = remove_tree(dir) {
                tracing::warn!(trash = %dir.display(), error = %err, "unable to purge trash");
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(leftovers.len()),
        }
    }

    /// Compares the save's source against the manifest recorded at backup time.
    pub fn delta(&self, save_id: i32) -> Result<Delta> {
        let save = self.get_save(save_id)?;
        let source = save.source();

        if fs::metadata(source).is_err() {
            return Err(Error::PathNotFound(source.to_path_buf()));
        }

        let mut tracked: HashMap<String, Vec<u8>> = self
            .store
            .get_files(save.id)?
            .into_iter()
            .map(|file| (file.file_path, file.file_hash))
            .collect();

        let live: Vec<(PathBuf, PathBuf)> = match save.save_kind()? {
            SaveKind::File => {
                let name = source
                    .file_name()
                    .map(PathBuf::from)
                    .ok_or_else(|| Error::PathNotFound(source.to_path_buf()))?;
                vec![(name, source.to_path_buf())]
            }
            SaveKind::Directory => {
                let mut live = vec![];

                for entry in WalkDir::new(source).min_depth(1).follow_links(true) {
                    let entry = entry.map_err(walk_error)?;

                    if entry.file_type().is_file() {
                        if let Ok(relative) = entry.path().strip_prefix(source) {
                            live.push((relative.to_path_buf(), entry.path().to_path_buf()));
                        }
                    }
                }

                live
            }
        };

        let mut delta = Delta::default();

        for (relative, absolute) in live {
            let key = relative.to_string_lossy().into_owned();

            match tracked.remove(&key) {
                Some(expected) => {
                    let hash = Archive::calc_hash(&absolute, self.hash_seed)?;
                    if Archive::u64_to_byte_vec(hash) != expected {
                        delta.changed.push(relative);
                    }
                }
                None => delta.added.push(relative),
            }
        }

        delta.removed = tracked.into_iter().map(|(path, _)| PathBuf::from(path)).collect();
        delta.added.sort();
        delta.changed.sort();
        delta.removed.sort();

        Ok(delta)
    }

    fn game_by_id(&self, game_id: i32) -> Result<Game> {
        let query = GameQuery::new().with_id(game_id);
        let description = query.describe();

        self.store
            .get_game(query)?
            .ok_or(Error::GameNotFound(description))
    }

    /// Removes the backup directory of every save in `saves`, returning the
    /// directories that were removed.
    ///
    /// On failure every directory that is still intact is back at its
    /// original path.
    fn remove_backups(&self, saves: &[Save]) -> Result<Vec<PathBuf>> {
        let staged = self.stage(saves)?;

        let opened = staged.iter().try_for_each(|item| make_removable(&item.trash));
        if let Err(err) = opened {
            return Err(unstage(staged, err));
        }

        purge(staged)
    }

    /// Moves every existing backup directory of `saves` to a trash name next to it.
    fn stage(&self, saves: &[Save]) -> Result<Vec<Staged>> {
        let mut present = vec![];

        for save in saves {
            let dir = save.backup_dir();

            match fs::symlink_metadata(dir) {
                Ok(meta) if meta.is_dir() => present.push(dir),
                Ok(_) => {
                    let source = io::Error::new(io::ErrorKind::Other, "not a backup directory");
                    return Err(Error::io(IoOp::Remove, dir, source));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(
                        save_id = save.id,
                        backup = %save.backup_path,
                        "backup already gone"
                    );
                }
                Err(e) => return Err(Error::io(IoOp::Read, dir, e)),
            }
        }

        let mut staged = Vec::with_capacity(present.len());

        for dir in present {
            let parent = dir.parent().unwrap_or_else(|| self.backup_root.as_path());
            let trash = parent.join(format!("{}{}", TRASH_PREFIX, Uuid::new_v4()));

            if let Err(e) = fs::rename(dir, &trash) {
                return Err(unstage(staged, Error::io(IoOp::Rename, dir, e)));
            }

            tracing::debug!(
                from = %dir.display(),
                to = %trash.display(),
                "staged backup for removal"
            );
            staged.push(Staged {
                original: dir.to_path_buf(),
                trash,
            });
        }

        Ok(staged)
    }
}

/// Moves staged directories back, returning `cause` or, if a directory
/// can't be moved back, an error naming both failures.
fn unstage(staged: Vec<Staged>, cause: Error) -> Error {
    for item in staged.into_iter().rev() {
        if let Err(e) = fs::rename(&item.trash, &item.original) {
            tracing::warn!(
                trash = %item.trash.display(),
                original = %item.original.display(),
                error = %e,
                "unable to put staged backup back"
            );
            return Error::Unstage {
                trash: item.trash,
                cause: Box::new(cause),
                source: e,
            };
        }
    }

    cause
}

/// Removes staged directories in order. On the first failure, that directory
/// and the ones not yet touched are unstaged.
fn purge(staged: Vec<Staged>) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::with_capacity(staged.len());
    let mut pending = staged.into_iter();

    while let Some(item) = pending.next() {
        if let Err(err) = remove_tree(&item.trash) {
            let rest = std::iter::once(item).chain(pending).collect();
            return Err(unstage(rest, err));
        }

        removed.push(item.original);
    }

    Ok(removed)
}

fn remove_tree(dir: &Path) -> Result<()> {
    make_removable(dir)?;
    fs::remove_dir_all(dir).with_path(IoOp::Remove, dir)
}

fn prune_if_empty(dir: &Path) {
    let is_empty = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);

    if is_empty {
        if let Err(e) = fs::remove_dir(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "unable to prune game directory");
        }
    }
}

/// `path` made absolute, resolving symlinks when it exists.
fn absolute(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = fs::canonicalize(path) {
        return Ok(canonical);
    }

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().with_path(IoOp::Read, ".")?.join(path)
    };

    // Drops `.` segments and trailing separators.
    Ok(joined.components().collect())
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "unable to clean up failed backup");
    }
}
