use crate::archive::query::{GameQuery, SaveQuery};
use crate::error::Result;
use crate::models::{File, Game, ManifestEntry, NewSave, Save};

/// Persistence for games, saves and their file manifests.
///
/// Every method is its own transaction. Implementations must reject a
/// duplicate `external_id` with `Error::DuplicateGame` and a save whose game
/// doesn't exist with `Error::GameNotFound`, changing nothing in either case.
pub trait MetadataStore: Send + Sync {
    fn create_game(&self, title: &str, external_id: &str) -> Result<Game>;

    /// Fails with `Error::GameNotFound` if `id` is unknown.
    fn update_game(&self, id: i32, title: &str, external_id: &str) -> Result<Game>;

    fn get_game(&self, query: GameQuery) -> Result<Option<Game>>;

    fn get_all_games(&self) -> Result<Vec<Game>>;

    /// Inserts the save and its manifest together.
    fn create_save(&self, save: NewSave, files: &[ManifestEntry]) -> Result<Save>;

    fn get_save(&self, query: SaveQuery) -> Result<Option<Save>>;

    /// Oldest first.
    fn get_saves(&self, game_id: i32) -> Result<Vec<Save>>;

    fn get_files(&self, save_id: i32) -> Result<Vec<File>>;

    /// Removes the save row and its manifest.
    fn delete_save(&self, id: i32) -> Result<()>;

    /// Removes the game with every save and manifest it owns.
    fn delete_game(&self, id: i32) -> Result<()>;
}
