#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod archive;
pub mod config;
pub mod copier;
pub mod database;
pub mod engine;
pub mod error;
mod lock;
pub mod models;
pub mod namer;
mod schema;
pub mod store;

pub use config::{Config, ConfigManager};
pub use database::Database;
pub use engine::{Delta, Engine, EngineConfig};
pub use error::{Error, ErrorKind, Result};
pub use store::MetadataStore;
