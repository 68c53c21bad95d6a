//! Personal anime/manga library tracking with rewatch cycles and pairwise
//! tournament ranking, persisted to a primary SQLite store and a JSON backup.

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod library;
pub mod metadata;
pub mod models;
pub mod rewatch;
pub mod store;
pub mod sync;
pub mod tournament;

pub use app::{AddRequest, DetailView, Tracker};
pub use error::{Error, Result};
pub use models::{Category, Item, ItemKey, MediaType, RecordKey, Status};
