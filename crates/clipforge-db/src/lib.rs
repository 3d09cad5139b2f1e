//! Metadata store: durable records for projects, tasks, clips, collections.
//!
//! Typed repositories over sqlx, connected through `DB_URL` (SQLite; the
//! schema keeps to portable SQL so further drivers stay reachable). All
//! status transitions go through compare-and-swap updates; a lost race
//! surfaces as [`DbError::Conflict`] rather than a silent overwrite.

mod db;
mod error;
mod janitor;
mod repo;
mod time;

pub use db::Db;
pub use error::{DbError, DbResult};
pub use janitor::{Janitor, JanitorConfig, JanitorReport};
pub use repo::clip::ClipRepository;
pub use repo::collection::CollectionRepository;
pub use repo::project::{NewProject, ProjectFilter, ProjectRepository, StatusFields};
pub use repo::sync::{SyncOutcome, SyncWriter};
pub use repo::task::TaskRepository;
