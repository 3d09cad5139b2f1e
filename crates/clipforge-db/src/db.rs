//! Connection pool and migrations.

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

use crate::error::DbResult;
use crate::repo::clip::ClipRepository;
use crate::repo::collection::CollectionRepository;
use crate::repo::project::ProjectRepository;
use crate::repo::sync::SyncWriter;
use crate::repo::task::TaskRepository;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle to the metadata store. Cheap to clone; repositories share the pool.
#[derive(Debug, Clone)]
pub struct Db {
    pool: AnyPool,
}

impl Db {
    /// Connect to `url` and run pending migrations.
    pub async fn connect(url: &str) -> DbResult<Self> {
        Self::connect_with(url, 16).await
    }

    async fn connect_with(url: &str, max_connections: u32) -> DbResult<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        MIGRATOR.run(&pool).await?;
        info!("metadata store ready");

        Ok(Self { pool })
    }

    /// Connect using `DB_URL` (default: on-disk SQLite under `./data`).
    pub async fn from_env() -> DbResult<Self> {
        let url = std::env::var("DB_URL")
            .unwrap_or_else(|_| "sqlite://data/clipforge.db?mode=rwc".to_string());
        Self::connect(&url).await
    }

    /// An in-memory store for tests. Single connection: a pooled in-memory
    /// SQLite would hand every connection its own empty database.
    pub async fn in_memory() -> DbResult<Self> {
        Self::connect_with("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn projects(&self) -> ProjectRepository {
        ProjectRepository::new(self.pool.clone())
    }

    pub fn tasks(&self) -> TaskRepository {
        TaskRepository::new(self.pool.clone())
    }

    pub fn clips(&self) -> ClipRepository {
        ClipRepository::new(self.pool.clone())
    }

    pub fn collections(&self) -> CollectionRepository {
        CollectionRepository::new(self.pool.clone())
    }

    pub fn sync_writer(&self) -> SyncWriter {
        SyncWriter::new(self.pool.clone())
    }
}
