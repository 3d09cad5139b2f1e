//! Application state.

use std::sync::Arc;

use clipforge_content::ContentStore;
use clipforge_db::Db;
use clipforge_queue::{JobQueue, ProgressFabric};

use crate::config::ApiConfig;
use crate::ws::Gateway;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub db: Db,
    pub store: Arc<ContentStore>,
    pub queue: Arc<JobQueue>,
    pub fabric: Arc<ProgressFabric>,
    pub gateway: Arc<Gateway>,
}

impl AppState {
    /// Wire up state from the environment.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let db = Db::from_env().await?;
        let store = Arc::new(ContentStore::from_env().await?);
        let queue = Arc::new(JobQueue::from_env()?);
        let fabric = Arc::new(ProgressFabric::from_env()?);
        let gateway = Arc::new(Gateway::new(Arc::clone(&fabric)));

        Ok(Self {
            config,
            db,
            store,
            queue,
            fabric,
            gateway,
        })
    }
}
