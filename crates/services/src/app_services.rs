use std::sync::Arc;

use storage::repository::Storage;

use crate::catalog::ModuleCatalog;
use crate::error::AppServicesError;
use crate::progression_service::ProgressionService;
use crate::Clock;

/// Assembles app-facing services over a storage backend.
#[derive(Clone)]
pub struct AppServices {
    progression: Arc<ProgressionService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        catalog: ModuleCatalog,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, catalog))
    }

    /// Build services backed by in-memory storage.
    #[must_use]
    pub fn new_in_memory(clock: Clock, catalog: ModuleCatalog) -> Self {
        Self::from_storage(&Storage::in_memory(), clock, catalog)
    }

    fn from_storage(storage: &Storage, clock: Clock, catalog: ModuleCatalog) -> Self {
        let progression = Arc::new(
            ProgressionService::new(catalog, Arc::clone(&storage.progress)).with_clock(clock),
        );
        Self { progression }
    }

    #[must_use]
    pub fn progression(&self) -> Arc<ProgressionService> {
        Arc::clone(&self.progression)
    }
}
