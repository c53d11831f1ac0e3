//! Shared error types for the services crate.

use thiserror::Error;

use lesson_core::model::{CurriculumError, ModuleId};
use lesson_core::progression::ProgressionError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressionServiceError {
    #[error("module {0} is not registered")]
    UnknownModule(ModuleId),
    #[error(transparent)]
    Progression(#[from] ProgressionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressionServiceError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_transient())
    }
}

/// Errors emitted by `ModuleCatalog` registration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("module {0} is already registered")]
    DuplicateModule(ModuleId),
    #[error(transparent)]
    Curriculum(#[from] CurriculumError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
