#![forbid(unsafe_code)]

pub mod app_services;
pub mod catalog;
pub mod error;
pub mod locks;
pub mod progression_service;

pub use lesson_core::Clock;

pub use app_services::AppServices;
pub use catalog::ModuleCatalog;
pub use error::{AppServicesError, CatalogError, ProgressionServiceError};
pub use progression_service::{LessonAccess, ProgressionService};
