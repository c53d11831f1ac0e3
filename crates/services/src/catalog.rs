use std::collections::HashMap;
use std::sync::Arc;

use lesson_core::model::{Module, ModuleId};

use crate::error::CatalogError;

/// Registered curriculum modules, shared read-only by the engine.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: HashMap<ModuleId, Arc<Module>>,
}

impl ModuleCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated module.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DuplicateModule` if a module with the same id
    /// is already registered.
    pub fn register(&mut self, module: Module) -> Result<Arc<Module>, CatalogError> {
        let id = module.id();
        if self.modules.contains_key(&id) {
            return Err(CatalogError::DuplicateModule(id));
        }
        let module = Arc::new(module);
        self.modules.insert(id, Arc::clone(&module));
        Ok(module)
    }

    /// Parse, validate and register a module definition.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Curriculum` for malformed or invalid JSON and
    /// `CatalogError::DuplicateModule` for an id clash.
    pub fn register_json(&mut self, raw: &str) -> Result<Arc<Module>, CatalogError> {
        let module = Module::from_json(raw)?;
        self.register(module)
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<Arc<Module>> {
        self.modules.get(&id).cloned()
    }

    /// Registered module ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.modules.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::CurriculumError;

    const MODULE: &str = r#"{
        "id": 4,
        "title": "Catalog",
        "lessons": [
            { "id": 1, "title": "Intro", "kind": "video", "watch_threshold_percent": 90, "quiz": null }
        ]
    }"#;

    #[test]
    fn register_json_then_get() {
        let mut catalog = ModuleCatalog::new();
        let module = catalog.register_json(MODULE).unwrap();
        assert_eq!(module.id(), ModuleId::new(4));
        assert_eq!(catalog.get(ModuleId::new(4)).unwrap().lesson_count(), 1);
        assert!(catalog.get(ModuleId::new(5)).is_none());
        assert_eq!(catalog.ids(), vec![ModuleId::new(4)]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut catalog = ModuleCatalog::new();
        catalog.register_json(MODULE).unwrap();
        let err = catalog.register_json(MODULE).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateModule(id) if id == ModuleId::new(4)));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let mut catalog = ModuleCatalog::new();
        let err = catalog
            .register_json(r#"{ "id": 1, "title": "Empty", "lessons": [] }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Curriculum(CurriculumError::EmptyModule)
        ));
        assert!(catalog.is_empty());
    }

    #[test]
    fn bundled_demo_module_is_valid() {
        let mut catalog = ModuleCatalog::new();
        let module = catalog
            .register_json(include_str!("../../../demos/intro-module.json"))
            .unwrap();
        assert_eq!(module.lesson_count(), 3);
        assert!(module.lesson_at(2).unwrap().quiz().is_none());
    }
}
