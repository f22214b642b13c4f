//! Process-wide table of stage factories.
//!
//! A [`Registry`] is assembled up front and never mutated once shared. The
//! global instance is either installed explicitly with [`Registry::install`]
//! or built from the built-in stages on first use.

use crate::error::{Result, StreamError};
use crate::stage::{
    BrotliStage, EncodeStage, GzipStage, Lz4Stage, StageFactory, StageId, ZipStage, ZstdStage,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<Registry> = OnceLock::new();

#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<StageId, Arc<dyn StageFactory>>,
    suffixes: HashMap<String, StageId>,
}

impl Registry {
    /// No stages at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// gzip, zstd, lz4, brotli, zip and encode
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry
            .register(GzipStage)
            .register(ZstdStage)
            .register(Lz4Stage)
            .register(BrotliStage)
            .register(ZipStage)
            .register(EncodeStage);
        registry
    }

    /// Shared registry, built-ins unless something else was installed first
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Registry::builtin)
    }

    /// Make `registry` the global one. Fails once the global registry exists.
    pub fn install(registry: Registry) -> Result<()> {
        GLOBAL.set(registry).map_err(|_| {
            StreamError::Config("the global stage registry is already initialized".into())
        })
    }

    /// Add or replace a factory, claiming its file suffixes
    pub fn register<F: StageFactory + 'static>(&mut self, factory: F) -> &mut Self {
        let id = factory.id();
        for ext in factory.extensions() {
            self.suffixes.insert(ext.to_ascii_lowercase(), id.clone());
        }
        self.factories.insert(id, Arc::new(factory));
        self
    }

    pub fn with<F: StageFactory + 'static>(mut self, factory: F) -> Self {
        self.register(factory);
        self
    }

    /// Map an extra file suffix to a stage
    pub fn alias(&mut self, suffix: &str, id: StageId) -> &mut Self {
        self.suffixes
            .insert(suffix.trim_start_matches('.').to_ascii_lowercase(), id);
        self
    }

    pub fn factory(&self, id: &StageId) -> Result<&Arc<dyn StageFactory>> {
        self.factories
            .get(id)
            .ok_or_else(|| StreamError::UnknownStage(id.to_string()))
    }

    pub fn contains(&self, id: &StageId) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered stage ids, sorted
    pub fn ids(&self) -> Vec<StageId> {
        let mut ids: Vec<StageId> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Suffixes claimed by `id`, sorted
    pub fn suffixes_for(&self, id: &StageId) -> Vec<&str> {
        let mut found: Vec<&str> = self
            .suffixes
            .iter()
            .filter(|(_, owner)| *owner == id)
            .map(|(suffix, _)| suffix.as_str())
            .collect();
        found.sort_unstable();
        found
    }

    pub fn stage_for_suffix(&self, suffix: &str) -> Option<&StageId> {
        self.suffixes.get(&suffix.to_ascii_lowercase())
    }

    /// Stages implied by a resource name, innermost (rightmost suffix) first.
    ///
    /// Suffixes are peeled right to left until one is not registered, or
    /// `max_depth` suffixes have been taken. Only the final path component is
    /// looked at, leading dots belong to the stem, and the stem itself is
    /// never peeled.
    pub fn infer(&self, name: &str, max_depth: Option<usize>) -> Vec<StageId> {
        let base = name
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(name);
        let trimmed = base.trim_start_matches('.');
        let mut parts: Vec<&str> = trimmed.split('.').collect();
        let limit = max_depth.unwrap_or(usize::MAX);

        let mut stages = Vec::new();
        while parts.len() > 1 && stages.len() < limit {
            let Some(id) = parts.last().and_then(|suffix| self.stage_for_suffix(suffix)) else {
                break;
            };
            stages.push(id.clone());
            parts.pop();
        }
        stages
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("stages", &self.ids())
            .finish()
    }
}
