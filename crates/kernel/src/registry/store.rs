//! Generic keyed descriptor store with by-extension and by-category indices.
//!
//! All three registries (templates, layouts, blocks) are instances of
//! [`Registry`]. Writes happen during extension activation or an
//! administrative operation; reads happen on every render. Descriptors are
//! stored as `Arc`s and replaced wholesale, so a reader holding one never
//! observes a half-updated descriptor.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use super::descriptor::Descriptor;
use super::error::RegistryError;

/// Counts reported by [`Registry::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub by_extension: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

/// An entry for an admin select box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub category: String,
}

#[derive(Debug)]
struct Index<D> {
    entries: HashMap<String, Arc<D>>,
    /// Ids in first-registration order.
    order: Vec<String>,
    by_extension: HashMap<String, Vec<String>>,
    by_category: HashMap<String, Vec<String>>,
}

impl<D> Default for Index<D> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            by_extension: HashMap::new(),
            by_category: HashMap::new(),
        }
    }
}

fn detach(index: &mut HashMap<String, Vec<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

impl<D: Descriptor> Index<D> {
    fn resolve(&self, ids: Option<&Vec<String>>) -> Vec<Arc<D>> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.entries.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    fn insert(&mut self, descriptor: Arc<D>) -> Option<Arc<D>> {
        let id = descriptor.id().to_string();
        let previous = self.entries.insert(id.clone(), Arc::clone(&descriptor));

        match &previous {
            Some(old) => {
                if old.owning_extension() != descriptor.owning_extension() {
                    detach(&mut self.by_extension, old.owning_extension(), &id);
                    self.by_extension
                        .entry(descriptor.owning_extension().to_string())
                        .or_default()
                        .push(id.clone());
                }
                if old.category() != descriptor.category() {
                    detach(&mut self.by_category, old.category(), &id);
                    self.by_category
                        .entry(descriptor.category().to_string())
                        .or_default()
                        .push(id);
                }
            }
            None => {
                self.order.push(id.clone());
                self.by_extension
                    .entry(descriptor.owning_extension().to_string())
                    .or_default()
                    .push(id.clone());
                self.by_category
                    .entry(descriptor.category().to_string())
                    .or_default()
                    .push(id);
            }
        }

        previous
    }

    fn remove(&mut self, id: &str) -> Option<Arc<D>> {
        let removed = self.entries.remove(id)?;
        self.order.retain(|existing| existing != id);
        detach(&mut self.by_extension, removed.owning_extension(), id);
        detach(&mut self.by_category, removed.category(), id);
        Some(removed)
    }
}

/// Keyed store of descriptors of one kind.
#[derive(Debug)]
pub struct Registry<D> {
    inner: RwLock<Index<D>>,
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Index::default()),
        }
    }
}

impl<D: Descriptor> Registry<D> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by id, keeping both secondary indices in step.
    ///
    /// Overwriting is not an error (development reloads rely on it) but is
    /// reported at warning level. Returns the replaced descriptor, if any.
    pub fn register(&self, descriptor: D) -> Option<Arc<D>> {
        let descriptor = Arc::new(descriptor);
        let previous = self.inner.write().insert(Arc::clone(&descriptor));

        match &previous {
            Some(old) => warn!(
                kind = D::KIND,
                id = %descriptor.id(),
                previous_extension = %old.owning_extension(),
                extension = %descriptor.owning_extension(),
                "descriptor already registered, overwriting"
            ),
            None => debug!(
                kind = D::KIND,
                id = %descriptor.id(),
                extension = %descriptor.owning_extension(),
                "registered descriptor"
            ),
        }

        previous
    }

    /// Insert only if the id is free.
    pub fn insert_new(&self, descriptor: D) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.entries.get(descriptor.id()) {
            return Err(RegistryError::Duplicate {
                kind: D::KIND,
                id: descriptor.id().to_string(),
                owner: existing.owning_extension().to_string(),
            });
        }
        inner.insert(Arc::new(descriptor));
        Ok(())
    }

    /// Register several descriptors in order.
    pub fn register_many(&self, descriptors: impl IntoIterator<Item = D>) {
        for descriptor in descriptors {
            self.register(descriptor);
        }
    }

    /// Look up a descriptor by id.
    pub fn get(&self, id: &str) -> Option<Arc<D>> {
        self.inner.read().entries.get(id).cloned()
    }

    /// Check whether an id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    /// All descriptors in registration order.
    pub fn all(&self) -> Vec<Arc<D>> {
        let inner = self.inner.read();
        inner.resolve(Some(&inner.order))
    }

    /// Descriptors in a category, in registration order.
    pub fn list_by_category(&self, category: &str) -> Vec<Arc<D>> {
        let inner = self.inner.read();
        inner.resolve(inner.by_category.get(category))
    }

    /// Descriptors owned by an extension, in registration order.
    pub fn list_by_extension(&self, extension: &str) -> Vec<Arc<D>> {
        let inner = self.inner.read();
        inner.resolve(inner.by_extension.get(extension))
    }

    /// Active descriptors in registration order.
    pub fn list_active(&self) -> Vec<Arc<D>> {
        self.all().into_iter().filter(|d| d.is_active()).collect()
    }

    /// Active descriptors for a content type.
    pub fn active_in_category(&self, category: &str) -> Vec<Arc<D>> {
        self.list_by_category(category)
            .into_iter()
            .filter(|d| d.is_active())
            .collect()
    }

    /// Known categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.inner.read().by_category.keys().cloned().collect();
        categories.sort();
        categories
    }

    /// Remove a descriptor from the primary map and both indices.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.inner.write().remove(id);
        if let Some(descriptor) = &removed {
            debug!(
                kind = D::KIND,
                id,
                extension = %descriptor.owning_extension(),
                "unregistered descriptor"
            );
        }
        removed.is_some()
    }

    /// Remove every descriptor owned by `extension`. Returns how many went.
    pub fn unregister_extension(&self, extension: &str) -> usize {
        let mut inner = self.inner.write();
        let ids = inner.by_extension.get(extension).cloned().unwrap_or_default();
        let count = ids.iter().filter(|id| inner.remove(id).is_some()).count();
        if count > 0 {
            debug!(kind = D::KIND, extension, count, "withdrew extension descriptors");
        }
        count
    }

    /// Validation report for a candidate descriptor.
    pub fn validate(&self, descriptor: &D) -> Vec<String> {
        descriptor.violations()
    }

    /// Options for an admin dropdown: active descriptors, optionally for one category.
    pub fn select_options(&self, category: Option<&str>) -> Vec<SelectOption> {
        let descriptors = match category {
            Some(category) => self.active_in_category(category),
            None => self.list_active(),
        };

        descriptors
            .iter()
            .map(|d| SelectOption {
                value: d.id().to_string(),
                label: d.name().to_string(),
                category: d.category().to_string(),
            })
            .collect()
    }

    /// Totals by extension and category.
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        let mut stats = RegistryStats {
            total: inner.entries.len(),
            ..RegistryStats::default()
        };

        for descriptor in inner.entries.values() {
            if descriptor.is_active() {
                stats.active += 1;
            }
            *stats
                .by_extension
                .entry(descriptor.owning_extension().to_string())
                .or_default() += 1;
            *stats
                .by_category
                .entry(descriptor.category().to_string())
                .or_default() += 1;
        }

        stats
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use trellis_sdk::render::{BlockDescriptor, TemplateDescriptor};

    fn template(id: &str, extension: &str, category: &str) -> TemplateDescriptor {
        let mut template = TemplateDescriptor::new(id, category).with_layouts(["full-width"]);
        template.owning_extension = extension.to_string();
        template
    }

    #[test]
    fn register_then_get_returns_equal_descriptor() {
        let registry = Registry::new();
        let descriptor = template("page.home", "core", "page");

        assert!(registry.register(descriptor.clone()).is_none());
        assert_eq!(*registry.get("page.home").unwrap(), descriptor);
    }

    #[test]
    fn duplicate_register_overwrites() {
        let registry = Registry::new();
        registry.register(template("page.home", "core", "page"));

        let mut replacement = template("page.home", "core", "page");
        replacement.name = "Home v2".to_string();
        let previous = registry.register(replacement);

        assert_eq!(previous.unwrap().name, "page.home");
        assert_eq!(registry.get("page.home").unwrap().name, "Home v2");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_by_extension("core").len(), 1);
        assert_eq!(registry.list_by_category("page").len(), 1);
    }

    #[test]
    fn overwrite_moves_between_indices() {
        let registry = Registry::new();
        registry.register(template("shared", "a", "page"));
        registry.register(template("shared", "b", "post"));

        assert!(registry.list_by_extension("a").is_empty());
        assert!(registry.list_by_category("page").is_empty());
        assert_eq!(registry.list_by_extension("b").len(), 1);
        assert_eq!(registry.list_by_category("post").len(), 1);
        assert_eq!(registry.categories(), vec!["post"]);
    }

    #[test]
    fn unregister_clears_all_indices() {
        let registry = Registry::new();
        registry.register(template("page.home", "core", "page"));
        registry.register(template("page.about", "core", "page"));

        assert!(registry.unregister("page.home"));
        assert!(registry.get("page.home").is_none());
        assert!(
            registry
                .list_by_extension("core")
                .iter()
                .all(|t| t.id != "page.home")
        );
        assert!(
            registry
                .list_by_category("page")
                .iter()
                .all(|t| t.id != "page.home")
        );
        assert!(!registry.unregister("page.home"));
    }

    #[test]
    fn insert_new_rejects_duplicates() {
        let registry = Registry::new();
        registry.insert_new(template("page.home", "core", "page")).unwrap();

        let err = registry
            .insert_new(template("page.home", "blog", "page"))
            .unwrap_err();
        assert!(err.to_string().contains("core"));
        assert_eq!(registry.get("page.home").unwrap().owning_extension, "core");
    }

    #[test]
    fn list_active_and_select_options() {
        let registry = Registry::new();
        registry.register(template("page.home", "core", "page"));
        registry.register(template("page.old", "core", "page").inactive());
        registry.register(template("post.default", "blog", "post"));

        let active: Vec<_> = registry.list_active().iter().map(|t| t.id.clone()).collect();
        assert_eq!(active, vec!["page.home", "post.default"]);

        let options = registry.select_options(Some("page"));
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].value, "page.home");
    }

    #[test]
    fn unregister_extension_leaves_others() {
        let registry = Registry::new();
        registry.register(template("a.one", "a", "page"));
        registry.register(template("a.two", "a", "post"));
        registry.register(template("b.one", "b", "page"));

        assert_eq!(registry.unregister_extension("a"), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("b.one"));
        assert_eq!(registry.unregister_extension("a"), 0);
    }

    #[test]
    fn stats_group_by_extension_and_category() {
        let registry: Registry<BlockDescriptor> = Registry::new();
        let mut hero = BlockDescriptor::new("hero", "hero");
        hero.owning_extension = "core".into();
        let mut text = BlockDescriptor::new("text", "content").inactive();
        text.owning_extension = "core".into();
        registry.register_many([hero, text]);

        let stats = registry.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.by_extension.get("core"), Some(&2));
        assert_eq!(stats.by_category.get("hero"), Some(&1));
    }
}
