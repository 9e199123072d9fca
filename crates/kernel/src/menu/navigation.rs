//! Navigation manager: merges extension menu contributions per location.
//!
//! Items are converted to immutable [`MenuItem`] trees when registered.
//! Children are ordered once at registration time; top-level items are
//! ordered on read by priority, then by registration sequence, so two boots
//! that register the same items in the same order produce the same menus.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use trellis_sdk::types::NavigationItem;

/// Deepest nesting accepted by [`NavigationManager::validate`].
pub const MAX_MENU_DEPTH: usize = 8;

/// Opaque capability check used to filter menus per viewer.
pub trait CapabilityCheck: Send + Sync {
    fn allows(&self, permission: &str) -> bool;
}

impl<F> CapabilityCheck for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn allows(&self, permission: &str) -> bool {
        self(permission)
    }
}

/// A capability check that grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl CapabilityCheck for AllowAll {
    fn allows(&self, _permission: &str) -> bool {
        true
    }
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("extension '{extension}': invalid navigation: {}", .violations.join("; "))]
    Invalid {
        extension: String,
        violations: Vec<String>,
    },
}

/// A merged navigation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    /// `<extension>.<id>`, or `<extension>.<path>` for items without an id,
    /// where the path's first segment counts the extension's top-level items
    /// across every `register_items` call.
    pub key: String,
    pub label: String,
    pub target: String,
    pub location: String,
    pub priority: i32,
    pub owning_extension: String,
    pub permission: Option<String>,
    pub group: Option<String>,
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    fn count(&self) -> usize {
        1 + self.children.iter().map(MenuItem::count).sum::<usize>()
    }

    fn visible_to(&self, capabilities: &dyn CapabilityCheck) -> Option<MenuItem> {
        if self
            .permission
            .as_deref()
            .is_some_and(|permission| !capabilities.allows(permission))
        {
            return None;
        }

        Some(MenuItem {
            children: self
                .children
                .iter()
                .filter_map(|child| child.visible_to(capabilities))
                .collect(),
            ..self.clone()
        })
    }
}

/// One step of a breadcrumb trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub label: String,
    pub target: String,
}

/// Counts reported by [`NavigationManager::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NavigationStats {
    /// Every item, children included.
    pub total: usize,
    pub by_extension: BTreeMap<String, usize>,
    pub by_location: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    item: Arc<MenuItem>,
}

#[derive(Debug, Default)]
struct NavState {
    locations: HashMap<String, Vec<Entry>>,
    next_seq: u64,
    /// Top-level items registered per extension, for unnamed keys.
    registered: HashMap<String, usize>,
}

/// Per-location store of extension navigation contributions.
#[derive(Debug, Default)]
pub struct NavigationManager {
    state: RwLock<NavState>,
}

impl NavigationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension's items to the slots their `location`s name.
    ///
    /// The whole batch is validated first; nothing is added if any item is
    /// invalid. Returns the number of top-level items added.
    pub fn register_items(
        &self,
        extension: &str,
        items: Vec<NavigationItem>,
    ) -> Result<usize, NavigationError> {
        let violations = Self::validate(&items);
        if !violations.is_empty() {
            return Err(NavigationError::Invalid {
                extension: extension.to_string(),
                violations,
            });
        }

        let mut state = self.state.write();
        let offset = state.registered.get(extension).copied().unwrap_or(0);
        let count = items.len();
        state.registered.insert(extension.to_string(), offset + count);

        for (index, item) in items.iter().enumerate() {
            let converted = convert(
                extension,
                item,
                item.location_or_default(),
                &(offset + index).to_string(),
            );
            let seq = state.next_seq;
            state.next_seq += 1;
            state
                .locations
                .entry(converted.location.clone())
                .or_default()
                .push(Entry {
                    seq,
                    item: Arc::new(converted),
                });
        }

        debug!(extension, count, "registered navigation items");
        Ok(count)
    }

    /// Top-level items for `location`, by priority then registration order.
    pub fn get_menu(&self, location: &str) -> Vec<Arc<MenuItem>> {
        let state = self.state.read();
        let Some(entries) = state.locations.get(location) else {
            return Vec::new();
        };

        let mut entries: Vec<&Entry> = entries.iter().collect();
        entries.sort_by_key(|entry| (entry.item.priority, entry.seq));
        entries.into_iter().map(|e| Arc::clone(&e.item)).collect()
    }

    /// The menu for `location` with items the viewer may not see removed.
    pub fn menu_for(&self, location: &str, capabilities: &dyn CapabilityCheck) -> Vec<MenuItem> {
        self.get_menu(location)
            .iter()
            .filter_map(|item| item.visible_to(capabilities))
            .collect()
    }

    /// Remove every contribution of `extension` from every slot.
    pub fn remove_items(&self, extension: &str) -> usize {
        let mut state = self.state.write();
        let mut removed = 0;

        for entries in state.locations.values_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.item.owning_extension != extension);
            removed += before - entries.len();
        }
        state.locations.retain(|_, entries| !entries.is_empty());
        state.registered.remove(extension);

        if removed > 0 {
            debug!(extension, removed, "removed navigation items");
        }
        removed
    }

    /// Label path from the top of `location` down to the first item whose
    /// target is `target`. Empty when nothing matches.
    pub fn breadcrumbs(&self, location: &str, target: &str) -> Vec<Breadcrumb> {
        let mut trail = Vec::new();
        for item in self.get_menu(location) {
            if trail_to(&item, target, &mut trail) {
                return trail;
            }
        }
        Vec::new()
    }

    /// Known locations, sorted.
    pub fn locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = self.state.read().locations.keys().cloned().collect();
        locations.sort();
        locations
    }

    pub fn stats(&self) -> NavigationStats {
        let state = self.state.read();
        let mut stats = NavigationStats::default();

        for (location, entries) in &state.locations {
            for entry in entries {
                let count = entry.item.count();
                stats.total += count;
                *stats
                    .by_extension
                    .entry(entry.item.owning_extension.clone())
                    .or_default() += count;
                *stats.by_location.entry(location.clone()).or_default() += count;
            }
        }

        stats
    }

    /// Every problem with a batch of items.
    pub fn validate(items: &[NavigationItem]) -> Vec<String> {
        let mut errors = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let location = item.location_or_default();
            validate_item(item, location, &index.to_string(), 1, &mut Vec::new(), &mut errors);
        }
        errors
    }
}

fn convert(extension: &str, item: &NavigationItem, location: &str, path: &str) -> MenuItem {
    let key = match &item.id {
        Some(id) => format!("{extension}.{id}"),
        None => format!("{extension}.{path}"),
    };

    let mut children: Vec<MenuItem> = item
        .children
        .iter()
        .enumerate()
        .map(|(index, child)| convert(extension, child, location, &format!("{path}.{index}")))
        .collect();
    // Stable, so equal priorities keep declared order.
    children.sort_by_key(|child| child.priority);

    MenuItem {
        key,
        label: item.label.clone(),
        target: item.target.clone(),
        location: location.to_string(),
        priority: item.priority,
        owning_extension: extension.to_string(),
        permission: item.permission.clone(),
        group: item.group.clone(),
        children,
    }
}

fn trail_to(item: &MenuItem, target: &str, trail: &mut Vec<Breadcrumb>) -> bool {
    trail.push(Breadcrumb {
        label: item.label.clone(),
        target: item.target.clone(),
    });
    if item.target == target {
        return true;
    }
    for child in &item.children {
        if trail_to(child, target, trail) {
            return true;
        }
    }
    trail.pop();
    false
}

fn validate_item<'a>(
    item: &'a NavigationItem,
    location: &str,
    path: &str,
    depth: usize,
    ancestors: &mut Vec<&'a str>,
    errors: &mut Vec<String>,
) {
    let name = item.id.as_deref().unwrap_or(path);

    if item.label.trim().is_empty() {
        errors.push(format!("Navigation item '{name}' is missing a label"));
    }
    if item.target.trim().is_empty() {
        errors.push(format!("Navigation item '{name}' is missing a target"));
    } else if ancestors.contains(&item.target.as_str()) {
        errors.push(format!(
            "Navigation item '{name}' links back to ancestor target '{}'",
            item.target
        ));
    }
    if depth > MAX_MENU_DEPTH {
        errors.push(format!(
            "Navigation item '{name}' is nested deeper than {MAX_MENU_DEPTH} levels"
        ));
        return;
    }

    ancestors.push(&item.target);
    for (index, child) in item.children.iter().enumerate() {
        let child_path = format!("{path}.{index}");
        if let Some(child_location) = &child.location
            && child_location != location
        {
            let child_name = child.id.as_deref().unwrap_or(&child_path);
            errors.push(format!(
                "Navigation item '{child_name}' declares location '{child_location}' but its parent is in '{location}'"
            ));
        }
        validate_item(child, location, &child_path, depth + 1, ancestors, errors);
    }
    ancestors.pop();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn labels(items: &[Arc<MenuItem>]) -> Vec<&str> {
        items.iter().map(|i| i.label.as_str()).collect()
    }

    #[test]
    fn menu_sorted_by_priority_then_registration() {
        let nav = NavigationManager::new();
        nav.register_items(
            "a",
            vec![
                NavigationItem::new("A1", "/a1").priority(10),
                NavigationItem::new("A2", "/a2").priority(5),
            ],
        )
        .unwrap();
        nav.register_items("b", vec![NavigationItem::new("B1", "/b1").priority(5)])
            .unwrap();

        assert_eq!(labels(&nav.get_menu("main")), vec!["A2", "B1", "A1"]);
    }

    #[test]
    fn items_land_in_their_location() {
        let nav = NavigationManager::new();
        nav.register_items(
            "admin",
            vec![
                NavigationItem::new("Dashboard", "/admin").at("admin"),
                NavigationItem::new("Home", "/"),
            ],
        )
        .unwrap();

        assert_eq!(labels(&nav.get_menu("admin")), vec!["Dashboard"]);
        assert_eq!(labels(&nav.get_menu("main")), vec!["Home"]);
        assert!(nav.get_menu("footer").is_empty());
    }

    #[test]
    fn children_are_sorted_and_inherit_location() {
        let nav = NavigationManager::new();
        nav.register_items(
            "blog",
            vec![
                NavigationItem::new("Blog", "/blog")
                    .with_id("root")
                    .at("admin")
                    .child(NavigationItem::new("Tags", "/blog/tags").priority(20))
                    .child(NavigationItem::new("Posts", "/blog/posts").priority(10)),
            ],
        )
        .unwrap();

        let menu = nav.get_menu("admin");
        assert_eq!(menu[0].key, "blog.root");
        let children: Vec<_> = menu[0].children.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(children, vec!["Posts", "Tags"]);
        assert!(menu[0].children.iter().all(|c| c.location == "admin"));
        assert_eq!(menu[0].children[1].key, "blog.0.0");
    }

    #[test]
    fn remove_items_leaves_other_extensions_in_order() {
        let nav = NavigationManager::new();
        nav.register_items("a", vec![NavigationItem::new("A", "/a")]).unwrap();
        nav.register_items("b", vec![NavigationItem::new("B1", "/b1")]).unwrap();
        nav.register_items("a", vec![NavigationItem::new("A2", "/a2").at("footer")])
            .unwrap();
        nav.register_items("c", vec![NavigationItem::new("C", "/c")]).unwrap();

        assert_eq!(nav.remove_items("a"), 2);
        assert_eq!(labels(&nav.get_menu("main")), vec!["B1", "C"]);
        assert!(nav.get_menu("footer").is_empty());
        assert_eq!(nav.locations(), vec!["main"]);
    }

    #[test]
    fn unnamed_keys_stay_unique_across_batches() {
        let nav = NavigationManager::new();
        nav.register_items("a", vec![NavigationItem::new("A1", "/a1")]).unwrap();
        nav.register_items(
            "a",
            vec![
                NavigationItem::new("A2", "/a2").child(NavigationItem::new("A2a", "/a2/a")),
                NavigationItem::new("A3", "/a3"),
            ],
        )
        .unwrap();
        nav.register_items("b", vec![NavigationItem::new("B1", "/b1")]).unwrap();

        let menu = nav.get_menu("main");
        let keys: Vec<_> = menu.iter().map(|item| item.key.as_str()).collect();
        assert_eq!(keys, vec!["a.0", "a.1", "a.2", "b.0"]);
        assert_eq!(menu[1].children[0].key, "a.1.0");

        // Numbering restarts once an extension's items are withdrawn.
        nav.remove_items("a");
        nav.register_items("a", vec![NavigationItem::new("A1", "/a1")]).unwrap();
        let keys: Vec<_> = nav.get_menu("main").iter().map(|i| i.key.clone()).collect();
        assert_eq!(keys, vec!["b.0", "a.0"]);
    }

    #[test]
    fn validate_reports_every_problem() {
        let items = vec![
            NavigationItem::new("", ""),
            NavigationItem::new("Parent", "/p")
                .child(NavigationItem::new("Loop", "/p"))
                .child(NavigationItem::new("Elsewhere", "/e").at("footer")),
        ];

        let errors = NavigationManager::validate(&items);
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("missing a label")));
        assert!(errors.iter().any(|e| e.contains("missing a target")));
        assert!(errors.iter().any(|e| e.contains("ancestor target '/p'")));
        assert!(errors.iter().any(|e| e.contains("location 'footer'")));
    }

    #[test]
    fn invalid_batch_adds_nothing() {
        let nav = NavigationManager::new();
        let err = nav
            .register_items(
                "bad",
                vec![
                    NavigationItem::new("Fine", "/fine"),
                    NavigationItem::new("Self", "/self").child(NavigationItem::new("Again", "/self")),
                ],
            )
            .unwrap_err();

        assert!(err.to_string().contains("bad"));
        assert!(nav.get_menu("main").is_empty());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut item = NavigationItem::new("L9", "/9");
        for level in (1..=8).rev() {
            item = NavigationItem::new(format!("L{level}"), format!("/{level}")).child(item);
        }

        let errors = NavigationManager::validate(&[item]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("deeper than 8"));
    }

    #[test]
    fn menu_for_filters_by_permission() {
        let nav = NavigationManager::new();
        nav.register_items(
            "admin",
            vec![
                NavigationItem::new("Public", "/"),
                NavigationItem::new("Admin", "/admin")
                    .permission("administer site")
                    .child(NavigationItem::new("Users", "/admin/users")),
                NavigationItem::new("Content", "/content")
                    .child(NavigationItem::new("Delete", "/content/delete").permission("delete")),
            ],
        )
        .unwrap();

        let anonymous = |_: &str| false;
        let menu = nav.menu_for("main", &anonymous);
        let labels: Vec<_> = menu.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Public", "Content"]);
        assert!(menu[1].children.is_empty());

        assert_eq!(nav.menu_for("main", &AllowAll).len(), 3);
    }

    #[test]
    fn breadcrumbs_follow_path() {
        let nav = NavigationManager::new();
        nav.register_items(
            "blog",
            vec![
                NavigationItem::new("Blog", "/blog")
                    .child(NavigationItem::new("Posts", "/blog/posts")),
            ],
        )
        .unwrap();

        let trail: Vec<_> = nav
            .breadcrumbs("main", "/blog/posts")
            .into_iter()
            .map(|b| b.label)
            .collect();
        assert_eq!(trail, vec!["Blog", "Posts"]);
        assert!(nav.breadcrumbs("main", "/missing").is_empty());
    }

    #[test]
    fn stats_count_children() {
        let nav = NavigationManager::new();
        nav.register_items(
            "blog",
            vec![
                NavigationItem::new("Blog", "/blog").child(NavigationItem::new("Posts", "/posts")),
                NavigationItem::new("Settings", "/settings").at("admin"),
            ],
        )
        .unwrap();

        let stats = nav.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_extension.get("blog"), Some(&3));
        assert_eq!(stats.by_location.get("main"), Some(&2));
        assert_eq!(stats.by_location.get("admin"), Some(&1));
    }
}
