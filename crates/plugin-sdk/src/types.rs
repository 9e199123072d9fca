//! Core types shared between extensions and the kernel.
//!
//! Manifests and navigation items are deserialized from `.info.toml` files,
//! content entities arrive from the content layer; none of them are persisted
//! by the kernel itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::render::{BlockDescriptor, LayoutDescriptor, TemplateDescriptor};

/// Default menu slot for top-level navigation items that name none.
pub const DEFAULT_MENU_LOCATION: &str = "main";

/// Default navigation priority (lower sorts first).
pub const DEFAULT_NAV_PRIORITY: i32 = 1000;

/// A piece of content the renderer composes a view for.
///
/// The kernel only reads these fields; how content is stored is up to the
/// content layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentEntity {
    pub id: u64,

    /// Content type classifier (e.g., "page", "post").
    #[serde(rename = "type")]
    pub content_type: String,

    pub title: String,

    #[serde(default)]
    pub slug: String,

    /// Raw body markup or text.
    #[serde(default)]
    pub body: String,

    /// Requested template id.
    #[serde(default)]
    pub template: Option<String>,

    /// Requested layout id.
    #[serde(default)]
    pub layout: Option<String>,

    /// Requested theme id.
    #[serde(default)]
    pub theme: Option<String>,

    /// Ordered block configuration.
    #[serde(default)]
    pub blocks: Vec<BlockConfig>,

    /// Free-form metadata (title/description/keywords overrides, etc.).
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub published_at: Option<String>,
}

impl ContentEntity {
    /// Meta description, if one is set and is a string.
    pub fn meta_description(&self) -> Option<&str> {
        self.meta.get("description").and_then(Value::as_str)
    }
}

/// A block placed in a content entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Block descriptor id this configuration instantiates.
    #[serde(rename = "type")]
    pub block_type: String,

    /// Placement order within the page (lower first).
    #[serde(default)]
    pub position: i32,

    #[serde(default)]
    pub config: serde_json::Map<String, Value>,

    #[serde(default)]
    pub content: Option<Value>,
}

impl BlockConfig {
    pub fn new(block_type: impl Into<String>, position: i32) -> Self {
        Self {
            block_type: block_type.into(),
            position,
            ..Self::default()
        }
    }
}

/// A navigation menu contribution.
///
/// Top-level items without a `location` go to [`DEFAULT_MENU_LOCATION`];
/// children without one inherit their parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationItem {
    /// Extension-local id; the kernel qualifies it as `<extension>.<id>`.
    #[serde(default)]
    pub id: Option<String>,

    pub label: String,

    /// Route name or URL the item links to.
    #[serde(default)]
    pub target: String,

    /// Menu slot name.
    #[serde(default)]
    pub location: Option<String>,

    /// Sort priority, lower first.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Filled in by the kernel at registration time.
    #[serde(default)]
    pub owning_extension: String,

    /// Capability required to see this item; `None` means public.
    #[serde(default)]
    pub permission: Option<String>,

    /// Admin grouping hint (e.g., "content", "settings").
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub children: Vec<NavigationItem>,
}

fn default_priority() -> i32 {
    DEFAULT_NAV_PRIORITY
}

impl NavigationItem {
    /// Create an item for the default menu slot.
    pub fn new(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
            target: target.into(),
            location: None,
            priority: DEFAULT_NAV_PRIORITY,
            owning_extension: String::new(),
            permission: None,
            group: None,
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn child(mut self, child: NavigationItem) -> Self {
        self.children.push(child);
        self
    }

    /// The slot this item lands in when registered at top level.
    pub fn location_or_default(&self) -> &str {
        self.location.as_deref().unwrap_or(DEFAULT_MENU_LOCATION)
    }
}

/// Extension metadata parsed from `<id>.info.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Stable machine id (`[a-z0-9_-]+`).
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Semantic version (e.g., "1.0.0").
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    #[serde(default = "default_category")]
    pub category: String,

    /// Install automatically the first time the extension is discovered.
    #[serde(default = "default_true")]
    pub default_enabled: bool,

    /// Extension id → semver requirement.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub migrations: MigrationConfig,

    #[serde(default)]
    pub provides: Provides,

    /// Inline template descriptors (declarative extensions).
    #[serde(default, rename = "template")]
    pub templates: Vec<TemplateDescriptor>,

    /// Inline layout descriptors (declarative extensions).
    #[serde(default, rename = "layout")]
    pub layouts: Vec<LayoutDescriptor>,

    /// Inline block descriptors (declarative extensions).
    #[serde(default, rename = "block")]
    pub blocks: Vec<BlockDescriptor>,

    /// Navigation contributions (declarative extensions).
    #[serde(default)]
    pub navigation: Vec<NavigationItem>,
}

fn default_category() -> String {
    "other".to_string()
}

fn default_true() -> bool {
    true
}

impl ExtensionManifest {
    /// A minimal manifest; mostly useful for compiled-in extensions and tests.
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            description: String::new(),
            author: String::new(),
            category: default_category(),
            default_enabled: true,
            dependencies: BTreeMap::new(),
            migrations: MigrationConfig::default(),
            provides: Provides::default(),
            templates: Vec::new(),
            layouts: Vec::new(),
            blocks: Vec::new(),
            navigation: Vec::new(),
        }
    }

    /// Add a dependency on `id` satisfying `requirement`.
    pub fn depends_on(mut self, id: impl Into<String>, requirement: impl Into<String>) -> Self {
        self.dependencies.insert(id.into(), requirement.into());
        self
    }
}

/// Migration files shipped with an extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Directory relative to the extension root (default: the root itself).
    #[serde(default)]
    pub path: Option<String>,

    /// SQL files in declared (execution) order.
    #[serde(default)]
    pub files: Vec<String>,
}

/// Descriptor ids an extension promises to register during boot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provides {
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub layouts: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn navigation_item_defaults() {
        let item: NavigationItem =
            serde_json::from_str(r#"{"label": "Posts", "target": "/posts"}"#).unwrap();
        assert_eq!(item.priority, DEFAULT_NAV_PRIORITY);
        assert_eq!(item.location_or_default(), "main");
        assert!(item.children.is_empty());
    }

    #[test]
    fn content_entity_uses_type_key() {
        let entity: ContentEntity = serde_json::from_str(
            r#"{"id": 7, "type": "post", "title": "Hello", "meta": {"description": "d"}}"#,
        )
        .unwrap();
        assert_eq!(entity.content_type, "post");
        assert_eq!(entity.meta_description(), Some("d"));
        assert!(entity.template.is_none());
    }

    #[test]
    fn manifest_builder_sets_name_from_id() {
        let manifest = ExtensionManifest::new("blog", "1.0.0").depends_on("core", "^1");
        assert_eq!(manifest.name, "blog");
        assert_eq!(manifest.dependencies.get("core").map(String::as_str), Some("^1"));
        assert!(manifest.default_enabled);
    }
}
