//! Renderable descriptors and the markup collaborator contract.
//!
//! Extensions describe templates, layouts and blocks; the kernel decides
//! which combination applies to a piece of content and hands the decision
//! to a [`MarkupRenderer`], which is the only thing that produces markup.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{BlockConfig, ContentEntity};

fn default_true() -> bool {
    true
}

/// A content-type scoped composition unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    /// Globally unique id.
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Set by the kernel at registration; anything the extension puts here is replaced.
    #[serde(default)]
    pub owning_extension: String,

    /// Content type this template applies to (e.g., "page", "post").
    pub category: String,

    /// Reference handed to the markup renderer (e.g., a Tera template path).
    #[serde(default)]
    pub component: String,

    /// Compatible layout ids, in preference order.
    #[serde(default)]
    pub layouts: Vec<String>,

    /// Compatible theme ids, in preference order.
    #[serde(default)]
    pub themes: Vec<String>,

    /// Block types this template knows how to place.
    #[serde(default)]
    pub blocks: Vec<String>,

    #[serde(default)]
    pub default_layout: Option<String>,

    #[serde(default)]
    pub default_theme: Option<String>,

    /// Template-level defaults merged under explicit render overrides.
    #[serde(default)]
    pub settings: Map<String, Value>,

    #[serde(default)]
    pub preview: Option<String>,

    #[serde(default = "default_true", alias = "active")]
    pub is_active: bool,
}

impl TemplateDescriptor {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            component: id.clone(),
            id,
            category: category.into(),
            is_active: true,
            ..Self::default()
        }
    }

    pub fn with_layouts<I, S>(mut self, layouts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layouts = layouts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_themes<I, S>(mut self, themes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.themes = themes.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_layout(mut self, layout: impl Into<String>) -> Self {
        self.default_layout = Some(layout.into());
        self
    }

    pub fn default_theme(mut self, theme: impl Into<String>) -> Self {
        self.default_theme = Some(theme.into());
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether `layout` is declared compatible.
    pub fn supports_layout(&self, layout: &str) -> bool {
        self.layouts.iter().any(|l| l == layout)
    }

    /// Whether `theme` is declared compatible.
    pub fn supports_theme(&self, theme: &str) -> bool {
        self.themes.iter().any(|t| t == theme)
    }
}

/// A structural wrapper selectable within a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub owning_extension: String,

    pub category: String,

    #[serde(default)]
    pub component: String,

    /// Named regions (e.g., "main", "sidebar").
    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default)]
    pub settings: Map<String, Value>,

    #[serde(default = "default_true", alias = "active")]
    pub is_active: bool,
}

impl LayoutDescriptor {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            component: id.clone(),
            id,
            category: category.into(),
            is_active: true,
            ..Self::default()
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A self-contained renderable content unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub owning_extension: String,

    /// Placement family (e.g., "content", "hero", "sidebar").
    pub category: String,

    #[serde(default)]
    pub component: String,

    /// Default block configuration.
    #[serde(default)]
    pub settings: Map<String, Value>,

    #[serde(default = "default_true", alias = "active")]
    pub is_active: bool,
}

impl BlockDescriptor {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            component: id.clone(),
            id,
            category: category.into(),
            is_active: true,
            ..Self::default()
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Everything the markup renderer needs for one view.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub template_id: &'a str,
    /// The template's component reference.
    pub component: &'a str,
    pub layout: Option<&'a str>,
    pub theme: Option<&'a str>,
    pub blocks: &'a [BlockConfig],
    /// Template settings merged with explicit overrides.
    pub config: &'a Map<String, Value>,
    pub content: &'a ContentEntity,
}

/// Errors a markup renderer may return.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The component reference does not resolve to anything renderable.
    #[error("component '{0}' not found")]
    ComponentNotFound(String),

    /// Rendering started but failed.
    #[error("{0}")]
    Failed(String),
}

impl RenderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Produces markup for a resolved template/layout/theme/block combination.
///
/// Implementations must not panic on bad input; every failure is a
/// [`RenderError`].
pub trait MarkupRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn template_defaults_to_active() {
        let template: TemplateDescriptor = serde_json::from_str(
            r#"{"id": "blog.post", "name": "Post", "category": "post", "layouts": ["full"]}"#,
        )
        .unwrap();
        assert!(template.is_active);
        assert!(template.supports_layout("full"));
        assert!(!template.supports_layout("sidebar"));
    }

    #[test]
    fn active_alias_is_accepted() {
        let block: BlockDescriptor = serde_json::from_str(
            r#"{"id": "hero", "name": "Hero", "category": "hero", "active": false}"#,
        )
        .unwrap();
        assert!(!block.is_active);
    }

    #[test]
    fn render_error_messages() {
        assert_eq!(
            RenderError::ComponentNotFound("pages/home".into()).to_string(),
            "component 'pages/home' not found"
        );
        assert_eq!(RenderError::failed("boom").to_string(), "boom");
    }
}
