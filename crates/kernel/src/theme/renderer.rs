//! Template resolution and failure-isolated rendering.
//!
//! [`TemplateRenderer::resolve`] decides which template, layout, theme and
//! blocks apply to a content entity; [`TemplateRenderer::render`] hands that
//! decision to the [`MarkupRenderer`] and turns any error into a fallback
//! view. Nothing here fails: the worst case is the built-in minimal view.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use trellis_sdk::render::{MarkupRenderer, RenderRequest, TemplateDescriptor};
use trellis_sdk::types::{BlockConfig, ContentEntity};

use crate::config::RenderConfig;
use crate::registry::Registries;

use super::fallback::{self, BUILTIN_TEMPLATE_ID};

/// Explicit per-render choices that take precedence over the entity's own.
#[derive(Debug, Clone, Default)]
pub struct RenderOverrides {
    pub template_id: Option<String>,
    pub layout: Option<String>,
    pub theme: Option<String>,
    pub blocks: Option<Vec<BlockConfig>>,
    /// Merged over the template's settings.
    pub config: Map<String, Value>,
}

impl RenderOverrides {
    pub fn template(mut self, id: impl Into<String>) -> Self {
        self.template_id = Some(id.into());
        self
    }

    pub fn layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn blocks(mut self, blocks: Vec<BlockConfig>) -> Self {
        self.blocks = Some(blocks);
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// The composition decision for one render.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// `None` means the built-in minimal template.
    pub template: Option<Arc<TemplateDescriptor>>,
    pub layout: Option<String>,
    pub theme: Option<String>,
    /// Usable blocks ordered by position.
    pub blocks: Vec<BlockConfig>,
    pub config: Map<String, Value>,
    /// One entry per fallback step taken.
    pub notes: Vec<String>,
}

impl Resolution {
    pub fn template_id(&self) -> &str {
        self.template
            .as_ref()
            .map(|t| t.id.as_str())
            .unwrap_or(BUILTIN_TEMPLATE_ID)
    }

    pub fn is_builtin(&self) -> bool {
        self.template.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RenderOutcome {
    /// The markup renderer produced the view.
    Rendered,
    /// No registered template was usable.
    BuiltIn,
    /// The markup renderer failed; a diagnostic view was substituted.
    Failed { error: String },
}

/// Markup plus how it was produced.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedView {
    pub html: String,
    pub template_id: String,
    pub layout: Option<String>,
    pub theme: Option<String>,
    pub outcome: RenderOutcome,
}

impl RenderedView {
    pub fn is_fallback(&self) -> bool {
        self.outcome != RenderOutcome::Rendered
    }
}

/// Resolves templates against the registries and renders them.
pub struct TemplateRenderer {
    registries: Arc<Registries>,
    markup: Arc<dyn MarkupRenderer>,
    config: RenderConfig,
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer")
            .field("config", &self.config)
            .finish()
    }
}

impl TemplateRenderer {
    pub fn new(
        registries: Arc<Registries>,
        markup: Arc<dyn MarkupRenderer>,
        config: RenderConfig,
    ) -> Self {
        Self {
            registries,
            markup,
            config,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Decide what to render. Pure with respect to the registries' current state.
    pub fn resolve(&self, content: &ContentEntity, overrides: &RenderOverrides) -> Resolution {
        let mut notes = Vec::new();
        let template = self.resolve_template(content, overrides, &mut notes);

        let (layout, theme, mut config) = match &template {
            Some(template) => (
                self.resolve_layout(template, content, overrides, &mut notes),
                resolve_theme(template, content, overrides, &mut notes),
                template.settings.clone(),
            ),
            None => (None, None, Map::new()),
        };
        config.extend(overrides.config.clone());

        let blocks = self.resolve_blocks(content, overrides, &mut notes);

        Resolution {
            template,
            layout,
            theme,
            blocks,
            config,
            notes,
        }
    }

    fn usable_template(&self, id: &str) -> Result<Arc<TemplateDescriptor>, String> {
        match self.registries.templates.get(id) {
            Some(t) if t.is_active => Ok(t),
            Some(_) => Err(format!("template '{id}' is inactive")),
            None => Err(format!("template '{id}' is not registered")),
        }
    }

    fn resolve_template(
        &self,
        content: &ContentEntity,
        overrides: &RenderOverrides,
        notes: &mut Vec<String>,
    ) -> Option<Arc<TemplateDescriptor>> {
        let default_id = self.config.default_template.as_str();
        let requested = overrides
            .template_id
            .as_deref()
            .or(content.template.as_deref())
            .unwrap_or(default_id);

        match self.usable_template(requested) {
            Ok(template) => return Some(template),
            Err(reason) => {
                warn!(template = requested, content_id = content.id, "{reason}, falling back");
                notes.push(reason);
            }
        }

        if requested != default_id {
            match self.usable_template(default_id) {
                Ok(template) => {
                    notes.push(format!("using default template '{default_id}'"));
                    return Some(template);
                }
                Err(reason) => {
                    warn!(template = default_id, "default {reason}");
                    notes.push(format!("default {reason}"));
                }
            }
        }

        notes.push("using built-in minimal template".to_string());
        None
    }

    /// Compatible with the template and not registered as inactive.
    fn layout_usable(&self, template: &TemplateDescriptor, layout: &str) -> bool {
        template.supports_layout(layout)
            && self
                .registries
                .layouts
                .get(layout)
                .is_none_or(|l| l.is_active)
    }

    fn resolve_layout(
        &self,
        template: &TemplateDescriptor,
        content: &ContentEntity,
        overrides: &RenderOverrides,
        notes: &mut Vec<String>,
    ) -> Option<String> {
        let requested = overrides.layout.as_deref().or(content.layout.as_deref());
        if let Some(layout) = requested {
            if self.layout_usable(template, layout) {
                return Some(layout.to_string());
            }
            debug!(template = %template.id, layout, "requested layout not usable");
            notes.push(format!(
                "layout '{layout}' is not usable with template '{}'",
                template.id
            ));
        }

        if let Some(default) = template
            .default_layout
            .as_deref()
            .filter(|l| self.layout_usable(template, l))
        {
            return Some(default.to_string());
        }

        let first = template
            .layouts
            .iter()
            .find(|l| self.layout_usable(template, l))
            .cloned();
        if first.is_none() {
            notes.push(format!("template '{}' has no usable layout", template.id));
        }
        first
    }

    fn resolve_blocks(
        &self,
        content: &ContentEntity,
        overrides: &RenderOverrides,
        notes: &mut Vec<String>,
    ) -> Vec<BlockConfig> {
        let source = overrides.blocks.as_ref().unwrap_or(&content.blocks);

        let mut blocks: Vec<BlockConfig> = source
            .iter()
            .filter(|block| match self.registries.blocks.get(&block.block_type) {
                Some(descriptor) if descriptor.is_active => true,
                Some(_) => {
                    notes.push(format!("block '{}' is inactive, dropped", block.block_type));
                    false
                }
                None => {
                    notes.push(format!(
                        "block '{}' is not registered, dropped",
                        block.block_type
                    ));
                    false
                }
            })
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.position);
        blocks
    }

    /// Resolve and render. Never fails.
    pub fn render(&self, content: &ContentEntity, overrides: &RenderOverrides) -> RenderedView {
        let resolution = self.resolve(content, overrides);
        self.render_resolution(content, &resolution)
    }

    /// Render a previously computed [`Resolution`].
    pub fn render_resolution(
        &self,
        content: &ContentEntity,
        resolution: &Resolution,
    ) -> RenderedView {
        let Some(template) = &resolution.template else {
            return RenderedView {
                html: fallback::minimal_view(content),
                template_id: BUILTIN_TEMPLATE_ID.to_string(),
                layout: None,
                theme: None,
                outcome: RenderOutcome::BuiltIn,
            };
        };

        let request = RenderRequest {
            template_id: &template.id,
            component: &template.component,
            layout: resolution.layout.as_deref(),
            theme: resolution.theme.as_deref(),
            blocks: &resolution.blocks,
            config: &resolution.config,
            content,
        };

        let (html, outcome) = match self.markup.render(&request) {
            Ok(html) => (html, RenderOutcome::Rendered),
            Err(e) => {
                warn!(
                    template = %template.id,
                    content_id = content.id,
                    error = %e,
                    "template failed to render, using fallback view"
                );
                let error = e.to_string();
                let details = self
                    .config
                    .environment
                    .is_development()
                    .then_some(error.as_str());
                (
                    fallback::error_view(&template.id, details),
                    RenderOutcome::Failed { error },
                )
            }
        };

        RenderedView {
            html,
            template_id: template.id.clone(),
            layout: resolution.layout.clone(),
            theme: resolution.theme.clone(),
            outcome,
        }
    }
}

fn resolve_theme(
    template: &TemplateDescriptor,
    content: &ContentEntity,
    overrides: &RenderOverrides,
    notes: &mut Vec<String>,
) -> Option<String> {
    let requested = overrides.theme.as_deref().or(content.theme.as_deref());
    if let Some(theme) = requested {
        if template.supports_theme(theme) {
            return Some(theme.to_string());
        }
        notes.push(format!(
            "theme '{theme}' is not compatible with template '{}'",
            template.id
        ));
    }

    template
        .default_theme
        .as_deref()
        .filter(|t| template.supports_theme(t))
        .or_else(|| template.themes.first().map(String::as_str))
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use serde_json::json;
    use trellis_sdk::render::{BlockDescriptor, LayoutDescriptor, RenderError};

    struct Echo;

    impl MarkupRenderer for Echo {
        fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
            if request.template_id == "broken" {
                return Err(RenderError::failed("undefined variable `author`"));
            }
            Ok(format!(
                "{}:{}:{}",
                request.template_id,
                request.layout.unwrap_or("-"),
                request.theme.unwrap_or("-")
            ))
        }
    }

    fn registries() -> Arc<Registries> {
        let registries = Registries::new();
        registries.templates.register_many([
            TemplateDescriptor::new("default", "page").with_layouts(["full"]),
            TemplateDescriptor::new("blog.post", "post")
                .with_layouts(["full", "sidebar", "legacy"])
                .with_themes(["light", "dark"])
                .default_layout("sidebar")
                .default_theme("dark")
                .setting("accent", json!("blue"))
                .setting("columns", json!(2)),
            TemplateDescriptor::new("retired", "post")
                .with_layouts(["full"])
                .inactive(),
            TemplateDescriptor::new("broken", "post").with_layouts(["full"]),
        ]);
        registries
            .layouts
            .register(LayoutDescriptor::new("legacy", "post").inactive());
        registries.blocks.register_many([
            BlockDescriptor::new("hero", "hero"),
            BlockDescriptor::new("text", "content"),
            BlockDescriptor::new("old", "content").inactive(),
        ]);
        Arc::new(registries)
    }

    fn renderer(environment: Environment) -> TemplateRenderer {
        TemplateRenderer::new(
            registries(),
            Arc::new(Echo),
            RenderConfig {
                default_template: "default".into(),
                environment,
            },
        )
    }

    fn post(template: Option<&str>) -> ContentEntity {
        ContentEntity {
            id: 1,
            content_type: "post".into(),
            title: "Hello".into(),
            body: "World".into(),
            template: template.map(str::to_string),
            ..ContentEntity::default()
        }
    }

    #[test]
    fn template_precedence() {
        let r = renderer(Environment::Production);
        let none = RenderOverrides::default();

        assert_eq!(r.resolve(&post(None), &none).template_id(), "default");
        assert_eq!(
            r.resolve(&post(Some("blog.post")), &none).template_id(),
            "blog.post"
        );
        let forced = RenderOverrides::default().template("default");
        assert_eq!(
            r.resolve(&post(Some("blog.post")), &forced).template_id(),
            "default"
        );
    }

    #[test]
    fn missing_or_inactive_template_falls_back_to_default() {
        let r = renderer(Environment::Production);
        let none = RenderOverrides::default();

        let resolution = r.resolve(&post(Some("nope")), &none);
        assert_eq!(resolution.template_id(), "default");
        assert!(resolution.notes[0].contains("not registered"));

        let resolution = r.resolve(&post(Some("retired")), &none);
        assert_eq!(resolution.template_id(), "default");
        assert!(resolution.notes[0].contains("inactive"));
    }

    #[test]
    fn missing_default_uses_builtin_view() {
        let r = TemplateRenderer::new(
            Arc::new(Registries::new()),
            Arc::new(Echo),
            RenderConfig::default(),
        );
        let view = r.render(&post(Some("blog.post")), &RenderOverrides::default());
        assert_eq!(view.outcome, RenderOutcome::BuiltIn);
        assert_eq!(view.template_id, BUILTIN_TEMPLATE_ID);
        assert!(view.html.contains("Hello"));
        assert!(view.html.contains("World"));
    }

    #[test]
    fn layout_resolution() {
        let r = renderer(Environment::Production);
        let content = post(Some("blog.post"));

        let requested = RenderOverrides::default().layout("full");
        assert_eq!(r.resolve(&content, &requested).layout.as_deref(), Some("full"));

        // Incompatible request falls to the template default.
        let unknown = RenderOverrides::default().layout("grid");
        let resolution = r.resolve(&content, &unknown);
        assert_eq!(resolution.layout.as_deref(), Some("sidebar"));
        assert!(resolution.notes.iter().any(|n| n.contains("'grid'")));

        // Registered-but-inactive layouts are skipped.
        let inactive = RenderOverrides::default().layout("legacy");
        assert_eq!(r.resolve(&content, &inactive).layout.as_deref(), Some("sidebar"));
    }

    #[test]
    fn layout_falls_back_to_first_compatible() {
        let registries = Registries::new();
        registries.templates.register(
            TemplateDescriptor::new("default", "page").with_layouts(["stacked", "full"]),
        );
        registries
            .layouts
            .register(LayoutDescriptor::new("stacked", "page").inactive());
        let r = TemplateRenderer::new(Arc::new(registries), Arc::new(Echo), RenderConfig::default());

        let resolution = r.resolve(&post(None), &RenderOverrides::default());
        assert_eq!(resolution.layout.as_deref(), Some("full"));
    }

    #[test]
    fn theme_resolution() {
        let r = renderer(Environment::Production);
        let mut content = post(Some("blog.post"));

        assert_eq!(
            r.resolve(&content, &RenderOverrides::default()).theme.as_deref(),
            Some("dark")
        );

        content.theme = Some("light".into());
        assert_eq!(
            r.resolve(&content, &RenderOverrides::default()).theme.as_deref(),
            Some("light")
        );

        let odd = RenderOverrides::default().theme("neon");
        assert_eq!(r.resolve(&content, &odd).theme.as_deref(), Some("dark"));

        // Templates without themes resolve none.
        assert_eq!(
            r.resolve(&post(None), &odd).theme,
            None
        );
    }

    #[test]
    fn blocks_filtered_and_ordered() {
        let r = renderer(Environment::Production);
        let mut content = post(Some("blog.post"));
        content.blocks = vec![
            BlockConfig::new("text", 2),
            BlockConfig::new("ghost", 0),
            BlockConfig::new("hero", 1),
            BlockConfig::new("old", 0),
            BlockConfig::new("text", 1),
        ];

        let resolution = r.resolve(&content, &RenderOverrides::default());
        let order: Vec<(&str, i32)> = resolution
            .blocks
            .iter()
            .map(|b| (b.block_type.as_str(), b.position))
            .collect();
        assert_eq!(order, vec![("hero", 1), ("text", 1), ("text", 2)]);
        assert_eq!(resolution.notes.len(), 2);

        let overridden = RenderOverrides::default().blocks(vec![BlockConfig::new("text", 0)]);
        assert_eq!(r.resolve(&content, &overridden).blocks.len(), 1);

        let empty = RenderOverrides::default().blocks(Vec::new());
        assert!(r.resolve(&content, &empty).blocks.is_empty());
    }

    #[test]
    fn overrides_take_precedence_in_config() {
        let r = renderer(Environment::Production);
        let overrides = RenderOverrides::default().config("accent", json!("red"));
        let resolution = r.resolve(&post(Some("blog.post")), &overrides);

        assert_eq!(resolution.config["accent"], json!("red"));
        assert_eq!(resolution.config["columns"], json!(2));
    }

    #[test]
    fn collaborator_errors_are_isolated() {
        let view = renderer(Environment::Production)
            .render(&post(Some("broken")), &RenderOverrides::default());
        assert_eq!(view.template_id, "broken");
        assert!(view.is_fallback());
        assert!(view.html.contains("broken"));
        assert!(!view.html.contains("author"));
        assert!(matches!(view.outcome, RenderOutcome::Failed { .. }));

        let view = renderer(Environment::Development)
            .render(&post(Some("broken")), &RenderOverrides::default());
        assert!(view.html.contains("undefined variable"));
    }

    #[test]
    fn successful_render_reports_resolution() {
        let view = renderer(Environment::Production)
            .render(&post(Some("blog.post")), &RenderOverrides::default());
        assert_eq!(view.outcome, RenderOutcome::Rendered);
        assert_eq!(view.html, "blog.post:sidebar:dark");
        assert!(!view.is_fallback());
    }
}
