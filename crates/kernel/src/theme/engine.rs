//! Tera-backed markup renderer.

use std::collections::HashMap;
use std::error::Error as _;
use std::path::Path;

use anyhow::{Context as _, Result};
use dashmap::DashMap;
use tera::{Context, Tera};
use tracing::debug;
use trellis_sdk::render::{MarkupRenderer, RenderError, RenderRequest};

/// Renders `<component>.html` Tera templates.
///
/// A layout-specific `<component>--<layout>.html` is preferred when it
/// exists. The context holds `template_id`, `content`, `layout`, `theme`,
/// `blocks` and `config`.
pub struct TeraMarkupRenderer {
    tera: Tera,
    /// Suggestion list → resolved template name.
    suggestion_cache: DashMap<String, String>,
}

impl TeraMarkupRenderer {
    /// Load every `*.html` file under `template_dir`.
    pub fn new(template_dir: &Path) -> Result<Self> {
        let pattern = template_dir.join("**/*.html");
        let pattern_str = pattern
            .to_str()
            .context("invalid template directory path")?;

        let mut tera = Tera::new(pattern_str).context("failed to initialize Tera templates")?;
        Self::register_filters(&mut tera);

        debug!(count = tera.get_template_names().count(), "loaded templates");
        Ok(Self::from_tera(tera))
    }

    /// A renderer with no templates; add them with [`Self::add_template`].
    pub fn empty() -> Self {
        let mut tera = Tera::default();
        Self::register_filters(&mut tera);
        Self::from_tera(tera)
    }

    fn from_tera(tera: Tera) -> Self {
        Self {
            tera,
            suggestion_cache: DashMap::new(),
        }
    }

    /// Add a template from a string. Names ending in `.html` are autoescaped.
    pub fn add_template(&mut self, name: &str, source: &str) -> Result<()> {
        self.tera
            .add_raw_template(name, source)
            .with_context(|| format!("failed to add template '{name}'"))?;
        self.suggestion_cache.clear();
        Ok(())
    }

    fn register_filters(tera: &mut Tera) {
        // RFC 3339 timestamp → "February 15, 2025"
        tera.register_filter(
            "format_date",
            |value: &tera::Value, _args: &HashMap<String, tera::Value>| {
                let formatted = value
                    .as_str()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.format("%B %-d, %Y").to_string())
                    .unwrap_or_default();
                Ok(tera::Value::String(formatted))
            },
        );
    }

    /// Template suggestions for a component, most specific first.
    pub fn suggestions(component: &str, layout: Option<&str>) -> Vec<String> {
        let mut suggestions = Vec::with_capacity(2);
        if let Some(layout) = layout {
            suggestions.push(format!("{component}--{layout}"));
        }
        suggestions.push(component.to_string());
        suggestions
    }

    /// First suggestion that names a loaded template.
    pub fn resolve_template(&self, suggestions: &[String]) -> Option<String> {
        let cache_key = suggestions.join("|");
        if let Some(cached) = self.suggestion_cache.get(&cache_key) {
            return Some(cached.clone());
        }

        for suggestion in suggestions {
            for name in [format!("{suggestion}.html"), suggestion.clone()] {
                if self.tera.get_template(&name).is_ok() {
                    self.suggestion_cache.insert(cache_key, name.clone());
                    return Some(name);
                }
            }
        }

        None
    }

    pub fn clear_cache(&self) {
        self.suggestion_cache.clear();
    }

    /// Reload templates from disk.
    pub fn reload(&mut self) -> Result<()> {
        self.tera
            .full_reload()
            .context("failed to reload templates")?;
        self.clear_cache();
        Ok(())
    }
}

impl MarkupRenderer for TeraMarkupRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
        let suggestions = Self::suggestions(request.component, request.layout);
        let template = self
            .resolve_template(&suggestions)
            .ok_or_else(|| RenderError::ComponentNotFound(request.component.to_string()))?;

        let mut context = Context::new();
        context.insert("template_id", request.template_id);
        context.insert("content", request.content);
        context.insert("layout", &request.layout);
        context.insert("theme", &request.theme);
        context.insert("blocks", request.blocks);
        context.insert("config", request.config);

        self.tera
            .render(&template, &context)
            .map_err(|e| RenderError::failed(error_chain(&e)))
    }
}

/// Tera nests the useful message in its source chain.
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl std::fmt::Debug for TeraMarkupRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeraMarkupRenderer")
            .field("template_count", &self.tera.get_template_names().count())
            .field("cache_size", &self.suggestion_cache.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::Map;
    use trellis_sdk::types::{BlockConfig, ContentEntity};

    fn request<'a>(
        component: &'a str,
        layout: Option<&'a str>,
        content: &'a ContentEntity,
        config: &'a Map<String, tera::Value>,
    ) -> RenderRequest<'a> {
        RenderRequest {
            template_id: "blog.post",
            component,
            layout,
            theme: Some("dark"),
            blocks: &[],
            config,
            content,
        }
    }

    #[test]
    fn suggestions_prefer_layout() {
        assert_eq!(
            TeraMarkupRenderer::suggestions("blog/post", Some("sidebar")),
            vec!["blog/post--sidebar", "blog/post"]
        );
        assert_eq!(
            TeraMarkupRenderer::suggestions("blog/post", None),
            vec!["blog/post"]
        );
    }

    #[test]
    fn renders_component_with_context() {
        let mut renderer = TeraMarkupRenderer::empty();
        renderer
            .add_template(
                "blog/post.html",
                "{{ content.title }}|{{ layout }}|{{ theme }}|{{ config.accent }}",
            )
            .unwrap();

        let content = ContentEntity {
            title: "A & B".into(),
            ..ContentEntity::default()
        };
        let mut config = Map::new();
        config.insert("accent".into(), "teal".into());

        let html = renderer
            .render(&request("blog/post", Some("full"), &content, &config))
            .unwrap();
        assert_eq!(html, "A &amp; B|full|dark|teal");
    }

    #[test]
    fn layout_specific_template_wins() {
        let mut renderer = TeraMarkupRenderer::empty();
        renderer.add_template("page.html", "generic").unwrap();
        renderer.add_template("page--wide.html", "wide").unwrap();

        let content = ContentEntity::default();
        let config = Map::new();
        let html = renderer
            .render(&request("page", Some("wide"), &content, &config))
            .unwrap();
        assert_eq!(html, "wide");
        let html = renderer
            .render(&request("page", Some("narrow"), &content, &config))
            .unwrap();
        assert_eq!(html, "generic");
    }

    #[test]
    fn blocks_are_iterable() {
        let mut renderer = TeraMarkupRenderer::empty();
        renderer
            .add_template(
                "page.html",
                "{% for block in blocks %}[{{ block.position }}]{% endfor %}",
            )
            .unwrap();

        let content = ContentEntity::default();
        let config = Map::new();
        let blocks = vec![BlockConfig::new("hero", 0), BlockConfig::new("text", 1)];
        let mut req = request("page", None, &content, &config);
        req.blocks = &blocks;

        assert_eq!(renderer.render(&req).unwrap(), "[0][1]");
    }

    #[test]
    fn missing_component_is_an_error() {
        let renderer = TeraMarkupRenderer::empty();
        let content = ContentEntity::default();
        let config = Map::new();
        let err = renderer
            .render(&request("nope", None, &content, &config))
            .unwrap_err();
        assert!(matches!(err, RenderError::ComponentNotFound(c) if c == "nope"));
    }

    #[test]
    fn template_errors_are_returned_not_raised() {
        let mut renderer = TeraMarkupRenderer::empty();
        renderer
            .add_template("broken.html", "{{ content.missing_field.deeper }}")
            .unwrap();

        let content = ContentEntity::default();
        let config = Map::new();
        let err = renderer
            .render(&request("broken", None, &content, &config))
            .unwrap_err();
        assert!(matches!(err, RenderError::Failed(_)));
    }

    #[test]
    fn format_date_filter() {
        let mut renderer = TeraMarkupRenderer::empty();
        renderer
            .add_template("date.html", "{{ content.published_at | format_date }}")
            .unwrap();

        let content = ContentEntity {
            published_at: Some("2025-02-15T00:00:00Z".into()),
            ..ContentEntity::default()
        };
        let config = Map::new();
        let html = renderer
            .render(&request("date", None, &content, &config))
            .unwrap();
        assert_eq!(html, "February 15, 2025");
    }

    #[test]
    fn loads_directory_and_picks_up_edits_on_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pages")).unwrap();
        let article = dir.path().join("pages/article.html");
        std::fs::write(&article, "v1 {{ content.title }}").unwrap();

        let mut renderer = TeraMarkupRenderer::new(dir.path()).unwrap();
        let content = ContentEntity {
            title: "Hello".into(),
            ..ContentEntity::default()
        };
        let config = Map::new();
        let html = renderer
            .render(&request("pages/article", None, &content, &config))
            .unwrap();
        assert_eq!(html, "v1 Hello");
        assert_eq!(renderer.suggestion_cache.len(), 1);

        std::fs::write(&article, "v2 {{ content.title }}").unwrap();
        std::fs::write(dir.path().join("pages/article--wide.html"), "wide").unwrap();
        renderer.reload().unwrap();
        assert!(renderer.suggestion_cache.is_empty());

        let html = renderer
            .render(&request("pages/article", None, &content, &config))
            .unwrap();
        assert_eq!(html, "v2 Hello");
        let html = renderer
            .render(&request("pages/article", Some("wide"), &content, &config))
            .unwrap();
        assert_eq!(html, "wide");

        renderer.clear_cache();
        assert!(renderer.suggestion_cache.is_empty());
    }
}
