//! Built-in views used when no registered template can produce markup.

use tera::{Context, Tera};
use tracing::warn;
use trellis_sdk::types::ContentEntity;

/// Id reported for views produced by the built-in minimal template.
pub const BUILTIN_TEMPLATE_ID: &str = "builtin.minimal";

const MINIMAL_VIEW: &str = r#"<article class="trellis-minimal">
<h1>{{ title }}</h1>
{% if description %}<p class="meta-description">{{ description }}</p>
{% endif %}<div class="body">{{ body }}</div>
</article>"#;

const ERROR_VIEW: &str = r#"<div class="trellis-render-error" data-template="{{ template_id }}">
<p>This content could not be displayed with template "{{ template_id }}".</p>
{% if details %}<pre>{{ details }}</pre>
{% endif %}</div>"#;

/// Render the entity's raw title, meta description and body.
///
/// Everything is escaped; the body is shown as text, not markup.
pub fn minimal_view(content: &ContentEntity) -> String {
    let mut context = Context::new();
    context.insert("title", &content.title);
    context.insert("description", &content.meta_description());
    context.insert("body", &content.body);

    Tera::one_off(MINIMAL_VIEW, &context, true).unwrap_or_else(|e| {
        warn!(error = %e, "built-in view failed to render");
        format!(
            "<article class=\"trellis-minimal\"><h1>{}</h1></article>",
            tera::escape_html(&content.title)
        )
    })
}

/// Diagnostic view naming the template that failed. `details` is only
/// passed in development.
pub fn error_view(template_id: &str, details: Option<&str>) -> String {
    let mut context = Context::new();
    context.insert("template_id", template_id);
    context.insert("details", &details);

    Tera::one_off(ERROR_VIEW, &context, true).unwrap_or_else(|e| {
        warn!(error = %e, "built-in error view failed to render");
        format!(
            "<div class=\"trellis-render-error\">Template \"{}\" failed.</div>",
            tera::escape_html(template_id)
        )
    })
}
