//! Template composition and rendering.
//!
//! Resolves the template, layout, theme and blocks for a content entity
//! against the registries, renders through a pluggable markup renderer,
//! and substitutes built-in views when nothing usable is registered or
//! rendering fails.

mod engine;
mod fallback;
mod renderer;

pub use engine::TeraMarkupRenderer;
pub use fallback::{BUILTIN_TEMPLATE_ID, error_view, minimal_view};
pub use renderer::{RenderOutcome, RenderOverrides, RenderedView, Resolution, TemplateRenderer};
