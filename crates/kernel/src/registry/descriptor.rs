//! The descriptor abstraction shared by the three registries.

use trellis_sdk::render::{BlockDescriptor, LayoutDescriptor, TemplateDescriptor};

/// Something a [`Registry`](super::Registry) can index.
pub trait Descriptor: Send + Sync + 'static {
    /// Lower-case kind used in diagnostics ("template", "layout", "block").
    const KIND: &'static str;

    /// Capitalised kind used at the start of validation messages.
    const LABEL: &'static str;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn owning_extension(&self) -> &str;
    fn set_owning_extension(&mut self, extension: &str);
    fn category(&self) -> &str;
    fn is_active(&self) -> bool;

    /// Every problem with this descriptor, not just the first.
    fn violations(&self) -> Vec<String>;
}

/// Checks common to every descriptor kind.
fn common_violations<D: Descriptor>(descriptor: &D, component: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let label = D::LABEL;

    if descriptor.id().trim().is_empty() {
        errors.push(format!("{label} ID is required"));
    }
    if descriptor.name().trim().is_empty() {
        errors.push(format!("{label} name is required"));
    }
    if descriptor.owning_extension().trim().is_empty() {
        errors.push(format!("{label} extension is required"));
    }
    if descriptor.category().trim().is_empty() {
        errors.push(format!("{label} category is required"));
    }
    if component.trim().is_empty() {
        errors.push(format!("{label} component is required"));
    }

    errors
}

impl Descriptor for TemplateDescriptor {
    const KIND: &'static str = "template";
    const LABEL: &'static str = "Template";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owning_extension(&self) -> &str {
        &self.owning_extension
    }

    fn set_owning_extension(&mut self, extension: &str) {
        self.owning_extension = extension.to_string();
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn violations(&self) -> Vec<String> {
        let mut errors = common_violations(self, &self.component);

        if self.layouts.is_empty() {
            errors.push("Template must have at least one layout".to_string());
        }
        if let Some(layout) = &self.default_layout
            && !self.supports_layout(layout)
        {
            errors.push(format!(
                "Template default layout '{layout}' is not among its layouts"
            ));
        }
        if let Some(theme) = &self.default_theme
            && !self.supports_theme(theme)
        {
            errors.push(format!(
                "Template default theme '{theme}' is not among its themes"
            ));
        }

        errors
    }
}

impl Descriptor for LayoutDescriptor {
    const KIND: &'static str = "layout";
    const LABEL: &'static str = "Layout";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owning_extension(&self) -> &str {
        &self.owning_extension
    }

    fn set_owning_extension(&mut self, extension: &str) {
        self.owning_extension = extension.to_string();
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn violations(&self) -> Vec<String> {
        common_violations(self, &self.component)
    }
}

impl Descriptor for BlockDescriptor {
    const KIND: &'static str = "block";
    const LABEL: &'static str = "Block";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owning_extension(&self) -> &str {
        &self.owning_extension
    }

    fn set_owning_extension(&mut self, extension: &str) {
        self.owning_extension = extension.to_string();
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn violations(&self) -> Vec<String> {
        common_violations(self, &self.component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_template_reports_every_violation() {
        let template = TemplateDescriptor::default();
        let errors = template.violations();

        assert!(errors.contains(&"Template ID is required".to_string()));
        assert!(errors.contains(&"Template name is required".to_string()));
        assert!(errors.contains(&"Template extension is required".to_string()));
        assert!(errors.contains(&"Template category is required".to_string()));
        assert!(errors.contains(&"Template component is required".to_string()));
        assert!(errors.contains(&"Template must have at least one layout".to_string()));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn template_default_layout_must_be_compatible() {
        let mut template = TemplateDescriptor::new("page.home", "page")
            .with_layouts(["full-width"])
            .default_layout("sidebar");
        template.set_owning_extension("core");

        let errors = template.violations();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("sidebar"));
    }

    #[test]
    fn blocks_do_not_need_layouts() {
        let mut block = BlockDescriptor::new("hero", "hero");
        block.set_owning_extension("core");
        assert!(block.violations().is_empty());
    }

    #[test]
    fn layout_requires_category() {
        let mut layout = LayoutDescriptor::new("sidebar", "");
        layout.set_owning_extension("core");
        assert_eq!(layout.violations(), vec!["Layout category is required"]);
    }
}
