//! Staging registrar handed to extension boot hooks.
//!
//! Descriptors submitted during boot are validated and stamped with the
//! owning extension, then held until the hook returns. Only a successful
//! hook gets its contributions committed, so a failing boot never leaves
//! half its descriptors registered.

use std::collections::HashSet;

use tracing::warn;
use trellis_sdk::extension::{BootError, Registrar};
use trellis_sdk::render::{BlockDescriptor, LayoutDescriptor, TemplateDescriptor};
use trellis_sdk::types::{ExtensionManifest, NavigationItem};

use crate::menu::NavigationManager;
use crate::registry::{Descriptor, Registries, Registry};

use super::error::PluginError;

/// What a committed boot contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootSummary {
    pub templates: usize,
    pub layouts: usize,
    pub blocks: usize,
    pub navigation: usize,
}

/// [`Registrar`] implementation used for one activation.
pub struct BootContext<'a> {
    extension: &'a str,
    registries: &'a Registries,
    navigation: &'a NavigationManager,
    strict: bool,
    templates: Vec<TemplateDescriptor>,
    layouts: Vec<LayoutDescriptor>,
    blocks: Vec<BlockDescriptor>,
    items: Vec<NavigationItem>,
}

impl<'a> BootContext<'a> {
    /// In strict mode any id that is already registered, or staged twice,
    /// is rejected instead of overwritten.
    pub fn new(
        extension: &'a str,
        registries: &'a Registries,
        navigation: &'a NavigationManager,
        strict: bool,
    ) -> Self {
        Self {
            extension,
            registries,
            navigation,
            strict,
            templates: Vec::new(),
            layouts: Vec::new(),
            blocks: Vec::new(),
            items: Vec::new(),
        }
    }

    fn stage<D: Descriptor>(
        &self,
        descriptor: &mut D,
        registry: &Registry<D>,
        staged: &[D],
    ) -> Result<(), BootError> {
        descriptor.set_owning_extension(self.extension);

        let violations = descriptor.violations();
        if !violations.is_empty() {
            return Err(BootError::rejected(
                D::KIND,
                descriptor.id(),
                violations.join("; "),
            ));
        }

        if self.strict {
            if let Some(existing) = registry.get(descriptor.id()) {
                return Err(BootError::rejected(
                    D::KIND,
                    descriptor.id(),
                    format!(
                        "already registered by '{}' (strict registration)",
                        existing.owning_extension()
                    ),
                ));
            }
            if staged.iter().any(|d| d.id() == descriptor.id()) {
                return Err(BootError::rejected(
                    D::KIND,
                    descriptor.id(),
                    "registered twice during boot (strict registration)",
                ));
            }
        }

        Ok(())
    }

    /// Move staged contributions into the live registries.
    ///
    /// On error some contributions may already be live; the caller withdraws
    /// everything owned by the extension.
    pub fn commit(self, manifest: &ExtensionManifest) -> Result<BootSummary, PluginError> {
        let summary = BootSummary {
            templates: self.templates.len(),
            layouts: self.layouts.len(),
            blocks: self.blocks.len(),
            navigation: self.items.len(),
        };

        let provided: [(&str, HashSet<String>, &[String]); 3] = [
            (
                "template",
                self.templates.iter().map(|d| d.id.clone()).collect(),
                &manifest.provides.templates,
            ),
            (
                "layout",
                self.layouts.iter().map(|d| d.id.clone()).collect(),
                &manifest.provides.layouts,
            ),
            (
                "block",
                self.blocks.iter().map(|d| d.id.clone()).collect(),
                &manifest.provides.blocks,
            ),
        ];
        for (kind, registered, promised) in &provided {
            for id in promised.iter().filter(|id| !registered.contains(*id)) {
                warn!(
                    extension = %self.extension,
                    kind,
                    id = %id,
                    "manifest lists a descriptor the boot hook did not register"
                );
            }
        }

        let extension = self.extension;
        insert_all(&self.registries.layouts, self.layouts, self.strict, extension)?;
        insert_all(&self.registries.blocks, self.blocks, self.strict, extension)?;
        insert_all(&self.registries.templates, self.templates, self.strict, extension)?;

        if !self.items.is_empty() {
            self.navigation
                .register_items(extension, self.items)
                .map_err(|e| PluginError::BootFailed {
                    extension: extension.to_string(),
                    details: e.to_string(),
                })?;
        }

        Ok(summary)
    }
}

fn insert_all<D: Descriptor>(
    registry: &Registry<D>,
    descriptors: Vec<D>,
    strict: bool,
    extension: &str,
) -> Result<(), PluginError> {
    for descriptor in descriptors {
        if strict {
            registry
                .insert_new(descriptor)
                .map_err(|e| PluginError::BootFailed {
                    extension: extension.to_string(),
                    details: e.to_string(),
                })?;
        } else {
            registry.register(descriptor);
        }
    }
    Ok(())
}

impl Registrar for BootContext<'_> {
    fn extension_id(&self) -> &str {
        self.extension
    }

    fn register_template(&mut self, mut template: TemplateDescriptor) -> Result<(), BootError> {
        self.stage(&mut template, &self.registries.templates, &self.templates)?;
        self.templates.push(template);
        Ok(())
    }

    fn register_layout(&mut self, mut layout: LayoutDescriptor) -> Result<(), BootError> {
        self.stage(&mut layout, &self.registries.layouts, &self.layouts)?;
        self.layouts.push(layout);
        Ok(())
    }

    fn register_block(&mut self, mut block: BlockDescriptor) -> Result<(), BootError> {
        self.stage(&mut block, &self.registries.blocks, &self.blocks)?;
        self.blocks.push(block);
        Ok(())
    }

    fn register_navigation(&mut self, items: Vec<NavigationItem>) -> Result<(), BootError> {
        let violations = NavigationManager::validate(&items);
        if !violations.is_empty() {
            return Err(BootError::rejected(
                "navigation",
                self.extension,
                violations.join("; "),
            ));
        }
        self.items.extend(items);
        Ok(())
    }
}
