//! Template, layout and block registries.
//!
//! One generic [`Registry`] backs all three kinds. The [`Registries`] bundle
//! is shared (behind an `Arc`) between the plugin manager, which writes, and
//! the template renderer, which reads.

mod descriptor;
mod error;
mod store;

pub use descriptor::Descriptor;
pub use error::RegistryError;
pub use store::{Registry, RegistryStats, SelectOption};

use serde::Serialize;
use trellis_sdk::render::{BlockDescriptor, LayoutDescriptor, TemplateDescriptor};

pub type TemplateRegistry = Registry<TemplateDescriptor>;
pub type LayoutRegistry = Registry<LayoutDescriptor>;
pub type BlockRegistry = Registry<BlockDescriptor>;

/// The three registries, owned together.
#[derive(Debug, Default)]
pub struct Registries {
    pub templates: TemplateRegistry,
    pub layouts: LayoutRegistry,
    pub blocks: BlockRegistry,
}

/// Per-kind registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistriesStats {
    pub templates: RegistryStats,
    pub layouts: RegistryStats,
    pub blocks: RegistryStats,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Withdraw everything an extension registered, across all kinds.
    pub fn unregister_extension(&self, extension: &str) -> usize {
        self.templates.unregister_extension(extension)
            + self.layouts.unregister_extension(extension)
            + self.blocks.unregister_extension(extension)
    }

    /// Whether the extension still owns anything.
    pub fn owns_any(&self, extension: &str) -> bool {
        !self.templates.list_by_extension(extension).is_empty()
            || !self.layouts.list_by_extension(extension).is_empty()
            || !self.blocks.list_by_extension(extension).is_empty()
    }

    pub fn stats(&self) -> RegistriesStats {
        RegistriesStats {
            templates: self.templates.stats(),
            layouts: self.layouts.stats(),
            blocks: self.blocks.stats(),
        }
    }
}
