//! The extension contract.
//!
//! The kernel calls [`Extension::boot`] exactly once per activation, after
//! the extension's migrations have been applied. Boot hooks may only submit
//! descriptors through the [`Registrar`]; they must not do I/O against
//! unrelated systems.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::render::{BlockDescriptor, LayoutDescriptor, TemplateDescriptor};
use crate::types::{ExtensionManifest, NavigationItem};

/// An installable, independently versioned extension.
pub trait Extension: Send + Sync {
    /// The manifest this extension was built from.
    fn manifest(&self) -> &ExtensionManifest;

    /// Register templates, layouts, blocks and navigation.
    fn boot(&self, registrar: &mut dyn Registrar) -> Result<(), BootError>;

    /// Schema migrations, in declared (execution) order.
    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        Vec::new()
    }

    /// Called after the extension's contributions have been withdrawn.
    fn shutdown(&self) {}
}

/// Write-only view of the kernel's registries handed to a boot hook.
///
/// Whatever `owning_extension` a descriptor carries is replaced by the id
/// of the extension being booted.
pub trait Registrar {
    /// Id of the extension being booted.
    fn extension_id(&self) -> &str;

    fn register_template(&mut self, template: TemplateDescriptor) -> Result<(), BootError>;

    fn register_layout(&mut self, layout: LayoutDescriptor) -> Result<(), BootError>;

    fn register_block(&mut self, block: BlockDescriptor) -> Result<(), BootError>;

    fn register_navigation(&mut self, items: Vec<NavigationItem>) -> Result<(), BootError>;
}

/// Errors returned from a boot hook.
#[derive(Debug, Error)]
pub enum BootError {
    /// The registrar refused a descriptor.
    #[error("{kind} '{id}' rejected: {reason}")]
    Rejected {
        kind: &'static str,
        id: String,
        reason: String,
    },

    /// The extension itself gave up.
    #[error("{0}")]
    Failed(String),
}

impl BootError {
    pub fn rejected(kind: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A single schema step, identified by an id unique within its extension.
#[async_trait]
pub trait Migration: Send + Sync {
    fn id(&self) -> &str;

    async fn apply(&self) -> Result<(), MigrationError>;

    async fn revert(&self) -> Result<(), MigrationError>;
}

/// Failure reported by a migration step.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct MigrationError {
    message: String,
}

impl MigrationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for MigrationError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for MigrationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_message_names_kind_and_id() {
        let err = BootError::rejected("template", "blog.post", "duplicate id");
        assert_eq!(err.to_string(), "template 'blog.post' rejected: duplicate id");
    }

    #[test]
    fn migration_error_from_str() {
        let err: MigrationError = "table exists".into();
        assert_eq!(err.to_string(), "table exists");
    }
}
