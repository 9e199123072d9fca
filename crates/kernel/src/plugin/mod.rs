//! Extension system for Trellis.
//!
//! This module handles:
//! - Discovering extensions and parsing their `.info.toml` manifests
//! - Ordering activation by declared dependencies
//! - Running per-extension migrations with batch tracking
//! - Booting extensions into the registries and navigation
//! - Administrative install/enable/disable/uninstall

mod boot;
pub mod cli;
mod dependency;
mod error;
mod gate;
mod loader;
mod manager;
pub mod manifest;
mod migration;
mod pg;
mod store;

pub use boot::{BootContext, BootSummary};
pub use dependency::{
    ActivationPlan, DependencyNode, NodeState, check_dependencies, resolve_activation_order,
};
pub use error::PluginError;
pub use gate::should_auto_install;
pub use loader::{DeclarativeExtension, ExtensionFactory, ExtensionLoader};
pub use manager::{
    ActivationReport, ExtensionStatus, ExtensionSummary, ManagerStats, PluginManager,
};
pub use migration::{MigrationRunner, MigrationStatus, RollbackScope};
pub use pg::{PgStore, SqlFileMigration};
pub use store::{
    DesiredState, InMemoryStore, MigrationRecord, MigrationStore, StatusRecord, StatusStore,
    StoreError,
};
