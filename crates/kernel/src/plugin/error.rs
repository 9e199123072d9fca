//! Extension lifecycle error types with clear, actionable messages.
//!
//! Every variant names the extension involved; migration failures also name
//! the migration, so an administrator can find the offending file.

use thiserror::Error;

/// Errors raised during discovery, dependency resolution, activation and
/// administrative operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Extension directory has no `.info.toml` manifest.
    #[error("extension '{extension}': no .info.toml manifest found in {path}")]
    MissingManifest { extension: String, path: String },

    /// More than one `.info.toml` in an extension directory.
    #[error("extension directory '{path}': multiple .info.toml files found, expected exactly one")]
    MultipleManifests { path: String },

    /// The manifest could not be read, parsed or validated.
    #[error("extension '{extension}': invalid manifest: {details}")]
    InvalidManifest { extension: String, details: String },

    /// Two directories declare the same extension id.
    #[error("extension '{extension}': already discovered at {first}, ignoring {second}")]
    DuplicateExtension {
        extension: String,
        first: String,
        second: String,
    },

    /// Extension depends on an id that was never discovered.
    #[error("extension '{extension}': depends on '{dependency}' which is not installed")]
    MissingDependency {
        extension: String,
        dependency: String,
    },

    /// Installed dependency version does not satisfy the requirement.
    #[error(
        "extension '{extension}': requires '{dependency}' {requirement}, but {found} is installed"
    )]
    VersionMismatch {
        extension: String,
        dependency: String,
        requirement: String,
        found: String,
    },

    /// Dependency exists but is not (or could not be) enabled.
    #[error("extension '{extension}': dependency '{dependency}' is not enabled")]
    DependencyNotEnabled {
        extension: String,
        dependency: String,
    },

    /// Extension participates in a dependency cycle.
    #[error("extension '{extension}': circular dependency detected: {cycle}")]
    CircularDependency { extension: String, cycle: String },

    /// The loader could not produce an extension for this manifest.
    #[error("extension '{extension}': failed to load: {details}")]
    LoadFailed { extension: String, details: String },

    /// A migration returned an error.
    #[error("extension '{extension}': migration '{migration}' failed: {details}")]
    MigrationFailed {
        extension: String,
        migration: String,
        details: String,
    },

    /// The extension's migrations did not finish in time.
    #[error("extension '{extension}': migrations timed out after {seconds}s")]
    MigrationTimeout { extension: String, seconds: u64 },

    /// A declared migration set names the same id twice.
    #[error("extension '{extension}': migration '{migration}' is declared more than once")]
    DuplicateMigration {
        extension: String,
        migration: String,
    },

    /// The boot hook failed or a registration was rejected.
    #[error("extension '{extension}': boot failed: {details}")]
    BootFailed { extension: String, details: String },

    /// Reading or writing persisted state failed.
    #[error("extension '{extension}': state store error: {details}")]
    Store { extension: String, details: String },

    /// Persisted state could not be loaded at all.
    #[error("extension state store unavailable: {details}")]
    StoreUnavailable { details: String },

    /// Admin operation on an id nobody has discovered.
    #[error("extension '{extension}': not found")]
    NotFound { extension: String },

    #[error("extension '{extension}': already installed")]
    AlreadyInstalled { extension: String },

    #[error("extension '{extension}': not installed")]
    NotInstalled { extension: String },

    #[error("extension '{extension}': already enabled")]
    AlreadyEnabled { extension: String },

    #[error("extension '{extension}': not enabled")]
    NotEnabled { extension: String },

    /// Extension discovery or activation failed earlier; the reason is attached.
    #[error("extension '{extension}': unavailable: {reason}")]
    Unavailable { extension: String, reason: String },

    /// Disable/uninstall refused while enabled dependents exist.
    #[error("extension '{extension}': required by enabled extensions: {dependents}")]
    HasDependents {
        extension: String,
        dependents: String,
    },
}

impl PluginError {
    /// Create a missing manifest error, naming the extension after its directory.
    pub fn missing_manifest(path: impl Into<String>) -> Self {
        let path = path.into();
        let extension = std::path::Path::new(&path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Self::MissingManifest { extension, path }
    }

    /// Create an invalid manifest error from a list of violations.
    pub fn invalid_manifest(extension: impl Into<String>, violations: &[String]) -> Self {
        Self::InvalidManifest {
            extension: extension.into(),
            details: violations.join("; "),
        }
    }

    pub fn migration_failed(
        extension: impl Into<String>,
        migration: impl Into<String>,
        details: impl ToString,
    ) -> Self {
        Self::MigrationFailed {
            extension: extension.into(),
            migration: migration.into(),
            details: details.to_string(),
        }
    }

    pub fn store(extension: impl Into<String>, details: impl ToString) -> Self {
        Self::Store {
            extension: extension.into(),
            details: details.to_string(),
        }
    }

    pub fn has_dependents(extension: impl Into<String>, dependents: &[String]) -> Self {
        Self::HasDependents {
            extension: extension.into(),
            dependents: dependents.join(", "),
        }
    }

    /// The extension this error is about, if it names exactly one.
    pub fn extension(&self) -> Option<&str> {
        match self {
            Self::MultipleManifests { .. } | Self::StoreUnavailable { .. } => None,
            Self::MissingManifest { extension, .. }
            | Self::InvalidManifest { extension, .. }
            | Self::DuplicateExtension { extension, .. }
            | Self::MissingDependency { extension, .. }
            | Self::VersionMismatch { extension, .. }
            | Self::DependencyNotEnabled { extension, .. }
            | Self::CircularDependency { extension, .. }
            | Self::LoadFailed { extension, .. }
            | Self::MigrationFailed { extension, .. }
            | Self::MigrationTimeout { extension, .. }
            | Self::DuplicateMigration { extension, .. }
            | Self::BootFailed { extension, .. }
            | Self::Store { extension, .. }
            | Self::NotFound { extension }
            | Self::AlreadyInstalled { extension }
            | Self::NotInstalled { extension }
            | Self::AlreadyEnabled { extension }
            | Self::NotEnabled { extension }
            | Self::Unavailable { extension, .. }
            | Self::HasDependents { extension, .. } => Some(extension),
        }
    }
}
