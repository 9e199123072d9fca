//! Parser for extension `.info.toml` manifest files.
//!
//! Each extension directory holds exactly one `*.info.toml` describing its
//! identity, dependencies, migrations and (for declarative extensions) its
//! inline descriptors.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};
use trellis_sdk::types::ExtensionManifest;

use super::error::PluginError;

static ID_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").ok());

/// Whether `id` is a well-formed extension id.
pub fn is_valid_id(id: &str) -> bool {
    match ID_PATTERN.as_ref() {
        Some(pattern) => pattern.is_match(id),
        None => false,
    }
}

/// Find the single `*.info.toml` in an extension directory.
pub fn find_manifest(dir: &Path) -> Result<PathBuf, PluginError> {
    let entries = std::fs::read_dir(dir).map_err(|e| PluginError::InvalidManifest {
        extension: dir_name(dir),
        details: format!("failed to read directory {}: {e}", dir.display()),
    })?;

    let mut manifests: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".info.toml"))
        })
        .collect();

    match manifests.len() {
        0 => Err(PluginError::missing_manifest(dir.display().to_string())),
        1 => Ok(manifests.remove(0)),
        _ => Err(PluginError::MultipleManifests {
            path: dir.display().to_string(),
        }),
    }
}

/// Read, parse and validate a manifest file.
///
/// Errors are attributed to the directory name, since a broken manifest
/// may not yield an id.
pub fn parse(path: &Path) -> Result<ExtensionManifest, PluginError> {
    let fallback = path
        .parent()
        .map(dir_name)
        .unwrap_or_else(|| "unknown".to_string());

    let content = std::fs::read_to_string(path).map_err(|e| PluginError::InvalidManifest {
        extension: fallback.clone(),
        details: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_str(&content, &fallback)
}

/// Parse and validate manifest TOML.
pub fn parse_str(content: &str, fallback_id: &str) -> Result<ExtensionManifest, PluginError> {
    let manifest: ExtensionManifest =
        toml::from_str(content).map_err(|e| PluginError::InvalidManifest {
            extension: fallback_id.to_string(),
            details: e.to_string(),
        })?;

    let violations = validate(&manifest);
    if !violations.is_empty() {
        let extension = if manifest.id.is_empty() {
            fallback_id
        } else {
            &manifest.id
        };
        return Err(PluginError::invalid_manifest(extension, &violations));
    }

    Ok(manifest)
}

/// Every problem with a manifest.
pub fn validate(manifest: &ExtensionManifest) -> Vec<String> {
    let mut errors = Vec::new();

    if manifest.id.trim().is_empty() {
        errors.push("'id' is required".to_string());
    } else if !is_valid_id(&manifest.id) {
        errors.push(format!(
            "id '{}' must contain only lowercase letters, digits, '_' and '-'",
            manifest.id
        ));
    }
    if manifest.name.trim().is_empty() {
        errors.push("'name' is required".to_string());
    }
    if manifest.version.trim().is_empty() {
        errors.push("'version' is required".to_string());
    } else if let Err(e) = Version::parse(&manifest.version) {
        errors.push(format!(
            "version '{}' is not a semantic version: {e}",
            manifest.version
        ));
    }

    for (dependency, requirement) in &manifest.dependencies {
        if dependency == &manifest.id {
            errors.push("an extension cannot depend on itself".to_string());
        }
        if let Err(e) = parse_requirement(requirement) {
            errors.push(format!(
                "dependency '{dependency}' has invalid version requirement '{requirement}': {e}"
            ));
        }
    }

    errors
}

/// Parse a dependency requirement. An empty or `*` requirement accepts any
/// version; a bare version such as `1.2.0` means `^1.2.0`.
pub fn parse_requirement(requirement: &str) -> Result<VersionReq, semver::Error> {
    let requirement = requirement.trim();
    if requirement.is_empty() {
        return Ok(VersionReq::STAR);
    }
    VersionReq::parse(requirement)
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}
