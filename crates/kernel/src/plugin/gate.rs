//! First-discovery install gating.

/// Compute whether a newly-discovered extension should be installed.
///
/// An extension is installed on first discovery only if:
/// 1. automatic installation is switched on (`AUTO_INSTALL_EXTENSIONS`), AND
/// 2. its `default_enabled` field is `true` (from info.toml), AND
/// 3. its id is NOT listed in `DISABLED_EXTENSIONS`.
///
/// Extensions that already have a persisted status are never affected.
pub fn should_auto_install(
    auto_install: bool,
    default_enabled: bool,
    disabled_extensions: &[String],
    extension: &str,
) -> bool {
    auto_install && default_enabled && !disabled_extensions.iter().any(|d| d == extension)
}
