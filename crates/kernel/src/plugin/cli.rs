//! CLI command implementations for extension management and rendering.
//!
//! Every command receives a manager that has already been booted, so the
//! output reflects what a running process would see.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use trellis_sdk::types::ContentEntity;

use crate::config::Config;
use crate::theme::{RenderOverrides, TemplateRenderer, TeraMarkupRenderer};

use super::error::PluginError;
use super::manager::{ActivationReport, PluginManager};

/// Boot the manager and print what happened.
pub async fn cmd_boot(manager: &mut PluginManager, cancel: &CancellationToken) -> Result<()> {
    let report = manager.boot(cancel).await?;
    print_report(&report);

    if report.cancelled {
        bail!(
            "boot cancelled with {} extension(s) still pending",
            report.pending.len()
        );
    }
    Ok(())
}

/// Print an activation report.
pub fn print_report(report: &ActivationReport) {
    if report.activated.is_empty() && report.failed.is_empty() && report.pending.is_empty() {
        println!("No extensions activated.");
        return;
    }

    for (position, id) in report.activated.iter().enumerate() {
        println!("  {:>3}. {id} enabled", position + 1);
    }
    for (id, reason) in &report.failed {
        println!("  FAILED {id}: {reason}");
    }
    for id in &report.pending {
        println!("  pending {id}");
    }
    println!(
        "{} enabled, {} failed, {} pending.",
        report.activated.len(),
        report.failed.len(),
        report.pending.len()
    );
}

/// List every known extension and its status.
pub fn cmd_extension_list(manager: &PluginManager) -> Result<()> {
    let extensions = manager.list();
    if extensions.is_empty() {
        println!(
            "No extensions found in {}.",
            manager.config().extensions_dir.display()
        );
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<12} {:<10} {:<12} {:<20}",
        "EXTENSION", "VERSION", "STATUS", "INSTALLED", "CATEGORY", "DEPENDS ON"
    );
    println!("{}", "-".repeat(91));

    for ext in &extensions {
        let installed = if ext.installed { "yes" } else { "no" };
        let dependencies = if ext.dependencies.is_empty() {
            "-".to_string()
        } else {
            ext.dependencies.join(",")
        };
        println!(
            "{:<20} {:<12} {:<12} {:<10} {:<12} {}",
            ext.id, ext.version, ext.status, installed, ext.category, dependencies
        );
    }

    let failures: Vec<_> = extensions
        .iter()
        .filter_map(|e| e.failure.as_deref().map(|f| (&e.id, f)))
        .collect();
    if !failures.is_empty() {
        println!();
        for (id, reason) in failures {
            println!("{id}: {reason}");
        }
    }

    Ok(())
}

/// Print extension, registry and navigation statistics.
pub fn cmd_extension_stats(manager: &PluginManager) -> Result<()> {
    let stats = manager.stats();
    println!(
        "Extensions: {} total, {} enabled, {} disabled, {} discovered, {} failed",
        stats.total, stats.enabled, stats.disabled, stats.discovered, stats.failed
    );
    for (category, count) in &stats.by_category {
        println!("  {category:<18} {count}");
    }

    let registries = manager.registries().stats();
    println!();
    println!("{:<12} {:>8} {:>8}", "REGISTRY", "TOTAL", "ACTIVE");
    println!("{}", "-".repeat(30));
    for (kind, s) in [
        ("templates", &registries.templates),
        ("layouts", &registries.layouts),
        ("blocks", &registries.blocks),
    ] {
        println!("{:<12} {:>8} {:>8}", kind, s.total, s.active);
    }

    let navigation = manager.navigation().stats();
    println!();
    println!("Navigation items: {}", navigation.total);
    for (location, count) in &navigation.by_location {
        println!("  {location:<18} {count}");
    }

    Ok(())
}

/// Install a discovered extension: dependencies, migrations, boot, enable.
pub async fn cmd_extension_install(manager: &mut PluginManager, id: &str) -> Result<()> {
    manager.install(id).await.map_err(with_hint)?;
    println!("Extension '{id}' installed and enabled.");
    Ok(())
}

/// Enable an installed extension.
pub async fn cmd_extension_enable(manager: &mut PluginManager, id: &str) -> Result<()> {
    manager.enable(id).await.map_err(with_hint)?;
    println!("Extension '{id}' enabled.");
    Ok(())
}

/// Disable an enabled extension. Its migrations stay applied.
pub async fn cmd_extension_disable(manager: &mut PluginManager, id: &str) -> Result<()> {
    manager.disable(id).await.map_err(with_hint)?;
    println!("Extension '{id}' disabled.");
    Ok(())
}

/// Uninstall an extension, rolling back its migrations.
pub async fn cmd_extension_uninstall(manager: &mut PluginManager, id: &str) -> Result<()> {
    manager.uninstall(id).await.map_err(with_hint)?;
    println!("Extension '{id}' uninstalled. Its files were left in place.");
    Ok(())
}

/// Render a content entity read from a JSON file with the templates the
/// enabled extensions registered, and print the markup.
pub fn cmd_render(
    manager: &PluginManager,
    config: &Config,
    content_path: &Path,
    template: Option<&str>,
) -> Result<()> {
    let raw = std::fs::read_to_string(content_path)
        .with_context(|| format!("failed to read {}", content_path.display()))?;
    let content: ContentEntity = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid content entity", content_path.display()))?;

    let markup = TeraMarkupRenderer::new(&config.templates_dir)?;
    let renderer = TemplateRenderer::new(
        Arc::clone(manager.registries()),
        Arc::new(markup),
        config.render_config(),
    );

    let overrides = match template {
        Some(template) => RenderOverrides::default().template(template),
        None => RenderOverrides::default(),
    };
    let resolution = renderer.resolve(&content, &overrides);
    for note in &resolution.notes {
        eprintln!("note: {note}");
    }

    let view = renderer.render_resolution(&content, &resolution);
    if view.is_fallback() {
        eprintln!("note: '{}' rendered with a fallback view", view.template_id);
    }
    println!("{}", view.html);
    Ok(())
}

/// Attach the next command to run, where there is an obvious one.
fn with_hint(err: PluginError) -> anyhow::Error {
    let hint = match &err {
        PluginError::NotInstalled { extension } => {
            Some(format!("Install it first with: trellis extension install {extension}"))
        }
        PluginError::AlreadyInstalled { extension } => {
            Some(format!("Enable it with: trellis extension enable {extension}"))
        }
        PluginError::MissingDependency { dependency, .. }
        | PluginError::DependencyNotEnabled { dependency, .. } => Some(format!(
            "Install or enable '{dependency}' first with: trellis extension install {dependency}"
        )),
        PluginError::HasDependents { .. } => {
            Some("Disable the dependent extensions first.".to_string())
        }
        PluginError::NotFound { .. } => {
            Some("Run `trellis extension list` to see discovered extensions.".to_string())
        }
        _ => None,
    };

    match hint {
        Some(hint) => anyhow::anyhow!("{err}. {hint}"),
        None => anyhow::Error::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_name_the_next_command() {
        let err = with_hint(PluginError::NotInstalled {
            extension: "blog".into(),
        });
        assert!(err.to_string().contains("trellis extension install blog"));

        let err = with_hint(PluginError::BootFailed {
            extension: "blog".into(),
            details: "boom".into(),
        });
        assert_eq!(err.to_string(), "extension 'blog': boot failed: boom");
    }
}
