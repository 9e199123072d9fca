//! Trellis test utilities.
//!
//! Helpers for integration testing: content fixtures, scripted extensions,
//! recording migrations, manifest writers, and markup renderers with
//! predictable output.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use trellis_sdk::async_trait;
use trellis_sdk::extension::{BootError, Extension, Migration, MigrationError, Registrar};
use trellis_sdk::render::{
    BlockDescriptor, LayoutDescriptor, MarkupRenderer, RenderError, RenderRequest,
    TemplateDescriptor,
};
use trellis_sdk::types::{BlockConfig, ContentEntity, ExtensionManifest, NavigationItem};

/// Create a test content entity with default values.
pub fn test_content(content_type: &str, title: &str) -> TestContent {
    TestContent {
        entity: ContentEntity {
            id: 1,
            content_type: content_type.to_string(),
            title: title.to_string(),
            slug: title.to_lowercase().replace(' ', "-"),
            ..ContentEntity::default()
        },
    }
}

/// A content entity builder for creating test fixtures.
#[derive(Debug, Clone)]
pub struct TestContent {
    entity: ContentEntity,
}

impl TestContent {
    pub fn with_id(mut self, id: u64) -> Self {
        self.entity.id = id;
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.entity.body = body.to_string();
        self
    }

    /// Request a template.
    pub fn template(mut self, template: &str) -> Self {
        self.entity.template = Some(template.to_string());
        self
    }

    pub fn layout(mut self, layout: &str) -> Self {
        self.entity.layout = Some(layout.to_string());
        self
    }

    pub fn theme(mut self, theme: &str) -> Self {
        self.entity.theme = Some(theme.to_string());
        self
    }

    /// Place a block.
    pub fn block(mut self, block_type: &str, position: i32) -> Self {
        self.entity.blocks.push(BlockConfig::new(block_type, position));
        self
    }

    pub fn meta(mut self, key: &str, value: JsonValue) -> Self {
        self.entity.meta.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> ContentEntity {
        self.entity
    }
}

/// Shared record of migration calls, in call order.
#[derive(Debug, Clone, Default)]
pub struct MigrationLog {
    applied: Arc<Mutex<Vec<String>>>,
    reverted: Arc<Mutex<Vec<String>>>,
}

impl MigrationLog {
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn reverted(&self) -> Vec<String> {
        self.reverted.lock().clone()
    }
}

/// A migration that records its calls into a [`MigrationLog`].
#[derive(Debug, Clone)]
pub struct RecordingMigration {
    id: String,
    log: MigrationLog,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingMigration {
    pub fn new(id: impl Into<String>, log: MigrationLog) -> Self {
        Self {
            id: id.into(),
            log,
            fail: false,
            delay: None,
        }
    }

    /// `apply` returns an error without recording anything.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Sleep before applying (use with a paused tokio clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Migration for RecordingMigration {
    fn id(&self) -> &str {
        &self.id
    }

    async fn apply(&self) -> Result<(), MigrationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(MigrationError::new(format!("{} exploded", self.id)));
        }
        self.log.applied.lock().push(self.id.clone());
        Ok(())
    }

    async fn revert(&self) -> Result<(), MigrationError> {
        self.log.reverted.lock().push(self.id.clone());
        Ok(())
    }
}

/// A compiled-in extension whose contributions are scripted by the test.
///
/// Clones share their boot and shutdown counters.
#[derive(Clone)]
pub struct StubExtension {
    manifest: ExtensionManifest,
    templates: Vec<TemplateDescriptor>,
    layouts: Vec<LayoutDescriptor>,
    blocks: Vec<BlockDescriptor>,
    navigation: Vec<NavigationItem>,
    migrations: Vec<Arc<dyn Migration>>,
    boot_error: Option<String>,
    boots: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl std::fmt::Debug for StubExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubExtension")
            .field("id", &self.manifest.id)
            .field("boots", &self.boot_count())
            .finish()
    }
}

impl StubExtension {
    pub fn new(id: &str, version: &str) -> Self {
        Self::from_manifest(ExtensionManifest::new(id, version))
    }

    pub fn from_manifest(manifest: ExtensionManifest) -> Self {
        Self {
            manifest,
            templates: Vec::new(),
            layouts: Vec::new(),
            blocks: Vec::new(),
            navigation: Vec::new(),
            migrations: Vec::new(),
            boot_error: None,
            boots: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn depends_on(mut self, id: &str, requirement: &str) -> Self {
        self.manifest = self.manifest.depends_on(id, requirement);
        self
    }

    /// Register a template for `category` compatible with layout "full".
    pub fn with_template(mut self, id: &str, category: &str) -> Self {
        self.templates
            .push(TemplateDescriptor::new(id, category).with_layouts(["full"]));
        self
    }

    pub fn with_template_descriptor(mut self, template: TemplateDescriptor) -> Self {
        self.templates.push(template);
        self
    }

    pub fn with_layout(mut self, layout: LayoutDescriptor) -> Self {
        self.layouts.push(layout);
        self
    }

    pub fn with_block(mut self, block: BlockDescriptor) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_navigation(mut self, item: NavigationItem) -> Self {
        self.navigation.push(item);
        self
    }

    pub fn with_migration(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Arc::new(migration));
        self
    }

    /// The boot hook fails after registering everything else.
    pub fn failing_boot(mut self, message: &str) -> Self {
        self.boot_error = Some(message.to_string());
        self
    }

    pub fn boot_count(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Extension for StubExtension {
    fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn boot(&self, registrar: &mut dyn Registrar) -> Result<(), BootError> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        for layout in &self.layouts {
            registrar.register_layout(layout.clone())?;
        }
        for block in &self.blocks {
            registrar.register_block(block.clone())?;
        }
        for template in &self.templates {
            registrar.register_template(template.clone())?;
        }
        if !self.navigation.is_empty() {
            registrar.register_navigation(self.navigation.clone())?;
        }
        match &self.boot_error {
            Some(message) => Err(BootError::failed(message.clone())),
            None => Ok(()),
        }
    }

    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        self.migrations.clone()
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Minimal manifest TOML for `id` with optional dependencies.
pub fn manifest_toml(id: &str, version: &str, dependencies: &[(&str, &str)]) -> String {
    let mut toml = format!("id = \"{id}\"\nname = \"{id}\"\nversion = \"{version}\"\n");
    if !dependencies.is_empty() {
        toml.push_str("\n[dependencies]\n");
        for (dep, requirement) in dependencies {
            toml.push_str(&format!("{dep} = \"{requirement}\"\n"));
        }
    }
    toml
}

/// Write `<root>/<dir>/<dir>.info.toml` and return the extension directory.
pub fn write_manifest(root: &Path, dir: &str, toml: &str) -> io::Result<PathBuf> {
    let ext_dir = root.join(dir);
    fs::create_dir_all(&ext_dir)?;
    fs::write(ext_dir.join(format!("{dir}.info.toml")), toml)?;
    Ok(ext_dir)
}

/// Renders `template|layout|theme|block,block` and fails for chosen templates.
#[derive(Debug, Default)]
pub struct ScriptedRenderer {
    failing: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an error whenever `template_id` is rendered.
    pub fn failing_for(mut self, template_id: &str) -> Self {
        self.failing.push(template_id.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MarkupRenderer for ScriptedRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|t| t == request.template_id) {
            return Err(RenderError::failed(format!(
                "scripted failure in {}",
                request.template_id
            )));
        }
        let blocks: Vec<&str> = request
            .blocks
            .iter()
            .map(|b| b.block_type.as_str())
            .collect();
        Ok(format!(
            "{}|{}|{}|{}",
            request.template_id,
            request.layout.unwrap_or("-"),
            request.theme.unwrap_or("-"),
            blocks.join(",")
        ))
    }
}

/// A test user with a fixed set of capabilities.
#[derive(Debug, Clone, Default)]
pub struct TestUser {
    pub permissions: Vec<String>,
}

/// Create a test user holding `permissions`.
pub fn test_user(permissions: &[&str]) -> TestUser {
    TestUser {
        permissions: permissions.iter().map(|s| s.to_string()).collect(),
    }
}

/// Create an anonymous test user.
pub fn anonymous_user() -> TestUser {
    TestUser::default()
}

impl TestUser {
    pub fn has_permission(&self, perm: &str) -> bool {
        self.permissions.iter().any(|p| p == perm)
    }
}

/// Assertion helpers for rendered output.
pub mod assert {
    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string to NOT contain '{needle}'\nActual: {haystack}"
        );
    }
}
