//! Configuration loaded from environment variables.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Deployment environment; controls how much render-error detail is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Production => "production",
            Self::Development => "development",
        })
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory scanned for extensions (default: ./extensions).
    pub extensions_dir: PathBuf,

    /// PostgreSQL connection URL. When None, state lives in memory only.
    pub database_url: Option<String>,

    /// Deployment environment (APP_ENV, default: production).
    pub environment: Environment,

    /// Reject descriptor id collisions at boot instead of overwriting.
    pub strict_registration: bool,

    /// Per-extension migration timeout (default: 30s).
    pub migration_timeout: Duration,

    /// Directory of Tera markup templates (default: ./templates).
    pub templates_dir: PathBuf,

    /// Template id the renderer falls back to (default: "default").
    pub default_template: String,

    /// Install newly discovered extensions whose manifest says `default_enabled`.
    pub auto_install: bool,

    /// Extension ids never auto-installed (from DISABLED_EXTENSIONS).
    pub disabled_extensions: Vec<String>,
}

/// Settings the plugin manager needs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub extensions_dir: PathBuf,
    pub strict_registration: bool,
    pub migration_timeout: Duration,
    pub auto_install: bool,
    pub disabled_extensions: Vec<String>,
}

impl ManagerConfig {
    /// Defaults for a given extensions directory.
    pub fn new(extensions_dir: impl Into<PathBuf>) -> Self {
        Self {
            extensions_dir: extensions_dir.into(),
            strict_registration: false,
            migration_timeout: Duration::from_secs(DEFAULT_MIGRATION_TIMEOUT_SECS),
            auto_install: true,
            disabled_extensions: Vec::new(),
        }
    }
}

/// Settings the template renderer needs.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub default_template: String,
    pub environment: Environment,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_template: DEFAULT_TEMPLATE.to_string(),
            environment: Environment::Production,
        }
    }
}

const DEFAULT_MIGRATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TEMPLATE: &str = "default";

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let extensions_dir = lookup("EXTENSIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./extensions"));

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let environment = match lookup("APP_ENV")
            .unwrap_or_else(|| "production".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            "development" | "dev" => Environment::Development,
            other => bail!("APP_ENV must be 'production' or 'development', got '{other}'"),
        };

        let strict_registration = parse_bool(
            "STRICT_REGISTRATION",
            lookup("STRICT_REGISTRATION").as_deref(),
            false,
        )?;

        let migration_timeout_secs: u64 = lookup("MIGRATION_TIMEOUT_SECS")
            .unwrap_or_else(|| DEFAULT_MIGRATION_TIMEOUT_SECS.to_string())
            .trim()
            .parse()
            .context("MIGRATION_TIMEOUT_SECS must be a whole number of seconds")?;
        if migration_timeout_secs == 0 {
            bail!("MIGRATION_TIMEOUT_SECS must be greater than zero");
        }

        let templates_dir = lookup("TEMPLATES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./templates"));

        let default_template = lookup("DEFAULT_TEMPLATE")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());

        let auto_install = parse_bool(
            "AUTO_INSTALL_EXTENSIONS",
            lookup("AUTO_INSTALL_EXTENSIONS").as_deref(),
            true,
        )?;

        let disabled_extensions = lookup("DISABLED_EXTENSIONS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            extensions_dir,
            database_url,
            environment,
            strict_registration,
            migration_timeout: Duration::from_secs(migration_timeout_secs),
            templates_dir,
            default_template,
            auto_install,
            disabled_extensions,
        })
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            extensions_dir: self.extensions_dir.clone(),
            strict_registration: self.strict_registration,
            migration_timeout: self.migration_timeout,
            auto_install: self.auto_install,
            disabled_extensions: self.disabled_extensions.clone(),
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            default_template: self.default_template.clone(),
            environment: self.environment,
        }
    }
}

fn parse_bool(key: &str, value: Option<&str>, default: bool) -> Result<bool> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        "" => Ok(default),
        other => bail!("{key} must be true or false, got '{other}'"),
    }
}
