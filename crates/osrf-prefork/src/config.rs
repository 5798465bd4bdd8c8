//! On-disk configuration, loaded once at process start.
//!
//! A live settings service at paths like `/apps/<app>/unix_config/max_requests`
//! is an out-of-scope collaborator here, so this module models the same
//! paths as a typed YAML document instead: a top-level map of app name to
//! [`UnixConfig`], plus a global router list and router name.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::{ConfigError, Result};

/// Absolute safety ceiling on `max_children`, independent of anything an
/// operator configures.
pub const ABS_MAX_WORKERS: usize = 256;

const DEFAULT_MAX_REQUESTS: u32 = 1000;
const DEFAULT_MIN_CHILDREN: usize = 3;
const DEFAULT_MAX_CHILDREN: usize = 10;
const DEFAULT_KEEPALIVE: u64 = 5;

/// One `/routers/router` entry: either a bare domain string, or a
/// structured entry naming a router, its domain, and an optional allowlist
/// of services it should register for.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RouterEntry {
    /// A plain domain; combined with the global [`AppConfig::router_name`]
    /// at registration time.
    Domain(String),
    /// A fully-specified router, optionally scoped to a set of services.
    Full {
        name: String,
        domain: String,
        #[serde(default)]
        services: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UnixConfig {
    max_requests: Option<u32>,
    min_children: Option<usize>,
    max_children: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AppEntry {
    #[serde(default)]
    unix_config: UnixConfig,
    keepalive: Option<u64>,
}

/// Resolved pool bounds for one application, with every field defaulted and
/// validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_requests: u32,
    pub min_children: usize,
    pub max_children: usize,
    pub keepalive_seconds: u64,
}

impl PoolConfig {
    fn from_entry(entry: &AppEntry) -> Self {
        Self {
            max_requests: entry.unix_config.max_requests.unwrap_or(DEFAULT_MAX_REQUESTS),
            min_children: entry.unix_config.min_children.unwrap_or(DEFAULT_MIN_CHILDREN),
            max_children: entry.unix_config.max_children.unwrap_or(DEFAULT_MAX_CHILDREN),
            keepalive_seconds: entry.keepalive.unwrap_or(DEFAULT_KEEPALIVE),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_children > self.max_children {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_children,
                max: self.max_children,
            }
            .into());
        }
        if self.max_children > ABS_MAX_WORKERS {
            return Err(ConfigError::ExceedsAbsoluteCeiling {
                max: self.max_children,
                ceiling: ABS_MAX_WORKERS,
            }
            .into());
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            min_children: DEFAULT_MIN_CHILDREN,
            max_children: DEFAULT_MAX_CHILDREN,
            keepalive_seconds: DEFAULT_KEEPALIVE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    apps: HashMap<String, AppEntry>,
    #[serde(default)]
    routers: Vec<RouterEntry>,
    #[serde(default)]
    router_name: String,
}

/// The full on-disk configuration document, loaded once at process start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    raw: RawConfig,
}

impl AppConfig {
    /// Load and validate a configuration document from `path`.
    ///
    /// Loading failure (unreadable file, malformed YAML, or any app entry
    /// violating `min ≤ max ≤ ABS_MAX_WORKERS`) is a fatal configuration
    /// error raised before any worker is spawned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self { raw };
        for app in config.raw.apps.keys() {
            config.pool_config(app)?;
        }
        Ok(config)
    }

    /// Resolved pool bounds for `app`, with documented defaults applied to
    /// any field absent from the document.
    pub fn pool_config(&self, app: &str) -> Result<PoolConfig> {
        let entry = self.raw.apps.get(app).cloned().unwrap_or_default();
        let config = PoolConfig::from_entry(&entry);
        config.validate()?;
        Ok(config)
    }

    /// The configured router entries, in document order.
    pub fn routers(&self) -> &[RouterEntry] {
        &self.raw.routers
    }

    /// The globally-configured router name, combined with a bare-domain
    /// [`RouterEntry::Domain`] at registration time.
    pub fn router_name(&self) -> &str {
        &self.raw.router_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_app_absent() {
        let config = AppConfig::parse("apps: {}\n", Path::new("<test>")).unwrap();
        let pool = config.pool_config("unknown-app").unwrap();
        assert_eq!(pool, PoolConfig::default());
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let doc = "apps:\n  opensrf.math:\n    unix_config:\n      max_requests: 50\n      min_children: 1\n      max_children: 2\n    keepalive: 10\n";
        let config = AppConfig::parse(doc, Path::new("<test>")).unwrap();
        let pool = config.pool_config("opensrf.math").unwrap();
        assert_eq!(pool.max_requests, 50);
        assert_eq!(pool.min_children, 1);
        assert_eq!(pool.max_children, 2);
        assert_eq!(pool.keepalive_seconds, 10);
    }

    #[test]
    fn min_exceeding_max_is_a_config_error() {
        let doc = "apps:\n  bad:\n    unix_config:\n      min_children: 5\n      max_children: 2\n";
        let err = AppConfig::parse(doc, Path::new("<test>")).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::PreforkError::Config(ConfigError::MinExceedsMax { min: 5, max: 2 })
        ));
    }

    #[test]
    fn max_exceeding_absolute_ceiling_is_a_config_error() {
        let doc = "apps:\n  bad:\n    unix_config:\n      max_children: 99999\n";
        let err = AppConfig::parse(doc, Path::new("<test>")).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::PreforkError::Config(ConfigError::ExceedsAbsoluteCeiling { .. })
        ));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let err = AppConfig::parse("apps: [this is not a map\n", Path::new("<test>")).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::PreforkError::Config(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn bare_domain_router_entry_parses() {
        let doc = "routers:\n  - \"private.localhost\"\nrouter_name: router\n";
        let config = AppConfig::parse(doc, Path::new("<test>")).unwrap();
        assert_eq!(config.router_name(), "router");
        assert!(matches!(config.routers()[0], RouterEntry::Domain(ref d) if d == "private.localhost"));
    }

    #[test]
    fn structured_router_entry_parses() {
        let doc = "routers:\n  - name: router\n    domain: public.localhost\n    services: [opensrf.math]\n";
        let config = AppConfig::parse(doc, Path::new("<test>")).unwrap();
        match &config.routers()[0] {
            RouterEntry::Full { name, domain, services } => {
                assert_eq!(name, "router");
                assert_eq!(domain, "public.localhost");
                assert_eq!(services.as_deref(), Some(&["opensrf.math".to_string()][..]));
            }
            other => panic!("expected structured entry, got {other:?}"),
        }
    }

    #[test]
    fn load_reads_a_document_from_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apps:\n  opensrf.math:\n    unix_config:\n      max_requests: 20\n"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.pool_config("opensrf.math").unwrap().max_requests, 20);
    }

    #[test]
    fn load_of_missing_file_is_an_unreadable_config_error() {
        let err = AppConfig::load("/nonexistent/path/to/config.yml").unwrap_err();
        assert!(matches!(
            err,
            crate::errors::PreforkError::Config(ConfigError::Unreadable { .. })
        ));
    }
}
