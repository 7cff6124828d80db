//! Harness configuration.
//!
//! Configuration is environment-only. A `.env` file in the working directory
//! is loaded first, then the variables below are read:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `IMAGE_NAME` | required |
//! | `IMAGECHECK_ASSET_DIR` | `testpack/files/html` |
//! | `IMAGECHECK_ASSET` | `test.html` |
//! | `IMAGECHECK_DOCROOT` | `/var/www/html` |
//! | `IMAGECHECK_HTTP_PORT` | `8080` |
//! | `IMAGECHECK_HTTP_TIMEOUT_SECS` | none |
//! | `IMAGECHECK_REPORT` | none |

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const IMAGE_NAME_VAR: &str = "IMAGE_NAME";
pub const ASSET_DIR_VAR: &str = "IMAGECHECK_ASSET_DIR";
pub const ASSET_VAR: &str = "IMAGECHECK_ASSET";
pub const DOCROOT_VAR: &str = "IMAGECHECK_DOCROOT";
pub const HTTP_PORT_VAR: &str = "IMAGECHECK_HTTP_PORT";
pub const HTTP_TIMEOUT_VAR: &str = "IMAGECHECK_HTTP_TIMEOUT_SECS";
pub const REPORT_VAR: &str = "IMAGECHECK_REPORT";

pub const DEFAULT_ASSET_DIR: &str = "testpack/files/html";
pub const DEFAULT_ASSET: &str = "test.html";
pub const DEFAULT_DOCROOT: &str = "/var/www/html";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Everything the harness needs to know about one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Image reference under test.
    pub image: String,
    /// Local directory the asset path is relative to.
    pub asset_dir: PathBuf,
    /// Asset to inject, relative to `asset_dir`. Its relative path is kept
    /// inside the archive.
    pub asset: PathBuf,
    /// Directory inside the container the asset is extracted into.
    pub docroot: String,
    /// Port the server listens on inside the container.
    pub http_port: u16,
    /// Optional per-request timeout for the HTTP probe.
    pub http_timeout: Option<Duration>,
    /// Where to write a JSON report, if anywhere.
    pub report_path: Option<PathBuf>,
}

impl HarnessConfig {
    /// Config for `image` with every other field at its default.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            asset_dir: PathBuf::from(DEFAULT_ASSET_DIR),
            asset: PathBuf::from(DEFAULT_ASSET),
            docroot: DEFAULT_DOCROOT.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            http_timeout: None,
            report_path: None,
        }
    }

    pub fn with_asset(mut self, asset_dir: impl Into<PathBuf>, asset: impl Into<PathBuf>) -> Self {
        self.asset_dir = asset_dir.into();
        self.asset = asset.into();
        self
    }

    pub fn with_docroot(mut self, docroot: impl Into<String>) -> Self {
        self.docroot = docroot.into();
        self
    }

    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Empty values are treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let image = get(IMAGE_NAME_VAR)
            .ok_or_else(|| ConfigError::MissingEnvVar(IMAGE_NAME_VAR.to_string()))?;

        let mut config = Self::new(image.trim());

        if let Some(dir) = get(ASSET_DIR_VAR) {
            config.asset_dir = PathBuf::from(dir);
        }
        if let Some(asset) = get(ASSET_VAR) {
            config.asset = PathBuf::from(asset);
        }
        if let Some(docroot) = get(DOCROOT_VAR) {
            config.docroot = docroot;
        }
        if let Some(port) = get(HTTP_PORT_VAR) {
            config.http_port = port.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: HTTP_PORT_VAR.to_string(),
                message: format!("{port:?} is not a valid port: {e}"),
            })?;
        }
        if let Some(secs) = get(HTTP_TIMEOUT_VAR) {
            let secs: u64 = secs.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: HTTP_TIMEOUT_VAR.to_string(),
                message: format!("{secs:?} is not a number of seconds: {e}"),
            })?;
            config.http_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(path) = get(REPORT_VAR) {
            config.report_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Full local path of the asset.
    pub fn asset_path(&self) -> PathBuf {
        self.asset_dir.join(&self.asset)
    }
}
