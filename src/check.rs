//! Declarative test cases.
//!
//! A [`Check`] says what to verify; [`TestCase`] gives it a name and runs it
//! against the shared [`TestContext`].

use async_trait::async_trait;

use crate::assertions::{self, AssertionFailure, Verdict};
use crate::error::Result;
use crate::harness::{Case, TestContext};
use crate::probe::{self, Probe, ProbeConfig};

/// One verification against the running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Container logs contain every line.
    LogsContain { expected: Vec<String> },
    /// File exists and contains every substring.
    FileContains { path: String, expected: Vec<String> },
    /// `ls -ld` of the path matches the permission pattern.
    FileMode { path: String, pattern: String },
    /// Package shows up in the package database listing.
    PackageInstalled { name: String },
    /// Page served on the HTTP port has this title.
    PageTitle {
        path: String,
        expected: String,
        probe: ProbeConfig,
    },
    /// After loading the page with `probe`, the server's logs contain
    /// `needle` on a line for the probe's user agent.
    HeadersLogged {
        path: String,
        probe: ProbeConfig,
        needle: String,
        log_glob: String,
        agent_marker: String,
    },
}

impl Check {
    pub fn logs_contain<I, S>(expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::LogsContain {
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn file_contains<I, S>(path: impl Into<String>, expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FileContains {
            path: path.into(),
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn file_mode(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::FileMode {
            path: path.into(),
            pattern: pattern.into(),
        }
    }

    pub fn package_installed(name: impl Into<String>) -> Self {
        Self::PackageInstalled { name: name.into() }
    }

    pub fn page_title(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::PageTitle {
            path: path.into(),
            expected: expected.into(),
            probe: ProbeConfig::default(),
        }
    }

    /// Load `path` with forwarding headers for `client_ip`/`port`, then look
    /// for `client_ip` in the Nginx access logs.
    pub fn forwarded_headers_logged(path: impl Into<String>, client_ip: &str, port: u16) -> Self {
        Self::HeadersLogged {
            path: path.into(),
            probe: ProbeConfig::forwarded(client_ip, port),
            needle: client_ip.to_string(),
            log_glob: probe::NGINX_ACCESS_LOGS.to_string(),
            agent_marker: probe::PROBE_AGENT_MARKER.to_string(),
        }
    }

    /// Run the check. `Err` means the check could not be carried out;
    /// `Ok(Err(_))` means it ran and failed.
    pub async fn run(&self, ctx: &TestContext<'_>) -> Result<Verdict> {
        match self {
            Self::LogsContain { expected } => {
                let logs = ctx.logs().await?;
                Ok(assertions::logs_contain(&logs, expected.as_slice()))
            }
            Self::FileContains { path, expected } => {
                assertions::file_contains(ctx, path, expected.as_slice()).await
            }
            Self::FileMode { path, pattern } => {
                assertions::file_mode_matches(ctx, path, pattern).await
            }
            Self::PackageInstalled { name } => {
                assertions::assert_package_installed(ctx, name).await
            }
            Self::PageTitle {
                path,
                expected,
                probe: config,
            } => {
                let title = fetch_title(ctx, config, path).await?;
                Ok(if &title == expected {
                    Ok(())
                } else {
                    Err(AssertionFailure::new(format!(
                        "expected title {expected:?}, got {title:?}"
                    )))
                })
            }
            Self::HeadersLogged {
                path,
                probe: config,
                needle,
                log_glob,
                agent_marker,
            } => {
                fetch_title(ctx, config, path).await?;
                let logged = probe::headers_logged(ctx, log_glob, needle, agent_marker).await?;
                Ok(if logged {
                    Ok(())
                } else {
                    Err(AssertionFailure::new(format!("Missing {needle} from logs")))
                })
            }
        }
    }
}

async fn fetch_title(ctx: &TestContext<'_>, config: &ProbeConfig, path: &str) -> Result<String> {
    let config = config
        .clone()
        .with_timeout(config.timeout.or(ctx.config().http_timeout));
    Probe::new(&config)?
        .fetch_title(ctx.address(), ctx.config().http_port, path)
        .await
}

/// A named [`Check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub check: Check,
}

impl TestCase {
    pub fn new(name: impl Into<String>, check: Check) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

#[async_trait]
impl Case for TestCase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext<'_>) -> Result<Verdict> {
        self.check.run(ctx).await
    }
}
