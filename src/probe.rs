//! HTTP probe against the container's exposed port.
//!
//! The probe loads a page the way a headless browser would from the test's
//! point of view: one blocking navigation, then the document title. Custom
//! request headers are part of [`ProbeConfig`] and fixed when the client is
//! built.
//!
//! Whether the server saw those headers is not read back from the response.
//! [`headers_logged`] greps the server's access logs for the injected value on
//! a line written for the probe's user agent instead.

use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::container::CommandExecutor;
use crate::error::{Error, Result};

/// Substring identifying probe requests in access logs.
pub const PROBE_AGENT_MARKER: &str = "imagecheck-probe";

/// User agent sent unless the config overrides it.
pub const DEFAULT_USER_AGENT: &str = concat!("imagecheck-probe/", env!("CARGO_PKG_VERSION"));

/// Access logs of the reference Nginx image.
pub const NGINX_ACCESS_LOGS: &str = "/var/log/nginx/*.log";

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").expect("valid title regex"));

static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#[xX]?[0-9a-fA-F]+;").expect("valid entity regex"));

/// Client-construction settings for a [`Probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Extra headers sent with every request, in insertion order.
    pub headers: Vec<(String, String)>,
    pub user_agent: String,
    /// Per-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: None,
        }
    }
}

impl ProbeConfig {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Headers simulating a request forwarded by a reverse proxy.
    pub fn forwarded(client_ip: &str, port: u16) -> Self {
        Self::default()
            .with_header("X-Forwarded-For", client_ip)
            .with_header("X-Forwarded-Port", port.to_string())
    }
}

/// HTTP client bound to one [`ProbeConfig`].
#[derive(Debug, Clone)]
pub struct Probe {
    client: reqwest::Client,
}

impl Probe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let invalid = |reason: String| Error::Probe {
                url: String::new(),
                reason: format!("invalid header {name}: {reason}"),
            };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .no_proxy();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| Error::Probe {
            url: String::new(),
            reason: e.to_string(),
        })?;

        Ok(Self { client })
    }

    /// Load `path` from `address:port` and return the document title.
    ///
    /// Returns an empty string for a page without a `<title>`. Any response
    /// status is accepted; only transport failures are errors.
    pub async fn fetch_title(&self, address: IpAddr, port: u16, path: &str) -> Result<String> {
        let url = page_url(address, port, path);
        let probe_error = |e: reqwest::Error| Error::Probe {
            url: url.clone(),
            reason: e.to_string(),
        };

        let response = self.client.get(&url).send().await.map_err(probe_error)?;
        let status = response.status();
        let body = response.text().await.map_err(probe_error)?;

        let title = extract_title(&body);
        tracing::debug!(%url, %status, title = %title, "Page loaded");
        Ok(title)
    }
}

/// `http://address:port/path`, bracketing IPv6 addresses.
pub fn page_url(address: IpAddr, port: u16, path: &str) -> String {
    let socket = SocketAddr::new(address, port);
    if path.starts_with('/') {
        format!("http://{socket}{path}")
    } else {
        format!("http://{socket}/{path}")
    }
}

/// Document title as a browser would report it: entities decoded and
/// whitespace collapsed.
pub fn extract_title(html: &str) -> String {
    let Some(raw) = TITLE_RE.captures(html).and_then(|caps| caps.get(1)) else {
        return String::new();
    };
    decode_entities(raw.as_str())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    let decoded = NUMERIC_ENTITY_RE.replace_all(s, |caps: &regex::Captures<'_>| {
        let entity = caps[0].trim_start_matches("&#").trim_end_matches(';');
        let code_point = match entity.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => entity.parse::<u32>().ok(),
        };
        code_point
            .and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });

    decoded
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Whether the server logged a request containing `needle` from a client
/// whose line also mentions `agent_marker` (case-insensitive).
pub async fn headers_logged<E>(
    exec: &E,
    log_glob: &str,
    needle: &str,
    agent_marker: &str,
) -> Result<bool>
where
    E: CommandExecutor + ?Sized,
{
    let command = format!(
        "bash -c \"grep {needle} {log_glob} | grep -iq {agent_marker} && echo -n true\""
    );
    let output = exec.exec(&command).await?;
    Ok(output == "true")
}
