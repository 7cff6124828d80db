//! Reusable predicates over a running container.
//!
//! Everything here is substring based: a check passes when the expected text
//! appears anywhere in the command output. The comparison logic lives in
//! plain functions ([`mode_matches`], [`first_missing`]) so it can be tested
//! without a container; the async wrappers only issue the shell commands.

use std::fmt;

use serde::Serialize;

use crate::container::CommandExecutor;
use crate::error::Result;

/// Text `ls` and `cat` print when the target is absent.
pub const MISSING_MARKER: &str = "No such file or directory";

/// Wildcard character in a permission pattern.
pub const MODE_WILDCARD: char = '?';

/// A failed check, with a message naming what was checked and what was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionFailure {
    pub message: String,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AssertionFailure {}

/// Outcome of a single predicate.
pub type Verdict = std::result::Result<(), AssertionFailure>;

/// Whether every non-wildcard character of `pattern` equals the character at
/// the same position of `listing`.
///
/// A listing shorter than the pattern fails at the first fixed character it
/// lacks; wildcards never look at the listing.
pub fn mode_matches(pattern: &str, listing: &str) -> bool {
    mode_mismatch(pattern, listing).is_none()
}

/// Index of the first pattern character the listing disagrees with.
pub fn mode_mismatch(pattern: &str, listing: &str) -> Option<usize> {
    let mut actual = listing.chars();
    pattern.chars().enumerate().find_map(|(index, expected)| {
        let found = actual.next();
        (expected != MODE_WILDCARD && found != Some(expected)).then_some(index)
    })
}

/// First expectation that does not occur in `content`, in list order.
pub fn first_missing<'a, S>(content: &str, expectations: &'a [S]) -> Option<&'a str>
where
    S: AsRef<str>,
{
    expectations
        .iter()
        .map(|expected| expected.as_ref())
        .find(|expected| !content.contains(expected))
}

/// Whether `dpkg -l <name>` mentions the package.
pub async fn package_installed<E>(exec: &E, name: &str) -> Result<bool>
where
    E: CommandExecutor + ?Sized,
{
    let listing = exec.exec(&format!("dpkg -l {name}")).await?;
    Ok(listing.contains(name))
}

pub async fn assert_package_installed<E>(exec: &E, name: &str) -> Result<Verdict>
where
    E: CommandExecutor + ?Sized,
{
    Ok(if package_installed(exec, name).await? {
        Ok(())
    } else {
        Err(AssertionFailure::new(format!("{name} package not installed")))
    })
}

/// Compare `ls -ld <path>` against a permission pattern such as
/// `drwx???rw-`.
pub async fn file_mode_matches<E>(exec: &E, path: &str, pattern: &str) -> Result<Verdict>
where
    E: CommandExecutor + ?Sized,
{
    let listing = exec.exec(&format!("ls -ld {path}")).await?;
    Ok(check_mode(path, pattern, &listing))
}

/// Check `cat <path>` for every expected substring.
pub async fn file_contains<E, S>(exec: &E, path: &str, expectations: &[S]) -> Result<Verdict>
where
    E: CommandExecutor + ?Sized,
    S: AsRef<str> + Sync,
{
    let content = exec.exec(&format!("cat {path}")).await?;
    Ok(check_content(path, &content, expectations))
}

/// Check container logs for every expected line.
pub fn logs_contain<S>(logs: &str, expectations: &[S]) -> Verdict
where
    S: AsRef<str>,
{
    match first_missing(logs, expectations) {
        Some(line) => Err(AssertionFailure::new(format!(
            "Docker log line missing: {line} from ({logs})"
        ))),
        None => Ok(()),
    }
}

fn check_mode(path: &str, pattern: &str, listing: &str) -> Verdict {
    if listing.contains(MISSING_MARKER) {
        return Err(AssertionFailure::new(format!("{path} is missing")));
    }
    if let Some(index) = mode_mismatch(pattern, listing) {
        tracing::debug!(path, pattern, index, "Mode mismatch");
        return Err(AssertionFailure::new(format!(
            "{path} incorrect mode: {}",
            listing.trim_end()
        )));
    }
    Ok(())
}

fn check_content<S>(path: &str, content: &str, expectations: &[S]) -> Verdict
where
    S: AsRef<str>,
{
    if content.contains(MISSING_MARKER) {
        return Err(AssertionFailure::new(format!("{path} is missing")));
    }
    match first_missing(content, expectations) {
        Some(expected) => Err(AssertionFailure::new(format!("Missing : {expected}"))),
        None => Ok(()),
    }
}
