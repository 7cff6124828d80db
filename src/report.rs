//! Per-case results and the end-of-run summary.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;

/// How a single test case ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { message: String },
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed)
    }

    fn icon(&self) -> &'static str {
        match self {
            Self::Passed => "[PASS]",
            Self::Failed { .. } => "[FAIL]",
        }
    }
}

/// Result of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseResult {
    pub name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub elapsed_ms: u64,
}

impl CaseResult {
    pub fn new(name: impl Into<String>, outcome: Outcome, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            outcome,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Everything a run produced, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    pub image: String,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: CaseResult) {
        self.results.push(result);
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_pass()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Results that did not pass.
    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> {
        self.results.iter().filter(|r| !r.outcome.is_pass())
    }

    /// Human-readable report, one line per case plus a summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Verifying {}", self.image);
        let _ = writeln!(out);
        for result in &self.results {
            match &result.outcome {
                Outcome::Passed => {
                    let _ = writeln!(
                        out,
                        "  {} {} ({} ms)",
                        result.outcome.icon(),
                        result.name,
                        result.elapsed_ms
                    );
                }
                Outcome::Failed { message } => {
                    let _ = writeln!(
                        out,
                        "  {} {}: {}",
                        result.outcome.icon(),
                        result.name,
                        message
                    );
                }
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Summary: {} cases, {} passed, {} failed",
            self.results.len(),
            self.passed(),
            self.failed()
        );
        out
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
