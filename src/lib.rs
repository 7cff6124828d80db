//! Black-box verification harness for web server container images.
//!
//! Starts the image under test, copies a test asset into it, then checks
//! filesystem permissions, file contents, container logs, installed packages
//! and HTTP responses against the running container.
//!
//! ```text
//!   Harness::setup ──▶ ContainerRuntime::start
//!                  ──▶ container::inject (tar.gz upload)
//!                  ──▶ ContainerRuntime::resolve_address
//!   Harness::run_cases ──▶ Check (assertions / probe) against TestContext
//!   Harness::teardown ──▶ ContainerRuntime::stop (exactly once)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use imagecheck::{DockerRuntime, Harness, HarnessConfig, suite};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::from_env()?;
//! let runtime = DockerRuntime::connect().await?;
//! let mut harness = Harness::new(runtime, config);
//!
//! let report = harness.run(&suite::debian9_nginx()).await?;
//! print!("{}", report.render());
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod check;
pub mod config;
pub mod container;
pub mod error;
pub mod harness;
pub mod probe;
pub mod report;
pub mod suite;

pub use assertions::{AssertionFailure, Verdict};
pub use check::{Check, TestCase};
pub use config::HarnessConfig;
pub use container::{
    ArchivePayload, CommandExecutor, ContainerHandle, ContainerRuntime, ContainerState,
    DockerRuntime,
};
pub use error::{ConfigError, Error, Result};
pub use harness::{Case, Harness, HarnessState, TestContext};
pub use probe::{Probe, ProbeConfig};
pub use report::{CaseResult, Outcome, SuiteReport};
