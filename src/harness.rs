//! Test orchestration: one setup, many independent cases, one teardown.
//!
//! ```text
//!   NotStarted ──setup──▶ Running ──teardown──▶ Stopped
//! ```
//!
//! The harness owns the [`ContainerHandle`]. Cases only ever see a
//! [`TestContext`], which borrows the handle read-only. [`Harness::run`]
//! tears down exactly once whatever the cases do, panics included.

use std::any::Any;
use std::fmt;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;

use crate::assertions::Verdict;
use crate::config::HarnessConfig;
use crate::container::{self, CommandExecutor, ContainerHandle, ContainerRuntime};
use crate::error::{Error, Result};
use crate::report::{CaseResult, Outcome, SuiteReport};

/// Lifecycle of a [`Harness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    NotStarted,
    Running,
    Stopped,
}

impl HarnessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a test case gets to work with: the running container, its address,
/// and the run's configuration.
pub struct TestContext<'a> {
    runtime: &'a dyn ContainerRuntime,
    handle: &'a ContainerHandle,
    address: IpAddr,
    config: &'a HarnessConfig,
}

impl<'a> TestContext<'a> {
    pub fn handle(&self) -> &ContainerHandle {
        self.handle
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn config(&self) -> &HarnessConfig {
        self.config
    }

    pub async fn logs(&self) -> Result<String> {
        self.runtime.logs(self.handle).await
    }
}

#[async_trait]
impl CommandExecutor for TestContext<'_> {
    async fn exec(&self, command: &str) -> Result<String> {
        self.runtime.exec(self.handle, command).await
    }
}

/// A named, independent test case.
#[async_trait]
pub trait Case: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` is reported as a failure of this case only.
    async fn run(&self, ctx: &TestContext<'_>) -> Result<Verdict>;
}

#[async_trait]
impl<C: Case + ?Sized> Case for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&self, ctx: &TestContext<'_>) -> Result<Verdict> {
        (**self).run(ctx).await
    }
}

/// Drives one container through setup, the cases, and teardown.
pub struct Harness<R: ContainerRuntime> {
    runtime: R,
    config: HarnessConfig,
    state: HarnessState,
    handle: Option<ContainerHandle>,
}

impl<R: ContainerRuntime> Harness<R> {
    pub fn new(runtime: R, config: HarnessConfig) -> Self {
        Self {
            runtime,
            config,
            state: HarnessState::NotStarted,
            handle: None,
        }
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// Start the container, seed the asset, and resolve the address.
    ///
    /// Any failure aborts setup. If the container had already started it is
    /// stopped before the error is returned, and the harness ends `Stopped`.
    pub async fn setup(&mut self) -> Result<()> {
        self.expect_state(HarnessState::NotStarted)?;

        let mut handle = match self.runtime.start(&self.config.image).await {
            Ok(handle) => handle,
            Err(e) => {
                self.state = HarnessState::Stopped;
                return Err(e);
            }
        };

        match self.prepare(&handle).await {
            Ok(address) => {
                handle.set_address(address);
                tracing::info!(
                    container = handle.id(),
                    %address,
                    "Harness ready"
                );
                self.handle = Some(handle);
                self.state = HarnessState::Running;
                Ok(())
            }
            Err(e) => {
                tracing::error!(container = handle.id(), error = %e, "Setup failed");
                self.runtime.stop(&mut handle).await;
                self.handle = Some(handle);
                self.state = HarnessState::Stopped;
                Err(e)
            }
        }
    }

    async fn prepare(&self, handle: &ContainerHandle) -> Result<IpAddr> {
        container::inject(
            &self.runtime,
            handle,
            &self.config.asset_dir,
            &self.config.asset,
            &self.config.docroot,
        )
        .await?;
        self.runtime.resolve_address(handle).await
    }

    /// Context for cases. Only available while `Running`.
    pub fn context(&self) -> Result<TestContext<'_>> {
        self.expect_state(HarnessState::Running)?;
        let handle = self.handle.as_ref().ok_or(Error::HarnessState {
            expected: HarnessState::Running.as_str(),
            found: self.state.as_str(),
        })?;
        let address = handle.address().ok_or_else(|| Error::Inspection {
            container: handle.id().to_string(),
            reason: "address not resolved".to_string(),
        })?;

        Ok(TestContext {
            runtime: &self.runtime,
            handle,
            address,
            config: &self.config,
        })
    }

    /// Run every case in order against the running container.
    ///
    /// Failures and panics are recorded per case; later cases still run.
    pub async fn run_cases<C: Case>(&self, cases: &[C]) -> Result<SuiteReport> {
        let ctx = self.context()?;
        let mut report = SuiteReport::new(&self.config.image);

        for case in cases {
            let started = Instant::now();
            tracing::info!(case = case.name(), "Running case");

            let outcome = match AssertUnwindSafe(case.run(&ctx)).catch_unwind().await {
                Ok(Ok(Ok(()))) => Outcome::Passed,
                Ok(Ok(Err(failure))) => Outcome::Failed {
                    message: failure.message,
                },
                Ok(Err(error)) => Outcome::Failed {
                    message: error.to_string(),
                },
                Err(panic) => Outcome::Failed {
                    message: format!("panicked: {}", panic_message(panic.as_ref())),
                },
            };

            match &outcome {
                Outcome::Passed => tracing::info!(case = case.name(), "Case passed"),
                Outcome::Failed { message } => {
                    tracing::warn!(case = case.name(), %message, "Case failed")
                }
            }
            report.push(CaseResult::new(case.name(), outcome, started.elapsed()));
        }

        Ok(report)
    }

    /// Stop the container if it is running. Calling it again does nothing.
    pub async fn teardown(&mut self) {
        if self.state != HarnessState::Running {
            return;
        }
        if let Some(handle) = self.handle.as_mut() {
            self.runtime.stop(handle).await;
        }
        self.state = HarnessState::Stopped;
    }

    /// Setup, every case, then teardown.
    ///
    /// Setup errors are returned as-is. Once setup has succeeded, teardown
    /// always runs before this returns.
    pub async fn run<C: Case>(&mut self, cases: &[C]) -> Result<SuiteReport> {
        self.run_until(cases, std::future::pending::<()>()).await
    }

    /// [`run`](Self::run), abandoning the remaining cases once `shutdown`
    /// completes. Teardown still happens and the result is
    /// [`Error::Interrupted`].
    pub async fn run_until<C, F>(&mut self, cases: &[C], shutdown: F) -> Result<SuiteReport>
    where
        C: Case,
        F: Future,
    {
        self.setup().await?;
        let report = tokio::select! {
            report = self.run_cases(cases) => report,
            _ = shutdown => {
                tracing::warn!("Interrupted; abandoning remaining cases");
                Err(Error::Interrupted)
            }
        };
        self.teardown().await;
        report
    }

    fn expect_state(&self, expected: HarnessState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::HarnessState {
                expected: expected.as_str(),
                found: self.state.as_str(),
            })
        }
    }
}

impl<R: ContainerRuntime> Drop for Harness<R> {
    fn drop(&mut self) {
        if self.state == HarnessState::Running {
            if let Some(handle) = &self.handle {
                tracing::warn!(
                    container = handle.id(),
                    "Harness dropped without teardown; container left running"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
