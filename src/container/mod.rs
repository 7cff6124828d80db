//! Container control for the image under test.
//!
//! - **Runtime**: [`ContainerRuntime`] is the seam between the harness and a
//!   container engine. [`DockerRuntime`] implements it over bollard.
//! - **Handle**: [`ContainerHandle`] tracks one container's id, address and
//!   lifecycle state.
//! - **Injection**: [`inject`] packages local files into a gzip tar archive
//!   and uploads them into a running container.
//!
//! ```text
//!   start ──▶ Running ──▶ resolve_address / exec / logs / upload ──▶ stop ──▶ Stopped
//! ```

pub mod archive;
pub mod docker;

use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use archive::ArchivePayload;
pub use docker::DockerRuntime;

/// Network every container under test is attached to.
pub const NETWORK_MODE: &str = "bridge";

/// Lifecycle of a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// One container instance started by a [`ContainerRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    id: String,
    image: String,
    address: Option<IpAddr>,
    state: ContainerState,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            address: None,
            state: ContainerState::Created,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Address recorded by the last successful address resolution.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    pub fn set_address(&mut self, address: IpAddr) {
        self.address = Some(address);
    }

    pub fn mark_running(&mut self) {
        self.state = ContainerState::Running;
    }

    pub fn mark_stopped(&mut self) {
        self.state = ContainerState::Stopped;
    }
}

/// Operations the harness needs from a container engine.
///
/// Every call is awaited to completion before the next one is issued; none
/// are retried.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start `image` on the isolated bridge network with auto-remove set.
    ///
    /// Fails with [`Error::Configuration`] for an empty reference and
    /// [`Error::RuntimeUnavailable`] when the engine cannot be reached. A
    /// container that was created but failed to start is removed before the
    /// error is returned.
    async fn start(&self, image: &str) -> Result<ContainerHandle>;

    /// Look up the container's address on the bridge network.
    async fn resolve_address(&self, handle: &ContainerHandle) -> Result<IpAddr>;

    /// All stdout/stderr text captured since start.
    async fn logs(&self, handle: &ContainerHandle) -> Result<String>;

    /// Run `command` through `sh -c` and return combined output.
    ///
    /// A non-zero exit status is not an error; callers inspect the text.
    async fn exec(&self, handle: &ContainerHandle, command: &str) -> Result<String>;

    /// Extract a tar archive into the container at `destination`.
    async fn upload(
        &self,
        handle: &ContainerHandle,
        destination: &str,
        payload: ArchivePayload,
    ) -> Result<()>;

    /// Stop (and thereby remove) the container. Best-effort: errors are
    /// logged, never returned, and stopping a stopped handle does nothing.
    async fn stop(&self, handle: &mut ContainerHandle);
}

/// Something that can run a shell command and hand back its output.
///
/// The assertion library and the header probe are written against this
/// rather than a concrete runtime.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn exec(&self, command: &str) -> Result<String>;
}

/// Package `base/relative` and extract it into the container under
/// `destination`, keeping `relative` as the path inside the archive.
///
/// The caller's working directory is never touched.
pub async fn inject<R>(
    runtime: &R,
    handle: &ContainerHandle,
    base: &Path,
    relative: &Path,
    destination: &str,
) -> Result<()>
where
    R: ContainerRuntime + ?Sized,
{
    let payload = ArchivePayload::build(base, relative)?;

    if !handle.is_running() {
        return Err(Error::Transfer {
            container: handle.id().to_string(),
            reason: format!("container is {}", handle.state()),
        });
    }

    tracing::debug!(
        container = handle.id(),
        entry = payload.entry(),
        bytes = payload.len(),
        destination,
        "Injecting archive"
    );
    runtime.upload(handle, destination, payload).await
}
