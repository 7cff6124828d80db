//! Docker engine backend built on bollard.

use std::net::IpAddr;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig};
use futures::StreamExt;
use uuid::Uuid;

use super::{ArchivePayload, ContainerHandle, ContainerRuntime, NETWORK_MODE};
use crate::config::IMAGE_NAME_VAR;
use crate::error::{ConfigError, Error, Result};

/// Prefix for the names of containers started by the harness.
const CONTAINER_PREFIX: &str = "imagecheck";

/// Seconds the engine waits for a graceful stop before killing.
const STOP_TIMEOUT_SECS: i64 = 10;

/// [`ContainerRuntime`] backed by a local Docker-compatible engine.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect with the engine's local defaults (`DOCKER_HOST` or the
    /// platform socket) and make sure it answers.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            Error::RuntimeUnavailable {
                reason: e.to_string(),
            }
        })?;
        Self::from_client(docker).await
    }

    /// Wrap an existing client, pinging it first.
    pub async fn from_client(docker: Docker) -> Result<Self> {
        docker.ping().await.map_err(|e| Error::RuntimeUnavailable {
            reason: e.to_string(),
        })?;
        Ok(Self { docker })
    }

    async fn create(&self, name: &str, image: &str) -> std::result::Result<String, DockerError> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        };
        let config = Config {
            image: Some(image.to_string()),
            host_config: Some(HostConfig {
                auto_remove: Some(true),
                network_mode: Some(NETWORK_MODE.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self.docker.create_container(Some(options), config).await?;
        for warning in &response.warnings {
            tracing::warn!(container = name, "Engine warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let (from_image, tag) = split_reference(image);
        tracing::info!(image, "Image not present locally, pulling");

        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(step) = progress.next().await {
            let step = step.map_err(engine_error)?;
            if let Some(status) = step.status {
                tracing::debug!(image, "{}", status);
            }
        }
        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerInspectResponse> {
        self.docker
            .inspect_container(handle.id(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| Error::Inspection {
                container: handle.id().to_string(),
                reason: e.to_string(),
            })
    }

    /// Force-remove a container that was created but never started.
    async fn discard(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => tracing::info!(container = id, "Removed container that failed to start"),
            Err(e) => tracing::warn!(
                container = id,
                error = %e,
                "Failed to remove container that failed to start"
            ),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, image: &str) -> Result<ContainerHandle> {
        let image = image.trim();
        if image.is_empty() {
            return Err(ConfigError::MissingEnvVar(IMAGE_NAME_VAR.to_string()).into());
        }

        let name = format!("{}-{}", CONTAINER_PREFIX, Uuid::new_v4().simple());
        let id = match self.create(&name, image).await {
            Ok(id) => id,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                self.pull(image).await?;
                self.create(&name, image).await.map_err(engine_error)?
            }
            Err(e) => return Err(engine_error(e)),
        };
        tracing::debug!(container = %id, name = %name, image, "Container created");

        if let Err(e) = self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            tracing::error!(container = %id, error = %e, "Container failed to start");
            self.discard(&id).await;
            return Err(engine_error(e));
        }

        let mut handle = ContainerHandle::new(id, image);
        handle.mark_running();

        tracing::info!(container = handle.id(), image, "Container started");
        Ok(handle)
    }

    async fn resolve_address(&self, handle: &ContainerHandle) -> Result<IpAddr> {
        let details = self.inspect(handle).await?;
        let address = address_from_inspect(&details).map_err(|reason| Error::Inspection {
            container: handle.id().to_string(),
            reason,
        })?;
        tracing::debug!(container = handle.id(), %address, "Resolved container address");
        Ok(address)
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };
        let mut stream = self.docker.logs(handle.id(), Some(options));
        let mut buffer = Vec::new();
        while let Some(frame) = stream.next().await {
            buffer.extend_from_slice(&frame_bytes(frame?));
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    async fn exec(&self, handle: &ContainerHandle, command: &str) -> Result<String> {
        let exec_error = |reason: String| Error::Exec {
            container: handle.id().to_string(),
            reason,
        };

        let created = self
            .docker
            .create_exec(
                handle.id(),
                CreateExecOptions {
                    cmd: Some(vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        command.to_string(),
                    ]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| exec_error(e.to_string()))?;

        let mut buffer = Vec::new();
        match self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(|e| exec_error(e.to_string()))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(frame) = output.next().await {
                    let frame = frame.map_err(|e| exec_error(e.to_string()))?;
                    buffer.extend_from_slice(&frame_bytes(frame));
                }
            }
            StartExecResults::Detached => {
                return Err(exec_error("exec started detached".to_string()));
            }
        }

        tracing::debug!(container = handle.id(), command, bytes = buffer.len(), "Exec finished");
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    async fn upload(
        &self,
        handle: &ContainerHandle,
        destination: &str,
        payload: ArchivePayload,
    ) -> Result<()> {
        let options = UploadToContainerOptions {
            path: destination.to_string(),
            ..Default::default()
        };
        let entry = payload.entry().to_string();
        self.docker
            .upload_to_container(
                handle.id(),
                Some(options),
                bytes::Bytes::from(payload.into_bytes()),
            )
            .await
            .map_err(|e| Error::Transfer {
                container: handle.id().to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(container = handle.id(), entry = %entry, destination, "Archive uploaded");
        Ok(())
    }

    async fn stop(&self, handle: &mut ContainerHandle) {
        if !handle.is_running() {
            tracing::debug!(container = handle.id(), state = %handle.state(), "Stop skipped");
            return;
        }

        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.docker.stop_container(handle.id(), Some(options)).await {
            // bollard reports 304 (already stopped) as success
            Ok(()) => tracing::info!(container = handle.id(), "Container stopped"),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => tracing::debug!(container = handle.id(), "Container already gone"),
            Err(e) => tracing::warn!(
                container = handle.id(),
                error = %e,
                "Failed to stop container"
            ),
        }
        handle.mark_stopped();
    }
}

/// Address of a running container on the bridge network. The top-level
/// address wins; the bridge endpoint is the fallback.
fn address_from_inspect(details: &ContainerInspectResponse) -> std::result::Result<IpAddr, String> {
    let running = details
        .state
        .as_ref()
        .and_then(|s| s.running)
        .unwrap_or(false);
    if !running {
        return Err("container is not running".to_string());
    }

    let settings = details
        .network_settings
        .as_ref()
        .ok_or_else(|| "no network settings".to_string())?;
    let raw = settings
        .ip_address
        .as_deref()
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            settings
                .networks
                .as_ref()
                .and_then(|networks| networks.get(NETWORK_MODE))
                .and_then(|endpoint| endpoint.ip_address.as_deref())
                .filter(|ip| !ip.is_empty())
        })
        .ok_or_else(|| "no address assigned on the bridge network".to_string())?;

    raw.parse()
        .map_err(|_| format!("unparseable address {raw:?}"))
}

/// Transport failures mean the engine went away; everything else is an API
/// error from a reachable engine.
fn engine_error(e: DockerError) -> Error {
    match e {
        DockerError::RequestTimeoutError
        | DockerError::IOError { .. }
        | DockerError::HyperResponseError { .. }
        | DockerError::HyperLegacyError { .. }
        | DockerError::SocketNotFoundError(_) => Error::RuntimeUnavailable {
            reason: e.to_string(),
        },
        other => Error::Docker(other),
    }
}

fn frame_bytes(frame: LogOutput) -> bytes::Bytes {
    match frame {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => message,
    }
}

/// Split an image reference into the `fromImage` and `tag` the pull API
/// expects. Digest references are passed through whole.
fn split_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use bollard::API_DEFAULT_VERSION;
    use bollard::models::{ContainerState, EndpointSettings, NetworkSettings};
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// `(method, path fragment, status, body)`; first match wins, the rest 404.
    type Route = (&'static str, &'static str, u16, &'static str);

    /// Loopback stand-in for the engine API. Records each request line.
    async fn fake_engine(routes: Vec<Route>) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                let line = request.lines().next().unwrap_or_default().to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(method, fragment, _, _)| {
                        line.starts_with(method) && line.contains(fragment)
                    })
                    .map(|(_, _, status, body)| (*status, *body))
                    .unwrap_or((404, r#"{"message":"no such route"}"#));
                log.lock().unwrap().push(line);
                let response = format!(
                    "HTTP/1.1 {status} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (addr, seen)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            if let Some(i) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return String::from_utf8_lossy(&request).into_owned();
            }
            request.extend_from_slice(&buf[..n]);
        };
        let head = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while request.len() < header_end + length {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&request).into_owned()
    }

    fn client(addr: SocketAddr) -> Docker {
        Docker::connect_with_http(&format!("http://{addr}"), 2, API_DEFAULT_VERSION).unwrap()
    }

    fn running_handle(id: &str) -> ContainerHandle {
        let mut handle = ContainerHandle::new(id, "nginx:test");
        handle.mark_running();
        handle
    }

    fn inspect_response(
        running: bool,
        ip_address: Option<&str>,
        bridge_ip: Option<&str>,
    ) -> ContainerInspectResponse {
        let networks = bridge_ip.map(|ip| {
            HashMap::from([(
                NETWORK_MODE.to_string(),
                EndpointSettings {
                    ip_address: Some(ip.to_string()),
                    ..Default::default()
                },
            )])
        });
        ContainerInspectResponse {
            state: Some(ContainerState {
                running: Some(running),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ip_address: ip_address.map(str::to_string),
                networks,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_runtime_unavailable() {
        let docker =
            Docker::connect_with_http("http://127.0.0.1:1", 2, API_DEFAULT_VERSION).unwrap();
        let err = DockerRuntime::from_client(docker).await.unwrap_err();
        assert!(matches!(err, Error::RuntimeUnavailable { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_engine_lost_after_connect_is_runtime_unavailable() {
        let runtime = DockerRuntime {
            docker: Docker::connect_with_http("http://127.0.0.1:1", 2, API_DEFAULT_VERSION)
                .unwrap(),
        };
        let err = runtime.start("nginx:test").await.unwrap_err();
        assert!(matches!(err, Error::RuntimeUnavailable { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_start_failure_removes_created_container() {
        let (addr, seen) = fake_engine(vec![
            ("GET", "/_ping", 200, "OK"),
            ("POST", "/containers/create", 201, r#"{"Id":"abc123","Warnings":[]}"#),
            (
                "POST",
                "/containers/abc123/start",
                500,
                r#"{"message":"port is already allocated"}"#,
            ),
            ("DELETE", "/containers/abc123", 204, ""),
        ])
        .await;
        let runtime = DockerRuntime::from_client(client(addr)).await.unwrap();

        let err = runtime.start("nginx:test").await.unwrap_err();
        assert!(
            matches!(
                err,
                Error::Docker(DockerError::DockerResponseServerError {
                    status_code: 500,
                    ..
                })
            ),
            "{err:?}"
        );

        let seen = seen.lock().unwrap();
        let removal = seen
            .iter()
            .find(|line| line.starts_with("DELETE"))
            .expect("created container should be removed");
        assert!(removal.contains("/containers/abc123?"), "{removal}");
        assert!(removal.contains("force=true"), "{removal}");
    }

    #[tokio::test]
    async fn test_start_success_leaves_container() {
        let (addr, seen) = fake_engine(vec![
            ("GET", "/_ping", 200, "OK"),
            ("POST", "/containers/create", 201, r#"{"Id":"abc123","Warnings":[]}"#),
            ("POST", "/containers/abc123/start", 204, ""),
        ])
        .await;
        let runtime = DockerRuntime::from_client(client(addr)).await.unwrap();

        let handle = runtime.start("nginx:test").await.unwrap();
        assert_eq!(handle.id(), "abc123");
        assert!(handle.is_running());
        assert!(!seen.lock().unwrap().iter().any(|l| l.starts_with("DELETE")));
    }

    #[tokio::test]
    async fn test_stop_treats_missing_container_as_stopped() {
        let (addr, seen) = fake_engine(vec![
            ("GET", "/_ping", 200, "OK"),
            (
                "POST",
                "/containers/gone/stop",
                404,
                r#"{"message":"No such container: gone"}"#,
            ),
        ])
        .await;
        let runtime = DockerRuntime::from_client(client(addr)).await.unwrap();
        let mut handle = running_handle("gone");

        runtime.stop(&mut handle).await;
        assert!(!handle.is_running());
        assert!(seen.lock().unwrap().iter().any(|l| l.contains("/containers/gone/stop")));
    }

    #[tokio::test]
    async fn test_stop_error_still_marks_stopped() {
        let (addr, _seen) = fake_engine(vec![
            ("GET", "/_ping", 200, "OK"),
            ("POST", "/containers/stuck/stop", 500, r#"{"message":"engine busy"}"#),
        ])
        .await;
        let runtime = DockerRuntime::from_client(client(addr)).await.unwrap();
        let mut handle = running_handle("stuck");

        runtime.stop(&mut handle).await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_stop_skips_container_not_running() {
        let (addr, seen) = fake_engine(vec![("GET", "/_ping", 200, "OK")]).await;
        let runtime = DockerRuntime::from_client(client(addr)).await.unwrap();
        let mut handle = ContainerHandle::new("never-started", "nginx:test");

        runtime.stop(&mut handle).await;
        let seen = seen.lock().unwrap();
        assert!(!seen.iter().any(|l| l.contains("/stop")), "{seen:?}");
    }

    #[tokio::test]
    async fn test_resolve_address_of_exited_container() {
        let (addr, _seen) = fake_engine(vec![
            ("GET", "/_ping", 200, "OK"),
            (
                "GET",
                "/containers/exited/json",
                200,
                r#"{"Id":"exited","State":{"Running":false}}"#,
            ),
        ])
        .await;
        let runtime = DockerRuntime::from_client(client(addr)).await.unwrap();

        let err = runtime
            .resolve_address(&running_handle("exited"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Inspection of container exited failed: container is not running"
        );
    }

    #[test]
    fn test_address_prefers_top_level_ip() {
        let details = inspect_response(true, Some("172.17.0.2"), Some("172.17.0.9"));
        assert_eq!(
            address_from_inspect(&details),
            Ok(IpAddr::from([172, 17, 0, 2]))
        );
    }

    #[test]
    fn test_address_falls_back_to_bridge_endpoint() {
        let details = inspect_response(true, Some(""), Some("172.17.0.9"));
        assert_eq!(
            address_from_inspect(&details),
            Ok(IpAddr::from([172, 17, 0, 9]))
        );
        let details = inspect_response(true, None, Some("172.17.0.9"));
        assert_eq!(
            address_from_inspect(&details),
            Ok(IpAddr::from([172, 17, 0, 9]))
        );
    }

    #[test]
    fn test_address_requires_running_container() {
        let details = inspect_response(false, Some("172.17.0.2"), None);
        assert_eq!(
            address_from_inspect(&details),
            Err("container is not running".to_string())
        );
        let details = ContainerInspectResponse::default();
        assert_eq!(
            address_from_inspect(&details),
            Err("container is not running".to_string())
        );
    }

    #[test]
    fn test_address_missing_or_unparseable() {
        let details = inspect_response(true, None, None);
        assert_eq!(
            address_from_inspect(&details),
            Err("no address assigned on the bridge network".to_string())
        );
        let details = inspect_response(true, Some("not-an-ip"), None);
        assert_eq!(
            address_from_inspect(&details),
            Err("unparseable address \"not-an-ip\"".to_string())
        );
    }

    #[test]
    fn test_engine_error_keeps_api_errors() {
        let err = engine_error(DockerError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        });
        assert!(matches!(err, Error::Docker(_)));
        assert!(matches!(
            engine_error(DockerError::RequestTimeoutError),
            Error::RuntimeUnavailable { .. }
        ));
    }

    #[test]
    fn test_split_reference_with_tag() {
        assert_eq!(split_reference("nginx:1.18"), ("nginx", "1.18"));
    }

    #[test]
    fn test_split_reference_defaults_to_latest() {
        assert_eq!(
            split_reference("1and1internet/debian-9-nginx"),
            ("1and1internet/debian-9-nginx", "latest")
        );
    }

    #[test]
    fn test_split_reference_registry_port_is_not_a_tag() {
        assert_eq!(
            split_reference("registry.local:5000/web"),
            ("registry.local:5000/web", "latest")
        );
        assert_eq!(
            split_reference("registry.local:5000/web:2"),
            ("registry.local:5000/web", "2")
        );
    }

    #[test]
    fn test_split_reference_digest() {
        let image = "nginx@sha256:abcdef";
        assert_eq!(split_reference(image), (image, ""));
    }

    #[test]
    fn test_frame_bytes_keeps_message() {
        let frame = LogOutput::StdErr {
            message: bytes::Bytes::from_static(b"warn\n"),
        };
        assert_eq!(&frame_bytes(frame)[..], b"warn\n");
    }
}
