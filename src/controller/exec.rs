//! Command execution inside pods via the Kubernetes exec API
//!
//! Used by the upgrade script steps to run vendor scripts and to copy script
//! directories from the exec pod into the running dogu pod. A copy is a
//! `tar cf -` on the source pod whose output is streamed as stdin into a
//! `tar xf -` on the destination pod; the archive lives only in memory.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::kube_client::KubeClient;
use crate::controller::retry::{LinearBackoff, poll_with_linear_backoff};

/// A command with its arguments and optional stdin payload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShellCommand {
    pub command: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl ShellCommand {
    pub fn new<I, S>(command: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    /// Feed the given bytes to the command's stdin
    pub fn with_stdin(mut self, stdin: Vec<u8>) -> Self {
        self.stdin = Some(stdin);
        self
    }

    /// Full argument vector as passed to the container runtime
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.command.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Gate that has to hold before a command is executed in a pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodReadiness {
    /// All containers report `started`
    ContainersStarted,
    /// The pod's `Ready` condition is true
    PodReady,
}

/// Captured output of a finished command
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ExecOutput {
    /// Stdout and stderr joined for error messages
    pub fn combined(&self) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        match (stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.trim().to_string(),
            (true, false) => self.stderr.trim().to_string(),
            (false, false) => format!("{}\n{}", stdout.trim(), self.stderr.trim()),
        }
    }
}

/// Runs commands inside pods
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Wait for `readiness`, then run `command` in the first container of `pod`.
    ///
    /// A non-zero exit fails with `Error::ExecFailed` carrying the combined output.
    async fn exec_command_for_pod(
        &self,
        pod: &Pod,
        command: &ShellCommand,
        readiness: PodReadiness,
    ) -> Result<ExecOutput>;
}

/// True once every container of the pod reports `started`
pub fn containers_started(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .is_some_and(|statuses| {
            !statuses.is_empty() && statuses.iter().all(|c| c.started == Some(true))
        })
}

/// True when the pod's Ready condition is set
pub fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Pod phase as reported by the kubelet
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

fn readiness_reached(pod: &Pod, readiness: PodReadiness) -> bool {
    match readiness {
        PodReadiness::ContainersStarted => containers_started(pod),
        PodReadiness::PodReady => pod_ready(pod),
    }
}

/// Production executor using the websocket exec subresource
pub struct PodExecutor {
    client: Client,
    namespace: String,
    kube: Arc<dyn KubeClient>,
    wait: LinearBackoff,
}

impl PodExecutor {
    pub fn new(client: Client, namespace: &str, kube: Arc<dyn KubeClient>, wait: LinearBackoff) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            kube,
            wait,
        }
    }

    async fn wait_for(&self, pod_name: &str, readiness: PodReadiness) -> Result<()> {
        let operation = format!("pod {pod_name} to reach {readiness:?}");
        let kube = &self.kube;
        poll_with_linear_backoff(&self.wait, &operation, || async move {
            match kube.get_pod(pod_name).await? {
                Some(pod) if pod_phase(&pod) == Some("Failed") => Err(Error::ExecPodFailed {
                    pod: pod_name.to_string(),
                    reason: "pod failed before the command could run".to_string(),
                }),
                Some(pod) => Ok(readiness_reached(&pod, readiness)),
                None => Ok(false),
            }
        })
        .await
    }
}

#[async_trait]
impl CommandExecutor for PodExecutor {
    async fn exec_command_for_pod(
        &self,
        pod: &Pod,
        command: &ShellCommand,
        readiness: PodReadiness,
    ) -> Result<ExecOutput> {
        let pod_name = pod.name_any();
        self.wait_for(&pod_name, readiness).await?;

        debug!(pod = %pod_name, command = %command, "Executing command in pod");

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let attach_params = AttachParams {
            stdin: command.stdin.is_some(),
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };

        let mut attached = pods.exec(&pod_name, command.argv(), &attach_params).await?;

        if let Some(payload) = &command.stdin
            && let Some(mut stdin) = attached.stdin()
        {
            stdin.write_all(payload).await?;
            // Close stdin to signal end of input
            stdin.shutdown().await?;
        }

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let (stdout, stderr) = tokio::try_join!(read_stream(stdout), read_stream(stderr))?;
        let output = ExecOutput {
            stdout,
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        };

        let status = attached.take_status().ok_or_else(|| Error::ExecFailed {
            pod: pod_name.clone(),
            command: command.to_string(),
            output: "no exit status reported".to_string(),
        })?;

        if let Some(status) = status.await
            && status.status.as_deref() != Some("Success")
        {
            let mut message = output.combined();
            if message.is_empty() {
                message = status.message.unwrap_or_else(|| "command failed".to_string());
            }
            return Err(Error::ExecFailed {
                pod: pod_name,
                command: command.to_string(),
                output: message,
            });
        }

        Ok(output)
    }
}

async fn read_stream<R>(reader: Option<R>) -> Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}

/// Copy the contents of `source_dir` in `source` into `destination_dir` in `destination`.
///
/// The destination directory is created first. Any failure aborts the copy;
/// a partially transferred archive is never reused.
pub async fn copy_between_pods(
    executor: &dyn CommandExecutor,
    source: &Pod,
    source_dir: &str,
    destination: &Pod,
    destination_dir: &str,
) -> Result<()> {
    let archive = executor
        .exec_command_for_pod(
            source,
            &ShellCommand::new("tar", ["cf", "-", "-C", source_dir, "."]),
            PodReadiness::ContainersStarted,
        )
        .await?
        .stdout;

    executor
        .exec_command_for_pod(
            destination,
            &ShellCommand::new("/bin/mkdir", ["-p", destination_dir]),
            PodReadiness::ContainersStarted,
        )
        .await?;

    executor
        .exec_command_for_pod(
            destination,
            &ShellCommand::new("tar", ["xf", "-", "-C", destination_dir]).with_stdin(archive),
            PodReadiness::ContainersStarted,
        )
        .await?;

    info!(
        source = %source.name_any(),
        destination = %destination.name_any(),
        source_dir,
        destination_dir,
        "Copied directory between pods"
    );
    Ok(())
}
