//! Remote command execution inside destination pods
//!
//! [`RemoteExecutor`] runs an argument vector in a pod container and waits
//! for it to finish. [`RemoteFile`] is a sequential byte sink built on top
//! of it: every write becomes one remote append command.

use async_trait::async_trait;
use bytes::Bytes;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};

/// Container a command runs in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

/// Captured result of a remote command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a [`Error::Command`] naming `step`
    pub fn check(self, step: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::command(step, self.exit_code, self.stderr.trim()))
        }
    }
}

/// Runs commands inside a pod container
#[async_trait]
pub trait RemoteExecutor: Send + Sync + 'static {
    /// Run `command`, optionally feeding `stdin`, and wait for completion.
    ///
    /// A command that runs and exits non-zero is reported through
    /// [`ExecOutput::exit_code`]; `Err` means the channel itself failed.
    async fn exec(
        &self,
        target: &ExecTarget,
        command: &[String],
        stdin: Option<Bytes>,
    ) -> Result<ExecOutput>;
}

/// Executes through the Kubernetes pod `exec` subresource
#[derive(Clone)]
pub struct KubeExecutor {
    client: Client,
}

impl KubeExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Map the status reported on the exec error channel to an exit code
pub fn exit_code_from_status(status: Option<&Status>) -> Result<i32> {
    let Some(status) = status else {
        return Err(Error::exec("exec stream closed without a status"));
    };

    if status.status.as_deref() == Some("Success") {
        return Ok(0);
    }

    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|c| c.reason.as_deref() == Some("ExitCode"))
            })
            .and_then(|c| c.message.as_deref())
            .and_then(|m| m.parse::<i32>().ok())
            .unwrap_or(1);
        return Ok(code);
    }

    Err(Error::exec(
        status
            .message
            .clone()
            .unwrap_or_else(|| "exec failed without a message".to_string()),
    ))
}

#[async_trait]
impl RemoteExecutor for KubeExecutor {
    async fn exec(
        &self,
        target: &ExecTarget,
        command: &[String],
        stdin: Option<Bytes>,
    ) -> Result<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let params = AttachParams::default()
            .container(target.container.clone())
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);

        debug!(
            namespace = %target.namespace,
            pod = %target.pod,
            container = %target.container,
            command = ?command,
            "Executing remote command"
        );

        let mut attached = pods.exec(&target.pod, command.to_vec(), &params).await?;

        let status = attached
            .take_status()
            .ok_or_else(|| Error::exec("exec status channel unavailable"))?;
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let writer = attached.stdin();

        let write_stdin = async move {
            if let (Some(mut writer), Some(data)) = (writer, stdin) {
                writer.write_all(&data).await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let (written, stdout, stderr) = tokio::join!(write_stdin, read_all(stdout), read_all(stderr));
        written.map_err(|e| Error::exec(format!("could not write stdin: {}", e)))?;
        let stdout = stdout.map_err(|e| Error::exec(format!("could not read stdout: {}", e)))?;
        let stderr = stderr.map_err(|e| Error::exec(format!("could not read stderr: {}", e)))?;

        let status = status.await;
        attached
            .join()
            .await
            .map_err(|e| Error::exec(format!("exec session failed: {}", e)))?;

        Ok(ExecOutput {
            exit_code: exit_code_from_status(status.as_ref())?,
            stdout,
            stderr,
        })
    }
}

/// Appends exactly `$1` bytes of stdin to the file `$0`. Bounded by length so
/// the command ends without waiting for stdin to close.
const APPEND_SCRIPT: &str = "head -c \"$1\" >> \"$0\"";

/// Sequential byte sink bound to one path inside a pod
pub struct RemoteFile<'a> {
    executor: &'a dyn RemoteExecutor,
    target: &'a ExecTarget,
    path: String,
    written: u64,
}

impl<'a> RemoteFile<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, target: &'a ExecTarget, path: impl Into<String>) -> Self {
        Self {
            executor,
            target,
            path: path.into(),
            written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append `data` to the remote file
    pub async fn write(&mut self, data: Bytes) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let len = data.len();
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            APPEND_SCRIPT.to_string(),
            self.path.clone(),
            len.to_string(),
        ];
        self.executor
            .exec(self.target, &command, Some(data))
            .await?
            .check(&format!("write {}", self.path))?;
        self.written += len as u64;
        Ok(len)
    }
}
