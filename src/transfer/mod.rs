//! Transfer of a resolved source into a resolved destination
//!
//! Two flavours, picked by destination kind:
//! - database load (claim-owned pod): stage, create database, decompress, load
//! - file copy (existing pod): stage only
//!
//! Both skip all work when the claim is already Ready and a check command shows
//! the result is still present in the pod.

pub mod naming;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::adapters::{ExecOutput, ExecTarget, RemoteExecutor, RemoteFile};
use crate::cancellation::cancellable;
use crate::error::{Error, Result};
use crate::metrics;
use crate::resolvers::{DestinationTarget, ObjectReader};

/// Result of a transfer that did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Work was already applied on a previous pass
    Skipped,
    Completed { bytes: u64 },
}

/// Shared inputs of a transfer
pub struct Transfer<'a> {
    pub executor: &'a dyn RemoteExecutor,
    pub destination: &'a DestinationTarget,
    /// Claim was already Ready before this pass
    pub already_ready: bool,
    pub chunk_size: usize,
    pub cancel: &'a CancellationToken,
}

/// Creates `$0` empty, truncating any partial file from an earlier pass
const TRUNCATE_SCRIPT: &str = ": > \"$0\"";

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

impl<'a> Transfer<'a> {
    async fn run(&self, target: &ExecTarget, step: &str, command: Vec<String>) -> Result<ExecOutput> {
        cancellable(self.cancel, self.executor.exec(target, &command, None))
            .await?
            .check(step)
    }

    /// True when `command` exits zero
    async fn succeeds(&self, target: &ExecTarget, command: Vec<String>) -> Result<bool> {
        let output = cancellable(self.cancel, self.executor.exec(target, &command, None)).await?;
        Ok(output.success())
    }

    /// Stream the whole source into `path`, truncating whatever was there.
    /// The file exists afterwards even when the source is empty.
    async fn stage(&self, target: &ExecTarget, reader: &mut ObjectReader, path: &str) -> Result<u64> {
        self.run(
            target,
            "create directory",
            argv(&["mkdir", "-p", naming::parent_dir(path)]),
        )
        .await?;
        self.run(
            target,
            "truncate staged file",
            argv(&["sh", "-c", TRUNCATE_SCRIPT, path]),
        )
        .await?;

        info!(
            namespace = %target.namespace,
            pod = %target.pod,
            container = %target.container,
            path,
            size = reader.size(),
            "Uploading file to pod"
        );

        let mut file = RemoteFile::new(self.executor, target, path);
        let copied = async {
            while let Some(chunk) = cancellable(self.cancel, reader.read(self.chunk_size)).await? {
                cancellable(self.cancel, file.write(chunk)).await?;
            }
            Ok::<_, Error>(file.bytes_written())
        }
        .await;

        copied.map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            other => Error::transfer(format!("Unable to copy file in pod: {}", other)),
        })
    }

    /// Stage the source and load it into a database named after the key.
    pub async fn load_into_database(&self, reader: &mut ObjectReader) -> Result<TransferOutcome> {
        const KIND: &str = "database";
        let target = self.destination.exec_target();
        let object = reader.object().clone();
        let database = naming::load_target_name(&object.key)?;
        let path = naming::staging_path(&object.bucket, &object.key);

        if self.already_ready
            && self
                .succeeds(&target, argv(&["test", "-d", naming::load_target_dir(&database).as_str()]))
                .await?
        {
            info!(database = %database, "Backup claim is already ready");
            metrics::TRANSFERS_TOTAL.with_label_values(&[KIND, "skipped"]).inc();
            return Ok(TransferOutcome::Skipped);
        }

        let _timer = metrics::TRANSFER_DURATION.with_label_values(&[KIND]).start_timer();
        let result = async {
            let bytes = self.stage(&target, reader, &path).await?;
            self.run(
                &target,
                "create database",
                argv(&[
                    "mysql",
                    "-e",
                    format!("CREATE DATABASE IF NOT EXISTS `{}`", database).as_str(),
                ]),
            )
            .await?;
            self.run(&target, "decompress", argv(&["xz", "-d", "-f", path.as_str()]))
                .await?;
            self.run(
                &target,
                "load database",
                argv(&[
                    "sh",
                    "-c",
                    "mysql \"$0\" < \"$1\"",
                    database.as_str(),
                    naming::strip_extension(&path),
                ]),
            )
            .await?;
            Ok::<_, Error>(bytes)
        }
        .await;

        record(KIND, &result);
        let bytes = result?;
        info!(database = %database, bytes, "Loaded backup into database");
        Ok(TransferOutcome::Completed { bytes })
    }

    /// Stage the source as a file in the destination.
    pub async fn copy_file(&self, reader: &mut ObjectReader) -> Result<TransferOutcome> {
        const KIND: &str = "file";
        let target = self.destination.exec_target();
        let object = reader.object().clone();
        let path = naming::staging_path(&object.bucket, &object.key);

        if self.already_ready && self.succeeds(&target, argv(&["test", "-f", path.as_str()])).await? {
            info!(path = %path, "Backup claim is already ready");
            metrics::TRANSFERS_TOTAL.with_label_values(&[KIND, "skipped"]).inc();
            return Ok(TransferOutcome::Skipped);
        }

        let _timer = metrics::TRANSFER_DURATION.with_label_values(&[KIND]).start_timer();
        let result = self.stage(&target, reader, &path).await;

        record(KIND, &result);
        let bytes = result?;
        info!(path = %path, bytes, "Copied backup into pod");
        Ok(TransferOutcome::Completed { bytes })
    }
}

fn record(kind: &str, result: &Result<u64>) {
    match result {
        Ok(bytes) => {
            metrics::TRANSFERS_TOTAL.with_label_values(&[kind, "success"]).inc();
            metrics::BYTES_TRANSFERRED
                .with_label_values(&[kind])
                .inc_by(*bytes as f64);
        }
        Err(_) => {
            metrics::TRANSFERS_TOTAL.with_label_values(&[kind, "failure"]).inc();
        }
    }
}
