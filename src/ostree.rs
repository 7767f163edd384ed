//! Snapshot sources.
//!
//! A [`SnapshotStore`] resolves refs, loads commit metadata and produces the
//! tar serialization of a commit. [`OstreeRepo`] drives the `ostree` CLI;
//! [`MemoryStore`] serves fixed bytes and is what the tests use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::SystemTime;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Metadata of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub checksum: String,
    pub timestamp: SystemTime,
    pub subject: Option<String>,
}

/// Read-only access to a store of immutable filesystem snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Resolve a ref (or checksum) to a commit checksum.
    async fn resolve_ref(&self, reference: &str) -> Result<String>;

    /// Load metadata for a resolved commit.
    async fn load_commit(&self, checksum: &str) -> Result<CommitInfo>;

    /// Start serializing a commit's tree as a tar stream.
    async fn export(&self, checksum: &str) -> Result<TreeStream>;
}

// ---------------------------------------------------------------------------
// TreeStream
// ---------------------------------------------------------------------------

/// The tar bytes of one commit plus a way to learn whether the producer
/// succeeded once the bytes run out.
pub struct TreeStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    exit: ExportExit,
}

/// How a tree producer finishes.
pub enum ExportExit {
    /// An exporter subprocess; its exit status decides.
    Process(Child),
    /// The outcome is already known (in-memory producers).
    Known(io::Result<()>),
}

impl TreeStream {
    /// Stream the stdout of a spawned exporter.
    pub fn from_child(mut child: Child) -> io::Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("exporter stdout is not piped"))?;
        Ok(Self {
            reader: Box::new(stdout),
            exit: ExportExit::Process(child),
        })
    }

    /// Stream any reader, reporting `outcome` at the end.
    pub fn from_reader(reader: Box<dyn AsyncRead + Send + Unpin>, outcome: io::Result<()>) -> Self {
        Self {
            reader,
            exit: ExportExit::Known(outcome),
        }
    }

    pub fn split(self) -> (Box<dyn AsyncRead + Send + Unpin>, ExportExit) {
        (self.reader, self.exit)
    }
}

impl ExportExit {
    /// Wait for the producer after its output hit end-of-stream.
    pub async fn finish(self) -> io::Result<()> {
        match self {
            ExportExit::Process(mut child) => check_status(child.wait().await?),
            ExportExit::Known(outcome) => outcome,
        }
    }

    /// Stop the producer early and reap it.
    pub async fn abort(self) {
        if let ExportExit::Process(mut child) = self {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "exporter already gone");
            }
            if let Err(e) = child.wait().await {
                warn!(error = %e, "failed to reap exporter");
            }
        }
    }
}

fn check_status(status: ExitStatus) -> io::Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("exporter exited with {}", status)))
    }
}

// ---------------------------------------------------------------------------
// OstreeRepo
// ---------------------------------------------------------------------------

/// An OSTree repository accessed through the `ostree` command.
#[derive(Debug, Clone)]
pub struct OstreeRepo {
    repo: PathBuf,
    binary: PathBuf,
}

impl OstreeRepo {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            binary: PathBuf::from("ostree"),
        }
    }

    /// Use a different `ostree` executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--repo={}", self.repo.display()));
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a metadata query and return its stdout.
    async fn query(&self, reference: &str, args: &[&str]) -> Result<String> {
        let resolution_error = |reason: String| Error::Resolution {
            reference: reference.to_string(),
            reason,
        };

        debug!(binary = %self.binary.display(), ?args, "running ostree");
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| resolution_error(format!("failed to run {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(resolution_error(if stderr.is_empty() {
                format!("ostree exited with {}", output.status)
            } else {
                stderr
            }));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| resolution_error("ostree printed non-UTF-8 output".to_string()))
    }
}

#[async_trait]
impl SnapshotStore for OstreeRepo {
    async fn resolve_ref(&self, reference: &str) -> Result<String> {
        let stdout = self.query(reference, &["rev-parse", reference]).await?;
        let checksum = stdout.trim();
        if !is_checksum(checksum) {
            return Err(Error::Resolution {
                reference: reference.to_string(),
                reason: format!("unexpected rev-parse output {:?}", checksum),
            });
        }
        Ok(checksum.to_string())
    }

    async fn load_commit(&self, checksum: &str) -> Result<CommitInfo> {
        let stdout = self.query(checksum, &["show", checksum]).await?;
        parse_show_output(checksum, &stdout).map_err(|reason| Error::Resolution {
            reference: checksum.to_string(),
            reason,
        })
    }

    async fn export(&self, checksum: &str) -> Result<TreeStream> {
        let export_error = |e: io::Error| Error::Export {
            snapshot: checksum.to_string(),
            reason: e.to_string(),
        };

        let child = self
            .command()
            .args(["export", checksum])
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(export_error)?;

        debug!(checksum, pid = ?child.id(), "spawned ostree export");
        TreeStream::from_child(child).map_err(export_error)
    }
}

/// A full SHA-256 hex checksum, as ostree names commits.
pub fn is_checksum(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Pull the commit date and subject out of `ostree show` output:
///
/// ```text
/// commit 0123…
/// ContentChecksum:  4567…
/// Date:  2024-05-01 12:30:00 +0000
///
///     Subject line
/// ```
fn parse_show_output(checksum: &str, stdout: &str) -> std::result::Result<CommitInfo, String> {
    let date = stdout
        .lines()
        .find_map(|line| line.strip_prefix("Date:"))
        .map(str::trim)
        .ok_or_else(|| "no Date: line in ostree show output".to_string())?;

    // ostree prints commit dates in UTC.
    let utc = date
        .strip_suffix("+0000")
        .map(str::trim_end)
        .ok_or_else(|| format!("commit date {:?} is not UTC", date))?;
    let timestamp = humantime::parse_rfc3339_weak(utc)
        .map_err(|e| format!("bad commit date {:?}: {}", date, e))?;

    let subject = stdout
        .lines()
        .skip_while(|line| !line.trim().is_empty())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string);

    Ok(CommitInfo {
        checksum: checksum.to_string(),
        timestamp,
        subject,
    })
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Snapshots held in memory: refs, commit metadata and pre-serialized tar
/// bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    refs: HashMap<String, String>,
    commits: HashMap<String, (CommitInfo, Vec<u8>)>,
    export_failure: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a commit whose tree serializes to `tree`, reachable via
    /// `reference`. The checksum is the SHA-256 of `tree`.
    pub fn insert(&mut self, reference: &str, timestamp: SystemTime, tree: Vec<u8>) -> String {
        let checksum = ocidir::blob::hex_from_digest(&ocidir::sha256_digest(&tree)).to_string();
        let info = CommitInfo {
            checksum: checksum.clone(),
            timestamp,
            subject: None,
        };
        self.refs.insert(reference.to_string(), checksum.clone());
        self.commits.insert(checksum.clone(), (info, tree));
        checksum
    }

    /// Make every export deliver its bytes and then report `reason` as a
    /// producer failure.
    pub fn fail_exports(mut self, reason: impl Into<String>) -> Self {
        self.export_failure = Some(reason.into());
        self
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn resolve_ref(&self, reference: &str) -> Result<String> {
        if let Some(checksum) = self.refs.get(reference) {
            return Ok(checksum.clone());
        }
        if self.commits.contains_key(reference) {
            return Ok(reference.to_string());
        }
        Err(Error::Resolution {
            reference: reference.to_string(),
            reason: "no such ref".to_string(),
        })
    }

    async fn load_commit(&self, checksum: &str) -> Result<CommitInfo> {
        self.commits
            .get(checksum)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| Error::Resolution {
                reference: checksum.to_string(),
                reason: "no such commit".to_string(),
            })
    }

    async fn export(&self, checksum: &str) -> Result<TreeStream> {
        let (_, tree) = self.commits.get(checksum).ok_or_else(|| Error::Export {
            snapshot: checksum.to_string(),
            reason: "no such commit".to_string(),
        })?;
        let outcome = match &self.export_failure {
            Some(reason) => Err(io::Error::other(reason.clone())),
            None => Ok(()),
        };
        Ok(TreeStream::from_reader(
            Box::new(io::Cursor::new(tree.clone())),
            outcome,
        ))
    }
}
