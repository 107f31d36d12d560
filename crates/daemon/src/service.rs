//! The review-service seam, plus the ssh-based Gerrit implementation.
//!
//! Everything the dispatcher needs from the code-review service sits
//! behind [`ReviewService`] so tests can substitute a mock, mirroring
//! how the build side sits behind an external program.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use verifier_core::{ChangeFilter, ReviewVerdict, RevisionId};

/// Unbounded live subscription to review-service events. One feed per
/// connection; a finished feed cannot be restarted, only reopened.
#[async_trait]
pub trait EventFeed: Send {
    /// Next raw event line, or `None` once the remote side hangs up.
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Query and control surface of the code-review service.
#[async_trait]
pub trait ReviewService: Send + Sync {
    /// Cheap call proving the service is reachable; gates startup.
    async fn check_connectivity(&self) -> Result<()>;

    /// Opens a fresh event subscription.
    async fn open_events(&self) -> Result<Box<dyn EventFeed>>;

    /// One reconciliation query: open changes under `filter` not yet
    /// verified by the service account, current revision of each.
    async fn poll_unverified(&self, filter: &ChangeFilter) -> Result<Vec<RevisionId>>;

    /// Liveness probe: does `revision` still belong to an open change
    /// matching `filter`?
    async fn change_is_open(&self, revision: &RevisionId, filter: &ChangeFilter) -> Result<bool>;

    /// Publishes a Verified score. Failures are the caller's to log;
    /// they are never retried here, the next reconciliation pass
    /// recovers naturally.
    async fn post_review(&self, verdict: &ReviewVerdict) -> Result<()>;
}

/// Gerrit reached over its ssh command-line API.
#[derive(Clone, Debug)]
pub struct SshGerrit {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl SshGerrit {
    fn gerrit_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg(format!("{}@{}", self.user, self.host))
            .arg("gerrit");
        cmd.stdin(Stdio::null());
        cmd
    }

    async fn run_gerrit(&self, args: &[&str]) -> Result<String> {
        let verb = args.first().copied().unwrap_or_default();
        let mut cmd = self.gerrit_command();
        cmd.args(args);
        let out = cmd
            .output()
            .await
            .with_context(|| format!("running gerrit {verb}"))?;
        if !out.status.success() {
            return Err(anyhow!(
                "gerrit {verb} failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    /// Extracts current-patch-set revisions from JSON-lines query
    /// output. The trailing stats row has no patch set and is skipped.
    fn revisions_from_query(output: &str) -> Result<Vec<RevisionId>> {
        let mut revisions = Vec::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let row: serde_json::Value =
                serde_json::from_str(line).context("decoding query row")?;
            if let Some(rev) = row.pointer("/currentPatchSet/revision").and_then(|v| v.as_str()) {
                revisions.push(RevisionId::from_str(rev));
            }
        }
        Ok(revisions)
    }
}

#[async_trait]
impl ReviewService for SshGerrit {
    async fn check_connectivity(&self) -> Result<()> {
        self.run_gerrit(&["version"]).await.map(|_| ())
    }

    async fn open_events(&self) -> Result<Box<dyn EventFeed>> {
        let mut cmd = self.gerrit_command();
        cmd.args([
            "stream-events",
            "-s",
            "comment-added",
            "-s",
            "patchset-created",
            "-s",
            "ref-updated",
        ]);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        cmd.kill_on_drop(true);
        let mut child = cmd.spawn().context("spawning event subscription")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("event subscription has no stdout"))?;
        Ok(Box::new(SshEventFeed {
            _child: child,
            lines: BufReader::new(stdout).lines(),
        }))
    }

    async fn poll_unverified(&self, filter: &ChangeFilter) -> Result<Vec<RevisionId>> {
        let query = format!(
            "status:open project:{} branch:{} owner:{} -label:Verified>=-1,user={}",
            filter.project, filter.branch, filter.account, filter.account
        );
        let out = self
            .run_gerrit(&["query", "--format", "JSON", "--current-patch-set", &query])
            .await?;
        Self::revisions_from_query(&out)
    }

    async fn change_is_open(&self, revision: &RevisionId, filter: &ChangeFilter) -> Result<bool> {
        let query = format!(
            "commit:{} status:open project:{} branch:{} owner:{}",
            revision, filter.project, filter.branch, filter.account
        );
        let out = self
            .run_gerrit(&["query", "--format", "JSON", "--current-patch-set", &query])
            .await?;
        Ok(!Self::revisions_from_query(&out)?.is_empty())
    }

    async fn post_review(&self, verdict: &ReviewVerdict) -> Result<()> {
        let score = format!("{:+}", verdict.score);
        self.run_gerrit(&[
            "review",
            "--project",
            &verdict.project,
            "--verified",
            &score,
            "--notify",
            verdict.notify.as_arg(),
            verdict.revision.as_str(),
        ])
        .await
        .map(|_| ())
    }
}

/// Feed backed by the stdout of a long-lived `gerrit stream-events`
/// subprocess. Dropping the feed kills the subscription.
struct SshEventFeed {
    _child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl EventFeed for SshEventFeed {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}
