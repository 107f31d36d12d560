//! Runs the external verification program for one revision.
//!
//! The program is invoked as `program <revision>` with stdout/stderr
//! captured to files inside the lock directory for post-mortem
//! inspection, and a private scratch directory via `TMPDIR`. The call
//! waits for as long as the program runs; timeout enforcement is the
//! program's own business.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;
use verifier_core::{classify, RevisionId, VerificationOutcome};

pub const STDOUT_LOG: &str = "build.stdout.log";
pub const STDERR_LOG: &str = "build.stderr.log";

pub async fn run_verification(
    program: &Path,
    revision: &RevisionId,
    lock_dir: &Path,
) -> Result<VerificationOutcome> {
    let scratch = lock_dir.join("tmp");
    std::fs::create_dir_all(&scratch)?;
    let stdout = std::fs::File::create(lock_dir.join(STDOUT_LOG))?;
    let stderr = std::fs::File::create(lock_dir.join(STDERR_LOG))?;

    let status = Command::new(program)
        .arg(revision.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .env("TMPDIR", &scratch)
        .status()
        .await
        .with_context(|| format!("spawning {}", program.display()))?;

    let outcome = classify(status.code());
    debug!(revision = %revision, code = ?status.code(), outcome = ?outcome, "verification job finished");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_job(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("job.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn exit_zero_is_success_and_logs_are_captured() {
        let tmp = tempfile::tempdir().unwrap();
        let program = write_job(tmp.path(), "echo building \"$1\"");
        let lock_dir = tmp.path().join("lock");
        std::fs::create_dir(&lock_dir).unwrap();

        let outcome = run_verification(&program, &RevisionId::from_str("abc123"), &lock_dir)
            .await
            .unwrap();
        assert_eq!(outcome, VerificationOutcome::Success);

        let stdout = std::fs::read_to_string(lock_dir.join(STDOUT_LOG)).unwrap();
        assert_eq!(stdout.trim(), "building abc123");
        assert!(lock_dir.join(STDERR_LOG).exists());
    }

    #[tokio::test]
    async fn sentinel_exits_map_to_skips() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_dir = tmp.path().join("lock");
        std::fs::create_dir(&lock_dir).unwrap();
        let rev = RevisionId::from_str("abc123");

        let program = write_job(tmp.path(), "exit 66");
        let outcome = run_verification(&program, &rev, &lock_dir).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::RefMissingSkip);

        let program = write_job(tmp.path(), "exit 75");
        let outcome = run_verification(&program, &rev, &lock_dir).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::TransientSkip);
    }

    #[tokio::test]
    async fn other_exits_are_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_dir = tmp.path().join("lock");
        std::fs::create_dir(&lock_dir).unwrap();

        let program = write_job(tmp.path(), "echo broken >&2; exit 7");
        let outcome = run_verification(&program, &RevisionId::from_str("abc123"), &lock_dir)
            .await
            .unwrap();
        assert_eq!(outcome, VerificationOutcome::Failure);

        let stderr = std::fs::read_to_string(lock_dir.join(STDERR_LOG)).unwrap();
        assert_eq!(stderr.trim(), "broken");
    }

    #[tokio::test]
    async fn scratch_dir_lives_inside_the_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_dir = tmp.path().join("lock");
        std::fs::create_dir(&lock_dir).unwrap();

        let program = write_job(tmp.path(), "printf %s \"$TMPDIR\"");
        run_verification(&program, &RevisionId::from_str("abc123"), &lock_dir)
            .await
            .unwrap();

        let stdout = std::fs::read_to_string(lock_dir.join(STDOUT_LOG)).unwrap();
        assert_eq!(PathBuf::from(stdout), lock_dir.join("tmp"));
    }
}
