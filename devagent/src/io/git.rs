//! Git adapter for repository metadata.
//!
//! Only a handful of read-mostly commands are needed, so we keep a small,
//! explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the full HEAD commit id.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn head(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        let sha = out.trim().to_string();
        if sha.is_empty() {
            return Err(anyhow!("git rev-parse HEAD returned nothing"));
        }
        debug!(head = %sha, "resolved HEAD");
        Ok(sha)
    }

    /// Create an empty repository in the working directory.
    pub fn init(&self) -> Result<()> {
        self.run_checked(&["init", "--quiet"])?;
        Ok(())
    }

    /// Stage everything and commit with a fixed local identity.
    ///
    /// Returns `Ok(false)` when there was nothing to commit.
    #[instrument(skip_all)]
    pub fn commit_all(&self, message: &str) -> Result<bool> {
        self.run_checked(&["add", "-A"])?;
        let staged = self.run(&["diff", "--cached", "--name-only"])?;
        if String::from_utf8_lossy(&staged.stdout).trim().is_empty() {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&[
            "-c",
            "user.name=devagent",
            "-c",
            "user.email=devagent@localhost",
            "commit",
            "--quiet",
            "-m",
            message,
        ])?;
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_fails_outside_a_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(Git::new(temp.path()).head().is_err());
    }

    #[test]
    fn head_reports_latest_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        git.init().expect("init");
        std::fs::write(temp.path().join("a.txt"), "a").expect("write");
        assert!(git.commit_all("first").expect("commit"));
        let first = git.head().expect("head");
        assert_eq!(first.len(), 40);

        assert!(!git.commit_all("noop").expect("commit"));
        std::fs::write(temp.path().join("b.txt"), "b").expect("write");
        assert!(git.commit_all("second").expect("commit"));
        assert_ne!(git.head().expect("head"), first);
    }
}
