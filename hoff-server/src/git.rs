//! Git CLI driver.
//!
//! All operations shell out to the `git` binary inside (or creating) the
//! project's working copy. The driver is synchronous: it runs on the
//! logic worker's thread, which is the working copy's only owner.
//!
//! Expected failure modes fold into the result channel rather than
//! erroring: a conflicted rebase is `None`, a non-fast-forward push is
//! `Rejected`, and a working copy that never got cloned makes every
//! operation surface the same way. Only the interpreter decides what is
//! fatal.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use hoff_core::{CloneResult, PushResult, Sha};

/// Attempts `ensure_cloned` makes before giving up.
const CLONE_ATTEMPTS: u32 = 3;

pub struct GitDriver {
    checkout: PathBuf,
    url: String,
}

impl GitDriver {
    pub fn new(checkout: PathBuf, url: String) -> Self {
        GitDriver { checkout, url }
    }

    /// Whether the working copy exists.
    pub fn directory_exists(&self) -> bool {
        self.checkout.join(".git").is_dir()
    }

    /// Clones the repository into the checkout directory.
    pub fn clone_repository(&self) -> CloneResult {
        info!("cloning {} into {}", self.url, self.checkout.display());
        let output = Command::new("git")
            .arg("clone")
            .arg(&self.url)
            .arg(&self.checkout)
            .output();
        match output {
            Ok(output) if output.status.success() => CloneResult::Ok,
            Ok(output) => {
                warn!("clone of {} failed: {}", self.url, stderr_text(&output));
                CloneResult::Failed
            }
            Err(e) => {
                warn!("clone of {} failed to start: {}", self.url, e);
                CloneResult::Failed
            }
        }
    }

    /// Idempotent: clones the working copy if it does not exist, with up
    /// to three attempts and no backoff. Gives up silently after that;
    /// subsequent operations fail and surface as conflict or rejection.
    pub fn ensure_cloned(&self) {
        if self.directory_exists() {
            return;
        }
        for attempt in 1..=CLONE_ATTEMPTS {
            match self.clone_repository() {
                CloneResult::Ok => return,
                CloneResult::Failed => {
                    warn!("clone attempt {attempt}/{CLONE_ATTEMPTS} of {} failed", self.url)
                }
            }
        }
    }

    /// Rebases `candidate_sha` onto the tip of `target_branch`, records
    /// the result as a merge commit, and publishes it to `test_branch`
    /// (skipped when `publish` is false). Returns the commit the test
    /// branch now points at, or `None` if the rebase conflicted or any
    /// git step failed.
    pub fn try_integrate(
        &self,
        message: &str,
        candidate_ref: &str,
        candidate_sha: &Sha,
        target_branch: &str,
        test_branch: &str,
        publish: bool,
    ) -> Option<Sha> {
        match self.integrate_inner(message, candidate_ref, candidate_sha, target_branch, test_branch, publish)
        {
            Ok(result) => result,
            Err(e) => {
                warn!("integration of {} failed: {:#}", candidate_sha, e);
                None
            }
        }
    }

    fn integrate_inner(
        &self,
        message: &str,
        candidate_ref: &str,
        candidate_sha: &Sha,
        target_branch: &str,
        test_branch: &str,
        publish: bool,
    ) -> Result<Option<Sha>> {
        self.run_checked(&["fetch", "origin", target_branch, candidate_ref])?;
        self.run_checked(&["checkout", "--detach", &candidate_sha.0])?;

        let rebase = self.run(&["rebase", &format!("origin/{target_branch}")])?;
        if !rebase.status.success() {
            info!(
                "rebase of {} onto {} conflicted: {}",
                candidate_sha.short(),
                target_branch,
                stderr_text(&rebase)
            );
            let abort = self.run(&["rebase", "--abort"])?;
            if !abort.status.success() {
                warn!("rebase --abort failed: {}", stderr_text(&abort));
            }
            return Ok(None);
        }
        let rebased = self.rev_parse_head()?;

        // Record the integration as a merge commit so the target branch
        // history shows who approved what; the rebased tip is a
        // descendant of the target, so this merge cannot conflict.
        self.run_checked(&[
            "checkout",
            "-B",
            test_branch,
            &format!("origin/{target_branch}"),
        ])?;
        self.run_checked(&["merge", "--no-ff", "-m", message, &rebased.0])?;
        let integrated = self.rev_parse_head()?;

        if publish {
            self.run_checked(&[
                "push",
                "--force",
                "origin",
                &format!("{}:refs/heads/{}", integrated.0, test_branch),
            ])?;
        }

        Ok(Some(integrated))
    }

    /// Fast-forward push. `Rejected` when the remote branch advanced (or
    /// the push failed for any other reason).
    pub fn push(&self, sha: &Sha, branch: &str) -> PushResult {
        let refspec = format!("{}:refs/heads/{}", sha.0, branch);
        match self.run(&["push", "origin", &refspec]) {
            Ok(output) if output.status.success() => PushResult::Ok,
            Ok(output) => {
                info!(
                    "push of {} to {} rejected: {}",
                    sha.short(),
                    branch,
                    stderr_text(&output)
                );
                PushResult::Rejected
            }
            Err(e) => {
                warn!("push of {} to {} failed to start: {:#}", sha.short(), branch, e);
                PushResult::Rejected
            }
        }
    }

    /// Force push, used to rewrite the pull request branch to the
    /// integrated commit so the host marks the pull request merged.
    pub fn force_push(&self, sha: &Sha, branch: &str) {
        let refspec = format!("{}:refs/heads/{}", sha.0, branch);
        match self.run(&["push", "--force", "origin", &refspec]) {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!(
                "force push of {} to {} failed: {}",
                sha.short(),
                branch,
                stderr_text(&output)
            ),
            Err(e) => warn!(
                "force push of {} to {} failed to start: {:#}",
                sha.short(),
                branch,
                e
            ),
        }
    }

    fn rev_parse_head(&self) -> Result<Sha> {
        let output = self.run_checked(&["rev-parse", "HEAD"])?;
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if sha.is_empty() {
            return Err(anyhow!("rev-parse HEAD produced no output"));
        }
        Ok(Sha(sha))
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.checkout)
            .args(args)
            .output()
            .with_context(|| format!("failed to run git {}", args.join(" ")))
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                stderr_text(&output)
            ))
        }
    }
}

fn stderr_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr
    }
}
