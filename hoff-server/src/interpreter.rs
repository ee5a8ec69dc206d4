//! The action interpreter: the single place effects happen.
//!
//! Implements the core's [`ActionRunner`] over the Git and GitHub
//! drivers. One interpreter per project, called only from that project's
//! logic worker, so the working copy is never shared.
//!
//! Git failures fold into the action results (a broken clone surfaces as
//! a conflict or a rejected push, and the queue moves on). Host failures
//! do not: a comment or permission check that cannot be delivered means
//! the pipeline would silently diverge from what users see, so the
//! interpreter panics and takes the worker, and with it the process,
//! down.

use tracing::info;

use hoff_core::{ActionRunner, Branch, PullRequestId, PushResult, Sha, Username};

use crate::config::ProjectConfig;
use crate::git::GitDriver;
use crate::github::GithubClient;

pub struct Interpreter {
    git: GitDriver,
    github: GithubClient,
    target_branch: String,
    test_branch: String,
    read_only: bool,
}

impl Interpreter {
    pub fn new(git: GitDriver, github: GithubClient, project: &ProjectConfig, read_only: bool) -> Self {
        Interpreter {
            git,
            github,
            target_branch: project.branch.clone(),
            test_branch: project.test_branch.clone(),
            read_only,
        }
    }
}

impl ActionRunner for Interpreter {
    fn try_integrate(
        &mut self,
        message: &str,
        candidate_ref: &str,
        candidate_sha: &Sha,
    ) -> Option<Sha> {
        self.git.ensure_cloned();
        // In read-only mode the rebase still runs locally so the state
        // machine can be observed; only the test branch push is skipped.
        let publish = !self.read_only;
        self.git.try_integrate(
            message,
            candidate_ref,
            candidate_sha,
            &self.target_branch,
            &self.test_branch,
            publish,
        )
    }

    fn try_promote(&mut self, branch: &Branch, sha: &Sha) -> PushResult {
        if self.read_only {
            info!(
                "read-only: would promote {} to {}",
                sha.short(),
                self.target_branch
            );
            return PushResult::Ok;
        }
        self.git.ensure_cloned();
        // Rewrite the pull request branch first so the host marks the
        // pull request merged once the target fast-forwards.
        self.git.force_push(sha, &branch.0);
        self.git.push(sha, &self.target_branch)
    }

    fn leave_comment(&mut self, id: PullRequestId, body: &str) {
        if self.read_only {
            info!("read-only: would comment on #{id}: {body}");
            return;
        }
        if let Err(e) = self.github.leave_comment(id, body) {
            panic!("leaving a comment on #{id} failed: {e:#}");
        }
    }

    fn is_reviewer(&mut self, username: &Username) -> bool {
        match self.github.has_push_access(username) {
            Ok(result) => result,
            Err(e) => panic!("reviewer check for {username} failed: {e:#}"),
        }
    }
}
