//! Domain events consumed by the event handler.
//!
//! Events are the webhook adapter's output: host payloads reduced to the
//! facts the state machine cares about. Duplicate or stale deliveries are
//! expected; the handler tolerates them.

use crate::types::{Branch, BuildStatus, PullRequestId, Sha, Username};

/// All events that can drive the project state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A pull request was opened (or reopened).
    PullRequestOpened {
        id: PullRequestId,
        branch: Branch,
        sha: Sha,
        title: String,
        author: Username,
    },

    /// The head of a pull request moved. May be a false positive carrying
    /// the sha we already know.
    PullRequestCommitChanged { id: PullRequestId, sha: Sha },

    PullRequestClosed { id: PullRequestId },

    CommentAdded {
        id: PullRequestId,
        author: Username,
        body: String,
    },

    /// CI reported a status for a commit. Addressed by the rebased sha,
    /// not by pull request id: only the current candidate's integrated
    /// commit is live, everything else is stale noise.
    BuildStatusChanged { sha: Sha, status: BuildStatus },
}

impl Event {
    /// Returns a summary of the event suitable for logging.
    ///
    /// Comment bodies are elided: they are user-controlled and can be
    /// arbitrarily large.
    pub fn log_summary(&self) -> String {
        match self {
            Event::PullRequestOpened {
                id, branch, sha, ..
            } => {
                format!(
                    "PullRequestOpened {{ id: {}, branch: {}, sha: {} }}",
                    id,
                    branch,
                    sha.short()
                )
            }
            Event::PullRequestCommitChanged { id, sha } => {
                format!(
                    "PullRequestCommitChanged {{ id: {}, sha: {} }}",
                    id,
                    sha.short()
                )
            }
            Event::PullRequestClosed { id } => {
                format!("PullRequestClosed {{ id: {} }}", id)
            }
            Event::CommentAdded { id, author, body } => {
                format!(
                    "CommentAdded {{ id: {}, author: {}, body_len: {} }}",
                    id,
                    author,
                    body.len()
                )
            }
            Event::BuildStatusChanged { sha, status } => {
                format!(
                    "BuildStatusChanged {{ sha: {}, status: {:?} }}",
                    sha.short(),
                    status
                )
            }
        }
    }
}
