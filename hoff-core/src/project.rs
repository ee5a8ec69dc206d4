//! Per-project state: the insertion-ordered pull request map and the
//! single integration candidate.
//!
//! The whole struct is the unit of persistence: it is serialized to a JSON
//! snapshot after every handled event and restored verbatim on startup, so
//! everything in here derives `Serialize`/`Deserialize` and nothing in here
//! may reference runtime-only resources.

use serde::{Deserialize, Serialize};

use crate::types::{Branch, BuildStatus, IntegrationStatus, PullRequestId, Sha, Username};

/// Everything the bot tracks about one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Source branch on the host.
    pub branch: Branch,
    /// Latest known head commit.
    pub sha: Sha,
    /// Last observed title.
    pub title: String,
    pub author: Username,
    /// Reviewer who issued a valid merge command. Cleared when the head
    /// commit changes and when the pull request closes.
    pub approved_by: Option<Username>,
    pub integration_status: IntegrationStatus,
    pub build_status: BuildStatus,
}

impl PullRequest {
    /// A freshly opened (or reopened) pull request: unapproved, not
    /// integrated, nothing built.
    pub fn new(branch: Branch, sha: Sha, title: String, author: Username) -> Self {
        PullRequest {
            branch,
            sha,
            title,
            author,
            approved_by: None,
            integration_status: IntegrationStatus::NotIntegrated,
            build_status: BuildStatus::NotStarted,
        }
    }

    /// A pull request is queued when it is approved and integration has
    /// not started. Queued pull requests are the candidates for the next
    /// rebase.
    pub fn is_queued(&self) -> bool {
        self.approved_by.is_some()
            && self.integration_status == IntegrationStatus::NotIntegrated
            && self.build_status == BuildStatus::NotStarted
    }
}

/// State of one project's merge queue.
///
/// Pull requests are kept in insertion order: queue position derives from
/// the order in which they were opened, and reinsertion (a changed head
/// commit) sends a pull request to the back. Project queues are small, so
/// a vector of pairs beats a map that would lose the ordering.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectState {
    pull_requests: Vec<(PullRequestId, PullRequest)>,
    integration_candidate: Option<PullRequestId>,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: PullRequestId) -> bool {
        self.pull_requests.iter().any(|(other, _)| *other == id)
    }

    pub fn pull_request(&self, id: PullRequestId) -> Option<&PullRequest> {
        self.pull_requests
            .iter()
            .find(|(other, _)| *other == id)
            .map(|(_, pr)| pr)
    }

    pub fn pull_request_mut(&mut self, id: PullRequestId) -> Option<&mut PullRequest> {
        self.pull_requests
            .iter_mut()
            .find(|(other, _)| *other == id)
            .map(|(_, pr)| pr)
    }

    /// Inserts a pull request at the back of the queue. A pull request
    /// that is already present keeps its position and has its value
    /// replaced.
    pub fn insert_pull_request(&mut self, id: PullRequestId, pull_request: PullRequest) {
        match self.pull_request_mut(id) {
            Some(existing) => *existing = pull_request,
            None => self.pull_requests.push((id, pull_request)),
        }
    }

    /// Removes a pull request. If it was the integration candidate, the
    /// candidate is cleared.
    pub fn remove_pull_request(&mut self, id: PullRequestId) -> Option<PullRequest> {
        if self.integration_candidate == Some(id) {
            self.integration_candidate = None;
        }
        let index = self
            .pull_requests
            .iter()
            .position(|(other, _)| *other == id)?;
        Some(self.pull_requests.remove(index).1)
    }

    pub fn integration_candidate(&self) -> Option<PullRequestId> {
        self.integration_candidate
    }

    pub fn set_integration_candidate(&mut self, candidate: Option<PullRequestId>) {
        debug_assert!(
            candidate.map_or(true, |id| self.contains(id)),
            "integration candidate must be a tracked pull request"
        );
        self.integration_candidate = candidate;
    }

    /// First queued pull request in insertion order, if any.
    pub fn next_queued(&self) -> Option<PullRequestId> {
        self.pull_requests
            .iter()
            .find(|(_, pr)| pr.is_queued())
            .map(|(id, _)| *id)
    }

    /// Number of pull requests that will be integrated before `id`: the
    /// current candidate (if it is someone else) plus queued pull requests
    /// inserted earlier.
    pub fn queue_position(&self, id: PullRequestId) -> usize {
        let candidate_ahead = match self.integration_candidate {
            Some(candidate) if candidate != id => 1,
            _ => 0,
        };
        let queued_ahead = self
            .pull_requests
            .iter()
            .take_while(|(other, _)| *other != id)
            .filter(|(_, pr)| pr.is_queued())
            .count();
        candidate_ahead + queued_ahead
    }

    /// Pull requests in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (PullRequestId, &PullRequest)> {
        self.pull_requests.iter().map(|(id, pr)| (*id, pr))
    }

    pub fn len(&self) -> usize {
        self.pull_requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pull_requests.is_empty()
    }
}
