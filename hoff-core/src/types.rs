//! Identifier newtypes and status enums for the merge train.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype for a pull request number, unique within a project and stable
/// across the pull request's lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PullRequestId(pub u64);

impl fmt::Display for PullRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PullRequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Newtype for a commit SHA to prevent mixing with other strings.
/// Equality is bytewise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha(pub String);

impl Sha {
    /// Returns a truncated SHA for display (first 7 characters).
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Sha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a branch name as visible on the host (the pull request's
/// source branch, or the integration target).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Branch(pub String);

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Branch {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a host login. Equality is case-sensitive; the host defines
/// the casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(pub String);

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Username {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// CI status of a pull request's integrated commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    /// No integration commit exists yet, so there is nothing to build.
    NotStarted,
    /// The integration commit was pushed to the test branch; CI is running.
    Pending,
    Succeeded,
    Failed,
}

/// Where a pull request is in the integration pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationStatus {
    NotIntegrated,
    /// Rebased onto the target branch; carries the commit pushed to the
    /// test branch.
    Integrated(Sha),
    /// The rebase conflicted; a human has to resolve it.
    Conflicted,
}

/// Result of pushing to a remote branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Ok,
    /// The remote branch advanced underneath us; the push was not a
    /// fast-forward.
    Rejected,
}

/// Result of cloning the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneResult {
    Ok,
    Failed,
}
