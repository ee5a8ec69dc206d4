//! Hoff daemon: webhook intake, drivers, interpreter, and per-project
//! workers around the pure state machine in `hoff-core`.

pub mod config;
pub mod git;
pub mod github;
pub mod interpreter;
pub mod persistence;
pub mod queue;
pub mod webhook;
pub mod worker;

use crate::queue::WebhookSender;

/// Shared state of the HTTP layer: the webhook secret and one intake
/// queue per configured project.
pub struct AppState {
    pub webhook_secret: String,
    pub projects: Vec<ProjectQueue>,
}

/// Routing entry for one project's webhook intake.
pub struct ProjectQueue {
    pub owner: String,
    pub repository: String,
    pub sender: WebhookSender,
}

impl AppState {
    /// Finds the intake queue for a repository, if it is one of ours.
    pub fn project_queue(&self, owner: &str, repository: &str) -> Option<&WebhookSender> {
        self.projects
            .iter()
            .find(|p| p.owner == owner && p.repository == repository)
            .map(|p| &p.sender)
    }
}
