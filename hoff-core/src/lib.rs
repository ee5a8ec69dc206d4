//! Pure core of the Hoff merge train.
//!
//! This crate contains everything that can be computed without I/O:
//! - **State**: what the bot knows about a project (`ProjectState`)
//! - **Events**: what happened (`Event`)
//! - **Actions**: what to do (`ActionRunner`, the four-leaf action algebra)
//! - **Handler**: the deterministic transition that maps an event onto the
//!   state, plus the `proceed` loop that advances the integration pipeline
//!   to a fixed point after each event.
//!
//! The server crate supplies the production `ActionRunner` (Git and GitHub
//! drivers); tests supply scripted doubles, which makes the whole
//! transition a pure function of `(event, state)`.

pub mod command;
pub mod event;
pub mod handler;
pub mod project;
pub mod types;

pub use command::CommandMatcher;
pub use event::Event;
pub use handler::{handle_event, proceed_until_fixed_point, ActionRunner};
pub use project::{ProjectState, PullRequest};
pub use types::{
    Branch, BuildStatus, CloneResult, IntegrationStatus, PullRequestId, PushResult, Sha, Username,
};
