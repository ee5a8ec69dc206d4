//! The pure event handler and the proceed loop.
//!
//! `handle_event` maps one domain event onto the project state, and
//! `proceed_until_fixed_point` then advances the integration pipeline until
//! nothing changes: select the first queued pull request, rebase it, react
//! to its build result, promote it. All effects go through the
//! [`ActionRunner`] the caller supplies, so with a scripted runner the
//! whole transition is a deterministic function of `(event, state)`, the
//! property that makes the state safe to persist and events safe to
//! replay.

use crate::command::CommandMatcher;
use crate::event::Event;
use crate::project::{ProjectState, PullRequest};
use crate::types::{
    Branch, BuildStatus, IntegrationStatus, PullRequestId, PushResult, Sha, Username,
};

/// Defensive cap on proceed steps per event. Every step either reaches the
/// fixed point or retires a pull request from the queue, so hitting this
/// means the step function stopped being monotonic.
const MAX_PROCEED_STEPS: usize = 64;

/// The four leaf actions of the integration pipeline.
///
/// The server crate implements this over the Git and GitHub drivers; tests
/// implement it with a scripted recording double. This is the only seam
/// through which the state machine touches the outside world.
pub trait ActionRunner {
    /// Rebase the candidate commit onto the target branch and publish the
    /// result to the test branch. `None` means the rebase conflicted.
    fn try_integrate(
        &mut self,
        message: &str,
        candidate_ref: &str,
        candidate_sha: &Sha,
    ) -> Option<Sha>;

    /// Push the integrated commit out: force-push it to the pull request
    /// branch, then fast-forward the target branch to it. `Rejected` means
    /// the target advanced underneath us.
    fn try_promote(&mut self, branch: &Branch, sha: &Sha) -> PushResult;

    /// Post a comment on the pull request.
    fn leave_comment(&mut self, id: PullRequestId, body: &str);

    /// Whether the user has push access, and thereby the right to approve
    /// merges.
    fn is_reviewer(&mut self, username: &Username) -> bool;
}

/// Applies a single event to the project state.
///
/// Events referencing unknown pull requests and stale build statuses are
/// dropped without touching the state; the host redelivers webhooks and
/// CI reports on commits we stopped caring about, and neither may corrupt
/// the queue.
pub fn handle_event<R: ActionRunner>(
    matcher: &CommandMatcher,
    runner: &mut R,
    event: Event,
    mut state: ProjectState,
) -> ProjectState {
    match event {
        Event::PullRequestOpened {
            id,
            branch,
            sha,
            title,
            author,
        } => {
            state.insert_pull_request(id, PullRequest::new(branch, sha, title, author));
            state
        }
        Event::PullRequestCommitChanged { id, sha } => handle_commit_changed(id, sha, state),
        Event::PullRequestClosed { id } => {
            state.remove_pull_request(id);
            state
        }
        Event::CommentAdded { id, author, body } => {
            handle_comment_added(matcher, runner, id, author, &body, state)
        }
        Event::BuildStatusChanged { sha, status } => {
            handle_build_status_changed(sha, status, state)
        }
    }
}

/// A changed head is handled as close-then-reopen: the pull request loses
/// its approval, any integration work, and its queue position, keeping
/// only branch, title and author. A reviewer approved a specific commit;
/// a new head needs a new approval.
fn handle_commit_changed(id: PullRequestId, sha: Sha, mut state: ProjectState) -> ProjectState {
    let same_sha = match state.pull_request(id) {
        // The host resends synchronize events; same sha means nothing moved.
        Some(existing) => existing.sha == sha,
        None => return state,
    };
    if same_sha {
        return state;
    }
    let Some(old) = state.remove_pull_request(id) else {
        return state;
    };
    state.insert_pull_request(id, PullRequest::new(old.branch, sha, old.title, old.author));
    state
}

fn handle_comment_added<R: ActionRunner>(
    matcher: &CommandMatcher,
    runner: &mut R,
    id: PullRequestId,
    author: Username,
    body: &str,
    mut state: ProjectState,
) -> ProjectState {
    if !state.contains(id) {
        return state;
    }
    if !matcher.is_merge_command(body) {
        return state;
    }
    if !runner.is_reviewer(&author) {
        return state;
    }
    let position = state.queue_position(id);
    if let Some(pr) = state.pull_request_mut(id) {
        pr.approved_by = Some(author.clone());
    }
    runner.leave_comment(id, &queue_position_comment(&author, position));
    state
}

fn queue_position_comment(approver: &Username, position: usize) -> String {
    match position {
        0 => format!("approved by @{approver}, rebasing now."),
        1 => format!("approved by @{approver}, waiting for rebase at the front of the queue."),
        n => format!("approved by @{approver}, waiting for rebase behind {n} pull requests."),
    }
}

/// Only the candidate's integrated commit is being built; a status for any
/// other sha is a stale CI report and is dropped.
fn handle_build_status_changed(
    sha: Sha,
    status: BuildStatus,
    mut state: ProjectState,
) -> ProjectState {
    let Some(candidate) = state.integration_candidate() else {
        return state;
    };
    let is_current = state
        .pull_request(candidate)
        .map(|pr| pr.integration_status == IntegrationStatus::Integrated(sha.clone()))
        .unwrap_or(false);
    if is_current {
        if let Some(pr) = state.pull_request_mut(candidate) {
            pr.build_status = status;
        }
    }
    state
}

/// Runs [`proceed`] until the state stops changing.
///
/// Termination: every step either leaves the state alone, clears the
/// candidate without creating queued pull requests, or moves a queued pull
/// request out of the eligibility predicate (`Integrated` or
/// `Conflicted`).
pub fn proceed_until_fixed_point<R: ActionRunner>(
    runner: &mut R,
    mut state: ProjectState,
) -> ProjectState {
    for _ in 0..MAX_PROCEED_STEPS {
        let next = proceed(runner, state.clone());
        if next == state {
            return next;
        }
        state = next;
    }
    panic!(
        "proceed did not reach a fixed point within {MAX_PROCEED_STEPS} steps; \
         project state: {state:?}"
    );
}

/// One step of the integration pipeline: advance the candidate if there is
/// one, otherwise pick the next queued pull request.
fn proceed<R: ActionRunner>(runner: &mut R, mut state: ProjectState) -> ProjectState {
    match state.integration_candidate() {
        Some(id) => {
            let build_status = match state.pull_request(id) {
                Some(pr) => pr.build_status,
                None => invariant_violation(id, "integration candidate is not in the map"),
            };
            match build_status {
                BuildStatus::NotStarted => {
                    invariant_violation(id, "integration candidate has no build")
                }
                BuildStatus::Pending => state,
                BuildStatus::Succeeded => push_candidate(runner, id, state),
                BuildStatus::Failed => {
                    runner.leave_comment(id, "The build failed.");
                    // The pull request stays in the map with its failed
                    // build; it cannot become a candidate again without a
                    // new head commit.
                    state.set_integration_candidate(None);
                    state
                }
            }
        }
        None => match state.next_queued() {
            Some(id) => try_integrate_pull_request(runner, id, state),
            None => state,
        },
    }
}

fn try_integrate_pull_request<R: ActionRunner>(
    runner: &mut R,
    id: PullRequestId,
    mut state: ProjectState,
) -> ProjectState {
    let (approver, candidate_sha) = match state.pull_request(id) {
        Some(pr) => match &pr.approved_by {
            Some(approver) => (approver.clone(), pr.sha.clone()),
            None => invariant_violation(id, "integrating a pull request that is not approved"),
        },
        None => invariant_violation(id, "integrating a pull request that is not in the map"),
    };
    let message = format!("Merge #{id}\n\nApproved-by: {approver}");
    let candidate_ref = format!("refs/pull/{id}/head");
    match runner.try_integrate(&message, &candidate_ref, &candidate_sha) {
        Some(integrated) => {
            runner.leave_comment(id, &format!("Rebased as {integrated}, waiting for CI …"));
            if let Some(pr) = state.pull_request_mut(id) {
                pr.integration_status = IntegrationStatus::Integrated(integrated);
                pr.build_status = BuildStatus::Pending;
            }
            state.set_integration_candidate(Some(id));
        }
        None => {
            runner.leave_comment(id, "Failed to rebase, please rebase manually.");
            if let Some(pr) = state.pull_request_mut(id) {
                pr.integration_status = IntegrationStatus::Conflicted;
            }
            state.set_integration_candidate(None);
        }
    }
    state
}

/// Promotes the candidate whose build succeeded: fast-forward the target
/// branch to the integrated commit.
fn push_candidate<R: ActionRunner>(
    runner: &mut R,
    id: PullRequestId,
    state: ProjectState,
) -> ProjectState {
    let (branch, integrated) = match state.pull_request(id) {
        Some(pr) => {
            if pr.approved_by.is_none() {
                invariant_violation(id, "promoting a pull request that is not approved");
            }
            if pr.build_status != BuildStatus::Succeeded {
                invariant_violation(id, "promoting a pull request whose build did not succeed");
            }
            match &pr.integration_status {
                IntegrationStatus::Integrated(sha) => (pr.branch.clone(), sha.clone()),
                _ => invariant_violation(id, "promoting a pull request that is not integrated"),
            }
        }
        None => invariant_violation(id, "promoting a pull request that is not in the map"),
    };
    match runner.try_promote(&branch, &integrated) {
        PushResult::Ok => {
            // The pull request stays in the map until the host reports it
            // closed, which it normally does right after the merge.
            let mut state = state;
            state.set_integration_candidate(None);
            state
        }
        // The target branch advanced while CI ran: the integrated commit
        // is no longer a fast-forward. Rebase the same pull request onto
        // the new tip and wait for CI again.
        PushResult::Rejected => try_integrate_pull_request(runner, id, state),
    }
}

/// An inconsistent candidate is a programmer error; crash loudly with the
/// pull request id so the state file can be inspected.
fn invariant_violation(id: PullRequestId, what: &str) -> ! {
    panic!("project state invariant violated for pull request #{id}: {what}");
}
