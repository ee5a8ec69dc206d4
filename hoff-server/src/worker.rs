//! The webhook adapter and the logic worker.
//!
//! Each project runs one adapter and one worker, connected by the bounded
//! queues. The adapter is the single consumer of the intake queue: it
//! filters deliveries by owner/repository, translates host payloads into
//! domain events, and forwards them with a blocking send. The logic
//! worker is the single consumer of the main queue and the only owner of
//! the project state: per event it runs the pure transition, drives the
//! proceed loop, persists the snapshot, and publishes it for readers.
//!
//! Both loops exit when the stop sentinel (`None`) drains through, or
//! when their queue disconnects.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tracing::{debug, info};

use hoff_core::{
    handle_event, proceed_until_fixed_point, ActionRunner, Branch, BuildStatus, CommandMatcher,
    Event, ProjectState, PullRequestId, Sha, Username,
};

use crate::config::ProjectConfig;
use crate::persistence;
use crate::queue::{LogicReceiver, LogicSender, WebhookReceiver};
use crate::webhook::{HostEvent, HostEventKind};

/// Latest state snapshot, replaced wholesale on every write. Readers get
/// an `Arc` to a consistent snapshot and never block the worker.
#[derive(Clone)]
pub struct StateSnapshot {
    inner: Arc<RwLock<Arc<ProjectState>>>,
}

impl StateSnapshot {
    pub fn new(state: ProjectState) -> Self {
        StateSnapshot {
            inner: Arc::new(RwLock::new(Arc::new(state))),
        }
    }

    pub fn get(&self) -> Arc<ProjectState> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, state: ProjectState) {
        let state = Arc::new(state);
        match self.inner.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }
}

/// Translates a host payload into a domain event, or `None` for payload
/// variants the state machine does not care about (label changes, edited
/// comments, unknown CI states, ...).
pub fn translate_host_event(kind: HostEventKind) -> Option<Event> {
    match kind {
        HostEventKind::PullRequest {
            action,
            number,
            source_branch,
            sha,
            title,
            author,
        } => {
            let id = PullRequestId(number);
            match action.as_str() {
                "opened" | "reopened" => Some(Event::PullRequestOpened {
                    id,
                    branch: Branch(source_branch),
                    sha: Sha(sha),
                    title,
                    author: Username(author),
                }),
                "synchronize" => Some(Event::PullRequestCommitChanged { id, sha: Sha(sha) }),
                "closed" => Some(Event::PullRequestClosed { id }),
                _ => None,
            }
        }
        HostEventKind::Comment {
            action,
            number,
            author,
            body,
        } => match action.as_str() {
            "created" => Some(Event::CommentAdded {
                id: PullRequestId(number),
                author: Username(author),
                body,
            }),
            _ => None,
        },
        HostEventKind::BuildStatus { sha, state } => {
            let status = match state.as_str() {
                "pending" => BuildStatus::Pending,
                "success" => BuildStatus::Succeeded,
                "failure" | "error" => BuildStatus::Failed,
                _ => return None,
            };
            Some(Event::BuildStatusChanged {
                sha: Sha(sha),
                status,
            })
        }
    }
}

/// Single consumer of the intake queue. Blocks on the main queue when
/// forwarding, so a slow logic worker backs the intake queue up and the
/// HTTP layer starts answering 503.
pub fn run_webhook_adapter(project: &ProjectConfig, intake: WebhookReceiver, logic: LogicSender) {
    info!(
        "webhook adapter for {}/{} started",
        project.owner, project.repository
    );
    loop {
        let item = match intake.recv() {
            Ok(item) => item,
            // All senders are gone; treat it like a stop.
            Err(_) => None,
        };
        let Some(host_event) = item else {
            let _ = logic.send(None);
            info!(
                "webhook adapter for {}/{} stopping",
                project.owner, project.repository
            );
            return;
        };
        if host_event.owner != project.owner || host_event.repository != project.repository {
            debug!(
                "dropping event for {}/{}",
                host_event.owner, host_event.repository
            );
            continue;
        }
        let Some(event) = translate_host_event(host_event.kind) else {
            continue;
        };
        info!(
            "{}/{}: {}",
            project.owner,
            project.repository,
            event.log_summary()
        );
        if logic.send(Some(event)).is_err() {
            // The worker is gone; nothing sensible left to do here.
            return;
        }
    }
}

/// Single consumer of the main queue; owns the project state.
pub struct LogicWorker<R: ActionRunner> {
    matcher: CommandMatcher,
    runner: R,
    state_file: PathBuf,
    state: ProjectState,
    snapshot: StateSnapshot,
}

impl<R: ActionRunner> LogicWorker<R> {
    pub fn new(matcher: CommandMatcher, runner: R, state_file: PathBuf, state: ProjectState) -> Self {
        let snapshot = StateSnapshot::new(state.clone());
        LogicWorker {
            matcher,
            runner,
            state_file,
            state,
            snapshot,
        }
    }

    /// Read-only view of the latest state, for a status page or similar.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot.clone()
    }

    /// Processes events in arrival order until the stop sentinel (or a
    /// disconnect) arrives. A persistence failure is returned and kills
    /// the worker: continuing without durable state would make a restart
    /// lose events.
    pub fn run(mut self, events: LogicReceiver) -> Result<()> {
        info!("logic worker started");
        while let Ok(Some(event)) = events.recv() {
            self.handle(event)?;
        }
        info!("logic worker stopping");
        Ok(())
    }

    fn handle(&mut self, event: Event) -> Result<()> {
        debug!("handling {}", event.log_summary());
        let state = handle_event(&self.matcher, &mut self.runner, event, self.state.clone());
        let state = proceed_until_fixed_point(&mut self.runner, state);
        persistence::save_state(&self.state_file, &state)
            .context("failed to persist the project state")?;
        self.snapshot.set(state.clone());
        self.state = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoff_core::{IntegrationStatus, PushResult};
    use std::sync::mpsc::sync_channel;

    /// Minimal scripted runner: bob is a reviewer, every rebase succeeds
    /// with a counter-derived sha, every promotion lands.
    #[derive(Default)]
    struct StubRunner {
        integrations: u64,
    }

    impl ActionRunner for StubRunner {
        fn try_integrate(&mut self, _message: &str, _candidate_ref: &str, _sha: &Sha) -> Option<Sha> {
            self.integrations += 1;
            Some(Sha(format!("integrated-{}", self.integrations)))
        }

        fn try_promote(&mut self, _branch: &Branch, _sha: &Sha) -> PushResult {
            PushResult::Ok
        }

        fn leave_comment(&mut self, _id: PullRequestId, _body: &str) {}

        fn is_reviewer(&mut self, username: &Username) -> bool {
            username == &Username::from("bob")
        }
    }

    fn project() -> ProjectConfig {
        ProjectConfig {
            owner: "o".to_string(),
            repository: "r".to_string(),
            branch: "main".to_string(),
            test_branch: "testing".to_string(),
            checkout: PathBuf::from("/tmp/unused"),
            state_file: PathBuf::from("/tmp/unused.json"),
        }
    }

    fn host(kind: HostEventKind) -> HostEvent {
        HostEvent {
            owner: "o".to_string(),
            repository: "r".to_string(),
            kind,
        }
    }

    #[test]
    fn pull_request_actions_translate_to_lifecycle_events() {
        let opened = translate_host_event(HostEventKind::PullRequest {
            action: "opened".to_string(),
            number: 7,
            source_branch: "feat".to_string(),
            sha: "aaa".to_string(),
            title: "t".to_string(),
            author: "alice".to_string(),
        });
        assert!(matches!(opened, Some(Event::PullRequestOpened { .. })));

        let synchronized = translate_host_event(HostEventKind::PullRequest {
            action: "synchronize".to_string(),
            number: 7,
            source_branch: "feat".to_string(),
            sha: "aa2".to_string(),
            title: "t".to_string(),
            author: "alice".to_string(),
        });
        assert_eq!(
            synchronized,
            Some(Event::PullRequestCommitChanged {
                id: PullRequestId(7),
                sha: Sha::from("aa2"),
            })
        );

        let labeled = translate_host_event(HostEventKind::PullRequest {
            action: "labeled".to_string(),
            number: 7,
            source_branch: "feat".to_string(),
            sha: "aaa".to_string(),
            title: "t".to_string(),
            author: "alice".to_string(),
        });
        assert_eq!(labeled, None);
    }

    #[test]
    fn only_created_comments_translate() {
        let created = translate_host_event(HostEventKind::Comment {
            action: "created".to_string(),
            number: 7,
            author: "bob".to_string(),
            body: "@bot merge".to_string(),
        });
        assert!(matches!(created, Some(Event::CommentAdded { .. })));

        let edited = translate_host_event(HostEventKind::Comment {
            action: "edited".to_string(),
            number: 7,
            author: "bob".to_string(),
            body: "@bot merge".to_string(),
        });
        assert_eq!(edited, None);
    }

    #[test]
    fn commit_status_states_map_to_build_statuses() {
        let case = |state: &str| {
            translate_host_event(HostEventKind::BuildStatus {
                sha: "bbb".to_string(),
                state: state.to_string(),
            })
        };
        assert_eq!(
            case("pending"),
            Some(Event::BuildStatusChanged {
                sha: Sha::from("bbb"),
                status: BuildStatus::Pending,
            })
        );
        assert_eq!(
            case("success"),
            Some(Event::BuildStatusChanged {
                sha: Sha::from("bbb"),
                status: BuildStatus::Succeeded,
            })
        );
        assert_eq!(
            case("failure"),
            Some(Event::BuildStatusChanged {
                sha: Sha::from("bbb"),
                status: BuildStatus::Failed,
            })
        );
        assert_eq!(
            case("error"),
            Some(Event::BuildStatusChanged {
                sha: Sha::from("bbb"),
                status: BuildStatus::Failed,
            })
        );
        assert_eq!(case("queued"), None);
    }

    #[test]
    fn adapter_filters_foreign_repositories_and_forwards_the_sentinel() {
        let (intake_tx, intake_rx) = sync_channel(8);
        let (logic_tx, logic_rx) = sync_channel(8);

        intake_tx
            .send(Some(HostEvent {
                owner: "someone-else".to_string(),
                repository: "r".to_string(),
                kind: HostEventKind::PullRequest {
                    action: "opened".to_string(),
                    number: 1,
                    source_branch: "b".to_string(),
                    sha: "aaa".to_string(),
                    title: "t".to_string(),
                    author: "alice".to_string(),
                },
            }))
            .unwrap();
        intake_tx
            .send(Some(host(HostEventKind::PullRequest {
                action: "opened".to_string(),
                number: 2,
                source_branch: "b".to_string(),
                sha: "bbb".to_string(),
                title: "t".to_string(),
                author: "alice".to_string(),
            })))
            .unwrap();
        intake_tx.send(None).unwrap();

        run_webhook_adapter(&project(), intake_rx, logic_tx);

        match logic_rx.recv().unwrap() {
            Some(Event::PullRequestOpened { id, .. }) => assert_eq!(id, PullRequestId(2)),
            other => panic!("expected the event for our repository, got {:?}", other),
        }
        assert_eq!(logic_rx.recv().unwrap(), None, "sentinel must be forwarded");
    }

    #[test]
    fn worker_processes_events_persists_and_stops_on_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("project.json");

        let worker = LogicWorker::new(
            CommandMatcher::new("@bot"),
            StubRunner::default(),
            state_file.clone(),
            ProjectState::new(),
        );
        let snapshot = worker.snapshot();

        let (tx, rx) = sync_channel(8);
        tx.send(Some(Event::PullRequestOpened {
            id: PullRequestId(7),
            branch: Branch::from("feat"),
            sha: Sha::from("aaa"),
            title: "t".to_string(),
            author: Username::from("alice"),
        }))
        .unwrap();
        tx.send(Some(Event::CommentAdded {
            id: PullRequestId(7),
            author: Username::from("bob"),
            body: "@bot merge".to_string(),
        }))
        .unwrap();
        tx.send(None).unwrap();

        let handle = std::thread::spawn(move || worker.run(rx));
        handle.join().unwrap().unwrap();

        let persisted = persistence::load_state(&state_file).unwrap();
        let pr = persisted.pull_request(PullRequestId(7)).unwrap();
        assert_eq!(pr.approved_by, Some(Username::from("bob")));
        assert_eq!(
            pr.integration_status,
            IntegrationStatus::Integrated(Sha::from("integrated-1"))
        );
        assert_eq!(persisted.integration_candidate(), Some(PullRequestId(7)));

        let published = snapshot.get();
        assert_eq!(*published, persisted, "register must hold the latest state");
    }

    #[test]
    fn worker_restores_and_republishes_the_initial_state() {
        let mut initial = ProjectState::new();
        initial.insert_pull_request(
            PullRequestId(3),
            hoff_core::PullRequest::new(
                Branch::from("feat"),
                Sha::from("ccc"),
                "t".to_string(),
                Username::from("alice"),
            ),
        );

        let worker = LogicWorker::new(
            CommandMatcher::new("@bot"),
            StubRunner::default(),
            PathBuf::from("/tmp/unused.json"),
            initial.clone(),
        );

        assert_eq!(*worker.snapshot().get(), initial);
    }
}
