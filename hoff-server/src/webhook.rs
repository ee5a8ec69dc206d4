//! GitHub webhook intake.
//!
//! Verifies and parses webhook deliveries and enqueues them, without
//! blocking, onto the owning project's intake queue. Translation into
//! domain events happens in the webhook adapter (see `worker`); this
//! layer only decides relevance and answers quickly. A full queue turns
//! into a 503 so the host retries later; that is how backpressure from a
//! slow worker reaches the network.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::sync::mpsc::TrySendError;
use tracing::{info, warn};

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// A webhook delivery parsed far enough to route and translate. Action
/// and state strings stay raw; the adapter maps them onto domain events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub owner: String,
    pub repository: String,
    pub kind: HostEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEventKind {
    PullRequest {
        action: String,
        number: u64,
        source_branch: String,
        sha: String,
        title: String,
        author: String,
    },
    Comment {
        action: String,
        number: u64,
        author: String,
        body: String,
    },
    BuildStatus {
        sha: String,
        state: String,
    },
}

// Payload shapes, reduced to the fields we read.

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRequestData,
    repository: RepositoryData,
}

#[derive(Debug, Deserialize)]
struct PullRequestData {
    number: u64,
    title: String,
    user: UserData,
    head: RefData,
}

#[derive(Debug, Deserialize)]
struct RefData {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct UserData {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryData {
    name: String,
    owner: UserData,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    action: String,
    issue: IssueData,
    comment: CommentData,
    repository: RepositoryData,
}

#[derive(Debug, Deserialize)]
struct IssueData {
    number: u64,
    /// Present exactly when the issue is a pull request.
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    body: String,
    user: UserData,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    sha: String,
    state: String,
    repository: RepositoryData,
}

fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&signature_bytes).is_ok()
}

pub fn webhook_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/hook/github",
            post(github_webhook_handler).get(hook_wrong_method_handler),
        )
        .fallback(not_found_handler)
        .with_state(state)
}

async fn hook_wrong_method_handler() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        "expecting POST request at /hook/github",
    )
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let Some(event_type) = header_value(&headers, "x-github-event") else {
        return (
            StatusCode::BAD_REQUEST,
            "missing X-GitHub-Event header".to_string(),
        );
    };
    let Some(signature) = header_value(&headers, "x-hub-signature-256") else {
        return (
            StatusCode::BAD_REQUEST,
            "missing X-Hub-Signature-256 header".to_string(),
        );
    };
    if !verify_signature(&state.webhook_secret, &body, signature) {
        warn!("rejecting a delivery with an invalid signature");
        return (
            StatusCode::BAD_REQUEST,
            "signature does not match".to_string(),
        );
    }

    match event_type {
        "ping" => (StatusCode::OK, "pong".to_string()),
        "pull_request" => match parse_pull_request(&body) {
            Some(event) => enqueue(&state, event),
            None => bad_payload(),
        },
        "issue_comment" => match parse_comment(&body) {
            Ok(Some(event)) => enqueue(&state, event),
            // A comment on a plain issue; nothing for the merge queue.
            Ok(None) => hook_ignored(),
            Err(()) => bad_payload(),
        },
        "status" => match parse_status(&body) {
            Some(event) => enqueue(&state, event),
            None => bad_payload(),
        },
        other => {
            info!("ignoring hook of type {other}");
            hook_ignored()
        }
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn hook_ignored() -> (StatusCode, String) {
    (StatusCode::OK, "hook ignored".to_string())
}

fn bad_payload() -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, "failed to decode payload".to_string())
}

fn parse_pull_request(body: &[u8]) -> Option<HostEvent> {
    let payload: PullRequestPayload = serde_json::from_slice(body).ok()?;
    Some(HostEvent {
        owner: payload.repository.owner.login,
        repository: payload.repository.name,
        kind: HostEventKind::PullRequest {
            action: payload.action,
            number: payload.pull_request.number,
            source_branch: payload.pull_request.head.ref_name,
            sha: payload.pull_request.head.sha,
            title: payload.pull_request.title,
            author: payload.pull_request.user.login,
        },
    })
}

fn parse_comment(body: &[u8]) -> Result<Option<HostEvent>, ()> {
    let payload: CommentPayload = serde_json::from_slice(body).map_err(|_| ())?;
    if payload.issue.pull_request.is_none() {
        return Ok(None);
    }
    Ok(Some(HostEvent {
        owner: payload.repository.owner.login,
        repository: payload.repository.name,
        kind: HostEventKind::Comment {
            action: payload.action,
            number: payload.issue.number,
            author: payload.comment.user.login,
            body: payload.comment.body,
        },
    }))
}

fn parse_status(body: &[u8]) -> Option<HostEvent> {
    let payload: StatusPayload = serde_json::from_slice(body).ok()?;
    Some(HostEvent {
        owner: payload.repository.owner.login,
        repository: payload.repository.name,
        kind: HostEventKind::BuildStatus {
            sha: payload.sha,
            state: payload.state,
        },
    })
}

fn enqueue(state: &AppState, event: HostEvent) -> (StatusCode, String) {
    let Some(queue) = state.project_queue(&event.owner, &event.repository) else {
        info!(
            "ignoring hook for unconfigured repository {}/{}",
            event.owner, event.repository
        );
        return hook_ignored();
    };
    match queue.try_send(Some(event)) {
        Ok(()) => (StatusCode::OK, "hook received".to_string()),
        Err(TrySendError::Full(_)) => {
            warn!("webhook queue is full, asking the host to retry");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "webhook queue full, retry later".to_string(),
            )
        }
        Err(TrySendError::Disconnected(_)) => {
            warn!("webhook queue is gone, shutting down?");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "webhook queue unavailable".to_string(),
            )
        }
    }
}
