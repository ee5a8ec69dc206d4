//! Atomic project state snapshots.
//!
//! The worker persists the state after every handled event; a crash
//! between two events therefore restarts from the last fully-handled one.
//! Writes go through a temporary file in the same directory and a rename,
//! so a torn snapshot can never be observed.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hoff_core::ProjectState;

/// Loads the persisted state, or an empty one when the file does not
/// exist yet.
pub fn load_state(path: &Path) -> Result<ProjectState> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ProjectState::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read state from {}", path.display()))
        }
    };
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to decode state in {}", path.display()))
}

/// Writes the state atomically.
pub fn save_state(path: &Path, state: &ProjectState) -> Result<()> {
    let encoded = serde_json::to_vec_pretty(state).context("failed to encode project state")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp)
        .with_context(|| format!("failed to create {}", tmp.display()))?;
    file.write_all(&encoded)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!("failed to rename {} to {}", tmp.display(), path.display())
    })?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".new");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoff_core::{Branch, PullRequest, PullRequestId, Sha, Username};

    fn sample_state() -> ProjectState {
        let mut state = ProjectState::new();
        state.insert_pull_request(
            PullRequestId(7),
            PullRequest::new(
                Branch::from("feat"),
                Sha::from("aaa"),
                "title".to_string(),
                Username::from("alice"),
            ),
        );
        state
    }

    #[test]
    fn saved_state_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");

        let state = sample_state();
        save_state(&path, &state).unwrap();

        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_file_loads_as_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_state(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error_not_an_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(load_state(&path).is_err());
    }

    #[test]
    fn save_replaces_the_previous_snapshot_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");

        save_state(&path, &ProjectState::new()).unwrap();
        save_state(&path, &sample_state()).unwrap();

        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("o-r.json");

        save_state(&path, &sample_state()).unwrap();
        assert!(path.exists());
    }
}
