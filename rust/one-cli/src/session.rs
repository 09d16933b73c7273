use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::commands::CliError;

/// The current login, written by `init` and `login`, removed by `logout`.
///
/// Holds only the instance identity; the secret is never persisted and must
/// be supplied on every authenticated invocation.
#[derive(Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub email: String,
}

fn session_path(directory: &Path) -> PathBuf {
    directory.join("session.json")
}

pub async fn load(directory: &Path) -> Result<Session, CliError> {
    let bytes = tokio::fs::read(session_path(directory))
        .await
        .map_err(|_| CliError::not_found("not logged in"))?;
    serde_json::from_slice(&bytes).map_err(|_| CliError::not_found("session file is unreadable"))
}

pub async fn save(directory: &Path, session: &Session) -> Result<(), CliError> {
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(CliError::io)?;
    let bytes = serde_json::to_vec_pretty(session).map_err(|error| CliError {
        exit_code: 1,
        message: error.to_string(),
    })?;
    tokio::fs::write(session_path(directory), bytes)
        .await
        .map_err(CliError::io)
}

pub async fn clear(directory: &Path) -> Result<(), CliError> {
    match tokio::fs::remove_file(session_path(directory)).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(CliError::io(error)),
    }
}
