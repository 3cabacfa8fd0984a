// Error taxonomy for the snippet pipeline

use crate::orchestrator::Stage;
use snippets_common::error::NotSupported;
use std::path::PathBuf;
use thiserror::Error;

/// The source file could not be retrieved
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid download url: {0}")]
    InvalidLocator(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The sandbox itself failed. A snippet exiting nonzero is not one of these.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox could not be launched: {0}")]
    Launch(String),

    #[error("lost track of the sandbox: {0}")]
    Lost(String),
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        SandboxError::Launch(err.to_string())
    }
}

/// Failures talking to the chat collaborator through Redis
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("no metadata known for file {0}")]
    UnknownFile(String),
}

/// Any stage failure of one job. Each one ends in exactly one error reply.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] NotSupported),

    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("job workspace unavailable: {0}")]
    Workspace(#[source] std::io::Error),

    #[error(transparent)]
    SandboxLaunch(#[from] SandboxError),
}

impl PipelineError {
    /// Stage the job was in when it failed
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::UnsupportedLanguage(_) => Stage::Resolve,
            PipelineError::Fetch(_) | PipelineError::Workspace(_) => Stage::Fetch,
            PipelineError::SandboxLaunch(_) => Stage::Execute,
        }
    }

    /// Operator-facing faults; user input problems are not
    pub fn is_system_fault(&self) -> bool {
        !matches!(self, PipelineError::UnsupportedLanguage(_))
    }

    /// Plain text sent back to the requester
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::UnsupportedLanguage(err) => err.to_string(),
            PipelineError::Fetch(err) => format!("I could not download your snippet: {}", err),
            PipelineError::Workspace(_) | PipelineError::SandboxLaunch(_) => {
                "Something went wrong while running your snippet, please try again later".to_string()
            }
        }
    }
}
