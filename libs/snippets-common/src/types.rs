use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

/// File metadata as published by the chat collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
    /// Declared language / file type, e.g. `python`
    pub filetype: String,
    pub url_private_download: String,
}

/// Where to fetch the raw content of a file: scheme + host + path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLocator {
    pub scheme: String,
    /// Host, including the port when it is not the scheme default
    pub host: String,
    /// Path, including the query string if any
    pub path: String,
}

impl DownloadLocator {
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(raw)?;
        let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            path,
        })
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }
}

impl fmt::Display for DownloadLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Bearer token used for a single download. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One execution attempt of a shared file
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: Uuid,
    pub file_id: String,
    pub file_name: String,
    pub locator: DownloadLocator,
    pub credential: Credential,
    pub declared_language: String,
    pub reply_target: String,
}

impl JobRequest {
    pub fn from_file(
        file: &FileMetadata,
        credential: Credential,
        reply_target: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            id: Uuid::new_v4(),
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            locator: DownloadLocator::parse(&file.url_private_download)?,
            credential,
            declared_language: file.filetype.clone(),
            reply_target: reply_target.into(),
        })
    }
}

/// Events pushed to the worker inbox by the chat collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A snippet was shared and should be run
    FileShared {
        file: FileMetadata,
        reply_target: String,
    },
    /// Someone reacted to a file; a re-run when the reaction is the ack marker
    ReactionAdded {
        user: String,
        file_id: String,
        reaction: String,
    },
    /// "What can you run?"
    SupportQuery { reply_target: String },
    /// "Show me the limits for language X"
    ConfigQuery {
        language: String,
        reply_target: String,
    },
}

/// Messages pushed to the worker outbox for the chat collaborator to deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Reply { target: String, text: String },
    Acknowledge { file_id: String, marker: String },
}

/// Result of an acknowledgement attempt. A repeated attempt is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    AlreadyDone,
}
