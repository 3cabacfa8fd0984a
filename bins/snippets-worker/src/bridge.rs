// Redis bridge to the chat collaborator.
// Replies and acknowledgements go to the outbox list; file metadata comes
// from the keys the collaborator (or the worker loop) stored.

use crate::error::BridgeError;
use crate::orchestrator::FileLookup;
use crate::reporter::ReplySink;
use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use snippets_common::redis;
use snippets_common::types::{AckOutcome, FileMetadata, OutboundMessage};
use tracing::warn;

/// ConnectionManager is cheap to clone and reconnects on its own,
/// so every call works on its own handle
#[derive(Clone)]
pub struct RedisBridge {
    conn: ConnectionManager,
    ack_marker: String,
}

impl RedisBridge {
    pub fn new(conn: ConnectionManager, ack_marker: impl Into<String>) -> Self {
        Self {
            conn,
            ack_marker: ack_marker.into(),
        }
    }
}

#[async_trait]
impl ReplySink for RedisBridge {
    async fn send_reply(&self, target: &str, text: &str) -> Result<(), BridgeError> {
        let mut conn = self.conn.clone();
        let message = OutboundMessage::Reply {
            target: target.to_string(),
            text: text.to_string(),
        };
        redis::push_outbound(&mut conn, &message).await?;
        Ok(())
    }

    async fn acknowledge(&self, file_id: &str) -> Result<AckOutcome, BridgeError> {
        let mut conn = self.conn.clone();
        if !redis::claim_ack(&mut conn, file_id).await? {
            return Ok(AckOutcome::AlreadyDone);
        }

        let message = OutboundMessage::Acknowledge {
            file_id: file_id.to_string(),
            marker: self.ack_marker.clone(),
        };
        if let Err(e) = redis::push_outbound(&mut conn, &message).await {
            // Undelivered, so the claim must not block the next attempt
            if let Err(release) = redis::release_ack(&mut conn, file_id).await {
                warn!(file_id, error = %release, "Failed to release acknowledgement claim");
            }
            return Err(e.into());
        }
        Ok(AckOutcome::Acknowledged)
    }
}

#[async_trait]
impl FileLookup for RedisBridge {
    async fn file_info(&self, file_id: &str) -> Result<FileMetadata, BridgeError> {
        let mut conn = self.conn.clone();
        redis::load_file(&mut conn, file_id)
            .await?
            .ok_or_else(|| BridgeError::UnknownFile(file_id.to_string()))
    }
}
