use crate::types::{FileMetadata, InboundEvent, OutboundMessage};
use redis::{AsyncCommands, RedisResult};

// Redis bridge semantics between the chat collaborator and the worker.
// Both sides use these helpers so key names never drift.

pub const INBOX_KEY: &str = "snippets:inbox";
pub const OUTBOX_KEY: &str = "snippets:outbox";
pub const FILE_PREFIX: &str = "snippets:file";
pub const ACK_PREFIX: &str = "snippets:ack";

/// How long file metadata and acknowledgement markers are kept
pub const BRIDGE_TTL_SECONDS: u64 = 86400;

/// Key holding the latest metadata for a file
pub fn file_key(file_id: &str) -> String {
    format!("{}:{}", FILE_PREFIX, file_id)
}

/// Key marking that a file has been acknowledged
pub fn ack_key(file_id: &str) -> String {
    format!("{}:{}", ACK_PREFIX, file_id)
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

fn deserialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
}

/// Push an inbound event for the worker. RPUSH + BLPOP gives FIFO order.
pub async fn push_event(
    conn: &mut redis::aio::ConnectionManager,
    event: &InboundEvent,
) -> RedisResult<()> {
    let payload = serde_json::to_string(event).map_err(serialization_error)?;
    conn.rpush(INBOX_KEY, payload).await
}

/// Pop the next inbound event.
/// Uses BLPOP with timeout so the worker notices shutdown.
pub async fn pop_event(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<InboundEvent>> {
    let result: Option<(String, String)> = conn.blpop(INBOX_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let event: InboundEvent = serde_json::from_str(&payload).map_err(deserialization_error)?;
            Ok(Some(event))
        }
        None => Ok(None),
    }
}

/// Push a reply or acknowledgement for the collaborator to deliver
pub async fn push_outbound(
    conn: &mut redis::aio::ConnectionManager,
    message: &OutboundMessage,
) -> RedisResult<()> {
    let payload = serde_json::to_string(message).map_err(serialization_error)?;
    conn.rpush(OUTBOX_KEY, payload).await
}

/// Remember the latest metadata for a file, so a later re-run can find it
pub async fn store_file(
    conn: &mut redis::aio::ConnectionManager,
    file: &FileMetadata,
) -> RedisResult<()> {
    let payload = serde_json::to_string(file).map_err(serialization_error)?;
    conn.set_ex(file_key(&file.id), payload, BRIDGE_TTL_SECONDS).await
}

pub async fn load_file(
    conn: &mut redis::aio::ConnectionManager,
    file_id: &str,
) -> RedisResult<Option<FileMetadata>> {
    let payload: Option<String> = conn.get(file_key(file_id)).await?;

    match payload {
        Some(data) => {
            let file: FileMetadata = serde_json::from_str(&data).map_err(deserialization_error)?;
            Ok(Some(file))
        }
        None => Ok(None),
    }
}

/// Atomically claim the acknowledgement for a file (SET NX EX).
/// Returns false when the file was already acknowledged.
pub async fn claim_ack(
    conn: &mut redis::aio::ConnectionManager,
    file_id: &str,
) -> RedisResult<bool> {
    let reply: Option<String> = redis::cmd("SET")
        .arg(ack_key(file_id))
        .arg(1)
        .arg("NX")
        .arg("EX")
        .arg(BRIDGE_TTL_SECONDS)
        .query_async(conn)
        .await?;
    Ok(reply.is_some())
}

/// Give an acknowledgement claim back, so the next run can acknowledge again
pub async fn release_ack(
    conn: &mut redis::aio::ConnectionManager,
    file_id: &str,
) -> RedisResult<()> {
    conn.del(ack_key(file_id)).await
}
