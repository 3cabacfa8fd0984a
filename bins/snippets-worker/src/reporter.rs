/// Result Reporter
///
/// Turns an execution outcome or a pipeline error into the one reply a job
/// gets, and sends the acknowledgement marker. Delivery is fire-and-forget:
/// failures are logged, never retried, never propagated.

use crate::engine::ExecutionOutcome;
use crate::error::{BridgeError, PipelineError};
use async_trait::async_trait;
use snippets_common::types::AckOutcome;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outbound side of the chat collaborator
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, target: &str, text: &str) -> Result<(), BridgeError>;

    /// Mark a file as received. Marking twice yields `AlreadyDone`.
    async fn acknowledge(&self, file_id: &str) -> Result<AckOutcome, BridgeError>;
}

/// Keep at most `max_chars` characters of `text`, dropping the remainder
pub fn crop(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Preformatted reply for a finished run.
/// The annotation goes after cropping so it is never cut off.
pub fn format_outcome(outcome: &ExecutionOutcome, crop_length: usize) -> String {
    let body = crop(outcome.raw_output().trim_end(), crop_length);

    let mut text = body.to_string();
    if let Some(annotation) = outcome.failure_annotation() {
        text.push('\n');
        text.push_str(&annotation);
    }

    format!("```{}```", text)
}

#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn ReplySink>,
}

impl Reporter {
    pub fn new(sink: Arc<dyn ReplySink>) -> Self {
        Self { sink }
    }

    /// Send plain text; delivery failures are logged only
    pub async fn reply(&self, target: &str, text: &str) {
        match self.sink.send_reply(target, text).await {
            Ok(()) => debug!(reply_target = %target, chars = text.chars().count(), "Reply sent"),
            Err(e) => error!(reply_target = %target, error = %e, "Failed to deliver reply"),
        }
    }

    pub async fn report_outcome(&self, target: &str, outcome: &ExecutionOutcome, crop_length: usize) {
        if let Some(annotation) = outcome.failure_annotation() {
            // The snippet's own failure: normal output, not a system fault
            warn!(
                exit_code = outcome.exit_code,
                termination = ?outcome.termination,
                annotation = %annotation,
                "Snippet did not succeed"
            );
        }
        self.reply(target, &format_outcome(outcome, crop_length)).await;
    }

    pub async fn report_error(&self, target: &str, err: &PipelineError) {
        if err.is_system_fault() {
            error!(stage = ?err.stage(), error = %err, "Job failed");
        } else {
            info!(stage = ?err.stage(), error = %err, "Job rejected");
        }
        self.reply(target, &err.user_message()).await;
    }

    /// Best-effort acknowledgement; an existing marker is not an error
    pub async fn acknowledge(&self, file_id: &str) -> Option<AckOutcome> {
        match self.sink.acknowledge(file_id).await {
            Ok(AckOutcome::Acknowledged) => {
                debug!(file_id = %file_id, "Acknowledged");
                Some(AckOutcome::Acknowledged)
            }
            Ok(AckOutcome::AlreadyDone) => {
                debug!(file_id = %file_id, "Already acknowledged");
                Some(AckOutcome::AlreadyDone)
            }
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "Failed to acknowledge");
                None
            }
        }
    }
}
