//! Transcript persistence seam. Every registered handler receives the closed
//! transcript; the ticket system aggregates their failures.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ids::TicketId;
use crate::domain::transcript::Transcript;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TranscriptHandlerError {
    #[error("transcript storage failed: {0}")]
    Storage(String),
    #[error("transcript encoding failed: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for TranscriptHandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Encoding(error.to_string())
    }
}

#[async_trait]
pub trait TranscriptHandler: Send + Sync {
    /// Stable name used in logs and aggregated failures.
    fn name(&self) -> &str;

    async fn save_transcript(&self, transcript: &Transcript) -> Result<(), TranscriptHandlerError>;

    async fn get_transcript(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<Transcript>, TranscriptHandlerError>;
}

/// Keeps saved transcripts in process memory, keyed by ticket id. Saving the
/// same ticket twice replaces the earlier copy.
#[derive(Default)]
pub struct InMemoryTranscriptStore {
    transcripts: Mutex<BTreeMap<TicketId, Transcript>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.transcripts.lock() {
            Ok(transcripts) => transcripts.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ticket_ids(&self) -> Vec<TicketId> {
        match self.transcripts.lock() {
            Ok(transcripts) => transcripts.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        }
    }
}

#[async_trait]
impl TranscriptHandler for InMemoryTranscriptStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save_transcript(&self, transcript: &Transcript) -> Result<(), TranscriptHandlerError> {
        let mut transcripts = match self.transcripts.lock() {
            Ok(transcripts) => transcripts,
            Err(poisoned) => poisoned.into_inner(),
        };
        transcripts.insert(transcript.ticket_id, transcript.clone());
        Ok(())
    }

    async fn get_transcript(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<Transcript>, TranscriptHandlerError> {
        let transcripts = match self.transcripts.lock() {
            Ok(transcripts) => transcripts,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(transcripts.get(&ticket_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{InMemoryTranscriptStore, TranscriptHandler};
    use crate::domain::ids::{ChannelId, TicketId, UserId};
    use crate::domain::transcript::Transcript;

    #[tokio::test]
    async fn saving_again_replaces_the_stored_copy() {
        let store = InMemoryTranscriptStore::new();
        let mut transcript =
            Transcript::new(TicketId(4), ChannelId(1001), UserId(9), "support", Utc::now());

        store.save_transcript(&transcript).await.expect("first save");
        transcript.close(Utc::now());
        store.save_transcript(&transcript).await.expect("second save");

        let stored = store.get_transcript(TicketId(4)).await.expect("lookup");
        assert_eq!(store.len(), 1);
        assert!(stored.is_some_and(|stored| stored.is_closed()));
    }

    #[tokio::test]
    async fn missing_transcript_is_none() {
        let store = InMemoryTranscriptStore::new();
        assert_eq!(store.get_transcript(TicketId(1)).await, Ok(None));
        assert!(store.is_empty());
    }
}
