use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ticketdesk_core::domain::ids::TicketId;
use ticketdesk_core::domain::transcript::Transcript;
use ticketdesk_core::transcripts::{TranscriptHandler, TranscriptHandlerError};
use tokio::fs;
use tracing::debug;

use super::RepositoryError;

/// One pretty-printed JSON document per ticket, `ticket-0001.json`.
pub struct JsonFileTranscriptStore {
    directory: PathBuf,
}

impl JsonFileTranscriptStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, ticket_id: TicketId) -> PathBuf {
        self.directory.join(format!("ticket-{}.json", ticket_id.padded()))
    }

    /// Writes through a temporary sibling and renames it into place, so a
    /// crash never leaves a half-written transcript behind.
    pub async fn save(&self, transcript: &Transcript) -> Result<PathBuf, RepositoryError> {
        fs::create_dir_all(&self.directory).await?;

        let path = self.path_for(transcript.ticket_id);
        let staging = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(transcript)?;
        fs::write(&staging, body).await?;
        fs::rename(&staging, &path).await?;

        debug!(ticket_id = %transcript.ticket_id, path = %path.display(), "transcript written");
        Ok(path)
    }

    pub async fn load(&self, ticket_id: TicketId) -> Result<Option<Transcript>, RepositoryError> {
        let raw = match fs::read(self.path_for(ticket_id)).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

#[async_trait]
impl TranscriptHandler for JsonFileTranscriptStore {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn save_transcript(&self, transcript: &Transcript) -> Result<(), TranscriptHandlerError> {
        self.save(transcript).await.map(|_| ()).map_err(TranscriptHandlerError::from)
    }

    async fn get_transcript(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<Transcript>, TranscriptHandlerError> {
        self.load(ticket_id).await.map_err(TranscriptHandlerError::from)
    }
}
