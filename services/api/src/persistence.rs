//! Persistence Sink
//!
//! Writes the collected profile and the conversation transcript to two local
//! JSON files. Every save overwrites both files wholesale; there is no
//! temp-file rename and no locking, so concurrent saves may interleave.

use crate::models::ConversationMessage;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The document written to the transcript file.
#[derive(Debug, Serialize)]
pub struct TranscriptRecord<'a> {
    pub user_data: &'a Map<String, Value>,
    pub conversation: &'a [ConversationMessage],
    pub timestamp: String,
}

/// What a save wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    pub transcript_messages: usize,
}

/// Owns the two output file paths.
#[derive(Debug, Clone)]
pub struct TranscriptSink {
    data_path: PathBuf,
    transcript_path: PathBuf,
}

impl TranscriptSink {
    pub fn new(data_path: PathBuf, transcript_path: PathBuf) -> Self {
        Self {
            data_path,
            transcript_path,
        }
    }

    /// Creates the output files with empty documents when they do not exist yet.
    pub async fn ensure_initialized(&self) -> Result<(), PersistError> {
        if !tokio::fs::try_exists(&self.data_path).await.unwrap_or(false) {
            write_json(&self.data_path, &Value::Object(Map::new())).await?;
        }
        if !tokio::fs::try_exists(&self.transcript_path)
            .await
            .unwrap_or(false)
        {
            write_json(&self.transcript_path, &Value::Array(Vec::new())).await?;
        }
        Ok(())
    }

    /// Overwrites the data file with `data` and the transcript file with a
    /// timestamped record of `data` and `transcript`.
    pub async fn save(
        &self,
        data: &Map<String, Value>,
        transcript: &[ConversationMessage],
    ) -> Result<SaveReceipt, PersistError> {
        write_json(&self.data_path, data).await?;

        let record = TranscriptRecord {
            user_data: data,
            conversation: transcript,
            timestamp: chrono::Local::now().to_rfc3339(),
        };
        write_json(&self.transcript_path, &record).await?;

        info!(fields = data.len(), "Saved user data");
        info!(messages = transcript.len(), "Saved transcript");
        Ok(SaveReceipt {
            transcript_messages: transcript.len(),
        })
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let body = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, body)
        .await
        .map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })
}
