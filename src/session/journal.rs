//! Transcript journal: what was heard and said, as JSON lines

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::SessionEvent;
use crate::Result;

/// One journal line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub cycle: Uuid,
    /// `transcript`, `intent`, `response` or `failure`
    pub kind: String,
    pub text: String,
}

impl JournalEntry {
    /// Journal line for an event, if the event is journaled
    #[must_use]
    pub fn from_event(event: &SessionEvent) -> Option<Self> {
        let (cycle, kind, text) = match event {
            SessionEvent::Transcribed { cycle, text } => (*cycle, "transcript", text.clone()),
            SessionEvent::IntentResolved {
                cycle,
                kind,
                payload,
            } => (*cycle, "intent", format!("{kind}: {payload}")),
            SessionEvent::Responded { cycle, text } => (*cycle, "response", text.clone()),
            SessionEvent::StageFailed {
                cycle,
                stage,
                error,
            } => (*cycle, "failure", format!("{stage}: {error}")),
            _ => return None,
        };

        Some(Self {
            timestamp: Utc::now(),
            cycle,
            kind: kind.to_string(),
            text,
        })
    }
}

/// Appends session transcripts to a file
#[derive(Debug)]
pub struct TranscriptJournal {
    path: PathBuf,
    file: Option<File>,
}

impl TranscriptJournal {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the event if it is journaled; returns whether a line was written
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or written
    pub async fn record(&mut self, event: &SessionEvent) -> Result<bool> {
        let Some(entry) = JournalEntry::from_event(event) else {
            return Ok(false);
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let file = match self.file.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                tracing::debug!(path = %self.path.display(), "transcript journal opened");
                file
            }
        };
        let file = self.file.insert(file);

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }

    /// Journal events until the session's event channel closes
    #[must_use]
    pub fn spawn(mut self, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.record(&event).await {
                            tracing::warn!(error = %e, path = %self.path.display(), "journal write failed");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "transcript journal fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[tokio::test]
    async fn test_records_transcripts_and_responses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("transcripts.jsonl");
        let mut journal = TranscriptJournal::new(&path);
        let cycle = Uuid::new_v4();

        assert!(
            journal
                .record(&SessionEvent::Transcribed {
                    cycle,
                    text: "turn on the weather".to_string(),
                })
                .await
                .unwrap()
        );
        assert!(
            !journal
                .record(&SessionEvent::StateChanged {
                    cycle: Some(cycle),
                    from: SessionState::Thinking,
                    to: SessionState::Acting,
                })
                .await
                .unwrap()
        );
        assert!(
            journal
                .record(&SessionEvent::Responded {
                    cycle,
                    text: "It is 18 degrees and clear".to_string(),
                })
                .await
                .unwrap()
        );

        let content = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<JournalEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, "transcript");
        assert_eq!(entries[1].kind, "response");
        assert_eq!(entries[1].cycle, cycle);
    }

    #[tokio::test]
    async fn test_spawned_journal_stops_when_channel_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let (tx, rx) = broadcast::channel(8);
        let handle = TranscriptJournal::new(&path).spawn(rx);

        tx.send(SessionEvent::StageFailed {
            cycle: Uuid::new_v4(),
            stage: "speak",
            error: "no device".to_string(),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"failure\""));
        assert!(content.contains("speak: no device"));
    }
}
