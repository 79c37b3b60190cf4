use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::memory::LogCore;
use super::{Journal, JournalError, JournalStream};
use crate::config::JournalConfig;
use crate::entry::{Position, Record};
use crate::utils::ndjson::{decode_lines, encode_line};
use crate::utils::path::ensure_parent;

/// NDJSON-backed journal. Every entry is one line; reopening the file replays
/// existing lines and continues numbering after them. Reads are served from
/// the in-memory mirror.
pub struct FileJournal<E> {
    core: Arc<LogCore<E>>,
    path: PathBuf,
    writer: Mutex<Writer>,
    fsync: bool,
}

struct Writer {
    file: File,
    // bytes on disk that belong to committed entries
    committed: u64,
}

impl<E> FileJournal<E>
where
    E: Record + Serialize + DeserializeOwned,
{
    pub async fn open(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        fsync: bool,
    ) -> Result<Self, JournalError> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path).await?;

        let seed: Vec<E> = match tokio::fs::read_to_string(&path).await {
            Ok(text) => decode_lines(&text).map_err(|(line, e)| JournalError::Corrupt {
                journal: name.clone(),
                line,
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let committed = writer.metadata().await?.len();

        tracing::debug!(journal = %name, path = %path.display(), replayed = seed.len(), "file journal opened");
        Ok(Self {
            core: LogCore::new(name, seed),
            path,
            writer: Mutex::new(Writer {
                file: writer,
                committed,
            }),
            fsync,
        })
    }

    /// Open `<dir>/<name>.ndjson` using the configured directory and fsync mode.
    pub async fn open_in(cfg: &JournalConfig, name: &str) -> Result<Self, JournalError> {
        Self::open(name, cfg.path_for(name), cfg.fsync).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `line`, then publish `entry`. If publishing fails (the journal was
    /// closed while the line was in flight) the line is cut off the file again.
    async fn commit(&self, writer: &mut Writer, line: &str, entry: E) -> Result<Position, JournalError> {
        if let Err(e) = self.write_line(&mut writer.file, line).await {
            writer.file.set_len(writer.committed).await?;
            return Err(e.into());
        }
        match self.core.push(entry) {
            Ok(position) => {
                writer.committed += line.len() as u64;
                Ok(position)
            }
            Err(e) => {
                writer.file.set_len(writer.committed).await?;
                Err(e)
            }
        }
    }

    async fn write_line(&self, file: &mut File, line: &str) -> std::io::Result<()> {
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        if self.fsync {
            file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<E> Journal<E> for FileJournal<E>
where
    E: Record + Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn append(&self, entry: E) -> Result<Position, JournalError> {
        let line = encode_line(&entry)?;

        // file order and position order stay identical under this lock
        let mut writer = self.writer.lock().await;
        if self.core.is_closed() {
            return Err(JournalError::Closed(self.core.name().to_string()));
        }
        self.commit(&mut writer, &line, entry).await
    }

    fn tail_from(&self, from: Position, cancel: CancellationToken) -> JournalStream<E> {
        self.core.tail(from, cancel)
    }

    fn read_backward(&self, from: Position, cancel: CancellationToken) -> JournalStream<E> {
        self.core.backward(from, cancel)
    }

    fn head(&self) -> Position {
        self.core.len()
    }

    fn close(&self) {
        self.core.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    #[tokio::test]
    async fn close_during_write_leaves_no_line_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.ndjson");
        let journal: FileJournal<Entry> = FileJournal::open("race", &path, false).await.unwrap();
        journal.append(Entry::afferent("u", "kept")).await.unwrap();

        // hold the writer as an in-flight append would, then close underneath it
        let late = Entry::afferent("u", "late");
        let line = encode_line(&late).unwrap();
        let mut writer = journal.writer.lock().await;
        journal.close();
        let err = journal.commit(&mut writer, &line, late).await.unwrap_err();
        assert!(matches!(err, JournalError::Closed(_)));
        drop(writer);

        let reopened: FileJournal<Entry> = FileJournal::open("race", &path, false).await.unwrap();
        assert_eq!(reopened.head(), 1);
    }

    #[tokio::test]
    async fn append_after_close_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.ndjson");
        let journal: FileJournal<Entry> = FileJournal::open("closed", &path, false).await.unwrap();
        journal.close();
        assert!(matches!(
            journal.append(Entry::afferent("u", "x")).await,
            Err(JournalError::Closed(_))
        ));
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 0);
    }
}
