//! Append-only transcript.
//!
//! The engine never writes files on its turn loop. Committed messages are
//! handed to a [`TranscriptWriter`] actor, which writes them through a
//! [`TranscriptSink`] in commit order, retrying failed writes without
//! reordering or duplicating anything.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::debate::{Message, MessageKind};
use crate::util::blocking;
use crate::{alog_debug, alog_error, alog_warn, Error, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(500);
const DRAIN_ATTEMPTS: u32 = 3;

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub round: u32,
    pub agent_id: String,
    pub agent_name: String,
    pub content: String,
    pub model: Option<String>,
    pub kind: MessageKind,
}

impl TranscriptRecord {
    pub fn from_message(message: &Message, agent_name: &str) -> Self {
        Self {
            seq: message.seq,
            timestamp: message.timestamp,
            round: message.round,
            agent_id: message.speaker.id_str().to_string(),
            agent_name: agent_name.to_string(),
            content: message.content.clone(),
            model: message.params.as_ref().map(|p| p.model.clone()),
            kind: message.kind,
        }
    }
}

/// Durable, ordered, append-only record store.
pub trait TranscriptSink: Send {
    fn append(&mut self, record: &TranscriptRecord) -> Result<()>;
}

/// Newline-delimited JSON file, flushed on every write.
#[derive(Debug)]
pub struct JsonlTranscript {
    path: PathBuf,
    file: File,
}

impl JsonlTranscript {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                alog_debug!("Creating transcript directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        alog_debug!("Transcript opened: {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back from a transcript file.
    pub fn read_all(path: &Path) -> Result<Vec<TranscriptRecord>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Error::from))
            .collect()
    }
}

impl TranscriptSink for JsonlTranscript {
    fn append(&mut self, record: &TranscriptRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        append_whole(&mut self.file, line.as_bytes())
            .map_err(|e| Error::SinkWrite(format!("{}: {}", self.path.display(), e)))
    }
}

/// Output that can be cut back to an earlier length.
trait Truncate: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `line` in full or not at all.
///
/// A write can fail after part of the line reached the file. The fragment is
/// cut off again so a retry does not leave a torn line behind.
fn append_whole<W: Truncate>(out: &mut W, line: &[u8]) -> io::Result<()> {
    let start = out.len()?;
    let result = out.write_all(line).and_then(|_| out.flush());
    if result.is_err() {
        if let Err(e) = out.truncate(start) {
            alog_error!("Transcript rollback to {} bytes failed: {}", start, e);
        }
    }
    result
}

/// In-memory sink, shared so the caller can inspect what was written.
#[derive(Debug, Clone, Default)]
pub struct MemoryTranscript {
    records: Arc<Mutex<Vec<TranscriptRecord>>>,
}

impl MemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TranscriptRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl TranscriptSink for MemoryTranscript {
    fn append(&mut self, record: &TranscriptRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| Error::SinkWrite("memory transcript poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

/// A failed write, reported so the engine can surface a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkWarning {
    pub seq: u64,
    pub detail: String,
}

/// What the writer managed to do before it shut down.
#[derive(Debug, Clone, Default)]
pub struct WriterReport {
    pub written: u64,
    /// Records still unwritten after the final drain, in order.
    pub unwritten: Vec<TranscriptRecord>,
}

type SharedSink = Arc<Mutex<Box<dyn TranscriptSink>>>;

/// Actor that owns the sink and writes records off the turn loop.
pub struct TranscriptWriter {
    sink: SharedSink,
    warn_tx: Option<mpsc::UnboundedSender<SinkWarning>>,
    retry_interval: Duration,
}

/// Handle to a running [`TranscriptWriter`].
pub struct TranscriptHandle {
    tx: mpsc::UnboundedSender<TranscriptRecord>,
    join: JoinHandle<WriterReport>,
}

impl TranscriptHandle {
    /// Queue a record. Fails only if the writer has already shut down.
    pub fn submit(&self, record: TranscriptRecord) -> Result<()> {
        self.tx
            .send(record)
            .map_err(|e| Error::SinkWrite(format!("writer closed, seq {} lost", e.0.seq)))
    }

    /// Stop accepting records, drain what is queued and report.
    pub async fn close(self) -> Result<WriterReport> {
        drop(self.tx);
        self.join
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))
    }
}

impl TranscriptWriter {
    pub fn new(sink: impl TranscriptSink + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            warn_tx: None,
            retry_interval: RETRY_INTERVAL,
        }
    }

    pub fn with_warnings(mut self, warn_tx: mpsc::UnboundedSender<SinkWarning>) -> Self {
        self.warn_tx = Some(warn_tx);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn spawn(self) -> TranscriptHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        alog_debug!("TranscriptWriter::spawn");
        let join = tokio::spawn(self.run(rx));
        TranscriptHandle { tx, join }
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<TranscriptRecord>) -> WriterReport {
        let mut pending: VecDeque<TranscriptRecord> = VecDeque::new();
        let mut report = WriterReport::default();
        let mut blocked = false;
        let mut warned_seq: Option<u64> = None;

        loop {
            tokio::select! {
                biased;
                record = rx.recv() => match record {
                    Some(record) => pending.push_back(record),
                    None => break,
                },
                _ = tokio::time::sleep(self.retry_interval), if blocked => {}
            }
            blocked = !self
                .flush_pending(&mut pending, &mut report, &mut warned_seq)
                .await;
        }

        for attempt in 1..=DRAIN_ATTEMPTS {
            if self
                .flush_pending(&mut pending, &mut report, &mut warned_seq)
                .await
            {
                break;
            }
            if attempt < DRAIN_ATTEMPTS {
                tokio::time::sleep(self.retry_interval).await;
            }
        }

        if !pending.is_empty() {
            alog_error!(
                "TranscriptWriter: {} records could not be written (first seq {})",
                pending.len(),
                pending.front().map(|r| r.seq).unwrap_or_default()
            );
        }
        report.unwritten = pending.into_iter().collect();
        alog_debug!(
            "TranscriptWriter stopped written={} unwritten={}",
            report.written,
            report.unwritten.len()
        );
        report
    }

    /// Write queued records in order. Returns false if a write failed; the
    /// failed record stays at the front.
    async fn flush_pending(
        &self,
        pending: &mut VecDeque<TranscriptRecord>,
        report: &mut WriterReport,
        warned_seq: &mut Option<u64>,
    ) -> bool {
        while let Some(record) = pending.front() {
            let seq = record.seq;
            match self.write(record.clone()).await {
                Ok(()) => {
                    pending.pop_front();
                    report.written += 1;
                }
                Err(e) => {
                    if *warned_seq != Some(seq) {
                        alog_warn!("Transcript write failed seq={}: {}", seq, e);
                        *warned_seq = Some(seq);
                        if let Some(tx) = &self.warn_tx {
                            let _ = tx.send(SinkWarning {
                                seq,
                                detail: e.to_string(),
                            });
                        }
                    }
                    return false;
                }
            }
        }
        true
    }

    async fn write(&self, record: TranscriptRecord) -> Result<()> {
        let sink = self.sink.clone();
        blocking(move || {
            let mut sink = sink
                .lock()
                .map_err(|_| Error::SinkWrite("transcript sink poisoned".to_string()))?;
            sink.append(&record)
        })
        .await
    }
}
