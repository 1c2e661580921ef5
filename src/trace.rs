//! Trace recording
//!
//! JSON-lines records of attachment, bearer, mobility and packet events,
//! written during the run for offline analysis. Nothing reads them back into
//! the scenario.

use crate::link::DeviceId;
use crate::node::NodeId;
use crate::time::SimTime;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Trace serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub mod events {
    pub const ATTACH: &str = "attach";
    pub const BEARER_ACTIVATED: &str = "bearer_activated";
    pub const MOBILITY: &str = "mobility";
    pub const COURSE_CHANGE: &str = "course_change";
    pub const APP_START: &str = "app_start";
    pub const APP_STOP: &str = "app_stop";
    pub const PACKET_TX: &str = "packet_tx";
    pub const PACKET_RX: &str = "packet_rx";
    pub const PACKET_DROP: &str = "packet_drop";
}

/// A single trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub time_ns: u64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    pub data: serde_json::Value,
}

impl TraceEntry {
    pub fn new(at: SimTime, event_type: &str, data: serde_json::Value) -> Self {
        Self {
            time_ns: at.as_nanos(),
            event_type: event_type.to_string(),
            node: None,
            device: None,
            data,
        }
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn time(&self) -> SimTime {
        SimTime::from_nanos(self.time_ns)
    }
}

/// Appends trace entries to a file, one JSON object per line
pub struct TraceRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    entries_recorded: u64,
}

impl TraceRecorder {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| TraceError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Recording trace to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            entries_recorded: 0,
        })
    }

    pub fn record(&mut self, entry: &TraceEntry) -> Result<(), TraceError> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.writer, "{}", json).map_err(|source| TraceError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.entries_recorded += 1;
        Ok(())
    }

    pub fn entries_recorded(&self) -> u64 {
        self.entries_recorded
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered records
    pub fn close(mut self) -> Result<u64, TraceError> {
        self.writer.flush().map_err(|source| TraceError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.entries_recorded)
    }
}

/// Load every entry of a trace file
pub fn read_trace(path: impl AsRef<Path>) -> Result<Vec<TraceEntry>, TraceError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| TraceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| TraceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        let mut recorder = TraceRecorder::create(&path).unwrap();
        recorder
            .record(&TraceEntry::new(
                SimTime::ZERO,
                events::ATTACH,
                json!({"base_station": "dev0"}),
            ))
            .unwrap();
        recorder
            .record(&TraceEntry::new(
                SimTime::from_millis(500),
                events::PACKET_TX,
                json!({"seq": 0, "bytes": 1024}),
            ))
            .unwrap();
        assert_eq!(recorder.close().unwrap(), 2);

        let entries = read_trace(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, "attach");
        assert_eq!(entries[1].time(), SimTime::from_millis(500));
        assert_eq!(entries[1].data["seq"], 0);
    }

    #[test]
    fn test_unwritable_path() {
        let err = TraceRecorder::create("/nonexistent/dir/trace.jsonl").err().unwrap();
        assert!(matches!(err, TraceError::Io { .. }));
    }
}
