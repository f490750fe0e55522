//! Execution record persistence
//!
//! The orchestrator asks the store when each schedule last fired so that
//! once-per-day schedules survive restarts.

use crate::error::{Result, ScheduleError};
use ambience_core::{ExecutionRecord, ScheduleId};
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Where the last firing of each schedule is kept
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Most recent firing of `id`
    async fn last_execution(&self, id: &ScheduleId) -> Result<Option<NaiveDateTime>>;

    /// Record a firing, replacing any older one for the same schedule
    async fn record(&self, record: ExecutionRecord) -> Result<()>;

    /// Every stored record, ordered by schedule id
    async fn records(&self) -> Result<Vec<ExecutionRecord>>;
}

#[derive(Debug, Default)]
struct Records(HashMap<ScheduleId, NaiveDateTime>);

impl Records {
    fn from_list(list: Vec<ExecutionRecord>) -> Self {
        let mut records = Self::default();
        for record in list {
            records.insert(record);
        }
        records
    }

    fn insert(&mut self, record: ExecutionRecord) {
        let slot = self
            .0
            .entry(record.schedule_id)
            .or_insert(record.last_fired);
        if *slot < record.last_fired {
            *slot = record.last_fired;
        }
    }

    fn to_list(&self) -> Vec<ExecutionRecord> {
        let mut list: Vec<ExecutionRecord> = self
            .0
            .iter()
            .map(|(id, fired)| ExecutionRecord::new(id.clone(), *fired))
            .collect();
        list.sort_by(|a, b| a.schedule_id.cmp(&b.schedule_id));
        list
    }
}

/// Volatile store, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    records: Mutex<Records>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn last_execution(&self, id: &ScheduleId) -> Result<Option<NaiveDateTime>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.0.get(id).copied())
    }

    async fn record(&self, record: ExecutionRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record);
        Ok(())
    }

    async fn records(&self) -> Result<Vec<ExecutionRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.to_list())
    }
}

/// JSON file store
///
/// The file holds an array of records. Writes go to a sibling temp file
/// which is then renamed over the original, so a crash mid-write leaves
/// the previous contents intact.
#[derive(Debug)]
pub struct JsonExecutionStore {
    path: PathBuf,
    records: Mutex<Records>,
    /// Serializes writers so renames land in record order
    write: tokio::sync::Mutex<()>,
}

impl JsonExecutionStore {
    /// Open the store at `path`, pruning records older than `retention`
    pub async fn open(path: impl Into<PathBuf>, retention: Duration) -> Result<Self> {
        Self::open_at(path, retention, Local::now().naive_local()).await
    }

    /// [`open`](Self::open) with an explicit "now"
    pub async fn open_at(
        path: impl Into<PathBuf>,
        retention: Duration,
        now: NaiveDateTime,
    ) -> Result<Self> {
        let path = path.into();
        let list = read_records(&path).await?;

        let total = list.len();
        let live: Vec<ExecutionRecord> = list
            .into_iter()
            .filter(|r| !r.is_expired(now, retention))
            .collect();
        if live.len() < total {
            info!(
                path = %path.display(),
                pruned = total - live.len(),
                "Pruned expired execution records"
            );
        }

        Ok(Self {
            path,
            records: Mutex::new(Records::from_list(live)),
            write: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        let _writer = self.write.lock().await;
        let json = {
            let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_vec_pretty(&records.to_list())?
        };

        let temp = temp_path(&self.path);
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| ScheduleError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| ScheduleError::io(&self.path, e))?;

        debug!(path = %self.path.display(), "Persisted execution records");
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for JsonExecutionStore {
    async fn last_execution(&self, id: &ScheduleId) -> Result<Option<NaiveDateTime>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.0.get(id).copied())
    }

    async fn record(&self, record: ExecutionRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record);
        self.persist().await
    }

    async fn records(&self) -> Result<Vec<ExecutionRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.to_list())
    }
}

async fn read_records(path: &Path) -> Result<Vec<ExecutionRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ScheduleError::io(path, e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).map_err(|e| ScheduleError::parse(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
