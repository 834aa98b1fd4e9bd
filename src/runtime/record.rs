use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::ledger::{Address, Receipt};
use crate::recipe::Recipe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Pending,
    Applied,
    PartiallyApplied,
    Failed,
    Recovered,
}

impl BatchStatus {
    /// Terminal records are never walked again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Applied | BatchStatus::Failed | BatchStatus::Recovered
        )
    }
}

/// Durable trace of one recipe execution.
///
/// Updated after every node's ledger interaction and persisted through a
/// `BatchStore`, so the recovery tool can re-derive the un-applied suffix
/// after a crash. Carries the full recipe snapshot for that purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub recipe_id: String,
    pub user: Address,
    pub status: BatchStatus,
    pub applied_node_ids: Vec<String>,
    /// Node id to the receipts of its ledger calls, in submission order.
    pub receipts: HashMap<String, Vec<Receipt>>,
    pub recipe: Recipe,
    pub halted_reason: Option<String>,
}

impl BatchRecord {
    pub fn open(recipe: &Recipe) -> Self {
        Self {
            recipe_id: recipe.recipe_id.clone(),
            user: recipe.owner.clone(),
            status: BatchStatus::Pending,
            applied_node_ids: Vec::new(),
            receipts: HashMap::new(),
            recipe: recipe.clone(),
            halted_reason: None,
        }
    }

    pub fn is_applied(&self, node_id: &str) -> bool {
        self.applied_node_ids.iter().any(|id| id == node_id)
    }

    pub fn mark_applied(&mut self, node_id: &str, receipts: Vec<Receipt>) {
        if !self.is_applied(node_id) {
            self.applied_node_ids.push(node_id.to_string());
        }
        self.receipts.insert(node_id.to_string(), receipts);
    }
}

/// Persistence seam for batch records.
#[async_trait]
pub trait BatchStore: Send + Sync + Debug {
    async fn put(&self, record: &BatchRecord) -> Result<()>;

    async fn get(&self, recipe_id: &str) -> Result<Option<BatchRecord>>;

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<BatchRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    records: DashMap<String, BatchRecord>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn put(&self, record: &BatchRecord) -> Result<()> {
        self.records
            .insert(record.recipe_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, recipe_id: &str) -> Result<Option<BatchRecord>> {
        Ok(self.records.get(recipe_id).map(|r| r.value().clone()))
    }

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<BatchRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.value().status == status)
            .map(|r| r.value().clone())
            .collect())
    }
}

/// One JSON document per recipe id under the state directory, durable
/// across process restarts. Writes go through a temp file and rename.
#[derive(Debug)]
pub struct FileBatchStore {
    dir: PathBuf,
}

impl FileBatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(Self { dir })
    }

    fn record_path(&self, recipe_id: &str) -> Result<PathBuf> {
        // Recipe ids name files directly; refuse anything that could
        // escape the state directory.
        if recipe_id.is_empty()
            || recipe_id.contains(['/', '\\'])
            || recipe_id == "."
            || recipe_id == ".."
        {
            return Err(EngineError::Storage(format!(
                "recipe id '{recipe_id}' is not a valid record name"
            )));
        }
        Ok(self.dir.join(format!("{recipe_id}.json")))
    }

    fn read_record(path: &Path) -> Result<BatchRecord> {
        let raw = fs::read_to_string(path).map_err(|e| EngineError::Storage(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| EngineError::Storage(e.to_string()))
    }
}

#[async_trait]
impl BatchStore for FileBatchStore {
    async fn put(&self, record: &BatchRecord) -> Result<()> {
        let path = self.record_path(&record.recipe_id)?;
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(record)
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        fs::write(&tmp, raw).map_err(|e| EngineError::Storage(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, recipe_id: &str) -> Result<Option<BatchRecord>> {
        let path = self.record_path(recipe_id)?;
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<BatchRecord>> {
        let mut records = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| EngineError::Storage(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Storage(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let record = Self::read_record(&path)?;
            if record.status == status {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.recipe_id.cmp(&b.recipe_id));
        Ok(records)
    }
}
