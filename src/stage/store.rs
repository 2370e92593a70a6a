//! Filesystem-backed task store. The stage hierarchy is the replicated
//! source of truth; an in-memory id -> stage index is rebuilt by scanning
//! on open and kept current through the transition primitives.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, TandemError};
use crate::record::{parse_document, render_document, TaskRecord};

use super::Stage;

pub struct TaskStore {
    root: PathBuf,
    index: RwLock<HashMap<String, Stage>>,
}

impl TaskStore {
    /// Open an existing workspace and rebuild the stage index by scanning
    /// the hierarchy.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join("Needs_Action").is_dir() {
            return Err(TandemError::NotInitialized);
        }
        let store = Self {
            root,
            index: RwLock::new(HashMap::new()),
        };
        store.rescan()?;
        Ok(store)
    }

    /// Materialize the full stage hierarchy and open the store.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for stage in Stage::all() {
            fs::create_dir_all(root.join(stage.dir()))?;
        }
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the index from the filesystem. Called on open and after a
    /// reconciliation pass rewrites the tree underneath us.
    pub fn rescan(&self) -> Result<()> {
        let mut index = HashMap::new();
        for stage in Stage::all() {
            let dir = self.root.join(stage.dir());
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let Some(id) = record_id_from_path(&entry.path()) else {
                    continue;
                };
                if let Some(previous) = index.insert(id.clone(), stage) {
                    // Duplicate ids across stages are a divergence the
                    // reconciler resolves; keep the more terminal one.
                    warn!(id = %id, a = %previous, b = %stage, "Duplicate record during rescan");
                    if previous.terminality_rank() > stage.terminality_rank() {
                        index.insert(id, previous);
                    }
                }
            }
        }
        *self.index.write() = index;
        Ok(())
    }

    /// Place a new record into `Needs_Action/<domain>`. Idempotent by id:
    /// creating the same record twice is a no-op and returns `false`.
    pub fn create(&self, record: &TaskRecord) -> Result<bool> {
        let stage = Stage::NeedsAction(record.domain);
        {
            let index = self.index.read();
            if index.contains_key(&record.id) {
                debug!(id = %record.id, "Duplicate record creation skipped");
                return Ok(false);
            }
        }
        let target = self.record_path(stage, &record.id);
        if target.exists() {
            return Ok(false);
        }
        self.write_document(&target, record)?;
        self.index.write().insert(record.id.clone(), stage);
        debug!(id = %record.id, stage = %stage, "Record created");
        Ok(true)
    }

    /// The only primitive mutation: an atomic rename between stage
    /// directories. Fails loudly when the source no longer holds the
    /// record; that is the signal another actor already moved it.
    pub fn transition(&self, id: &str, from: Stage, to: Stage) -> Result<()> {
        if from.is_terminal() {
            return Err(TandemError::TerminalStage(id.to_string()));
        }
        if !from.can_transition_to(to) {
            return Err(TandemError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let source = self.record_path(from, id);
        let target = self.record_path(to, id);
        if let Err(e) = fs::rename(&source, &target) {
            // No exists() pre-check: the rename itself is the race
            // arbiter. A vanished source means another actor moved the
            // record first.
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(TandemError::StageConflict {
                    id: id.to_string(),
                    stage: from.to_string(),
                });
            }
            return Err(e.into());
        }
        self.index.write().insert(id.to_string(), to);
        debug!(id = %id, from = %from, to = %to, "Record transitioned");
        Ok(())
    }

    pub fn stage_of(&self, id: &str) -> Option<Stage> {
        self.index.read().get(id).copied()
    }

    pub fn load(&self, id: &str) -> Result<TaskRecord> {
        let stage = self
            .stage_of(id)
            .ok_or_else(|| TandemError::RecordNotFound(id.to_string()))?;
        self.load_from(stage, id)
    }

    pub fn load_from(&self, stage: Stage, id: &str) -> Result<TaskRecord> {
        let path = self.record_path(stage, id);
        let content = fs::read_to_string(&path)?;
        parse_document(&content, &path)
    }

    /// Rewrite a record's document in place (trace appends, annotations).
    /// The record must not move between load and update; callers hold the
    /// claim when they call this.
    pub fn update(&self, id: &str, apply: impl FnOnce(&mut TaskRecord)) -> Result<TaskRecord> {
        let stage = self
            .stage_of(id)
            .ok_or_else(|| TandemError::RecordNotFound(id.to_string()))?;
        let mut record = self.load_from(stage, id)?;
        apply(&mut record);
        self.write_document(&self.record_path(stage, id), &record)?;
        Ok(record)
    }

    /// All records currently in a stage, in stable (file name) order.
    pub fn scan(&self, stage: Stage) -> Result<Vec<TaskRecord>> {
        let dir = self.root.join(stage.dir());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| record_id_from_path(p).is_some())
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path)?;
            records.push(parse_document(&content, &path)?);
        }
        Ok(records)
    }

    pub fn record_path(&self, stage: Stage, id: &str) -> PathBuf {
        self.root.join(stage.dir()).join(format!("{}.task.md", id))
    }

    /// Temp-write then rename so readers never observe a torn document.
    fn write_document(&self, target: &Path, record: &TaskRecord) -> Result<()> {
        let content = render_document(record)?;
        let tmp = target.with_extension("md.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, target)?;
        Ok(())
    }
}

fn record_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".task.md").map(str::to_string)
}
