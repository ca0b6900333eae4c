//! Agent Registry - in-memory store of live agents
//!
//! ```text
//!   RwLock<HashMap<id, Arc<Mutex<AgentRecord>>>>
//!      │                     │
//!      │ held only to        └── held for the duration of one record
//!      │ find/insert/remove      operation, never across an await
//! ```
//!
//! Operations on different agents never contend on the same record lock;
//! operations on the same agent are serialized. A running task is
//! represented by a [`TaskGuard`], which owns the `busy` status.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::record::{AgentInfo, AgentRecord, AgentStatus, Turn};
use crate::config::AgentRole;
use crate::error::{CoreError, Result};
use crate::metrics::{AGENTS_CREATED, LIVE_AGENTS};
use crate::tools::ToolSet;

type Slot = Arc<Mutex<AgentRecord>>;

/// Counts reported by `GET /api/agents/stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStats {
    pub total_created: u64,
    pub active_agents: usize,
    pub agents_by_role: BTreeMap<String, usize>,
    pub agents_by_status: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Slot>>,
    total_created: AtomicU64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new record; the record's id must be fresh
    pub fn insert(&self, record: AgentRecord) -> AgentInfo {
        let info = record.info();
        self.agents
            .write()
            .insert(record.id.clone(), Arc::new(Mutex::new(record)));
        self.total_created.fetch_add(1, Ordering::Relaxed);
        AGENTS_CREATED.inc();
        LIVE_AGENTS.inc();
        info!(agent_id = %info.id, role = %info.role, model = %info.model, status = %info.status, "agent registered");
        info
    }

    pub fn get(&self, id: &str) -> Result<AgentRecord> {
        Ok(self.slot(id)?.lock().clone())
    }

    pub fn info(&self, id: &str) -> Result<AgentInfo> {
        Ok(self.slot(id)?.lock().info())
    }

    /// All agents, oldest first
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self.slots().iter().map(|s| s.lock().info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove an agent. A task still running keeps its own handle on the
    /// record and finishes against it.
    pub fn delete(&self, id: &str) -> Result<AgentRecord> {
        let slot = self
            .agents
            .write()
            .remove(id)
            .ok_or_else(|| CoreError::AgentNotFound(id.to_string()))?;
        LIVE_AGENTS.dec();
        let record = slot.lock().clone();
        info!(agent_id = %id, model = %record.model, "agent removed");
        Ok(record)
    }

    /// Append outside of a task. A running task owns the transcript, so a
    /// busy agent is refused; tasks append through their [`TaskGuard`].
    pub fn append_transcript(&self, id: &str, turn: Turn) -> Result<()> {
        self.with_idle(id, |record| record.transcript.push(turn))
    }

    /// Refused with `AgentBusy` while a task is running
    pub fn clear_transcript(&self, id: &str) -> Result<()> {
        self.with_idle(id, |record| record.transcript.clear())?;
        info!(agent_id = %id, "conversation history cleared");
        Ok(())
    }

    fn with_idle(&self, id: &str, f: impl FnOnce(&mut AgentRecord)) -> Result<()> {
        let slot = self.slot(id)?;
        let mut record = slot.lock();
        if record.status == AgentStatus::Busy {
            return Err(CoreError::AgentBusy {
                agent_id: id.to_string(),
                reason: "a task is running against this transcript".to_string(),
            });
        }
        f(&mut record);
        record.touch();
        Ok(())
    }

    pub fn allowed_tools(&self, id: &str) -> Option<ToolSet> {
        let slot = self.slot(id).ok()?;
        let tools = slot.lock().allowed_tools.clone();
        Some(tools)
    }

    /// Distinct models bound to live agents
    pub fn models_in_use(&self) -> BTreeSet<String> {
        self.slots().iter().map(|s| s.lock().model.clone()).collect()
    }

    pub fn stats(&self) -> AgentStats {
        let mut by_role: BTreeMap<String, usize> =
            AgentRole::ALL.iter().map(|r| (r.to_string(), 0)).collect();
        let mut by_status: BTreeMap<String, usize> =
            AgentStatus::ALL.iter().map(|s| (s.to_string(), 0)).collect();

        let slots = self.slots();
        for slot in &slots {
            let record = slot.lock();
            *by_role.entry(record.role.to_string()).or_default() += 1;
            *by_status.entry(record.status.to_string()).or_default() += 1;
        }

        AgentStats {
            total_created: self.total_created.load(Ordering::Relaxed),
            active_agents: slots.len(),
            agents_by_role: by_role,
            agents_by_status: by_status,
        }
    }

    /// Move every `initializing` agent bound to `model` to `ready` (or
    /// `error` when the download failed). Returns how many were settled.
    pub fn settle_pending(&self, model: &str, ok: bool) -> usize {
        let target = if ok { AgentStatus::Ready } else { AgentStatus::Error };
        let mut settled = 0;
        for slot in self.slots() {
            let mut record = slot.lock();
            if record.model == model && record.status == AgentStatus::Initializing {
                record.status = target;
                record.touch();
                settled += 1;
                debug!(agent_id = %record.id, status = %target, "pending agent settled");
            }
        }
        if !ok && settled > 0 {
            warn!(model = %model, agents = settled, "model download failed, agents moved to error");
        }
        settled
    }

    /// Claim the agent for one task: `ready | error → busy`
    pub fn begin_task(&self, id: &str) -> Result<TaskGuard> {
        let slot = self.slot(id)?;
        {
            let mut record = slot.lock();
            match record.status {
                AgentStatus::Ready | AgentStatus::Error => {
                    record.status = AgentStatus::Busy;
                    record.touch();
                }
                AgentStatus::Busy => {
                    return Err(CoreError::AgentBusy {
                        agent_id: id.to_string(),
                        reason: "a task is already running".to_string(),
                    })
                }
                AgentStatus::Initializing => {
                    return Err(CoreError::AgentBusy {
                        agent_id: id.to_string(),
                        reason: "model download in progress".to_string(),
                    })
                }
            }
        }
        Ok(TaskGuard {
            agent_id: id.to_string(),
            slot,
            finished: false,
        })
    }

    fn slot(&self, id: &str) -> Result<Slot> {
        self.agents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::AgentNotFound(id.to_string()))
    }

    fn slots(&self) -> Vec<Slot> {
        self.agents.read().values().cloned().collect()
    }
}

/// Exclusive right to run a task on one agent
///
/// Dropping an unfinished guard (a cancelled task) returns the agent to
/// `ready`.
pub struct TaskGuard {
    agent_id: String,
    slot: Slot,
    finished: bool,
}

impl TaskGuard {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn read<R>(&self, f: impl FnOnce(&AgentRecord) -> R) -> R {
        f(&self.slot.lock())
    }

    pub fn append(&self, turn: Turn) {
        let mut record = self.slot.lock();
        record.transcript.push(turn);
        record.touch();
    }

    pub fn add_tokens(&self, tokens: u64) {
        self.slot.lock().total_tokens_used += tokens;
    }

    /// Release the agent with its final status
    pub fn finish(mut self, status: AgentStatus, completed: bool) {
        let mut record = self.slot.lock();
        record.status = status;
        if completed {
            record.tasks_completed += 1;
        }
        record.touch();
        self.finished = true;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut record = self.slot.lock();
        if record.status == AgentStatus::Busy {
            record.status = AgentStatus::Ready;
            debug!(agent_id = %self.agent_id, "task dropped before finishing, agent released");
        }
    }
}
