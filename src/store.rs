// 🗄️ Case File Store - single owner of the shared record collection
//
// Every read-modify-write runs under one mutex, so two operators assigning
// at once are serialized instead of losing an update. Uploads wait in a
// staging area and reach the collection only through an atomic commit.
//
// The `*_with` variants run a persist step while the lock is held and apply
// the change in memory only once it succeeds, so memory never runs ahead of
// the database.

use crate::assignment::{Agent, AgentRegistry, AssignmentEngine, AssignmentOutcome, EligibilityPolicy};
use crate::error::CaseFileError;
use crate::ingest::{BatchPreview, StagedBatch};
use crate::record::CaseFileRecord;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<CaseFileRecord>,
    staged: HashMap<Uuid, StagedBatch>,
    agents: AgentRegistry,
}

/// Cheap to clone; clones share the same collection
#[derive(Debug, Clone)]
pub struct CaseFileStore {
    state: Arc<Mutex<StoreState>>,
    engine: AssignmentEngine,
}

impl CaseFileStore {
    pub fn new(policy: EligibilityPolicy) -> Self {
        CaseFileStore {
            state: Arc::new(Mutex::new(StoreState::default())),
            engine: AssignmentEngine::new(policy),
        }
    }

    /// Store seeded from persisted records and agents
    pub fn with_contents(records: Vec<CaseFileRecord>, agents: AgentRegistry, policy: EligibilityPolicy) -> Self {
        let store = CaseFileStore::new(policy);
        {
            let mut state = store.lock();
            state.records = records;
            state.agents = agents;
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic elsewhere never leaves the state half-written: every
        // mutation below replaces whole values.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // STAGING
    // ========================================================================

    /// Park a batch for review; returns its id
    pub fn stage(&self, batch: StagedBatch) -> Uuid {
        let id = batch.id;
        info!(batch_id = %id, template = %batch.template, rows = batch.len(), "batch staged for review");
        self.lock().staged.insert(id, batch);
        id
    }

    pub fn preview(&self, batch_id: Uuid, sample_size: usize) -> Result<BatchPreview, CaseFileError> {
        self.lock()
            .staged
            .get(&batch_id)
            .map(|batch| batch.preview(sample_size))
            .ok_or_else(|| batch_not_found(batch_id))
    }

    pub fn staged_batches(&self) -> Vec<Uuid> {
        self.lock().staged.keys().copied().collect()
    }

    /// Publish a staged batch into the collection, all rows or none.
    ///
    /// A batch whose ids already exist in the store is rejected and stays
    /// staged; the collection is not touched. Returns the committed records.
    pub fn commit(&self, batch_id: Uuid) -> Result<Vec<CaseFileRecord>, CaseFileError> {
        self.commit_with(batch_id, |_| Ok::<(), CaseFileError>(()))
    }

    /// `commit`, persisting the batch's records first. A failed persist
    /// leaves the batch staged and the collection untouched.
    pub fn commit_with<E, F>(&self, batch_id: Uuid, persist: F) -> Result<Vec<CaseFileRecord>, E>
    where
        E: From<CaseFileError>,
        F: FnOnce(&[CaseFileRecord]) -> Result<(), E>,
    {
        let mut state = self.lock();

        let batch = state.staged.get(&batch_id).ok_or_else(|| batch_not_found(batch_id))?;

        let existing: HashSet<&str> = state.records.iter().map(|r| r.id.as_str()).collect();
        let collisions: Vec<String> = batch
            .records
            .iter()
            .filter(|r| existing.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();

        if !collisions.is_empty() {
            warn!(batch_id = %batch_id, collisions = collisions.len(), "commit rejected: id collision");
            return Err(CaseFileError::IdCollision { ids: collisions }.into());
        }

        persist(&batch.records)?;

        let batch = state.staged.remove(&batch_id).ok_or_else(|| batch_not_found(batch_id))?;
        state.records.extend(batch.records.iter().cloned());

        info!(
            batch_id = %batch_id,
            committed = batch.records.len(),
            total = state.records.len(),
            "batch committed"
        );

        Ok(batch.records)
    }

    pub fn discard(&self, batch_id: Uuid) -> Result<(), CaseFileError> {
        match self.lock().staged.remove(&batch_id) {
            Some(batch) => {
                info!(batch_id = %batch_id, rows = batch.len(), "batch discarded");
                Ok(())
            }
            None => Err(batch_not_found(batch_id)),
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn records(&self) -> Vec<CaseFileRecord> {
        self.lock().records.clone()
    }

    pub fn get(&self, record_id: &str) -> Option<CaseFileRecord> {
        self.lock().records.iter().find(|r| r.id == record_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    // ========================================================================
    // AGENTS
    // ========================================================================

    pub fn register_agent(&self, agent: Agent) {
        self.lock().agents.register(agent);
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.lock().agents.all().to_vec()
    }

    /// Agents that may be offered for one record; `None` if the record is unknown
    pub fn offerable_agents(&self, record_id: &str) -> Option<Vec<Agent>> {
        let state = self.lock();
        let record = state.records.iter().find(|r| r.id == record_id)?;
        Some(state.agents.offerable_for(&record.bank).into_iter().cloned().collect())
    }

    // ========================================================================
    // ASSIGNMENT
    // ========================================================================

    /// Assign under the store lock. On `AgentNotFound` the collection is unchanged.
    pub fn assign<S: AsRef<str>>(&self, record_ids: &[S], agent_id: &str) -> Result<AssignmentOutcome, CaseFileError> {
        self.assign_with(record_ids, agent_id, |_| Ok::<(), CaseFileError>(()))
    }

    /// `assign`, persisting the outcome before it replaces the collection
    pub fn assign_with<S, E, F>(&self, record_ids: &[S], agent_id: &str, persist: F) -> Result<AssignmentOutcome, E>
    where
        S: AsRef<str>,
        E: From<CaseFileError>,
        F: FnOnce(&AssignmentOutcome) -> Result<(), E>,
    {
        let mut state = self.lock();
        let outcome = self.engine.assign(&state.records, record_ids, agent_id, &state.agents)?;
        persist(&outcome)?;
        state.records = outcome.records.clone();
        Ok(outcome)
    }

    pub fn unassign<S: AsRef<str>>(&self, record_ids: &[S]) -> AssignmentOutcome {
        let mut state = self.lock();
        let outcome = self.engine.unassign(&state.records, record_ids);
        state.records = outcome.records.clone();
        outcome
    }

    /// `unassign`, persisting the outcome before it replaces the collection
    pub fn unassign_with<S, E, F>(&self, record_ids: &[S], persist: F) -> Result<AssignmentOutcome, E>
    where
        S: AsRef<str>,
        F: FnOnce(&AssignmentOutcome) -> Result<(), E>,
    {
        let mut state = self.lock();
        let outcome = self.engine.unassign(&state.records, record_ids);
        persist(&outcome)?;
        state.records = outcome.records.clone();
        Ok(outcome)
    }
}

impl Default for CaseFileStore {
    fn default() -> Self {
        Self::new(EligibilityPolicy::default())
    }
}

fn batch_not_found(batch_id: Uuid) -> CaseFileError {
    CaseFileError::BatchNotFound {
        batch_id: batch_id.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
