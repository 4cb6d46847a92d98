// 👤 Assignment Engine - Which agent owns which case file
//
// Two states only: unassigned ⇄ assigned. assign/unassign are pure transforms
// over a record collection; the store serializes them against shared state.

use crate::error::CaseFileError;
use crate::record::CaseFileRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{info, warn};

// ============================================================================
// ELIGIBILITY POLICY
// ============================================================================

/// Whether the engine itself checks `agent.eligible_banks`.
///
/// `Delegate` trusts the caller to only offer eligible agents (single-record
/// surfaces do this via `AgentRegistry::offerable_for`). `Enforce` skips
/// records whose bank the agent may not receive and reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityPolicy {
    #[default]
    Delegate,
    Enforce,
}

impl EligibilityPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "delegate" => Some(EligibilityPolicy::Delegate),
            "enforce" => Some(EligibilityPolicy::Enforce),
            _ => None,
        }
    }
}

// ============================================================================
// AGENT
// ============================================================================

/// Collection agent, supplied by the caller's agent directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    /// Bank ids this agent may receive files for
    pub eligible_banks: BTreeSet<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Agent {
            id: id.into(),
            name: name.into(),
            eligible_banks: BTreeSet::new(),
        }
    }

    /// Builder: add an eligible bank
    pub fn with_bank(mut self, bank_id: impl Into<String>) -> Self {
        self.eligible_banks.insert(bank_id.into());
        self
    }

    pub fn can_receive(&self, bank_id: &str) -> bool {
        let bank = bank_id.trim();
        self.eligible_banks
            .iter()
            .any(|b| b.trim().eq_ignore_ascii_case(bank))
    }
}

// ============================================================================
// AGENT REGISTRY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        AgentRegistry { agents: Vec::new() }
    }

    pub fn from_agents(agents: Vec<Agent>) -> Self {
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register(agent);
        }
        registry
    }

    /// Register an agent, replacing any agent with the same id
    pub fn register(&mut self, agent: Agent) {
        match self.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent,
            None => self.agents.push(agent),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Agents that may be offered for a file from `bank_id`
    pub fn offerable_for(&self, bank_id: &str) -> Vec<&Agent> {
        self.agents.iter().filter(|a| a.can_receive(bank_id)).collect()
    }

    pub fn all(&self) -> &[Agent] {
        &self.agents
    }

    pub fn count(&self) -> usize {
        self.agents.len()
    }
}

// ============================================================================
// ASSIGNMENT OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentOutcome {
    /// Full collection after the operation
    pub records: Vec<CaseFileRecord>,
    /// Targeted ids that were written
    pub updated: Vec<String>,
    /// Requested ids not present in the collection (ignored)
    pub missing: Vec<String>,
    /// Targeted ids skipped because the agent is not eligible for the bank
    pub ineligible: Vec<String>,
}

// ============================================================================
// ASSIGNMENT ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentEngine {
    policy: EligibilityPolicy,
}

impl AssignmentEngine {
    pub fn new(policy: EligibilityPolicy) -> Self {
        AssignmentEngine { policy }
    }

    pub fn policy(&self) -> EligibilityPolicy {
        self.policy
    }

    /// Give every record whose id is in `record_ids` to `agent_id`.
    ///
    /// An unknown agent fails the whole call with `AgentNotFound` and
    /// nothing changes. Reassigning an assigned record overwrites the agent.
    pub fn assign<S: AsRef<str>>(
        &self,
        records: &[CaseFileRecord],
        record_ids: &[S],
        agent_id: &str,
        agents: &AgentRegistry,
    ) -> Result<AssignmentOutcome, CaseFileError> {
        let agent = agents.find_by_id(agent_id).ok_or_else(|| {
            warn!(agent_id, "assignment to unknown agent rejected");
            CaseFileError::AgentNotFound {
                agent_id: agent_id.to_string(),
            }
        })?;

        let targets = target_set(record_ids);
        let mut updated = Vec::new();
        let mut ineligible = Vec::new();

        let next: Vec<CaseFileRecord> = records
            .iter()
            .map(|record| {
                if !targets.contains(record.id.as_str()) {
                    return record.clone();
                }
                if self.policy == EligibilityPolicy::Enforce && !agent.can_receive(&record.bank) {
                    ineligible.push(record.id.clone());
                    return record.clone();
                }
                updated.push(record.id.clone());
                record.with_agent(&agent.name)
            })
            .collect();

        let missing = missing_ids(records, record_ids);

        info!(
            agent_id,
            agent = %agent.name,
            updated = updated.len(),
            missing = missing.len(),
            ineligible = ineligible.len(),
            "case files assigned"
        );

        Ok(AssignmentOutcome {
            records: next,
            updated,
            missing,
            ineligible,
        })
    }

    /// Clear the owning agent of every record whose id is in `record_ids`.
    /// Already-unassigned records stay unassigned.
    pub fn unassign<S: AsRef<str>>(&self, records: &[CaseFileRecord], record_ids: &[S]) -> AssignmentOutcome {
        let targets = target_set(record_ids);
        let mut updated = Vec::new();

        let next: Vec<CaseFileRecord> = records
            .iter()
            .map(|record| {
                if targets.contains(record.id.as_str()) {
                    updated.push(record.id.clone());
                    record.without_agent()
                } else {
                    record.clone()
                }
            })
            .collect();

        let missing = missing_ids(records, record_ids);

        info!(updated = updated.len(), missing = missing.len(), "case files unassigned");

        AssignmentOutcome {
            records: next,
            updated,
            missing,
            ineligible: Vec::new(),
        }
    }
}

fn target_set<S: AsRef<str>>(record_ids: &[S]) -> HashSet<&str> {
    record_ids.iter().map(|id| id.as_ref()).collect()
}

/// Requested ids absent from `records`, first-seen order, no duplicates
fn missing_ids<S: AsRef<str>>(records: &[CaseFileRecord], record_ids: &[S]) -> Vec<String> {
    let present: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let mut seen = HashSet::new();

    record_ids
        .iter()
        .map(|id| id.as_ref())
        .filter(|id| !present.contains(id) && seen.insert(*id))
        .map(String::from)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AssignmentStatus;

    fn store() -> Vec<CaseFileRecord> {
        vec![
            CaseFileRecord::new("r1", "DBBL", "CreditCard"),
            CaseFileRecord::new("r2", "DBBL", "Loan"),
            CaseFileRecord::new("r3", "BRAC", "CreditCard").with_agent("Karim"),
        ]
    }

    fn agents() -> AgentRegistry {
        AgentRegistry::from_agents(vec![
            Agent::new("a1", "Jane").with_bank("DBBL"),
            Agent::new("a2", "Karim").with_bank("BRAC").with_bank("CITY"),
        ])
    }

    #[test]
    fn test_assign_sets_agent_and_status() {
        let engine = AssignmentEngine::default();
        let outcome = engine.assign(&store(), &["r1", "r2"], "a1", &agents()).unwrap();

        for id in ["r1", "r2"] {
            let record = outcome.records.iter().find(|r| r.id == id).unwrap();
            assert_eq!(record.status, AssignmentStatus::Assigned);
            assert_eq!(record.assigned_agent.as_deref(), Some("Jane"));
        }
        assert_eq!(outcome.updated, vec!["r1", "r2"]);
        assert!(outcome.missing.is_empty());
    }

    #[test]
    fn test_unknown_agent_leaves_records_unchanged() {
        let engine = AssignmentEngine::default();
        let records = store();

        let err = engine
            .assign(&records, &["r1", "r2"], "unknown-agent", &agents())
            .unwrap_err();

        assert_eq!(
            err,
            CaseFileError::AgentNotFound {
                agent_id: "unknown-agent".to_string()
            }
        );
        assert_eq!(records, store());
    }

    #[test]
    fn test_missing_ids_are_ignored_and_reported() {
        let engine = AssignmentEngine::default();
        let outcome = engine
            .assign(&store(), &["r1", "ghost", "ghost"], "a1", &agents())
            .unwrap();

        assert_eq!(outcome.updated, vec!["r1"]);
        assert_eq!(outcome.missing, vec!["ghost"]);
        assert_eq!(outcome.records.len(), 3);
    }

    #[test]
    fn test_reassign_overwrites_agent() {
        let engine = AssignmentEngine::default();
        let outcome = engine.assign(&store(), &["r3"], "a1", &agents()).unwrap();

        let r3 = outcome.records.iter().find(|r| r.id == "r3").unwrap();
        assert_eq!(r3.assigned_agent.as_deref(), Some("Jane"));
        assert_eq!(r3.status, AssignmentStatus::Assigned);
    }

    #[test]
    fn test_assign_then_unassign_restores_only_targets() {
        let engine = AssignmentEngine::default();
        let original = store();
        let ids = ["r1", "r2"];

        let assigned = engine.assign(&original, &ids, "a1", &agents()).unwrap();
        let restored = engine.unassign(&assigned.records, &ids);

        for record in &restored.records {
            if ids.contains(&record.id.as_str()) {
                assert_eq!(record.status, AssignmentStatus::Unassigned);
                assert!(record.assigned_agent.is_none());
            } else {
                let before = original.iter().find(|r| r.id == record.id).unwrap();
                assert_eq!(record, before);
            }
        }
    }

    #[test]
    fn test_unassign_unassigned_is_noop_state() {
        let engine = AssignmentEngine::default();
        let outcome = engine.unassign(&store(), &["r1"]);

        let r1 = outcome.records.iter().find(|r| r.id == "r1").unwrap();
        assert_eq!(r1, &store()[0]);
    }

    #[test]
    fn test_delegate_policy_does_not_check_banks() {
        let engine = AssignmentEngine::new(EligibilityPolicy::Delegate);
        // Jane only covers DBBL; r3 is BRAC
        let outcome = engine.assign(&store(), &["r3"], "a1", &agents()).unwrap();

        assert_eq!(outcome.updated, vec!["r3"]);
        assert!(outcome.ineligible.is_empty());
    }

    #[test]
    fn test_enforce_policy_skips_ineligible_records() {
        let engine = AssignmentEngine::new(EligibilityPolicy::Enforce);
        let outcome = engine.assign(&store(), &["r1", "r3"], "a1", &agents()).unwrap();

        assert_eq!(outcome.updated, vec!["r1"]);
        assert_eq!(outcome.ineligible, vec!["r3"]);

        let r3 = outcome.records.iter().find(|r| r.id == "r3").unwrap();
        assert_eq!(r3.assigned_agent.as_deref(), Some("Karim"));
    }

    #[test]
    fn test_offerable_agents_by_bank() {
        let registry = agents();

        let dbbl: Vec<&str> = registry.offerable_for("dbbl").iter().map(|a| a.id.as_str()).collect();
        assert_eq!(dbbl, vec!["a1"]);

        let city: Vec<&str> = registry.offerable_for("CITY").iter().map(|a| a.id.as_str()).collect();
        assert_eq!(city, vec!["a2"]);

        assert!(registry.offerable_for("HSBC").is_empty());
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = agents();
        registry.register(Agent::new("a1", "Jane Doe").with_bank("CITY"));

        assert_eq!(registry.count(), 2);
        let jane = registry.find_by_id("a1").unwrap();
        assert_eq!(jane.name, "Jane Doe");
        assert!(jane.can_receive("CITY"));
        assert!(!jane.can_receive("DBBL"));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(EligibilityPolicy::parse("ENFORCE"), Some(EligibilityPolicy::Enforce));
        assert_eq!(EligibilityPolicy::parse(" delegate "), Some(EligibilityPolicy::Delegate));
        assert_eq!(EligibilityPolicy::parse("strict"), None);
    }
}
