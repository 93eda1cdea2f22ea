//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

use crate::dedup::{merge, IdentityKey, MatchPolicy};
use crate::error::{StoreError, StoreResult};
use crate::stores::locks::KeyLocks;
use crate::traits::store::{LeadStore, RunHistory, UpsertOutcome};
use crate::types::{
    lead::{Lead, LeadId, LeadStatus},
    query::{confidence_bucket, AggregateBy, LeadFilter, LeadPage, Pagination},
    run::{ActiveRun, RunRecord},
};

#[derive(Default)]
struct LeadIndex {
    leads: HashMap<LeadId, Lead>,
    by_key: HashMap<IdentityKey, LeadId>,
    /// (organization, location) -> leads, for similarity matching
    by_scope: HashMap<(String, String), Vec<LeadId>>,
}

impl LeadIndex {
    fn find_match(&self, key: &IdentityKey, policy: MatchPolicy) -> Option<LeadId> {
        match policy {
            MatchPolicy::Exact => self.by_key.get(key).copied(),
            MatchPolicy::TokenSimilarity { .. } => {
                if let Some(id) = self.by_key.get(key) {
                    return Some(*id);
                }
                self.by_scope.get(&key.scope())?.iter().copied().find(|id| {
                    self.leads
                        .get(id)
                        .is_some_and(|lead| policy.matches(&IdentityKey::of(lead), key))
                })
            }
        }
    }

    fn index(&mut self, id: LeadId, key: IdentityKey) {
        self.by_scope.entry(key.scope()).or_default().push(id);
        self.by_key.entry(key).or_insert(id);
    }

    fn unindex(&mut self, id: LeadId, key: &IdentityKey) {
        if self.by_key.get(key) == Some(&id) {
            self.by_key.remove(key);
        }
        if let Some(ids) = self.by_scope.get_mut(&key.scope()) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_scope.remove(&key.scope());
            }
        }
    }
}

/// In-memory storage for leads and run history.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    index: RwLock<LeadIndex>,
    runs: RwLock<VecDeque<RunRecord>>,
    active: RwLock<Option<ActiveRun>>,
    locks: KeyLocks,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, LeadIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LeadIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the number of stored leads.
    pub fn lead_count(&self) -> usize {
        self.read().leads.len()
    }

    /// Get the number of stored run records.
    pub fn run_count(&self) -> usize {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Snapshot of every stored lead.
    pub fn all_leads(&self) -> Vec<Lead> {
        self.read().leads.values().cloned().collect()
    }

    fn insert_locked(index: &mut LeadIndex, mut lead: Lead) -> StoreResult<LeadId> {
        lead.check_invariants()
            .map_err(|reason| StoreError::Invalid { reason })?;
        let now = Utc::now();
        lead.date_extracted = now;
        lead.date_updated = now;

        let id = lead.id;
        index.index(id, IdentityKey::of(&lead));
        index.leads.insert(id, lead);
        Ok(id)
    }
}

/// Lock key for an upsert: the identity key itself, or its (organization,
/// location) scope when titles may match fuzzily.
pub(crate) fn upsert_lock_key(key: &IdentityKey, policy: MatchPolicy) -> String {
    match policy {
        MatchPolicy::Exact => key.digest(),
        MatchPolicy::TokenSimilarity { .. } => key.scope_digest(),
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn upsert(&self, lead: Lead, policy: MatchPolicy) -> StoreResult<UpsertOutcome> {
        let key = IdentityKey::of(&lead);
        let _guard = self.locks.lock(&upsert_lock_key(&key, policy)).await;

        let mut index = self.write();
        let Some(id) = index.find_match(&key, policy) else {
            let id = Self::insert_locked(&mut index, lead)?;
            return Ok(UpsertOutcome::Inserted(id));
        };

        let stored = index
            .leads
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let old_key = IdentityKey::of(stored);
        let incoming_won = merge(stored, lead, Utc::now());
        let new_key = IdentityKey::of(stored);
        debug!(lead_id = %id, incoming_won, "merged lead");

        if old_key != new_key {
            index.unindex(id, &old_key);
            index.index(id, new_key);
        }
        Ok(UpsertOutcome::Merged(id))
    }

    async fn insert(&self, lead: Lead) -> StoreResult<LeadId> {
        Self::insert_locked(&mut self.write(), lead)
    }

    async fn get(&self, id: LeadId) -> StoreResult<Option<Lead>> {
        Ok(self.read().leads.get(&id).cloned())
    }

    async fn query(&self, filter: &LeadFilter, page: Pagination) -> StoreResult<LeadPage> {
        let index = self.read();
        let mut matching: Vec<&Lead> = index.leads.values().filter(|l| filter.matches(l)).collect();
        matching.sort_by(|a, b| {
            b.date_extracted
                .cmp(&a.date_extracted)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matching.len();
        let leads = matching
            .into_iter()
            .skip(page.offset())
            .take(page.per_page)
            .cloned()
            .collect();

        Ok(LeadPage {
            leads,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn update_status(
        &self,
        id: LeadId,
        status: LeadStatus,
        notes: Option<String>,
    ) -> StoreResult<Lead> {
        let mut index = self.write();
        let lead = index
            .leads
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        lead.status = status;
        if notes.is_some() {
            lead.notes = notes;
        }
        lead.date_updated = Utc::now();
        Ok(lead.clone())
    }

    async fn aggregate(&self, by: AggregateBy) -> StoreResult<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for lead in self.read().leads.values() {
            let bucket = match by {
                AggregateBy::Source => lead.source.clone(),
                AggregateBy::LeadType => lead.lead_type.as_str().to_string(),
                AggregateBy::ConfidenceBucket => confidence_bucket(lead.confidence_score).to_string(),
            };
            *counts.entry(bucket).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.lead_count())
    }
}

#[async_trait]
impl RunHistory for MemoryStore {
    async fn append_run(&self, record: RunRecord, max_history: usize) -> StoreResult<()> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        runs.push_back(record);
        while runs.len() > max_history.max(1) {
            runs.pop_front();
        }
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>> {
        Ok(self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_run(&self, run: &ActiveRun, stale_before: DateTime<Utc>) -> StoreResult<bool> {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(held) if held.started_at >= stale_before => Ok(false),
            _ => {
                *active = Some(run.clone());
                Ok(true)
            }
        }
    }

    async fn release_run(&self, run_id: Uuid) -> StoreResult<()> {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|held| held.run_id == run_id) {
            *active = None;
        }
        Ok(())
    }

    async fn active_run(&self) -> StoreResult<Option<ActiveRun>> {
        Ok(self.active.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{lead_fixture, run_fixture};
    use crate::types::lead::LeadType;
    use crate::types::run::{RunStatus, TriggerKind};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_upsert_inserts_then_merges() {
        let store = MemoryStore::new();

        let first = store
            .upsert(lead_fixture("bidnetdirect", "Acme Corp", "Night Guard Needed", 0.4), MatchPolicy::Exact)
            .await
            .unwrap();
        let second = store
            .upsert(lead_fixture("instantmarkets", "ACME CORP.", "night guard needed", 0.8), MatchPolicy::Exact)
            .await
            .unwrap();

        assert!(first.is_insert());
        assert_eq!(second, UpsertOutcome::Merged(first.id()));
        assert_eq!(store.count().await.unwrap(), 1);

        let lead = store.get(first.id()).await.unwrap().unwrap();
        assert_eq!(lead.confidence_score, 0.8);
        assert_eq!(lead.source, "bidnetdirect");
        assert!(lead.seen_in("instantmarkets"));
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_lead() {
        let store = MemoryStore::new();
        let lead = lead_fixture("test", "", "Night Guard", 0.5);
        assert!(matches!(
            store.insert(lead).await,
            Err(StoreError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_token_similarity_uses_scope_index() {
        let store = MemoryStore::new();
        let policy = MatchPolicy::TokenSimilarity { min_similarity: 0.6 };

        store
            .upsert(lead_fixture("a", "Acme Corp", "Night Guard Needed", 0.5), policy)
            .await
            .unwrap();
        let close = store
            .upsert(lead_fixture("b", "Acme Corp", "Night Guard Needed Urgently", 0.5), policy)
            .await
            .unwrap();
        let unrelated = store
            .upsert(lead_fixture("c", "Acme Corp", "Parking Lot Patrol", 0.5), policy)
            .await
            .unwrap();

        assert!(!close.is_insert());
        assert!(unrelated.is_insert());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_same_key_yield_one_lead() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let score = if i % 2 == 0 { 0.4 } else { 0.7 };
                store
                    .upsert(lead_fixture(&format!("s{i}"), "Acme Corp", "Night Guard Needed", score), MatchPolicy::Exact)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let leads = store.all_leads();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].confidence_score, 0.7);
        assert_eq!(leads[0].additional_sources.len(), 15);
    }

    #[tokio::test]
    async fn test_query_filters_and_pagination() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut lead = lead_fixture("usajobs", &format!("Agency {i}"), "Security Guard", 0.5);
            lead.opportunity.state = Some(if i < 3 { "TX" } else { "CA" }.to_string());
            store.insert(lead).await.unwrap();
        }
        store
            .insert(lead_fixture("bidnetdirect", "Acme Corp", "Event Guards", 0.9))
            .await
            .unwrap();

        let texas = store
            .query(&LeadFilter::new().with_state("Texas"), Pagination::new(1, 2))
            .await
            .unwrap();
        assert_eq!(texas.total, 3);
        assert_eq!(texas.leads.len(), 2);
        assert_eq!(texas.total_pages(), 2);

        let page_two = store
            .query(&LeadFilter::new().with_state("TX"), Pagination::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page_two.leads.len(), 1);

        let confident = store
            .query(&LeadFilter::new().with_min_confidence(0.8), Pagination::default())
            .await
            .unwrap();
        assert_eq!(confident.total, 1);
        assert_eq!(confident.leads[0].organization.name, "Acme Corp");

        let keyword = store
            .query_all(&LeadFilter::new().with_keyword("event").with_lead_type(LeadType::JobPosting))
            .await
            .unwrap();
        assert_eq!(keyword.len(), 1);
    }

    #[tokio::test]
    async fn test_update_status() {
        let store = MemoryStore::new();
        let id = store
            .insert(lead_fixture("usajobs", "Travis County", "Guard", 0.5))
            .await
            .unwrap();

        let lead = assert_ok!(
            store
                .update_status(id, LeadStatus::Contacted, Some("left voicemail".to_string()))
                .await
        );
        assert_eq!(lead.status, LeadStatus::Contacted);
        assert_eq!(lead.notes.as_deref(), Some("left voicemail"));

        let lead = assert_ok!(store.update_status(id, LeadStatus::Qualified, None).await);
        assert_eq!(lead.notes.as_deref(), Some("left voicemail"));

        let missing = assert_err!(
            store.update_status(LeadId::new(), LeadStatus::Rejected, None).await
        );
        assert!(matches!(missing, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_aggregate() {
        let store = MemoryStore::new();
        store.insert(lead_fixture("usajobs", "A", "Guard", 0.3)).await.unwrap();
        store.insert(lead_fixture("usajobs", "B", "Guard", 0.5)).await.unwrap();
        store.insert(lead_fixture("bidnetdirect", "C", "Guard", 0.9)).await.unwrap();

        let by_source = store.aggregate(AggregateBy::Source).await.unwrap();
        assert_eq!(by_source.get("usajobs"), Some(&2));
        assert_eq!(by_source.get("bidnetdirect"), Some(&1));

        let buckets = store.aggregate(AggregateBy::ConfidenceBucket).await.unwrap();
        assert_eq!(buckets.get("low"), Some(&1));
        assert_eq!(buckets.get("medium"), Some(&1));
        assert_eq!(buckets.get("high"), Some(&1));

        let by_type = store.aggregate(AggregateBy::LeadType).await.unwrap();
        assert_eq!(by_type.get("job_posting"), Some(&3));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append_run(run_fixture(i, RunStatus::Completed), 3).await.unwrap();
        }

        assert_eq!(store.run_count(), 3);
        let recent = store.recent_runs(10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].leads_generated, 4);
        assert_eq!(recent[2].leads_generated, 2);
        assert_eq!(store.last_run().await.unwrap().unwrap().leads_generated, 4);
    }

    #[tokio::test]
    async fn test_run_lock_claim_and_release() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = ActiveRun {
            run_id: Uuid::now_v7(),
            trigger: TriggerKind::Manual,
            started_at: now,
        };
        let second = ActiveRun {
            run_id: Uuid::now_v7(),
            ..first.clone()
        };
        let stale_before = now - chrono::Duration::hours(1);

        assert!(assert_ok!(store.claim_run(&first, stale_before).await));
        assert!(!assert_ok!(store.claim_run(&second, stale_before).await));

        // Releasing with the wrong id leaves the lock alone
        store.release_run(second.run_id).await.unwrap();
        assert_eq!(store.active_run().await.unwrap(), Some(first.clone()));

        store.release_run(first.run_id).await.unwrap();
        assert_eq!(store.active_run().await.unwrap(), None);
        assert!(assert_ok!(store.claim_run(&second, stale_before).await));
    }

    #[tokio::test]
    async fn test_stale_run_lock_is_taken_over() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let abandoned = ActiveRun {
            run_id: Uuid::now_v7(),
            trigger: TriggerKind::Schedule,
            started_at: now - chrono::Duration::hours(12),
        };
        let fresh = ActiveRun {
            run_id: Uuid::now_v7(),
            trigger: TriggerKind::Manual,
            started_at: now,
        };

        store.claim_run(&abandoned, now - chrono::Duration::hours(24)).await.unwrap();
        assert!(store.claim_run(&fresh, now - chrono::Duration::hours(6)).await.unwrap());
        assert_eq!(store.active_run().await.unwrap().unwrap().run_id, fresh.run_id);
    }
}
