//! In-memory store for tests and runs without PostgreSQL.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use grantflow_core::{
    AttemptFilter, AttemptStatus, DeliveryAttempt, DeliveryStats, ExportMarkers, Grant, GrantError, Result,
};

use crate::{DeliveryLog, GrantStore, DEFAULT_HISTORY_LIMIT};

#[derive(Default)]
pub struct MemoryStore {
    grants: RwLock<HashMap<String, Grant>>,
    attempts: RwLock<Vec<DeliveryAttempt>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored grant, ordered by id.
    pub fn grants(&self) -> Vec<Grant> {
        let mut all: Vec<Grant> = self.grants.read().expect("grants lock poisoned").values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Every attempt in append order.
    pub fn attempts(&self) -> Vec<DeliveryAttempt> {
        self.attempts.read().expect("attempts lock poisoned").clone()
    }

    /// Latest attempt per grant, in first-seen grant order.
    fn latest_per_grant(&self) -> Vec<DeliveryAttempt> {
        let attempts = self.attempts.read().expect("attempts lock poisoned");
        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, &DeliveryAttempt> = HashMap::new();
        for a in attempts.iter() {
            let key = a.grant_id.as_str();
            let newer = match latest.get(key) {
                Some(cur) => (a.sequence, a.attempt_number) > (cur.sequence, cur.attempt_number),
                None => {
                    order.push(key);
                    true
                }
            };
            if newer {
                latest.insert(key, a);
            }
        }
        order.into_iter().filter_map(|id| latest.get(id).map(|a| (*a).clone())).collect()
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Grant>> {
        Ok(self.grants.read().expect("grants lock poisoned").get(id).cloned())
    }

    async fn insert(&self, grant: &Grant) -> Result<()> {
        let mut grants = self.grants.write().expect("grants lock poisoned");
        if grants.contains_key(&grant.id) {
            return Err(GrantError::PersistenceConflict { id: grant.id.clone() });
        }
        grants.insert(grant.id.clone(), grant.clone());
        Ok(())
    }

    async fn update(&self, grant: &Grant) -> Result<()> {
        let mut grants = self.grants.write().expect("grants lock poisoned");
        let stored = grants
            .get_mut(&grant.id)
            .ok_or_else(|| GrantError::NotFound(format!("grant {}", grant.id)))?;
        stored.data = grant.data.clone();
        stored.updated_at = grant.updated_at;
        Ok(())
    }

    async fn pending_forward(&self, limit: usize) -> Result<Vec<Grant>> {
        let attempted: HashSet<String> = self
            .attempts
            .read()
            .expect("attempts lock poisoned")
            .iter()
            .map(|a| a.grant_id.clone())
            .collect();
        let mut pending: Vec<Grant> = self
            .grants
            .read()
            .expect("grants lock poisoned")
            .values()
            .filter(|g| !g.forwarded && !attempted.contains(&g.id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then_with(|| a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_forwarded(&self, id: &str, attempt_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut grants = self.grants.write().expect("grants lock poisoned");
        let grant = grants
            .get_mut(id)
            .ok_or_else(|| GrantError::NotFound(format!("grant {id}")))?;
        if grant.forwarded {
            return Ok(false);
        }
        grant.forwarded = true;
        grant.forwarded_at = Some(at);
        grant.forwarded_attempt = Some(attempt_id);
        Ok(true)
    }

    async fn set_export(&self, id: &str, export: &ExportMarkers) -> Result<()> {
        let mut grants = self.grants.write().expect("grants lock poisoned");
        let grant = grants
            .get_mut(id)
            .ok_or_else(|| GrantError::NotFound(format!("grant {id}")))?;
        grant.export = export.clone();
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.grants.read().expect("grants lock poisoned").len() as u64)
    }
}

#[async_trait]
impl DeliveryLog for MemoryStore {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<()> {
        let mut attempts = self.attempts.write().expect("attempts lock poisoned");
        let duplicate = attempts.iter().any(|a| {
            a.grant_id == attempt.grant_id
                && a.sequence == attempt.sequence
                && a.attempt_number == attempt.attempt_number
        });
        if duplicate {
            return Err(GrantError::Storage(format!(
                "attempt {}/{} already recorded for {}",
                attempt.sequence, attempt.attempt_number, attempt.grant_id
            )));
        }
        attempts.push(attempt.clone());
        Ok(())
    }

    async fn latest_for(&self, grant_id: &str) -> Result<Option<DeliveryAttempt>> {
        Ok(self
            .attempts
            .read()
            .expect("attempts lock poisoned")
            .iter()
            .filter(|a| a.grant_id == grant_id)
            .max_by_key(|a| (a.sequence, a.attempt_number))
            .cloned())
    }

    async fn next_sequence(&self, grant_id: &str) -> Result<u32> {
        let max = self
            .attempts
            .read()
            .expect("attempts lock poisoned")
            .iter()
            .filter(|a| a.grant_id == grant_id)
            .map(|a| a.sequence)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeliveryAttempt>> {
        let mut due: Vec<DeliveryAttempt> = self.latest_per_grant().into_iter().filter(|a| a.is_due(now)).collect();
        due.sort_by_key(|a| a.next_retry_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn latest_failed(&self, limit: usize) -> Result<Vec<DeliveryAttempt>> {
        let mut failed: Vec<DeliveryAttempt> = self
            .latest_per_grant()
            .into_iter()
            .filter(|a| a.status == AttemptStatus::Failed)
            .collect();
        failed.truncate(limit);
        Ok(failed)
    }

    async fn history(&self, filter: &AttemptFilter) -> Result<Vec<DeliveryAttempt>> {
        let attempts = self.attempts.read().expect("attempts lock poisoned");
        let limit = filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        Ok(attempts
            .iter()
            .rev()
            .filter(|a| filter.grant_id.as_deref().map_or(true, |id| a.grant_id == id))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<DeliveryStats> {
        let mut stats = DeliveryStats::default();
        {
            let attempts = self.attempts.read().expect("attempts lock poisoned");
            for a in attempts.iter() {
                stats.total_attempts += 1;
                match a.status {
                    AttemptStatus::Success => stats.successful += 1,
                    AttemptStatus::Failed => stats.failed += 1,
                    AttemptStatus::Retrying => stats.retrying += 1,
                    AttemptStatus::Pending => stats.pending += 1,
                }
            }
        }
        stats.pending_retries = self.latest_per_grant().iter().filter(|a| a.is_due(now)).count() as u64;
        if stats.total_attempts > 0 {
            stats.success_rate = stats.successful as f64 / stats.total_attempts as f64;
        }
        stats.forwarded_grants = self
            .grants
            .read()
            .expect("grants lock poisoned")
            .values()
            .filter(|g| g.forwarded)
            .count() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use grantflow_core::{ExportStatus, GrantDraft, Source, Trigger};

    fn grant(code: &str) -> Grant {
        Grant::from_draft(GrantDraft::new(Source::SubsidyDb, code, "Ayudas"), Utc::now())
    }

    fn attempt(grant_id: &str, seq: u32, n: u32, status: AttemptStatus) -> DeliveryAttempt {
        let mut a = DeliveryAttempt::new(grant_id, seq, n, Trigger::Auto);
        a.status = status;
        a
    }

    #[tokio::test]
    async fn insert_twice_conflicts() {
        let store = MemoryStore::new();
        store.insert(&grant("1")).await.unwrap();
        let err = store.insert(&grant("1")).await.unwrap_err();
        assert!(matches!(err, GrantError::PersistenceConflict { .. }));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_never_touches_markers() {
        let store = MemoryStore::new();
        store.insert(&grant("1")).await.unwrap();
        store.mark_forwarded("BDNS-1", Uuid::new_v4(), Utc::now()).await.unwrap();

        let mut changed = grant("1");
        changed.data.is_open = true;
        store.update(&changed).await.unwrap();

        let stored = store.get("BDNS-1").await.unwrap().unwrap();
        assert!(stored.data.is_open);
        assert!(stored.forwarded);
    }

    #[tokio::test]
    async fn mark_forwarded_only_once() {
        let store = MemoryStore::new();
        store.insert(&grant("1")).await.unwrap();
        let first = Uuid::new_v4();
        assert!(store.mark_forwarded("BDNS-1", first, Utc::now()).await.unwrap());
        assert!(!store.mark_forwarded("BDNS-1", Uuid::new_v4(), Utc::now()).await.unwrap());
        let stored = store.get("BDNS-1").await.unwrap().unwrap();
        assert_eq!(stored.forwarded_attempt, Some(first));
    }

    #[tokio::test]
    async fn set_export_on_missing_grant_is_not_found() {
        let store = MemoryStore::new();
        let markers = ExportMarkers { export_status: ExportStatus::Exported, ..Default::default() };
        assert!(matches!(store.set_export("nope", &markers).await, Err(GrantError::NotFound(_))));
    }

    #[tokio::test]
    async fn pending_forward_skips_attempted_and_forwarded() {
        let store = MemoryStore::new();
        for code in ["1", "2", "3"] {
            store.insert(&grant(code)).await.unwrap();
        }
        store.append(&attempt("BDNS-1", 1, 1, AttemptStatus::Retrying)).await.unwrap();
        store.mark_forwarded("BDNS-2", Uuid::new_v4(), Utc::now()).await.unwrap();

        let pending = store.pending_forward(10).await.unwrap();
        assert_eq!(pending.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(), vec!["BDNS-3"]);
    }

    #[tokio::test]
    async fn sequences_and_latest() {
        let store = MemoryStore::new();
        assert_eq!(store.next_sequence("g").await.unwrap(), 1);
        store.append(&attempt("g", 1, 1, AttemptStatus::Retrying)).await.unwrap();
        store.append(&attempt("g", 1, 2, AttemptStatus::Failed)).await.unwrap();
        store.append(&attempt("g", 2, 1, AttemptStatus::Success)).await.unwrap();

        assert_eq!(store.next_sequence("g").await.unwrap(), 3);
        let latest = store.latest_for("g").await.unwrap().unwrap();
        assert_eq!((latest.sequence, latest.attempt_number), (2, 1));
        assert!(store.append(&attempt("g", 2, 1, AttemptStatus::Success)).await.is_err());
    }

    #[tokio::test]
    async fn due_retries_only_considers_latest_attempt() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut old = attempt("a", 1, 1, AttemptStatus::Retrying);
        old.next_retry_at = Some(now - Duration::seconds(10));
        store.append(&old).await.unwrap();
        store.append(&attempt("a", 1, 2, AttemptStatus::Success)).await.unwrap();

        let mut due = attempt("b", 1, 1, AttemptStatus::Retrying);
        due.next_retry_at = Some(now - Duration::seconds(1));
        store.append(&due).await.unwrap();

        let mut later = attempt("c", 1, 1, AttemptStatus::Retrying);
        later.next_retry_at = Some(now + Duration::seconds(60));
        store.append(&later).await.unwrap();

        let found = store.due_retries(now, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].grant_id, "b");

        let stats = store.stats(now).await.unwrap();
        assert_eq!(stats.total_attempts, 4);
        assert_eq!(stats.retrying, 3);
        assert_eq!(stats.pending_retries, 1);
        assert_eq!(stats.success_rate, 0.25);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_filtered() {
        let store = MemoryStore::new();
        store.append(&attempt("a", 1, 1, AttemptStatus::Retrying)).await.unwrap();
        store.append(&attempt("b", 1, 1, AttemptStatus::Failed)).await.unwrap();
        store.append(&attempt("a", 1, 2, AttemptStatus::Success)).await.unwrap();

        let all = store.history(&AttemptFilter::default()).await.unwrap();
        assert_eq!(all[0].attempt_number, 2);

        let only_a = store
            .history(&AttemptFilter { grant_id: Some("a".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);

        let failed = store
            .history(&AttemptFilter { status: Some(AttemptStatus::Failed), limit: Some(1), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(failed[0].grant_id, "b");
        assert_eq!(store.latest_failed(10).await.unwrap().len(), 1);
    }
}
