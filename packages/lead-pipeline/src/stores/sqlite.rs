//! SQLite storage implementation.
//!
//! Each lead is stored as a JSON document next to the columns queries and
//! matching need (identity digest, scope digest, state, status, confidence).
//! Good for:
//! - Single-server deployments
//! - Keeping leads and run history across restarts

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{FromRow, Sqlite};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dedup::{merge, IdentityKey, MatchPolicy};
use crate::error::{StoreError, StoreResult};
use crate::stores::locks::KeyLocks;
use crate::stores::memory::upsert_lock_key;
use crate::traits::store::{LeadStore, RunHistory, UpsertOutcome};
use crate::types::{
    lead::{Lead, LeadId, LeadStatus},
    query::{AggregateBy, LeadFilter, LeadPage, Pagination},
    run::{ActiveRun, RunRecord, TriggerKind},
};

/// How long a writer waits on another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// A write transaction opened with `BEGIN IMMEDIATE`.
///
/// The write lock is taken before the first read, so a read-then-write
/// never has to upgrade its lock while another connection is writing; it
/// waits on the busy timeout instead. Dropped before `finish`, the
/// connection is closed rather than returned to the pool, which rolls the
/// transaction back.
struct WriteTx {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl WriteTx {
    async fn begin(pool: &SqlitePool) -> StoreResult<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn, open: true })
    }

    /// Commit on `Ok`, roll back on `Err`, and pass `result` through.
    async fn finish<T>(mut self, result: StoreResult<T>) -> StoreResult<T> {
        let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
        let ended = sqlx::query(end).execute(&mut *self.conn).await;
        match (result, ended) {
            (Ok(value), Ok(_)) => {
                self.open = false;
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(_)) => {
                self.open = false;
                Err(e)
            }
            (Err(e), Err(rollback)) => {
                warn!(error = %rollback, "rollback failed");
                Err(e)
            }
        }
    }
}

impl Deref for WriteTx {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        &self.conn
    }
}

impl DerefMut for WriteTx {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if self.open {
            warn!("write transaction abandoned, closing connection");
            self.conn.close_on_drop();
        }
    }
}

/// SQLite-backed lead store and run history.
pub struct SqliteStore {
    pool: SqlitePool,
    locks: KeyLocks,
}

impl SqliteStore {
    /// Open (or create) a database.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://leads.db?mode=rwc` - File-based, created if missing
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        // every pooled connection to :memory: would open its own database
        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)?.busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            locks: KeyLocks::new(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                identity_key TEXT NOT NULL,
                scope_key TEXT NOT NULL,
                source TEXT NOT NULL,
                state TEXT,
                status TEXT NOT NULL,
                lead_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                date_extracted TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_leads_identity_key ON leads(identity_key);
            CREATE INDEX IF NOT EXISTS idx_leads_scope_key ON leads(scope_key);
            CREATE INDEX IF NOT EXISTS idx_leads_state ON leads(state);
            CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(status);
            CREATE INDEX IF NOT EXISTS idx_leads_date_extracted ON leads(date_extracted);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_lock (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                run_id TEXT NOT NULL,
                trigger_kind TEXT NOT NULL,
                started_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_match(
        conn: &mut SqliteConnection,
        key: &IdentityKey,
        policy: MatchPolicy,
    ) -> StoreResult<Option<Lead>> {
        let exact = sqlx::query_as::<_, DataRow>(
            "SELECT data FROM leads WHERE identity_key = ? ORDER BY date_extracted, id LIMIT 1",
        )
        .bind(key.digest())
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(row) = exact {
            return row.into_lead().map(Some);
        }

        if let MatchPolicy::TokenSimilarity { .. } = policy {
            let rows = sqlx::query_as::<_, DataRow>(
                "SELECT data FROM leads WHERE scope_key = ? ORDER BY date_extracted, id",
            )
            .bind(key.scope_digest())
            .fetch_all(&mut *conn)
            .await?;
            for row in rows {
                let lead = row.into_lead()?;
                if policy.matches(&IdentityKey::of(&lead), key) {
                    return Ok(Some(lead));
                }
            }
        }
        Ok(None)
    }

    async fn insert_row(conn: &mut SqliteConnection, lead: &Lead) -> StoreResult<()> {
        let key = IdentityKey::of(lead);
        sqlx::query(
            r#"
            INSERT INTO leads (id, identity_key, scope_key, source, state, status, lead_type, confidence, date_extracted, data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lead.id.to_string())
        .bind(key.digest())
        .bind(key.scope_digest())
        .bind(&lead.source)
        .bind(&lead.opportunity.state)
        .bind(lead.status.as_str())
        .bind(lead.lead_type.as_str())
        .bind(lead.confidence_score)
        .bind(timestamp(lead.date_extracted))
        .bind(serde_json::to_string(lead)?)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn update_row(conn: &mut SqliteConnection, lead: &Lead) -> StoreResult<()> {
        let key = IdentityKey::of(lead);
        sqlx::query(
            r#"
            UPDATE leads SET
                identity_key = ?, scope_key = ?, state = ?, status = ?, confidence = ?, data = ?
            WHERE id = ?
            "#,
        )
        .bind(key.digest())
        .bind(key.scope_digest())
        .bind(&lead.opportunity.state)
        .bind(lead.status.as_str())
        .bind(lead.confidence_score)
        .bind(serde_json::to_string(lead)?)
        .bind(lead.id.to_string())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn upsert_in(
        conn: &mut SqliteConnection,
        key: &IdentityKey,
        lead: Lead,
        policy: MatchPolicy,
    ) -> StoreResult<UpsertOutcome> {
        match Self::find_match(conn, key, policy).await? {
            Some(mut stored) => {
                let incoming_won = merge(&mut stored, lead, Utc::now());
                debug!(lead_id = %stored.id, incoming_won, "merged lead");
                Self::update_row(conn, &stored).await?;
                Ok(UpsertOutcome::Merged(stored.id))
            }
            None => {
                let lead = Self::prepare_insert(lead)?;
                Self::insert_row(conn, &lead).await?;
                Ok(UpsertOutcome::Inserted(lead.id))
            }
        }
    }

    async fn update_status_in(
        conn: &mut SqliteConnection,
        id: LeadId,
        status: LeadStatus,
        notes: Option<String>,
    ) -> StoreResult<Lead> {
        let row = sqlx::query_as::<_, DataRow>("SELECT data FROM leads WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        let mut lead = row.into_lead()?;
        lead.status = status;
        if notes.is_some() {
            lead.notes = notes;
        }
        lead.date_updated = Utc::now();

        Self::update_row(conn, &lead).await?;
        Ok(lead)
    }

    async fn append_run_in(
        conn: &mut SqliteConnection,
        record: &RunRecord,
        max_history: usize,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO runs (id, start_time, status, data) VALUES (?, ?, ?, ?)")
            .bind(record.id.to_string())
            .bind(timestamp(record.start_time))
            .bind(record.status.as_str())
            .bind(serde_json::to_string(record)?)
            .execute(&mut *conn)
            .await?;

        sqlx::query("DELETE FROM runs WHERE seq NOT IN (SELECT seq FROM runs ORDER BY seq DESC LIMIT ?)")
            .bind(max_history.max(1) as i64)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    fn prepare_insert(mut lead: Lead) -> StoreResult<Lead> {
        lead.check_invariants()
            .map_err(|reason| StoreError::Invalid { reason })?;
        let now = Utc::now();
        lead.date_extracted = now;
        lead.date_updated = now;
        Ok(lead)
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn trigger_str(trigger: TriggerKind) -> &'static str {
    match trigger {
        TriggerKind::Schedule => "schedule",
        TriggerKind::Manual => "manual",
    }
}

#[derive(Debug, FromRow)]
struct RunLockRow {
    run_id: String,
    trigger_kind: String,
    started_at: String,
}

impl RunLockRow {
    fn into_active(self) -> StoreResult<ActiveRun> {
        let run_id = Uuid::parse_str(&self.run_id).map_err(StoreError::backend)?;
        let started_at = DateTime::parse_from_rfc3339(&self.started_at)
            .map_err(StoreError::backend)?
            .with_timezone(&Utc);
        let trigger = match self.trigger_kind.as_str() {
            "schedule" => TriggerKind::Schedule,
            _ => TriggerKind::Manual,
        };

        Ok(ActiveRun {
            run_id,
            trigger,
            started_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DataRow {
    data: String,
}

impl DataRow {
    fn into_lead(self) -> StoreResult<Lead> {
        Ok(serde_json::from_str(&self.data)?)
    }

    fn into_run(self) -> StoreResult<RunRecord> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

#[async_trait]
impl LeadStore for SqliteStore {
    async fn upsert(&self, lead: Lead, policy: MatchPolicy) -> StoreResult<UpsertOutcome> {
        let key = IdentityKey::of(&lead);
        let _guard = self.locks.lock(&upsert_lock_key(&key, policy)).await;

        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = Self::upsert_in(&mut tx, &key, lead, policy).await;
        tx.finish(result).await
    }

    async fn insert(&self, lead: Lead) -> StoreResult<LeadId> {
        let lead = Self::prepare_insert(lead)?;
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = Self::insert_row(&mut tx, &lead).await.map(|()| lead.id);
        tx.finish(result).await
    }

    async fn get(&self, id: LeadId) -> StoreResult<Option<Lead>> {
        let row = sqlx::query_as::<_, DataRow>("SELECT data FROM leads WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(DataRow::into_lead).transpose()
    }

    async fn query(&self, filter: &LeadFilter, page: Pagination) -> StoreResult<LeadPage> {
        // Indexed columns narrow the scan; the rest of the filter runs on the
        // decoded lead so both stores agree.
        let mut sql = String::from("SELECT data FROM leads WHERE 1 = 1");
        let state = filter
            .state
            .as_ref()
            .map(|s| filter.state_code().unwrap_or_else(|| s.to_uppercase()));
        if state.is_some() {
            sql.push_str(" AND state = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.lead_type.is_some() {
            sql.push_str(" AND lead_type = ?");
        }
        if filter.min_confidence.is_some() {
            sql.push_str(" AND confidence >= ?");
        }
        sql.push_str(" ORDER BY date_extracted DESC, id DESC");

        let mut q = sqlx::query_as::<_, DataRow>(&sql);
        if let Some(state) = &state {
            q = q.bind(state);
        }
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(lead_type) = filter.lead_type {
            q = q.bind(lead_type.as_str());
        }
        if let Some(min) = filter.min_confidence {
            q = q.bind(min);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut matching = Vec::new();
        for row in rows {
            let lead = row.into_lead()?;
            if filter.matches(&lead) {
                matching.push(lead);
            }
        }

        let total = matching.len();
        let leads = matching
            .into_iter()
            .skip(page.offset())
            .take(page.per_page)
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
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = Self::update_status_in(&mut tx, id, status, notes).await;
        tx.finish(result).await
    }

    async fn aggregate(&self, by: AggregateBy) -> StoreResult<BTreeMap<String, usize>> {
        let sql = match by {
            AggregateBy::Source => "SELECT source, COUNT(*) FROM leads GROUP BY source",
            AggregateBy::LeadType => "SELECT lead_type, COUNT(*) FROM leads GROUP BY lead_type",
            AggregateBy::ConfidenceBucket => {
                r#"
                SELECT CASE
                    WHEN confidence >= 0.7 THEN 'high'
                    WHEN confidence >= 0.4 THEN 'medium'
                    ELSE 'low'
                END AS bucket, COUNT(*)
                FROM leads GROUP BY bucket
                "#
            }
        };

        let rows: Vec<(String, i64)> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(bucket, count)| (bucket, count as usize))
            .collect())
    }

    async fn count(&self) -> StoreResult<usize> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM leads")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0 as usize)
    }
}

#[async_trait]
impl RunHistory for SqliteStore {
    async fn append_run(&self, record: RunRecord, max_history: usize) -> StoreResult<()> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = Self::append_run_in(&mut tx, &record, max_history).await;
        tx.finish(result).await
    }

    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, DataRow>("SELECT data FROM runs ORDER BY seq DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DataRow::into_run).collect()
    }

    async fn claim_run(&self, run: &ActiveRun, stale_before: DateTime<Utc>) -> StoreResult<bool> {
        let claimed = sqlx::query(
            r#"
            INSERT INTO run_lock (slot, run_id, trigger_kind, started_at) VALUES (1, ?, ?, ?)
            ON CONFLICT(slot) DO UPDATE SET
                run_id = excluded.run_id,
                trigger_kind = excluded.trigger_kind,
                started_at = excluded.started_at
            WHERE run_lock.started_at < ?
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(trigger_str(run.trigger))
        .bind(timestamp(run.started_at))
        .bind(timestamp(stale_before))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(claimed == 1)
    }

    async fn release_run(&self, run_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM run_lock WHERE run_id = ?")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_run(&self) -> StoreResult<Option<ActiveRun>> {
        let row = sqlx::query_as::<_, RunLockRow>(
            "SELECT run_id, trigger_kind, started_at FROM run_lock WHERE slot = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunLockRow::into_active).transpose()
    }
}
