//! The persistence contract. Every operation the core needs from a durable
//! backend is declared here; `bk_storage_memory` is the only implementation
//! that ships in this workspace, and it exists for tests, not production.

use crate::filter::{JobFilter, JobMutation};
use crate::rows::{
    JobRow, LockRow, QueueRow, QueueStatsRow, ScheduleRow, StorageHealth, WorkerRegistrationRow,
};
use async_trait::async_trait;
use bk_core::{JobStatus, Result};
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Storage: Send + Sync {
    // ---- Job CRUD ----

    /// Durably insert a new job row. Fails with `Error::Uniqueness` if the
    /// row's `unique_key` conflicts with a non-terminal job already held
    /// anywhere in the store, regardless of queue.
    async fn insert_job(&self, row: JobRow) -> Result<JobRow>;

    /// Insert many jobs in one durable operation (used by `TRIGGER_ALL`
    /// catch-up firing and bulk producer APIs).
    async fn insert_jobs_batch(&self, rows: Vec<JobRow>) -> Result<Vec<JobRow>>;

    async fn get_job(&self, id: &str) -> Result<Option<JobRow>>;

    /// Filtered query; ordering is unspecified here (callers needing
    /// reservation order use `reserve_jobs` instead).
    async fn find_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRow>>;

    /// Atomically move up to `batch_size` eligible PENDING jobs in
    /// `queue_name` to RESERVED, in order of priority rank ascending, then
    /// `available_at` ascending, then `created_at` ascending, then `id`
    /// ascending. Eligibility: queue not paused, `available_at <= now`,
    /// status PENDING, priority rank present in `priority_ranks`. A
    /// conforming driver uses a "skip locked" read or equivalent so
    /// concurrent callers never return the same row twice.
    async fn reserve_jobs(
        &self,
        queue_name: &str,
        worker_id: &str,
        priority_ranks: &[u8],
        now: DateTime<Utc>,
        lease_seconds: i64,
        batch_size: usize,
    ) -> Result<Vec<JobRow>>;

    /// The single atomicity primitive reservation correctness rests on:
    /// update the row at `id` only if its current status equals
    /// `expected_status` and its `worker_id` equals `expected_worker_id`
    /// (or `expected_worker_id` is `None`, meaning "don't care"). Returns
    /// the row as it was *before* the mutation on success, or `None` if the
    /// precondition did not hold (already moved by someone else, or
    /// missing).
    async fn conditional_update_job(
        &self,
        id: &str,
        expected_status: JobStatus,
        expected_worker_id: Option<&str>,
        mutation: JobMutation,
    ) -> Result<Option<JobRow>>;

    /// Sweep jobs whose `reservation_deadline < now` and status in
    /// {RESERVED, RUNNING}; returns the rows found (the reaper classifies
    /// and re-dispatches each through the same primitive above).
    async fn sweep_expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<JobRow>>;

    /// Whether a non-terminal job already holds `unique_key`, anywhere in
    /// the store, used by `enqueue` to enforce data model invariant (7): a
    /// unique key binds at most one non-terminal job at a time across every
    /// queue, not just the one being enqueued into.
    async fn has_active_unique_key(&self, unique_key: &str) -> Result<bool>;

    async fn queue_statistics(&self, queue_name: &str) -> Result<QueueStatsRow>;

    /// Delete terminal jobs older than `older_than`; returns the count
    /// removed.
    async fn prune_jobs(&self, older_than: DateTime<Utc>, statuses: &[JobStatus]) -> Result<u64>;

    // ---- Queue descriptors ----

    async fn get_queue(&self, name: &str) -> Result<Option<QueueRow>>;

    /// Create-or-update a queue descriptor (first reference creates it).
    async fn upsert_queue(&self, row: QueueRow) -> Result<QueueRow>;

    // ---- Schedule CRUD ----

    async fn insert_schedule(&self, row: ScheduleRow) -> Result<ScheduleRow>;
    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRow>>;
    async fn list_schedules(&self, enabled_only: bool) -> Result<Vec<ScheduleRow>>;
    async fn delete_schedule(&self, id: &str) -> Result<()>;

    /// Replace a schedule row only if its `version` still matches
    /// `expected_version`; returns the new row on success, or `None` if the
    /// version had already moved (a concurrent tick or admin edit won).
    async fn update_schedule(
        &self,
        id: &str,
        expected_version: i64,
        row: ScheduleRow,
    ) -> Result<Option<ScheduleRow>>;

    // ---- Worker registration CRUD ----

    async fn upsert_worker_registration(
        &self,
        row: WorkerRegistrationRow,
    ) -> Result<WorkerRegistrationRow>;
    async fn get_worker_registration(&self, worker_id: &str)
        -> Result<Option<WorkerRegistrationRow>>;
    async fn list_worker_registrations(&self) -> Result<Vec<WorkerRegistrationRow>>;
    async fn remove_worker_registration(&self, worker_id: &str) -> Result<()>;

    /// Registrations whose `last_heartbeat_at` is older than `threshold`
    /// and whose `current_job_ids` is empty (the reaper's removal
    /// candidates).
    async fn find_stale_worker_registrations(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<WorkerRegistrationRow>>;

    // ---- Named locks ----

    /// Acquire `name` for `holder_id` until `deadline`. Succeeds if the
    /// lock is free or its previous deadline has already passed.
    async fn acquire_lock(&self, name: &str, holder_id: &str, deadline: DateTime<Utc>)
        -> Result<bool>;

    /// Extend the deadline of a lock this holder already owns. Fails
    /// silently (returns `false`) if ownership has since changed.
    async fn renew_lock(
        &self,
        name: &str,
        holder_id: &str,
        new_deadline: DateTime<Utc>,
    ) -> Result<bool>;

    async fn release_lock(&self, name: &str, holder_id: &str) -> Result<()>;

    async fn get_lock(&self, name: &str) -> Result<Option<LockRow>>;

    // ---- Health ----

    async fn health(&self) -> Result<StorageHealth>;

    // ---- Event emission (optional per the contract; always implementable
    // with a broadcast channel updated alongside `insert_job`) ----

    /// Subscribe to notifications of newly-visible pending jobs on
    /// `queue_name`. A worker idle-polling this queue may await this
    /// alongside its poll-interval sleep to shorten the wait; missing a
    /// notification is harmless since the next poll tick still finds the
    /// job.
    fn subscribe_new_jobs(&self, queue_name: &str) -> tokio::sync::broadcast::Receiver<()>;
}
