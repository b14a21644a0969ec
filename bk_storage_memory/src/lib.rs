//! ABOUTME: In-process reference implementation of the storage contract
//! ABOUTME: Test and development driver only; not a production backend
//!
//! Every map here is guarded by a plain `std::sync::RwLock` rather than
//! `tokio::sync::RwLock`: no operation below ever awaits while holding a
//! guard, so the blocking lock is strictly simpler and never stalls the
//! runtime.

use async_trait::async_trait;
use bk_core::{Error, JobStatus, Priority, Result};
use bk_storage::{
    JobFilter, JobMutation, JobRow, LockRow, QueueRow, QueueStatsRow, ScheduleRow, Storage,
    StorageHealth, WorkerRegistrationRow,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

const NOTIFY_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct MemoryStorage {
    jobs: RwLock<HashMap<String, JobRow>>,
    queues: RwLock<HashMap<String, QueueRow>>,
    schedules: RwLock<HashMap<String, ScheduleRow>>,
    workers: RwLock<HashMap<String, WorkerRegistrationRow>>,
    locks: RwLock<HashMap<String, LockRow>>,
    notify: RwLock<HashMap<String, broadcast::Sender<()>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_queue(&self, queue_name: &str) {
        let notify = self.notify.read().expect("notify lock poisoned");
        if let Some(sender) = notify.get(queue_name) {
            // No receivers is not an error; the job is still durable and a
            // poll loop will pick it up on its next tick.
            let _ = sender.send(());
        }
    }

    fn active_unique_statuses() -> [JobStatus; 4] {
        [
            JobStatus::Pending,
            JobStatus::Reserved,
            JobStatus::Running,
            JobStatus::Retrying,
        ]
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_job(&self, row: JobRow) -> Result<JobRow> {
        if let Some(key) = &row.unique_key {
            if self.has_active_unique_key(key).await? {
                return Err(Error::Uniqueness(format!(
                    "unique key '{key}' already bound to an active job"
                )));
            }
        }
        let mut jobs = self.jobs.write().expect("jobs lock poisoned");
        jobs.insert(row.id.clone(), row.clone());
        drop(jobs);
        self.notify_queue(&row.queue_name);
        debug!(job_id = %row.id, queue = %row.queue_name, "inserted job");
        Ok(row)
    }

    async fn insert_jobs_batch(&self, rows: Vec<JobRow>) -> Result<Vec<JobRow>> {
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            inserted.push(self.insert_job(row).await?);
        }
        Ok(inserted)
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRow>> {
        let jobs = self.jobs.read().expect("jobs lock poisoned");
        Ok(jobs.get(id).cloned())
    }

    async fn find_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRow>> {
        let jobs = self.jobs.read().expect("jobs lock poisoned");
        let mut matched: Vec<JobRow> = jobs
            .values()
            .filter(|row| {
                filter
                    .queue_name
                    .as_ref()
                    .map(|q| &row.queue_name == q)
                    .unwrap_or(true)
            })
            .filter(|row| {
                filter
                    .task_name
                    .as_ref()
                    .map(|t| &row.task_name == t)
                    .unwrap_or(true)
            })
            .filter(|row| {
                filter
                    .scheduled_by_id
                    .as_ref()
                    .map(|id| row.scheduled_by_id.as_deref() == Some(id.as_str()))
                    .unwrap_or(true)
            })
            .filter(|row| {
                filter
                    .tag
                    .as_ref()
                    .map(|tag| row.tags.iter().any(|t| t == tag))
                    .unwrap_or(true)
            })
            .filter(|row| match &filter.statuses {
                None => true,
                Some(statuses) => row.status.parse::<JobStatus>()
                    .map(|s| statuses.contains(&s))
                    .unwrap_or(false),
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let matched = if offset >= matched.len() {
            Vec::new()
        } else {
            matched.split_off(offset)
        };
        let matched = if let Some(limit) = filter.limit {
            matched.into_iter().take(limit.max(0) as usize).collect()
        } else {
            matched
        };
        Ok(matched)
    }

    async fn reserve_jobs(
        &self,
        queue_name: &str,
        worker_id: &str,
        priority_ranks: &[u8],
        now: DateTime<Utc>,
        lease_seconds: i64,
        batch_size: usize,
    ) -> Result<Vec<JobRow>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        {
            let queues = self.queues.read().expect("queues lock poisoned");
            if queues.get(queue_name).map(|q| q.paused).unwrap_or(false) {
                return Ok(Vec::new());
            }
        }

        let mut jobs = self.jobs.write().expect("jobs lock poisoned");
        let mut eligible: Vec<&mut JobRow> = jobs
            .values_mut()
            .filter(|row| {
                row.queue_name == queue_name
                    && row.status == JobStatus::Pending.as_str()
                    && row.available_at <= now
                    && row
                        .priority
                        .parse::<Priority>()
                        .map(|p| priority_ranks.contains(&p.rank()))
                        .unwrap_or(false)
            })
            .collect();

        eligible.sort_by(|a, b| {
            let rank_a = a.priority.parse::<Priority>().map(|p| p.rank()).unwrap_or(255);
            let rank_b = b.priority.parse::<Priority>().map(|p| p.rank()).unwrap_or(255);
            rank_a
                .cmp(&rank_b)
                .then_with(|| a.available_at.cmp(&b.available_at))
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let deadline = now + chrono::Duration::seconds(lease_seconds);
        let mut reserved = Vec::with_capacity(batch_size.min(eligible.len()));
        for row in eligible.into_iter().take(batch_size) {
            row.status = JobStatus::Reserved.as_str().to_string();
            row.worker_id = Some(worker_id.to_string());
            row.reservation_deadline = Some(deadline);
            reserved.push(row.clone());
        }
        Ok(reserved)
    }

    async fn conditional_update_job(
        &self,
        id: &str,
        expected_status: JobStatus,
        expected_worker_id: Option<&str>,
        mutation: JobMutation,
    ) -> Result<Option<JobRow>> {
        let mut jobs = self.jobs.write().expect("jobs lock poisoned");
        let Some(row) = jobs.get_mut(id) else {
            return Ok(None);
        };
        if row.status != expected_status.as_str() {
            return Ok(None);
        }
        if let Some(expected) = expected_worker_id {
            if row.worker_id.as_deref() != Some(expected) {
                return Ok(None);
            }
        }

        let previous = row.clone();

        if let Some(status) = mutation.new_status {
            row.status = status.as_str().to_string();
        }
        if mutation.clear_reservation {
            row.worker_id = None;
            row.reservation_deadline = None;
        } else {
            if let Some(worker_id) = mutation.worker_id {
                row.worker_id = Some(worker_id);
            }
            if let Some(deadline) = mutation.reservation_deadline {
                row.reservation_deadline = Some(deadline);
            }
        }
        if let Some(started_at) = mutation.started_at {
            row.started_at = Some(started_at);
        }
        if let Some(completed_at) = mutation.completed_at {
            row.completed_at = Some(completed_at);
        }
        if let Some(available_at) = mutation.available_at {
            row.available_at = available_at;
        }
        if let Some(attempt) = mutation.attempt {
            row.attempt = attempt;
        }
        if let Some(result) = mutation.result {
            row.result = Some(result);
        }
        if let Some(kind) = mutation.error_kind {
            row.error_kind = Some(kind);
        }
        if let Some(message) = mutation.error_message {
            row.error_message = Some(message);
        }
        if let Some(detail) = mutation.error_detail {
            row.error_detail = Some(detail);
        }
        if let Some(dead_letter) = mutation.dead_letter {
            row.dead_letter = dead_letter;
        }
        if let Some(cancel_requested) = mutation.cancel_requested {
            row.cancel_requested = cancel_requested;
        }

        Ok(Some(previous))
    }

    async fn sweep_expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<JobRow>> {
        let jobs = self.jobs.read().expect("jobs lock poisoned");
        let expired = jobs
            .values()
            .filter(|row| {
                matches!(
                    row.status.as_str(),
                    "RESERVED" | "RUNNING"
                ) && row
                    .reservation_deadline
                    .map(|d| d < now)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(expired)
    }

    async fn has_active_unique_key(&self, unique_key: &str) -> Result<bool> {
        let jobs = self.jobs.read().expect("jobs lock poisoned");
        let active = Self::active_unique_statuses();
        Ok(jobs.values().any(|row| {
            row.unique_key.as_deref() == Some(unique_key)
                && row.status.parse::<JobStatus>()
                    .map(|s| active.contains(&s))
                    .unwrap_or(false)
        }))
    }

    async fn queue_statistics(&self, queue_name: &str) -> Result<QueueStatsRow> {
        let jobs = self.jobs.read().expect("jobs lock poisoned");
        let mut stats = QueueStatsRow {
            queue_name: queue_name.to_string(),
            ..Default::default()
        };
        for row in jobs.values().filter(|row| row.queue_name == queue_name) {
            match row.status.as_str() {
                "PENDING" => stats.pending += 1,
                "RESERVED" => stats.reserved += 1,
                "RUNNING" => stats.running += 1,
                "RETRYING" => stats.retrying += 1,
                "COMPLETED" => stats.completed += 1,
                "FAILED" => stats.failed += 1,
                "DEAD" => stats.dead += 1,
                "CANCELLED" => stats.cancelled += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn prune_jobs(&self, older_than: DateTime<Utc>, statuses: &[JobStatus]) -> Result<u64> {
        let mut jobs = self.jobs.write().expect("jobs lock poisoned");
        let before = jobs.len();
        jobs.retain(|_, row| {
            let status_matches = row.status.parse::<JobStatus>()
                .map(|s| statuses.contains(&s))
                .unwrap_or(false);
            let reference_time = row.completed_at.unwrap_or(row.created_at);
            !(status_matches && reference_time < older_than)
        });
        Ok((before - jobs.len()) as u64)
    }

    async fn get_queue(&self, name: &str) -> Result<Option<QueueRow>> {
        let queues = self.queues.read().expect("queues lock poisoned");
        Ok(queues.get(name).cloned())
    }

    async fn upsert_queue(&self, row: QueueRow) -> Result<QueueRow> {
        let mut queues = self.queues.write().expect("queues lock poisoned");
        queues.insert(row.name.clone(), row.clone());
        Ok(row)
    }

    async fn insert_schedule(&self, row: ScheduleRow) -> Result<ScheduleRow> {
        let mut schedules = self.schedules.write().expect("schedules lock poisoned");
        if schedules.values().any(|s| s.name == row.name) {
            return Err(Error::Uniqueness(format!(
                "schedule name '{}' already exists",
                row.name
            )));
        }
        schedules.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRow>> {
        let schedules = self.schedules.read().expect("schedules lock poisoned");
        Ok(schedules.get(id).cloned())
    }

    async fn list_schedules(&self, enabled_only: bool) -> Result<Vec<ScheduleRow>> {
        let schedules = self.schedules.read().expect("schedules lock poisoned");
        Ok(schedules
            .values()
            .filter(|s| !enabled_only || s.enabled)
            .cloned()
            .collect())
    }

    async fn delete_schedule(&self, id: &str) -> Result<()> {
        let mut schedules = self.schedules.write().expect("schedules lock poisoned");
        schedules.remove(id);
        Ok(())
    }

    async fn update_schedule(
        &self,
        id: &str,
        expected_version: i64,
        row: ScheduleRow,
    ) -> Result<Option<ScheduleRow>> {
        let mut schedules = self.schedules.write().expect("schedules lock poisoned");
        match schedules.get(id) {
            Some(existing) if existing.version == expected_version => {
                schedules.insert(id.to_string(), row.clone());
                Ok(Some(row))
            }
            _ => Ok(None),
        }
    }

    async fn upsert_worker_registration(
        &self,
        row: WorkerRegistrationRow,
    ) -> Result<WorkerRegistrationRow> {
        let mut workers = self.workers.write().expect("workers lock poisoned");
        workers.insert(row.worker_id.clone(), row.clone());
        Ok(row)
    }

    async fn get_worker_registration(
        &self,
        worker_id: &str,
    ) -> Result<Option<WorkerRegistrationRow>> {
        let workers = self.workers.read().expect("workers lock poisoned");
        Ok(workers.get(worker_id).cloned())
    }

    async fn list_worker_registrations(&self) -> Result<Vec<WorkerRegistrationRow>> {
        let workers = self.workers.read().expect("workers lock poisoned");
        Ok(workers.values().cloned().collect())
    }

    async fn remove_worker_registration(&self, worker_id: &str) -> Result<()> {
        let mut workers = self.workers.write().expect("workers lock poisoned");
        workers.remove(worker_id);
        Ok(())
    }

    async fn find_stale_worker_registrations(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<WorkerRegistrationRow>> {
        let workers = self.workers.read().expect("workers lock poisoned");
        Ok(workers
            .values()
            .filter(|w| w.last_heartbeat_at < threshold && w.current_job_ids.is_empty())
            .cloned()
            .collect())
    }

    async fn acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut locks = self.locks.write().expect("locks lock poisoned");
        match locks.get(name) {
            Some(existing) if existing.deadline >= now && existing.holder_id != holder_id => {
                Ok(false)
            }
            _ => {
                locks.insert(
                    name.to_string(),
                    LockRow {
                        name: name.to_string(),
                        holder_id: holder_id.to_string(),
                        acquired_at: now,
                        deadline,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn renew_lock(
        &self,
        name: &str,
        holder_id: &str,
        new_deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let mut locks = self.locks.write().expect("locks lock poisoned");
        match locks.get_mut(name) {
            Some(existing) if existing.holder_id == holder_id => {
                existing.deadline = new_deadline;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lock(&self, name: &str, holder_id: &str) -> Result<()> {
        let mut locks = self.locks.write().expect("locks lock poisoned");
        if locks.get(name).map(|l| l.holder_id.as_str()) == Some(holder_id) {
            locks.remove(name);
        }
        Ok(())
    }

    async fn get_lock(&self, name: &str) -> Result<Option<LockRow>> {
        let locks = self.locks.read().expect("locks lock poisoned");
        Ok(locks.get(name).cloned())
    }

    async fn health(&self) -> Result<StorageHealth> {
        Ok(StorageHealth {
            reachable: true,
            message: None,
        })
    }

    fn subscribe_new_jobs(&self, queue_name: &str) -> broadcast::Receiver<()> {
        let mut notify = self.notify.write().expect("notify lock poisoned");
        notify
            .entry(queue_name.to_string())
            .or_insert_with(|| broadcast::channel(NOTIFY_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bk_core::Id;

    fn sample_job(queue: &str) -> JobRow {
        let now = Utc::now();
        JobRow {
            id: Id::new().to_string(),
            task_name: "send_email".to_string(),
            task_version: None,
            queue_name: queue.to_string(),
            priority: Priority::Normal.as_str().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            args_positional: serde_json::json!([]),
            args_kwargs: serde_json::json!({}),
            created_at: now,
            available_at: now,
            started_at: None,
            completed_at: None,
            attempt: 0,
            max_attempts: 3,
            retry_delay_base_seconds: 1,
            retry_backoff_factor: 2.0,
            retry_jitter: true,
            retry_delay_ceiling_seconds: 3600,
            timeout_seconds: Some(30),
            unique_key: None,
            worker_id: None,
            reservation_deadline: None,
            result: None,
            error_kind: None,
            error_message: None,
            error_detail: None,
            metadata: serde_json::json!({}),
            tags: vec![],
            dead_letter: false,
            scheduled_by_id: None,
            cancel_requested: false,
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let storage = MemoryStorage::new();
        let row = sample_job("default");
        storage.insert_job(row.clone()).await.unwrap();
        let fetched = storage.get_job(&row.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, row.id);
    }

    #[tokio::test]
    async fn unique_key_conflict_is_rejected() {
        let storage = MemoryStorage::new();
        let mut a = sample_job("default");
        a.unique_key = Some("dup".to_string());
        let mut b = sample_job("default");
        b.unique_key = Some("dup".to_string());

        storage.insert_job(a).await.unwrap();
        let result = storage.insert_job(b).await;
        assert!(matches!(result, Err(Error::Uniqueness(_))));
    }

    #[tokio::test]
    async fn reserve_respects_priority_then_fifo() {
        let storage = MemoryStorage::new();
        let mut low = sample_job("default");
        low.priority = Priority::Low.as_str().to_string();
        let mut critical = sample_job("default");
        critical.priority = Priority::Critical.as_str().to_string();

        storage.insert_job(low).await.unwrap();
        storage.insert_job(critical.clone()).await.unwrap();

        let reserved = storage
            .reserve_jobs(
                "default",
                "worker-1",
                &[0, 10, 20, 30],
                Utc::now(),
                60,
                1,
            )
            .await
            .unwrap();

        assert_eq!(reserved.len(), 1);
        assert_eq!(reserved[0].id, critical.id);
        assert_eq!(reserved[0].status, JobStatus::Reserved.as_str());
    }

    #[tokio::test]
    async fn reserve_skips_paused_queue() {
        let storage = MemoryStorage::new();
        storage
            .upsert_queue(QueueRow {
                name: "paused".to_string(),
                paused: true,
                dead_letter_target: None,
            })
            .await
            .unwrap();
        storage.insert_job(sample_job("paused")).await.unwrap();

        let reserved = storage
            .reserve_jobs("paused", "worker-1", &[0, 10, 20, 30], Utc::now(), 60, 10)
            .await
            .unwrap();
        assert!(reserved.is_empty());
    }

    #[tokio::test]
    async fn conditional_update_rejects_mismatched_owner() {
        let storage = MemoryStorage::new();
        let row = sample_job("default");
        storage.insert_job(row.clone()).await.unwrap();

        let result = storage
            .conditional_update_job(
                &row.id,
                JobStatus::Pending,
                Some("someone-else"),
                JobMutation::to_status(JobStatus::Reserved),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn lock_acquire_blocks_second_holder_until_deadline() {
        let storage = MemoryStorage::new();
        let deadline = Utc::now() + chrono::Duration::seconds(60);
        assert!(storage
            .acquire_lock("scheduler", "host-a", deadline)
            .await
            .unwrap());
        assert!(!storage
            .acquire_lock("scheduler", "host-b", deadline)
            .await
            .unwrap());

        let expired_deadline = Utc::now() - chrono::Duration::seconds(1);
        storage
            .renew_lock("scheduler", "host-a", expired_deadline)
            .await
            .unwrap();
        assert!(storage
            .acquire_lock("scheduler", "host-b", deadline)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn sweep_finds_expired_reservations() {
        let storage = MemoryStorage::new();
        let mut row = sample_job("default");
        row.status = JobStatus::Running.as_str().to_string();
        row.worker_id = Some("worker-1".to_string());
        row.reservation_deadline = Some(Utc::now() - chrono::Duration::seconds(5));
        storage.insert_job(row.clone()).await.unwrap();

        let expired = storage.sweep_expired_reservations(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, row.id);
    }
}
