use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::models::{QueueEntry, QueueKey, QueueStatus};
use crate::services::store::{QueueStore, WriteOutcome};

/// Days a queue's keys are kept after its service day ends.
const RETENTION_DAYS: u64 = 7;

/// KEYS: entry hash, active-consultation marker.
/// ARGV: expected status, new status, serialized entry, entry id, expiry (unix seconds).
const COMPARE_AND_SET: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return 'NOT_FOUND'
end
if current ~= ARGV[1] then
  return 'STALE:' .. current
end
if ARGV[2] == 'IN_CONSULTATION' and ARGV[1] ~= 'IN_CONSULTATION' then
  local holder = redis.call('GET', KEYS[2])
  if holder and holder ~= ARGV[4] then
    return 'CONFLICT'
  end
  redis.call('SET', KEYS[2], ARGV[4])
  redis.call('EXPIREAT', KEYS[2], ARGV[5])
elseif ARGV[1] == 'IN_CONSULTATION' and ARGV[2] ~= 'IN_CONSULTATION' then
  if redis.call('GET', KEYS[2]) == ARGV[4] then
    redis.call('DEL', KEYS[2])
  end
end
redis.call('HSET', KEYS[1], 'status', ARGV[2], 'data', ARGV[3])
return 'OK'
"#;

/// Queue store shared by every API instance pointed at the same Redis.
pub struct RedisQueueStore {
    pool: Pool,
    compare_and_set: Script,
}

impl RedisQueueStore {
    pub async fn new(redis_url: &str) -> Result<Self, QueueError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Storage(format!("Failed to create Redis pool: {}", e)))?;

        let store = Self {
            pool,
            compare_and_set: Script::new(COMPARE_AND_SET),
        };

        let mut conn = store.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis queue store initialized");

        Ok(store)
    }

    async fn get_connection(&self) -> Result<Connection, QueueError> {
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to get Redis connection: {}", e)))
    }
}

fn entry_key(entry_id: Uuid) -> String {
    format!("queue_entry:{}", entry_id)
}

fn day_key(key: QueueKey) -> String {
    format!("queue_day:{}", key)
}

fn sequence_key(key: QueueKey) -> String {
    format!("queue_seq:{}", key)
}

fn active_key(key: QueueKey) -> String {
    format!("queue_active:{}", key)
}

/// Unix time at which every key of `service_day`'s queue expires.
///
/// All keys of one queue share this deadline, so an entry can never outlive
/// its sequence counter or disappear from a day that is still being served.
fn expires_at(service_day: NaiveDate) -> Option<i64> {
    service_day
        .checked_add_days(Days::new(RETENTION_DAYS + 1))
        .map(|day| day.and_time(NaiveTime::MIN).and_utc().timestamp())
}

/// Expiry for a new entry; days whose keys would already be gone are refused.
fn retention_deadline(service_day: NaiveDate, now: DateTime<Utc>) -> Result<i64, QueueError> {
    match expires_at(service_day) {
        Some(deadline) if deadline > now.timestamp() => Ok(deadline),
        _ => Err(QueueError::ValidationError(format!(
            "service day {} is outside the {}-day retention window",
            service_day, RETENTION_DAYS
        ))),
    }
}

fn parse_outcome(reply: &str, updated: QueueEntry) -> Result<WriteOutcome, QueueError> {
    match reply {
        "OK" => Ok(WriteOutcome::Applied(updated)),
        "NOT_FOUND" => Ok(WriteOutcome::NotFound),
        "CONFLICT" => Ok(WriteOutcome::ActiveConflict),
        other => other
            .strip_prefix("STALE:")
            .and_then(QueueStatus::parse)
            .map(WriteOutcome::Stale)
            .ok_or_else(|| QueueError::Storage(format!("unexpected script reply '{}'", other))),
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn insert(&self, mut entry: QueueEntry) -> Result<QueueEntry, QueueError> {
        let key = entry.queue_key();
        let deadline = retention_deadline(key.service_day, Utc::now())?;
        let mut conn = self.get_connection().await?;

        let sequence: u32 = conn.incr(sequence_key(key), 1).await?;
        entry.sequence_number = sequence;

        let data = serde_json::to_string(&entry)?;
        let created_at = entry.created_at.to_rfc3339();
        let entry_key = entry_key(entry.id);
        let day_key = day_key(key);

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                &entry_key,
                &[
                    ("data", data.as_str()),
                    ("status", entry.status.as_str()),
                    ("created_at", created_at.as_str()),
                ],
            )
            .ignore()
            .zadd(&day_key, entry.id.to_string(), sequence)
            .ignore()
            .cmd("EXPIREAT")
            .arg(&entry_key)
            .arg(deadline)
            .ignore()
            .cmd("EXPIREAT")
            .arg(&day_key)
            .arg(deadline)
            .ignore()
            .cmd("EXPIREAT")
            .arg(sequence_key(key))
            .arg(deadline)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!("Queue entry {} stored as #{} in {}", entry.id, sequence, key);
        Ok(entry)
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let mut conn = self.get_connection().await?;

        let data: Option<String> = conn.hget(entry_key(entry_id), "data").await?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn list_for_day(&self, key: QueueKey) -> Result<Vec<QueueEntry>, QueueError> {
        let mut conn = self.get_connection().await?;

        let ids: Vec<String> = conn.zrange(day_key(key), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.cmd("HGET").arg(format!("queue_entry:{}", id)).arg("data");
        }
        let rows: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, row) in ids.iter().zip(rows) {
            match row {
                Some(data) => entries.push(serde_json::from_str::<QueueEntry>(&data)?),
                None => warn!("Queue {} references missing entry {}", key, id),
            }
        }

        entries.sort_by_key(|entry| entry.sequence_number);
        Ok(entries)
    }

    async fn compare_and_set(
        &self,
        expected: QueueStatus,
        updated: QueueEntry,
    ) -> Result<WriteOutcome, QueueError> {
        let deadline = expires_at(updated.service_day).ok_or_else(|| {
            QueueError::Storage(format!("no expiry for service day {}", updated.service_day))
        })?;
        let mut conn = self.get_connection().await?;
        let data = serde_json::to_string(&updated)?;

        let reply: String = self
            .compare_and_set
            .key(entry_key(updated.id))
            .key(active_key(updated.queue_key()))
            .arg(expected.as_str())
            .arg(updated.status.as_str())
            .arg(data)
            .arg(updated.id.to_string())
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;

        parse_outcome(&reply, updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use crate::models::PatientSnapshot;

    fn entry(key: QueueKey, status: QueueStatus) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            id: Uuid::new_v4(),
            appointment_id: None,
            doctor_id: key.doctor_id,
            service_day: key.service_day,
            patient: PatientSnapshot {
                name: "Walk-in".to_string(),
                age: None,
                gender: None,
                contact: None,
            },
            sequence_number: 0,
            status,
            prescription: None,
            title: None,
            notes: None,
            booked_by: "desk".to_string(),
            completed_by: None,
            updated_by: "desk".to_string(),
            created_at: now,
            updated_at: now,
            called_at: None,
            consultation_started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    fn key() -> QueueKey {
        QueueKey::new(Uuid::new_v4(), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
    }

    fn today_key() -> QueueKey {
        QueueKey::new(Uuid::new_v4(), Utc::now().date_naive())
    }

    #[test]
    fn keys_are_scoped_by_doctor_and_day() {
        let queue = key();
        assert_eq!(
            day_key(queue),
            format!("queue_day:{}:2024-03-04", queue.doctor_id)
        );
        assert!(active_key(queue).starts_with("queue_active:"));
        assert!(sequence_key(queue).ends_with(":2024-03-04"));
    }

    #[test]
    fn keys_expire_relative_to_the_service_day() {
        let service_day = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 22, 0, 0, 0).unwrap().timestamp();

        assert_eq!(expires_at(service_day), Some(expected));

        // Booked ten days ahead: nothing expires before the day is served.
        let booked_on = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let deadline = retention_deadline(service_day, booked_on).unwrap();
        assert_eq!(deadline, expected);
        assert!(deadline > Utc.with_ymd_and_hms(2024, 3, 14, 23, 59, 59).unwrap().timestamp());
    }

    #[test]
    fn days_past_retention_are_refused() {
        let service_day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let within = Utc.with_ymd_and_hms(2024, 3, 11, 23, 0, 0).unwrap();
        assert!(retention_deadline(service_day, within).is_ok());

        let after = Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap();
        assert_matches!(
            retention_deadline(service_day, after),
            Err(QueueError::ValidationError(_))
        );
    }

    #[test]
    fn script_replies_are_decoded() {
        let updated = entry(key(), QueueStatus::Called);

        assert_matches!(parse_outcome("OK", updated.clone()), Ok(WriteOutcome::Applied(_)));
        assert_matches!(parse_outcome("NOT_FOUND", updated.clone()), Ok(WriteOutcome::NotFound));
        assert_matches!(parse_outcome("CONFLICT", updated.clone()), Ok(WriteOutcome::ActiveConflict));
        assert_matches!(
            parse_outcome("STALE:SKIPPED", updated.clone()),
            Ok(WriteOutcome::Stale(QueueStatus::Skipped))
        );
        assert_matches!(parse_outcome("STALE:bogus", updated), Err(QueueError::Storage(_)));
    }

    async fn live_store() -> Option<RedisQueueStore> {
        let url = std::env::var("REDIS_TEST_URL").ok()?;
        RedisQueueStore::new(&url).await.ok()
    }

    #[tokio::test]
    #[ignore = "requires REDIS_TEST_URL"]
    async fn redis_guard_allows_one_active_consultation() {
        let Some(store) = live_store().await else {
            return;
        };
        let queue = today_key();

        let first = store.insert(entry(queue, QueueStatus::Called)).await.unwrap();
        let second = store.insert(entry(queue, QueueStatus::Called)).await.unwrap();
        assert_eq!(second.sequence_number, first.sequence_number + 1);

        let mut active = first.clone();
        active.status = QueueStatus::InConsultation;
        assert_matches!(
            store.compare_and_set(QueueStatus::Called, active.clone()).await.unwrap(),
            WriteOutcome::Applied(_)
        );

        let mut blocked = second.clone();
        blocked.status = QueueStatus::InConsultation;
        assert_eq!(
            store.compare_and_set(QueueStatus::Called, blocked.clone()).await.unwrap(),
            WriteOutcome::ActiveConflict
        );

        let mut done = active;
        done.status = QueueStatus::Completed;
        assert_matches!(
            store.compare_and_set(QueueStatus::InConsultation, done).await.unwrap(),
            WriteOutcome::Applied(_)
        );
        assert_matches!(
            store.compare_and_set(QueueStatus::Called, blocked).await.unwrap(),
            WriteOutcome::Applied(_)
        );

        let listed = store.list_for_day(queue).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].status, QueueStatus::Completed);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_TEST_URL"]
    async fn redis_reports_stale_status() {
        let Some(store) = live_store().await else {
            return;
        };

        let stored = store.insert(entry(today_key(), QueueStatus::Booked)).await.unwrap();
        let mut updated = stored.clone();
        updated.status = QueueStatus::Skipped;

        assert_eq!(
            store.compare_and_set(QueueStatus::Called, updated).await.unwrap(),
            WriteOutcome::Stale(QueueStatus::Booked)
        );
        assert_eq!(store.get(stored.id).await.unwrap().unwrap(), stored);
    }
}
