use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_skiplist::SkipMap;

use crate::{
    store::{Store, StoreError},
    telemetry::{Reading, StoredReading},
};

/// Process-local store. Nothing survives a restart.
///
/// The log is a lock-free ordered map keyed by `(timestamp, id)`: appends
/// never wait for readers or for each other, and a reader walking the log
/// sees every record inserted before it started.
#[derive(Debug, Default)]
pub struct MemoryStore {
    log: SkipMap<(DateTime<Utc>, i64), StoredReading>,
    last_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    fn insert_all(&self, readings: Vec<Reading>) -> Vec<StoredReading> {
        // A batch reserves a contiguous id range, so its ids follow input order.
        let first_id = self.last_id.fetch_add(readings.len() as i64, Ordering::Relaxed) + 1;
        let now = Utc::now();

        readings
            .into_iter()
            .zip(first_id..)
            .map(|(reading, id)| {
                let stored = reading.into_stored(id, now);
                self.log.insert((stored.timestamp, stored.id), stored.clone());
                stored
            })
            .collect()
    }

    /// Newest first.
    fn newest(&self) -> impl Iterator<Item = StoredReading> + '_ {
        self.log.iter().rev().map(|entry| entry.value().clone())
    }
}

impl Store for MemoryStore {
    async fn append(&self, reading: Reading) -> Result<StoredReading, StoreError> {
        self.insert_all(vec![reading])
            .pop()
            .ok_or_else(|| StoreError::Unavailable("reading was not stored".into()))
    }

    async fn append_batch(&self, readings: Vec<Reading>) -> Result<Vec<StoredReading>, StoreError> {
        Ok(self.insert_all(readings))
    }

    async fn recent(&self, limit: usize, cap: usize) -> Result<Vec<StoredReading>, StoreError> {
        Ok(self.newest().take(limit.min(cap)).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{TimeDelta, TimeZone as _};

    use super::*;
    use crate::telemetry::SensorValues;

    fn reading_at(timestamp: Option<DateTime<Utc>>, temperature: f64) -> Reading {
        Reading {
            timestamp,
            values: SensorValues {
                temperature: Some(temperature),
                ..Default::default()
            },
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn append_then_recent_round_trips() {
        let store = MemoryStore::new();
        let reading = reading_at(Some(base()), 19.5);

        let stored = store.append(reading.clone()).await.unwrap();
        let recent = store.recent(1, 10).await.unwrap();

        assert_eq!(recent, vec![stored.clone()]);
        assert_eq!(stored.timestamp, base());
        assert_eq!(stored.values, reading.values);
    }

    #[tokio::test]
    async fn recent_is_reverse_append_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let ts = base() + TimeDelta::seconds(i);
            store.append(reading_at(Some(ts), i as f64)).await.unwrap();
        }

        let temperatures: Vec<_> = store
            .recent(5, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.values.temperature.unwrap())
            .collect();
        assert_eq!(temperatures, [4.0, 3.0, 2.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn recent_orders_by_timestamp_not_arrival() {
        let store = MemoryStore::new();
        store.append(reading_at(Some(base() + TimeDelta::minutes(5)), 1.0)).await.unwrap();
        store.append(reading_at(Some(base()), 2.0)).await.unwrap();

        let recent = store.recent(2, 2).await.unwrap();
        assert_eq!(recent[0].values.temperature, Some(1.0));
        assert_eq!(recent[1].values.temperature, Some(2.0));
    }

    #[tokio::test]
    async fn equal_timestamps_return_latest_insert_first() {
        let store = MemoryStore::new();
        let first = store.append(reading_at(Some(base()), 1.0)).await.unwrap();
        let second = store.append(reading_at(Some(base()), 2.0)).await.unwrap();

        let ids: Vec<_> = store.recent(2, 2).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, [second.id, first.id]);
    }

    #[tokio::test]
    async fn cap_bounds_the_result() {
        let store = MemoryStore::new();
        for i in 0..20 {
            store.append(reading_at(None, i as f64)).await.unwrap();
        }

        assert_eq!(store.recent(1000, 7).await.unwrap().len(), 7);
        assert_eq!(store.recent(3, 7).await.unwrap().len(), 3);
        assert!(store.recent(0, 7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_keeps_input_order() {
        let store = MemoryStore::new();
        let stored = store
            .append_batch(vec![reading_at(None, 1.0), reading_at(None, 2.0)])
            .await
            .unwrap();

        assert_eq!(stored[0].values.temperature, Some(1.0));
        assert!(stored[0].id < stored[1].id);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_lose_nothing() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.append(reading_at(None, i as f64)).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let recent = store.recent(1000, 1000).await.unwrap();
        assert_eq!(recent.len(), 100);

        let mut ids: Vec<_> = recent.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn append_completes_while_a_read_is_in_progress() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            let ts = base() + TimeDelta::seconds(i);
            store.append(reading_at(Some(ts), i as f64)).await.unwrap();
        }

        let mut reader = store.newest();
        assert_eq!(reader.next().unwrap().values.temperature, Some(2.0));

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append(reading_at(None, 9.0)).await })
        };
        let appended = tokio::time::timeout(Duration::from_millis(300), writer)
            .await
            .expect("append should not wait for the reader")
            .unwrap()
            .unwrap();

        // The interrupted read carries on where it was.
        let rest: Vec<_> = reader.map(|r| r.values.temperature.unwrap()).collect();
        assert_eq!(rest, [1.0, 0.0]);

        assert_eq!(store.len(), 4);
        assert_eq!(store.recent(1, 10).await.unwrap(), vec![appended]);
    }
}
