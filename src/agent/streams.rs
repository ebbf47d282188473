//! Stream-id and interrupt bookkeeping over the shared key-value store.
//!
//! The orchestrator is stateless between steps, so "is this thread currently
//! streaming, and under which id" and "has cancellation been requested since
//! time T" both live here and nowhere else. No in-process caching.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::store::KeyValueStore;

const KEY_VERSION: &str = "v1";

fn stream_key(thread_id: &str) -> String {
    format!("stream:{KEY_VERSION}:{thread_id}")
}

fn interrupt_key(thread_id: &str) -> String {
    format!("interrupt:{KEY_VERSION}:{thread_id}")
}

/// Tracks the active output stream id per thread.
#[derive(Clone)]
pub struct StreamRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl StreamRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Marks `stream_id` as the thread's active stream.
    pub async fn set_stream_id(&self, thread_id: &str, stream_id: &str) -> Result<()> {
        self.store
            .set(
                &stream_key(thread_id),
                Value::String(stream_id.to_string()),
                None,
            )
            .await
    }

    /// The currently active stream id, if any.
    pub async fn get_stream_id(&self, thread_id: &str) -> Result<Option<String>> {
        let value = self.store.get(&stream_key(thread_id)).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    /// Clears the active stream id only if it still equals `expected`, so a
    /// step loop finishing late cannot clobber a newer stream's marker.
    /// Returns whether anything was cleared.
    pub async fn clear_stream_id_if(&self, thread_id: &str, expected: &str) -> Result<bool> {
        self.store
            .delete_if_eq(&stream_key(thread_id), None, expected)
            .await
    }
}

/// Tracks cancellation requests per thread as wall-clock markers.
#[derive(Clone)]
pub struct InterruptRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl InterruptRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Records a cancellation request at `at`.
    pub async fn set_interrupt(&self, thread_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.store
            .set(
                &interrupt_key(thread_id),
                Value::from(at.timestamp_millis()),
                None,
            )
            .await
    }

    /// Records a cancellation request now and returns its marker.
    pub async fn request_interrupt(&self, thread_id: &str) -> Result<DateTime<Utc>> {
        let at = Utc::now();
        self.set_interrupt(thread_id, at).await?;
        Ok(at)
    }

    /// The latest cancellation marker, if any.
    pub async fn interrupt_marker(&self, thread_id: &str) -> Result<Option<DateTime<Utc>>> {
        let value = self.store.get(&interrupt_key(thread_id)).await?;
        Ok(value
            .and_then(|v| v.as_i64())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()))
    }

    /// Whether cancellation was requested strictly after `since`.
    pub async fn interrupted_since(&self, thread_id: &str, since: DateTime<Utc>) -> Result<bool> {
        Ok(match self.interrupt_marker(thread_id).await? {
            Some(marker) => marker > since,
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn registries() -> (StreamRegistry, InterruptRegistry) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        (
            StreamRegistry::new(Arc::clone(&store)),
            InterruptRegistry::new(store),
        )
    }

    #[tokio::test]
    async fn stream_id_set_get_clear() {
        let (streams, _) = registries();

        assert_eq!(streams.get_stream_id("t1").await.unwrap(), None);
        streams.set_stream_id("t1", "t1:100").await.unwrap();
        assert_eq!(
            streams.get_stream_id("t1").await.unwrap(),
            Some("t1:100".to_string())
        );

        assert!(streams.clear_stream_id_if("t1", "t1:100").await.unwrap());
        assert_eq!(streams.get_stream_id("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_clear_is_a_noop() {
        let (streams, _) = registries();

        streams.set_stream_id("t1", "t1:100").await.unwrap();
        streams.set_stream_id("t1", "t1:200").await.unwrap();

        // The older loop finishing late must not clear the newer marker.
        assert!(!streams.clear_stream_id_if("t1", "t1:100").await.unwrap());
        assert_eq!(
            streams.get_stream_id("t1").await.unwrap(),
            Some("t1:200".to_string())
        );
    }

    #[tokio::test]
    async fn interrupts_compare_against_the_event_time() {
        let (_, interrupts) = registries();
        let event_time = Utc::now();

        assert!(!interrupts.interrupted_since("t1", event_time).await.unwrap());

        interrupts
            .set_interrupt("t1", event_time + ChronoDuration::milliseconds(5))
            .await
            .unwrap();

        assert!(interrupts.interrupted_since("t1", event_time).await.unwrap());
        // A newer event outruns the old marker.
        assert!(!interrupts
            .interrupted_since("t1", event_time + ChronoDuration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn marker_round_trips_at_millisecond_precision() {
        let (_, interrupts) = registries();

        let at = interrupts.request_interrupt("t1").await.unwrap();
        let marker = interrupts.interrupt_marker("t1").await.unwrap().unwrap();

        assert_eq!(marker.timestamp_millis(), at.timestamp_millis());
    }

    #[tokio::test]
    async fn threads_do_not_share_markers() {
        let (streams, interrupts) = registries();

        streams.set_stream_id("t1", "t1:1").await.unwrap();
        interrupts.request_interrupt("t2").await.unwrap();

        assert_eq!(streams.get_stream_id("t2").await.unwrap(), None);
        let epoch = Utc.timestamp_millis_opt(0).single().unwrap();
        assert!(!interrupts.interrupted_since("t1", epoch).await.unwrap());
    }
}
