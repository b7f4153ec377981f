//! Single-flight execution of concurrent identical requests.
use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::watch;

use crate::{Error, Result};

type InFlight<K, V> = Arc<Mutex<HashMap<K, watch::Receiver<Option<V>>>>>;

/// `RequestCoalescer` collapses concurrent requests for the same key into one execution.
///
/// The first caller for a key spawns the producer on the tokio runtime and registers it in the
/// in-flight table; callers arriving while it runs wait for the same result instead of invoking
/// their own producer. The key is removed as soon as the producer completes, so the next request
/// after completion runs a fresh producer.
///
/// The shared task always runs to completion: cancelling (dropping) a waiting caller never cancels
/// the producer, even if it was the last one waiting. The result is then simply discarded. This
/// keeps the table consistent because removal is done by the task itself, exactly once.
///
/// Must be used from within a tokio runtime.
pub struct RequestCoalescer<K, V> {
    in_flight: InFlight<K, V>,
}

impl<K, V> Default for RequestCoalescer<K, V> {
    fn default() -> Self {
        RequestCoalescer {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        RequestCoalescer::default()
    }

    /// Return the result of the in-flight work for `key`, starting it with `producer` if there is
    /// none.
    ///
    /// `producer` is only called when no work is in flight for `key`. All callers that share a
    /// run observe the same value. If the producer panics, every waiter receives
    /// [`Error::CoalescedTaskAborted`]. A panic raised by `producer` before it returns its future
    /// unwinds into this caller instead; the key is released in both cases.
    pub async fn get<F, Fut>(&self, key: K, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        // Only the table update happens under the lock. `producer` runs after it is released.
        let (mut receiver, sender) = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(&key) {
                Some(receiver) => {
                    log::trace!(target: "paywall", "joining in-flight request");
                    (receiver.clone(), None)
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(key.clone(), receiver.clone());
                    (receiver, Some(sender))
                }
            }
        };

        if let Some(sender) = sender {
            // Removes the key even if `producer` or the work it returns panics.
            let guard = RemoveOnDrop {
                table: Arc::clone(&self.in_flight),
                key,
            };
            let work = producer();
            tokio::spawn(async move {
                let value = work.await;
                // Unregister before publishing: callers that already hold the receiver
                // still get the value, later callers start a new run.
                drop(guard);
                // Nobody waiting is fine: the result is discarded.
                let _ = sender.send(Some(value));
            });
        }

        let value = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::CoalescedTaskAborted)?;
        value.clone().ok_or(Error::CoalescedTaskAborted)
    }

    /// Number of keys with work currently in flight.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

fn lock<K, V>(
    in_flight: &InFlight<K, V>,
) -> MutexGuard<'_, HashMap<K, watch::Receiver<Option<V>>>> {
    // Every critical section is a single map operation, so the table is consistent even if a
    // holder panicked.
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RemoveOnDrop<K: Hash + Eq, V> {
    table: InFlight<K, V>,
    key: K,
}

impl<K: Hash + Eq, V> Drop for RemoveOnDrop<K, V> {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.key);
    }
}
