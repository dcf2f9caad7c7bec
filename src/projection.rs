use crate::store::LiveQuery;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub type LiveCollection<T> = watch::Receiver<Vec<T>>;

type Source<T> = Arc<dyn Fn(&str) -> LiveQuery<T> + Send + Sync>;

struct Output<T> {
    generation: Mutex<u64>,
    rows: watch::Sender<Vec<T>>,
}

impl<T> Output<T> {
    /// Publishes `rows` only if `generation` is still the newest subscription.
    fn deliver(&self, generation: u64, rows: Vec<T>) -> bool {
        let current = lock(&self.generation);
        if *current != generation {
            return false;
        }
        self.rows.send_replace(rows);
        true
    }

    fn advance(&self) -> u64 {
        let mut current = lock(&self.generation);
        *current += 1;
        *current
    }
}

/// A collection re-derived from the store whenever its parameter is set.
pub struct Projection<T> {
    runtime: Handle,
    source: Source<T>,
    parameter: watch::Sender<Option<String>>,
    output: Arc<Output<T>>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> Projection<T> {
    pub fn new<F>(runtime: Handle, source: F) -> Self
    where
        F: Fn(&str) -> LiveQuery<T> + Send + Sync + 'static,
    {
        Self {
            runtime,
            source: Arc::new(source),
            parameter: watch::Sender::new(None),
            output: Arc::new(Output {
                generation: Mutex::new(0),
                rows: watch::Sender::new(Vec::new()),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Replaces the live subscription. Identical values still resubscribe.
    pub fn set_parameter(&self, parameter: impl Into<String>) {
        let parameter = parameter.into();
        let mut subscription = lock(&self.subscription);
        let generation = self.output.advance();
        if let Some(previous) = subscription.take() {
            previous.abort();
        }
        tracing::debug!(parameter = %parameter, generation, "projection resubscribing");

        self.parameter.send_replace(Some(parameter.clone()));
        let query = (self.source)(&parameter);
        let output = self.output.clone();
        *subscription = Some(self.runtime.spawn(forward(query, move |rows| {
            let delivered = output.deliver(generation, rows);
            if !delivered {
                tracing::debug!(generation, "dropping stale projection result");
            }
            delivered
        })));
    }

    pub fn parameter(&self) -> Option<String> {
        self.parameter.borrow().clone()
    }

    pub fn observe_parameter(&self) -> watch::Receiver<Option<String>> {
        self.parameter.subscribe()
    }

    pub fn observe(&self) -> LiveCollection<T> {
        self.output.rows.subscribe()
    }
}

impl<T> Drop for Projection<T> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.subscription).take() {
            task.abort();
        }
    }
}

/// Subscribes once and publishes every snapshot of `query`.
pub fn spawn_live<T: Send + Sync + 'static>(
    runtime: &Handle,
    query: LiveQuery<T>,
) -> (LiveCollection<T>, JoinHandle<()>) {
    let (rows, receiver) = watch::channel(Vec::new());
    let task = runtime.spawn(forward(query, move |snapshot| {
        rows.send_replace(snapshot);
        !rows.is_closed()
    }));
    (receiver, task)
}

async fn forward<T, D>(mut query: LiveQuery<T>, mut deliver: D)
where
    T: Send + 'static,
    D: FnMut(Vec<T>) -> bool,
{
    while let Some(result) = query.next().await {
        match result {
            Ok(rows) => {
                if !deliver(rows) {
                    break;
                }
            }
            Err(error) => tracing::warn!(error = %error, "live query failed"),
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{spawn_live, Projection};
    use crate::store::{ChangeTracker, LiveQuery};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Handle;
    use tokio::sync::watch;

    async fn settle<T: Clone>(
        rows: &mut watch::Receiver<Vec<T>>,
        expected: impl Fn(&[T]) -> bool,
    ) -> Vec<T> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let current = rows.borrow_and_update().clone();
                if expected(&current) {
                    return current;
                }
                rows.changed().await.expect("projection alive");
            }
        })
        .await
        .expect("projection settled")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_query_for_an_older_parameter_never_overwrites_newer_rows() {
        let projection = Projection::new(Handle::current(), |parameter: &str| {
            let parameter = parameter.to_string();
            LiveQuery::once(move || {
                if parameter == "slow" {
                    std::thread::sleep(Duration::from_millis(150));
                }
                Ok(vec![parameter.clone()])
            })
        });
        let mut rows = projection.observe();

        projection.set_parameter("slow");
        projection.set_parameter("fast");
        let settled = settle(&mut rows, |rows| rows == ["fast"]).await;
        assert_eq!(settled, vec!["fast".to_string()]);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*rows.borrow(), vec!["fast".to_string()]);
        assert_eq!(projection.parameter().as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn repeated_identical_parameter_resubscribes() {
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let projection = Projection::new(Handle::current(), {
            let subscriptions = subscriptions.clone();
            move |parameter: &str| {
                subscriptions.fetch_add(1, Ordering::SeqCst);
                let parameter = parameter.to_string();
                LiveQuery::once(move || Ok(vec![parameter.clone()]))
            }
        });

        projection.set_parameter("name");
        projection.set_parameter("name");
        assert_eq!(subscriptions.load(Ordering::SeqCst), 2);

        let mut rows = projection.observe();
        settle(&mut rows, |rows| rows == ["name"]).await;
    }

    #[tokio::test]
    async fn parameter_observers_see_every_set_including_repeats() {
        let projection = Projection::new(Handle::current(), |parameter: &str| {
            let parameter = parameter.to_string();
            LiveQuery::once(move || Ok(vec![parameter.clone()]))
        });
        let mut parameters = projection.observe_parameter();
        assert_eq!(*parameters.borrow_and_update(), None);
        assert!(!parameters.has_changed().expect("projection alive"));

        projection.set_parameter("name");
        assert!(parameters.has_changed().expect("projection alive"));
        assert_eq!(parameters.borrow_and_update().as_deref(), Some("name"));

        projection.set_parameter("name");
        assert!(parameters.has_changed().expect("projection alive"));
        assert_eq!(parameters.borrow_and_update().as_deref(), Some("name"));

        projection.set_parameter("modification-time");
        assert!(parameters.has_changed().expect("projection alive"));
        assert_eq!(projection.parameter().as_deref(), Some("modification-time"));
    }

    #[tokio::test]
    async fn store_changes_flow_into_the_current_subscription() {
        let tracker = Arc::new(ChangeTracker::default());
        let projection = Projection::new(Handle::current(), {
            let tracker = tracker.clone();
            move |parameter: &str| {
                let tracker_for_query = tracker.clone();
                let parameter = parameter.to_string();
                LiveQuery::new(tracker.subscribe(), move || {
                    Ok(vec![format!("{parameter}@{}", tracker_for_query.revision())])
                })
            }
        });
        let mut rows = projection.observe();

        projection.set_parameter("name");
        settle(&mut rows, |rows| rows == ["name@0"]).await;
        tracker.bump();
        settle(&mut rows, |rows| rows == ["name@1"]).await;
    }

    #[tokio::test]
    async fn spawn_live_publishes_snapshots() {
        let (mut rows, task) =
            spawn_live(&Handle::current(), LiveQuery::once(|| Ok(vec![1, 2, 3])));
        let settled = settle(&mut rows, |rows| !rows.is_empty()).await;
        assert_eq!(settled, vec![1, 2, 3]);
        task.await.expect("forwarder finishes when the query ends");
    }
}
