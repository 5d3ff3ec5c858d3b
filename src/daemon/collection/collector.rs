use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{utils::clock::Clock, window_api::ObservationSource};

use super::activity::{ActivityEvent, ActivityKind};

/// One accumulator's view of a sampling loop.
#[async_trait]
pub trait Sampler: Send {
    fn name(&self) -> &'static str;

    /// Observes once and folds the observation into the accumulator.
    async fn tick(&mut self, clock: &dyn Clock) -> Vec<ActivityKind>;

    /// Final flush after cancellation.
    fn finish(&mut self, clock: &dyn Clock) -> Vec<ActivityKind>;
}

/// Runs a blocking observation call off the async threads. A failure, a panic or a call that
/// outlives `timeout` all count as "nothing observed".
pub async fn observe<T, F>(
    source: &Arc<dyn ObservationSource>,
    timeout: Duration,
    what: &'static str,
    call: F,
) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ObservationSource) -> Result<T> + Send + 'static,
{
    let source = Arc::clone(source);
    let task = tokio::task::spawn_blocking(move || call(source.as_ref()));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => Some(value),
        Ok(Ok(Err(e))) => {
            debug!("Observing {what} failed {e:?}");
            None
        }
        Ok(Err(e)) => {
            error!("Observing {what} panicked {e:?}");
            None
        }
        Err(_) => {
            warn!("Observing {what} took longer than {timeout:?}");
            None
        }
    }
}

pub struct DataCollectionModule<S> {
    next: mpsc::Sender<ActivityEvent>,
    sampler: S,
    shutdown: CancellationToken,
    collection_frequency: Duration,
    time_provider: Arc<dyn Clock>,
}

impl<S: Sampler> DataCollectionModule<S> {
    pub fn new(
        next: mpsc::Sender<ActivityEvent>,
        sampler: S,
        shutdown: CancellationToken,
        collection_frequency: Duration,
        time_provider: Arc<dyn Clock>,
    ) -> Self {
        Self {
            next,
            sampler,
            shutdown,
            collection_frequency,
            time_provider,
        }
    }

    async fn forward(&self, events: Vec<ActivityKind>) {
        for kind in events {
            let event = ActivityEvent::new(self.time_provider.time(), kind);
            let span = info_span!("Forwarding activity event");
            debug!("Sending message {:?}", event);
            if let Err(e) = self.next.send(event).instrument(span).await {
                error!("Unexpected error during sending {e:?}");
            }
        }
    }

    /// Executes the collector event loop. Ticks never overlap: the next one is scheduled only
    /// after the current one has finished.
    pub async fn run(mut self) -> Result<()> {
        info!("{} collector started", self.sampler.name());
        let mut collection_point = self.time_provider.instant();
        loop {
            collection_point =
                (collection_point + self.collection_frequency).max(self.time_provider.instant());

            let events = self.sampler.tick(self.time_provider.as_ref()).await;
            self.forward(events).await;

            tokio::select! {
                // Cancelation means the current tick is the last one. The final flush happens
                // below, before the sender is dropped.
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = self.time_provider.sleep_until(collection_point) => ()
            }
        }

        let events = self.sampler.finish(self.time_provider.as_ref());
        self.forward(events).await;
        info!("{} collector stopped", self.sampler.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, time::Duration};

    use anyhow::anyhow;

    use crate::window_api::{MockObservationSource, ObservationSource};

    use super::observe;

    #[tokio::test]
    async fn failed_observation_is_none() {
        let mut source = MockObservationSource::new();
        source
            .expect_audio_active_processes()
            .returning(|| Err(anyhow!("no audio service")));
        let source: Arc<dyn ObservationSource> = Arc::new(source);

        let result = observe(&source, Duration::from_secs(1), "audio", |s| {
            s.audio_active_processes()
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn slow_observation_times_out() {
        let mut source = MockObservationSource::new();
        source.expect_audio_active_processes().returning(|| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(HashSet::from([1]))
        });
        let source: Arc<dyn ObservationSource> = Arc::new(source);

        let result = observe(&source, Duration::from_millis(20), "audio", |s| {
            s.audio_active_processes()
        })
        .await;
        assert_eq!(result, None);
    }
}
