use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dispatch::{DispatcherHandle, Scanner};
use crate::errors::{Error, Result};
use crate::sub::Subscription;

/// Missing-path scanner: periodically re-checks watch requests whose paths
/// did not exist when they were added.
///
/// Each tick asks the dispatcher to re-check every registered subscription.
/// A path that appeared is promoted to a live watch and gets its one
/// synthetic created event raised by the dispatcher; this scanner then
/// forgets it.
pub struct IntervalScanner {
    list: Arc<Mutex<Vec<Arc<Subscription>>>>,
    period: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalScanner {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(4);

    pub fn new(period: Duration) -> Self {
        Self {
            list: Arc::new(Mutex::new(Vec::new())),
            period,
            ticker: Mutex::new(None),
        }
    }
}

impl Default for IntervalScanner {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD)
    }
}

impl Scanner for IntervalScanner {
    fn startup(&self, dispatcher: DispatcherHandle) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|_| Error::Init("no tokio runtime for the missing-path scanner".into()))?;

        let list = self.list.clone();
        let period = self.period;

        let ticker = handle.spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tick.tick().await;

                let snapshot: Vec<Arc<Subscription>> = lock(&list).clone();

                for sub in snapshot {
                    // The dispatcher owns existence checking, promotion and
                    // the synthetic event; it reports whether this scanner
                    // is done with the subscription.
                    if dispatcher.recheck_missing(&sub) {
                        lock(&list).retain(|candidate| !Arc::ptr_eq(candidate, &sub));
                    }
                }
            }
        });

        *lock_ticker(&self.ticker) = Some(ticker);

        Ok(())
    }

    fn register(&self, sub: &Arc<Subscription>) {
        lock(&self.list).push(sub.clone());
    }

    fn deregister(&self, sub: &Arc<Subscription>) {
        lock(&self.list).retain(|candidate| !Arc::ptr_eq(candidate, sub));
    }
}

impl Drop for IntervalScanner {
    fn drop(&mut self) {
        if let Some(ticker) = lock_ticker(&self.ticker).take() {
            ticker.abort();
        }
    }
}

fn lock(list: &Mutex<Vec<Arc<Subscription>>>) -> MutexGuard<'_, Vec<Arc<Subscription>>> {
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_ticker(ticker: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    ticker.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, EventCallback, WatchManager, WatchOutcome};
    use crate::events::{ChangeEvent, ChangeKind};
    use crate::sub::{EventSink, Subscription};

    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Default)]
    struct SwitchableWatches {
        installable: Arc<AtomicBool>,
    }

    impl WatchManager for SwitchableWatches {
        fn startup(&mut self, _on_event: EventCallback) -> Result<()> {
            Ok(())
        }

        fn start_watching(&mut self, _sub: &Arc<Subscription>) -> WatchOutcome {
            if self.installable.load(Ordering::SeqCst) {
                WatchOutcome::Installed
            } else {
                WatchOutcome::NotFound
            }
        }

        fn stop_watching(&mut self, _sub: &Arc<Subscription>) {}
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<ChangeEvent>>>);

    impl EventSink for RecordingSink {
        fn emit(&self, event: ChangeEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl RecordingSink {
        fn events(&self) -> Vec<ChangeEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn ticks_over_an_uninstallable_path_emit_nothing_until_promotion() {
        let watches = SwitchableWatches::default();
        let scanner = Arc::new(IntervalScanner::new(Duration::from_millis(20)));
        let dispatcher = Dispatcher::new(Box::new(watches.clone()), scanner).unwrap();

        // The path exists the whole time; only the install refuses.
        let tmp = tempdir::TempDir::new("fdbridge-scanner").unwrap();
        let sink = RecordingSink::default();
        let sub = Subscription::directory(tmp.path(), Box::new(sink.clone()));
        dispatcher.add(sub.clone());
        assert!(dispatcher.is_missing(&sub));

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(sink.events().is_empty(), "no watch, no synthetic events");
        assert!(dispatcher.is_missing(&sub));

        watches.installable.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let events = sink.events();
        assert_eq!(events.len(), 1, "one creation per appearance");
        assert_eq!(events[0].kind, ChangeKind::Created);
        assert!(dispatcher.is_watching(&sub));
    }
}
