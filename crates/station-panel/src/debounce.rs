//! Trailing debounce keyed per control.
//!
//! Every `schedule` restarts the quiet window of its own key only; when the
//! window passes without another call the last event is delivered on the
//! session channel.  Dropping the debouncer cancels everything pending.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

pub struct Debouncer<K, E> {
    window: Duration,
    pending: HashMap<K, JoinHandle<()>>,
    events: mpsc::Sender<E>,
}

impl<K, E> Debouncer<K, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    E: Send + 'static,
{
    pub fn new(window: Duration, events: mpsc::Sender<E>) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            events,
        }
    }

    /// (Re)start `key`'s window; `event` replaces whatever was waiting.
    pub fn schedule(&mut self, key: K, event: E) {
        self.pending.retain(|_, task| !task.is_finished());
        if let Some(previous) = self.pending.remove(&key) {
            trace!("debounce restart for {:?}", key);
            previous.abort();
        }
        let window = self.window;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = events.send(event).await;
        });
        self.pending.insert(key, task);
    }

    pub fn cancel_all(&mut self) {
        for (_, task) in self.pending.drain() {
            task.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending
            .get(key)
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Keys whose window is still running.
    pub fn pending_count(&self) -> usize {
        self.pending
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }
}

impl<K, E> Drop for Debouncer<K, E> {
    fn drop(&mut self) {
        for (_, task) in self.pending.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use station_proto::protocol::EqBand;

    const WINDOW: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn test_burst_sends_only_last_value() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut debouncer = Debouncer::new(WINDOW, tx);

        for gain in [1, 2, 3, 4] {
            debouncer.schedule(EqBand::Low, (EqBand::Low, gain));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rx.try_recv().ok(), Some((EqBand::Low, 4)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bands_do_not_coalesce() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut debouncer = Debouncer::new(WINDOW, tx);

        debouncer.schedule(EqBand::Low, (EqBand::Low, 2));
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.schedule(EqBand::High, (EqBand::High, -3));
        tokio::time::sleep(Duration::from_millis(300)).await;

        // low's window ran out, high's has not
        assert_eq!(rx.try_recv().ok(), Some((EqBand::Low, 2)));
        assert!(rx.try_recv().is_err());
        assert_eq!(debouncer.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(rx.try_recv().ok(), Some((EqBand::High, -3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drops_pending() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut debouncer = Debouncer::new(WINDOW, tx);

        debouncer.schedule(EqBand::Mid, (EqBand::Mid, 5));
        debouncer.schedule(EqBand::High, (EqBand::High, 5));
        debouncer.cancel_all();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(debouncer.pending_count(), 0);
    }
}
