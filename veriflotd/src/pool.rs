//! Generic bounded worker pool: N workers drain a channel and run one
//! callback per item. Producers drop the sender to signal completion;
//! `cancel` stops consumption without draining.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;

pub struct Pool {
    tasks: JoinSet<()>,
    cancel: watch::Sender<bool>,
}

impl Pool {
    /// Launches exactly `workers` concurrent workers over `receiver`.
    /// Each worker selects between the next item, pool cancellation and
    /// process shutdown; after cancellation the channel may keep
    /// unconsumed items.
    pub fn start<T, F, Fut>(
        shutdown: watch::Receiver<bool>,
        workers: usize,
        receiver: mpsc::Receiver<T>,
        callback: F,
    ) -> Self
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (cancel, _) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));
        let mut tasks = JoinSet::new();

        for _ in 0..workers {
            let mut shutdown = shutdown.clone();
            let mut cancelled = cancel.subscribe();
            let receiver = Arc::clone(&receiver);
            let callback = callback.clone();
            tasks.spawn(async move {
                loop {
                    let item = tokio::select! {
                        item = async { receiver.lock().await.recv().await } => item,
                        _ = cancelled.changed() => return,
                        _ = shutdown.changed() => return,
                    };
                    match item {
                        Some(item) => callback(item).await,
                        // channel closed, normal completion
                        None => return,
                    }
                }
            });
        }

        Self { tasks, cancel }
    }

    /// Signals all workers to stop consuming. In-flight callbacks still
    /// run to completion before `wait` returns.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Blocks until every worker has exited. Call only once producers have
    /// stopped enqueueing (sender dropped) or after `cancel`.
    pub async fn wait(mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_item_is_processed() {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(16);
        let counter = Arc::new(AtomicUsize::new(0));

        let cb_counter = counter.clone();
        let pool = Pool::start(shutdown_rx, 4, rx, move |n: usize| {
            let counter = cb_counter.clone();
            async move {
                counter.fetch_add(n, Ordering::SeqCst);
            }
        });

        for _ in 0..100 {
            tx.send(1).await.unwrap();
        }
        drop(tx);
        pool.wait().await;

        assert_eq!(counter.load(Ordering::SeqCst), 100);
        drop(shutdown);
    }

    #[tokio::test]
    async fn test_wait_covers_slow_callbacks() {
        let (_shutdown, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(8);
        let done = Arc::new(AtomicUsize::new(0));

        let cb_done = done.clone();
        let pool = Pool::start(shutdown_rx, 2, rx, move |_: ()| {
            let done = cb_done.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..6 {
            tx.send(()).await.unwrap();
        }
        drop(tx);
        pool.wait().await;

        // wait() must not return before every dispatched callback returned
        assert_eq!(done.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_cancel_releases_workers_without_closing_channel() {
        let (_shutdown, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel::<()>(1);

        let pool = Pool::start(shutdown_rx, 3, rx, |_: ()| async {});
        pool.cancel();

        // sender stays open; cancellation alone must release wait()
        tokio::time::timeout(Duration::from_secs(5), pool.wait())
            .await
            .expect("cancelled pool did not wind down");
        drop(tx);
    }
}
