// Global FIFO work queue. Tasks still queued when the run stops are counted as cancelled

use crate::fingerprint::Deduplicator;
use crate::request::CrawlTask;
use crate::result::StopReason;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Default)]
struct QueueState {
    queue: VecDeque<CrawlTask>,
    in_flight: usize,
    dispatched: usize,
    cancelled: usize,
}

pub struct Scheduler {
    state: Mutex<QueueState>,
    dedup: Deduplicator,
    max_depth: usize,
    max_requests: usize,
    deadline: Instant,
    wake: Notify,
    stop_tx: watch::Sender<Option<StopReason>>,
}

impl Scheduler {
    pub fn new(dedup: Deduplicator, max_depth: usize, max_requests: usize, deadline: Instant) -> Self {
        let (stop_tx, _) = watch::channel(None);
        Self {
            state: Mutex::new(QueueState::default()),
            dedup,
            max_depth,
            max_requests,
            deadline,
            wake: Notify::new(),
            stop_tx,
        }
    }

    /// Queues `task` unless it is too deep or its fingerprint was already
    /// queued. Returns whether it was queued.
    pub async fn enqueue(&self, task: CrawlTask) -> bool {
        if task.depth > self.max_depth {
            return false;
        }
        let fingerprint = self.dedup.normalize(&task.request);
        if !self.dedup.mark_seen(fingerprint).await {
            return false;
        }

        let mut state = self.state.lock().await;
        if self.stop_reason().is_some() {
            state.cancelled += 1;
            return false;
        }
        debug!("Queued {} at depth {}", task.request, task.depth);
        state.queue.push_back(task);
        drop(state);
        self.wake.notify_waiters();
        true
    }

    /// Puts a dispatched task back at the head of the queue without a dedup
    /// check. The caller still calls [`complete`](Self::complete).
    pub async fn requeue(&self, task: CrawlTask) {
        let mut state = self.state.lock().await;
        state.dispatched = state.dispatched.saturating_sub(1);
        state.queue.push_front(task);
    }

    /// Waits for the next task. `None` means the run is over for this worker.
    pub async fn next(&self) -> Option<CrawlTask> {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if self.stop_reason().is_some() {
                    return None;
                }
                if Instant::now() >= self.deadline {
                    drop(state);
                    self.stop(StopReason::TimeBudget);
                    return None;
                }
                if !state.queue.is_empty() {
                    if state.dispatched >= self.max_requests {
                        drop(state);
                        self.stop(StopReason::RequestBudget);
                        return None;
                    }
                    let task = state.queue.pop_front()?;
                    state.in_flight += 1;
                    state.dispatched += 1;
                    return Some(task);
                }
                if state.in_flight == 0 {
                    drop(state);
                    self.stop(StopReason::Completed);
                    return None;
                }
            }

            tokio::select! {
                _ = &mut woken => {}
                _ = stop_rx.changed() => {}
                _ = tokio::time::sleep_until(self.deadline) => {}
            }
        }
    }

    /// Marks one dispatched task as finished.
    pub async fn complete(&self) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.wake.notify_waiters();
    }

    /// Raises the global stop signal. The first reason wins.
    pub fn stop(&self, reason: StopReason) {
        let changed = self.stop_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if changed {
            info!("Stopping crawl: {}", reason);
        }
        self.wake.notify_waiters();
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_tx.borrow()
    }

    pub fn stop_signal(&self) -> watch::Receiver<Option<StopReason>> {
        self.stop_tx.subscribe()
    }

    /// Discards every queued task, counting them as cancelled. Returns the
    /// total number of cancelled tasks so far.
    pub async fn drain(&self) -> usize {
        let mut state = self.state.lock().await;
        let remaining = state.queue.len();
        state.queue.clear();
        state.cancelled += remaining;
        if remaining > 0 {
            debug!("Cancelled {} queued tasks", remaining);
        }
        state.cancelled
    }

    /// Counts a task abandoned mid-flight.
    pub async fn cancel_in_flight(&self) {
        self.state.lock().await.cancelled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Request, Source};
    use std::sync::Arc;
    use std::time::Duration;

    fn task(url: &str, depth: usize) -> CrawlTask {
        let mut task = CrawlTask::seed(Request::parse("GET", url, Source::Link).unwrap());
        task.depth = depth;
        task
    }

    fn scheduler(max_depth: usize, max_requests: usize) -> Scheduler {
        Scheduler::new(
            Deduplicator::default(),
            max_depth,
            max_requests,
            Instant::now() + Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_fifo_and_dedup() {
        let s = scheduler(5, 100);
        assert!(s.enqueue(task("http://example.test/a", 0)).await);
        assert!(s.enqueue(task("http://example.test/b", 1)).await);
        assert!(!s.enqueue(task("http://example.test/a#x", 1)).await);
        assert!(!s.enqueue(task("http://example.test/deep", 6)).await);

        assert_eq!(s.next().await.unwrap().request.url().path(), "/a");
        assert_eq!(s.next().await.unwrap().request.url().path(), "/b");
        s.complete().await;
        s.complete().await;
        assert!(s.next().await.is_none());
        assert_eq!(s.stop_reason(), Some(StopReason::Completed));
    }

    #[tokio::test]
    async fn test_waits_while_work_in_flight() {
        let s = Arc::new(scheduler(5, 100));
        s.enqueue(task("http://example.test/", 0)).await;
        let first = s.next().await.unwrap();

        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.next().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        s.enqueue(CrawlTask::child(&first, Request::parse("GET", "http://example.test/next", Source::Link).unwrap()))
            .await;
        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.depth, 1);
    }

    #[tokio::test]
    async fn test_request_budget_stops_and_drains() {
        let s = scheduler(5, 1);
        for p in ["a", "b", "c"] {
            s.enqueue(task(&format!("http://example.test/{}", p), 0)).await;
        }
        assert!(s.next().await.is_some());
        s.complete().await;
        assert!(s.next().await.is_none());
        assert_eq!(s.stop_reason(), Some(StopReason::RequestBudget));
        assert_eq!(s.drain().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget() {
        let s = Arc::new(Scheduler::new(
            Deduplicator::default(),
            5,
            100,
            Instant::now() + Duration::from_secs(10),
        ));
        s.enqueue(task("http://example.test/", 0)).await;
        let _busy = s.next().await.unwrap();

        // Another worker idles until the deadline passes.
        assert!(s.next().await.is_none());
        assert_eq!(s.stop_reason(), Some(StopReason::TimeBudget));
    }

    #[tokio::test]
    async fn test_first_stop_reason_wins() {
        let s = scheduler(5, 100);
        let mut rx = s.stop_signal();
        s.stop(StopReason::Cancelled);
        s.stop(StopReason::Completed);
        assert_eq!(s.stop_reason(), Some(StopReason::Cancelled));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(StopReason::Cancelled));
        assert!(!s.enqueue(task("http://example.test/late", 0)).await);
    }
}
