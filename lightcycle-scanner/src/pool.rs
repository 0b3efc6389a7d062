// Bounded pool of browser sessions

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::error::{CrawlError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// A leased session. Holding it holds one pool slot.
pub struct SessionHandle {
    session: Box<dyn BrowserSession>,
    _permit: OwnedSemaphorePermit,
}

impl SessionHandle {
    pub fn session(&mut self) -> &mut dyn BrowserSession {
        self.session.as_mut()
    }
}

pub struct SessionPool {
    launcher: Arc<dyn BrowserLauncher>,
    idle: Mutex<Vec<Box<dyn BrowserSession>>>,
    permits: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
}

impl SessionPool {
    /// Opens up to `size` sessions. Fails only when none could be opened;
    /// otherwise the pool shrinks to what the browser gave us.
    pub async fn launch(
        launcher: Arc<dyn BrowserLauncher>,
        size: usize,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let mut sessions = Vec::with_capacity(size);
        let mut last_error = None;
        for n in 0..size {
            match launcher.open_session().await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!("Could not open browser session {}: {}", n, e);
                    last_error = Some(e);
                }
            }
        }

        if sessions.is_empty() {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "pool size is zero".to_string());
            return Err(CrawlError::BrowserLaunch(reason));
        }
        if sessions.len() < size {
            warn!(
                "Running with {} of {} requested browser sessions",
                sessions.len(),
                size
            );
        }

        let size = sessions.len();
        info!("Session pool ready with {} sessions", size);
        Ok(Self {
            launcher,
            idle: Mutex::new(sessions),
            permits: Arc::new(Semaphore::new(size)),
            size,
            acquire_timeout,
        })
    }

    /// Effective number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Leases a session, waiting at most the acquire timeout for a free slot.
    pub async fn acquire(&self) -> Result<SessionHandle> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| CrawlError::PoolExhausted(self.acquire_timeout))?
            .map_err(|_| CrawlError::Other("session pool closed".to_string()))?;

        let idle = self.idle.lock().await.pop();
        let session = match idle {
            Some(session) => session,
            None => {
                // A slot without a session: its previous one was destroyed.
                debug!("Opening replacement browser session");
                self.launcher.open_session().await?
            }
        };

        Ok(SessionHandle {
            session,
            _permit: permit,
        })
    }

    /// Returns a session to the pool, or destroys it if it is no longer usable.
    pub async fn release(&self, handle: SessionHandle) {
        if !handle.session.is_healthy() {
            self.discard(handle).await;
            return;
        }
        let SessionHandle { session, _permit } = handle;
        self.idle.lock().await.push(session);
    }

    /// Destroys a session; its slot gets a fresh one on the next acquire.
    pub async fn discard(&self, handle: SessionHandle) {
        let SessionHandle {
            mut session,
            _permit,
        } = handle;
        warn!("Destroying browser session");
        session.close().await;
    }

    pub async fn shutdown(&self) {
        self.permits.close();
        let sessions: Vec<_> = self.idle.lock().await.drain(..).collect();
        for mut session in sessions {
            session.close().await;
        }
        self.launcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{Action, NetworkEvent, PageSnapshot};
    use crate::request::Request;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use url::Url;

    struct CountingSession {
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrowserSession for CountingSession {
        async fn navigate(&mut self, _request: &Request) -> Result<()> {
            Ok(())
        }
        async fn wait_quiescent(&mut self, _idle: Duration) -> Result<()> {
            Ok(())
        }
        async fn list_network_events(&mut self) -> Result<Vec<NetworkEvent>> {
            Ok(Vec::new())
        }
        async fn enumerate_interactive_elements(&mut self) -> Result<PageSnapshot> {
            Ok(PageSnapshot::empty(Url::parse("http://example.test/").unwrap()))
        }
        async fn dispatch_action(&mut self, _action: &Action) -> Result<()> {
            Ok(())
        }
        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    struct CountingLauncher {
        opened: AtomicUsize,
        capacity: usize,
        healthy: Arc<AtomicBool>,
    }

    impl CountingLauncher {
        fn new(capacity: usize) -> Arc<Self> {
            Arc::new(Self {
                opened: AtomicUsize::new(0),
                capacity,
                healthy: Arc::new(AtomicBool::new(true)),
            })
        }
    }

    #[async_trait]
    impl BrowserLauncher for CountingLauncher {
        async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
            if self.opened.fetch_add(1, Ordering::SeqCst) >= self.capacity {
                return Err(CrawlError::BrowserLaunch("no more tabs".into()));
            }
            Ok(Box::new(CountingSession {
                healthy: self.healthy.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_launch_fails_without_sessions() {
        let launcher = CountingLauncher::new(0);
        let err = SessionPool::launch(launcher, 2, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CrawlError::BrowserLaunch(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_partial_launch_reduces_size() {
        let launcher = CountingLauncher::new(2);
        let pool = SessionPool::launch(launcher, 4, Duration::from_secs(1)).await.unwrap();
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_exhausted() {
        let launcher = CountingLauncher::new(1);
        let pool = SessionPool::launch(launcher, 1, Duration::from_secs(5)).await.unwrap();
        let held = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, CrawlError::PoolExhausted(_)));

        pool.release(held).await;
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_crashed_session_is_replaced() {
        let launcher = CountingLauncher::new(10);
        let pool = SessionPool::launch(launcher.clone(), 1, Duration::from_secs(1))
            .await
            .unwrap();

        let handle = pool.acquire().await.unwrap();
        launcher.healthy.store(false, Ordering::SeqCst);
        pool.release(handle).await;
        launcher.healthy.store(true, Ordering::SeqCst);

        assert_eq!(pool.available(), 1);
        let _fresh = pool.acquire().await.unwrap();
        assert_eq!(launcher.opened.load(Ordering::SeqCst), 2);
    }
}
