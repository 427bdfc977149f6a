//! One lazily opened HTTP session per client, plus the gate that bounds
//! in-flight requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ccp_core::{ClientConfig, ConfigError};
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tracing::debug;

use crate::tls::TlsBundle;

fn user_agent() -> String {
    format!("ccp/{}", env!("CARGO_PKG_VERSION"))
}

/// A cheap handle on the open session.
#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
    gate: Arc<Semaphore>,
}

impl Session {
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn gate(&self) -> &Arc<Semaphore> {
        &self.gate
    }

    /// Wait for an in-flight slot. The slot is freed when the permit drops.
    pub async fn permit(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        self.gate.acquire().await
    }
}

#[derive(Debug, Default)]
struct PoolState {
    client: Option<reqwest::Client>,
    gate: Option<Arc<Semaphore>>,
    tls: Option<Arc<TlsBundle>>,
}

/// Owns the session state of one credential provider client.
///
/// The mutex is never held across an `.await`.
#[derive(Debug)]
pub struct SessionPool {
    config: Arc<ClientConfig>,
    state: Mutex<PoolState>,
    opened: AtomicU64,
}

impl SessionPool {
    pub fn new(config: impl Into<Arc<ClientConfig>>) -> Self {
        Self {
            config: config.into(),
            state: Mutex::new(PoolState::default()),
            opened: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Return the open session, opening it first if needed.
    pub fn acquire(&self) -> Result<Session, ConfigError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let gate = match state.gate.clone() {
            Some(gate) => gate,
            None => {
                self.config.check_limits()?;
                let gate = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));
                state.gate = Some(gate.clone());
                gate
            }
        };

        let client = match state.client.clone() {
            Some(client) => client,
            None => {
                let tls = match state.tls.clone() {
                    Some(tls) => tls,
                    None => {
                        let tls = Arc::new(TlsBundle::build(&self.config)?);
                        state.tls = Some(tls.clone());
                        tls
                    }
                };
                let client = tls
                    .apply(reqwest::Client::builder())
                    .user_agent(user_agent())
                    .cookie_store(self.config.keep_cookies)
                    .build()
                    .map_err(|e| ConfigError::Tls(format!("cannot build HTTP client: {e}")))?;
                let n = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "opened session #{n} to {}",
                    self.config.host.as_deref().unwrap_or_default()
                );
                state.client = Some(client.clone());
                client
            }
        };

        Ok(Session { client, gate })
    }

    /// Close the session. Returns whether one was open.
    ///
    /// In-flight requests keep their own client handle and finish normally.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let was_open = state.client.is_some() || state.gate.is_some();
        *state = PoolState::default();
        if was_open {
            debug!("closed session");
        }
        was_open
    }

    /// Adopt a gate owned by another client so both share one budget.
    /// Returns `false` when a gate is already set.
    pub fn share_gate(&self, gate: Arc<Semaphore>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.gate.is_some() {
            return false;
        }
        state.gate = Some(gate);
        true
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.client.is_some()
    }

    /// Number of HTTP clients built over the pool's lifetime.
    pub fn sessions_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}
