//! Token lifecycle manager
//!
//! Holds the current bearer token, refreshes it before it expires, and keeps
//! retrying with backoff when a refresh fails. Readers never see an expired
//! token: [`TokenManager::current`] returns `None` instead.
//!
//! Every stored token bumps a generation counter. Scheduled refreshes
//! remember the generation they were armed for and reuse a token that
//! someone else already replaced, so the refresh timer and the importer's
//! resubscription never refresh the same token twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use metasys_core::audit::LOGON_SENSOR_ID;
use metasys_core::{
    AuditTrail, AuthApi, Credentials, HealthState, IngestError, IngestResult, MetricsSink, Token,
};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ImporterConfig;
use crate::metrics::LOGON_FAILURE;
use crate::timer::TimerSlot;

pub struct TokenManager {
    auth: Arc<dyn AuthApi>,
    audit: Arc<AuditTrail>,
    metrics: Arc<dyn MetricsSink>,
    health: Arc<HealthState>,
    safety_margin: Duration,
    token: RwLock<Option<Token>>,
    /// Number of tokens stored so far
    generation: AtomicU64,
    /// Generation the pending scheduled refresh should replace
    refresh_basis: AtomicU64,
    /// Tokens handed out through the public accessors
    reads: AtomicU64,
    credentials: RwLock<Option<Credentials>>,
    retry: Mutex<Backoff>,
    /// Serializes refresh calls
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_timer: TimerSlot,
}

impl TokenManager {
    /// Create a manager with no token
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        auth: Arc<dyn AuthApi>,
        audit: Arc<AuditTrail>,
        metrics: Arc<dyn MetricsSink>,
        health: Arc<HealthState>,
        config: &ImporterConfig,
    ) -> Arc<Self> {
        let (retry_initial, retry_max) = config.retry_backoff();
        let safety_margin = config.token_safety_margin();

        Arc::new_cyclic(|me: &Weak<Self>| {
            let me = me.clone();
            let refresh_timer = TimerSlot::spawn("token-refresh", move || {
                let me = me.clone();
                Box::pin(async move {
                    if let Some(manager) = me.upgrade() {
                        let basis = manager.refresh_basis.load(Ordering::Acquire);
                        // Failures are audited and rescheduled inside
                        let _ = manager.refresh_if_stale(basis).await;
                    }
                })
            });

            Self {
                auth,
                audit,
                metrics,
                health,
                safety_margin,
                token: RwLock::new(None),
                generation: AtomicU64::new(0),
                refresh_basis: AtomicU64::new(0),
                reads: AtomicU64::new(0),
                credentials: RwLock::new(None),
                retry: Mutex::new(Backoff::new(retry_initial, retry_max)),
                refresh_lock: tokio::sync::Mutex::new(()),
                refresh_timer,
            }
        })
    }

    /// Log on and make the new token current
    ///
    /// The credentials are kept for re-logon once a token has expired.
    pub async fn acquire(&self, credentials: &Credentials) -> IngestResult<Token> {
        match self.auth.logon(credentials).await {
            Ok(token) => {
                *self.credentials.write() = Some(credentials.clone());
                self.store(token.clone());
                self.retry.lock().reset();
                info!(expires_at = %token.expires_at, "Logged on");
                Ok(token)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// The current token, unless it has expired
    pub fn current(&self) -> Option<Token> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.live()
    }

    /// Generation of the current token; changes whenever a token is stored
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// How many tokens were handed out through `current`, `valid_token`,
    /// `refresh_now` and `refresh_unless_replaced`
    pub fn token_reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Arrange a refresh `safety_margin` before `token` expires
    ///
    /// Supersedes any pending refresh.
    pub fn schedule_refresh(&self, token: &Token) {
        let delay = token.remaining().saturating_sub(self.safety_margin);
        self.arm_refresh(delay);
        debug!(delay_ms = delay.as_millis() as u64, "Token refresh scheduled");
    }

    /// Refresh immediately
    ///
    /// Uses the refresh endpoint while the current token is valid and logs on
    /// again once it has expired. On failure the previous token stays in use
    /// and another attempt is scheduled with backoff.
    pub async fn refresh_now(&self) -> IngestResult<Token> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Refresh the token of generation `seen`
    ///
    /// If a newer, still valid token was stored in the meantime it is
    /// returned without another upstream call.
    pub async fn refresh_unless_replaced(&self, seen: u64) -> IngestResult<Token> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.refresh_if_stale(seen).await
    }

    async fn refresh_if_stale(&self, seen: u64) -> IngestResult<Token> {
        let _guard = self.refresh_lock.lock().await;
        if self.generation() != seen {
            if let Some(token) = self.live() {
                debug!(expires_at = %token.expires_at, "Token already replaced, reusing it");
                return Ok(token);
            }
        }
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> IngestResult<Token> {
        let result = match self.live() {
            Some(token) => self.auth.refresh(&token).await,
            None => {
                let credentials = self.credentials.read().clone();
                match credentials {
                    Some(credentials) => self.auth.logon(&credentials).await,
                    None => Err(IngestError::LogonFailed(
                        "no credentials to log on with".into(),
                    )),
                }
            }
        };

        match result {
            Ok(token) => {
                self.store(token.clone());
                if token.remaining() > self.safety_margin {
                    self.retry.lock().reset();
                    self.schedule_refresh(&token);
                } else {
                    // Half the remaining life, never sooner than the retry backoff
                    let delay = (token.remaining() / 2).max(self.retry.lock().next_delay());
                    warn!(
                        expires_at = %token.expires_at,
                        retry_in_ms = delay.as_millis() as u64,
                        "Issued token expires within the safety margin"
                    );
                    self.arm_refresh(delay);
                }
                info!(expires_at = %token.expires_at, "Token refreshed");
                Ok(token)
            }
            Err(e) => {
                self.record_failure(&e);
                let delay = self.retry.lock().next_delay();
                self.arm_refresh(delay);
                warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Token refresh failed");
                Err(e)
            }
        }
    }

    /// A token good for at least the safety margin, refreshing first if needed
    ///
    /// Concurrent callers share one refresh.
    pub async fn valid_token(&self) -> IngestResult<Token> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.live() {
            Some(token) if token.remaining() > self.safety_margin => Ok(token),
            _ => {
                let seen = self.generation();
                self.refresh_if_stale(seen).await
            }
        }
    }

    /// When the next refresh is due
    pub fn pending_refresh_at(&self) -> Option<Instant> {
        self.refresh_timer.deadline()
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Stop refreshing
    pub fn shutdown(&self) {
        self.refresh_timer.cancel();
    }

    fn live(&self) -> Option<Token> {
        self.token
            .read()
            .as_ref()
            .filter(|token| !token.is_expired())
            .cloned()
    }

    fn store(&self, token: Token) {
        *self.token.write() = Some(token);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Arm the refresh timer to replace the current generation
    fn arm_refresh(&self, delay: Duration) {
        self.refresh_basis.store(self.generation(), Ordering::Release);
        self.refresh_timer.schedule_in(delay);
    }

    fn record_failure(&self, error: &IngestError) {
        self.audit.record_failed(LOGON_SENSOR_ID, error.to_string());
        self.metrics.increment(LOGON_FAILURE, &[("kind", error.kind())]);
        self.health.logon_failed();
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token", &*self.token.read())
            .field("generation", &self.generation())
            .field("refresh_timer", &self.refresh_timer)
            .finish()
    }
}
