//! In-memory upstream fakes for importer tests
//!
//! These implement the collaborator traits without any network, so token
//! and resubscription timing can be asserted exactly. For tests that need
//! the real wire protocol, use `metasys_client::testing::MockUpstream`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metasys_core::{
    AuthApi, Credentials, IngestError, IngestResult, PresentValue, SubscriptionApi, Token,
    TrendSample,
};
use parking_lot::Mutex;

/// Counting [`AuthApi`] issuing tokens with a fixed lifetime
#[derive(Debug)]
pub struct FakeAuth {
    ttl: Mutex<Duration>,
    issued: AtomicUsize,
    logon_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    fail_logon: AtomicBool,
    fail_refresh: AtomicBool,
}

impl FakeAuth {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: Mutex::new(ttl),
            issued: AtomicUsize::new(0),
            logon_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            fail_logon: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
        }
    }

    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.lock() = ttl;
    }

    pub fn fail_logon(&self, fail: bool) {
        self.fail_logon.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    pub fn logon_calls(&self) -> usize {
        self.logon_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Logon plus refresh calls
    pub fn total_calls(&self) -> usize {
        self.logon_calls() + self.refresh_calls()
    }

    fn issue(&self) -> Token {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let ttl = *self.ttl.lock();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        Token::new(format!("fake-{}", n), Utc::now() + ttl)
    }
}

#[async_trait]
impl AuthApi for FakeAuth {
    async fn logon(&self, _credentials: &Credentials) -> IngestResult<Token> {
        self.logon_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logon.load(Ordering::SeqCst) {
            return Err(IngestError::LogonFailed("credentials rejected".into()));
        }
        Ok(self.issue())
    }

    async fn refresh(&self, _token: &Token) -> IngestResult<Token> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(IngestError::TokenRefreshFailed("refresh endpoint down".into()));
        }
        Ok(self.issue())
    }
}

/// A recorded subscribe call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeCall {
    pub object_id: String,
    pub subscription_id: String,
    pub access_token: String,
}

/// [`SubscriptionApi`] answering from in-memory tables
#[derive(Debug, Default)]
pub struct FakeSubscriptions {
    values: Mutex<HashMap<String, PresentValue>>,
    trends: Mutex<HashMap<String, Vec<TrendSample>>>,
    calls: Mutex<Vec<SubscribeCall>>,
}

impl FakeSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an object subscribable with the given present value
    pub fn set_value(&self, object_id: &str, value: PresentValue) {
        self.values.lock().insert(object_id.to_string(), value);
    }

    pub fn set_trend(&self, object_id: &str, samples: Vec<TrendSample>) {
        self.trends.lock().insert(object_id.to_string(), samples);
    }

    pub fn calls(&self) -> Vec<SubscribeCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SubscriptionApi for FakeSubscriptions {
    async fn subscribe(
        &self,
        token: &Token,
        object_id: &str,
        subscription_id: &str,
    ) -> IngestResult<PresentValue> {
        self.calls.lock().push(SubscribeCall {
            object_id: object_id.to_string(),
            subscription_id: subscription_id.to_string(),
            access_token: token.access_token.clone(),
        });
        self.values
            .lock()
            .get(object_id)
            .cloned()
            .ok_or_else(|| IngestError::Upstream(format!("Object {} not found", object_id)))
    }

    async fn trend_samples(
        &self,
        _token: &Token,
        object_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> IngestResult<Vec<TrendSample>> {
        let trends = self.trends.lock();
        let samples = trends
            .get(object_id)
            .ok_or_else(|| IngestError::Upstream(format!("Object {} not found", object_id)))?;
        Ok(samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect())
    }
}
