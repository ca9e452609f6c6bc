//! Stream importer
//!
//! Ties the pieces together: keeps a token, holds the push stream open
//! (reconnecting with backoff and resuming from the last processed frame),
//! subscribes every mapped sensor when the server confirms the stream
//! subscription, re-subscribes before the token expires, and turns value
//! updates into observations for the downstream sink.
//!
//! Everything that can fail in steady state is recovered here and reported
//! through the audit trail, metrics and logs. Only [`StreamImporter::start`]
//! returns an error, when the initial logon fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metasys_client::{mapper, ConnectionState, MetasysClient, SessionEnd, StreamingClient};
use metasys_core::audit::STREAM_SENSOR_ID;
use metasys_core::{
    AuditTrail, AuthApi, Credentials, Frame, HealthState, MappedSensor, MetricsSink, Observation,
    ObservationOrigin, ObservationSink, PresentValue, SensorRepository, StreamEvent,
    SubscriptionApi, Token,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backoff::Backoff;
use crate::config::ImporterConfig;
use crate::error::{ImporterError, ImporterResult};
use crate::metrics::{
    OBSERVATION_PUBLISHED, SENSOR_UNMAPPED, STREAM_RECONNECT, STREAM_STALLED, SUBSCRIBE_FAILURE,
    TREND_FAILURE,
};
use crate::timer::TimerSlot;
use crate::token::TokenManager;

/// How long `shutdown` waits for background tasks before aborting them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// External collaborators of the importer
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthApi>,
    pub subscriptions: Arc<dyn SubscriptionApi>,
    pub sensors: Arc<dyn SensorRepository>,
    pub sink: Arc<dyn ObservationSink>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Collaborators {
    /// Use one REST client for both logon and per-object calls
    pub fn from_client(
        client: Arc<MetasysClient>,
        sensors: Arc<dyn SensorRepository>,
        sink: Arc<dyn ObservationSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            auth: client.clone(),
            subscriptions: client,
            sensors,
            sink,
            metrics,
        }
    }
}

pub struct StreamImporter {
    me: Weak<Self>,
    config: ImporterConfig,
    credentials: Credentials,
    stream_url: Url,

    subscriptions: Arc<dyn SubscriptionApi>,
    sensors: Arc<dyn SensorRepository>,
    sink: Arc<dyn ObservationSink>,
    metrics: Arc<dyn MetricsSink>,
    audit: Arc<AuditTrail>,
    health: Arc<HealthState>,

    tokens: Arc<TokenManager>,
    stream: Arc<StreamingClient>,

    /// Id of the last frame that was dispatched
    resume_cursor: RwLock<Option<String>>,
    /// Subscription id from the latest `hello`
    subscription_id: RwLock<Option<String>>,

    resubscribe_timer: TimerSlot,
    /// Token generation the pending resubscription should replace
    resubscribe_basis: AtomicU64,
    resubscribe_retry: Mutex<Backoff>,

    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamImporter {
    /// Create an importer for the stream at `stream_url`
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: ImporterConfig,
        credentials: Credentials,
        stream_url: Url,
        collaborators: Collaborators,
    ) -> ImporterResult<Arc<Self>> {
        config.validate()?;
        let stream = Arc::new(StreamingClient::new()?);
        Ok(Self::with_stream_client(
            config,
            credentials,
            stream_url,
            collaborators,
            stream,
        ))
    }

    /// Create an importer around an existing streaming client
    pub fn with_stream_client(
        config: ImporterConfig,
        credentials: Credentials,
        stream_url: Url,
        collaborators: Collaborators,
        stream: Arc<StreamingClient>,
    ) -> Arc<Self> {
        let audit = Arc::new(AuditTrail::new());
        let health = Arc::new(HealthState::new());
        let tokens = TokenManager::new(
            collaborators.auth,
            audit.clone(),
            collaborators.metrics.clone(),
            health.clone(),
            &config,
        );
        let (retry_initial, retry_max) = config.retry_backoff();
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new_cyclic(|me: &Weak<Self>| {
            let timer_owner = me.clone();
            let resubscribe_timer = TimerSlot::spawn("resubscribe", move || {
                let owner = timer_owner.clone();
                Box::pin(async move {
                    if let Some(importer) = owner.upgrade() {
                        importer.run_resubscribe().await;
                    }
                })
            });

            Self {
                me: me.clone(),
                config,
                credentials,
                stream_url,
                subscriptions: collaborators.subscriptions,
                sensors: collaborators.sensors,
                sink: collaborators.sink,
                metrics: collaborators.metrics,
                audit,
                health,
                tokens,
                stream,
                resume_cursor: RwLock::new(None),
                subscription_id: RwLock::new(None),
                resubscribe_timer,
                resubscribe_basis: AtomicU64::new(0),
                resubscribe_retry: Mutex::new(Backoff::new(retry_initial, retry_max)),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
            }
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Log on, arm the token refresh and start streaming
    ///
    /// A failed initial logon is returned; after that, failures are retried
    /// in the background.
    pub async fn start(self: &Arc<Self>) -> ImporterResult<()> {
        if !self.tasks.lock().is_empty() {
            return Err(ImporterError::AlreadyStarted);
        }

        let token = self.tokens.acquire(&self.credentials).await?;
        self.tokens.schedule_refresh(&token);

        let sensors = self.sensors.sensors();
        for sensor in &sensors {
            self.audit
                .record_created(&sensor.sensor_id, format!("object {}", sensor.object_id));
        }

        let supervisor = tokio::spawn(self.clone().run_supervisor());
        let watchdog = tokio::spawn(self.clone().run_watchdog());
        self.tasks.lock().extend([supervisor, watchdog]);

        info!(
            sensors = sensors.len(),
            stream_url = %self.stream_url,
            "Importer started"
        );
        Ok(())
    }

    /// Stop streaming and cancel all pending timers
    pub async fn shutdown(&self) {
        info!("Importer shutting down");
        self.shutdown_tx.send_replace(true);
        self.stream.close();
        self.resubscribe_timer.cancel();
        self.tokens.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("Background task did not stop in time, aborting");
                task.abort();
            }
        }
    }

    /// Reconnect loop: one stream session at a time, forever
    async fn run_supervisor(self: Arc<Self>) {
        let (initial, max) = self.config.reconnect_backoff();
        let mut backoff = Backoff::new(initial, max);
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tokens.valid_token().await {
                Ok(token) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    let delivered = self.run_session(&token).await;
                    if delivered > 0 {
                        backoff.reset();
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Err(e) => {
                    // Audited by the token manager
                    warn!(error = %e, "No valid token, push stream not opened");
                }
            }

            let mut delay = backoff.next_delay();
            if let Some(hint) = self.stream.retry_hint() {
                delay = delay.max(hint);
            }
            debug!(delay_ms = delay.as_millis() as u64, "Reopening push stream");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        debug!("Stream supervisor stopped");
    }

    /// One stream session; returns how many frames it delivered
    async fn run_session(&self, token: &Token) -> u64 {
        let cursor = self.resume_cursor.read().clone();
        let mut delivered = 0u64;

        let result = self
            .stream
            .open_stream(&self.stream_url, token, cursor.as_deref(), |frame| {
                delivered += 1;
                self.handle_frame(frame);
            })
            .await;

        let reason = match result {
            Ok(SessionEnd::Cancelled) => "closed",
            Ok(SessionEnd::EndOfStream) => {
                info!("Push stream ended by server");
                "end_of_stream"
            }
            Ok(SessionEnd::NoContent) => {
                debug!("Push stream has no content");
                "no_content"
            }
            Err(e) => {
                warn!(error = %e, "Push stream failed");
                self.audit
                    .record_failed(STREAM_SENSOR_ID, format!("stream failed: {}", e));
                "error"
            }
        };

        if !*self.shutdown_tx.borrow() {
            self.health.reconnected();
            self.metrics.increment(STREAM_RECONNECT, &[("reason", reason)]);
        }
        delivered
    }

    /// Close the stream when it has gone quiet for too long
    async fn run_watchdog(self: Arc<Self>) {
        let threshold = self.config.liveness_threshold();
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.watchdog_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            if self.stream.state() == ConnectionState::Open
                && !self.stream.has_received_messages_recently(threshold)
            {
                warn!(
                    threshold_ms = threshold.as_millis() as u64,
                    "Push stream stalled, closing"
                );
                self.audit.record_failed(
                    STREAM_SENSOR_ID,
                    format!("no frame received for {}s", threshold.as_secs()),
                );
                self.metrics.increment(STREAM_STALLED, &[]);
                self.stream.close();
            }
        }

        debug!("Liveness watchdog stopped");
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    fn handle_frame(&self, frame: Frame) {
        self.health.frame_received();
        self.on_event(mapper::to_stream_event(&frame));
        if let Some(id) = frame.id {
            *self.resume_cursor.write() = Some(id);
        }
    }

    /// Dispatch one decoded stream event
    ///
    /// Never blocks: subscribe calls triggered by a `hello` run on a spawned
    /// task.
    pub fn on_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Heartbeat { header, timestamp } => {
                self.health.heartbeat(timestamp.unwrap_or_else(Utc::now));
                let detail = match timestamp {
                    Some(ts) => format!("heartbeat {}", ts.to_rfc3339()),
                    None => format!("heartbeat {}", header.data.unwrap_or_default()),
                };
                self.audit.record_observed_stream(STREAM_SENSOR_ID, detail);
            }
            StreamEvent::ObservedValue {
                object_id,
                item_reference,
                value,
                ..
            } => self.on_observed_value(object_id, item_reference, value),
            StreamEvent::SubscriptionOpened {
                header,
                subscription_id,
            } => match subscription_id {
                Some(id) => self.on_subscription_opened(id),
                None => {
                    warn!("Stream subscription confirmed without an id");
                    self.audit.record_failed(
                        STREAM_SENSOR_ID,
                        format!("hello without subscription id: {:?}", header.data),
                    );
                }
            },
            StreamEvent::Unknown { header } => {
                debug!(event = ?header.name, "Unknown stream event");
                self.health.unknown_event();
                self.audit.record_failed(
                    STREAM_SENSOR_ID,
                    format!(
                        "unknown event {}: {}",
                        header.name.as_deref().unwrap_or("<unnamed>"),
                        header.data.unwrap_or_default()
                    ),
                );
            }
        }
    }

    fn on_observed_value(
        &self,
        object_id: Option<String>,
        item_reference: Option<String>,
        value: PresentValue,
    ) {
        let sensor = item_reference
            .as_deref()
            .and_then(|reference| self.sensors.lookup(reference))
            .or_else(|| object_id.as_deref().and_then(|id| self.sensors.lookup(id)));

        match sensor {
            Some(sensor) => self.publish(&sensor, value, ObservationOrigin::Stream, None),
            None => {
                let reference = item_reference
                    .or(object_id)
                    .unwrap_or_else(|| STREAM_SENSOR_ID.to_string());
                debug!(%reference, "Value update for unmapped object");
                self.audit
                    .record_failed(&reference, format!("MISSING sensor mapping for {}", reference));
                self.metrics.increment(SENSOR_UNMAPPED, &[]);
                self.health.sensor_unmapped();
            }
        }
    }

    fn on_subscription_opened(&self, subscription_id: String) {
        info!(%subscription_id, "Stream subscription opened");
        *self.subscription_id.write() = Some(subscription_id.clone());
        self.audit
            .record_subscribed(STREAM_SENSOR_ID, format!("subscription {}", subscription_id));

        let token = self.tokens.current();
        if let (Some(importer), Some(token)) = (self.me.upgrade(), token.clone()) {
            tokio::spawn(async move {
                importer.subscribe_all(&token, &subscription_id).await;
            });
        }

        if let Some(token) = token {
            self.schedule_resubscribe_within(token.expires_at);
        }
    }

    /// Publish an observation and record it
    fn publish(
        &self,
        sensor: &MappedSensor,
        value: PresentValue,
        origin: ObservationOrigin,
        observed_at: Option<DateTime<Utc>>,
    ) {
        let detail = format!("{} = {}", sensor.object_id, value);
        let mut observation = Observation::for_sensor(sensor, value, origin);
        if let Some(at) = observed_at {
            observation = observation.at(at);
        }

        self.sink.publish(observation);
        self.metrics
            .increment(OBSERVATION_PUBLISHED, &[("origin", origin.as_str())]);
        self.health.observation_published();

        match origin {
            ObservationOrigin::Trend => self.audit.record_observed_trend(&sensor.sensor_id, detail),
            ObservationOrigin::Stream | ObservationOrigin::PresentValueRead => self
                .audit
                .record_observed_present_value(&sensor.sensor_id, detail),
        }
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Attach every mapped sensor to `subscription_id`
    async fn subscribe_all(&self, token: &Token, subscription_id: &str) {
        let sensors = self.sensors.sensors();
        debug!(count = sensors.len(), %subscription_id, "Subscribing sensors");

        let calls = sensors
            .iter()
            .map(|sensor| self.subscribe_one(token, sensor, subscription_id));
        futures::future::join_all(calls).await;
    }

    async fn subscribe_one(&self, token: &Token, sensor: &MappedSensor, subscription_id: &str) {
        match self
            .subscriptions
            .subscribe(token, &sensor.object_id, subscription_id)
            .await
        {
            Ok(value) => {
                self.audit
                    .record_subscribed(&sensor.sensor_id, format!("subscription {}", subscription_id));
                self.publish(sensor, value, ObservationOrigin::PresentValueRead, None);
            }
            Err(e) => {
                warn!(sensor_id = %sensor.sensor_id, error = %e, "Subscribe failed");
                self.audit
                    .record_failed(&sensor.sensor_id, format!("subscribe failed: {}", e));
                self.metrics.increment(SUBSCRIBE_FAILURE, &[("kind", e.kind())]);
                self.health.subscribe_failed();
            }
        }
    }

    /// Re-subscribe `safety_margin` before `target`, superseding any pending
    /// resubscription
    pub fn schedule_resubscribe_within(&self, target: DateTime<Utc>) {
        let until_target = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let delay = until_target.saturating_sub(self.tokens.safety_margin());
        self.arm_resubscribe(delay);
        debug!(
            delay_ms = delay.as_millis() as u64,
            %target,
            "Resubscription scheduled"
        );
    }

    /// Arm the resubscription to replace the current token generation
    fn arm_resubscribe(&self, delay: Duration) {
        self.resubscribe_basis
            .store(self.tokens.generation(), Ordering::Release);
        self.resubscribe_timer.schedule_in(delay);
    }

    async fn run_resubscribe(&self) {
        // Reuses the token if the refresh timer already replaced it
        let basis = self.resubscribe_basis.load(Ordering::Acquire);
        let token = match self.tokens.refresh_unless_replaced(basis).await {
            Ok(token) => token,
            Err(e) => {
                // Audited by the token manager; the basis stays so the retry refreshes
                let delay = self.resubscribe_retry.lock().next_delay();
                self.resubscribe_timer.schedule_in(delay);
                error!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Resubscription failed to refresh the token"
                );
                return;
            }
        };
        let subscription_id = self.subscription_id.read().clone();
        match subscription_id {
            Some(subscription_id) => {
                self.subscribe_all(&token, &subscription_id).await;
                self.audit.record_subscribed(
                    STREAM_SENSOR_ID,
                    format!("resubscribed {}", subscription_id),
                );
            }
            None => debug!("No stream subscription yet, token refreshed only"),
        }

        if token.remaining() > self.tokens.safety_margin() {
            self.resubscribe_retry.lock().reset();
            self.schedule_resubscribe_within(token.expires_at);
        } else {
            // Half the remaining life, never sooner than the retry backoff
            let delay = (token.remaining() / 2).max(self.resubscribe_retry.lock().next_delay());
            self.arm_resubscribe(delay);
        }
    }

    // =========================================================================
    // Trends
    // =========================================================================

    /// Fetch trended samples over the last `window` for every mapped sensor
    ///
    /// Returns the number of observations published. Per-sensor failures are
    /// audited and skipped.
    pub async fn poll_trends(&self, window: Duration) -> usize {
        let token = match self.tokens.valid_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "No valid token, trend poll skipped");
                return 0;
            }
        };

        let end = Utc::now();
        let start = end - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(1));
        let mut published = 0;

        for sensor in self.sensors.sensors() {
            match self
                .subscriptions
                .trend_samples(&token, &sensor.object_id, start, end)
                .await
            {
                Ok(samples) => {
                    for sample in samples {
                        self.publish(
                            &sensor,
                            sample.value,
                            ObservationOrigin::Trend,
                            Some(sample.timestamp),
                        );
                        published += 1;
                    }
                }
                Err(e) => {
                    warn!(sensor_id = %sensor.sensor_id, error = %e, "Trend read failed");
                    self.audit
                        .record_failed(&sensor.sensor_id, format!("trend read failed: {}", e));
                    self.metrics.increment(TREND_FAILURE, &[("kind", e.kind())]);
                }
            }
        }

        debug!(published, "Trend poll finished");
        published
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn stream(&self) -> &Arc<StreamingClient> {
        &self.stream
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    /// Id of the last dispatched frame, sent as `Last-Event-ID` on reconnect
    pub fn resume_cursor(&self) -> Option<String> {
        self.resume_cursor.read().clone()
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.subscription_id.read().clone()
    }

    pub fn has_pending_resubscribe(&self) -> bool {
        self.resubscribe_timer.is_pending()
    }

    pub fn pending_resubscribe_at(&self) -> Option<Instant> {
        self.resubscribe_timer.deadline()
    }
}

impl std::fmt::Debug for StreamImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamImporter")
            .field("stream_url", &self.stream_url.as_str())
            .field("state", &self.stream.state())
            .field("resume_cursor", &*self.resume_cursor.read())
            .field("subscription_id", &*self.subscription_id.read())
            .finish()
    }
}
