//! The connector supervisor: connect, subscribe, consume, reconnect.
//!
//! ```text
//! Disconnected ──► Connecting ──► Subscribed ──► Draining ──► Disconnected
//!      ▲               │                                          │
//!      │               └── connect failed ────────────────────────┤
//!      └──────────────────────── reconnect delay ◄────────────────┘
//! ```
//!
//! Each iteration opens a fresh primary session (and, when enabled, an
//! independent logging session), switches the primary channel to confirm
//! mode, limits it to one unacknowledged delivery and consumes the
//! configured queue. Any transport failure tears the iteration down; the
//! next one starts after the reconnect delay. Sessions are never reused.
//!
//! The only way out of [`Supervisor::run`] is a delivery that fails header
//! validation, reported as [`SupervisorError::Fatal`].

use crate::reconnect::ReconnectPolicy;
use crate::shutdown::{ShutdownHook, close_session};
use bpm_connector_core::config::ConnectorConfig;
use bpm_connector_core::correlation::ReplyEnvelope;
use bpm_connector_core::delivery::Delivery;
use bpm_connector_core::engine::ProcessEngine;
use bpm_connector_core::escalation::Escalator;
use bpm_connector_core::handler::{DeliveryContext, DeliveryHandler, Outcome};
use bpm_connector_core::telemetry::{ChannelTelemetrySink, Stage};
use bpm_connector_core::transport::{Channel, Session, Transport, TransportError};
use bpm_connector_core::validation::{ValidationFailure, validate};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;

/// Maximum unacknowledged deliveries per consumer.
pub const PREFETCH_COUNT: u16 = 1;

/// Lifecycle state of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No session; waiting to connect
    Disconnected,
    /// Opening a session
    Connecting,
    /// Consuming deliveries
    Subscribed,
    /// Tearing a session down
    Draining,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

/// Errors that end the supervisor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// A delivery failed header validation.
    ///
    /// The offending delivery has already been rejected with
    /// `requeue = false`, so the broker discards it unless the work queue is
    /// declared with a dead-letter exchange (`x-dead-letter-exchange`).
    /// Configure one on the queue to keep invalid tasks for inspection.
    #[error("Fatal: {0}")]
    Fatal(#[from] ValidationFailure),
}

/// Why one session iteration ended.
#[derive(Error, Debug)]
enum SessionEnd {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fatal(ValidationFailure),
}

/// Drives one connector: owns every session and all retry policy.
pub struct Supervisor {
    config: Arc<ConnectorConfig>,
    transport: Arc<dyn Transport>,
    logging_transport: Option<Arc<dyn Transport>>,
    engine: Arc<dyn ProcessEngine>,
    handler: Arc<dyn DeliveryHandler>,
    policy: ReconnectPolicy,
    hook: ShutdownHook,
    state: watch::Sender<ConnectorState>,
}

impl Supervisor {
    /// Create a supervisor.
    ///
    /// The reconnect policy is taken from `config`.
    #[must_use]
    pub fn new(
        config: impl Into<Arc<ConnectorConfig>>,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn ProcessEngine>,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Self {
        let config = config.into();
        let policy = ReconnectPolicy::from_config(&config);
        let (state, _) = watch::channel(ConnectorState::Disconnected);

        Self {
            config,
            transport,
            logging_transport: None,
            engine,
            handler,
            policy,
            hook: ShutdownHook::new(),
            state,
        }
    }

    /// Publish escalations over a second, independent transport.
    ///
    /// Only used when logging is enabled in the configuration.
    #[must_use]
    pub fn with_logging_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.logging_transport = Some(transport);
        self
    }

    /// Override the reconnect policy.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Watch the supervisor's lifecycle state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    /// The hook closing the current sessions at process exit.
    #[must_use]
    pub fn shutdown_hook(&self) -> ShutdownHook {
        self.hook.clone()
    }

    /// Run until a delivery fails validation.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Fatal`] after escalating the validation
    /// failures and rejecting the offending delivery without requeue. See
    /// [`SupervisorError::Fatal`] for keeping such deliveries.
    pub async fn run(&self) -> Result<Infallible, SupervisorError> {
        let mut attempt: u32 = 0;

        loop {
            let mut subscribed = false;
            let result = self.run_session(&mut subscribed).await;
            self.set_state(ConnectorState::Disconnected);

            if subscribed {
                attempt = 0;
            }

            let reason = match result {
                Err(SessionEnd::Fatal(failure)) => return Err(SupervisorError::Fatal(failure)),
                Err(SessionEnd::Transport(e)) => {
                    tracing::error!(
                        owner = %self.config.owner,
                        queue = %self.config.queue,
                        error = %e,
                        "Transport failure"
                    );
                    "transport"
                }
                Ok(()) => {
                    tracing::warn!(queue = %self.config.queue, "Consumer cancelled by the broker");
                    "consumer_cancelled"
                }
            };
            metrics::counter!("connector.reconnects", "reason" => reason).increment(1);

            let delay = self.policy.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tracing::info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "Reconnecting after delay"
            );
            sleep(delay).await;
        }
    }

    /// Run until `shutdown` completes or a delivery fails validation, then
    /// close the current sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Fatal`] as [`Supervisor::run`] does.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), SupervisorError>
    where
        F: Future,
    {
        let result = tokio::select! {
            result = self.run() => result.map(|never| match never {}),
            _ = shutdown => {
                tracing::info!(queue = %self.config.queue, "Shutdown requested");
                Ok(())
            }
        };

        self.hook.close_all().await;
        self.set_state(ConnectorState::Disconnected);
        result
    }

    fn set_state(&self, state: ConnectorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connector state changed");
        }
    }

    async fn run_session(&self, subscribed: &mut bool) -> Result<(), SessionEnd> {
        self.set_state(ConnectorState::Connecting);

        let primary = self.transport.connect().await?;
        let logging = self.connect_logging().await;
        tracing::info!(
            owner = %self.config.owner,
            queue = %self.config.queue,
            session_id = %primary.id(),
            logging = logging.is_some(),
            "Connected"
        );

        let mut sessions = vec![Arc::clone(&primary)];
        sessions.extend(logging.iter().cloned());
        self.hook.register(sessions.clone());

        let escalator = self.escalator(logging.as_ref());
        let result = self.consume(primary.as_ref(), &escalator, subscribed).await;

        self.set_state(ConnectorState::Draining);
        self.hook.clear();
        for session in sessions {
            close_session(session.as_ref()).await;
        }

        result
    }

    async fn connect_logging(&self) -> Option<Arc<dyn Session>> {
        if !self.config.logging.enabled {
            return None;
        }
        let transport = self.logging_transport.as_ref()?;

        match transport.connect().await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(
                    logging_queue = %self.config.logging.queue,
                    error = %e,
                    "Logging transport unavailable, escalating to the operational log only"
                );
                None
            }
        }
    }

    fn escalator(&self, logging: Option<&Arc<dyn Session>>) -> Escalator {
        let escalator = Escalator::new(&self.config.owner, &self.config.queue);
        match logging {
            Some(session) => escalator.with_sink(
                Arc::new(ChannelTelemetrySink::new(
                    session.channel(),
                    &self.config.logging.queue,
                )),
                &self.config.logging.queue,
            ),
            None => escalator,
        }
    }

    async fn consume(
        &self,
        session: &dyn Session,
        escalator: &Escalator,
        subscribed: &mut bool,
    ) -> Result<(), SessionEnd> {
        let channel = session.channel();
        channel.confirm_select().await?;
        channel.basic_qos(PREFETCH_COUNT).await?;
        let mut consumer = channel.consume(&self.config.queue).await?;

        self.set_state(ConnectorState::Subscribed);
        *subscribed = true;
        escalator
            .info("Waiting for messages. To exit press CTRL+C", Stage::Connection)
            .await;

        let tick = self.config.tick_interval();
        while consumer.is_consuming() {
            if let Some(delivery) = consumer.next_delivery(tick).await? {
                self.process_delivery(channel.as_ref(), escalator, delivery)
                    .await?;
            }
            sleep(tick).await;
        }

        Ok(())
    }

    async fn process_delivery(
        &self,
        channel: &dyn Channel,
        escalator: &Escalator,
        delivery: Delivery,
    ) -> Result<(), SessionEnd> {
        let delivery_tag = delivery.delivery_tag;
        metrics::counter!("connector.deliveries.received").increment(1);
        tracing::debug!(
            delivery_tag,
            redelivered = delivery.redelivered,
            "Delivery received"
        );

        if let Err(failure) = validate(
            delivery.headers.as_ref(),
            self.config.required_header_keys(),
        ) {
            let escalator = escalator
                .for_process_instance(
                    delivery
                        .header_text(&self.config.process_instance_header)
                        .as_deref(),
                );
            for error in &failure.errors {
                escalator.error(&error.to_string(), Stage::Received).await;
            }
            channel.reject(delivery_tag, false).await?;
            metrics::counter!("connector.deliveries.rejected").increment(1);
            return Err(SessionEnd::Fatal(failure));
        }

        let ctx = DeliveryContext::new(
            delivery,
            Arc::clone(&self.engine),
            escalator,
            Arc::clone(&self.config),
        );
        let outcome = self.handler.process(&ctx).await?;

        let reply = match &outcome {
            Outcome::Completed => {
                tracing::info!(
                    delivery_tag,
                    process_instance_id = ctx.process_instance_id().unwrap_or_default(),
                    "Delivery processed"
                );
                ctx.process_instance_id()
                    .map_or_else(ReplyEnvelope::success, |id| {
                        ReplyEnvelope::success_for(&self.config.process_instance_header, id)
                    })
            }
            Outcome::Failed { message } => {
                metrics::counter!("connector.deliveries.failed").increment(1);
                ctx.escalate(message, Stage::InProgress).await;
                ReplyEnvelope::failure(message.clone())
            }
        };

        if let Some(correlation) = ctx.correlation() {
            correlation.send_reply(channel, &reply).await?;
            metrics::counter!("connector.replies.published").increment(1);
        }

        channel.ack(delivery_tag).await?;
        metrics::counter!("connector.deliveries.acked").increment(1);
        tracing::debug!(delivery_tag, "Delivery acknowledged");
        Ok(())
    }
}
