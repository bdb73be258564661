//! Settings and helpers shared by every scenario

use super::{ScenarioFailure, WaitKind};
use crate::config::{BrokerEndpoint, BrokerSection, HarnessConfig, TimingSection};
use crate::error::HarnessResult;
use crate::probe::{ConnectFrame, RawProtocolProbe};
use crate::transport::mqtt::{
    ConnectOutcome, Connector, Publisher, PublisherIdentity, ReceivedMessage, Subscriber,
    SubscriberIdentity, SubscribeOutcome,
};
use bytes::Bytes;
use rumqttc::QoS;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Fields a delivered message is checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedMessage {
    pub topic: Option<String>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl ExpectedMessage {
    pub fn new<P: Into<Bytes>>(payload: P, qos: QoS, retain: bool) -> Self {
        Self {
            topic: None,
            payload: payload.into(),
            qos,
            retain,
        }
    }

    pub fn on_topic<T: Into<String>>(mut self, topic: T) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Every field that differs, joined into one line; `Ok` if none do
    pub fn check(&self, actual: &ReceivedMessage) -> Result<(), String> {
        let mut mismatches = Vec::new();

        if let Some(topic) = &self.topic {
            if *topic != actual.topic {
                mismatches.push(format!("topic: expected {topic}, got {}", actual.topic));
            }
        }
        if self.payload != actual.payload {
            mismatches.push(format!(
                "payload: expected {:?}, got {:?}",
                self.payload, actual.payload
            ));
        }
        if self.qos != actual.qos {
            mismatches.push(format!("qos: expected {:?}, got {:?}", self.qos, actual.qos));
        }
        if self.retain != actual.retain {
            mismatches.push(format!(
                "retain: expected {}, got {}",
                self.retain, actual.retain
            ));
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(mismatches.join("; "))
        }
    }
}

/// Everything a scenario may use: where the broker is and how long to wait
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    endpoint: BrokerEndpoint,
    timing: TimingSection,
    connect_timeout: Duration,
}

impl ScenarioContext {
    /// Context assuming the default broker connect timeout
    pub fn new(endpoint: BrokerEndpoint, timing: TimingSection) -> Self {
        Self {
            endpoint,
            timing,
            connect_timeout: BrokerSection::default().connect_timeout(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        Ok(Self::new(config.network.endpoint()?, config.timing.clone())
            .with_connect_timeout(config.broker.connect_timeout()))
    }

    /// The connect timeout the broker enforces on sockets that never send CONNECT
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn timing(&self) -> &TimingSection {
        &self.timing
    }

    pub fn wait_timeout(&self) -> Duration {
        self.timing.wait_timeout()
    }

    /// Pause where the protocol gives no acknowledgment to wait on
    pub async fn settle(&self) {
        tokio::time::sleep(self.timing.settle_delay()).await;
    }

    /// Connect a plain client and require an accepted CONNACK
    pub async fn connected_connector(&self, name: &str) -> Result<Connector, ScenarioFailure> {
        let mut connector = Connector::new(name, &self.endpoint);
        connector.connect()?;
        let started = Instant::now();
        let outcome = connector.wait_for_connect(self.wait_timeout()).await;
        require_accepted(connector.client_id(), outcome, started)?;
        Ok(connector)
    }

    /// Connect a subscriber and wait until its subscription is granted
    pub async fn connected_subscriber(
        &self,
        name: &str,
        topic_filter: &str,
        qos: QoS,
    ) -> Result<Subscriber, ScenarioFailure> {
        let mut subscriber =
            Subscriber::new(SubscriberIdentity::new(name, topic_filter, qos), &self.endpoint);
        subscriber.connect()?;

        let started = Instant::now();
        let outcome = subscriber.wait_for_connect(self.wait_timeout()).await;
        require_accepted(subscriber.client_id(), outcome, started)?;

        let started = Instant::now();
        match subscriber.wait_for_subscription(self.wait_timeout()).await {
            Some(SubscribeOutcome::Granted(granted)) => {
                debug!(client = %subscriber.client_id(), filter = %topic_filter, granted = ?granted, "Subscription granted");
                Ok(subscriber)
            }
            Some(other) => Err(ScenarioFailure::mismatch(
                subscriber.client_id(),
                WaitKind::Subscription,
                started.elapsed(),
                format!("subscription to {topic_filter} not granted: {other:?}"),
            )),
            None => Err(ScenarioFailure::timeout(
                subscriber.client_id(),
                WaitKind::Subscription,
                started.elapsed(),
            )),
        }
    }

    /// Connect a publisher (with its will, if any) and require an accepted CONNACK
    pub async fn connected_publisher(
        &self,
        identity: PublisherIdentity,
    ) -> Result<Publisher, ScenarioFailure> {
        let mut publisher = Publisher::new(identity, &self.endpoint);
        publisher.connect()?;
        let started = Instant::now();
        let outcome = publisher.wait_for_connect(self.wait_timeout()).await;
        require_accepted(publisher.client_id(), outcome, started)?;
        Ok(publisher)
    }

    /// Publish and wait until the publish completed its QoS flow
    pub async fn publish_acknowledged<P: Into<Bytes>>(
        &self,
        publisher: &Publisher,
        topic: &str,
        payload: P,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ScenarioFailure> {
        publisher.publish(topic, payload, qos, retain).await?;
        let started = Instant::now();
        match publisher.wait_for_publish_ack(self.wait_timeout()).await {
            Some(ack) if ack.qos == qos => Ok(()),
            Some(ack) => Err(ScenarioFailure::mismatch(
                publisher.client_id(),
                WaitKind::PublishAck,
                started.elapsed(),
                format!("expected completion at {qos:?}, got {ack:?}"),
            )),
            None => Err(ScenarioFailure::timeout(
                publisher.client_id(),
                WaitKind::PublishAck,
                started.elapsed(),
            )),
        }
    }

    /// Remove any retained message on `topic`
    pub async fn clear_retained(
        &self,
        publisher: &Publisher,
        topic: &str,
    ) -> Result<(), ScenarioFailure> {
        self.publish_acknowledged(publisher, topic, Bytes::new(), QoS::AtMostOnce, true)
            .await
    }

    /// Wait for one message and check it
    pub async fn expect_message(
        &self,
        subscriber: &Subscriber,
        expected: &ExpectedMessage,
    ) -> Result<ReceivedMessage, ScenarioFailure> {
        let started = Instant::now();
        let Some(message) = subscriber.wait_for_message(self.wait_timeout()).await else {
            return Err(ScenarioFailure::timeout(
                subscriber.client_id(),
                WaitKind::Message,
                started.elapsed(),
            ));
        };

        expected.check(&message).map_err(|detail| {
            ScenarioFailure::mismatch(
                subscriber.client_id(),
                WaitKind::Message,
                started.elapsed(),
                detail,
            )
        })?;
        Ok(message)
    }

    /// Require that nothing arrives for the full wait window
    pub async fn expect_no_message(&self, subscriber: &Subscriber) -> Result<(), ScenarioFailure> {
        let started = Instant::now();
        match subscriber.wait_for_message(self.wait_timeout()).await {
            None => Ok(()),
            Some(message) => Err(ScenarioFailure::mismatch(
                subscriber.client_id(),
                WaitKind::Message,
                started.elapsed(),
                format!(
                    "expected no message, got {:?} on {} (qos {:?}, retain {})",
                    message.payload, message.topic, message.qos, message.retain
                ),
            )),
        }
    }

    /// Open a probe that completes the CONNECT handshake and then stays silent
    pub async fn keep_alive_probe(&self) -> Result<RawProtocolProbe, ScenarioFailure> {
        let frame = ConnectFrame::keep_alive_probe();
        let started = Instant::now();
        let probe =
            RawProtocolProbe::handshake(&self.endpoint.address(), &frame, self.wait_timeout())
                .await?;

        match probe.connack() {
            Some(connack) if connack.is_accepted() => Ok(probe),
            other => Err(ScenarioFailure::mismatch(
                frame.client_id,
                WaitKind::Connect,
                started.elapsed(),
                format!("probe handshake not accepted: {other:?}"),
            )),
        }
    }

    /// Require a broker timer started at `opened` to close the probe on time.
    ///
    /// The probe must stay open until `timing.timer_margin` before `due`, and
    /// must be closed by `closed_by`. Both checks are bounded reads, so a close
    /// is seen as soon as it happens.
    pub async fn expect_timer_close(
        &self,
        probe: &mut RawProtocolProbe,
        opened: Instant,
        due: Duration,
        closed_by: Duration,
    ) -> Result<(), ScenarioFailure> {
        let adapter = format!("{:?} probe", probe.kind());
        let open_until = due.saturating_sub(self.timing.timer_margin());

        let still_open = probe
            .is_connected(open_until.saturating_sub(opened.elapsed()))
            .await;
        if !still_open {
            let elapsed = opened.elapsed();
            probe.disconnect().await;
            return Err(ScenarioFailure::mismatch(
                adapter,
                WaitKind::ConnectionClose,
                elapsed,
                format!("closed after {elapsed:?}, expected open until {open_until:?} (timer due at {due:?})"),
            ));
        }

        let closed_within = closed_by.saturating_sub(opened.elapsed());
        let still_open = probe.is_connected(closed_within).await;
        let elapsed = opened.elapsed();
        probe.disconnect().await;

        if still_open {
            return Err(ScenarioFailure::timeout(
                adapter,
                WaitKind::ConnectionClose,
                elapsed,
            ));
        }
        info!(kind = ?probe.kind(), elapsed = ?elapsed, due = ?due, "Broker closed silent probe on time");
        Ok(())
    }
}

fn require_accepted(
    client_id: &str,
    outcome: Option<ConnectOutcome>,
    started: Instant,
) -> Result<(), ScenarioFailure> {
    match outcome {
        Some(outcome) if outcome.is_accepted() => Ok(()),
        Some(outcome) => Err(ScenarioFailure::mismatch(
            client_id,
            WaitKind::Connect,
            started.elapsed(),
            format!("connection not accepted: {outcome:?}"),
        )),
        None => Err(ScenarioFailure::timeout(
            client_id,
            WaitKind::Connect,
            started.elapsed(),
        )),
    }
}
