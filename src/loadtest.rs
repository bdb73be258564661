//! Simple load driver
//!
//! N publishers each publish M messages, waiting for every publish to complete
//! its QoS flow before sending the next, while K wildcard subscribers count
//! deliveries. Publisher and subscriber QoS rotate through 0, 1 and 2 by index.

use crate::scenario::{ScenarioContext, ScenarioFailure, WaitKind};
use crate::transport::mqtt::{qos_from_level, Publisher, PublisherIdentity, Subscriber};
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shape of one load run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTestSettings {
    pub publishers: usize,
    pub subscribers: usize,
    pub messages_per_publisher: usize,
    /// Publishers send to `<topic_root>/<index>`; subscribers use `<topic_root>/#`
    pub topic_root: String,
}

impl Default for LoadTestSettings {
    fn default() -> Self {
        Self {
            publishers: 3,
            subscribers: 3,
            messages_per_publisher: 5,
            topic_root: "/test/load".to_string(),
        }
    }
}

impl LoadTestSettings {
    /// Deliveries each subscriber should see
    pub fn expected_per_subscriber(&self) -> u64 {
        (self.publishers * self.messages_per_publisher) as u64
    }
}

/// Counts from one load run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadTestReport {
    pub publishers: usize,
    pub subscribers: usize,
    pub messages_per_publisher: usize,
    pub published: u64,
    pub acknowledged: u64,
    /// Deliveries per subscriber, in subscriber index order
    pub received: Vec<u64>,
    pub expected_per_subscriber: u64,
    pub elapsed_ms: u64,
}

impl LoadTestReport {
    /// Every publish completed and every subscriber saw every message
    pub fn is_complete(&self) -> bool {
        self.acknowledged == self.published
            && self
                .received
                .iter()
                .all(|&count| count == self.expected_per_subscriber)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} publishers x {} messages, {} subscribers, {} ms",
            self.publishers, self.messages_per_publisher, self.subscribers, self.elapsed_ms
        );
        let _ = writeln!(
            out,
            "  published {} / acknowledged {}",
            self.published, self.acknowledged
        );
        for (idx, count) in self.received.iter().enumerate() {
            let _ = writeln!(
                out,
                "  subscriber {idx}: received {count} / {}",
                self.expected_per_subscriber
            );
        }
        out
    }
}

#[derive(Debug, Default)]
struct PublisherTally {
    published: u64,
    acknowledged: u64,
}

/// Load run bound to a broker context
pub struct LoadTest {
    settings: LoadTestSettings,
    context: ScenarioContext,
}

impl LoadTest {
    pub fn new(settings: LoadTestSettings, context: ScenarioContext) -> Self {
        Self { settings, context }
    }

    pub async fn run(&self) -> Result<LoadTestReport, ScenarioFailure> {
        let settings = &self.settings;
        let ctx = &self.context;
        let filter = format!("{}/#", settings.topic_root);

        let mut subscribers = Vec::with_capacity(settings.subscribers);
        for idx in 0..settings.subscribers {
            let qos = qos_from_level((idx % 3) as u8)?;
            subscribers.push(
                ctx.connected_subscriber(&format!("Load-Sub{idx}"), &filter, qos)
                    .await?,
            );
        }

        let mut publishers = Vec::with_capacity(settings.publishers);
        for idx in 0..settings.publishers {
            publishers.push(
                ctx.connected_publisher(PublisherIdentity::new(format!("Load-Pub{idx}")))
                    .await?,
            );
        }
        info!(
            publishers = settings.publishers,
            subscribers = settings.subscribers,
            messages = settings.messages_per_publisher,
            "Load test clients connected"
        );

        let started = Instant::now();
        let idle = ctx.wait_timeout();

        let mut counters = JoinSet::new();
        for (idx, subscriber) in subscribers.into_iter().enumerate() {
            counters.spawn(count_deliveries(idx, subscriber, idle));
        }

        let mut senders = JoinSet::new();
        for (idx, publisher) in publishers.into_iter().enumerate() {
            let topic = format!("{}/{idx}", settings.topic_root);
            let qos = qos_from_level((idx % 3) as u8)?;
            senders.spawn(publish_all(
                publisher,
                topic,
                qos,
                settings.messages_per_publisher,
                idle,
            ));
        }

        let mut tally = PublisherTally::default();
        let mut first_failure = None;
        while let Some(joined) = senders.join_next().await {
            match joined {
                Ok(Ok(publisher_tally)) => {
                    tally.published += publisher_tally.published;
                    tally.acknowledged += publisher_tally.acknowledged;
                }
                Ok(Err(failure)) => {
                    warn!("Publisher failed: {}", failure);
                    first_failure.get_or_insert(failure);
                }
                Err(e) => warn!("Publisher task ended abnormally: {}", e),
            }
        }

        let mut received = vec![0u64; settings.subscribers];
        while let Some(joined) = counters.join_next().await {
            match joined {
                Ok((idx, count)) => received[idx] = count,
                Err(e) => warn!("Subscriber task ended abnormally: {}", e),
            }
        }

        if let Some(failure) = first_failure {
            return Err(failure);
        }

        let elapsed = started.elapsed();
        let report = LoadTestReport {
            publishers: settings.publishers,
            subscribers: settings.subscribers,
            messages_per_publisher: settings.messages_per_publisher,
            published: tally.published,
            acknowledged: tally.acknowledged,
            received,
            expected_per_subscriber: settings.expected_per_subscriber(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            published = report.published,
            acknowledged = report.acknowledged,
            elapsed = ?elapsed,
            complete = report.is_complete(),
            "Load test finished"
        );
        Ok(report)
    }
}

async fn publish_all(
    mut publisher: Publisher,
    topic: String,
    qos: rumqttc::QoS,
    count: usize,
    ack_timeout: Duration,
) -> Result<PublisherTally, ScenarioFailure> {
    let mut tally = PublisherTally::default();

    for idx in 0..count {
        let payload = format!("[{}] Message {idx}", publisher.client_id());
        publisher.publish(&topic, payload, qos, false).await?;
        tally.published += 1;

        let started = Instant::now();
        match publisher.wait_for_publish_ack(ack_timeout).await {
            Some(ack) => {
                debug!(client = %publisher.client_id(), packet_id = ack.packet_id, "Publish acknowledged");
                tally.acknowledged += 1;
            }
            None => {
                let failure = ScenarioFailure::timeout(
                    publisher.client_id(),
                    WaitKind::PublishAck,
                    started.elapsed(),
                );
                let _ = publisher.disconnect().await;
                return Err(failure);
            }
        }
    }

    publisher.disconnect().await?;
    Ok(tally)
}

/// Count deliveries until `idle` passes without one.
///
/// A delivery that replaced an unread one still arrived, so overwrites count too.
async fn count_deliveries(idx: usize, mut subscriber: Subscriber, idle: Duration) -> (usize, u64) {
    let mut taken = 0u64;
    while subscriber.wait_for_message(idle).await.is_some() {
        taken += 1;
    }
    let count = taken + subscriber.overwritten_messages();

    if let Err(e) = subscriber.disconnect().await {
        warn!(client = %subscriber.client_id(), "Disconnect failed: {}", e);
    }
    (idx, count)
}
