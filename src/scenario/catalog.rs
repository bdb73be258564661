//! The conformance scenarios
//!
//! Each scenario checks one broker property. Topics are disjoint between
//! scenarios so a late delivery from one cannot satisfy a wait in another.

use super::context::{ExpectedMessage, ScenarioContext};
use super::{Scenario, ScenarioFailure};
use crate::config::keep_alive_grace;
use crate::probe::RawProtocolProbe;
use crate::transport::mqtt::{effective_qos, qos_level, PublisherIdentity, Will};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use tokio::time::Instant;
use tracing::info;

const ALL_QOS: [QoS; 3] = [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce];

/// Every scenario, in execution order
pub fn catalog() -> Vec<Box<dyn Scenario>> {
    let mut scenarios: Vec<Box<dyn Scenario>> = vec![
        Box::new(ConnectAccepted),
        Box::new(KeepAliveExpiry),
        Box::new(ConnectTimeoutExpiry),
    ];

    for subscribed in ALL_QOS {
        for published in ALL_QOS {
            scenarios.push(Box::new(QosDowngrade {
                published,
                subscribed,
            }));
        }
    }
    for qos in ALL_QOS {
        scenarios.push(Box::new(RetainedToExistingSubscribers { qos }));
    }
    for qos in ALL_QOS {
        scenarios.push(Box::new(RetainedToLaterSubscribers { qos }));
    }
    scenarios.push(Box::new(DeleteRetained));
    scenarios.push(Box::new(UnsubscribeStopsDelivery));
    scenarios.push(Box::new(LastWillOnUngracefulDisconnect {
        will_qos: QoS::AtMostOnce,
    }));
    scenarios.push(Box::new(LastWillOnUngracefulDisconnect {
        will_qos: QoS::ExactlyOnce,
    }));

    scenarios
}

/// Plain connect yields return code 0
pub struct ConnectAccepted;

#[async_trait]
impl Scenario for ConnectAccepted {
    fn name(&self) -> String {
        "connect_accepted".to_string()
    }

    fn description(&self) -> String {
        "A CONNECT with a fresh client id is accepted with return code 0".to_string()
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let mut connector = ctx.connected_connector("Connect").await?;
        connector.disconnect().await?;
        Ok(())
    }
}

/// A client silent past 1.5x its keep-alive is dropped
pub struct KeepAliveExpiry;

#[async_trait]
impl Scenario for KeepAliveExpiry {
    fn name(&self) -> String {
        "keep_alive_expiry".to_string()
    }

    fn description(&self) -> String {
        "The broker closes a connected client that stays silent past its keep-alive".to_string()
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let mut probe = ctx.keep_alive_probe().await?;
        let opened = Instant::now();
        ctx.expect_timer_close(
            &mut probe,
            opened,
            keep_alive_grace(),
            ctx.timing().keep_alive_expiry(),
        )
        .await
    }
}

/// A socket that never sends CONNECT is dropped after the connect timeout
pub struct ConnectTimeoutExpiry;

#[async_trait]
impl Scenario for ConnectTimeoutExpiry {
    fn name(&self) -> String {
        "connect_timeout_expiry".to_string()
    }

    fn description(&self) -> String {
        "The broker closes a TCP connection that never sends CONNECT".to_string()
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let mut probe = RawProtocolProbe::tcp_only(&ctx.endpoint().address()).await?;
        let opened = Instant::now();
        ctx.expect_timer_close(
            &mut probe,
            opened,
            ctx.connect_timeout(),
            ctx.timing().connect_expiry(),
        )
        .await
    }
}

/// Delivered QoS is the lower of publish and subscription QoS
pub struct QosDowngrade {
    pub published: QoS,
    pub subscribed: QoS,
}

#[async_trait]
impl Scenario for QosDowngrade {
    fn name(&self) -> String {
        format!(
            "publish_qos{}_subscribe_qos{}",
            qos_level(self.published),
            qos_level(self.subscribed)
        )
    }

    fn description(&self) -> String {
        format!(
            "A QoS {} publish reaches a QoS {} subscriber at QoS {}",
            qos_level(self.published),
            qos_level(self.subscribed),
            qos_level(effective_qos(self.published, self.subscribed))
        )
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let level = qos_level(self.published);
        let topic = format!("/test/publish/qos{level}");
        let payload = format!("test_publish_qos{level}");

        let mut subscriber = ctx
            .connected_subscriber(
                &format!("PubSub-Sub{}", qos_level(self.subscribed)),
                "/test/publish/#",
                self.subscribed,
            )
            .await?;
        let mut publisher = ctx
            .connected_publisher(PublisherIdentity::new("PubSub-Pub"))
            .await?;

        publisher
            .publish(&topic, payload.clone(), self.published, false)
            .await?;

        let expected = ExpectedMessage::new(
            payload,
            effective_qos(self.published, self.subscribed),
            false,
        )
        .on_topic(topic);
        ctx.expect_message(&subscriber, &expected).await?;

        publisher.disconnect().await?;
        subscriber.disconnect().await?;
        Ok(())
    }
}

/// Retained publish reaches existing subscribers without the retain flag
pub struct RetainedToExistingSubscribers {
    pub qos: QoS,
}

#[async_trait]
impl Scenario for RetainedToExistingSubscribers {
    fn name(&self) -> String {
        format!("retained_to_existing_qos{}", qos_level(self.qos))
    }

    fn description(&self) -> String {
        format!(
            "A retained QoS {} publish is forwarded to existing subscribers with retain=false",
            qos_level(self.qos)
        )
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let level = qos_level(self.qos);
        let filter = format!("/test/retained/qos{level}/#");
        let topic = format!("/test/retained/qos{level}/test-messages");
        let payload = format!("test_retained_qos{level}");

        let mut publisher = ctx
            .connected_publisher(PublisherIdentity::new("RetainedExisting-Pub"))
            .await?;
        ctx.clear_retained(&publisher, &topic).await?;

        let mut subscribers = Vec::with_capacity(ALL_QOS.len());
        for subscribed in ALL_QOS {
            let name = format!("RetainedExisting-Sub{}", qos_level(subscribed));
            subscribers.push((
                subscribed,
                ctx.connected_subscriber(&name, &filter, subscribed).await?,
            ));
        }

        ctx.publish_acknowledged(&publisher, &topic, payload.clone(), self.qos, true)
            .await?;

        for (subscribed, subscriber) in &subscribers {
            let expected = ExpectedMessage::new(
                payload.clone(),
                effective_qos(self.qos, *subscribed),
                false,
            );
            ctx.expect_message(subscriber, &expected).await?;
        }

        ctx.clear_retained(&publisher, &topic).await?;
        publisher.disconnect().await?;
        for (_, subscriber) in &mut subscribers {
            subscriber.disconnect().await?;
        }
        Ok(())
    }
}

/// Retained publish reaches later subscribers with the retain flag
pub struct RetainedToLaterSubscribers {
    pub qos: QoS,
}

#[async_trait]
impl Scenario for RetainedToLaterSubscribers {
    fn name(&self) -> String {
        format!("retained_to_later_qos{}", qos_level(self.qos))
    }

    fn description(&self) -> String {
        format!(
            "A retained QoS {} publish is delivered to later subscribers with retain=true",
            qos_level(self.qos)
        )
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let level = qos_level(self.qos);
        let filter = format!("/test/retained/later/qos{level}/#");
        let topic = format!("/test/retained/later/qos{level}/test-messages");
        let payload = format!("test_retained_qos{level}");

        let mut publisher = ctx
            .connected_publisher(PublisherIdentity::new("RetainedLater-Pub"))
            .await?;
        ctx.clear_retained(&publisher, &topic).await?;
        ctx.publish_acknowledged(&publisher, &topic, payload.clone(), self.qos, true)
            .await?;
        if self.qos == QoS::AtMostOnce {
            // QoS 0 completes on send; give the broker time to store it
            ctx.settle().await;
        }

        let mut subscribers = Vec::with_capacity(ALL_QOS.len());
        for subscribed in ALL_QOS {
            let name = format!("RetainedLater-Sub{}", qos_level(subscribed));
            let subscriber = ctx.connected_subscriber(&name, &filter, subscribed).await?;
            let expected = ExpectedMessage::new(
                payload.clone(),
                effective_qos(self.qos, subscribed),
                true,
            )
            .on_topic(topic.clone());
            ctx.expect_message(&subscriber, &expected).await?;
            subscribers.push(subscriber);
        }

        ctx.clear_retained(&publisher, &topic).await?;
        publisher.disconnect().await?;
        for subscriber in &mut subscribers {
            subscriber.disconnect().await?;
        }
        Ok(())
    }
}

/// An empty retained publish is forwarded and deletes the stored message
pub struct DeleteRetained;

#[async_trait]
impl Scenario for DeleteRetained {
    fn name(&self) -> String {
        "delete_retained_qos0".to_string()
    }

    fn description(&self) -> String {
        "An empty retained publish reaches existing subscribers and removes the retained message"
            .to_string()
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let filter = "/test/retained/delete/qos0/#";
        let topic = "/test/retained/delete/qos0/test-messages";
        let payload = "test_delete_retained_qos0";

        let mut publisher = ctx
            .connected_publisher(PublisherIdentity::new("DeleteRetained-Pub"))
            .await?;
        // A retained message left by an aborted run would reach the subscriber first
        ctx.clear_retained(&publisher, topic).await?;

        let mut existing = ctx
            .connected_subscriber("DeleteRetained-Sub0", filter, QoS::AtMostOnce)
            .await?;

        ctx.publish_acknowledged(&publisher, topic, payload, QoS::AtMostOnce, true)
            .await?;
        ctx.expect_message(
            &existing,
            &ExpectedMessage::new(payload, QoS::AtMostOnce, false),
        )
        .await?;

        ctx.clear_retained(&publisher, topic).await?;
        ctx.expect_message(
            &existing,
            &ExpectedMessage::new(Bytes::new(), QoS::AtMostOnce, false),
        )
        .await?;

        let mut later = ctx
            .connected_subscriber("DeleteRetained-Sub1", filter, QoS::AtLeastOnce)
            .await?;
        ctx.expect_no_message(&later).await?;

        publisher.disconnect().await?;
        existing.disconnect().await?;
        later.disconnect().await?;
        Ok(())
    }
}

/// No delivery after UNSUBSCRIBE
pub struct UnsubscribeStopsDelivery;

#[async_trait]
impl Scenario for UnsubscribeStopsDelivery {
    fn name(&self) -> String {
        "unsubscribe_stops_delivery".to_string()
    }

    fn description(&self) -> String {
        "A subscriber receives nothing on a filter after unsubscribing from it".to_string()
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let topic = "/test/unsubscribe";

        let mut subscriber = ctx
            .connected_subscriber("Unsubscribe-Sub", topic, QoS::AtMostOnce)
            .await?;
        let mut publisher = ctx
            .connected_publisher(PublisherIdentity::new("Unsubscribe-Pub"))
            .await?;

        publisher
            .publish(topic, "Unsubscribe test", QoS::AtMostOnce, false)
            .await?;
        ctx.expect_message(
            &subscriber,
            &ExpectedMessage::new("Unsubscribe test", QoS::AtMostOnce, false),
        )
        .await?;

        subscriber.unsubscribe().await?;
        ctx.settle().await;

        publisher
            .publish(topic, "Unsubscribe test 2", QoS::AtMostOnce, false)
            .await?;
        ctx.expect_no_message(&subscriber).await?;

        publisher.disconnect().await?;
        subscriber.disconnect().await?;
        Ok(())
    }
}

/// An abrupt close publishes the will to every matching subscriber
pub struct LastWillOnUngracefulDisconnect {
    pub will_qos: QoS,
}

#[async_trait]
impl Scenario for LastWillOnUngracefulDisconnect {
    fn name(&self) -> String {
        format!("lwt_qos{}", qos_level(self.will_qos))
    }

    fn description(&self) -> String {
        format!(
            "A QoS {} will is delivered unretained to all subscribers after an ungraceful disconnect",
            qos_level(self.will_qos)
        )
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
        let level = qos_level(self.will_qos);
        let filter = format!("/test/unretained/lwt/qos{level}/#");
        let will_topic = format!("/test/unretained/lwt/qos{level}/1");

        let mut subscribers = Vec::with_capacity(ALL_QOS.len());
        for subscribed in ALL_QOS {
            let name = format!("Lwt-Sub{}", qos_level(subscribed));
            subscribers.push((
                subscribed,
                ctx.connected_subscriber(&name, &filter, subscribed).await?,
            ));
        }

        let will = Will::new(
            will_topic.clone(),
            Bytes::from_static(b"LWT"),
            self.will_qos,
            false,
        );
        let mut publisher = ctx
            .connected_publisher(PublisherIdentity::new("Lwt-Pub").with_will(will))
            .await?;

        // CONNECT processing and will registration are not acknowledged separately
        ctx.settle().await;
        publisher.disconnect_ungracefully().await;
        info!(will_topic = %will_topic, "Publisher dropped without DISCONNECT");

        for (subscribed, subscriber) in &subscribers {
            let expected = ExpectedMessage::new(
                Bytes::from_static(b"LWT"),
                effective_qos(self.will_qos, *subscribed),
                false,
            )
            .on_topic(will_topic.clone());
            ctx.expect_message(subscriber, &expected).await?;
        }

        for (_, subscriber) in &mut subscribers {
            subscriber.disconnect().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names_are_unique() {
        let scenarios = catalog();
        let names: HashSet<String> = scenarios.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), scenarios.len());
    }

    #[test]
    fn test_catalog_covers_all_qos_pairs() {
        let names: Vec<String> = catalog().iter().map(|s| s.name()).collect();
        for published in 0..=2 {
            for subscribed in 0..=2 {
                let name = format!("publish_qos{published}_subscribe_qos{subscribed}");
                assert!(names.contains(&name), "Missing {name}");
            }
        }
    }

    #[test]
    fn test_catalog_starts_with_connection_scenarios() {
        let names: Vec<String> = catalog().iter().take(3).map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "connect_accepted",
                "keep_alive_expiry",
                "connect_timeout_expiry"
            ]
        );
    }

    #[test]
    fn test_qos_downgrade_description() {
        let scenario = QosDowngrade {
            published: QoS::ExactlyOnce,
            subscribed: QoS::AtLeastOnce,
        };
        assert_eq!(scenario.name(), "publish_qos2_subscribe_qos1");
        assert_eq!(
            scenario.description(),
            "A QoS 2 publish reaches a QoS 1 subscriber at QoS 1"
        );
    }

    #[test]
    fn test_catalog_size() {
        // 3 connection + 9 QoS pairs + 3 + 3 retained + delete + unsubscribe + 2 LWT
        assert_eq!(catalog().len(), 22);
    }
}
