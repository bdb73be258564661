//! Pure identity and connection-option handling for client adapters
//!
//! Everything here is free of I/O: adapter identities, QoS arithmetic, and the
//! translation into rumqttc `MqttOptions`.

use crate::config::BrokerEndpoint;
use crate::error::{HarnessError, HarnessResult};
use bytes::Bytes;
use rumqttc::{LastWill, MqttOptions, QoS};
use std::time::Duration;
use uuid::Uuid;

/// Keep-alive the wrapped client announces; long enough that no scenario trips it
pub const CLIENT_KEEP_ALIVE: Duration = Duration::from_secs(60);
/// Request channel capacity between adapter and I/O task
pub const REQUEST_CAPACITY: usize = 10;

/// Convert a numeric level into a QoS
pub fn qos_from_level(level: u8) -> HarnessResult<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(HarnessError::InvalidQos(other)),
    }
}

/// Numeric level of a QoS
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// QoS a subscriber receives: the lower of publish and subscription QoS
pub fn effective_qos(published: QoS, subscribed: QoS) -> QoS {
    if qos_level(published) <= qos_level(subscribed) {
        published
    } else {
        subscribed
    }
}

/// Client id `prefix-xxxxxxxx`, unique per call
pub fn unique_client_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..8])
}

/// Last will registered at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Will {
    pub fn new<T, P>(topic: T, payload: P, qos: QoS, retain: bool) -> Self
    where
        T: Into<String>,
        P: Into<Bytes>,
    {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

/// Identity of a subscriber: its filter and requested QoS are fixed for its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberIdentity {
    pub name: String,
    pub topic_filter: String,
    pub qos: QoS,
}

impl SubscriberIdentity {
    pub fn new<N, F>(name: N, topic_filter: F, qos: QoS) -> Self
    where
        N: Into<String>,
        F: Into<String>,
    {
        Self {
            name: name.into(),
            topic_filter: topic_filter.into(),
            qos,
        }
    }
}

/// Identity of a publisher with an optional last will
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherIdentity {
    pub name: String,
    pub will: Option<Will>,
}

impl PublisherIdentity {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            will: None,
        }
    }

    pub fn with_will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }
}

/// Build client options for one adapter: clean session, fixed keep-alive, optional will
pub fn configure_mqtt_options(
    client_id: &str,
    endpoint: &BrokerEndpoint,
    will: Option<&Will>,
) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
    options.set_keep_alive(CLIENT_KEEP_ALIVE);
    options.set_clean_session(true);

    if let Some(will) = will {
        options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.to_vec(),
            will.qos,
            will.retain,
        ));
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> BrokerEndpoint {
        BrokerEndpoint {
            host: "127.0.0.1".to_string(),
            port: 1883,
        }
    }

    #[test]
    fn test_qos_level_conversion() {
        for level in 0..=2 {
            assert_eq!(qos_level(qos_from_level(level).unwrap()), level);
        }
        assert!(matches!(qos_from_level(3), Err(HarnessError::InvalidQos(3))));
    }

    #[test]
    fn test_effective_qos_examples() {
        assert_eq!(
            effective_qos(QoS::ExactlyOnce, QoS::AtMostOnce),
            QoS::AtMostOnce
        );
        assert_eq!(
            effective_qos(QoS::AtMostOnce, QoS::ExactlyOnce),
            QoS::AtMostOnce
        );
        assert_eq!(
            effective_qos(QoS::AtLeastOnce, QoS::AtLeastOnce),
            QoS::AtLeastOnce
        );
    }

    #[test]
    fn test_unique_client_id() {
        let a = unique_client_id("Sub0");
        let b = unique_client_id("Sub0");
        assert!(a.starts_with("Sub0-"));
        assert_eq!(a.len(), "Sub0-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_configure_options_without_will() {
        let options = configure_mqtt_options("conn-1", &endpoint(), None);
        assert_eq!(options.client_id(), "conn-1");
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 1883));
        assert_eq!(options.keep_alive(), CLIENT_KEEP_ALIVE);
        assert!(options.clean_session());
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_configure_options_with_will() {
        let will = Will::new("/test/lwt/1", Bytes::from_static(b"LWT"), QoS::ExactlyOnce, false);
        let options = configure_mqtt_options("pub-1", &endpoint(), Some(&will));

        let last_will = options.last_will().expect("will should be set");
        assert_eq!(last_will.topic, "/test/lwt/1");
        assert_eq!(&last_will.message[..], b"LWT");
        assert_eq!(last_will.qos, QoS::ExactlyOnce);
        assert!(!last_will.retain);
    }

    #[test]
    fn test_publisher_identity_builder() {
        let identity = PublisherIdentity::new("pub")
            .with_will(Will::new("/t", "gone", QoS::AtMostOnce, true));
        assert_eq!(identity.name, "pub");
        assert!(identity.will.as_ref().unwrap().retain);
    }
}
