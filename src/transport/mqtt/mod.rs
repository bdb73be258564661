//! Client adapters around the rumqttc asynchronous client
//!
//! - [`connection`] - pure identity, QoS and option handling
//! - [`message_handler`] - pure routing of client events into adapter results
//! - [`client`] - the background I/O task and the three adapter roles
//!
//! # Usage
//!
//! ```rust,no_run
//! use broker_itest::config::BrokerEndpoint;
//! use broker_itest::transport::mqtt::{Subscriber, SubscriberIdentity};
//! use rumqttc::QoS;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let endpoint = BrokerEndpoint { host: "127.0.0.1".to_string(), port: 1883 };
//! let mut subscriber = Subscriber::new(
//!     SubscriberIdentity::new("Sub0", "/test/publish/#", QoS::AtLeastOnce),
//!     &endpoint,
//! );
//! subscriber.connect()?;
//! subscriber.wait_for_subscription(Duration::from_secs(2)).await;
//! if let Some(message) = subscriber.wait_for_message(Duration::from_secs(2)).await {
//!     println!("{} at {:?}", message.topic, message.qos);
//! }
//! subscriber.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{Connector, Publisher, Subscriber};
pub use connection::{
    effective_qos, qos_from_level, qos_level, unique_client_id, PublisherIdentity,
    SubscriberIdentity, Will,
};
pub use message_handler::{
    ConnectOutcome, EventRoute, MessageHandler, PublishAck, ReceivedMessage, SubscribeOutcome,
};
