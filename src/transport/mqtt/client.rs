//! I/O side of the client adapters
//!
//! [`AdapterCore`] owns one rumqttc client. `connect` moves its event loop onto
//! a single background task; that task is the only writer of the adapter's
//! mailboxes and stops on the first connection error or after our DISCONNECT
//! has been written. The role types wrap the core and expose only what each
//! role may do.

use super::connection::{
    configure_mqtt_options, unique_client_id, PublisherIdentity, SubscriberIdentity, Will,
    REQUEST_CAPACITY,
};
use super::message_handler::{
    ConnectOutcome, EventRoute, MessageHandler, PublishAck, ReceivedMessage, SubscribeOutcome,
};
use crate::config::BrokerEndpoint;
use crate::error::{HarnessError, HarnessResult};
use crate::wait::Mailbox;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// How long `disconnect` waits for the I/O task to write DISCONNECT
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
/// How long the I/O task gets to honor the shutdown signal before it is aborted
const SHUTDOWN_SIGNAL_TIMEOUT: Duration = Duration::from_millis(200);

/// Slots the I/O task writes into
#[derive(Debug)]
struct AdapterMailboxes {
    connect: Mailbox<ConnectOutcome>,
    message: Mailbox<ReceivedMessage>,
    subscription: Mailbox<SubscribeOutcome>,
    publish_ack: Mailbox<PublishAck>,
}

impl AdapterMailboxes {
    fn new(client_id: &str) -> Self {
        Self {
            connect: Mailbox::new(format!("{client_id}/connect")),
            message: Mailbox::new(format!("{client_id}/message")),
            subscription: Mailbox::new(format!("{client_id}/subscription")),
            publish_ack: Mailbox::new(format!("{client_id}/publish-ack")),
        }
    }
}

/// Subscription issued by the I/O task once CONNACK arrives
#[derive(Debug, Clone)]
struct SubscribeOnConnect {
    filter: String,
    qos: QoS,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Connected,
    Closed,
}

/// Shared implementation behind [`Connector`], [`Subscriber`] and [`Publisher`]
pub struct AdapterCore {
    client_id: String,
    client: AsyncClient,
    // EventLoop is Send but not Sync; the mutex keeps the adapters Sync
    event_loop: Mutex<Option<EventLoop>>,
    mailboxes: Arc<AdapterMailboxes>,
    subscribe_on_connect: Option<SubscribeOnConnect>,
    disconnect_requested: Arc<AtomicBool>,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Option<JoinHandle<()>>,
    lifecycle: Lifecycle,
}

impl AdapterCore {
    fn new(
        client_id: String,
        endpoint: &BrokerEndpoint,
        will: Option<&Will>,
        subscribe_on_connect: Option<SubscribeOnConnect>,
    ) -> Self {
        let options = configure_mqtt_options(&client_id, endpoint, will);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let mailboxes = Arc::new(AdapterMailboxes::new(&client_id));

        Self {
            client_id,
            client,
            event_loop: Mutex::new(Some(event_loop)),
            mailboxes,
            subscribe_on_connect,
            disconnect_requested: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            event_loop_handle: None,
            lifecycle: Lifecycle::Created,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Start the background I/O task; the CONNECT is sent from there
    pub fn connect(&mut self) -> HarnessResult<()> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| HarnessError::AlreadyConnected {
                client: self.client_id.clone(),
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = IoTask {
            client_id: self.client_id.clone(),
            client: self.client.clone(),
            mailboxes: self.mailboxes.clone(),
            subscribe_on_connect: self.subscribe_on_connect.clone(),
            disconnect_requested: self.disconnect_requested.clone(),
        };

        let span = crate::adapter_span!(client = %self.client_id);
        self.event_loop_handle = Some(tokio::spawn(
            task.run(event_loop, shutdown_rx).instrument(span),
        ));
        self.shutdown_tx = Some(shutdown_tx);
        self.lifecycle = Lifecycle::Connected;

        debug!(client = %self.client_id, "I/O task started");
        Ok(())
    }

    fn ensure_connected(&self) -> HarnessResult<()> {
        match self.lifecycle {
            Lifecycle::Connected => Ok(()),
            _ => Err(HarnessError::NotConnected {
                client: self.client_id.clone(),
            }),
        }
    }

    pub async fn wait_for_connect(&self, timeout: Duration) -> Option<ConnectOutcome> {
        self.mailboxes.connect.wait(timeout).await
    }

    /// Send DISCONNECT and stop the I/O task. A no-op once the adapter is closed.
    pub async fn disconnect(&mut self) -> HarnessResult<()> {
        if self.lifecycle != Lifecycle::Connected {
            debug!(client = %self.client_id, "Disconnect skipped, adapter not connected");
            self.lifecycle = Lifecycle::Closed;
            return Ok(());
        }
        self.lifecycle = Lifecycle::Closed;
        self.disconnect_requested.store(true, Ordering::SeqCst);

        // Fails if the I/O task has already stopped or its request queue is full
        if let Err(e) = self.client.try_disconnect() {
            debug!(client = %self.client_id, "DISCONNECT not queued: {}", e);
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!(client = %self.client_id, "I/O task stopped"),
                Ok(Err(e)) => warn!(client = %self.client_id, "I/O task ended with error: {}", e),
                Err(_) => {
                    warn!(client = %self.client_id, "I/O task did not stop, forcing shutdown");
                    self.force_shutdown(handle).await;
                }
            }
        }

        info!(client = %self.client_id, "Disconnected");
        Ok(())
    }

    /// Signal the I/O task, then abort it if it ignores the signal. Returns once it has ended.
    async fn force_shutdown(&self, mut handle: JoinHandle<()>) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if tokio::time::timeout(SHUTDOWN_SIGNAL_TIMEOUT, &mut handle)
            .await
            .is_ok()
        {
            return;
        }
        handle.abort();
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!(client = %self.client_id, "I/O task ended with error: {}", e);
            }
        }
    }

    /// Drop the connection without DISCONNECT.
    ///
    /// Aborting the task drops the event loop and with it the socket, so the
    /// broker sees a closed connection and publishes the will.
    pub async fn disconnect_ungracefully(&mut self) {
        self.lifecycle = Lifecycle::Closed;
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(client = %self.client_id, "I/O task ended with error: {}", e);
                }
            }
        }
        info!(client = %self.client_id, "Connection dropped without DISCONNECT");
    }
}

impl Drop for AdapterCore {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// State moved onto the background task
struct IoTask {
    client_id: String,
    client: AsyncClient,
    mailboxes: Arc<AdapterMailboxes>,
    subscribe_on_connect: Option<SubscribeOnConnect>,
    disconnect_requested: Arc<AtomicBool>,
}

impl IoTask {
    async fn run(self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        let mut acknowledged = false;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(client = %self.client_id, "Shutdown signal received");
                        break;
                    }
                }
                polled = event_loop.poll() => match polled {
                    Ok(event) => {
                        let route = MessageHandler::route_event(&event);
                        if let EventRoute::Connected(_) = route {
                            acknowledged = true;
                        }
                        if !self.handle(route) {
                            break;
                        }
                    }
                    Err(e) => {
                        if !acknowledged {
                            let outcome = MessageHandler::connect_failure(&e);
                            warn!(client = %self.client_id, outcome = ?outcome, "Connection attempt failed");
                            self.mailboxes.connect.deliver(outcome);
                        } else if self.disconnect_requested.load(Ordering::SeqCst) {
                            debug!(client = %self.client_id, "Connection closed after DISCONNECT: {}", e);
                        } else {
                            warn!(client = %self.client_id, "Connection lost: {}", e);
                        }
                        break;
                    }
                }
            }
        }

        debug!(client = %self.client_id, "I/O task exiting");
    }

    /// Act on one routed event; false stops the task
    fn handle(&self, route: EventRoute) -> bool {
        match route {
            EventRoute::Connected(outcome) => {
                let accepted = outcome.is_accepted();
                info!(client = %self.client_id, return_code = ?outcome.return_code(), "CONNACK received");
                self.mailboxes.connect.deliver(outcome);
                if accepted {
                    self.subscribe();
                }
                // rumqttc reports refusals as errors; a refused CONNACK event means the broker closes next
                accepted
            }
            EventRoute::MessageReceived(message) => {
                debug!(
                    client = %self.client_id,
                    topic = %message.topic,
                    qos = ?message.qos,
                    retain = message.retain,
                    bytes = message.payload.len(),
                    "Message received"
                );
                self.mailboxes.message.deliver(message);
                true
            }
            EventRoute::SubscriptionAcknowledged(outcome) => {
                debug!(client = %self.client_id, outcome = ?outcome, "SUBACK received");
                self.mailboxes.subscription.deliver(outcome);
                true
            }
            EventRoute::PublishCompleted(ack) => {
                debug!(client = %self.client_id, packet_id = ack.packet_id, qos = ?ack.qos, "Publish completed");
                self.mailboxes.publish_ack.deliver(ack);
                true
            }
            EventRoute::UnsubscribeAcknowledged => {
                debug!(client = %self.client_id, "UNSUBACK received");
                true
            }
            EventRoute::DisconnectSent => {
                debug!(client = %self.client_id, "DISCONNECT written");
                false
            }
            EventRoute::Infrastructure(event) => {
                debug!(client = %self.client_id, "Event: {}", event);
                true
            }
        }
    }

    fn subscribe(&self) {
        let Some(subscription) = &self.subscribe_on_connect else {
            return;
        };
        // Called from inside the poll loop, so a blocking send could deadlock
        if let Err(e) = self
            .client
            .try_subscribe(subscription.filter.clone(), subscription.qos)
        {
            warn!(client = %self.client_id, filter = %subscription.filter, "SUBSCRIBE not queued: {}", e);
            self.mailboxes
                .subscription
                .deliver(SubscribeOutcome::NotSent(e.to_string()));
        } else {
            debug!(client = %self.client_id, filter = %subscription.filter, qos = ?subscription.qos, "SUBSCRIBE queued");
        }
    }
}

/// Adapter that only connects; used to observe the CONNACK outcome
pub struct Connector {
    core: AdapterCore,
}

impl Connector {
    pub fn new(name: &str, endpoint: &BrokerEndpoint) -> Self {
        Self {
            core: AdapterCore::new(unique_client_id(name), endpoint, None, None),
        }
    }

    pub fn client_id(&self) -> &str {
        self.core.client_id()
    }

    pub fn connect(&mut self) -> HarnessResult<()> {
        self.core.connect()
    }

    pub async fn wait_for_connect(&self, timeout: Duration) -> Option<ConnectOutcome> {
        self.core.wait_for_connect(timeout).await
    }

    pub async fn disconnect(&mut self) -> HarnessResult<()> {
        self.core.disconnect().await
    }
}

/// Adapter subscribed to one filter at one QoS for its whole lifetime
pub struct Subscriber {
    identity: SubscriberIdentity,
    core: AdapterCore,
}

impl Subscriber {
    /// `identity.name` is used as a prefix; the client id gets a random suffix
    pub fn new(identity: SubscriberIdentity, endpoint: &BrokerEndpoint) -> Self {
        let subscription = SubscribeOnConnect {
            filter: identity.topic_filter.clone(),
            qos: identity.qos,
        };
        let core = AdapterCore::new(
            unique_client_id(&identity.name),
            endpoint,
            None,
            Some(subscription),
        );
        Self { identity, core }
    }

    pub fn identity(&self) -> &SubscriberIdentity {
        &self.identity
    }

    pub fn client_id(&self) -> &str {
        self.core.client_id()
    }

    pub fn connect(&mut self) -> HarnessResult<()> {
        self.core.connect()
    }

    pub async fn wait_for_connect(&self, timeout: Duration) -> Option<ConnectOutcome> {
        self.core.wait_for_connect(timeout).await
    }

    /// Wait for the SUBACK of the subscription issued after CONNACK
    pub async fn wait_for_subscription(&self, timeout: Duration) -> Option<SubscribeOutcome> {
        self.core.mailboxes.subscription.wait(timeout).await
    }

    /// Wait for the next delivered message and clear the slot
    pub async fn wait_for_message(&self, timeout: Duration) -> Option<ReceivedMessage> {
        self.core.mailboxes.message.wait(timeout).await
    }

    /// Number of deliveries that replaced an unread message
    pub fn overwritten_messages(&self) -> u64 {
        self.core.mailboxes.message.overwritten()
    }

    /// Queue an UNSUBSCRIBE for the filter; does not wait for UNSUBACK
    pub async fn unsubscribe(&self) -> HarnessResult<()> {
        self.core.ensure_connected()?;
        self.core
            .client
            .unsubscribe(self.identity.topic_filter.clone())
            .await
            .map_err(|e| {
                warn!(client = %self.core.client_id(), "UNSUBSCRIBE not queued: {}", e);
                HarnessError::request_rejected(self.core.client_id(), "UNSUBSCRIBE", e.to_string())
            })?;
        debug!(client = %self.core.client_id(), filter = %self.identity.topic_filter, "UNSUBSCRIBE queued");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> HarnessResult<()> {
        self.core.disconnect().await
    }
}

/// Adapter that publishes, optionally registering a will
pub struct Publisher {
    identity: PublisherIdentity,
    core: AdapterCore,
}

impl Publisher {
    pub fn new(identity: PublisherIdentity, endpoint: &BrokerEndpoint) -> Self {
        let core = AdapterCore::new(
            unique_client_id(&identity.name),
            endpoint,
            identity.will.as_ref(),
            None,
        );
        Self { identity, core }
    }

    pub fn identity(&self) -> &PublisherIdentity {
        &self.identity
    }

    pub fn client_id(&self) -> &str {
        self.core.client_id()
    }

    pub fn connect(&mut self) -> HarnessResult<()> {
        self.core.connect()
    }

    pub async fn wait_for_connect(&self, timeout: Duration) -> Option<ConnectOutcome> {
        self.core.wait_for_connect(timeout).await
    }

    /// Hand a publish to the client. Returns once it is queued locally.
    pub async fn publish<P: Into<Bytes>>(
        &self,
        topic: &str,
        payload: P,
        qos: QoS,
        retain: bool,
    ) -> HarnessResult<()> {
        let client_id = self.core.client_id();
        if self.core.lifecycle != Lifecycle::Connected {
            return Err(HarnessError::publish_failure(client_id, topic, "adapter not connected"));
        }

        let payload: Bytes = payload.into();
        let bytes = payload.len();
        self.core
            .client
            .publish_bytes(topic, qos, retain, payload)
            .await
            .map_err(|e| HarnessError::publish_failure(client_id, topic, e.to_string()))?;

        debug!(client = %client_id, topic = %topic, qos = ?qos, retain, bytes, "Publish queued");
        Ok(())
    }

    /// Wait for the next completed publish (send for QoS 0, PUBACK or PUBCOMP otherwise)
    pub async fn wait_for_publish_ack(&self, timeout: Duration) -> Option<PublishAck> {
        self.core.mailboxes.publish_ack.wait(timeout).await
    }

    pub async fn disconnect(&mut self) -> HarnessResult<()> {
        self.core.disconnect().await
    }

    pub async fn disconnect_ungracefully(&mut self) {
        self.core.disconnect_ungracefully().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_roles_are_send_and_sync() {
        // Scenario futures and spawned load tasks hold `&adapter` across awaits
        assert_send_sync::<AdapterCore>();
        assert_send_sync::<Connector>();
        assert_send_sync::<Subscriber>();
        assert_send_sync::<Publisher>();
    }

    async fn closed_port_endpoint() -> BrokerEndpoint {
        // Bind and drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        BrokerEndpoint {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_reports_transport_failure() {
        // Arrange
        let endpoint = closed_port_endpoint().await;
        let mut connector = Connector::new("conn", &endpoint);

        // Act
        connector.connect().unwrap();
        let outcome = connector.wait_for_connect(Duration::from_secs(2)).await;

        // Assert
        match outcome {
            Some(ConnectOutcome::TransportFailure(reason)) => assert!(!reason.is_empty()),
            other => panic!("Expected transport failure, got {other:?}"),
        }
        connector.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let endpoint = closed_port_endpoint().await;
        let mut connector = Connector::new("conn", &endpoint);

        connector.connect().unwrap();
        let second = connector.connect();

        assert!(matches!(second, Err(HarnessError::AlreadyConnected { .. })));
        connector.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let endpoint = closed_port_endpoint().await;
        let publisher = Publisher::new(PublisherIdentity::new("pub"), &endpoint);

        let result = publisher
            .publish("/test/publish/0", "x", QoS::AtMostOnce, false)
            .await;

        assert!(matches!(result, Err(HarnessError::PublishFailure { .. })));
    }

    #[tokio::test]
    async fn test_unsubscribe_before_connect_fails() {
        let endpoint = closed_port_endpoint().await;
        let subscriber = Subscriber::new(
            SubscriberIdentity::new("sub", "/test/#", QoS::AtMostOnce),
            &endpoint,
        );

        let result = subscriber.unsubscribe().await;

        assert!(matches!(result, Err(HarnessError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let endpoint = closed_port_endpoint().await;
        let mut publisher = Publisher::new(PublisherIdentity::new("pub"), &endpoint);

        assert!(publisher.disconnect().await.is_ok());
        publisher.disconnect_ungracefully().await;
    }

    #[tokio::test]
    async fn test_client_ids_are_prefixed_and_unique() {
        let endpoint = closed_port_endpoint().await;
        let a = Subscriber::new(
            SubscriberIdentity::new("Sub0", "/t", QoS::AtMostOnce),
            &endpoint,
        );
        let b = Subscriber::new(
            SubscriberIdentity::new("Sub0", "/t", QoS::AtMostOnce),
            &endpoint,
        );

        assert!(a.client_id().starts_with("Sub0-"));
        assert_ne!(a.client_id(), b.client_id());
    }
}
