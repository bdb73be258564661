//! Pure routing of rumqttc events into adapter results
//!
//! The I/O task calls [`MessageHandler::route_event`] for every polled event and
//! acts on the returned [`EventRoute`]; nothing here touches the network.

use bytes::Bytes;
use rumqttc::{
    ConnectReturnCode, ConnectionError, Event, Incoming, Outgoing, QoS, SubscribeReasonCode,
};

/// A message as delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Result of one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// CONNACK with return code 0
    Accepted { session_present: bool },
    /// CONNACK with a non-zero return code
    Refused { code: u8 },
    /// No CONNACK: TCP refused, I/O error or protocol error before the handshake finished
    TransportFailure(String),
}

impl ConnectOutcome {
    /// CONNACK return code, `None` when no CONNACK arrived
    pub fn return_code(&self) -> Option<u8> {
        match self {
            ConnectOutcome::Accepted { .. } => Some(0),
            ConnectOutcome::Refused { code } => Some(*code),
            ConnectOutcome::TransportFailure(_) => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ConnectOutcome::Accepted { .. })
    }
}

/// Result of the subscription a subscriber issues after CONNACK
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Granted(QoS),
    Rejected,
    /// The SUBSCRIBE request never reached the wire
    NotSent(String),
}

/// A publish that completed its QoS flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub packet_id: u16,
    pub qos: QoS,
}

/// What the I/O task should do with a polled event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    Connected(ConnectOutcome),
    MessageReceived(ReceivedMessage),
    SubscriptionAcknowledged(SubscribeOutcome),
    PublishCompleted(PublishAck),
    UnsubscribeAcknowledged,
    /// Our DISCONNECT was written; the task can stop
    DisconnectSent,
    /// PINGRESP, PUBREC and other flow-control traffic
    Infrastructure(String),
}

/// Stateless event router
pub struct MessageHandler;

impl MessageHandler {
    /// Map one event to the adapter-level result it produces
    pub fn route_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Incoming::ConnAck(connack) => {
                    EventRoute::Connected(match connack.code {
                        ConnectReturnCode::Success => ConnectOutcome::Accepted {
                            session_present: connack.session_present,
                        },
                        code => ConnectOutcome::Refused {
                            code: return_code_value(code),
                        },
                    })
                }
                Incoming::Publish(publish) => EventRoute::MessageReceived(ReceivedMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: publish.qos,
                    retain: publish.retain,
                }),
                Incoming::SubAck(suback) => {
                    EventRoute::SubscriptionAcknowledged(match suback.return_codes.first() {
                        Some(SubscribeReasonCode::Success(qos)) => SubscribeOutcome::Granted(*qos),
                        _ => SubscribeOutcome::Rejected,
                    })
                }
                Incoming::PubAck(puback) => EventRoute::PublishCompleted(PublishAck {
                    packet_id: puback.pkid,
                    qos: QoS::AtLeastOnce,
                }),
                Incoming::PubComp(pubcomp) => EventRoute::PublishCompleted(PublishAck {
                    packet_id: pubcomp.pkid,
                    qos: QoS::ExactlyOnce,
                }),
                Incoming::UnsubAck(_) => EventRoute::UnsubscribeAcknowledged,
                other => EventRoute::Infrastructure(format!("{other:?}")),
            },
            // QoS 0 publishes carry packet id 0 and complete once written
            Event::Outgoing(Outgoing::Publish(0)) => EventRoute::PublishCompleted(PublishAck {
                packet_id: 0,
                qos: QoS::AtMostOnce,
            }),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(other) => EventRoute::Infrastructure(format!("{other:?}")),
        }
    }

    /// Outcome for a connection error that happened before any CONNACK
    pub fn connect_failure(error: &ConnectionError) -> ConnectOutcome {
        match error {
            ConnectionError::ConnectionRefused(code) => ConnectOutcome::Refused {
                code: return_code_value(*code),
            },
            other => ConnectOutcome::TransportFailure(other.to_string()),
        }
    }
}

/// Numeric CONNACK return code
pub fn return_code_value(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}
