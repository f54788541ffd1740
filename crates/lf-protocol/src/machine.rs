//! Pure graphql-ws handshake and subscription state machine.
//!
//! Every input returns a [`Step`]: the frames to send, in order, followed by
//! the events to publish, in order. The machine never performs IO and is
//! owned by exactly one receive loop.

use std::time::Duration;

use lf_config::ErrorFramePolicy;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::descriptor::ConnectionDescriptor;
use crate::frame::{self, FrameKind, InboundFrame, SubscriptionRequest};
use crate::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Idle,
    Connecting,
    AwaitingAck,
    AckReceived,
    SubscriptionPending,
    Streaming,
    /// Normal termination.
    Closed,
    /// Error path termination.
    Failed,
}

impl ProtocolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProtocolState::Closed | ProtocolState::Failed)
    }

    /// A `start` has been sent on this connection.
    pub fn is_subscribed(self) -> bool {
        matches!(self, ProtocolState::SubscriptionPending | ProtocolState::Streaming)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Server sent `complete` for the subscription.
    Completed,
    /// Server sent `connection_error`.
    ConnectionError { payload: Option<Value> },
    /// `error` frame received while the close-on-error policy is active.
    ErrorFrame { payload: Option<Value> },
    /// The socket closed without a protocol-level goodbye.
    PeerClosed,
    Transport { message: String },
    SendFailed { message: String },
    Protocol { message: String },
}

impl DisconnectReason {
    /// `complete` or a peer close; anything else is an error path.
    pub fn is_clean(&self) -> bool {
        matches!(self, DisconnectReason::Completed | DisconnectReason::PeerClosed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// Socket open and `connection_init` sent.
    Connected,
    /// `connection_ack` received.
    Acknowledged,
    /// `start` sent with this correlation id.
    SubscriptionStarted { id: String },
    /// `start_ack` received, or the first `data` frame arrived without one.
    Streaming { id: String },
    /// `payload.data` of a `data` frame, still nested as the server sent it.
    Data { id: String, payload: Value },
    /// Server-reported per-operation error.
    SubscriptionError {
        id: Option<String>,
        payload: Option<Value>,
    },
    /// No frame at all (not even `ka`) for `silent_for`.
    Stalled { silent_for: Duration },
    Disconnected { reason: DisconnectReason },
}

/// Output of one machine input: frames to send first, then events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    pub outbound: Vec<String>,
    pub events: Vec<ProtocolEvent>,
}

impl Step {
    fn event(event: ProtocolEvent) -> Self {
        Self {
            outbound: Vec::new(),
            events: vec![event],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty()
    }
}

pub struct ProtocolMachine {
    descriptor: ConnectionDescriptor,
    request: SubscriptionRequest,
    error_policy: ErrorFramePolicy,
    state: ProtocolState,
    subscription_id: Option<String>,
}

impl ProtocolMachine {
    pub fn new(
        descriptor: ConnectionDescriptor,
        request: SubscriptionRequest,
        error_policy: ErrorFramePolicy,
    ) -> Self {
        Self {
            descriptor,
            request,
            error_policy,
            state: ProtocolState::Idle,
            subscription_id: None,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Correlation id of the `start` sent on this connection, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// `Idle -> Connecting`. Returns the URI to open.
    pub fn begin_connect(&mut self) -> Result<String, ProtocolError> {
        self.require(ProtocolState::Idle, "begin_connect")?;
        let uri = self.descriptor.websocket_uri()?;
        self.state = ProtocolState::Connecting;
        Ok(uri)
    }

    /// `Connecting -> AwaitingAck`: send `connection_init`.
    pub fn on_open(&mut self) -> Result<Step, ProtocolError> {
        self.require(ProtocolState::Connecting, "on_open")?;
        let init = frame::encode_connection_init(&self.descriptor)?;
        self.state = ProtocolState::AwaitingAck;
        Ok(Step {
            outbound: vec![init],
            events: vec![ProtocolEvent::Connected],
        })
    }

    /// The socket could not be opened (or `connection_init` not sent).
    pub fn on_connect_failed(&mut self) {
        self.state = ProtocolState::Failed;
    }

    /// Classify and apply one inbound text frame. Malformed or unknown
    /// frames are logged and produce an empty step.
    pub fn on_text(&mut self, text: &str) -> Step {
        match InboundFrame::decode(text) {
            Ok(frame) => self.on_frame(frame),
            Err(e) => {
                debug!(error = %e, "skipping inbound frame");
                Step::default()
            }
        }
    }

    pub fn on_frame(&mut self, frame: InboundFrame) -> Step {
        if self.state.is_terminal() {
            debug!(kind = frame.kind.as_str(), state = ?self.state, "frame after termination ignored");
            return Step::default();
        }
        match frame.kind {
            FrameKind::ConnectionAck => self.on_ack(),
            FrameKind::StartAck => self.on_start_ack(frame.id.as_deref()),
            FrameKind::KeepAlive => Step::default(),
            FrameKind::Data => self.on_data(frame.id.as_deref(), frame.payload),
            FrameKind::Error => self.on_error(frame.id, frame.payload),
            FrameKind::Complete => {
                if !self.owns(frame.id.as_deref()) {
                    debug!(id = ?frame.id, "complete for foreign subscription ignored");
                    return Step::default();
                }
                info!("subscription completed by server");
                self.close_with(DisconnectReason::Completed)
            }
            FrameKind::ConnectionError => {
                warn!(payload = ?frame.payload, "connection_error from server");
                self.close_with(DisconnectReason::ConnectionError {
                    payload: frame.payload,
                })
            }
        }
    }

    /// The transport ended. A clean end (`None` from receive) closes, a
    /// broken one fails. No-op once terminal.
    pub fn on_transport_closed(&mut self, error: Option<String>) -> Step {
        match error {
            None => {
                if self.state.is_terminal() {
                    return Step::default();
                }
                self.close_with(DisconnectReason::PeerClosed)
            }
            Some(message) => self.fail(DisconnectReason::Transport { message }),
        }
    }

    /// Enter `Failed` with `reason`. No-op once terminal.
    pub fn fail(&mut self, reason: DisconnectReason) -> Step {
        if self.state.is_terminal() {
            return Step::default();
        }
        self.state = ProtocolState::Failed;
        Step::event(ProtocolEvent::Disconnected { reason })
    }

    /// Local cancellation: enter `Closed` without emitting events. Returns a
    /// `stop` frame to send when a subscription is active.
    pub fn cancel(&mut self) -> Option<String> {
        let stop = if self.state.is_subscribed() {
            self.subscription_id
                .as_deref()
                .and_then(|id| frame::encode_stop(id).ok())
        } else {
            None
        };
        if !self.state.is_terminal() {
            self.state = ProtocolState::Closed;
        }
        stop
    }

    fn on_ack(&mut self) -> Step {
        if self.state != ProtocolState::AwaitingAck {
            debug!(state = ?self.state, "duplicate connection_ack ignored");
            return Step::default();
        }
        self.state = ProtocolState::AckReceived;
        let mut step = Step::event(ProtocolEvent::Acknowledged);

        let id = Uuid::new_v4().to_string();
        match frame::encode_start(&self.descriptor, &id, &self.request) {
            Ok(start) => {
                step.outbound.push(start);
                self.state = ProtocolState::SubscriptionPending;
                self.subscription_id = Some(id.clone());
                info!(subscription_id = %id, "subscription start sent");
                step.events.push(ProtocolEvent::SubscriptionStarted { id });
            }
            Err(e) => {
                self.state = ProtocolState::Failed;
                step.events.push(ProtocolEvent::Disconnected {
                    reason: DisconnectReason::Protocol {
                        message: e.to_string(),
                    },
                });
            }
        }
        step
    }

    fn on_start_ack(&mut self, id: Option<&str>) -> Step {
        if self.state != ProtocolState::SubscriptionPending || !self.owns(id) {
            debug!(state = ?self.state, ?id, "start_ack ignored");
            return Step::default();
        }
        self.enter_streaming()
    }

    fn on_data(&mut self, id: Option<&str>, payload: Option<Value>) -> Step {
        if !self.state.is_subscribed() || !self.owns(id) {
            debug!(state = ?self.state, ?id, "data frame ignored");
            return Step::default();
        }
        let mut step = if self.state == ProtocolState::SubscriptionPending {
            self.enter_streaming()
        } else {
            Step::default()
        };
        let Some(sub_id) = self.subscription_id.clone() else {
            return step;
        };

        let Some(Value::Object(mut body)) = payload else {
            debug!("data frame without object payload");
            return step;
        };
        match body.remove("data") {
            Some(Value::Null) | None => {}
            Some(data) => step.events.push(ProtocolEvent::Data {
                id: sub_id.clone(),
                payload: data,
            }),
        }
        match body.remove("errors") {
            Some(Value::Null) | None => {}
            Some(errors) => {
                warn!(subscription_id = %sub_id, "data frame carried graphql errors");
                step.events.push(ProtocolEvent::SubscriptionError {
                    id: Some(sub_id),
                    payload: Some(errors),
                });
            }
        }
        step
    }

    fn on_error(&mut self, id: Option<String>, payload: Option<Value>) -> Step {
        if id.is_some() && !self.owns(id.as_deref()) {
            debug!(?id, "error for foreign subscription ignored");
            return Step::default();
        }
        warn!(?id, ?payload, policy = ?self.error_policy, "subscription error frame");
        let mut step = Step::event(ProtocolEvent::SubscriptionError {
            id,
            payload: payload.clone(),
        });
        if self.error_policy == ErrorFramePolicy::Close {
            if let Some(stop) = self.cancel() {
                step.outbound.push(stop);
            }
            self.state = ProtocolState::Closed;
            step.events.push(ProtocolEvent::Disconnected {
                reason: DisconnectReason::ErrorFrame { payload },
            });
        }
        step
    }

    fn enter_streaming(&mut self) -> Step {
        self.state = ProtocolState::Streaming;
        match &self.subscription_id {
            Some(id) => Step::event(ProtocolEvent::Streaming { id: id.clone() }),
            None => Step::default(),
        }
    }

    fn close_with(&mut self, reason: DisconnectReason) -> Step {
        self.state = ProtocolState::Closed;
        Step::event(ProtocolEvent::Disconnected { reason })
    }

    /// Frames without an id are addressed to the connection and accepted.
    fn owns(&self, id: Option<&str>) -> bool {
        match (id, self.subscription_id.as_deref()) {
            (None, _) => true,
            (Some(theirs), Some(ours)) => theirs == ours,
            (Some(_), None) => false,
        }
    }

    fn require(&self, expected: ProtocolState, op: &'static str) -> Result<(), ProtocolError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                op,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn machine(policy: ErrorFramePolicy) -> ProtocolMachine {
        ProtocolMachine::new(
            ConnectionDescriptor::new("rt.example.com", "tok", "https://data.example.com"),
            SubscriptionRequest::new("subscription { marketLineUpdate { leagueId } }"),
            policy,
        )
    }

    /// Drive to `SubscriptionPending`, returning the subscription id.
    fn subscribed(m: &mut ProtocolMachine) -> String {
        m.begin_connect().unwrap();
        m.on_open().unwrap();
        let step = m.on_text(r#"{"type":"connection_ack"}"#);
        assert_eq!(step.outbound.len(), 1);
        m.subscription_id().unwrap().to_string()
    }

    #[test]
    fn open_sends_connection_init_and_awaits_ack() {
        let mut m = machine(ErrorFramePolicy::Continue);
        let uri = m.begin_connect().unwrap();
        assert!(uri.starts_with("wss://rt.example.com/graphql/realtime?"));
        assert_eq!(m.state(), ProtocolState::Connecting);

        let step = m.on_open().unwrap();
        assert_eq!(m.state(), ProtocolState::AwaitingAck);
        assert!(step.outbound[0].contains("\"connection_init\""));
        assert_eq!(step.events, vec![ProtocolEvent::Connected]);
    }

    #[test]
    fn ack_sends_single_start_with_fresh_id() {
        let mut m = machine(ErrorFramePolicy::Continue);
        m.begin_connect().unwrap();
        m.on_open().unwrap();
        let step = m.on_text(r#"{"type":"connection_ack","payload":{"connectionTimeoutMs":300000}}"#);

        assert_eq!(m.state(), ProtocolState::SubscriptionPending);
        let id = m.subscription_id().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());
        let (sent_id, _) = frame::decode_start(&step.outbound[0]).unwrap();
        assert_eq!(sent_id, id);
        assert_eq!(
            step.events,
            vec![
                ProtocolEvent::Acknowledged,
                ProtocolEvent::SubscriptionStarted { id }
            ]
        );
    }

    #[test]
    fn duplicate_ack_is_ignored() {
        let mut m = machine(ErrorFramePolicy::Continue);
        subscribed(&mut m);
        assert!(m.on_text(r#"{"type":"connection_ack"}"#).is_empty());
        assert_eq!(m.state(), ProtocolState::SubscriptionPending);
    }

    #[test]
    fn start_ack_enters_streaming() {
        let mut m = machine(ErrorFramePolicy::Continue);
        let id = subscribed(&mut m);
        let step = m.on_text(&format!(r#"{{"type":"start_ack","id":"{id}"}}"#));
        assert_eq!(m.state(), ProtocolState::Streaming);
        assert_eq!(step.events, vec![ProtocolEvent::Streaming { id }]);
    }

    #[test]
    fn data_before_start_ack_implies_streaming() {
        let mut m = machine(ErrorFramePolicy::Continue);
        let id = subscribed(&mut m);
        let step = m.on_text(&format!(
            r#"{{"type":"data","id":"{id}","payload":{{"data":{{"marketLineUpdate":null}}}}}}"#
        ));
        assert_eq!(m.state(), ProtocolState::Streaming);
        assert_eq!(
            step.events,
            vec![
                ProtocolEvent::Streaming { id: id.clone() },
                ProtocolEvent::Data {
                    id,
                    payload: json!({ "marketLineUpdate": null })
                }
            ]
        );
    }

    #[test]
    fn data_for_foreign_id_is_ignored() {
        let mut m = machine(ErrorFramePolicy::Continue);
        subscribed(&mut m);
        let step = m.on_text(r#"{"type":"data","id":"someone-else","payload":{"data":{}}}"#);
        assert!(step.is_empty());
        assert_eq!(m.state(), ProtocolState::SubscriptionPending);
    }

    #[test]
    fn data_with_graphql_errors_reports_both() {
        let mut m = machine(ErrorFramePolicy::Continue);
        let id = subscribed(&mut m);
        m.on_text(&format!(r#"{{"type":"start_ack","id":"{id}"}}"#));
        let step = m.on_text(&format!(
            r#"{{"type":"data","id":"{id}","payload":{{"data":{{"x":1}},"errors":[{{"message":"partial"}}]}}}}"#
        ));
        assert_eq!(step.events.len(), 2);
        assert!(matches!(step.events[0], ProtocolEvent::Data { .. }));
        assert!(matches!(step.events[1], ProtocolEvent::SubscriptionError { .. }));
    }

    #[test]
    fn error_frame_under_close_policy_stops_and_closes() {
        let mut m = machine(ErrorFramePolicy::Close);
        let id = subscribed(&mut m);
        let step = m.on_text(&format!(r#"{{"type":"error","id":"{id}","payload":{{"errors":[]}}}}"#));
        assert_eq!(m.state(), ProtocolState::Closed);
        assert_eq!(step.outbound, vec![format!(r#"{{"type":"stop","id":"{id}"}}"#)]);
        assert!(matches!(
            step.events.last(),
            Some(ProtocolEvent::Disconnected {
                reason: DisconnectReason::ErrorFrame { .. }
            })
        ));
    }

    #[test]
    fn connection_error_closes_from_any_live_state() {
        let mut m = machine(ErrorFramePolicy::Continue);
        m.begin_connect().unwrap();
        m.on_open().unwrap();
        let step = m.on_text(r#"{"type":"connection_error","payload":{"errors":[{"errorType":"UnauthorizedException"}]}}"#);
        assert_eq!(m.state(), ProtocolState::Closed);
        assert!(matches!(
            step.events[0],
            ProtocolEvent::Disconnected {
                reason: DisconnectReason::ConnectionError { .. }
            }
        ));
    }

    #[test]
    fn transport_end_and_failures_after_close_are_silent() {
        let mut m = machine(ErrorFramePolicy::Continue);
        subscribed(&mut m);
        let step = m.on_transport_closed(None);
        assert_eq!(m.state(), ProtocolState::Closed);
        assert_eq!(step.events.len(), 1);

        assert!(m.on_transport_closed(None).is_empty());
        assert!(m.fail(DisconnectReason::PeerClosed).is_empty());
        assert!(m.on_text(r#"{"type":"connection_ack"}"#).is_empty());
    }

    #[test]
    fn broken_transport_fails() {
        let mut m = machine(ErrorFramePolicy::Continue);
        subscribed(&mut m);
        let step = m.on_transport_closed(Some("reset by peer".to_string()));
        assert_eq!(m.state(), ProtocolState::Failed);
        assert!(matches!(
            &step.events[0],
            ProtocolEvent::Disconnected { reason: DisconnectReason::Transport { message } } if message == "reset by peer"
        ));
    }

    #[test]
    fn cancel_returns_stop_only_when_subscribed() {
        let mut idle = machine(ErrorFramePolicy::Continue);
        assert!(idle.cancel().is_none());
        assert_eq!(idle.state(), ProtocolState::Closed);

        let mut m = machine(ErrorFramePolicy::Continue);
        let id = subscribed(&mut m);
        assert_eq!(m.cancel(), Some(format!(r#"{{"type":"stop","id":"{id}"}}"#)));
        assert_eq!(m.state(), ProtocolState::Closed);
    }

    #[test]
    fn open_out_of_order_is_rejected() {
        let mut m = machine(ErrorFramePolicy::Continue);
        assert!(matches!(
            m.on_open(),
            Err(ProtocolError::InvalidState { op: "on_open", state: ProtocolState::Idle })
        ));
    }
}
