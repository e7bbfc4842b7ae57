//! In-memory XMPP transport for unit tests.
//!
//! `MockTransport` records every call in a shared `Mutex<Vec<..>>` and
//! replays events pushed through its `MockRemote`. A successful `connect`
//! scripts the usual `Authenticated` + `SessionStart` pair, and `join_room`
//! answers according to the configured [`JoinBehavior`].
//! With `hang_on_send` set, group message writes never complete, the way a
//! stalled socket behaves.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_xmpp::parsers::BareJid;

use crate::common::error::{TransportError, TransportResult};

use super::transport::{Extension, TransportEvent, XmppTransport};

/// How the mock answers room joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinBehavior {
    /// Echo self-presence right away.
    Confirm,
    /// Answer with an error presence carrying this reason.
    Reject(String),
    /// Never answer.
    Ignore,
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    FetchRoster,
    SendPresence,
    RegisterExtensions(Vec<Extension>),
    JoinRoom { room: BareJid, nick: String },
    GroupMessage { room: BareJid, body: String },
    Disconnect,
}

pub struct MockTransport {
    join: JoinBehavior,
    scripted: VecDeque<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
    connected: bool,
    /// When `true`, `connect` fails.
    pub should_fail: bool,
    /// When `true`, `send_group_message` records the call and never returns.
    pub hang_on_send: bool,
}

/// Test-side controller for a [`MockTransport`].
#[derive(Clone)]
pub struct MockRemote {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl MockTransport {
    pub fn new(join: JoinBehavior) -> (Self, MockRemote) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let transport = Self {
            join,
            scripted: VecDeque::new(),
            events_rx,
            calls: Arc::clone(&calls),
            connected: false,
            should_fail: false,
            hang_on_send: false,
        };
        (transport, MockRemote { events_tx, calls })
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn require_connected(&self) -> TransportResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl MockRemote {
    /// Inject an event as if it arrived from the server.
    pub fn push(&self, event: TransportEvent) {
        self.events_tx.send(event).unwrap();
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Bodies sent to `room`, in order.
    pub fn sent_to(&self, room: &str) -> Vec<String> {
        let room: BareJid = room.parse().unwrap();
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::GroupMessage { room: r, body } if r == room => Some(body),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl XmppTransport for MockTransport {
    async fn connect(&mut self) -> TransportResult<()> {
        self.record(TransportCall::Connect);
        if self.should_fail {
            return Err(TransportError::SendFailed {
                message: "connection refused".to_string(),
            });
        }
        self.connected = true;
        self.scripted.push_back(TransportEvent::Authenticated {
            bound_jid: "bridge@example.com/mock".to_string(),
        });
        self.scripted.push_back(TransportEvent::SessionStart);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.scripted.pop_front() {
            return Some(event);
        }
        let event = self.events_rx.recv().await;
        if matches!(event, Some(TransportEvent::Disconnected { .. }) | None) {
            self.connected = false;
        }
        event
    }

    async fn fetch_roster(&mut self) -> TransportResult<()> {
        self.require_connected()?;
        self.record(TransportCall::FetchRoster);
        Ok(())
    }

    async fn send_presence(&mut self) -> TransportResult<()> {
        self.require_connected()?;
        self.record(TransportCall::SendPresence);
        Ok(())
    }

    async fn register_extensions(&mut self, extensions: &[Extension]) -> TransportResult<()> {
        self.record(TransportCall::RegisterExtensions(extensions.to_vec()));
        Ok(())
    }

    async fn join_room(&mut self, room: &BareJid, nick: &str) -> TransportResult<()> {
        self.require_connected()?;
        self.record(TransportCall::JoinRoom {
            room: room.clone(),
            nick: nick.to_string(),
        });

        match &self.join {
            JoinBehavior::Confirm => self.scripted.push_back(TransportEvent::RoomJoined {
                room: room.clone(),
            }),
            JoinBehavior::Reject(reason) => {
                self.scripted.push_back(TransportEvent::RoomJoinFailed {
                    room: room.clone(),
                    reason: reason.clone(),
                })
            }
            JoinBehavior::Ignore => {}
        }
        Ok(())
    }

    async fn send_group_message(&mut self, room: &BareJid, body: &str) -> TransportResult<()> {
        self.require_connected()?;
        self.record(TransportCall::GroupMessage {
            room: room.clone(),
            body: body.to_string(),
        });
        if self.hang_on_send {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.record(TransportCall::Disconnect);
        self.connected = false;
        self.scripted.clear();
        Ok(())
    }
}
