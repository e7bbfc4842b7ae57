//! `XmppTransport` over tokio-xmpp.
//!
//! Stream negotiation, TLS and SASL are left to tokio-xmpp. This adapter
//! only turns stanzas into [`TransportEvent`]s and answers the iq requests
//! of the extensions the session registered.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_xmpp::parsers::BareJid;
use tokio_xmpp::{AsyncClient, Element, Event};
use tracing::{debug, info, warn};

use crate::common::error::{TransportError, TransportResult};

use super::stanza::{self, ns, InboundIq};
use super::transport::{Extension, TransportEvent, XmppTransport};

/// Real XMPP client transport.
pub struct TokioXmppTransport {
    jid: String,
    password: String,
    client: Option<AsyncClient>,
    pending: VecDeque<TransportEvent>,
    extensions: Vec<Extension>,
    next_id: u64,
}

impl TokioXmppTransport {
    pub fn new(jid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            password: password.into(),
            client: None,
            pending: VecDeque::new(),
            extensions: Vec::new(),
            next_id: 0,
        }
    }

    fn client(&mut self) -> TransportResult<&mut AsyncClient> {
        self.client.as_mut().ok_or(TransportError::NotConnected)
    }

    async fn send(&mut self, stanza: Element) -> TransportResult<()> {
        self.client()?
            .send_stanza(stanza)
            .await
            .map_err(|e| TransportError::SendFailed {
                message: e.to_string(),
            })
    }

    fn request_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Turn one stanza into an event, answering iq requests on the way.
    async fn handle_stanza(&mut self, el: Element) -> Option<TransportEvent> {
        let kind = el.name().to_string();
        match kind.as_str() {
            "message" => stanza::parse_group_message(el).map(TransportEvent::GroupMessage),
            "presence" => stanza::parse_join_outcome(el),
            "iq" => {
                match stanza::parse_iq(el)? {
                    InboundIq::Roster { items } => debug!(items, "Roster received"),
                    request => {
                        if let Err(e) = self.answer(request).await {
                            warn!("Failed to answer iq request: {}", e);
                        }
                    }
                }
                None
            }
            _ => None,
        }
    }

    async fn answer(&mut self, request: InboundIq) -> TransportResult<()> {
        match request {
            InboundIq::Ping { from, id } if self.extensions.contains(&Extension::Ping) => {
                self.send(stanza::iq_result(from, &id)).await
            }
            InboundIq::DiscoInfo { from, id }
                if self.extensions.contains(&Extension::ServiceDiscovery) =>
            {
                let mut features = vec![ns::DISCO_INFO];
                if self.extensions.contains(&Extension::MultiUserChat) {
                    features.push(ns::MUC);
                }
                if self.extensions.contains(&Extension::Ping) {
                    features.push(ns::PING);
                }
                self.send(stanza::disco_info_result(from, &id, &features)).await
            }
            other => {
                debug!(?other, "Ignoring iq request for unregistered extension");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl XmppTransport for TokioXmppTransport {
    async fn connect(&mut self) -> TransportResult<()> {
        let jid: BareJid = self.jid.parse().map_err(|e| TransportError::InvalidJid {
            jid: self.jid.clone(),
            message: format!("{}", e),
        })?;

        let mut client = AsyncClient::new(jid, self.password.clone());
        client.set_reconnect(false);

        self.client = Some(client);
        self.pending.clear();
        self.extensions.clear();
        info!(jid = %self.jid, "XMPP stream opening");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let event = self.client.as_mut()?.next().await;
            match event {
                Some(Event::Online { bound_jid, .. }) => {
                    self.pending.push_back(TransportEvent::Authenticated {
                        bound_jid: bound_jid.to_string(),
                    });
                    self.pending.push_back(TransportEvent::SessionStart);
                }
                Some(Event::Disconnected(e)) => {
                    self.client = None;
                    return Some(TransportEvent::Disconnected {
                        reason: e.to_string(),
                    });
                }
                Some(Event::Stanza(el)) => {
                    if let Some(event) = self.handle_stanza(el).await {
                        return Some(event);
                    }
                }
                None => {
                    self.client = None;
                    return Some(TransportEvent::Disconnected {
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }

    async fn fetch_roster(&mut self) -> TransportResult<()> {
        let id = self.request_id("roster");
        self.send(stanza::roster_query(&id)).await
    }

    async fn send_presence(&mut self) -> TransportResult<()> {
        self.send(stanza::presence()).await
    }

    async fn register_extensions(&mut self, extensions: &[Extension]) -> TransportResult<()> {
        for extension in extensions {
            if !self.extensions.contains(extension) {
                debug!(?extension, "Registered extension");
                self.extensions.push(*extension);
            }
        }
        Ok(())
    }

    async fn join_room(&mut self, room: &BareJid, nick: &str) -> TransportResult<()> {
        let presence = stanza::join_presence(room, nick)?;
        self.send(presence).await
    }

    async fn send_group_message(&mut self, room: &BareJid, body: &str) -> TransportResult<()> {
        self.send(stanza::group_message(room, body)).await
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        let Some(mut client) = self.client.take() else {
            return Ok(());
        };
        self.pending.clear();
        client.send_end().await.map_err(|e| TransportError::SendFailed {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_jid_rejected() {
        let mut transport = TokioXmppTransport::new("", "secret");

        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidJid { .. }));
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let mut transport = TokioXmppTransport::new("bridge@example.com", "secret");

        let err = transport
            .send_group_message(&"team@conf.example.com".parse().unwrap(), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(transport.next_event().await.is_none());
        assert!(transport.disconnect().await.is_ok());
    }
}
