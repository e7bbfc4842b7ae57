//! Builders and parsers for the stanzas the bridge exchanges.
//!
//! Everything here is pure: elements in, events out. Addresses go through
//! `BareJid`/`Jid`, so room names come out normalized the same way the
//! server normalizes them.

use tokio_xmpp::parsers::delay::Delay;
use tokio_xmpp::parsers::disco::{DiscoInfoQuery, DiscoInfoResult, Feature, Identity};
use tokio_xmpp::parsers::iq::{Iq, IqType};
use tokio_xmpp::parsers::message::{Message, MessageType};
use tokio_xmpp::parsers::muc::muc::History;
use tokio_xmpp::parsers::muc::user::Status;
use tokio_xmpp::parsers::muc::{Muc, MucUser};
use tokio_xmpp::parsers::ping::Ping;
use tokio_xmpp::parsers::presence::{Presence, Type as PresenceType};
use tokio_xmpp::parsers::roster::Roster;
use tokio_xmpp::parsers::stanza_error::StanzaError;
use tokio_xmpp::parsers::{BareJid, Jid};
use tokio_xmpp::Element;

use crate::common::error::{TransportError, TransportResult};
use crate::common::MucMessage;

use super::transport::TransportEvent;

pub use tokio_xmpp::parsers::ns;

/// Presence that joins `room` as `nick`, without history replay.
pub fn join_presence(room: &BareJid, nick: &str) -> TransportResult<Element> {
    let occupant = room
        .with_resource_str(nick)
        .map_err(|e| TransportError::InvalidJid {
            jid: format!("{}/{}", room, nick),
            message: e.to_string(),
        })?;
    let muc = Muc::new().with_history(History::new().with_maxstanzas(0));

    Ok(Presence::new(PresenceType::None)
        .with_to(occupant)
        .with_payload(muc)
        .into())
}

pub fn group_message(room: &BareJid, body: &str) -> Element {
    Message::groupchat(Jid::from(room.clone()))
        .with_body(String::new(), body.to_string())
        .into()
}

pub fn roster_query(id: &str) -> Element {
    Iq::from_get(
        id,
        Roster {
            ver: None,
            items: Vec::new(),
        },
    )
    .into()
}

/// Initial available presence.
pub fn presence() -> Element {
    Presence::available().into()
}

/// Empty result answering an iq `get`.
pub fn iq_result(to: Jid, id: &str) -> Element {
    Iq::empty_result(to, id).into()
}

/// disco#info answer advertising the given features.
pub fn disco_info_result(to: Jid, id: &str, features: &[&str]) -> Element {
    let info = DiscoInfoResult {
        node: None,
        identities: vec![Identity {
            category: "client".to_string(),
            type_: "bot".to_string(),
            lang: None,
            name: Some("mucbridge".to_string()),
        }],
        features: features.iter().map(|var| Feature::new(*var)).collect(),
        extensions: Vec::new(),
    };
    Iq::from_result(id, Some(info)).with_to(to).into()
}

/// An iq the transport acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundIq {
    Ping { from: Jid, id: String },
    DiscoInfo { from: Jid, id: String },
    Roster { items: usize },
}

pub fn parse_iq(el: Element) -> Option<InboundIq> {
    let iq = Iq::try_from(el).ok()?;

    match iq.payload {
        IqType::Get(payload) => {
            let from = iq.from?;
            if Ping::try_from(payload.clone()).is_ok() {
                Some(InboundIq::Ping { from, id: iq.id })
            } else if DiscoInfoQuery::try_from(payload).is_ok() {
                Some(InboundIq::DiscoInfo { from, id: iq.id })
            } else {
                None
            }
        }
        IqType::Result(Some(payload)) => Roster::try_from(payload)
            .ok()
            .map(|roster| InboundIq::Roster {
                items: roster.items.len(),
            }),
        _ => None,
    }
}

/// Parse a live groupchat message.
///
/// Delayed-delivery history, errors and body-less messages yield `None`.
/// Messages from the room itself carry an empty sender nickname.
pub fn parse_group_message(el: Element) -> Option<MucMessage> {
    let message = Message::try_from(el).ok()?;
    if message.type_ != MessageType::Groupchat {
        return None;
    }
    if message
        .payloads
        .iter()
        .any(|payload| Delay::try_from(payload.clone()).is_ok())
    {
        return None;
    }

    let (_, body) = message.get_best_body(Vec::new())?;
    let from = message.from.as_ref()?;

    Some(MucMessage {
        sender_nickname: from.resource_str().unwrap_or_default().to_string(),
        body: body.0.clone(),
        room: from.to_bare(),
    })
}

/// Interpret a room presence as a join outcome.
///
/// Only a presence carrying status 110 confirms our own join. An occupant
/// that merely shares our nickname does not.
pub fn parse_join_outcome(el: Element) -> Option<TransportEvent> {
    let presence = Presence::try_from(el).ok()?;
    let room = presence.from.as_ref()?.to_bare();

    match presence.type_ {
        PresenceType::Error => {
            let reason = presence
                .payloads
                .into_iter()
                .find_map(|payload| StanzaError::try_from(payload).ok())
                .map(|error| Element::from(error.defined_condition).name().to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            Some(TransportEvent::RoomJoinFailed { room, reason })
        }
        PresenceType::None => {
            let self_presence = presence
                .payloads
                .into_iter()
                .filter_map(|payload| MucUser::try_from(payload).ok())
                .any(|user| user.status.contains(&Status::SelfPresence));
            self_presence.then_some(TransportEvent::RoomJoined { room })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Element {
        xml.parse().unwrap()
    }

    fn jid(s: &str) -> BareJid {
        s.parse().unwrap()
    }

    #[test]
    fn test_join_presence_suppresses_history() {
        let el = join_presence(&jid("team@conf.example.com"), "bridgebot").unwrap();

        assert_eq!(el.attr("to"), Some("team@conf.example.com/bridgebot"));
        let history = el
            .get_child("x", ns::MUC)
            .and_then(|x| x.get_child("history", ns::MUC))
            .unwrap();
        assert_eq!(history.attr("maxstanzas"), Some("0"));
    }

    #[test]
    fn test_join_presence_rejects_bad_nick() {
        let err = join_presence(&jid("team@conf.example.com"), "").unwrap_err();
        assert!(matches!(err, TransportError::InvalidJid { .. }));
    }

    #[test]
    fn test_group_message() {
        let el = group_message(&jid("team@conf.example.com"), "alice: hi team");

        assert_eq!(el.attr("type"), Some("groupchat"));
        assert_eq!(el.attr("to"), Some("team@conf.example.com"));
        assert_eq!(
            el.get_child("body", ns::DEFAULT_NS).unwrap().text(),
            "alice: hi team"
        );
    }

    #[test]
    fn test_parse_group_message() {
        let el = parse(
            "<message xmlns='jabber:client' type='groupchat' from='team@conf.example.com/bob'>\
             <body>bridgebot, got it</body></message>",
        );

        assert_eq!(
            parse_group_message(el),
            Some(MucMessage {
                sender_nickname: "bob".to_string(),
                body: "bridgebot, got it".to_string(),
                room: jid("team@conf.example.com"),
            })
        );
    }

    #[test]
    fn test_parse_group_message_normalizes_room() {
        let el = parse(
            "<message xmlns='jabber:client' type='groupchat' from='Team@conf.example.com/Bob'>\
             <body>hi</body></message>",
        );

        let msg = parse_group_message(el).unwrap();
        assert_eq!(msg.room, jid("team@conf.example.com"));
        assert_eq!(msg.room.node_str(), Some("team"));
        // Resources are case preserving
        assert_eq!(msg.sender_nickname, "Bob");
    }

    #[test]
    fn test_parse_group_message_skips_history() {
        let el = parse(
            "<message xmlns='jabber:client' type='groupchat' from='team@conf.example.com/bob'>\
             <body>old news</body>\
             <delay xmlns='urn:xmpp:delay' stamp='2024-01-01T00:00:00Z'/></message>",
        );

        assert_eq!(parse_group_message(el), None);
    }

    #[test]
    fn test_parse_group_message_room_subject() {
        let el = parse(
            "<message xmlns='jabber:client' type='groupchat' from='team@conf.example.com'>\
             <body>Welcome</body></message>",
        );

        assert_eq!(parse_group_message(el).unwrap().sender_nickname, "");
    }

    #[test]
    fn test_parse_chat_message_ignored() {
        let el = parse(
            "<message xmlns='jabber:client' type='chat' from='alice@example.com/pc'>\
             <body>hi</body></message>",
        );

        assert_eq!(parse_group_message(el), None);
    }

    #[test]
    fn test_parse_self_presence() {
        let el = parse(
            "<presence xmlns='jabber:client' from='team@conf.example.com/bridgebot'>\
             <x xmlns='http://jabber.org/protocol/muc#user'>\
             <item affiliation='none' role='participant'/>\
             <status code='110'/></x></presence>",
        );

        assert_eq!(
            parse_join_outcome(el),
            Some(TransportEvent::RoomJoined {
                room: jid("team@conf.example.com")
            })
        );
    }

    #[test]
    fn test_self_presence_from_mixed_case_room() {
        let el = parse(
            "<presence xmlns='jabber:client' from='Team@Conf.Example.com/bridgebot'>\
             <x xmlns='http://jabber.org/protocol/muc#user'>\
             <item affiliation='none' role='participant'/>\
             <status code='110'/></x></presence>",
        );

        assert_eq!(
            parse_join_outcome(el),
            Some(TransportEvent::RoomJoined {
                room: jid("team@conf.example.com")
            })
        );
    }

    #[test]
    fn test_other_occupant_presence_ignored() {
        let el = parse(
            "<presence xmlns='jabber:client' from='team@conf.example.com/alice'>\
             <x xmlns='http://jabber.org/protocol/muc#user'>\
             <item affiliation='member' role='participant'/></x></presence>",
        );

        assert_eq!(parse_join_outcome(el), None);
    }

    #[test]
    fn test_occupant_with_our_nick_is_not_a_join() {
        // Someone else already holds the nickname; no status 110.
        let el = parse(
            "<presence xmlns='jabber:client' from='team@conf.example.com/bridgebot'>\
             <x xmlns='http://jabber.org/protocol/muc#user'>\
             <item affiliation='member' role='participant'/></x></presence>",
        );

        assert_eq!(parse_join_outcome(el), None);
    }

    #[test]
    fn test_parse_join_error() {
        let el = parse(
            "<presence xmlns='jabber:client' type='error' from='team@conf.example.com/bridgebot'>\
             <error type='auth'><registration-required xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
             </error></presence>",
        );

        assert_eq!(
            parse_join_outcome(el),
            Some(TransportEvent::RoomJoinFailed {
                room: jid("team@conf.example.com"),
                reason: "registration-required".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_ping_request() {
        let el = parse(
            "<iq xmlns='jabber:client' type='get' id='p1' from='example.com'>\
             <ping xmlns='urn:xmpp:ping'/></iq>",
        );

        assert_eq!(
            parse_iq(el),
            Some(InboundIq::Ping {
                from: "example.com".parse().unwrap(),
                id: "p1".to_string()
            })
        );
    }

    #[test]
    fn test_parse_roster_result() {
        let el = parse(
            "<iq xmlns='jabber:client' type='result' id='roster-1'>\
             <query xmlns='jabber:iq:roster'>\
             <item jid='alice@example.com' subscription='both'/></query></iq>",
        );

        assert_eq!(parse_iq(el), Some(InboundIq::Roster { items: 1 }));
    }

    #[test]
    fn test_disco_info_result_lists_features() {
        let el = disco_info_result(
            "example.com".parse().unwrap(),
            "d1",
            &[ns::MUC, ns::PING],
        );
        assert_eq!(el.attr("type"), Some("result"));
        let query = el.get_child("query", ns::DISCO_INFO).unwrap();

        let features: Vec<_> = query
            .children()
            .filter(|c| c.is("feature", ns::DISCO_INFO))
            .filter_map(|c| c.attr("var"))
            .collect();
        assert_eq!(features, vec![ns::MUC, ns::PING]);
    }
}
