use coap_lite::{MessageClass, MessageType, Packet};
use std::{collections::HashMap, fmt, net::SocketAddr};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    message::{self, OBSERVE_DEREGISTER, OBSERVE_REGISTER},
    NotificationPolicy, ObserverError, ObserverResult, Token,
};

const CORE_PATH: &[&str] = &[".well-known", "core"];
const STATS_PATH: &[&str] = &["cli", "stats"];
const STATS2_PATH: &[&str] = &["cli", "stats2"];

/// A message queued for the service loop to put on the client socket
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub dest: SocketAddr,
    pub packet: Packet,
}

/// Live Observe registrations, keyed by the short resource name (`stats`,
/// `core`, ...) rather than the wire path. At most one token per key.
#[derive(Debug, Default, Clone)]
pub struct Subscriptions(HashMap<String, Token>);

impl Subscriptions {
    /// Insert or replace the token for `key`, returning the replaced one
    pub fn insert(&mut self, key: &str, token: Token) -> Option<Token> {
        self.0.insert(key.to_string(), token)
    }

    pub fn remove(&mut self, key: &str) -> Option<Token> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Token> {
        self.0.get(key)
    }

    /// True if `token` belongs to any live subscription
    pub fn contains_token(&self, token: &[u8]) -> bool {
        self.0.values().any(|t| *t == *token)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Token)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Token matched no live subscription
    Response,
    /// Token matched a live subscription
    Notification,
}

/// What the observer made of one inbound message. The [`fmt::Display`]
/// output is the console line test drivers match on
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSummary {
    pub code: MessageClass,
    pub message_id: u16,
    pub observe_len: usize,
    pub observe: Option<u32>,
    pub kind: ResponseKind,
    /// ACK or RST sent back, if any
    pub reply: Option<MessageType>,
}

impl fmt::Display for ResponseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self.observe {
            Some(v) => v.to_string(),
            None => "<none>".to_string(),
        };
        write!(
            f,
            "Response code: {}; Observe len: {}; val: {}",
            message::format_code(self.code),
            self.observe_len,
            value
        )
    }
}

/// [`Observer`] is the Observe client state machine. Per resource key:
///
/// `UNSUBSCRIBED -(register)-> SUBSCRIBED -(deregister)-> UNSUBSCRIBED`
///
/// Registering again while subscribed replaces the token. Bookkeeping is
/// optimistic in both directions: a registration the server rejects stays
/// in the table, and a deregistration drops the entry before the request
/// is even sent.
///
/// Requests and notification replies are fire-and-forget: they are pushed
/// onto the outbound queue and nothing waits for the server.
pub struct Observer {
    peer: SocketAddr,
    subscriptions: Subscriptions,
    policy: NotificationPolicy,
    outbound: UnboundedSender<OutboundMessage>,
}

impl Observer {
    pub fn new(peer: SocketAddr, outbound: UnboundedSender<OutboundMessage>) -> Self {
        Self {
            peer,
            subscriptions: Subscriptions::default(),
            policy: NotificationPolicy::default(),
            outbound,
        }
    }

    /// Wire path segments for a resource key. Unknown keys map to no
    /// segments at all, and the request goes out without a Uri-Path
    pub fn resource_path(key: &str) -> &'static [&'static str] {
        match key {
            "core" => CORE_PATH,
            "stats" => STATS_PATH,
            "stats2" => STATS2_PATH,
            _ => &[],
        }
    }

    /// Register for notifications on `key`, with the hex `token_text` if
    /// given, otherwise a random two byte token. Replaces any previous
    /// token for `key`
    pub fn register(&mut self, key: &str, token_text: Option<&str>) -> ObserverResult<Token> {
        let token = match token_text {
            Some(text) => Token::from_hex(text)?,
            None => Token::random(),
        };

        let packet = message::observe_request(
            Self::resource_path(key),
            OBSERVE_REGISTER,
            token.as_bytes().to_vec(),
            rand::random(),
        );

        if let Some(previous) = self.subscriptions.insert(key, token.clone()) {
            log::debug!("Replacing token {previous:} for {key:} with {token:}");
        }

        log::debug!("Sending Observe registration for {key:} with token {token:}");
        self.send(self.peer, packet)?;
        Ok(token)
    }

    /// Deregister from `key` using its stored token. The table entry is
    /// removed before the request is queued and is not restored if the
    /// send fails
    pub fn deregister(&mut self, key: &str) -> ObserverResult<Token> {
        let token = self.subscriptions.remove(key).ok_or_else(|| {
            log::error!("No registration for {key:}, unable to deregister");
            ObserverError::UnknownResource(key.to_string())
        })?;

        let packet = message::observe_request(
            Self::resource_path(key),
            OBSERVE_DEREGISTER,
            token.as_bytes().to_vec(),
            rand::random(),
        );

        log::debug!("Sending Observe deregistration for {key:} with token {token:}");
        self.send(self.peer, packet)?;
        Ok(token)
    }

    /// Takes effect from the next inbound notification
    pub fn set_notification_policy(&mut self, policy: NotificationPolicy) {
        log::info!("Notification policy {} -> {policy:}", self.policy);
        self.policy = policy;
    }

    /// Handle one inbound message from `from`. Notifications (token matches
    /// a live subscription) are answered per the current policy; anything
    /// else is only reported
    pub fn on_response(&mut self, message: &Packet, from: SocketAddr) -> ResponseSummary {
        log::debug!("Running client response handler");

        let (observe_len, observe) = message::observe_option(message);
        let message_type = message.header.get_type();

        let (kind, reply) = if self.subscriptions.contains_token(message.get_token()) {
            (ResponseKind::Notification, self.policy.reply_for(message_type))
        } else {
            (ResponseKind::Response, None)
        };

        if let Some(reply) = reply {
            log::debug!(
                "Sending {reply:?} for notification response, message id {}",
                message.header.message_id
            );
            self.send(from, message::empty_reply(message, reply))
                .map_err(|e| log::error!("Unable to queue notification response {e:}"))
                .ok();
        }

        ResponseSummary {
            code: message.header.code,
            message_id: message.header.message_id,
            observe_len,
            observe,
            kind,
            reply,
        }
    }

    pub fn policy(&self) -> NotificationPolicy {
        self.policy
    }

    pub fn subscription(&self, key: &str) -> Option<&Token> {
        self.subscriptions.get(key)
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn send(&self, dest: SocketAddr, packet: Packet) -> ObserverResult<()> {
        self.outbound
            .send(OutboundMessage { dest, packet })
            .map_err(|_| ObserverError::ServiceClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coap_lite::{CoapOption, ResponseType};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn observer() -> (Observer, UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = unbounded_channel();
        let peer: SocketAddr = "[::1]:5683".parse().unwrap();
        (Observer::new(peer, tx), rx)
    }

    fn notification(token: &[u8], message_type: MessageType, message_id: u16) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(message_type);
        packet.header.code = MessageClass::Response(ResponseType::Content);
        packet.header.message_id = message_id;
        packet.set_token(token.to_vec());
        packet.add_option(CoapOption::Observe, vec![3]);
        packet.payload = b"stats".to_vec();
        packet
    }

    fn server() -> SocketAddr {
        "[::1]:5683".parse().unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut out = vec![];
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn register_then_deregister_sends_matching_pair() {
        let (mut obs, mut rx) = observer();

        let token = obs.register("stats", None).unwrap();
        assert_eq!(obs.subscription("stats"), Some(&token));
        obs.deregister("stats").unwrap();
        assert!(obs.subscription("stats").is_none());
        assert!(obs.subscriptions().is_empty());

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(message::observe_option(&sent[0].packet), (1, Some(0)));
        assert_eq!(message::observe_option(&sent[1].packet), (1, Some(1)));
        assert_eq!(sent[0].packet.get_token(), token.as_bytes());
        assert_eq!(sent[1].packet.get_token(), token.as_bytes());
        for msg in &sent {
            assert_eq!(msg.dest, server());
            assert_eq!(msg.packet.header.get_type(), MessageType::NonConfirmable);
            assert_eq!(message::uri_path(&msg.packet), "/cli/stats");
        }
    }

    #[tokio::test]
    async fn reregister_replaces_token() {
        let (mut obs, mut rx) = observer();

        obs.register("stats", Some("0102")).unwrap();
        let second = obs.register("stats", Some("0304")).unwrap();

        assert_eq!(obs.subscriptions().len(), 1);
        assert_eq!(obs.subscription("stats"), Some(&second));
        assert_eq!(second.as_bytes(), &[3, 4]);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn explicit_token_round_trip() {
        let (mut obs, mut rx) = observer();

        obs.register("core", Some("05a6")).unwrap();
        assert_eq!(obs.subscription("core").unwrap().as_bytes(), &[0x05, 0xa6]);
        obs.deregister("core").unwrap();

        let sent = drain(&mut rx);
        assert_eq!(sent[1].packet.get_token(), &[0x05, 0xa6]);
        assert_eq!(message::uri_path(&sent[1].packet), "/.well-known/core");
    }

    #[tokio::test]
    async fn unmapped_key_has_no_path() {
        let (mut obs, mut rx) = observer();

        obs.register("bogus", None).unwrap();
        let sent = drain(&mut rx);
        assert_eq!(message::uri_path(&sent[0].packet), "/");
        assert!(sent[0].packet.get_option(CoapOption::UriPath).is_none());
    }

    #[tokio::test]
    async fn deregister_unknown_key_fails_without_sending() {
        let (mut obs, mut rx) = observer();

        assert!(matches!(
            obs.deregister("stats"),
            Err(ObserverError::UnknownResource(k)) if k == "stats"
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn malformed_token_leaves_table_untouched() {
        let (mut obs, mut rx) = observer();

        assert!(obs.register("stats", Some("5a6")).is_err());
        assert!(obs.subscription("stats").is_none());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn reset_policy_resets_confirmable_notification() {
        let (mut obs, mut rx) = observer();
        let token = obs.register("stats", None).unwrap();
        drain(&mut rx);

        obs.set_notification_policy(NotificationPolicy::Reset);
        let summary = obs.on_response(
            &notification(token.as_bytes(), MessageType::Confirmable, 999),
            server(),
        );
        assert_eq!(summary.kind, ResponseKind::Notification);
        assert_eq!(summary.reply, Some(MessageType::Reset));

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet.header.get_type(), MessageType::Reset);
        assert_eq!(sent[0].packet.header.message_id, 999);
        assert_eq!(sent[0].packet.header.code, MessageClass::Empty);
        assert!(sent[0].packet.get_token().is_empty());
    }

    #[tokio::test]
    async fn ignore_policy_sends_nothing() {
        let (mut obs, mut rx) = observer();
        let token = obs.register("stats", None).unwrap();
        drain(&mut rx);

        obs.set_notification_policy(NotificationPolicy::Ignore);
        let summary = obs.on_response(
            &notification(token.as_bytes(), MessageType::Confirmable, 12),
            server(),
        );
        assert_eq!(summary.kind, ResponseKind::Notification);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn reset_non_policy_resets_non_confirmable_notification() {
        let (mut obs, mut rx) = observer();
        let token = obs.register("stats2", None).unwrap();
        drain(&mut rx);

        let non = notification(token.as_bytes(), MessageType::NonConfirmable, 31);
        obs.on_response(&non, server());
        assert!(drain(&mut rx).is_empty());

        obs.set_notification_policy(NotificationPolicy::ResetNon);
        obs.on_response(&non, server());
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet.header.get_type(), MessageType::Reset);
        assert_eq!(sent[0].packet.header.message_id, 31);
    }

    #[tokio::test]
    async fn reset_non_policy_ignores_confirmable_notification() {
        let (mut obs, mut rx) = observer();
        let token = obs.register("stats", None).unwrap();
        drain(&mut rx);

        obs.set_notification_policy(NotificationPolicy::ResetNon);
        let summary = obs.on_response(
            &notification(token.as_bytes(), MessageType::Confirmable, 32),
            server(),
        );
        assert_eq!(summary.kind, ResponseKind::Notification);
        assert_eq!(summary.reply, None);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unmatched_token_never_triggers_policy() {
        let (mut obs, mut rx) = observer();
        obs.register("stats", Some("0a0b")).unwrap();
        drain(&mut rx);

        for policy in [
            NotificationPolicy::Ack,
            NotificationPolicy::Ignore,
            NotificationPolicy::Reset,
            NotificationPolicy::ResetNon,
        ] {
            obs.set_notification_policy(policy);
            for message_type in [MessageType::Confirmable, MessageType::NonConfirmable] {
                let summary =
                    obs.on_response(&notification(&[0xde, 0xad], message_type, 5), server());
                assert_eq!(summary.kind, ResponseKind::Response);
                assert_eq!(summary.reply, None);
            }
        }
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn notification_after_deregister_is_a_plain_response() {
        let (mut obs, mut rx) = observer();
        let t1 = obs.register("stats", None).unwrap();
        drain(&mut rx);

        let summary =
            obs.on_response(&notification(t1.as_bytes(), MessageType::Confirmable, 100), server());
        assert_eq!(summary.reply, Some(MessageType::Acknowledgement));
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(sent[0].packet.header.message_id, 100);

        obs.deregister("stats").unwrap();
        drain(&mut rx);

        let summary =
            obs.on_response(&notification(t1.as_bytes(), MessageType::Confirmable, 101), server());
        assert_eq!(summary.kind, ResponseKind::Response);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn reply_goes_to_the_notification_source() {
        let (mut obs, mut rx) = observer();
        let token = obs.register("stats", None).unwrap();
        drain(&mut rx);

        let other: SocketAddr = "[::1]:6000".parse().unwrap();
        obs.on_response(&notification(token.as_bytes(), MessageType::Confirmable, 1), other);
        assert_eq!(drain(&mut rx)[0].dest, other);
    }

    #[test]
    fn summary_line_format() {
        let summary = ResponseSummary {
            code: MessageClass::Response(ResponseType::Content),
            message_id: 1,
            observe_len: 1,
            observe: Some(3),
            kind: ResponseKind::Notification,
            reply: None,
        };
        assert_eq!(
            summary.to_string(),
            "Response code: 2.05; Observe len: 1; val: 3"
        );

        let summary = ResponseSummary {
            observe_len: 0,
            observe: None,
            ..summary
        };
        assert_eq!(
            summary.to_string(),
            "Response code: 2.05; Observe len: 0; val: <none>"
        );
    }
}
