//! Mapping from command listener POST paths to observer actions.
//!
//! | Path               | Action                              |
//! |--------------------|-------------------------------------|
//! | `/reg/<key>`       | register `key`, token from query    |
//! | `/dereg/<key>`     | deregister `key`                    |
//! | `/notif/con_ignore`| policy `ignore`                     |
//! | `/notif/con_reset` | policy `reset`                      |
//! | `/notif/non_reset` | policy `reset_non`                  |
//! | `/ping`            | report ping                         |
//! | anything else      | log only                            |

use coap_lite::{MessageClass, Packet, RequestType, ResponseType};

use crate::{message, NotificationPolicy, Observer, ObserverError, ObserverResult, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { key: String, token: Option<String> },
    Deregister { key: String },
    SetPolicy(NotificationPolicy),
    Ping,
    Ignore,
}

#[derive(Debug, Clone, Copy)]
enum CommandKind {
    Register,
    Deregister,
    SetPolicy(NotificationPolicy),
    Ping,
}

// Patterns ending in '/' are prefixes; the remainder is the resource key
const COMMAND_TABLE: &[(&str, CommandKind)] = &[
    ("/reg/", CommandKind::Register),
    ("/dereg/", CommandKind::Deregister),
    (
        "/notif/con_ignore",
        CommandKind::SetPolicy(NotificationPolicy::Ignore),
    ),
    (
        "/notif/con_reset",
        CommandKind::SetPolicy(NotificationPolicy::Reset),
    ),
    (
        "/notif/non_reset",
        CommandKind::SetPolicy(NotificationPolicy::ResetNon),
    ),
    ("/ping", CommandKind::Ping),
];

impl Command {
    /// Look up `path` in the command table. `token` is the explicit token
    /// text for `/reg/<key>`; empty text counts as no token
    pub fn from_path(path: &str, token: Option<&str>) -> Self {
        for (pattern, kind) in COMMAND_TABLE {
            let key = if pattern.ends_with('/') {
                match path.strip_prefix(pattern) {
                    Some(key) if !key.is_empty() => key,
                    _ => continue,
                }
            } else if path == *pattern {
                ""
            } else {
                continue;
            };

            return match kind {
                CommandKind::Register => Command::Register {
                    key: key.to_string(),
                    token: token.filter(|t| !t.is_empty()).map(str::to_string),
                },
                CommandKind::Deregister => Command::Deregister {
                    key: key.to_string(),
                },
                CommandKind::SetPolicy(policy) => Command::SetPolicy(*policy),
                CommandKind::Ping => Command::Ping,
            };
        }
        Command::Ignore
    }

    /// Parse a command from a POST received on the command listener. The
    /// explicit token comes from the Uri-Query, or else the payload text
    pub fn from_packet(packet: &Packet) -> Self {
        let path = message::uri_path(packet);
        let token = message::uri_query(packet).or_else(|| {
            std::str::from_utf8(&packet.payload)
                .ok()
                .map(|p| p.trim().to_string())
        });
        log::debug!("Resource path is {path:}");
        Self::from_path(&path, token.as_deref())
    }

    /// Run the command against the observer
    pub fn apply(self, observer: &mut Observer) -> ObserverResult<CommandOutcome> {
        match self {
            Command::Register { key, token } => observer
                .register(&key, token.as_deref())
                .map(|token| CommandOutcome::Registered { key, token }),
            Command::Deregister { key } => observer
                .deregister(&key)
                .map(|token| CommandOutcome::Deregistered { key, token }),
            Command::SetPolicy(policy) => {
                observer.set_notification_policy(policy);
                Ok(CommandOutcome::PolicySet(policy))
            }
            Command::Ping => {
                log::info!("Got ping post");
                Ok(CommandOutcome::Ping)
            }
            Command::Ignore => {
                log::info!("Unrecognized command, ignoring");
                Ok(CommandOutcome::Ignored)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Registered { key: String, token: Token },
    Deregistered { key: String, token: Token },
    PolicySet(NotificationPolicy),
    Ping,
    Ignored,
}

/// Response code acknowledging a command POST
pub fn response_status(result: &ObserverResult<CommandOutcome>) -> ResponseType {
    match result {
        Ok(_) => ResponseType::Changed,
        Err(ObserverError::UnknownResource(_)) => ResponseType::NotFound,
        Err(ObserverError::TokenFormat(_)) | Err(ObserverError::TokenLength(_)) => {
            ResponseType::BadRequest
        }
        Err(_) => ResponseType::InternalServerError,
    }
}

/// Commands are only accepted as POST
pub fn is_post(packet: &Packet) -> bool {
    packet.header.code == MessageClass::Request(RequestType::Post)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coap_lite::{CoapOption, MessageType};
    use std::net::SocketAddr;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn command_table_paths() {
        assert_eq!(
            Command::from_path("/reg/stats", None),
            Command::Register {
                key: "stats".to_string(),
                token: None
            }
        );
        assert_eq!(
            Command::from_path("/reg/core", Some("05a6")),
            Command::Register {
                key: "core".to_string(),
                token: Some("05a6".to_string())
            }
        );
        assert_eq!(
            Command::from_path("/dereg/stats2", Some("05a6")),
            Command::Deregister {
                key: "stats2".to_string()
            }
        );
        assert_eq!(
            Command::from_path("/notif/con_ignore", None),
            Command::SetPolicy(NotificationPolicy::Ignore)
        );
        assert_eq!(
            Command::from_path("/notif/con_reset", None),
            Command::SetPolicy(NotificationPolicy::Reset)
        );
        assert_eq!(
            Command::from_path("/notif/non_reset", None),
            Command::SetPolicy(NotificationPolicy::ResetNon)
        );
        assert_eq!(Command::from_path("/ping", None), Command::Ping);
    }

    #[test]
    fn unrecognized_paths_are_ignored() {
        for path in ["/", "/reg", "/reg/", "/dereg/", "/notif/ack", "/ping/x", "/foo"] {
            assert_eq!(Command::from_path(path, None), Command::Ignore, "{path}");
        }
    }

    #[test]
    fn empty_token_text_means_random() {
        assert_eq!(
            Command::from_path("/reg/stats", Some("")),
            Command::Register {
                key: "stats".to_string(),
                token: None
            }
        );
    }

    #[test]
    fn token_from_query_or_payload() {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.code = MessageClass::Request(RequestType::Post);
        packet.add_option(CoapOption::UriPath, b"reg".to_vec());
        packet.add_option(CoapOption::UriPath, b"stats".to_vec());
        packet.payload = b"0a0b\n".to_vec();
        assert!(is_post(&packet));
        assert_eq!(
            Command::from_packet(&packet),
            Command::Register {
                key: "stats".to_string(),
                token: Some("0a0b".to_string())
            }
        );

        packet.add_option(CoapOption::UriQuery, b"05a6".to_vec());
        assert_eq!(
            Command::from_packet(&packet),
            Command::Register {
                key: "stats".to_string(),
                token: Some("05a6".to_string())
            }
        );
    }

    #[tokio::test]
    async fn apply_maps_errors_to_response_codes() {
        let (tx, mut rx) = unbounded_channel();
        let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let mut observer = Observer::new(peer, tx);

        let res = Command::from_path("/dereg/stats", None).apply(&mut observer);
        assert_eq!(response_status(&res), ResponseType::NotFound);

        let res = Command::from_path("/reg/stats", Some("xyz")).apply(&mut observer);
        assert_eq!(response_status(&res), ResponseType::BadRequest);
        assert!(rx.try_recv().is_err());

        let res = Command::from_path("/reg/stats", Some("05a6")).apply(&mut observer);
        assert_eq!(response_status(&res), ResponseType::Changed);
        assert!(matches!(
            res,
            Ok(CommandOutcome::Registered { ref key, ref token })
                if key == "stats" && token.as_bytes() == [0x05, 0xa6]
        ));

        let res = Command::from_path("/notif/con_reset", None).apply(&mut observer);
        assert!(matches!(
            res,
            Ok(CommandOutcome::PolicySet(NotificationPolicy::Reset))
        ));
        assert_eq!(observer.policy(), NotificationPolicy::Reset);

        let res = Command::from_path("/ping", None).apply(&mut observer);
        assert!(matches!(res, Ok(CommandOutcome::Ping)));
        assert_eq!(response_status(&res), ResponseType::Changed);

        let res = Command::from_path("/foo", None).apply(&mut observer);
        assert!(matches!(res, Ok(CommandOutcome::Ignored)));
        assert_eq!(observer.subscriptions().len(), 1);
    }
}
