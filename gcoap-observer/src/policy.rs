use coap_lite::MessageType;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// [`NotificationPolicy`] decides how the observer answers Observe
/// notifications. It is process wide: one value applies to every live
/// subscription, and it only changes on an explicit command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NotificationPolicy {
    /// ACK confirmable notifications, nothing for non-confirmable ones
    #[default]
    Ack,
    /// Send nothing for confirmable notifications. The server deregisters
    /// the observer once its retransmissions run out
    Ignore,
    /// RST confirmable notifications, cancelling the subscription
    Reset,
    /// RST non-confirmable notifications and send nothing for confirmable
    /// ones. NON messages expect no reply, so the RST is unsolicited
    ResetNon,
}

impl NotificationPolicy {
    /// The empty message type to send back for a notification of the given
    /// type, or `None` when no reply goes out
    pub fn reply_for(&self, notification: MessageType) -> Option<MessageType> {
        match (notification, self) {
            (MessageType::Confirmable, NotificationPolicy::Reset) => Some(MessageType::Reset),
            (MessageType::Confirmable, NotificationPolicy::Ack) => {
                Some(MessageType::Acknowledgement)
            }
            (MessageType::NonConfirmable, NotificationPolicy::ResetNon) => {
                Some(MessageType::Reset)
            }
            _ => None,
        }
    }
}

impl fmt::Display for NotificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationPolicy::Ack => "ack",
            NotificationPolicy::Ignore => "ignore",
            NotificationPolicy::Reset => "reset",
            NotificationPolicy::ResetNon => "reset_non",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown notification policy {0}")]
pub struct ParsePolicyError(String);

impl FromStr for NotificationPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ack" => Ok(NotificationPolicy::Ack),
            "ignore" => Ok(NotificationPolicy::Ignore),
            "reset" => Ok(NotificationPolicy::Reset),
            "reset_non" => Ok(NotificationPolicy::ResetNon),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}
