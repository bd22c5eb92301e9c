use actix::prelude::*;
use tokio::sync::mpsc::UnboundedSender;

use crate::{Command, NotificationPolicy, ObserverError};

/// The [`ObserverHandle`] gives in-process drivers the same surface as the
/// command listener. Messages are forwarded into the
/// [`ObserverService`](crate::ObserverService) loop, so every mutation of
/// observer state still happens on that one task.
///
/// A successful reply only means the command was queued; like the command
/// listener, the outcome is observed on the response stream.
pub struct ObserverHandle(pub(crate) UnboundedSender<Command>);

impl ObserverHandle {
    fn forward(&self, command: Command) -> HandleResponse {
        self.0.send(command).map_err(|e| {
            log::error!("Error sending command to observer service {e:}");
            ObserverError::ServiceClosed
        })
    }
}

impl Actor for ObserverHandle {
    type Context = Context<Self>;
}

type HandleResponse = Result<(), ObserverError>;

/// Register for notifications on `key`, optionally with a hex token
#[derive(Message)]
#[rtype(result = "HandleResponse")]
pub struct Register {
    pub key: String,
    pub token: Option<String>,
}

impl Handler<Register> for ObserverHandle {
    type Result = HandleResponse;

    fn handle(&mut self, msg: Register, _ctx: &mut Self::Context) -> Self::Result {
        self.forward(Command::Register {
            key: msg.key,
            token: msg.token,
        })
    }
}

#[derive(Message)]
#[rtype(result = "HandleResponse")]
pub struct Deregister {
    pub key: String,
}

impl Handler<Deregister> for ObserverHandle {
    type Result = HandleResponse;

    fn handle(&mut self, msg: Deregister, _ctx: &mut Self::Context) -> Self::Result {
        self.forward(Command::Deregister { key: msg.key })
    }
}

#[derive(Message)]
#[rtype(result = "HandleResponse")]
pub struct SetNotificationPolicy(pub NotificationPolicy);

impl Handler<SetNotificationPolicy> for ObserverHandle {
    type Result = HandleResponse;

    fn handle(&mut self, msg: SetNotificationPolicy, _ctx: &mut Self::Context) -> Self::Result {
        self.forward(Command::SetPolicy(msg.0))
    }
}
