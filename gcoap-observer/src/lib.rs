//! The `gcoap-observer` crate defines the observer side of the gcoap test
//! tooling: a CoAP client that registers and deregisters for Observe
//! notifications on a remote server (typically the RIOT gcoap example app),
//! and decides how to answer each notification it receives.
//!
//! The crate is composed of the following pieces:
//! 1. [`Observer`], the client state machine. It owns the table of live
//!    subscriptions (short resource key -> token) and the process-wide
//!    [`NotificationPolicy`], builds the Observe register / deregister
//!    requests, and classifies inbound messages as plain responses or
//!    notifications, answering notifications with ACK, RST, or nothing
//!    depending on the policy.
//! 2. The command listener mapping in [`command`], which turns a POST path
//!    received on the secondary (command) port into a [`Command`]. This lets
//!    an external test driver trigger registration, deregistration and
//!    policy changes mid-run without restarting the observer.
//! 3. [`ObserverService`], a single task running one `tokio::select!` loop
//!    over the client socket, the command socket, and the outbound queue.
//!    All mutation of observer state happens inside this one task.
//! 4. [`ObserverHandle`], an [`actix::Actor`] that lets in-process drivers
//!    send the same commands into the service loop.
//!
//! # Examples
//! ```rust,no_run
//! #[actix::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dest = "[::1]:5683".parse()?;
//!     // Client on 5682, command listener on 5683
//!     let service = gcoap_observer::ObserverService::bind(dest, 5682).await?;
//!     let handle = service.handle();
//!
//!     tokio::spawn(async move {
//!         service.run(std::future::pending()).await.ok();
//!     });
//!
//!     handle
//!         .send(gcoap_observer::Register {
//!             key: "stats".to_string(),
//!             token: Some("05a6".to_string()),
//!         })
//!         .await??;
//!     Ok(())
//! }
//! ```

pub mod command;
mod handle;
pub mod message;
mod observer;
mod policy;
mod service;
mod token;

pub use command::{Command, CommandOutcome};
pub use handle::{Deregister, ObserverHandle, Register, SetNotificationPolicy};
pub use observer::{Observer, OutboundMessage, ResponseKind, ResponseSummary, Subscriptions};
pub use policy::{NotificationPolicy, ParsePolicyError};
pub use service::ObserverService;
pub use token::Token;

use thiserror::Error;

/// Standard CoAP UDP port
pub const COAP_PORT: u16 = 5683;

/// The command listener binds to the client source port plus this offset
pub const COMMAND_PORT_OFFSET: u16 = 1;

// RFC 7252 limits tokens to 8 bytes
pub(crate) const MAX_TOKEN_LEN: usize = 8;

// Length of the tokens generated when no explicit token is supplied
pub(crate) const RANDOM_TOKEN_LEN: usize = 2;

// Large enough for any notification the RIOT gcoap example produces
pub(crate) const RECV_BUFFER_SIZE: usize = 1280;

#[derive(Error, Debug)]
pub enum ObserverError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("CoAP Msg Error")]
    CoAPMsgError(#[from] coap_lite::error::MessageError),
    #[error("Actix mailbox Error")]
    MailError(#[from] actix::MailboxError),
    #[error("No subscription for resource key {0}")]
    UnknownResource(String),
    #[error("Token format Error")]
    TokenFormat(#[from] hex::FromHexError),
    #[error("Token length {0} not in 1..=8")]
    TokenLength(usize),
    #[error("Command listener port overflows for source port {0}")]
    PortOverflow(u16),
    #[error("Observer service is not running")]
    ServiceClosed,
}

pub type ObserverResult<T> = std::result::Result<T, ObserverError>;

/// Derive the command listener port from the client source port
pub fn command_port(source_port: u16) -> ObserverResult<u16> {
    source_port
        .checked_add(COMMAND_PORT_OFFSET)
        .ok_or(ObserverError::PortOverflow(source_port))
}
