//! A CoAP server for testing gcoap client commands, with knobs to delay or
//! drop responses so client retry and timeout handling can be exercised.
//!
//! Resources:
//! - `GET /ver`: program version
//! - `GET /toobig`: text payload larger than the 128 byte gcoap buffer
//! - `GET /ignore`: never answered
//! - `POST /cf/delay`: integer seconds to delay future responses
//! - `PUT /ver/ignores`: count of `/ver` requests to drop before answering

use coap_lite::{CoapRequest, MessageType, Packet, RequestType, ResponseType};
use std::{
    future::Future,
    net::{Ipv6Addr, SocketAddr},
};
use thiserror::Error;
use tokio::{net::UdpSocket, time::Duration};

pub const VERSION: &str = "0.1";

pub const COAP_PORT: u16 = 5683;

const TOOBIG_CHUNK: &str = "1234567890";
const TOOBIG_REPEAT: usize = 13;

#[derive(Error, Debug)]
pub enum TesterError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("CoAP Msg Error")]
    CoAPMsgError(#[from] coap_lite::error::MessageError),
}

pub type TesterResult<T> = std::result::Result<T, TesterError>;

/// What to do with one request
#[derive(Debug, Clone, PartialEq)]
pub enum TesterAction {
    Respond {
        delay: Duration,
        status: ResponseType,
        payload: Vec<u8>,
    },
    /// Send nothing, after waiting `delay`
    Ignore { delay: Duration },
}

/// Resource table and configuration state of the tester
#[derive(Debug, Default)]
pub struct GcoapTester {
    delay: Duration,
    ver_ignores: u32,
}

impl GcoapTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn ver_ignores(&self) -> u32 {
        self.ver_ignores
    }

    pub fn handle_request(&mut self, method: RequestType, path: &str, payload: &[u8]) -> TesterAction {
        log::debug!("Resource path is {path:}");
        match method {
            RequestType::Get => self.get(path),
            RequestType::Post => self.post(path, payload),
            RequestType::Put => self.put(path, payload),
            other => {
                log::warn!("Unsupported method {other:?} for {path:}");
                Self::respond(Duration::ZERO, ResponseType::MethodNotAllowed, vec![])
            }
        }
    }

    fn get(&mut self, path: &str) -> TesterAction {
        match path {
            "/ver" => {
                if self.ver_ignores > 0 {
                    self.ver_ignores -= 1;
                    log::debug!("Ignoring /ver, {} ignores left", self.ver_ignores);
                    return TesterAction::Ignore {
                        delay: Duration::ZERO,
                    };
                }
                Self::respond(self.delay, ResponseType::Content, VERSION.into())
            }
            "/toobig" => Self::respond(
                self.delay,
                ResponseType::Content,
                TOOBIG_CHUNK.repeat(TOOBIG_REPEAT).into_bytes(),
            ),
            "/ignore" => TesterAction::Ignore { delay: self.delay },
            _ => {
                log::warn!("Unknown path: {path:}");
                Self::respond(self.delay, ResponseType::NotFound, vec![])
            }
        }
    }

    fn post(&mut self, path: &str, payload: &[u8]) -> TesterAction {
        match path {
            "/cf/delay" => match parse_int(payload) {
                Some(secs) => {
                    self.delay = Duration::from_secs(secs);
                    log::debug!("Post delay value: {secs:}");
                    Self::respond(Duration::ZERO, ResponseType::Changed, vec![])
                }
                None => Self::respond(Duration::ZERO, ResponseType::BadRequest, vec![]),
            },
            _ => {
                log::warn!("Unknown path: {path:}");
                Self::respond(self.delay, ResponseType::NotFound, vec![])
            }
        }
    }

    fn put(&mut self, path: &str, payload: &[u8]) -> TesterAction {
        match path {
            "/ver/ignores" => match parse_int(payload) {
                Some(count) => {
                    self.ver_ignores = u32::try_from(count).unwrap_or(u32::MAX);
                    log::debug!("Ignores for /ver: {}", self.ver_ignores);
                    Self::respond(Duration::ZERO, ResponseType::Changed, vec![])
                }
                None => Self::respond(Duration::ZERO, ResponseType::BadRequest, vec![]),
            },
            _ => {
                log::warn!("Unknown path: {path:}");
                Self::respond(Duration::ZERO, ResponseType::NotFound, vec![])
            }
        }
    }

    fn respond(delay: Duration, status: ResponseType, payload: Vec<u8>) -> TesterAction {
        TesterAction::Respond {
            delay,
            status,
            payload,
        }
    }
}

fn parse_int(payload: &[u8]) -> Option<u64> {
    std::str::from_utf8(payload).ok()?.trim().parse().ok()
}

/// Serves a [`GcoapTester`] on one UDP socket. Requests are handled one at a
/// time; a configured delay holds up every request queued behind it.
pub struct TesterServer {
    socket: UdpSocket,
    tester: GcoapTester,
}

impl TesterServer {
    pub async fn bind(port: u16) -> TesterResult<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port))
            .await
            .map_err(|e| {
                log::error!("Unable to bind to port {port:}");
                e
            })?;
        Ok(Self::new(socket))
    }

    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            tester: GcoapTester::new(),
        }
    }

    pub fn local_addr(&self) -> TesterResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run<F>(mut self, shutdown: F) -> TesterResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut buffer = [0u8; 1280];
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Tester shutting down");
                    break;
                }
                res = self.socket.recv_from(&mut buffer) => {
                    let (len, from) = res?;
                    self.handle_datagram(&buffer[..len], from).await?;
                }
            };
        }
        Ok(())
    }

    async fn handle_datagram(&mut self, buf: &[u8], from: SocketAddr) -> TesterResult<()> {
        let packet = match Packet::from_bytes(buf) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Dropping undecodable message from {from:}: {e:?}");
                return Ok(());
            }
        };

        if matches!(
            packet.header.get_type(),
            MessageType::Acknowledgement | MessageType::Reset
        ) {
            log::debug!("Got {:?} from {from:}", packet.header.get_type());
            return Ok(());
        }

        let request = CoapRequest::from_packet(packet, from);
        let path = format!("/{}", request.get_path());
        let action =
            self.tester
                .handle_request(*request.get_method(), &path, &request.message.payload);

        match action {
            TesterAction::Ignore { delay } => {
                tokio::time::sleep(delay).await;
                log::debug!("Not responding to {path:}");
            }
            TesterAction::Respond {
                delay,
                status,
                payload,
            } => {
                tokio::time::sleep(delay).await;
                if let Some(mut response) = request.response {
                    response.set_status(status);
                    response.message.payload = payload;
                    let bytes = response.message.to_bytes()?;
                    self.socket.send_to(&bytes, from).await?;
                }
            }
        }
        Ok(())
    }
}
