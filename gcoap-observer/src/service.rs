use actix::{Actor, Addr};
use coap_lite::{CoapResponse, MessageType, Packet, ResponseType};
use futures::prelude::*;
use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};
use tokio::{
    net::UdpSocket,
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    command::{self, CommandOutcome},
    command_port, Command, Observer, ObserverHandle, ObserverResult, OutboundMessage,
    ResponseSummary, RECV_BUFFER_SIZE,
};

/// [`ObserverService`] owns the [`Observer`] and both sockets, and drives
/// them from one `tokio::select!` loop:
/// 1. Datagrams on the client socket are handed to
///    [`Observer::on_response`], and the resulting [`ResponseSummary`] is
///    logged and streamed to any response subscribers
/// 2. Datagrams on the command socket are parsed into a [`Command`], run
///    against the observer, and acknowledged with a response code
/// 3. Commands from an [`ObserverHandle`] are run the same way
/// 4. Messages the observer queued are sent on the client socket
///
/// Each branch runs to completion before the next one is polled, so there
/// is no interleaving of observer state changes.
pub struct ObserverService {
    client: UdpSocket,
    commands: UdpSocket,
    observer: Observer,
    outbound: UnboundedReceiver<OutboundMessage>,
    api_sender: UnboundedSender<Command>,
    api_stream: UnboundedReceiverStream<Command>,
    response_subscribers: Vec<UnboundedSender<ResponseSummary>>,
    command_subscribers: Vec<UnboundedSender<CommandOutcome>>,
}

impl ObserverService {
    /// Bind the client socket on `source_port` and the command listener on
    /// `source_port + 1`, both on the wildcard address of `dest`'s family
    pub async fn bind(dest: SocketAddr, source_port: u16) -> ObserverResult<Self> {
        let ip: IpAddr = if dest.is_ipv6() {
            Ipv6Addr::UNSPECIFIED.into()
        } else {
            Ipv4Addr::UNSPECIFIED.into()
        };
        let command_port = command_port(source_port)?;

        let client = UdpSocket::bind(SocketAddr::new(ip, source_port))
            .await
            .map_err(|e| {
                log::error!("Unable to bind client socket to port {source_port:}");
                e
            })?;
        let commands = UdpSocket::bind(SocketAddr::new(ip, command_port))
            .await
            .map_err(|e| {
                log::error!("Unable to bind command socket to port {command_port:}");
                e
            })?;

        log::info!(
            "Observer for {dest:} using port {source_port:}, commands on port {command_port:}"
        );
        Ok(Self::new(client, commands, dest))
    }

    /// Build the service on sockets the caller already bound
    pub fn new(client: UdpSocket, commands: UdpSocket, dest: SocketAddr) -> Self {
        let (outbound_tx, outbound) = unbounded_channel();
        let (api_sender, api_rx) = unbounded_channel();

        Self {
            client,
            commands,
            observer: Observer::new(dest, outbound_tx),
            outbound,
            api_sender,
            api_stream: UnboundedReceiverStream::new(api_rx),
            response_subscribers: vec![],
            command_subscribers: vec![],
        }
    }

    /// Start an [`ObserverHandle`] actor feeding this service. Needs a
    /// running actix system
    pub fn handle(&self) -> Addr<ObserverHandle> {
        ObserverHandle(self.api_sender.clone()).start()
    }

    /// Stream of every inbound client message, as classified by the observer
    pub fn subscribe_responses(&mut self) -> UnboundedReceiver<ResponseSummary> {
        let (tx, rx) = unbounded_channel();
        self.response_subscribers.push(tx);
        rx
    }

    /// Stream of the outcome of every command that ran successfully, from
    /// the command listener or an [`ObserverHandle`]
    pub fn subscribe_commands(&mut self) -> UnboundedReceiver<CommandOutcome> {
        let (tx, rx) = unbounded_channel();
        self.command_subscribers.push(tx);
        rx
    }

    pub fn client_addr(&self) -> ObserverResult<SocketAddr> {
        Ok(self.client.local_addr()?)
    }

    pub fn command_addr(&self) -> ObserverResult<SocketAddr> {
        Ok(self.commands.local_addr()?)
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    /// Run until `shutdown` resolves or a socket fails. Returning (or
    /// dropping the service) releases both sockets; outstanding
    /// subscriptions are not deregistered.
    pub async fn run<F>(mut self, shutdown: F) -> ObserverResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut client_buf = [0u8; RECV_BUFFER_SIZE];
        let mut command_buf = [0u8; RECV_BUFFER_SIZE];
        tokio::pin!(shutdown);

        log::debug!("Starting observer service loop");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Observer service shutting down");
                    break;
                }
                res = self.client.recv_from(&mut client_buf) => {
                    let (len, from) = res.map_err(|e| {
                        log::error!("Client socket error {e:}");
                        e
                    })?;
                    self.handle_client_datagram(&client_buf[..len], from);
                }
                res = self.commands.recv_from(&mut command_buf) => {
                    let (len, from) = res.map_err(|e| {
                        log::error!("Command socket error {e:}");
                        e
                    })?;
                    self.handle_command_datagram(&command_buf[..len], from).await?;
                }
                Some(cmd) = self.api_stream.next() => {
                    self.dispatch(cmd).ok();
                }
                Some(msg) = self.outbound.recv() => {
                    let bytes = msg.packet.to_bytes()?;
                    self.client.send_to(&bytes, msg.dest).await.map_err(|e| {
                        log::error!("Error sending to {}: {e:}", msg.dest);
                        e
                    })?;
                }
            };
        }

        Ok(())
    }

    fn handle_client_datagram(&mut self, buf: &[u8], from: SocketAddr) {
        let packet = match Packet::from_bytes(buf) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Dropping undecodable message from {from:}: {e:?}");
                return;
            }
        };

        let summary = self.observer.on_response(&packet, from);
        log::info!("{summary:}");

        self.response_subscribers
            .retain(|sub| sub.send(summary.clone()).is_ok());
    }

    async fn handle_command_datagram(&mut self, buf: &[u8], from: SocketAddr) -> ObserverResult<()> {
        let packet = match Packet::from_bytes(buf) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Dropping undecodable command from {from:}: {e:?}");
                return Ok(());
            }
        };

        if matches!(
            packet.header.get_type(),
            MessageType::Acknowledgement | MessageType::Reset
        ) {
            log::debug!("Ignoring {:?} on command socket", packet.header.get_type());
            return Ok(());
        }

        let status = if command::is_post(&packet) {
            let res = self.dispatch(Command::from_packet(&packet));
            command::response_status(&res)
        } else {
            log::warn!("Command from {from:} is not a POST");
            ResponseType::MethodNotAllowed
        };

        if let Some(mut response) = CoapResponse::new(&packet) {
            response.set_status(status);
            let bytes = response.message.to_bytes()?;
            self.commands
                .send_to(&bytes, from)
                .await
                .map_err(|e| log::error!("Unable to acknowledge command from {from:}: {e:}"))
                .ok();
        }
        Ok(())
    }

    fn dispatch(&mut self, cmd: Command) -> ObserverResult<CommandOutcome> {
        log::debug!("Running command {cmd:?}");
        let outcome = cmd.apply(&mut self.observer).map_err(|e| {
            log::error!("Command failed, continuing: {e:}");
            e
        })?;
        self.command_subscribers
            .retain(|sub| sub.send(outcome.clone()).is_ok());
        Ok(outcome)
    }
}
