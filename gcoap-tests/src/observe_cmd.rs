use clap::Parser;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
use std::net::SocketAddr;
use tokio::{net::UdpSocket, time::Duration};

/// Send one command POST to a running observer's command listener and
/// print the response code.
#[derive(Parser, Debug)]
#[command(name = "observe-cmd")]
struct Args {
    /// Command listener address, i.e. the observer's source port + 1
    #[arg(short = 'a', long = "addr", default_value = "[::1]:5684")]
    addr: SocketAddr,
    /// Command path, e.g. /reg/stats or /notif/con_reset
    path: String,
    /// Hex token for /reg/<key>, sent as the Uri-Query
    #[arg(short = 't', long = "token")]
    token: Option<String>,
    /// Send as confirmable rather than non-confirmable
    #[arg(long)]
    con: bool,
    /// Seconds to wait for the command response
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

#[actix::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut packet = Packet::new();
    packet.header.set_type(if args.con {
        MessageType::Confirmable
    } else {
        MessageType::NonConfirmable
    });
    packet.header.code = MessageClass::Request(RequestType::Post);
    packet.header.message_id = rand::random();
    packet.set_token(gcoap_observer::Token::random().into_bytes());
    for segment in args.path.split('/').filter(|s| !s.is_empty()) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    if let Some(query) = &args.token {
        packet.add_option(CoapOption::UriQuery, query.as_bytes().to_vec());
    }

    let bind: SocketAddr = if args.addr.is_ipv6() {
        "[::]:0".parse()?
    } else {
        "0.0.0.0:0".parse()?
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.send_to(&packet.to_bytes()?, args.addr).await?;
    log::info!("Sent {} to {}", args.path, args.addr);

    let mut buf = [0u8; 1280];
    let (len, from) = tokio::time::timeout(
        Duration::from_secs(args.timeout),
        socket.recv_from(&mut buf),
    )
    .await
    .map_err(|e| {
        log::error!("No response from {}", args.addr);
        e
    })??;

    let response = Packet::from_bytes(&buf[..len])?;
    log::debug!("Response from {from:}: {:?}", response.header.get_type());
    println!(
        "Response code: {}",
        gcoap_observer::message::format_code(response.header.code)
    );
    Ok(())
}
