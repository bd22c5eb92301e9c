//! Helpers for building and inspecting the few CoAP messages the observer
//! deals with, on top of [`coap_lite::Packet`]

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};

/// Observe option value that registers for notifications (RFC 7641)
pub const OBSERVE_REGISTER: u32 = 0;

/// Observe option value that deregisters
pub const OBSERVE_DEREGISTER: u32 = 1;

/// Render a message code as `class.detail`, e.g. `2.05` or `0.00`
pub fn format_code(code: MessageClass) -> String {
    let raw = u8::from(code);
    format!("{}.{:02}", raw >> 5, raw & 0x1f)
}

/// Minimal big-endian encoding of a CoAP uint option value; zero is the
/// empty string
pub fn encode_uint(value: u32) -> Vec<u8> {
    value
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect()
}

pub fn decode_uint(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

/// Number of Observe options on the message and the value of the first
pub fn observe_option(packet: &Packet) -> (usize, Option<u32>) {
    match packet.get_option(CoapOption::Observe) {
        Some(values) => (values.len(), values.front().map(|v| decode_uint(v))),
        None => (0, None),
    }
}

/// Build a non-confirmable Observe GET for the given path segments
pub fn observe_request(
    segments: &[&str],
    observe: u32,
    token: Vec<u8>,
    message_id: u16,
) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_version(1);
    packet.header.set_type(MessageType::NonConfirmable);
    packet.header.code = MessageClass::Request(RequestType::Get);
    packet.header.message_id = message_id;
    packet.set_token(token);

    for segment in segments {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet.add_option(CoapOption::Observe, encode_uint(observe));

    packet
}

/// Build an empty ACK or RST answering `message`: same message ID, no token
pub fn empty_reply(message: &Packet, reply: MessageType) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_version(1);
    packet.header.set_type(reply);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message.header.message_id;
    packet.set_token(vec![]);
    packet
}

/// Uri-Path options joined into an absolute path, e.g. `/reg/stats`
pub fn uri_path(packet: &Packet) -> String {
    let mut path = String::new();
    if let Some(segments) = packet.get_option(CoapOption::UriPath) {
        for segment in segments {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(segment));
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Uri-Query options joined with `&`, or `None` if the message has none
pub fn uri_query(packet: &Packet) -> Option<String> {
    let queries = packet.get_option(CoapOption::UriQuery)?;
    let query = queries
        .iter()
        .map(|q| String::from_utf8_lossy(q).into_owned())
        .collect::<Vec<_>>()
        .join("&");
    Some(query)
}
