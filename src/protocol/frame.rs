//! STOMP frame model: commands, ordered headers, and frame builders.
//!
//! A frame is the protocol unit exchanged on a connection: a command, an
//! ordered list of headers, and an opaque body. Header order matters for
//! the repeated-header rule (the first occurrence wins), so headers are a
//! list of pairs rather than a map.

use std::fmt;

/// Reserved header names used by the session engine.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEARTBEAT: &str = "heart-beat";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const TRANSACTION: &str = "transaction";
    pub const VERSION: &str = "version";
}

/// STOMP frame commands, client and server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
    /// Heartbeat. Serialized as a bare EOL, never parsed as a command line.
    Ping,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Ping => "PING",
        }
    }

    /// Parse a command line. `PING` is intentionally absent: heartbeats are
    /// bare EOLs and never reach the command parser.
    pub fn from_name(name: &str) -> Option<Command> {
        match name {
            "CONNECT" => Some(Command::Connect),
            "STOMP" => Some(Command::Stomp),
            "CONNECTED" => Some(Command::Connected),
            "SEND" => Some(Command::Send),
            "SUBSCRIBE" => Some(Command::Subscribe),
            "UNSUBSCRIBE" => Some(Command::Unsubscribe),
            "ACK" => Some(Command::Ack),
            "NACK" => Some(Command::Nack),
            "BEGIN" => Some(Command::Begin),
            "COMMIT" => Some(Command::Commit),
            "ABORT" => Some(Command::Abort),
            "DISCONNECT" => Some(Command::Disconnect),
            "MESSAGE" => Some(Command::Message),
            "RECEIPT" => Some(Command::Receipt),
            "ERROR" => Some(Command::Error),
            _ => None,
        }
    }

    /// CONNECT, STOMP and CONNECTED headers are exchanged before the escaping
    /// rules apply (STOMP 1.2 §, "Value Encoding").
    pub fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list. Lookup returns the first value for a key; later
/// occurrences are kept for serialization fidelity but never consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Append an entry, keeping any existing occurrences.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Replace the first occurrence or append when absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.into(),
            None => self.entries.push((key.to_string(), value.into())),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A complete STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn destination(&self) -> Option<&str> {
        self.header(headers::DESTINATION)
    }

    pub fn id(&self) -> Option<&str> {
        self.header(headers::ID)
    }

    pub fn transaction(&self) -> Option<&str> {
        self.header(headers::TRANSACTION)
    }

    pub fn receipt(&self) -> Option<&str> {
        self.header(headers::RECEIPT)
    }

    pub fn body_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Heartbeat frame; serializes as a single EOL.
    pub fn ping() -> Self {
        Frame::new(Command::Ping)
    }

    /// CONNECTED reply after a successful negotiation.
    pub fn connected(version: &str, session: &str, server: &str, heartbeat: &str) -> Self {
        Frame::new(Command::Connected)
            .with_header(headers::VERSION, version)
            .with_header(headers::SESSION, session)
            .with_header(headers::SERVER, server)
            .with_header(headers::HEARTBEAT, heartbeat)
    }

    /// RECEIPT acknowledging the frame carrying `receipt: receipt_id`.
    pub fn receipt_for(receipt_id: &str) -> Self {
        Frame::new(Command::Receipt).with_header(headers::RECEIPT_ID, receipt_id)
    }

    /// ERROR frame with a `message` header and a human-readable body.
    pub fn error(message: &str, details: &str) -> Self {
        let body = details.as_bytes().to_vec();
        let mut frame = Frame::new(Command::Error)
            .with_header(headers::MESSAGE, message)
            .with_header(headers::CONTENT_TYPE, "text/plain");
        frame
            .headers
            .add(headers::CONTENT_LENGTH, body.len().to_string());
        frame.body = body;
        frame
    }

    /// Build the MESSAGE delivered to one subscriber for a SEND frame.
    ///
    /// The SEND headers are copied (destination and any application headers,
    /// including `transaction` when the send was transactional), then the
    /// per-delivery headers are stamped on top. `ack_id` is set only when the
    /// subscription expects acknowledgements.
    pub fn message(send: &Frame, subscription_id: &str, message_id: &str, ack_id: Option<&str>) -> Self {
        let mut frame = Frame::new(Command::Message);
        for (k, v) in send.headers.iter() {
            if k == headers::RECEIPT {
                continue;
            }
            frame.headers.add(k, v);
        }
        frame.headers.set(headers::SUBSCRIPTION, subscription_id);
        frame.headers.set(headers::MESSAGE_ID, message_id);
        if let Some(ack) = ack_id {
            frame.headers.set(headers::ACK, ack);
        }
        frame
            .headers
            .set(headers::CONTENT_LENGTH, send.body.len().to_string());
        frame.body = send.body.clone();
        frame
    }
}

impl fmt::Display for Frame {
    /// Compact rendering used in ERROR bodies and logs; not the wire format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.command)?;
        for (k, v) in self.headers.iter() {
            writeln!(f, "{k}:{v}")?;
        }
        if !self.body.is_empty() {
            writeln!(f)?;
            write!(f, "{}", String::from_utf8_lossy(&self.body))?;
        }
        Ok(())
    }
}
