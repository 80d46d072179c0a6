//! Parsed HTTP messages, correlated exchanges, and the records that flow
//! from input formats to output formats.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity and timing shared by requests and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub connection_id: u64,
    /// Position of the message on its stream, starting at 0.
    pub exchange_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl MessageMeta {
    pub fn new(connection_id: u64, exchange_id: u64) -> Self {
        Self {
            connection_id,
            exchange_id,
            timestamp: Utc::now(),
        }
    }

    /// Correlation key, `connection_id/exchange_id`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.connection_id, self.exchange_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(flatten)]
    pub meta: MessageMeta,
    pub method: String,
    pub uri: String,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub version: u8,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl Request {
    /// First header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(flatten)]
    pub meta: MessageMeta,
    pub status: u16,
    #[serde(default)]
    pub reason: String,
    pub version: u8,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A request or a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn meta(&self) -> &MessageMeta {
        match self {
            Message::Request(r) => &r.meta,
            Message::Response(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut MessageMeta {
        match self {
            Message::Request(r) => &mut r.meta,
            Message::Response(r) => &mut r.meta,
        }
    }

    pub fn key(&self) -> String {
        self.meta().key()
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }
}

/// A request and the response that answered it.
///
/// `response` is `None` when the request timed out waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub request: Request,
    pub response: Option<Response>,
}

impl Exchange {
    /// Time between the request and its response, if both are present and
    /// the response is not stamped earlier.
    pub fn latency(&self) -> Option<Duration> {
        let response = self.response.as_ref()?;
        (response.meta.timestamp - self.request.meta.timestamp)
            .to_std()
            .ok()
    }

    pub fn timed_out(&self) -> bool {
        self.response.is_none()
    }
}

/// Unit of data passed from an input format to every output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Line(String),
    Message(Message),
    Exchange(Exchange),
}

impl From<Exchange> for Record {
    fn from(exchange: Exchange) -> Self {
        Record::Exchange(exchange)
    }
}

impl From<Message> for Record {
    fn from(message: Message) -> Self {
        Record::Message(message)
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(body: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(body.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}
