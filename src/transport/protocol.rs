//! Text wire protocol spoken between the embedded broker and its clients.
//!
//! The protocol is the core subset of the NATS client protocol: every
//! operation is one CRLF-terminated control line, and `PUB` / `MSG` are
//! followed by a payload of the announced byte length plus CRLF.
//!
//! ```text
//! S: INFO {"server_id":"…","max_payload":1048576,…}
//! C: CONNECT {"verbose":false,"name":"pa-1a2b3c4d"}
//! C: SUB controle-formats-IN pac0 1
//! C: PING
//! S: PONG
//! C: PUB controle-formats-IN 5
//! C: hello
//! S: MSG controle-formats-IN 1 5
//! S: hello
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::HarnessError;

const CRLF: &[u8] = b"\r\n";

/// Longest control line accepted before the peer is considered hostile.
pub const MAX_CONTROL_LINE: usize = 4096;

/// Server description sent in the `INFO` greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Random identity of the broker process.
    pub server_id: String,
    /// Human-readable broker name.
    pub server_name: String,
    /// Broker version string.
    pub version: String,
    /// Host the broker listens on.
    pub host: String,
    /// Port the broker listens on.
    pub port: u16,
    /// Largest accepted payload in bytes.
    pub max_payload: usize,
    /// Protocol revision.
    #[serde(default)]
    pub proto: u8,
}

/// Client options sent with `CONNECT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    /// Ask the server to acknowledge every operation with `+OK`.
    #[serde(default)]
    pub verbose: bool,
    /// Ask the server to perform strict subject checks.
    #[serde(default)]
    pub pedantic: bool,
    /// Client name, shown in broker logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Client implementation language.
    #[serde(default)]
    pub lang: String,
    /// Client version.
    #[serde(default)]
    pub version: String,
}

/// Operations sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOp {
    /// Handshake options.
    Connect(ConnectInfo),
    /// Publish a payload.
    Pub {
        /// Target subject.
        subject: String,
        /// Optional reply subject.
        reply_to: Option<String>,
        /// Payload bytes.
        payload: Vec<u8>,
    },
    /// Register interest in a subject pattern.
    Sub {
        /// Subject pattern.
        subject: String,
        /// Optional queue group.
        queue: Option<String>,
        /// Client-chosen subscription id.
        sid: u64,
    },
    /// Drop interest, optionally after `max` more messages.
    Unsub {
        /// Subscription id.
        sid: u64,
        /// Auto-unsubscribe threshold.
        max: Option<u64>,
    },
    /// Keep-alive / flush probe.
    Ping,
    /// Answer to a server `PING`.
    Pong,
}

/// Operations sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    /// Greeting.
    Info(ServerInfo),
    /// Delivered message.
    Msg {
        /// Subject the message was published on.
        subject: String,
        /// Subscription id it was delivered for.
        sid: u64,
        /// Optional reply subject.
        reply_to: Option<String>,
        /// Payload bytes.
        payload: Vec<u8>,
    },
    /// Acknowledgement in verbose mode.
    Ok,
    /// Protocol error; the text is the reason without quotes.
    Err(String),
    /// Keep-alive probe.
    Ping,
    /// Answer to a client `PING`.
    Pong,
}

impl ClientOp {
    /// Encodes the operation to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Json`] if the `CONNECT` options fail to
    /// serialize.
    pub fn encode(&self) -> Result<Vec<u8>, HarnessError> {
        let mut out = Vec::new();
        match self {
            Self::Connect(info) => {
                out.extend_from_slice(b"CONNECT ");
                out.extend_from_slice(&serde_json::to_vec(info)?);
                out.extend_from_slice(CRLF);
            }
            Self::Pub {
                subject,
                reply_to,
                payload,
            } => {
                let head = match reply_to {
                    Some(reply) => format!("PUB {subject} {reply} {}", payload.len()),
                    None => format!("PUB {subject} {}", payload.len()),
                };
                push_with_payload(&mut out, &head, payload);
            }
            Self::Sub {
                subject,
                queue,
                sid,
            } => {
                let line = match queue {
                    Some(queue) => format!("SUB {subject} {queue} {sid}\r\n"),
                    None => format!("SUB {subject} {sid}\r\n"),
                };
                out.extend_from_slice(line.as_bytes());
            }
            Self::Unsub { sid, max } => {
                let line = match max {
                    Some(max) => format!("UNSUB {sid} {max}\r\n"),
                    None => format!("UNSUB {sid}\r\n"),
                };
                out.extend_from_slice(line.as_bytes());
            }
            Self::Ping => out.extend_from_slice(b"PING\r\n"),
            Self::Pong => out.extend_from_slice(b"PONG\r\n"),
        }
        Ok(out)
    }
}

impl ServerOp {
    /// Encodes the operation to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Json`] if the `INFO` block fails to
    /// serialize.
    pub fn encode(&self) -> Result<Vec<u8>, HarnessError> {
        let mut out = Vec::new();
        match self {
            Self::Info(info) => {
                out.extend_from_slice(b"INFO ");
                out.extend_from_slice(&serde_json::to_vec(info)?);
                out.extend_from_slice(CRLF);
            }
            Self::Msg {
                subject,
                sid,
                reply_to,
                payload,
            } => {
                let head = match reply_to {
                    Some(reply) => format!("MSG {subject} {sid} {reply} {}", payload.len()),
                    None => format!("MSG {subject} {sid} {}", payload.len()),
                };
                push_with_payload(&mut out, &head, payload);
            }
            Self::Ok => out.extend_from_slice(b"+OK\r\n"),
            Self::Err(reason) => out.extend_from_slice(format!("-ERR '{reason}'\r\n").as_bytes()),
            Self::Ping => out.extend_from_slice(b"PING\r\n"),
            Self::Pong => out.extend_from_slice(b"PONG\r\n"),
        }
        Ok(out)
    }
}

fn push_with_payload(out: &mut Vec<u8>, head: &str, payload: &[u8]) {
    out.reserve(head.len() + payload.len() + 4);
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(CRLF);
    out.extend_from_slice(payload);
    out.extend_from_slice(CRLF);
}

/// Reads one control line. Returns `None` on a clean end of stream.
async fn read_control_line<R>(reader: &mut R) -> Result<Option<String>, HarnessError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(MAX_CONTROL_LINE as u64)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(HarnessError::Protocol(format!(
            "control line longer than {MAX_CONTROL_LINE} bytes or truncated"
        )));
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn read_payload<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, HarnessError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = vec![0u8; len.saturating_add(CRLF.len())];
    reader.read_exact(&mut buf).await?;
    if !buf.ends_with(CRLF) {
        return Err(HarnessError::Protocol(
            "payload not terminated by CRLF".to_string(),
        ));
    }
    buf.truncate(len);
    Ok(buf)
}

fn parse_u64(token: &str, what: &str) -> Result<u64, HarnessError> {
    token
        .parse()
        .map_err(|_| HarnessError::Protocol(format!("invalid {what}: {token:?}")))
}

fn parse_len(token: &str, max_payload: usize) -> Result<usize, HarnessError> {
    let len = usize::try_from(parse_u64(token, "payload size")?)
        .map_err(|_| HarnessError::Protocol(format!("payload size {token} overflows")))?;
    if len > max_payload {
        return Err(HarnessError::Protocol(format!(
            "maximum payload exceeded ({len} > {max_payload})"
        )));
    }
    Ok(len)
}

/// Splits a control line into its upper-cased verb and the remaining args.
fn split_verb(line: &str) -> (String, Vec<&str>) {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default().to_ascii_uppercase();
    (verb, parts.collect())
}

/// Splits `VERB {json}` into the JSON text.
fn json_arg<'a>(line: &'a str, verb: &str) -> &'a str {
    line.get(verb.len()..).unwrap_or_default().trim()
}

/// Reads the next client operation.
///
/// Returns `Ok(None)` when the client closed the stream between
/// operations.
///
/// # Errors
///
/// Returns [`HarnessError::Protocol`] on malformed input (including
/// payloads larger than `max_payload`) and [`HarnessError::Io`] on socket
/// failures.
pub async fn read_client_op<R>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Option<ClientOp>, HarnessError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = read_control_line(reader).await? else {
            return Ok(None);
        };
        if line.trim().is_empty() {
            continue;
        }
        let (verb, args) = split_verb(&line);
        let op = match (verb.as_str(), args.as_slice()) {
            ("CONNECT", _) => {
                let info: ConnectInfo = serde_json::from_str(json_arg(&line, "CONNECT"))
                    .map_err(|e| HarnessError::Protocol(format!("bad CONNECT: {e}")))?;
                ClientOp::Connect(info)
            }
            ("PUB", [subject, len]) => {
                let len = parse_len(len, max_payload)?;
                ClientOp::Pub {
                    subject: (*subject).to_string(),
                    reply_to: None,
                    payload: read_payload(reader, len).await?,
                }
            }
            ("PUB", [subject, reply, len]) => {
                let len = parse_len(len, max_payload)?;
                ClientOp::Pub {
                    subject: (*subject).to_string(),
                    reply_to: Some((*reply).to_string()),
                    payload: read_payload(reader, len).await?,
                }
            }
            ("SUB", [subject, sid]) => ClientOp::Sub {
                subject: (*subject).to_string(),
                queue: None,
                sid: parse_u64(sid, "sid")?,
            },
            ("SUB", [subject, queue, sid]) => ClientOp::Sub {
                subject: (*subject).to_string(),
                queue: Some((*queue).to_string()),
                sid: parse_u64(sid, "sid")?,
            },
            ("UNSUB", [sid]) => ClientOp::Unsub {
                sid: parse_u64(sid, "sid")?,
                max: None,
            },
            ("UNSUB", [sid, max]) => ClientOp::Unsub {
                sid: parse_u64(sid, "sid")?,
                max: Some(parse_u64(max, "max msgs")?),
            },
            ("PING", []) => ClientOp::Ping,
            ("PONG", []) => ClientOp::Pong,
            _ => {
                return Err(HarnessError::Protocol(format!(
                    "unknown protocol operation: {line:?}"
                )));
            }
        };
        return Ok(Some(op));
    }
}

/// Reads the next server operation.
///
/// # Errors
///
/// Returns [`HarnessError::Protocol`] on malformed input and
/// [`HarnessError::Io`] on socket failures.
pub async fn read_server_op<R>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Option<ServerOp>, HarnessError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = read_control_line(reader).await? else {
            return Ok(None);
        };
        if line.trim().is_empty() {
            continue;
        }
        let (verb, args) = split_verb(&line);
        let op = match (verb.as_str(), args.as_slice()) {
            ("INFO", _) => {
                let info: ServerInfo = serde_json::from_str(json_arg(&line, "INFO"))
                    .map_err(|e| HarnessError::Protocol(format!("bad INFO: {e}")))?;
                ServerOp::Info(info)
            }
            ("MSG", [subject, sid, len]) => {
                let len = parse_len(len, max_payload)?;
                ServerOp::Msg {
                    subject: (*subject).to_string(),
                    sid: parse_u64(sid, "sid")?,
                    reply_to: None,
                    payload: read_payload(reader, len).await?,
                }
            }
            ("MSG", [subject, sid, reply, len]) => {
                let len = parse_len(len, max_payload)?;
                ServerOp::Msg {
                    subject: (*subject).to_string(),
                    sid: parse_u64(sid, "sid")?,
                    reply_to: Some((*reply).to_string()),
                    payload: read_payload(reader, len).await?,
                }
            }
            ("+OK", []) => ServerOp::Ok,
            ("-ERR", _) => {
                let reason = json_arg(&line, "-ERR").trim_matches('\'').to_string();
                ServerOp::Err(reason)
            }
            ("PING", []) => ServerOp::Ping,
            ("PONG", []) => ServerOp::Pong,
            _ => {
                return Err(HarnessError::Protocol(format!(
                    "unknown protocol operation: {line:?}"
                )));
            }
        };
        return Ok(Some(op));
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode_client(bytes: &[u8]) -> Vec<ClientOp> {
        let mut reader = BufReader::new(bytes);
        let mut ops = Vec::new();
        loop {
            match read_client_op(&mut reader, 1024).await {
                Ok(Some(op)) => ops.push(op),
                Ok(None) => return ops,
                Err(e) => panic!("decode failed: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn decodes_pipelined_client_ops() {
        let wire = b"CONNECT {\"verbose\":false,\"name\":\"pa\"}\r\n\
                     SUB controle-formats-IN pac0 7\r\n\
                     PUB test 5\r\nhello\r\n\
                     PUB test inbox.1 0\r\n\r\n\
                     UNSUB 7 2\r\n\
                     ping\r\n";
        let ops = decode_client(wire).await;
        assert_eq!(ops.len(), 6);
        assert_eq!(
            ops.get(1),
            Some(&ClientOp::Sub {
                subject: "controle-formats-IN".to_string(),
                queue: Some("pac0".to_string()),
                sid: 7,
            })
        );
        assert_eq!(
            ops.get(2),
            Some(&ClientOp::Pub {
                subject: "test".to_string(),
                reply_to: None,
                payload: b"hello".to_vec(),
            })
        );
        assert_eq!(
            ops.get(3),
            Some(&ClientOp::Pub {
                subject: "test".to_string(),
                reply_to: Some("inbox.1".to_string()),
                payload: Vec::new(),
            })
        );
        assert_eq!(ops.get(4), Some(&ClientOp::Unsub { sid: 7, max: Some(2) }));
        assert_eq!(ops.get(5), Some(&ClientOp::Ping));
    }

    #[tokio::test]
    async fn payload_with_crlf_inside_is_preserved() {
        let op = ClientOp::Pub {
            subject: "x".to_string(),
            reply_to: None,
            payload: b"a\r\nb".to_vec(),
        };
        let Ok(wire) = op.encode() else {
            panic!("encode failed");
        };
        assert_eq!(decode_client(&wire).await, vec![op]);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let mut reader = BufReader::new(&b"PUB test 2048\r\n"[..]);
        let result = read_client_op(&mut reader, 1024).await;
        assert!(matches!(result, Err(HarnessError::Protocol(_))));
    }

    #[tokio::test]
    async fn unknown_verb_is_rejected() {
        let mut reader = BufReader::new(&b"HELLO world\r\n"[..]);
        let result = read_client_op(&mut reader, 1024).await;
        assert!(matches!(result, Err(HarnessError::Protocol(_))));
    }

    #[tokio::test]
    async fn decodes_server_ops() {
        let info = ServerInfo {
            server_id: "abc".to_string(),
            server_name: "pac-broker".to_string(),
            version: "0.1.0".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4222,
            max_payload: 1024,
            proto: 1,
        };
        let mut wire = Vec::new();
        for op in [
            ServerOp::Info(info.clone()),
            ServerOp::Msg {
                subject: "test".to_string(),
                sid: 3,
                reply_to: None,
                payload: b"Hi!".to_vec(),
            },
            ServerOp::Err("Unknown Protocol Operation".to_string()),
            ServerOp::Pong,
        ] {
            let Ok(bytes) = op.encode() else {
                panic!("encode failed");
            };
            wire.extend_from_slice(&bytes);
        }

        let mut reader = BufReader::new(wire.as_slice());
        let Ok(Some(ServerOp::Info(decoded))) = read_server_op(&mut reader, 1024).await else {
            panic!("expected INFO");
        };
        assert_eq!(decoded, info);
        let Ok(Some(ServerOp::Msg { sid, payload, .. })) = read_server_op(&mut reader, 1024).await
        else {
            panic!("expected MSG");
        };
        assert_eq!(sid, 3);
        assert_eq!(payload, b"Hi!");
        let Ok(Some(ServerOp::Err(reason))) = read_server_op(&mut reader, 1024).await else {
            panic!("expected -ERR");
        };
        assert_eq!(reason, "Unknown Protocol Operation");
        assert!(matches!(
            read_server_op(&mut reader, 1024).await,
            Ok(Some(ServerOp::Pong))
        ));
        assert!(matches!(read_server_op(&mut reader, 1024).await, Ok(None)));
    }
}
