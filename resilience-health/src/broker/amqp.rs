//! AMQP 0-9-1 connection check
//!
//! Frames are encoded and parsed with `amq-protocol`. The connector runs the
//! opening handshake with the configured credentials (start/start-ok,
//! tune/tune-ok, open/open-ok), keeps the server properties announced in
//! `connection.start`, then closes the connection. No channel is opened.

use super::{BrokerConnector, ServerProperties};
use crate::config::RabbitConnectionConf;
use crate::error::HealthError;
use crate::management::GUEST;
use amq_protocol::frame::{gen_frame, parse_frame, AMQPFrame, ProtocolVersion};
use amq_protocol::protocol::connection::{AMQPMethod, Close, Open, StartOk, TuneOk};
use amq_protocol::protocol::AMQPClass;
use amq_protocol::types::{AMQPValue, FieldTable, LongString, ShortString};
use async_trait::async_trait;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Upper bound before tune negotiation (RabbitMQ's default `frame_max`).
pub const MAX_FRAME_SIZE: usize = 131_072;

const FRAME_OVERHEAD: usize = 8;

pub const ACCESS_REFUSED: u16 = 403;

#[derive(Debug, Clone)]
pub struct AmqpConnector {
    host: String,
    port: u16,
    username: String,
    password: String,
    virtual_host: String,
}

impl AmqpConnector {
    /// Connector using the guest account on the default virtual host.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: GUEST.into(),
            password: GUEST.into(),
            virtual_host: "/".into(),
        }
    }

    pub fn from_connection(conn: &RabbitConnectionConf) -> Self {
        Self::new(conn.host.clone(), conn.port)
            .with_credentials(
                conn.username.as_deref().unwrap_or(GUEST),
                conn.password.as_deref().unwrap_or(GUEST),
            )
            .with_virtual_host(conn.virtual_host.clone())
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.virtual_host = virtual_host.into();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<ServerProperties, HealthError> {
        write_frame(stream, &AMQPFrame::ProtocolHeader(ProtocolVersion::amqp_0_9_1())).await?;

        let start = match read_frame(stream).await? {
            AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::Start(start))) => start,
            other => return Err(unexpected("connection.start", &other)),
        };
        if !start.mechanisms.to_string().split_whitespace().any(|m| m == "PLAIN") {
            return Err(HealthError::Protocol(format!(
                "{} does not offer PLAIN authentication",
                self.address()
            )));
        }

        let start_ok = StartOk {
            client_properties: client_properties(),
            mechanism: short("PLAIN"),
            response: LongString::from(format!("\0{}\0{}", self.username, self.password)),
            locale: short("en_US"),
        };
        write_frame(stream, &connection_frame(AMQPMethod::StartOk(start_ok))).await?;

        let tune = match read_frame(stream).await? {
            AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::Tune(tune))) => tune,
            AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::Close(close))) => {
                return Err(self.refused(&close))
            }
            other => return Err(unexpected("connection.tune", &other)),
        };
        let tune_ok = TuneOk {
            channel_max: tune.channel_max,
            frame_max: tune.frame_max,
            heartbeat: 0,
        };
        write_frame(stream, &connection_frame(AMQPMethod::TuneOk(tune_ok))).await?;

        let open = Open {
            virtual_host: short(&self.virtual_host),
        };
        write_frame(stream, &connection_frame(AMQPMethod::Open(open))).await?;
        match read_frame(stream).await? {
            AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::OpenOk(_))) => {}
            AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::Close(close))) => {
                return Err(self.refused(&close))
            }
            other => return Err(unexpected("connection.open-ok", &other)),
        }

        let close = Close {
            reply_code: 200,
            reply_text: short("health check done"),
            class_id: 0,
            method_id: 0,
        };
        write_frame(stream, &connection_frame(AMQPMethod::Close(close))).await?;
        // close-ok is a courtesy at this point
        let _ = read_frame(stream).await;

        Ok(start.server_properties)
    }

    fn refused(&self, close: &Close) -> HealthError {
        HealthError::ConnectionFailure(format!(
            "{} closed the connection: {} {}",
            self.address(),
            close.reply_code,
            close.reply_text.as_str()
        ))
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn server_properties(&self) -> Result<ServerProperties, HealthError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| HealthError::ConnectionFailure(format!("{}: {}", self.address(), e)))?;

        let props = self.handshake(&mut stream).await?;
        let _ = stream.shutdown().await;

        debug!(
            "{} opened vhost {} as {}, {} server properties",
            self.address(),
            self.virtual_host,
            self.username,
            props.inner().len()
        );
        Ok(props)
    }
}

pub fn connection_frame(method: AMQPMethod) -> AMQPFrame {
    AMQPFrame::Method(0, AMQPClass::Connection(method))
}

pub fn encode_frame(frame: &AMQPFrame) -> Result<Vec<u8>, HealthError> {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let (_, written) = cookie_factory::gen(gen_frame(frame), Cursor::new(&mut buf[..]))
        .map_err(|e| HealthError::Protocol(format!("cannot encode frame: {e:?}")))?;
    buf.truncate(written as usize);
    Ok(buf)
}

pub async fn write_frame<W>(stream: &mut W, frame: &AMQPFrame) -> Result<(), HealthError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&encode_frame(frame)?).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one complete frame off the stream and parses it.
pub async fn read_frame<R>(stream: &mut R) -> Result<AMQPFrame, HealthError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await?;
    if header.starts_with(b"AMQP") {
        // the peer answered with its own protocol header: version mismatch
        return Err(HealthError::Protocol("peer refused protocol version 0-9-1".into()));
    }

    let size = u32::from_be_bytes([header[3], header[4], header[5], header[6]]) as usize;
    if size + FRAME_OVERHEAD > MAX_FRAME_SIZE {
        return Err(HealthError::Protocol(format!("frame too large ({size} bytes)")));
    }

    let mut raw = vec![0u8; size + FRAME_OVERHEAD];
    raw[..7].copy_from_slice(&header);
    stream.read_exact(&mut raw[7..]).await?;

    match parse_frame(raw.as_slice()) {
        Ok((_, frame)) => Ok(frame),
        Err(err) => Err(HealthError::Protocol(format!("malformed frame: {err:?}"))),
    }
}

fn unexpected(expected: &str, frame: &AMQPFrame) -> HealthError {
    HealthError::Protocol(format!("expected {expected}, got {frame:?}"))
}

fn short(value: &str) -> ShortString {
    value.to_string().into()
}

fn client_properties() -> FieldTable {
    let mut capabilities = FieldTable::default();
    capabilities.insert(short("authentication_failure_close"), AMQPValue::Boolean(true));

    let mut props = FieldTable::default();
    props.insert(
        short("product"),
        AMQPValue::LongString(LongString::from(env!("CARGO_PKG_NAME").to_string())),
    );
    props.insert(
        short("version"),
        AMQPValue::LongString(LongString::from(env!("CARGO_PKG_VERSION").to_string())),
    );
    props.insert(short("capabilities"), AMQPValue::FieldTable(capabilities));
    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use amq_protocol::protocol::connection::Tune;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let tune = Tune {
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat: 60,
        };
        write_frame(&mut server, &connection_frame(AMQPMethod::Tune(tune))).await.unwrap();

        match read_frame(&mut client).await.unwrap() {
            AMQPFrame::Method(0, AMQPClass::Connection(AMQPMethod::Tune(read))) => {
                assert_eq!(read.channel_max, 2047);
                assert_eq!(read.heartbeat, 60);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_protocol_header_reply_is_a_mismatch() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"AMQP\x00\x00\x09\x01").await.unwrap();
        let err = read_frame(&mut client).await.unwrap_err();
        assert!(matches!(err, HealthError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_refused() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = vec![1u8, 0, 0];
        header.extend_from_slice(&(MAX_FRAME_SIZE as u32).to_be_bytes());
        server.write_all(&header).await.unwrap();
        let err = read_frame(&mut client).await.unwrap_err();
        assert!(matches!(err, HealthError::Protocol(msg) if msg.starts_with("frame too large")));
    }

    #[test]
    fn test_from_connection_defaults_to_guest() {
        let connector = AmqpConnector::from_connection(&RabbitConnectionConf::default());
        assert_eq!(connector.username, GUEST);
        assert_eq!(connector.password, GUEST);
        assert_eq!(connector.virtual_host, "/");
        assert_eq!(connector.address(), "localhost:5672");
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = AmqpConnector::new("127.0.0.1", port)
            .server_properties()
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::ConnectionFailure(_)));
    }
}
