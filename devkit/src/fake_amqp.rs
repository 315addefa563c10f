/*!
Faux serveur AMQP pour tests sans broker

Écoute sur 127.0.0.1 (port éphémère) et joue le handshake AMQP 0-9-1 côté
broker avec `amq-protocol`:
- start (propriétés serveur fournies) / start-ok (login PLAIN vérifié)
- tune / tune-ok, open / open-ok (vhost vérifié), close / close-ok

Un login refusé (403) ou un vhost inconnu (530) se termine par
`connection.close`, comme RabbitMQ avec `authentication_failure_close`.
*/

use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::connection::{AMQPMethod, Close, CloseOk, OpenOk, Start, Tune};
use amq_protocol::protocol::AMQPClass;
use amq_protocol::types::{LongString, ShortString};
use anyhow::{bail, Result};
use resilience_health::broker::amqp::{connection_frame, read_frame, write_frame, ACCESS_REFUSED};
use resilience_health::ServerProperties;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

const NOT_ALLOWED: u16 = 530;

#[derive(Debug, Clone)]
enum Script {
    Handshake(Broker),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Broker {
    props: ServerProperties,
    credentials: Option<(String, String)>,
    virtual_hosts: Option<Vec<String>>,
}

pub struct FakeAmqpServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    logins: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeAmqpServer {
    /// Démarre un serveur qui annonce ces propriétés et accepte tout login
    pub async fn start(props: &ServerProperties) -> Result<Self> {
        Self::spawn(Script::Handshake(Broker {
            props: props.clone(),
            credentials: None,
            virtual_hosts: None,
        }))
        .await
    }

    /// N'accepte que ce couple utilisateur / mot de passe
    pub async fn start_with_credentials(props: &ServerProperties, username: &str, password: &str) -> Result<Self> {
        Self::spawn(Script::Handshake(Broker {
            props: props.clone(),
            credentials: Some((username.to_string(), password.to_string())),
            virtual_hosts: None,
        }))
        .await
    }

    /// N'ouvre que ces vhosts
    pub async fn start_with_virtual_hosts(props: &ServerProperties, virtual_hosts: &[&str]) -> Result<Self> {
        Self::spawn(Script::Handshake(Broker {
            props: props.clone(),
            credentials: None,
            virtual_hosts: Some(virtual_hosts.iter().map(|v| v.to_string()).collect()),
        }))
        .await
    }

    /// Démarre un serveur qui répond à l'en-tête protocole avec des octets arbitraires
    pub async fn start_with_reply(reply: Vec<u8>) -> Result<Self> {
        Self::spawn(Script::Raw(reply)).await
    }

    async fn spawn(script: Script) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let logins = Arc::new(Mutex::new(Vec::new()));
        let counter = connections.clone();
        let seen = logins.clone();

        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(socket, script, seen).await {
                        debug!("fake AMQP session ended: {e}");
                    }
                });
            }
        });

        debug!("fake AMQP server listening on {addr}");
        Ok(Self {
            addr,
            connections,
            logins,
            handle,
        })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Utilisateurs reçus dans `start-ok`, dans l'ordre
    pub fn logins(&self) -> Vec<String> {
        self.logins.lock().unwrap().clone()
    }
}

impl Drop for FakeAmqpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut socket: TcpStream, script: Script, logins: Arc<Mutex<Vec<String>>>) -> Result<()> {
    let mut header = [0u8; 8];
    socket.read_exact(&mut header).await?;

    let broker = match script {
        Script::Raw(reply) => {
            socket.write_all(&reply).await?;
            socket.flush().await?;
            return Ok(());
        }
        Script::Handshake(broker) => broker,
    };

    let start = Start {
        version_major: 0,
        version_minor: 9,
        server_properties: broker.props.clone(),
        mechanisms: LongString::from("PLAIN AMQPLAIN".to_string()),
        locales: LongString::from("en_US".to_string()),
    };
    write_frame(&mut socket, &connection_frame(AMQPMethod::Start(start))).await?;

    let start_ok = match read_frame(&mut socket).await? {
        AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::StartOk(start_ok))) => start_ok,
        other => bail!("expected start-ok, got {other:?}"),
    };
    // PLAIN: "\0user\0password"
    let response = start_ok.response.to_string();
    let mut parts = response.split('\0').skip(1);
    let username = parts.next().unwrap_or_default().to_string();
    let password = parts.next().unwrap_or_default().to_string();
    logins.lock().unwrap().push(username.clone());

    if let Some((expected_user, expected_password)) = &broker.credentials {
        if (&username, &password) != (expected_user, expected_password) {
            let reason = "ACCESS_REFUSED - Login was refused using authentication mechanism PLAIN";
            return refuse(&mut socket, ACCESS_REFUSED, reason).await;
        }
    }

    let tune = Tune {
        channel_max: 2047,
        frame_max: 131_072,
        heartbeat: 60,
    };
    write_frame(&mut socket, &connection_frame(AMQPMethod::Tune(tune))).await?;

    match read_frame(&mut socket).await? {
        AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::TuneOk(_))) => {}
        other => bail!("expected tune-ok, got {other:?}"),
    }
    let virtual_host = match read_frame(&mut socket).await? {
        AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::Open(open))) => open.virtual_host.as_str().to_string(),
        other => bail!("expected open, got {other:?}"),
    };

    if let Some(allowed) = &broker.virtual_hosts {
        if !allowed.contains(&virtual_host) {
            let reason = format!("NOT_ALLOWED - vhost {virtual_host} not found");
            return refuse(&mut socket, NOT_ALLOWED, &reason).await;
        }
    }
    write_frame(&mut socket, &connection_frame(AMQPMethod::OpenOk(OpenOk {}))).await?;

    if let AMQPFrame::Method(_, AMQPClass::Connection(AMQPMethod::Close(_))) = read_frame(&mut socket).await? {
        write_frame(&mut socket, &connection_frame(AMQPMethod::CloseOk(CloseOk {}))).await?;
    }
    Ok(())
}

async fn refuse(socket: &mut TcpStream, reply_code: u16, reason: &str) -> Result<()> {
    let close = Close {
        reply_code,
        reply_text: ShortString::from(reason.to_string()),
        class_id: 0,
        method_id: 0,
    };
    write_frame(socket, &connection_frame(AMQPMethod::Close(close))).await?;
    Ok(())
}
