// SKDP Transport
// TCP plumbing around the sans-IO state machines: packet framing, the
// networked key exchange drivers, and the per-session keep-alive task.
//
// One key exchange and one record-layer session per connected socket. A
// server process hosts many sessions concurrently; sessions share nothing.
// Within a session, the session state and the socket writer sit behind
// per-session async mutexes so the receive loop, the application send path
// and the keep-alive task serialize their access.

use crate::error::{SkdpError, SkdpResult};
use crate::keepalive::{self, KeepAliveState};
use crate::keys::{DeviceKey, ServerKey};
use crate::packet::{NetworkPacket, PacketFlag};
use crate::protocol::client::ClientSession;
use crate::protocol::server::ServerSession;
use crate::{HEADER_SIZE, KEEPALIVE_TIMEOUT, MESSAGE_MAX, SEQUENCE_TERMINATOR};
use rand::rngs::OsRng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Writes one packet to the stream.
pub async fn send_packet<W>(writer: &mut W, packet: &NetworkPacket) -> SkdpResult<()>
where
    W: AsyncWrite + Unpin,
{
    let stream = packet.to_stream()?;
    writer
        .write_all(&stream)
        .await
        .map_err(|_| SkdpError::TransmitFailure)?;
    writer.flush().await.map_err(|_| SkdpError::TransmitFailure)?;
    Ok(())
}

/// Reads exactly one packet from the stream, rejecting oversize payloads
/// before buffering them.
pub async fn receive_packet<R>(reader: &mut R) -> SkdpResult<NetworkPacket>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| SkdpError::ReceiveFailure)?;
    let mut packet = NetworkPacket::header_deserialize(&header)?;
    let msg_len = packet.msg_len as usize;
    if msg_len > MESSAGE_MAX {
        return Err(SkdpError::InvalidInput);
    }
    let mut payload = vec![0u8; msg_len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| SkdpError::ReceiveFailure)?;
    packet.payload = payload;
    Ok(packet)
}

/// Best-effort error notification so the peer learns the teardown reason.
pub async fn send_error<W>(writer: &mut W, error: SkdpError)
where
    W: AsyncWrite + Unpin,
{
    let packet = NetworkPacket::new(
        PacketFlag::ErrorCondition,
        SEQUENCE_TERMINATOR,
        vec![error.to_code()],
    );
    let _ = send_packet(writer, &packet).await;
}

/// Best-effort terminate record; `None` signals a clean close.
pub async fn send_terminate<W>(writer: &mut W, error: Option<SkdpError>)
where
    W: AsyncWrite + Unpin,
{
    let code = error.map(SkdpError::to_code).unwrap_or(0x00);
    let packet = NetworkPacket::new(
        PacketFlag::ConnectionTerminate,
        SEQUENCE_TERMINATOR,
        vec![code],
    );
    let _ = send_packet(writer, &packet).await;
}

/// An event delivered by a connection receive loop.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A decrypted application message.
    Message(Vec<u8>),
    /// A keep-alive packet was handled out-of-band.
    KeepAlive,
    /// A ratchet request was answered; both channels re-keyed.
    Ratcheted,
    /// The peer closed the session, carrying the transmitted reason if any.
    Closed(Option<SkdpError>),
}

/// Drives the client side of the key exchange over a connected stream.
pub async fn client_key_exchange<S>(session: &mut ClientSession, stream: &mut S) -> SkdpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = async {
        let request = session.connect_request(&mut OsRng)?;
        send_packet(stream, &request).await?;
        let response = receive_packet(stream).await?;

        let request = session.exchange_request(&response, &mut OsRng)?;
        send_packet(stream, &request).await?;
        let response = receive_packet(stream).await?;

        let request = session.establish_request(&response, &mut OsRng)?;
        send_packet(stream, &request).await?;
        let response = receive_packet(stream).await?;

        session.establish_verify(&response)
    }
    .await;

    if let Err(error) = result {
        warn!(?error, "client key exchange failed");
        send_error(stream, error).await;
        let _ = stream.shutdown().await;
        session.dispose();
        return Err(error);
    }
    debug!("client key exchange complete");
    Ok(())
}

/// Drives the server side of the key exchange over an accepted stream.
pub async fn server_key_exchange<S>(session: &mut ServerSession, stream: &mut S) -> SkdpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = async {
        let request = receive_packet(stream).await?;
        let response = session.connect_response(&request, &mut OsRng)?;
        send_packet(stream, &response).await?;

        let request = receive_packet(stream).await?;
        let response = session.exchange_response(&request, &mut OsRng)?;
        send_packet(stream, &response).await?;

        let request = receive_packet(stream).await?;
        let response = session.establish_response(&request)?;
        send_packet(stream, &response).await?;
        Ok(())
    }
    .await;

    if let Err(error) = result {
        warn!(?error, "server key exchange failed");
        send_error(stream, error).await;
        let _ = stream.shutdown().await;
        session.dispose();
        return Err(error);
    }
    debug!("server key exchange complete");
    Ok(())
}

/// A cloneable handle for transmitting on an established client session.
pub struct ClientSender<S> {
    session: Arc<Mutex<ClientSession>>,
    writer: Arc<Mutex<WriteHalf<S>>>,
}

impl<S> Clone for ClientSender<S> {
    fn clone(&self) -> Self {
        ClientSender {
            session: Arc::clone(&self.session),
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<S> ClientSender<S>
where
    S: AsyncWrite,
{
    /// Encrypts and transmits one application message.
    pub async fn send(&self, message: &[u8]) -> SkdpResult<()> {
        let packet = self.session.lock().await.encrypt_message(message)?;
        send_packet(&mut *self.writer.lock().await, &packet).await
    }

    /// Sends a clean terminate record and shuts the session down.
    pub async fn close(&self) -> SkdpResult<()> {
        let mut writer = self.writer.lock().await;
        send_terminate(&mut *writer, None).await;
        let _ = writer.shutdown().await;
        self.session.lock().await.dispose();
        Ok(())
    }
}

/// An established client connection over a split stream.
pub struct ClientConnection<S> {
    session: Arc<Mutex<ClientSession>>,
    reader: ReadHalf<S>,
    writer: Arc<Mutex<WriteHalf<S>>>,
}

impl ClientConnection<TcpStream> {
    /// Opens a TCP connection and runs the key exchange.
    pub async fn connect(addr: SocketAddr, dkey: &DeviceKey, ratchet: bool) -> SkdpResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|_| SkdpError::ConnectionFailure)?;
        info!(%addr, "connected to server");
        Self::establish(stream, dkey, ratchet).await
    }
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs the key exchange over an already-connected stream.
    pub async fn establish(mut stream: S, dkey: &DeviceKey, ratchet: bool) -> SkdpResult<Self> {
        let mut session = ClientSession::new(dkey, ratchet)?;
        client_key_exchange(&mut session, &mut stream).await?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(ClientConnection {
            session: Arc::new(Mutex::new(session)),
            reader,
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// Returns a transmit handle that can outlive the receive loop.
    pub fn sender(&self) -> ClientSender<S> {
        ClientSender {
            session: Arc::clone(&self.session),
            writer: Arc::clone(&self.writer),
        }
    }

    /// Encrypts and transmits one application message.
    pub async fn send(&self, message: &[u8]) -> SkdpResult<()> {
        let packet = self.session.lock().await.encrypt_message(message)?;
        send_packet(&mut *self.writer.lock().await, &packet).await
    }

    /// Receives the next event, echoing keep-alive probes transparently.
    pub async fn receive(&mut self) -> SkdpResult<SessionEvent> {
        let packet = receive_packet(&mut self.reader).await?;
        match packet.flag {
            PacketFlag::EncryptedMessage => {
                let message = self.session.lock().await.decrypt_message(&packet)?;
                Ok(SessionEvent::Message(message))
            }
            PacketFlag::KeepAliveRequest => {
                let echo = keepalive::echo_probe(&packet)?;
                send_packet(&mut *self.writer.lock().await, &echo).await?;
                Ok(SessionEvent::KeepAlive)
            }
            PacketFlag::ConnectionTerminate | PacketFlag::ErrorCondition => {
                let reason = packet.payload.first().and_then(|&c| SkdpError::from_code(c));
                self.session.lock().await.dispose();
                Ok(SessionEvent::Closed(reason))
            }
            _ => Err(SkdpError::ChannelDown),
        }
    }

    /// Re-keys both channels through the ratchet extension. Must not race
    /// the receive loop; call from the task that owns the connection.
    pub async fn ratchet(&mut self) -> SkdpResult<()> {
        let request = self.session.lock().await.ratchet_request(&mut OsRng)?;
        send_packet(&mut *self.writer.lock().await, &request).await?;
        let response = receive_packet(&mut self.reader).await?;
        self.session.lock().await.ratchet_finalize(&response)
    }

    /// Sends a clean terminate record and shuts the session down.
    pub async fn close(self) -> SkdpResult<()> {
        self.sender().close().await
    }

    /// Tears down after a fatal error, notifying the peer best-effort.
    pub async fn abort(&mut self, error: SkdpError) {
        let mut writer = self.writer.lock().await;
        send_error(&mut *writer, error).await;
        let _ = writer.shutdown().await;
        self.session.lock().await.dispose();
    }
}

/// A cloneable handle for transmitting on an established server session.
pub struct ServerSender<S> {
    session: Arc<Mutex<ServerSession>>,
    writer: Arc<Mutex<WriteHalf<S>>>,
}

impl<S> Clone for ServerSender<S> {
    fn clone(&self) -> Self {
        ServerSender {
            session: Arc::clone(&self.session),
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<S> ServerSender<S>
where
    S: AsyncWrite,
{
    /// Encrypts and transmits one application message.
    pub async fn send(&self, message: &[u8]) -> SkdpResult<()> {
        let packet = self.session.lock().await.encrypt_message(message)?;
        send_packet(&mut *self.writer.lock().await, &packet).await
    }

    /// Sends a terminate record and shuts the session down.
    pub async fn close(&self, error: Option<SkdpError>) -> SkdpResult<()> {
        let mut writer = self.writer.lock().await;
        send_terminate(&mut *writer, error).await;
        let _ = writer.shutdown().await;
        self.session.lock().await.dispose();
        Ok(())
    }
}

/// An established server-side session over a split stream, shared between
/// the receive loop and the keep-alive task.
pub struct ServerConnection<S> {
    session: Arc<Mutex<ServerSession>>,
    reader: ReadHalf<S>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    keepalive: Arc<Mutex<KeepAliveState>>,
}

impl<S> ServerConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Runs the key exchange over an accepted stream.
    pub async fn establish(mut stream: S, skey: &ServerKey, ratchet: bool) -> SkdpResult<Self> {
        let mut session = ServerSession::new(skey, ratchet)?;
        server_key_exchange(&mut session, &mut stream).await?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(ServerConnection {
            session: Arc::new(Mutex::new(session)),
            reader,
            writer: Arc::new(Mutex::new(writer)),
            keepalive: Arc::new(Mutex::new(KeepAliveState::new())),
        })
    }

    /// Returns a transmit handle that can outlive the receive loop.
    pub fn sender(&self) -> ServerSender<S> {
        ServerSender {
            session: Arc::clone(&self.session),
            writer: Arc::clone(&self.writer),
        }
    }

    /// Spawns the keep-alive task: send a probe, wait out the timeout, and
    /// tear the connection down if the echo never arrived. The task
    /// resolves with the error that ended it.
    pub fn spawn_keepalive(&self) -> JoinHandle<SkdpError> {
        self.spawn_keepalive_with(Duration::from_millis(KEEPALIVE_TIMEOUT))
    }

    /// Keep-alive task with a caller-chosen probe interval.
    pub fn spawn_keepalive_with(&self, interval: Duration) -> JoinHandle<SkdpError> {
        let writer = Arc::clone(&self.writer);
        let keepalive = Arc::clone(&self.keepalive);
        tokio::spawn(async move {
            loop {
                let probe = keepalive.lock().await.build_probe();
                if send_packet(&mut *writer.lock().await, &probe).await.is_err() {
                    return SkdpError::TransmitFailure;
                }
                tokio::time::sleep(interval).await;
                if !keepalive.lock().await.recd {
                    warn!("keep-alive expired with no response");
                    let mut writer = writer.lock().await;
                    send_error(&mut *writer, SkdpError::KeepAliveExpired).await;
                    let _ = writer.shutdown().await;
                    return SkdpError::KeepAliveExpired;
                }
            }
        })
    }

    /// Encrypts and transmits one application message.
    pub async fn send(&self, message: &[u8]) -> SkdpResult<()> {
        let packet = self.session.lock().await.encrypt_message(message)?;
        send_packet(&mut *self.writer.lock().await, &packet).await
    }

    /// Receives the next event, verifying keep-alive echoes and answering
    /// ratchet requests out-of-band.
    pub async fn receive(&mut self) -> SkdpResult<SessionEvent> {
        let packet = receive_packet(&mut self.reader).await?;
        match packet.flag {
            PacketFlag::EncryptedMessage => {
                let message = self.session.lock().await.decrypt_message(&packet)?;
                Ok(SessionEvent::Message(message))
            }
            PacketFlag::KeepAliveRequest => {
                self.keepalive.lock().await.verify_echo(&packet)?;
                Ok(SessionEvent::KeepAlive)
            }
            PacketFlag::ExchangeRequest => {
                let response = self
                    .session
                    .lock()
                    .await
                    .ratchet_response(&packet, &mut OsRng)?;
                send_packet(&mut *self.writer.lock().await, &response).await?;
                Ok(SessionEvent::Ratcheted)
            }
            PacketFlag::ConnectionTerminate | PacketFlag::ErrorCondition => {
                let reason = packet.payload.first().and_then(|&c| SkdpError::from_code(c));
                self.session.lock().await.dispose();
                Ok(SessionEvent::Closed(reason))
            }
            _ => Err(SkdpError::ChannelDown),
        }
    }

    /// Sends a terminate record and shuts the session down.
    pub async fn close(self, error: Option<SkdpError>) -> SkdpResult<()> {
        self.sender().close(error).await
    }

    /// Tears down after a fatal error, notifying the peer best-effort.
    pub async fn abort(&mut self, error: SkdpError) {
        let mut writer = self.writer.lock().await;
        send_error(&mut *writer, error).await;
        let _ = writer.shutdown().await;
        self.session.lock().await.dispose();
    }
}

/// A listening SKDP server.
pub struct SkdpServer {
    listener: TcpListener,
    skey: ServerKey,
    ratchet: bool,
}

impl SkdpServer {
    /// Binds the listener.
    pub async fn bind(addr: SocketAddr, skey: ServerKey, ratchet: bool) -> SkdpResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|_| SkdpError::ConnectionFailure)?;
        info!(%addr, "listening");
        Ok(SkdpServer {
            listener,
            skey,
            ratchet,
        })
    }

    /// Accepts one device and runs its key exchange. Call in a loop and
    /// spawn a task per returned connection to host sessions concurrently.
    pub async fn accept(&self) -> SkdpResult<ServerConnection<TcpStream>> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|_| SkdpError::ConnectionFailure)?;
        info!(%peer, "device connected");
        ServerConnection::establish(stream, &self.skey, self.ratchet).await
    }
}
