//! Per-connection session handling: framing reads, the handshake-first
//! state machine, and the queued write path.
//!
//! One task reads the socket and drives the state machine; a second task
//! drains the outbound queue in batches. Producers elsewhere (chat and
//! entity broadcasts) enqueue through the registry and never block on a
//! slow socket. A single malformed frame is fatal: the protocol has no
//! resynchronization point, so the session is torn down with a reason
//! packet where the transport still allows one.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use protocol::{
    ClientPacket, OpCode, Packet, Position, ProtocolError, ServerPacket, BlockMode,
    MAP_CHUNK_SIZE, PROTOCOL_VERSION, SELF_ID,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::registry::SessionRegistry;
use crate::world::{LoginPolicy, MapProvider, PERMISSION_OP};

/// How long a fresh connection may sit in `Authenticating` before it is
/// dropped.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on draining the outbound queue during disconnect.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on a single batched socket write; a stall this long means the
/// client is gone or hopelessly behind.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue capacity, in packets.
pub const OUTBOUND_QUEUE: usize = 512;

const MAX_BATCH_BYTES: usize = 8192;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Disconnecting,
    Closed,
}

/// Game-level happenings a session reports to the game loop. The session
/// interprets bytes; everything that touches world state happens on the
/// other side of this channel.
#[derive(Debug, PartialEq, Eq)]
pub enum GameEvent {
    Joined {
        entity_id: i8,
    },
    Chat {
        entity_id: i8,
        name: String,
        text: String,
    },
    BlockChange {
        entity_id: i8,
        x: i16,
        y: i16,
        z: i16,
        mode: BlockMode,
        block: u8,
        permission: u8,
    },
    Moved {
        entity_id: i8,
        position: Position,
    },
    Left {
        entity_id: i8,
        name: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("{0}")]
    Denied(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("level data unavailable: {0}")]
    Map(io::Error),
    #[error("connection closed")]
    Closed,
    #[error("server shutting down")]
    ShuttingDown,
}

impl SessionError {
    /// Reason to put in a Kick packet before closing, if any. Transport
    /// faults get none; the socket is already beyond use.
    fn kick_reason(&self) -> Option<String> {
        match self {
            SessionError::Transport(_) | SessionError::Closed => None,
            SessionError::Protocol(e) => Some(e.to_string()),
            SessionError::Denied(reason) => Some(reason.clone()),
            SessionError::Timeout(what) => Some(format!("timed out waiting for {}", what)),
            SessionError::Map(_) => Some("level data unavailable".to_string()),
            SessionError::ShuttingDown => Some("server shutting down".to_string()),
        }
    }
}

/// Everything a session needs from the composition root.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub login: Arc<dyn LoginPolicy>,
    pub map: Arc<dyn MapProvider>,
    pub events: mpsc::UnboundedSender<GameEvent>,
    pub server_name: String,
    pub motd: String,
    pub shutdown: watch::Receiver<bool>,
}

/// Accepted player names: 2 to 16 characters of `[A-Za-z0-9_]`.
pub fn valid_player_name(name: &str) -> bool {
    (2..=16).contains(&name.chars().count())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
struct Identity {
    entity_id: i8,
    name: String,
    permission: u8,
}

struct Session {
    peer: SocketAddr,
    ctx: SessionContext,
    state: SessionState,
    identity: Option<Identity>,
    outbound: mpsc::Sender<Packet>,
}

/// Accept connections until shutdown, spawning one session task each.
pub async fn accept_loop(listener: TcpListener, ctx: SessionContext) {
    let mut shutdown = ctx.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("{}: failed to set TCP_NODELAY: {}", peer, e);
                    }
                    debug!("accepted connection from {}", peer);
                    tokio::spawn(run(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    error!("error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Drive one connection from accept to close.
pub async fn run<S>(stream: S, peer: SocketAddr, ctx: SessionContext)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(write_loop(outbound_rx, writer));

    let mut session = Session {
        peer,
        ctx,
        state: SessionState::Connecting,
        identity: None,
        outbound,
    };
    let result = session.drive(reader).await;
    session.teardown(result, writer_task).await;
}

/// Read one complete frame; the opcode byte implies the length.
async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    reader.read_exact(&mut first).await?;
    let opcode = OpCode::try_from(first[0])?;
    let mut frame = vec![0u8; opcode.packet_size()];
    frame[0] = first[0];
    reader.read_exact(&mut frame[1..]).await?;
    Ok(frame)
}

/// Drain the outbound queue, coalescing small packets into batched
/// writes. Exits when every sender is gone and the queue is empty.
async fn write_loop<W>(mut rx: mpsc::Receiver<Packet>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch: Vec<u8> = Vec::with_capacity(MAX_BATCH_BYTES);
    while let Some(packet) = rx.recv().await {
        batch.clear();
        batch.extend_from_slice(packet.bytes());
        while batch.len() < MAX_BATCH_BYTES {
            match rx.try_recv() {
                Ok(next) => batch.extend_from_slice(next.bytes()),
                Err(_) => break,
            }
        }
        match timeout(WRITE_TIMEOUT, writer.write_all(&batch)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "socket write stalled",
                ))
            }
        }
    }
    writer.shutdown().await
}

impl Session {
    async fn drive<S>(&mut self, mut reader: ReadHalf<S>) -> Result<(), SessionError>
    where
        S: AsyncRead,
    {
        self.state = SessionState::Authenticating;
        debug!("{}: authenticating", self.peer);

        let frame = timeout(AUTH_TIMEOUT, read_frame(&mut reader))
            .await
            .map_err(|_| SessionError::Timeout("handshake"))??;
        self.authenticate(ClientPacket::decode(&frame)?).await?;

        let mut shutdown = self.ctx.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Err(SessionError::ShuttingDown),
                frame = read_frame(&mut reader) => {
                    let packet = ClientPacket::decode(&frame?)?;
                    self.dispatch(packet)?;
                }
            }
        }
    }

    /// Validate the handshake, consult the login policy, claim a slot,
    /// and stream the level. Any failure here ends the session.
    async fn authenticate(&mut self, packet: ClientPacket) -> Result<(), SessionError> {
        let (username, verification_key) = match packet {
            ClientPacket::Handshake {
                protocol_version,
                username,
                verification_key,
                ..
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(SessionError::Denied(format!(
                        "unsupported protocol version {}",
                        protocol_version
                    )));
                }
                (username, verification_key)
            }
            _ => {
                return Err(ProtocolError::ProtocolOrder(
                    "the first packet must be a handshake",
                )
                .into())
            }
        };

        if !valid_player_name(&username) {
            return Err(SessionError::Denied("invalid player name".to_string()));
        }
        let permission = self
            .ctx
            .login
            .authorize(&username, &verification_key)
            .map_err(SessionError::Denied)?;

        let spawn = self.ctx.map.spawn();
        let entity_id = self
            .ctx
            .registry
            .register(&username, permission, spawn, self.outbound.clone())
            .await
            .map_err(|e| SessionError::Denied(e.to_string()))?;
        self.identity = Some(Identity {
            entity_id,
            name: username.clone(),
            permission,
        });
        info!(
            "{}: {} logged in as entity {}",
            self.peer, username, entity_id
        );

        self.send(
            ServerPacket::Handshake {
                protocol_version: PROTOCOL_VERSION,
                server_name: self.ctx.server_name.clone(),
                motd: self.ctx.motd.clone(),
                permission,
            }
            .encode()?,
        )
        .await?;
        self.send_map().await?;
        self.send(
            ServerPacket::AddEntity {
                entity_id: SELF_ID,
                name: username,
                position: spawn,
            }
            .encode()?,
        )
        .await?;
        if permission == PERMISSION_OP {
            self.send(ServerPacket::SetPermission { permission }.encode()?)
                .await?;
        }

        self.state = SessionState::Active;
        self.emit(GameEvent::Joined { entity_id });
        Ok(())
    }

    /// Stream the serialized level: MapBegin, 1024-byte chunks with a
    /// progress percentage, MapEnd with the dimensions.
    async fn send_map(&self) -> Result<(), SessionError> {
        let data = self.ctx.map.level_data().map_err(SessionError::Map)?;
        self.send(ServerPacket::MapBegin.encode()?).await?;
        let total = data.len().max(1);
        let mut sent = 0usize;
        for chunk in data.chunks(MAP_CHUNK_SIZE) {
            sent += chunk.len();
            let percent = (sent * 100 / total) as u8;
            self.send(
                ServerPacket::MapChunk {
                    data: chunk.to_vec(),
                    percent,
                }
                .encode()?,
            )
            .await?;
        }
        let (width, height, length) = self.ctx.map.dimensions();
        self.send(
            ServerPacket::MapEnd {
                width,
                height,
                length,
            }
            .encode()?,
        )
        .await?;
        Ok(())
    }

    /// Translate one Active-state packet into a game event.
    fn dispatch(&mut self, packet: ClientPacket) -> Result<(), SessionError> {
        let identity = self
            .identity
            .clone()
            .ok_or(SessionError::Closed)?;
        match packet {
            ClientPacket::Handshake { .. } => {
                Err(ProtocolError::ProtocolOrder("handshake repeated after login").into())
            }
            ClientPacket::ExtInfo { .. } | ClientPacket::ExtEntry { .. } => {
                Err(ProtocolError::ProtocolOrder("extension negotiation was not offered").into())
            }
            ClientPacket::SetBlock {
                x,
                y,
                z,
                mode,
                block,
            } => {
                self.emit(GameEvent::BlockChange {
                    entity_id: identity.entity_id,
                    x,
                    y,
                    z,
                    mode,
                    block,
                    permission: identity.permission,
                });
                Ok(())
            }
            ClientPacket::Position { position, .. } => {
                // Clients report with the self sentinel; the slot is ours
                // regardless of what they claim.
                self.emit(GameEvent::Moved {
                    entity_id: identity.entity_id,
                    position,
                });
                Ok(())
            }
            ClientPacket::Message { text, .. } => {
                self.emit(GameEvent::Chat {
                    entity_id: identity.entity_id,
                    name: identity.name,
                    text,
                });
                Ok(())
            }
        }
    }

    /// Queue a packet on the session's own path. Waits when the queue is
    /// momentarily full; only broadcasters use the non-blocking path.
    async fn send(&self, packet: Packet) -> Result<(), SessionError> {
        self.outbound
            .send(packet)
            .await
            .map_err(|_| SessionError::Closed)
    }

    fn emit(&self, event: GameEvent) {
        if self.ctx.events.send(event).is_err() {
            debug!("{}: game loop is gone, dropping event", self.peer);
        }
    }

    /// Kick with a reason where possible, drain the queue for a bounded
    /// time, then release the entity slot.
    async fn teardown(
        mut self,
        result: Result<(), SessionError>,
        writer_task: JoinHandle<io::Result<()>>,
    ) {
        debug!(
            "{}: {:?} -> {:?}",
            self.peer,
            self.state,
            SessionState::Disconnecting
        );
        self.state = SessionState::Disconnecting;
        match &result {
            Ok(()) => info!("{}: session closed", self.peer),
            Err(SessionError::Transport(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("{}: client disconnected", self.peer)
            }
            Err(e) => warn!("{}: session ended: {}", self.peer, e),
        }

        // Release the slot first: broadcasters stop enqueuing and the
        // registry's clone of our sender goes away, so closing ours below
        // actually ends the writer.
        let departed = match self.identity.take() {
            Some(identity) => self
                .ctx
                .registry
                .remove(identity.entity_id)
                .await
                .map(|_| identity),
            None => None,
        };

        if let Err(error) = &result {
            if let Some(reason) = error.kick_reason() {
                if let Ok(packet) = (ServerPacket::Kick { reason }).encode() {
                    let _ = self.outbound.try_send(packet);
                }
            }
        }

        // Closing our sender lets the writer drain what is queued and
        // exit; the timeout forces the issue for a stalled socket.
        drop(self.outbound);
        if timeout(DRAIN_TIMEOUT, writer_task).await.is_err() {
            warn!("{}: outbound queue did not drain in time", self.peer);
        }
        self.state = SessionState::Closed;

        if let Some(identity) = departed {
            if self
                .ctx
                .events
                .send(GameEvent::Left {
                    entity_id: identity.entity_id,
                    name: identity.name,
                })
                .is_err()
            {
                debug!("{}: game loop is gone, dropping leave event", self.peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{FlatMap, OpenLogin};

    fn test_context(
        max_players: usize,
    ) -> (
        SessionContext,
        mpsc::UnboundedReceiver<GameEvent>,
        watch::Sender<bool>,
    ) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);
        let ctx = SessionContext {
            registry: Arc::new(SessionRegistry::new(max_players)),
            login: Arc::new(OpenLogin::default()),
            map: Arc::new(FlatMap::new(4, 4, 4)),
            events,
            server_name: "test server".to_string(),
            motd: "motd".to_string(),
            shutdown,
        };
        (ctx, event_rx, shutdown_tx)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    fn handshake(username: &str) -> Vec<u8> {
        ClientPacket::Handshake {
            protocol_version: PROTOCOL_VERSION,
            username: username.to_string(),
            verification_key: String::new(),
            padding: 0,
        }
        .encode()
        .unwrap()
        .bytes()
        .to_vec()
    }

    async fn read_server_packet<R>(reader: &mut R) -> ServerPacket
    where
        R: AsyncRead + Unpin,
    {
        let frame = read_frame(reader).await.expect("server packet");
        ServerPacket::decode(&frame).expect("decodable server packet")
    }

    #[tokio::test]
    async fn write_loop_batches_queued_packets() {
        let ping = ServerPacket::Ping.encode().unwrap();
        let kick = ServerPacket::Kick {
            reason: "bye".to_string(),
        }
        .encode()
        .unwrap();
        let mut expected = ping.bytes().to_vec();
        expected.extend_from_slice(kick.bytes());

        // Both packets are queued before the writer runs, so they go out
        // as one coalesced write.
        let mock = tokio_test::io::Builder::new().write(&expected).build();
        let (tx, rx) = mpsc::channel(8);
        tx.send(ping).await.unwrap();
        tx.send(kick).await.unwrap();
        drop(tx);
        write_loop(rx, mock).await.unwrap();
    }

    #[test]
    fn player_name_rules() {
        assert!(valid_player_name("ab"));
        assert!(valid_player_name("Player_16_chars_"));
        assert!(!valid_player_name("a"));
        assert!(!valid_player_name("seventeen_chars__"));
        assert!(!valid_player_name("bad name"));
        assert!(!valid_player_name("bad&name"));
        assert!(!valid_player_name(""));
    }

    #[tokio::test]
    async fn valid_handshake_reaches_active_and_emits_joined() {
        let (ctx, mut events, _shutdown) = test_context(4);
        let registry = Arc::clone(&ctx.registry);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run(server, peer(), ctx));

        let (mut read, mut write) = tokio::io::split(client);
        write.write_all(&handshake("Tester")).await.unwrap();

        match read_server_packet(&mut read).await {
            ServerPacket::Handshake {
                protocol_version,
                server_name,
                permission,
                ..
            } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(server_name, "test server");
                assert_eq!(permission, 0);
            }
            other => panic!("expected handshake, got {:?}", other),
        }
        assert_eq!(read_server_packet(&mut read).await, ServerPacket::MapBegin);

        // Skip the level chunks, then expect the dimensions and our own
        // spawn entity.
        loop {
            match read_server_packet(&mut read).await {
                ServerPacket::MapChunk { .. } => continue,
                ServerPacket::MapEnd {
                    width,
                    height,
                    length,
                } => {
                    assert_eq!((width, height, length), (4, 4, 4));
                    break;
                }
                other => panic!("expected map transfer, got {:?}", other),
            }
        }
        match read_server_packet(&mut read).await {
            ServerPacket::AddEntity { entity_id, name, .. } => {
                assert_eq!(entity_id, SELF_ID);
                assert_eq!(name, "Tester");
            }
            other => panic!("expected spawn entity, got {:?}", other),
        }

        assert_eq!(events.recv().await, Some(GameEvent::Joined { entity_id: 0 }));
        assert_eq!(registry.player_count().await, 1);
    }

    #[tokio::test]
    async fn non_handshake_first_packet_is_kicked_without_events() {
        let (ctx, mut events, _shutdown) = test_context(4);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run(server, peer(), ctx));

        let (mut read, mut write) = tokio::io::split(client);
        let message = ClientPacket::Message {
            entity_id: SELF_ID,
            text: "too early".to_string(),
        }
        .encode()
        .unwrap();
        write.write_all(message.bytes()).await.unwrap();

        match read_server_packet(&mut read).await {
            ServerPacket::Kick { reason } => {
                assert!(reason.contains("handshake"), "reason was {:?}", reason)
            }
            other => panic!("expected kick, got {:?}", other),
        }
        // No game event was ever emitted.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn version_mismatch_is_kicked() {
        let (ctx, _events, _shutdown) = test_context(4);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run(server, peer(), ctx));

        let (mut read, mut write) = tokio::io::split(client);
        let mut bytes = handshake("Tester");
        bytes[1] = 0x06; // stale protocol version
        write.write_all(&bytes).await.unwrap();

        match read_server_packet(&mut read).await {
            ServerPacket::Kick { reason } => {
                assert!(reason.contains("version"), "reason was {:?}", reason)
            }
            other => panic!("expected kick, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_name_is_kicked() {
        let (ctx, _events, _shutdown) = test_context(4);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run(server, peer(), ctx));

        let (mut read, mut write) = tokio::io::split(client);
        write.write_all(&handshake("x")).await.unwrap();

        match read_server_packet(&mut read).await {
            ServerPacket::Kick { reason } => {
                assert!(reason.contains("name"), "reason was {:?}", reason)
            }
            other => panic!("expected kick, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_opcode_mid_session_tears_down_with_left_event() {
        let (ctx, mut events, _shutdown) = test_context(4);
        let registry = Arc::clone(&ctx.registry);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run(server, peer(), ctx));

        let (mut read, mut write) = tokio::io::split(client);
        write.write_all(&handshake("Tester")).await.unwrap();
        assert_eq!(events.recv().await, Some(GameEvent::Joined { entity_id: 0 }));

        write.write_all(&[0xab]).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(GameEvent::Left {
                entity_id: 0,
                name: "Tester".to_string()
            })
        );
        assert_eq!(registry.player_count().await, 0);

        // The kick packet is queued behind the join burst; it is the last
        // thing on the stream.
        let mut last = None;
        loop {
            let mut first = [0u8; 1];
            match read.read_exact(&mut first).await {
                Ok(_) => {}
                Err(_) => break,
            }
            let opcode = OpCode::try_from(first[0]).unwrap();
            let mut rest = vec![0u8; opcode.packet_size() - 1];
            read.read_exact(&mut rest).await.unwrap();
            last = Some(opcode);
        }
        assert_eq!(last, Some(OpCode::Kick));
    }

    #[tokio::test]
    async fn active_packets_become_game_events() {
        let (ctx, mut events, _shutdown) = test_context(4);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run(server, peer(), ctx));

        let (_read, mut write) = tokio::io::split(client);
        write.write_all(&handshake("Tester")).await.unwrap();
        assert_eq!(events.recv().await, Some(GameEvent::Joined { entity_id: 0 }));

        let chat = ClientPacket::Message {
            entity_id: SELF_ID,
            text: "hello".to_string(),
        }
        .encode()
        .unwrap();
        write.write_all(chat.bytes()).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(GameEvent::Chat {
                entity_id: 0,
                name: "Tester".to_string(),
                text: "hello".to_string()
            })
        );

        let place = ClientPacket::SetBlock {
            x: 1,
            y: 2,
            z: 3,
            mode: BlockMode::Place,
            block: 2,
        }
        .encode()
        .unwrap();
        write.write_all(place.bytes()).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(GameEvent::BlockChange {
                entity_id: 0,
                x: 1,
                y: 2,
                z: 3,
                mode: BlockMode::Place,
                block: 2,
                permission: 0
            })
        );

        let position = Position::new(100, 200, 300, 10, 20);
        let moved = ClientPacket::Position {
            entity_id: SELF_ID,
            position,
        }
        .encode()
        .unwrap();
        write.write_all(moved.bytes()).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(GameEvent::Moved {
                entity_id: 0,
                position
            })
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let (ctx, mut events, _shutdown) = test_context(4);
        let (client_a, server_a) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run(server_a, peer(), ctx.clone()));
        let (_read_a, mut write_a) = tokio::io::split(client_a);
        write_a.write_all(&handshake("Tester")).await.unwrap();
        assert_eq!(events.recv().await, Some(GameEvent::Joined { entity_id: 0 }));

        let (client_b, server_b) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run(server_b, peer(), ctx));
        let (mut read_b, mut write_b) = tokio::io::split(client_b);
        write_b.write_all(&handshake("tester")).await.unwrap();
        match read_server_packet(&mut read_b).await {
            ServerPacket::Kick { reason } => {
                assert!(reason.contains("already"), "reason was {:?}", reason)
            }
            other => panic!("expected kick, got {:?}", other),
        }
    }
}
