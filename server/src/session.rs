//! Per-connection session state and its read loop
//!
//! A session owns one socket for its whole life. Its task reads bytes, decodes
//! as many complete frames as are buffered, runs each through the dispatch
//! table in arrival order and writes any direct reply back. Nothing else ever
//! writes to the socket: updates produced by other sessions are parked in this
//! session's queue until its client sends a heartbeat.

use crate::dispatch::Frame;
use crate::error::SessionError;
use crate::handlers::{self, HandlerContext};
use crate::store::{User, UserId};
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::opcodes::Category;
use shared::{PacketReader, Response, WireError};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque, globally unique session identifier assigned at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
struct SessionState {
    user: Option<User>,
    updates: VecDeque<Arc<Response>>,
    sequence: u32,
    dropped_updates: u64,
    reserved_port: Option<u16>,
    last_activity: Instant,
}

/// One connected client.
///
/// Shared as `Arc<Session>` between its own task and the registry; every
/// other session's handlers reach it only through [`Session::enqueue_update`].
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    max_pending_updates: usize,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: SessionId, peer_addr: SocketAddr, max_pending_updates: usize) -> Self {
        Self {
            id,
            peer_addr,
            max_pending_updates: max_pending_updates.max(1),
            state: Mutex::new(SessionState {
                user: None,
                updates: VecDeque::new(),
                sequence: 0,
                dropped_updates: 0,
                reserved_port: None,
                last_activity: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The authenticated user, or `None` before a successful login.
    pub fn user(&self) -> Option<User> {
        self.state.lock().user.clone()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.state.lock().user.as_ref().map(|user| user.id)
    }

    pub(crate) fn set_user(&self, user: User) {
        self.state.lock().user = Some(user);
    }

    /// Queues an update for delivery on this session's next heartbeat.
    ///
    /// Never waits on I/O. When the queue is full the oldest entry is evicted.
    pub fn enqueue_update(&self, update: Arc<Response>) {
        let mut state = self.state.lock();
        if state.updates.len() >= self.max_pending_updates {
            state.updates.pop_front();
            state.dropped_updates += 1;
            debug!(
                "Session {} update queue full, evicted oldest ({} dropped so far)",
                self.id, state.dropped_updates
            );
        }
        state.updates.push_back(update);
    }

    /// Takes every pending update and advances the sequence number.
    ///
    /// Returns the new sequence number together with the drained updates.
    pub fn drain_updates(&self) -> (u32, Vec<Arc<Response>>) {
        let mut state = self.state.lock();
        state.sequence = state.sequence.wrapping_add(1);
        let updates = state.updates.drain(..).collect();
        (state.sequence, updates)
    }

    pub fn latest_sequence_number(&self) -> u32 {
        self.state.lock().sequence
    }

    pub fn pending_updates(&self) -> usize {
        self.state.lock().updates.len()
    }

    /// Updates evicted because the queue was full.
    pub fn dropped_updates(&self) -> u64 {
        self.state.lock().dropped_updates
    }

    pub fn reserved_port(&self) -> Option<u16> {
        self.state.lock().reserved_port
    }

    pub(crate) fn set_reserved_port(&self, port: u16) {
        self.state.lock().reserved_port = Some(port);
    }

    pub(crate) fn take_reserved_port(&self) -> Option<u16> {
        self.state.lock().reserved_port.take()
    }

    /// When bytes last arrived from the peer. The inactivity timeout runs
    /// from this instant.
    pub fn last_activity(&self) -> Instant {
        self.state.lock().last_activity
    }

    fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }
}

/// Drives one session until its peer disconnects, the stream breaks, or it
/// goes quiet for longer than the configured timeout. Always unregisters the
/// session on the way out.
pub async fn run_session<S>(session: Arc<Session>, stream: S, ctx: Arc<HandlerContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match serve(&session, stream, &ctx).await {
        Ok(()) => info!("Session {} ({}) disconnected", session.id(), session.peer_addr()),
        Err(e) => warn!("Session {} ({}) dropped: {}", session.id(), session.peer_addr(), e),
    }
    ctx.registry.unregister(&session.id()).await;
}

async fn serve<S>(session: &Arc<Session>, mut stream: S, ctx: &HandlerContext) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 2048];

    loop {
        let deadline = session.last_activity() + ctx.timeout;
        let read = match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::TimedOut(session.last_activity().elapsed())),
        };

        if read == 0 {
            return if pending.is_empty() {
                Ok(())
            } else {
                Err(SessionError::TruncatedFrame)
            };
        }

        session.touch();
        pending.extend_from_slice(&chunk[..read]);

        let consumed = process_frames(session, &pending, ctx, &mut stream).await?;
        pending.drain(..consumed);
    }
}

/// Handles every complete frame at the front of `buf`, returning how many
/// bytes were consumed. A partial trailing frame is left for the next read.
async fn process_frames<S>(
    session: &Arc<Session>,
    buf: &[u8],
    ctx: &HandlerContext,
    stream: &mut S,
) -> Result<usize, SessionError>
where
    S: AsyncWrite + Unpin,
{
    let mut offset = 0;

    while offset < buf.len() {
        let mut reader = PacketReader::new(&buf[offset..]);
        let frame = match ctx.dispatch.parse_frame(&mut reader) {
            Ok(frame) => frame,
            Err(WireError::Incomplete { .. }) => break,
            Err(e) => return Err(SessionError::Wire(e)),
        };
        offset += reader.position();

        let request = match frame {
            Frame::Request(request) => request,
            Frame::Unknown(opcode) => {
                warn!(
                    "Session {}: {:?} request code [{}] does not exist",
                    session.id(),
                    Category::of(opcode),
                    opcode
                );
                continue;
            }
        };

        let opcode = request.opcode();
        debug!("Session {}: executing opcode {}", session.id(), opcode);

        let response = match handlers::execute(request, session, ctx).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Session {}: opcode {} failed: {}", session.id(), opcode, e);
                continue;
            }
        };

        if let Some(response) = response {
            match response.encode() {
                Ok(bytes) => {
                    stream.write_all(&bytes).await?;
                    stream.flush().await?;
                }
                Err(e) => warn!("Session {}: could not encode reply to {}: {}", session.id(), opcode, e),
            }
        }
    }

    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchTable;
    use crate::registry::ServerRegistry;
    use crate::store::{MemoryUserStore, UserStore};
    use shared::Request;
    use std::time::Duration;

    fn test_session(cap: usize) -> Session {
        Session::new(SessionId::new(), "127.0.0.1:4000".parse().unwrap(), cap)
    }

    fn test_context(store: MemoryUserStore) -> Arc<HandlerContext> {
        test_context_with_timeout(store, Duration::from_secs(5))
    }

    fn test_context_with_timeout(store: MemoryUserStore, timeout: Duration) -> Arc<HandlerContext> {
        Arc::new(HandlerContext {
            registry: Arc::new(ServerRegistry::new(9000..=9001)),
            dispatch: Arc::new(DispatchTable::standard()),
            store: Arc::new(store),
            timeout,
        })
    }

    #[test]
    fn test_session_ids_are_unique() {
        let ids: std::collections::HashSet<SessionId> = (0..1000).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_new_session_is_anonymous() {
        let session = test_session(4);
        assert!(session.user().is_none());
        assert_eq!(session.latest_sequence_number(), 0);
        assert_eq!(session.pending_updates(), 0);
        assert_eq!(session.reserved_port(), None);
    }

    #[test]
    fn test_queue_cap_evicts_oldest() {
        let session = test_session(3);
        for damage in 1..=5 {
            session.enqueue_update(Arc::new(Response::Hit { damage }));
            assert!(session.pending_updates() <= 3);
        }

        assert_eq!(session.dropped_updates(), 2);
        let (_, updates) = session.drain_updates();
        let damages: Vec<i16> = updates
            .iter()
            .map(|u| match u.as_ref() {
                Response::Hit { damage } => *damage,
                other => panic!("Unexpected update: {:?}", other),
            })
            .collect();
        assert_eq!(damages, vec![3, 4, 5]);
    }

    #[test]
    fn test_drain_advances_sequence_and_empties_queue() {
        let session = test_session(8);
        session.enqueue_update(Arc::new(Response::Pickup { item_id: 1 }));

        let (seq, updates) = session.drain_updates();
        assert_eq!(seq, 1);
        assert_eq!(updates.len(), 1);

        let (seq, updates) = session.drain_updates();
        assert_eq!(seq, 2);
        assert!(updates.is_empty());
        assert_eq!(session.latest_sequence_number(), 2);
    }

    #[test]
    fn test_same_update_shared_across_sessions() {
        let a = test_session(8);
        let b = test_session(8);
        let update = Arc::new(Response::Hit { damage: 9 });

        a.enqueue_update(Arc::clone(&update));
        b.enqueue_update(Arc::clone(&update));

        assert_eq!(Arc::strong_count(&update), 3);
    }

    #[tokio::test]
    async fn test_unknown_opcode_is_skipped_and_login_still_works() {
        let store = MemoryUserStore::new();
        let user = store.create_user("ann", "pw").unwrap();
        let ctx = test_context(store);

        let session = Arc::new(test_session(8));
        ctx.registry.register(Arc::clone(&session)).await;

        let login = Request::Login {
            username: "ann".to_string(),
            password: "pw".to_string(),
        }
        .encode()
        .unwrap();
        let accepted = Response::LoginAccepted {
            user_id: user.id,
            username: "ann".to_string(),
        }
        .encode()
        .unwrap();

        let stream = tokio_test::io::Builder::new()
            .read(&[0x01, 0x2C])
            .read(&login)
            .write(&accepted)
            .build();

        run_session(Arc::clone(&session), stream, Arc::clone(&ctx)).await;

        // Peer closed after the login, so the session is gone again.
        assert_eq!(ctx.registry.session_count().await, 0);
        assert!(ctx.registry.find_by_user_id(user.id).await.is_none());
        assert_eq!(session.user_id(), Some(user.id));
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let store = MemoryUserStore::new();
        store.create_user("ann", "pw").unwrap();
        let ctx = test_context(store);
        let session = Arc::new(test_session(8));

        let login = Request::Login {
            username: "ann".to_string(),
            password: "pw".to_string(),
        }
        .encode()
        .unwrap();
        let (head, tail) = login.split_at(5);

        let stream = tokio_test::io::Builder::new()
            .read(head)
            .read(tail)
            .write(&Response::LoginAccepted { user_id: 1, username: "ann".to_string() }.encode().unwrap())
            .build();

        run_session(Arc::clone(&session), stream, ctx).await;
        assert_eq!(session.user_id(), Some(1));
    }

    #[tokio::test]
    async fn test_malformed_frame_ends_session() {
        let ctx = test_context(MemoryUserStore::new());
        let session = Arc::new(test_session(8));
        ctx.registry.register(Arc::clone(&session)).await;

        // Register request whose username length is negative.
        let stream = tokio_test::io::Builder::new().read(&[0x00, 0x6F, 0xFF, 0xFE]).build();

        run_session(Arc::clone(&session), stream, Arc::clone(&ctx)).await;
        assert_eq!(ctx.registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let ctx = test_context_with_timeout(MemoryUserStore::new(), Duration::from_millis(100));
        let session = Arc::new(test_session(8));
        let (_client, server_end) = tokio::io::duplex(64);

        let result = tokio::time::timeout(Duration::from_secs(2), serve(&session, server_end, &ctx))
            .await
            .expect("session outlived its inactivity timeout");

        match result {
            Err(SessionError::TimedOut(idle)) => assert!(idle >= Duration::from_millis(100)),
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_traffic_pushes_back_inactivity_deadline() {
        let ctx = test_context_with_timeout(MemoryUserStore::new(), Duration::from_millis(150));
        let session = Arc::new(test_session(8));
        let started = session.last_activity();

        let keepalive = Request::KeepAlive.encode().unwrap();
        let stream = tokio_test::io::Builder::new()
            .read(&keepalive)
            .wait(Duration::from_millis(100))
            .read(&keepalive)
            .wait(Duration::from_millis(100))
            .read(&keepalive)
            .wait(Duration::from_millis(100))
            .read(&keepalive)
            .build();

        // Longer in total than the timeout, but no single gap exceeds it.
        let result = serve(&session, stream, &ctx).await;

        assert!(result.is_ok(), "session ended early: {:?}", result);
        assert!(session.last_activity() - started >= Duration::from_millis(300));
    }
}
