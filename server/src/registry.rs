//! Process-wide directory of live sessions
//!
//! Tracks every connected session by id, every authenticated player by user
//! id, and the pool of side-channel ports. One registry is created per server
//! run and handed to the acceptor and every session as `Arc<ServerRegistry>`.

use crate::error::RequestError;
use crate::session::{Session, SessionId};
use crate::store::{User, UserId};
use log::{info, warn};
use parking_lot::Mutex;
use shared::Response;
use std::collections::{BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Free and reserved side-channel ports. The two sets are disjoint and their
/// union is always the configured range.
#[derive(Debug)]
pub struct PortPool {
    range: RangeInclusive<u16>,
    free: BTreeSet<u16>,
    in_use: BTreeSet<u16>,
}

impl PortPool {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            free: range.clone().collect(),
            in_use: BTreeSet::new(),
            range,
        }
    }

    /// Takes the highest free port, or `None` when the pool is exhausted.
    pub fn acquire(&mut self) -> Option<u16> {
        let port = self.free.pop_last()?;
        self.in_use.insert(port);
        Some(port)
    }

    /// Returns a port to the pool. Ports that were not handed out are ignored.
    pub fn release(&mut self, port: u16) -> bool {
        if self.in_use.remove(&port) {
            self.free.insert(port);
            true
        } else {
            false
        }
    }

    pub fn free(&self) -> Vec<u16> {
        self.free.iter().copied().collect()
    }

    pub fn in_use(&self) -> Vec<u16> {
        self.in_use.iter().copied().collect()
    }

    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }
}

#[derive(Debug)]
pub struct ServerRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    players: RwLock<HashMap<UserId, Arc<Session>>>,
    ports: Mutex<PortPool>,
}

impl ServerRegistry {
    pub fn new(port_range: RangeInclusive<u16>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            players: RwLock::new(HashMap::new()),
            ports: Mutex::new(PortPool::new(port_range)),
        }
    }

    pub async fn register(&self, session: Arc<Session>) {
        self.sessions.write().await.insert(session.id(), session);
    }

    /// Removes a session and everything it holds: its player entry, if that
    /// entry still points at it, and its reserved port. Unknown ids are a no-op.
    pub async fn unregister(&self, id: &SessionId) -> bool {
        let Some(session) = self.sessions.write().await.remove(id) else {
            return false;
        };

        if let Some(user_id) = session.user_id() {
            let mut players = self.players.write().await;
            if players
                .get(&user_id)
                .is_some_and(|bound| Arc::ptr_eq(bound, &session))
            {
                players.remove(&user_id);
                info!("User {} went offline", user_id);
            }
        }

        if let Some(port) = session.take_reserved_port() {
            self.release_port(port);
        }
        true
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    /// Authenticates `session` as `user`, refusing a second live session for
    /// the same user id.
    pub async fn bind_player(&self, user: User, session: &Arc<Session>) -> Result<(), RequestError> {
        let mut players = self.players.write().await;
        if players.contains_key(&user.id) {
            return Err(RequestError::AlreadyOnline(user.id));
        }
        players.insert(user.id, Arc::clone(session));
        session.set_user(user);
        Ok(())
    }

    pub async fn find_by_user_id(&self, user_id: UserId) -> Option<Arc<Session>> {
        self.players.read().await.get(&user_id).cloned()
    }

    /// Point-in-time copy of the authenticated sessions, ordered by user id.
    /// Sessions joining or leaving afterwards do not affect the returned list.
    pub async fn all_players(&self) -> Vec<Arc<Session>> {
        let mut players: Vec<(UserId, Arc<Session>)> = self
            .players
            .read()
            .await
            .iter()
            .map(|(id, session)| (*id, Arc::clone(session)))
            .collect();
        players.sort_by_key(|(id, _)| *id);
        players.into_iter().map(|(_, session)| session).collect()
    }

    /// Queues `update` on every logged-in session except `except`.
    /// Connections that are live but have not logged in are skipped.
    /// Returns how many sessions received it.
    pub async fn broadcast(&self, update: Arc<Response>, except: &SessionId) -> usize {
        let mut delivered = 0;
        for session in self.all_players().await {
            if session.id() != *except {
                session.enqueue_update(Arc::clone(&update));
                delivered += 1;
            }
        }
        delivered
    }

    pub fn acquire_port(&self) -> Option<u16> {
        self.ports.lock().acquire()
    }

    pub fn release_port(&self, port: u16) {
        if !self.ports.lock().release(port) {
            warn!("Ignoring release of port {} that was not reserved", port);
        }
    }

    pub fn free_ports(&self) -> Vec<u16> {
        self.ports.lock().free()
    }

    pub fn ports_in_use(&self) -> Vec<u16> {
        self.ports.lock().in_use()
    }
}
