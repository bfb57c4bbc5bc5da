//! Request execution
//!
//! Each request variant runs against the originating session and the shared
//! registry. A handler may return a direct reply for the originating socket
//! and may queue updates on other sessions; it never writes to another
//! session's socket.

use crate::dispatch::DispatchTable;
use crate::error::RequestError;
use crate::registry::ServerRegistry;
use crate::session::Session;
use crate::store::{StoreError, User, UserStore};
use log::{error, info};
use shared::{LoginStatus, Opcode, RegisterStatus, Request, Response};
use std::sync::Arc;
use std::time::Duration;

/// Everything a session task needs besides its own socket.
pub struct HandlerContext {
    pub registry: Arc<ServerRegistry>,
    pub dispatch: Arc<DispatchTable>,
    pub store: Arc<dyn UserStore>,
    /// Inactivity limit for a session's socket
    pub timeout: Duration,
}

type HandlerResult = Result<Option<Response>, RequestError>;

pub async fn execute(request: Request, session: &Arc<Session>, ctx: &HandlerContext) -> HandlerResult {
    let opcode = request.opcode();
    match request {
        Request::Heartbeat => heartbeat(session, opcode),
        Request::PushUpdate { payload } => push_update(session, ctx, opcode, payload).await,
        Request::KeepAlive => Ok(None),
        Request::Register { username, password } => register(ctx, &username, &password),
        Request::Login { username, password } => login(session, ctx, &username, &password).await,
        Request::StartGame => start_game(session, ctx, opcode),
        Request::JoinGame => join_game(session, ctx, opcode).await,
        Request::EndGame => end_game(session, ctx, opcode),
        Request::Pickup { item_id } => {
            let user = require_user(session, opcode)?;
            let delivered = ctx
                .registry
                .broadcast(Arc::new(Response::Pickup { item_id }), &session.id())
                .await;
            info!("{} picked up item {} ({} notified)", user.username, item_id, delivered);
            Ok(None)
        }
        Request::Hit { damage } => {
            let user = require_user(session, opcode)?;
            let delivered = ctx
                .registry
                .broadcast(Arc::new(Response::Hit { damage }), &session.id())
                .await;
            info!("{} hit their opponent for {} ({} notified)", user.username, damage, delivered);
            Ok(None)
        }
    }
}

fn require_user(session: &Session, opcode: Opcode) -> Result<User, RequestError> {
    session.user().ok_or(RequestError::NotAuthenticated(opcode))
}

/// Drains this session's queue into the reply. The count written is the
/// number of updates actually embedded.
fn heartbeat(session: &Session, opcode: Opcode) -> HandlerResult {
    require_user(session, opcode)?;
    let (sequence, updates) = session.drain_updates();
    Ok(Some(Response::Heartbeat {
        // Reported modulo 2^16; clients compare for change, not magnitude.
        sequence: sequence as i16,
        updates,
    }))
}

async fn push_update(
    session: &Arc<Session>,
    ctx: &HandlerContext,
    opcode: Opcode,
    payload: Vec<u8>,
) -> HandlerResult {
    let user = require_user(session, opcode)?;
    let update = Arc::new(Response::PushUpdate {
        user_id: user.id,
        payload,
    });
    ctx.registry.broadcast(update, &session.id()).await;
    Ok(None)
}

fn register(ctx: &HandlerContext, username: &str, password: &str) -> HandlerResult {
    let status = match ctx.store.create_user(username, password) {
        Ok(user) => {
            info!("Registered user {} ({})", user.id, user.username);
            RegisterStatus::Created
        }
        Err(StoreError::UsernameTaken(_)) => RegisterStatus::NameTaken,
        Err(StoreError::InvalidInput) => RegisterStatus::InvalidInput,
        Err(e) => {
            error!("Could not register {}: {}", username, e);
            RegisterStatus::StorageFailure
        }
    };
    Ok(Some(Response::Register { status }))
}

async fn login(session: &Arc<Session>, ctx: &HandlerContext, username: &str, password: &str) -> HandlerResult {
    if session.user().is_some() {
        return Ok(Some(Response::LoginRejected {
            status: LoginStatus::AlreadyAuthenticated,
        }));
    }

    let Some(user) = ctx.store.find_user(username, password) else {
        info!("Failed login for {} from {}", username, session.peer_addr());
        return Ok(Some(Response::LoginRejected {
            status: LoginStatus::InvalidCredentials,
        }));
    };

    let (user_id, name) = (user.id, user.username.clone());
    match ctx.registry.bind_player(user, session).await {
        Ok(()) => {
            info!("User {} ({}) logged in on session {}", user_id, name, session.id());
            Ok(Some(Response::LoginAccepted {
                user_id,
                username: name,
            }))
        }
        Err(RequestError::AlreadyOnline(_)) => Ok(Some(Response::LoginRejected {
            status: LoginStatus::AlreadyOnline,
        })),
        Err(e) => Err(e),
    }
}

/// Reserves a side-channel port for the session. Asking again returns the
/// port already held.
fn start_game(session: &Session, ctx: &HandlerContext, opcode: Opcode) -> HandlerResult {
    require_user(session, opcode)?;
    if let Some(port) = session.reserved_port() {
        return Ok(Some(Response::StartGame { port: Some(port) }));
    }

    let port = ctx.registry.acquire_port();
    match port {
        Some(port) => {
            session.set_reserved_port(port);
            info!("Session {} reserved port {}", session.id(), port);
        }
        None => info!("Session {} asked for a port but none are free", session.id()),
    }
    Ok(Some(Response::StartGame { port }))
}

async fn join_game(session: &Arc<Session>, ctx: &HandlerContext, opcode: Opcode) -> HandlerResult {
    let user = require_user(session, opcode)?;
    let joined = Arc::new(Response::PlayerJoined {
        user_id: user.id,
        username: user.username,
    });
    ctx.registry.broadcast(joined, &session.id()).await;

    let players = ctx.registry.player_count().await;
    Ok(Some(Response::JoinGame {
        players: i16::try_from(players).unwrap_or(i16::MAX),
    }))
}

fn end_game(session: &Session, ctx: &HandlerContext, opcode: Opcode) -> HandlerResult {
    require_user(session, opcode)?;
    if let Some(port) = session.take_reserved_port() {
        ctx.registry.release_port(port);
        info!("Session {} released port {}", session.id(), port);
    }
    Ok(Some(Response::EndGame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use crate::store::MemoryUserStore;

    struct Fixture {
        ctx: HandlerContext,
    }

    impl Fixture {
        fn new(ports: std::ops::RangeInclusive<u16>) -> Self {
            let store = MemoryUserStore::new();
            for name in ["ann", "bob", "cid"] {
                store.create_user(name, "pw").unwrap();
            }
            Self {
                ctx: HandlerContext {
                    registry: Arc::new(ServerRegistry::new(ports)),
                    dispatch: Arc::new(DispatchTable::standard()),
                    store: Arc::new(store),
                    timeout: Duration::from_secs(5),
                },
            }
        }

        async fn connect(&self) -> Arc<Session> {
            let session = Arc::new(Session::new(SessionId::new(), "127.0.0.1:6000".parse().unwrap(), 32));
            self.ctx.registry.register(Arc::clone(&session)).await;
            session
        }

        async fn run(&self, session: &Arc<Session>, request: Request) -> HandlerResult {
            execute(request, session, &self.ctx).await
        }

        async fn login(&self, session: &Arc<Session>, name: &str) -> Response {
            self.run(
                session,
                Request::Login {
                    username: name.to_string(),
                    password: "pw".to_string(),
                },
            )
            .await
            .unwrap()
            .unwrap()
        }
    }

    #[tokio::test]
    async fn test_login_binds_user() {
        let fx = Fixture::new(9000..=9009);
        let session = fx.connect().await;

        let reply = fx.login(&session, "ann").await;

        assert_eq!(
            reply,
            Response::LoginAccepted {
                user_id: 1,
                username: "ann".to_string()
            }
        );
        assert_eq!(fx.ctx.registry.find_by_user_id(1).await.unwrap().id(), session.id());
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let fx = Fixture::new(9000..=9009);
        let a = fx.connect().await;
        let b = fx.connect().await;

        let wrong = fx
            .run(
                &a,
                Request::Login {
                    username: "ann".to_string(),
                    password: "nope".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            wrong,
            Some(Response::LoginRejected {
                status: LoginStatus::InvalidCredentials
            })
        );

        fx.login(&a, "ann").await;
        assert_eq!(
            fx.login(&a, "bob").await,
            Response::LoginRejected {
                status: LoginStatus::AlreadyAuthenticated
            }
        );
        assert_eq!(
            fx.login(&b, "ann").await,
            Response::LoginRejected {
                status: LoginStatus::AlreadyOnline
            }
        );
    }

    #[tokio::test]
    async fn test_register_statuses() {
        let fx = Fixture::new(9000..=9009);
        let session = fx.connect().await;
        let register = |name: &str| Request::Register {
            username: name.to_string(),
            password: "pw".to_string(),
        };

        assert_eq!(
            fx.run(&session, register("dee")).await.unwrap(),
            Some(Response::Register {
                status: RegisterStatus::Created
            })
        );
        assert_eq!(
            fx.run(&session, register("ann")).await.unwrap(),
            Some(Response::Register {
                status: RegisterStatus::NameTaken
            })
        );
        assert_eq!(
            fx.run(&session, register("")).await.unwrap(),
            Some(Response::Register {
                status: RegisterStatus::InvalidInput
            })
        );
    }

    #[tokio::test]
    async fn test_actions_require_login() {
        let fx = Fixture::new(9000..=9009);
        let session = fx.connect().await;

        for request in [
            Request::Heartbeat,
            Request::Hit { damage: 1 },
            Request::Pickup { item_id: 1 },
            Request::StartGame,
            Request::JoinGame,
            Request::EndGame,
            Request::PushUpdate { payload: vec![] },
        ] {
            let opcode = request.opcode();
            match fx.run(&session, request).await {
                Err(RequestError::NotAuthenticated(op)) => assert_eq!(op, opcode),
                other => panic!("Expected NotAuthenticated, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_hit_reaches_peers_on_next_heartbeat() {
        let fx = Fixture::new(9000..=9009);
        let a = fx.connect().await;
        let b = fx.connect().await;
        fx.login(&a, "ann").await;
        fx.login(&b, "bob").await;

        assert_eq!(fx.run(&a, Request::Hit { damage: 25 }).await.unwrap(), None);

        let b_reply = fx.run(&b, Request::Heartbeat).await.unwrap();
        assert_eq!(
            b_reply,
            Some(Response::Heartbeat {
                sequence: 1,
                updates: vec![Arc::new(Response::Hit { damage: 25 })],
            })
        );

        let a_reply = fx.run(&a, Request::Heartbeat).await.unwrap();
        assert_eq!(
            a_reply,
            Some(Response::Heartbeat {
                sequence: 1,
                updates: vec![],
            })
        );

        // Delivered once only.
        match fx.run(&b, Request::Heartbeat).await.unwrap() {
            Some(Response::Heartbeat { sequence, updates }) => {
                assert_eq!(sequence, 2);
                assert!(updates.is_empty());
            }
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_game_announces_player() {
        let fx = Fixture::new(9000..=9009);
        let a = fx.connect().await;
        let b = fx.connect().await;
        fx.login(&a, "ann").await;
        fx.login(&b, "bob").await;

        let reply = fx.run(&b, Request::JoinGame).await.unwrap();

        assert_eq!(reply, Some(Response::JoinGame { players: 2 }));
        assert_eq!(a.pending_updates(), 1);
        assert_eq!(b.pending_updates(), 0);
    }

    #[tokio::test]
    async fn test_push_update_tagged_with_sender() {
        let fx = Fixture::new(9000..=9009);
        let a = fx.connect().await;
        let b = fx.connect().await;
        fx.login(&a, "ann").await;
        fx.login(&b, "bob").await;

        fx.run(&b, Request::PushUpdate { payload: vec![1, 2] })
            .await
            .unwrap();

        let (_, updates) = a.drain_updates();
        assert_eq!(
            updates,
            vec![Arc::new(Response::PushUpdate {
                user_id: 2,
                payload: vec![1, 2]
            })]
        );
    }

    #[tokio::test]
    async fn test_start_and_end_game_manage_ports() {
        let fx = Fixture::new(9000..=9000);
        let a = fx.connect().await;
        let b = fx.connect().await;
        fx.login(&a, "ann").await;
        fx.login(&b, "bob").await;

        let first = fx.run(&a, Request::StartGame).await.unwrap();
        assert_eq!(first, Some(Response::StartGame { port: Some(9000) }));
        let again = fx.run(&a, Request::StartGame).await.unwrap();
        assert_eq!(again, first);

        let exhausted = fx.run(&b, Request::StartGame).await.unwrap();
        assert_eq!(exhausted, Some(Response::StartGame { port: None }));

        assert_eq!(fx.run(&a, Request::EndGame).await.unwrap(), Some(Response::EndGame));
        assert_eq!(a.reserved_port(), None);
        assert_eq!(fx.ctx.registry.free_ports(), vec![9000]);
    }
}
