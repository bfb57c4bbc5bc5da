//! Scripted bot for smoke-testing a running server.
//!
//! Registers (or reuses) an account, logs in, then alternates hits and
//! heartbeats, logging every update it receives from other players.

use clap::Parser;
use log::{info, warn};
use rand::Rng;
use shared::{PacketReader, Request, Response, WireError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9252")]
    server: String,

    /// Account name
    #[arg(short, long, default_value = "bot")]
    username: String,

    /// Account password
    #[arg(short, long, default_value = "bot")]
    password: String,

    /// Milliseconds between heartbeats
    #[arg(short = 'i', long, default_value = "500")]
    interval: u64,

    /// Stop after this many heartbeats (0 runs forever)
    #[arg(short = 'n', long, default_value = "0")]
    rounds: u64,
}

struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Connection {
    async fn send(&mut self, request: &Request) -> Result<(), Box<dyn std::error::Error>> {
        self.stream.write_all(&request.encode()?).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Response, Box<dyn std::error::Error>> {
        let mut chunk = [0u8; 2048];
        loop {
            let mut reader = PacketReader::new(&self.buffer);
            match Response::decode(&mut reader) {
                Ok(response) => {
                    let used = reader.position();
                    self.buffer.drain(..used);
                    return Ok(response);
                }
                Err(WireError::Incomplete { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err("server closed the connection".into());
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);
    let mut conn = Connection {
        stream,
        buffer: Vec::new(),
    };

    conn.send(&Request::Register {
        username: args.username.clone(),
        password: args.password.clone(),
    })
    .await?;
    info!("Register: {:?}", conn.receive().await?);

    conn.send(&Request::Login {
        username: args.username.clone(),
        password: args.password.clone(),
    })
    .await?;
    match conn.receive().await? {
        Response::LoginAccepted { user_id, username } => info!("Logged in as {} ({})", username, user_id),
        other => {
            warn!("Login refused: {:?}", other);
            return Ok(());
        }
    }

    conn.send(&Request::JoinGame).await?;
    info!("Join: {:?}", conn.receive().await?);

    let mut round = 0;
    while args.rounds == 0 || round < args.rounds {
        round += 1;

        let damage = rand::thread_rng().gen_range(1..=50);
        conn.send(&Request::Hit { damage }).await?;

        conn.send(&Request::Heartbeat).await?;
        match conn.receive().await? {
            Response::Heartbeat { sequence, updates } => {
                info!("Heartbeat #{}: {} update(s)", sequence, updates.len());
                for update in updates {
                    info!("  {:?}", update);
                }
            }
            other => warn!("Unexpected reply to heartbeat: {:?}", other),
        }

        sleep(Duration::from_millis(args.interval)).await;
    }

    Ok(())
}
