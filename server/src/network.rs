//! Listener setup and the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use shared::PlatformRecord;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::broadcast::Broadcaster;
use crate::game::RoundEngine;
use crate::registry::ClientRegistry;
use crate::rooms::RoomTable;
use crate::session::{run_session, SessionContext};

pub struct ServerConfig {
    /// Address to listen on, e.g. "127.0.0.1:7878". Port 0 picks a free one.
    pub bind_addr: String,
    /// Round count used when a create request leaves it unspecified.
    pub default_rounds: u32,
    /// Read-idle limit; None disables the timeout entirely.
    pub idle_timeout: Option<Duration>,
    /// Platforms preloaded from a map file, included in every round layout.
    pub base_layout: Vec<PlatformRecord>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", shared::DEFAULT_PORT),
            default_rounds: shared::DEFAULT_TOTAL_ROUNDS,
            idle_timeout: None,
            base_layout: Vec::new(),
        }
    }
}

/// The session server: one listening endpoint, one task per accepted
/// connection, all tasks sharing the injected registry and room table.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl Server {
    /// Binds the listener and wires up the shared state. The registry and
    /// room table are constructed here and injected into every component;
    /// they live exactly as long as the server.
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("server listening on {}", listener.local_addr()?);

        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let rooms = Arc::new(RwLock::new(RoomTable::new()));
        let engine = Arc::new(RoundEngine::new(
            rooms,
            Arc::clone(&broadcaster),
            config.default_rounds,
            config.base_layout,
        ));

        let ctx = Arc::new(SessionContext {
            registry,
            broadcaster,
            engine,
            idle_timeout: config.idle_timeout,
        });
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, spawning one worker per socket. Accept
    /// errors are logged and retried; they never bring the server down.
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(run_session(stream, addr, ctx));
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::read_message;
    use shared::Message;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_bind_on_ephemeral_port() {
        let server = Server::bind(ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        })
        .await
        .unwrap();

        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_accepted_connection_receives_init() {
        let server = Server::bind(ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        })
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let message = timeout(Duration::from_secs(1), read_message(&mut stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let Message::Init(init) = message else {
            panic!("expected an init, got {:?}", message);
        };
        assert!(init.player_id > 0);
    }
}
