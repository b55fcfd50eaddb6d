//! TCP listener and accept loop

use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::room::Rooms;
use crate::session;

/// The listening socket plus the room registry shared with every session.
pub struct Server {
    listener: TcpListener,
    rooms: Arc<Rooms>,
}

impl Server {
    pub async fn new(addr: &str, rooms: Arc<Rooms>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", addr);
        Ok(Server { listener, rooms })
    }

    /// Actual bound address, useful when listening on an ephemeral port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Each accepted connection becomes one independent
    /// session task joined to the lobby; the loop itself never waits on
    /// session progress and runs until the process terminates.
    pub async fn run(self) -> std::io::Result<()> {
        let mut next_session_id: u64 = 1;

        loop {
            let (stream, addr) = self.listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }

            let id = next_session_id;
            next_session_id += 1;
            info!("Connection from {} (session {})", addr, id);

            let rooms = Arc::clone(&self.rooms);
            tokio::spawn(async move {
                session::run(stream, id, rooms).await;
            });
        }
    }
}
