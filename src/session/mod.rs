// Module for session management
pub mod connection;
pub mod registry;
pub mod state;

pub use connection::Session;
pub use registry::{Admission, SessionRegistry};
pub use state::{SessionPhase, SessionState};

use crate::catalog::Catalog;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Everything shared by the sessions of one gateway.
#[derive(Clone)]
pub struct Gateway {
    pub catalog: Arc<Catalog>,
    pub registry: Arc<SessionRegistry>,
}

impl Gateway {
    pub fn new(catalog: Arc<Catalog>, max_connections: usize) -> Self {
        Gateway {
            catalog,
            registry: Arc::new(SessionRegistry::new(max_connections)),
        }
    }
}

/// Accept connections until the listener fails, one task per session.
pub async fn serve(listener: TcpListener, gateway: Gateway) -> io::Result<()> {
    info!("octopus listening on {}", listener.local_addr()?);
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("failed to accept connection: {}", e);
                continue;
            }
        };
        info!("New TCP connection from {}", addr);
        if let Err(e) = stream.set_nodelay(true) {
            error!("failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        let gateway = gateway.clone();
        tokio::spawn(async move {
            Session::new(stream, gateway, addr.to_string()).run().await;
        });
    }
}
