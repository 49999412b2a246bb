//! Engine-initiated mode: the agent listens and serves a single peer
//!
//! A new connection always wins. The reactor of the previous one is shut
//! down before the new reactor starts reading.

use super::registry::ReactorRegistry;
use super::{AgentSession, StreamingHandle};
use crate::protocol::AgentIdentification;
use crate::scheduler::builder::CheckBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct StreamingServer;

impl StreamingServer {
    pub fn spawn(
        listener: TcpListener,
        identification: AgentIdentification,
        builder: Arc<dyn CheckBuilder>,
        registry: ReactorRegistry,
    ) -> StreamingHandle {
        let session = AgentSession::new(identification, builder, registry);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(listener, Arc::clone(&session), cancel.clone()));
        StreamingHandle { session, cancel, task }
    }
}

async fn run(listener: TcpListener, session: Arc<AgentSession>, cancel: CancellationToken) {
    match listener.local_addr() {
        Ok(addr) => info!("waiting for the engine on {}", addr),
        Err(e) => warn!("listener address unavailable: {}", e),
    }
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = cancel.cancelled() => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("cannot disable nagle for {}: {}", peer, e);
                }
                let reactor = session.connect(stream);
                info!(reactor = reactor.id(), "engine connected from {}", peer);
            }
            Err(e) => warn!("accept failed: {}", e),
        }
    }
    info!("server stopped");
}
