//! Agent-initiated connection to the engine
//!
//! Connects, runs one reactor until it fails, waits the reconnect delay and
//! starts over. The scheduler survives reconnections.

use super::registry::ReactorRegistry;
use super::{AgentSession, StreamingHandle};
use crate::protocol::AgentIdentification;
use crate::scheduler::builder::CheckBuilder;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Opens the byte stream to the engine.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    async fn connect(&self) -> std::io::Result<Self::Stream>;

    /// Shown in logs.
    fn endpoint(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
}

impl TcpConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.endpoint).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub identification: AgentIdentification,
    pub reconnect_delay: Duration,
}

pub struct StreamingClient;

impl StreamingClient {
    pub fn spawn<C: Connector>(
        connector: C,
        settings: ClientSettings,
        builder: Arc<dyn CheckBuilder>,
        registry: ReactorRegistry,
    ) -> StreamingHandle {
        let session = AgentSession::new(settings.identification, builder, registry);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            connector,
            settings.reconnect_delay,
            Arc::clone(&session),
            cancel.clone(),
        ));
        StreamingHandle { session, cancel, task }
    }
}

async fn run<C: Connector>(connector: C, reconnect_delay: Duration, session: Arc<AgentSession>, cancel: CancellationToken) {
    let endpoint = connector.endpoint();
    loop {
        let connected = tokio::select! {
            connected = connector.connect() => connected,
            _ = cancel.cancelled() => break,
        };
        match connected {
            Ok(stream) => {
                let reactor = session.connect(stream);
                info!(reactor = reactor.id(), "connected to {}", endpoint);
                tokio::select! {
                    _ = session.failed() => {}
                    _ = cancel.cancelled() => break,
                }
                reactor.shutdown();
            }
            Err(e) => warn!("connection to {} failed: {}", endpoint, e),
        }

        info!("reconnecting to {} in {:?}", endpoint, reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = cancel.cancelled() => break,
        }
    }
    info!("client to {} stopped", endpoint);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::tests::TestRunner;
    use crate::check::CheckRunner;
    use crate::error::CheckError;
    use crate::protocol::{ConnectionMode, MessageFromAgent, Version};
    use crate::scheduler::builder::BuildContext;
    use crate::check::CheckIdentity;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::io::DuplexStream;
    use tokio_util::codec::FramedRead;

    /// Hands out pre-built duplex streams; fails once they run out.
    struct DuplexConnector {
        streams: Mutex<VecDeque<DuplexStream>>,
        attempts: Arc<Mutex<Vec<tokio::time::Instant>>>,
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> std::io::Result<DuplexStream> {
            self.attempts.lock().push(tokio::time::Instant::now());
            self.streams
                .lock()
                .pop_front()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
        }

        fn endpoint(&self) -> String {
            "duplex".into()
        }
    }

    fn settings() -> ClientSettings {
        ClientSettings {
            identification: AgentIdentification {
                host: "host_1".into(),
                version: Version::current(),
                os: "linux".into(),
                os_version: "6.1".into(),
                connection_mode: ConnectionMode::AgentInitiated,
                encryption_self_test: false,
            },
            reconnect_delay: Duration::from_secs(10),
        }
    }

    fn builder() -> Arc<dyn CheckBuilder> {
        let runner: Arc<dyn CheckRunner> = Arc::new(TestRunner::new(Duration::ZERO));
        Arc::new(move |_: &CheckIdentity, _: &BuildContext<'_>| -> Result<Arc<dyn CheckRunner>, CheckError> {
            Ok(Arc::clone(&runner))
        })
    }

    async fn next_message(frames: &mut FramedRead<DuplexStream, tokio_util::codec::LengthDelimitedCodec>) -> Option<MessageFromAgent> {
        let frame = frames.next().await?.ok()?;
        crate::streaming::codec::decode_frame(&frame).ok()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_delay_and_identifies_again() {
        let (first_agent, first_engine) = tokio::io::duplex(64 * 1024);
        let (second_agent, second_engine) = tokio::io::duplex(64 * 1024);
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let connector = DuplexConnector {
            streams: Mutex::new(VecDeque::from([first_agent, second_agent])),
            attempts: Arc::clone(&attempts),
        };
        let handle = StreamingClient::spawn(connector, settings(), builder(), ReactorRegistry::new());

        let mut first = FramedRead::new(first_engine, crate::streaming::codec::frame_codec());
        assert!(matches!(next_message(&mut first).await, Some(MessageFromAgent::Init(_))));
        let scheduler = handle.scheduler().unwrap();

        // engine goes away
        drop(first);

        let mut second = FramedRead::new(second_engine, crate::streaming::codec::frame_codec());
        match next_message(&mut second).await {
            Some(MessageFromAgent::Init(identification)) => assert_eq!(identification.host, "host_1"),
            other => panic!("unexpected {:?}", other),
        }

        let attempts = attempts.lock().clone();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(10));

        // same scheduler across connections
        assert!(scheduler.status().await.is_some());
        assert!(handle.scheduler().unwrap().status().await.is_some());
        handle.stop().await;
        assert!(scheduler.status().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connections_are_retried() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let connector = DuplexConnector {
            streams: Mutex::new(VecDeque::new()),
            attempts: Arc::clone(&attempts),
        };
        let handle = StreamingClient::spawn(connector, settings(), builder(), ReactorRegistry::new());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(attempts.lock().len(), 4);
        // no connection yet: no scheduler either
        assert!(handle.scheduler().is_none());
        handle.stop().await;
    }
}
