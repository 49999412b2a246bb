/*!
Stub du moteur de supervision

Joue le rôle du moteur face à un agent réel, sans moteur déployé:
- écoute (mode agent initiated) ou se connecte (mode poller initiated)
- enregistre les identifications et les exports de métriques reçus
- pousse des configurations vers l'agent
*/

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use vigil_agent::error::TransportError;
use vigil_agent::protocol::{
    AgentConfiguration, AgentIdentification, ExportMetrics, MessageFromAgent, MessageToAgent, ResourceMetrics,
};
use vigil_agent::streaming::reactor::{Reactor, ReactorOwner};
use vigil_agent::streaming::registry::{ReactorId, ReactorRegistry};

pub type EngineReactor = Reactor<MessageFromAgent, MessageToAgent>;

#[derive(Default)]
struct EngineState {
    received: Mutex<Vec<MessageFromAgent>>,
    errors: Mutex<Vec<String>>,
    current: Mutex<Option<Arc<EngineReactor>>>,
    connections: AtomicUsize,
    changed: Notify,
}

impl ReactorOwner<MessageFromAgent> for EngineState {
    fn on_message(&self, reactor: ReactorId, message: MessageFromAgent) {
        match &message {
            MessageFromAgent::Init(id) => {
                log::info!("🤝 [ENGINE] Agent {} v{} identified (reactor {})", id.host, id.version, reactor)
            }
            MessageFromAgent::Metrics(export) => {
                log::info!("📊 [ENGINE] {} resources exported", export.resource_metrics.len())
            }
        }
        self.received.lock().unwrap().push(message);
        self.changed.notify_waiters();
    }

    fn on_error(&self, reactor: ReactorId, error: TransportError) {
        log::warn!("⚠️ [ENGINE] Reactor {} failed: {}", reactor, error);
        self.errors.lock().unwrap().push(error.to_string());
        self.changed.notify_waiters();
    }
}

/// Moteur factice pilotable depuis les tests
pub struct EngineStub {
    state: Arc<EngineState>,
    registry: ReactorRegistry,
    accept_task: Option<JoinHandle<()>>,
}

impl EngineStub {
    /// Écoute sur un port local libre, l'agent se connecte à nous
    pub async fn listen() -> Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("Failed to bind engine stub")?;
        let addr = listener.local_addr()?;
        let mut stub = Self::empty();

        let state = Arc::clone(&stub.state);
        let registry = stub.registry.clone();
        stub.accept_task = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::info!("🔌 [ENGINE] Agent connected from {}", peer);
                        attach(&state, &registry, stream);
                    }
                    Err(e) => {
                        log::warn!("⚠️ [ENGINE] Accept failed: {}", e);
                        break;
                    }
                }
            }
        }));

        log::info!("🎧 [ENGINE] Listening on {}", addr);
        Ok((stub, addr))
    }

    /// Se connecte à un agent en mode serveur
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to agent on {}", addr))?;
        let stub = Self::empty();
        attach(&stub.state, &stub.registry, stream);
        log::info!("🔌 [ENGINE] Connected to agent on {}", addr);
        Ok(stub)
    }

    fn empty() -> Self {
        Self {
            state: Arc::new(EngineState::default()),
            registry: ReactorRegistry::new(),
            accept_task: None,
        }
    }

    /// Pousse une configuration sur la connexion courante
    pub fn push_config(&self, conf: AgentConfiguration) -> Result<()> {
        let reactor = self
            .state
            .current
            .lock()
            .unwrap()
            .clone()
            .context("No agent connected")?;
        if !reactor.write(&MessageToAgent::with_config(conf)) {
            anyhow::bail!("Connection {} is closed", reactor.id());
        }
        log::info!("📤 [ENGINE] Configuration pushed");
        Ok(())
    }

    /// Ferme la connexion courante, comme un moteur redémarré
    pub fn drop_connection(&self) {
        if let Some(reactor) = self.state.current.lock().unwrap().take() {
            log::info!("✂️ [ENGINE] Dropping connection {}", reactor.id());
            reactor.shutdown();
        }
    }

    /// Attend que les messages reçus satisfassent `predicate`
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> Result<()>
    where
        F: Fn(&[MessageFromAgent]) -> bool,
    {
        tokio::time::timeout(timeout, async {
            loop {
                let changed = self.state.changed.notified();
                if predicate(&self.state.received.lock().unwrap()) {
                    return;
                }
                // réveil périodique au cas où une notification est manquée
                let _ = tokio::time::timeout(Duration::from_millis(100), changed).await;
            }
        })
        .await
        .context("Timed out waiting for agent messages")
    }

    /// Attend que la connexion courante soit fermée par l'agent
    pub async fn wait_for_disconnect(&self, timeout: Duration) -> Result<String> {
        tokio::time::timeout(timeout, async {
            loop {
                let changed = self.state.changed.notified();
                if let Some(error) = self.state.errors.lock().unwrap().first().cloned() {
                    return error;
                }
                let _ = tokio::time::timeout(Duration::from_millis(100), changed).await;
            }
        })
        .await
        .context("Agent kept the connection open")
    }

    /// Attend la `count`-ième identification et la retourne
    pub async fn wait_for_init(&self, count: usize, timeout: Duration) -> Result<AgentIdentification> {
        self.wait_until(timeout, |messages| count_inits(messages) >= count).await?;
        self.inits()
            .into_iter()
            .nth(count.saturating_sub(1))
            .context("Identification vanished")
    }

    pub fn inits(&self) -> Vec<AgentIdentification> {
        self.received()
            .into_iter()
            .filter_map(|m| match m {
                MessageFromAgent::Init(id) => Some(id),
                MessageFromAgent::Metrics(_) => None,
            })
            .collect()
    }

    pub fn exports(&self) -> Vec<ExportMetrics> {
        self.received()
            .into_iter()
            .filter_map(|m| match m {
                MessageFromAgent::Metrics(export) => Some(export),
                MessageFromAgent::Init(_) => None,
            })
            .collect()
    }

    /// Points du metric `status` reçus pour un service: (code, description)
    pub fn status_points(&self, host: &str, service: &str) -> Vec<(f64, String)> {
        status_points(&self.received(), host, service)
    }

    pub fn received(&self) -> Vec<MessageFromAgent> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.state.errors.lock().unwrap().clone()
    }

    /// Nombre de connexions établies depuis le démarrage
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &ReactorRegistry {
        &self.registry
    }
}

impl Drop for EngineStub {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        self.registry.shutdown_all();
    }
}

fn attach(state: &Arc<EngineState>, registry: &ReactorRegistry, stream: TcpStream) {
    let owner: Arc<dyn ReactorOwner<MessageFromAgent>> = state.clone();
    let owner: Weak<dyn ReactorOwner<MessageFromAgent>> = Arc::downgrade(&owner);
    let reactor = EngineReactor::start(stream, owner, registry);
    if let Some(previous) = state.current.lock().unwrap().replace(reactor) {
        previous.shutdown();
    }
    state.connections.fetch_add(1, Ordering::SeqCst);
    state.changed.notify_waiters();
}

fn count_inits(messages: &[MessageFromAgent]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, MessageFromAgent::Init(_)))
        .count()
}

/// Ressources exportées pour (hôte, service), dans l'ordre de réception
pub fn resources<'a>(
    messages: &'a [MessageFromAgent],
    host: &'a str,
    service: &'a str,
) -> impl Iterator<Item = &'a ResourceMetrics> + 'a {
    messages
        .iter()
        .filter_map(|m| match m {
            MessageFromAgent::Metrics(export) => Some(export),
            MessageFromAgent::Init(_) => None,
        })
        .flat_map(|e| e.resource_metrics.iter())
        .filter(move |r| r.host == host && r.service == service)
}

pub fn status_points(messages: &[MessageFromAgent], host: &str, service: &str) -> Vec<(f64, String)> {
    resources(messages, host, service)
        .flat_map(|r| r.metrics.iter())
        .filter(|m| m.name == "status")
        .flat_map(|m| m.data_points.iter().map(move |p| (p.value, m.description.clone())))
        .collect()
}
