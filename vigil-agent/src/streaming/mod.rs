//! Duplex streaming transport to the monitoring engine
//!
//! - `codec`: length-delimited JSON frames
//! - `registry`: live reactors, released once their transport is done
//! - `reactor`: the bidirectional message pump over one connection
//! - `client`: connects to the engine, reconnects after a fixed delay
//! - `server`: waits for the engine, keeps only the latest connection
//!
//! Client and server share [`AgentSession`]: it owns the scheduler
//! (created with the first connection, kept across reconnects) and routes
//! exports to whichever reactor is current.

pub mod client;
pub mod codec;
pub mod reactor;
pub mod registry;
pub mod server;

use crate::error::TransportError;
use crate::protocol::{AgentIdentification, ExportMetrics, MessageFromAgent, MessageToAgent};
use crate::scheduler::builder::CheckBuilder;
use crate::scheduler::{Scheduler, SchedulerHandle};
use parking_lot::Mutex;
use reactor::{Reactor, ReactorOwner};
use registry::{ReactorId, ReactorRegistry};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type AgentReactor = Reactor<MessageToAgent, MessageFromAgent>;

/// Scheduler plus the reactor currently carrying its traffic.
pub struct AgentSession {
    identification: AgentIdentification,
    builder: Arc<dyn CheckBuilder>,
    registry: ReactorRegistry,
    current: Arc<Mutex<Option<Arc<AgentReactor>>>>,
    scheduler: Mutex<Option<(SchedulerHandle, JoinHandle<()>)>>,
    failed: Notify,
}

impl AgentSession {
    pub fn new(identification: AgentIdentification, builder: Arc<dyn CheckBuilder>, registry: ReactorRegistry) -> Arc<Self> {
        Arc::new(Self {
            identification,
            builder,
            registry,
            current: Arc::new(Mutex::new(None)),
            scheduler: Mutex::new(None),
            failed: Notify::new(),
        })
    }

    /// Start a reactor on `stream`, make it current and send the
    /// identification. A previous current reactor is shut down first.
    pub fn connect<S>(self: &Arc<Self>, stream: S) -> Arc<AgentReactor>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.ensure_scheduler();
        if let Some(previous) = self.current.lock().take() {
            info!(reactor = previous.id(), "closing previous connection");
            previous.shutdown();
        }

        let owner: Arc<dyn ReactorOwner<MessageToAgent>> = self.clone();
        let owner: Weak<dyn ReactorOwner<MessageToAgent>> = Arc::downgrade(&owner);
        let reactor = AgentReactor::start(stream, owner, &self.registry);
        *self.current.lock() = Some(Arc::clone(&reactor));
        reactor.write(&MessageFromAgent::Init(self.identification.clone()));
        reactor
    }

    /// Resolves after the current reactor failed.
    pub async fn failed(&self) {
        self.failed.notified().await
    }

    pub fn current(&self) -> Option<Arc<AgentReactor>> {
        self.current.lock().clone()
    }

    /// Shut the current reactor down without reporting a failure.
    pub fn disconnect(&self) {
        if let Some(reactor) = self.current.lock().take() {
            reactor.shutdown();
        }
    }

    pub fn scheduler(&self) -> Option<SchedulerHandle> {
        self.scheduler.lock().as_ref().map(|(handle, _)| handle.clone())
    }

    fn ensure_scheduler(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return;
        }
        let current = Arc::clone(&self.current);
        let sender = Box::new(move |export: ExportMetrics| {
            let reactor = current.lock().clone();
            match reactor {
                Some(reactor) => {
                    if !reactor.write(&MessageFromAgent::Metrics(export)) {
                        debug!("connection closing, metrics dropped");
                    }
                }
                None => debug!("no connection, metrics dropped"),
            }
        });
        *scheduler = Some(Scheduler::spawn(Arc::clone(&self.builder), sender));
    }

    /// Stop the transport and the scheduler.
    pub async fn close(&self) {
        self.disconnect();
        let scheduler = self.scheduler.lock().take();
        if let Some((handle, task)) = scheduler {
            handle.stop();
            if let Err(e) = task.await {
                tracing::error!("scheduler task failed: {}", e);
            }
        }
    }
}

impl ReactorOwner<MessageToAgent> for AgentSession {
    fn on_message(&self, reactor: ReactorId, message: MessageToAgent) {
        let Some(conf) = message.config else {
            return;
        };
        debug!(reactor, "configuration received");
        match self.scheduler() {
            Some(scheduler) => {
                scheduler.update(conf);
            }
            None => debug!(reactor, "scheduler stopped, configuration ignored"),
        }
    }

    fn on_error(&self, reactor: ReactorId, error: TransportError) {
        let mut current = self.current.lock();
        if current.as_ref().map(|r| r.id()) != Some(reactor) {
            debug!(reactor, "error on a replaced connection: {}", error);
            return;
        }
        *current = None;
        drop(current);
        info!(reactor, "connection lost: {}", error);
        self.failed.notify_one();
    }
}

/// Handle on a running client or server task.
pub struct StreamingHandle {
    session: Arc<AgentSession>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamingHandle {
    pub fn session(&self) -> &Arc<AgentSession> {
        &self.session
    }

    pub fn scheduler(&self) -> Option<SchedulerHandle> {
        self.session.scheduler()
    }

    /// Stop accepting or reconnecting, close the connection and the scheduler.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("streaming task failed: {}", e);
        }
        self.session.close().await;
    }
}
