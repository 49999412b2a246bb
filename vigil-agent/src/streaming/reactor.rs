//! Duplex message reactor
//!
//! Pumps messages in both directions over one byte stream:
//! - one read in flight at a time; once a frame is decoded the next read
//!   is armed, then the message is handed to the owner if dispatchable
//! - writes are queued in order and sent one at a time; the head of the
//!   queue is the frame in flight and is popped once written
//! - any read or write failure calls the owner's error hook once, then
//!   shuts the reactor down
//!
//! The owner is held through a [`Weak`] reference and only looked up when
//! needed. The reactor itself stays in the [`ReactorRegistry`] until both
//! I/O tasks have returned.

use super::codec::{decode_frame, encode_message, frame_codec};
use super::registry::{LiveReactor, ReactorId, ReactorRegistry};
use crate::error::TransportError;
use crate::protocol::Dispatchable;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Time given to flush and close the write half on shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Receives what a reactor reads and learns about its failures.
pub trait ReactorOwner<In>: Send + Sync + 'static {
    fn on_message(&self, reactor: ReactorId, message: In);

    fn on_error(&self, reactor: ReactorId, error: TransportError);
}

#[derive(Default)]
struct IoState {
    alive: bool,
    write_queue: VecDeque<Bytes>,
    write_in_flight: bool,
    read_in_flight: bool,
}

/// Point-in-time view of the I/O state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSnapshot {
    pub alive: bool,
    pub queued_writes: usize,
    pub write_in_flight: bool,
    pub read_in_flight: bool,
}

enum WriteStep {
    Frame(Bytes),
    Idle,
    Closed,
}

pub struct Reactor<In, Out> {
    id: ReactorId,
    state: Mutex<IoState>,
    write_ready: Notify,
    cancel: CancellationToken,
    owner: Weak<dyn ReactorOwner<In>>,
    _out: PhantomData<fn(Out)>,
}

impl<In, Out> Reactor<In, Out>
where
    In: DeserializeOwned + Dispatchable + Send + 'static,
    Out: Serialize + 'static,
{
    /// Start pumping `stream`. The reactor is registered before its tasks
    /// are spawned and released by the registry once both have ended.
    pub fn start<S>(stream: S, owner: Weak<dyn ReactorOwner<In>>, registry: &ReactorRegistry) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let reactor = Arc::new(Self {
            id: registry.allocate_id(),
            state: Mutex::new(IoState {
                alive: true,
                ..IoState::default()
            }),
            write_ready: Notify::new(),
            cancel: CancellationToken::new(),
            owner,
            _out: PhantomData,
        });
        registry.insert(Arc::clone(&reactor) as Arc<dyn LiveReactor>);
        debug!(reactor = reactor.id, "reactor started");

        let (reader, writer) = tokio::io::split(stream);
        let read_task = tokio::spawn(Arc::clone(&reactor).read_loop(FramedRead::new(reader, frame_codec())));
        let write_task = tokio::spawn(Arc::clone(&reactor).write_loop(FramedWrite::new(writer, frame_codec())));

        let id = reactor.id;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = read_task.await {
                error!(reactor = id, "read task failed: {}", e);
            }
            if let Err(e) = write_task.await {
                error!(reactor = id, "write task failed: {}", e);
            }
            registry.release(id);
            debug!(reactor = id, "reactor transport closed");
        });

        reactor
    }

    /// Queue `message` for sending. Never blocks; returns `false` if the
    /// reactor is shut down or the message cannot be encoded.
    pub fn write(&self, message: &Out) -> bool {
        let frame = match encode_message(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(reactor = self.id, "cannot encode outgoing message: {}", e);
                return false;
            }
        };
        {
            let mut state = self.state.lock();
            if !state.alive {
                return false;
            }
            state.write_queue.push_back(frame);
        }
        self.write_ready.notify_one();
        true
    }

    async fn read_loop<R>(self: Arc<Self>, mut frames: FramedRead<R, LengthDelimitedCodec>)
    where
        R: AsyncRead + Unpin,
    {
        let mut armed = self.begin_read();
        while armed {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                frame = frames.next() => frame,
            };
            self.end_read();

            let message = match frame {
                Some(Ok(frame)) => decode_frame::<In>(&frame),
                Some(Err(e)) => Err(TransportError::Io(e)),
                None => Err(TransportError::Closed),
            };
            match message {
                Ok(message) => {
                    // the next read is armed before the owner sees this message
                    armed = self.begin_read();
                    self.dispatch(message);
                }
                Err(e) => {
                    self.fail(e);
                    break;
                }
            }
        }
        self.end_read();
        trace!(reactor = self.id, "read loop ended");
    }

    async fn write_loop<W>(self: Arc<Self>, mut frames: FramedWrite<W, LengthDelimitedCodec>)
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            match self.next_write() {
                WriteStep::Frame(frame) => {
                    let sent = tokio::select! {
                        sent = frames.send(frame) => sent,
                        _ = self.cancel.cancelled() => break,
                    };
                    self.end_write();
                    if let Err(e) = sent {
                        self.fail(TransportError::Io(e));
                        break;
                    }
                }
                WriteStep::Idle => {
                    tokio::select! {
                        _ = self.write_ready.notified() => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
                WriteStep::Closed => break,
            }
        }
        if tokio::time::timeout(CLOSE_TIMEOUT, SinkExt::<Bytes>::close(&mut frames)).await.is_err() {
            trace!(reactor = self.id, "write half close timed out");
        }
        trace!(reactor = self.id, "write loop ended");
    }

    fn begin_read(&self) -> bool {
        let mut state = self.state.lock();
        if !state.alive {
            return false;
        }
        debug_assert!(!state.read_in_flight);
        state.read_in_flight = true;
        true
    }

    fn end_read(&self) {
        self.state.lock().read_in_flight = false;
    }

    /// Mark the queue head as in flight, if any.
    fn next_write(&self) -> WriteStep {
        let mut state = self.state.lock();
        if !state.alive {
            return WriteStep::Closed;
        }
        debug_assert!(!state.write_in_flight);
        match state.write_queue.front().cloned() {
            Some(frame) => {
                state.write_in_flight = true;
                WriteStep::Frame(frame)
            }
            None => WriteStep::Idle,
        }
    }

    fn end_write(&self) {
        let mut state = self.state.lock();
        state.write_in_flight = false;
        state.write_queue.pop_front();
    }

    fn dispatch(&self, message: In) {
        if !message.is_dispatchable() {
            trace!(reactor = self.id, "message without payload ignored");
            return;
        }
        match self.owner.upgrade() {
            Some(owner) => owner.on_message(self.id, message),
            None => debug!(reactor = self.id, "owner gone, message dropped"),
        }
    }

    fn fail(&self, error: TransportError) {
        if !self.close() {
            return;
        }
        match &error {
            TransportError::Closed => debug!(reactor = self.id, "{}", error),
            _ => warn!(reactor = self.id, "transport failure: {}", error),
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.on_error(self.id, error);
        }
    }

    /// Returns `true` for the call that actually closed the reactor.
    fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.alive {
                return false;
            }
            state.alive = false;
            state.write_queue.clear();
        }
        self.cancel.cancel();
        true
    }
}

impl<In, Out> Reactor<In, Out> {
    pub fn id(&self) -> ReactorId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    pub fn io_snapshot(&self) -> IoSnapshot {
        let state = self.state.lock();
        IoSnapshot {
            alive: state.alive,
            queued_writes: state.write_queue.len(),
            write_in_flight: state.write_in_flight,
            read_in_flight: state.read_in_flight,
        }
    }
}

impl<In, Out> LiveReactor for Reactor<In, Out>
where
    In: DeserializeOwned + Dispatchable + Send + 'static,
    Out: Serialize + 'static,
{
    fn id(&self) -> ReactorId {
        self.id
    }

    fn is_alive(&self) -> bool {
        Reactor::is_alive(self)
    }

    /// Idempotent. Does not call the owner's error hook.
    fn shutdown(&self) {
        if self.close() {
            debug!(reactor = self.id, "reactor shut down");
        }
    }
}

impl<In, Out> Reactor<In, Out>
where
    In: DeserializeOwned + Dispatchable + Send + 'static,
    Out: Serialize + 'static,
{
    pub fn shutdown(&self) {
        LiveReactor::shutdown(self)
    }
}
