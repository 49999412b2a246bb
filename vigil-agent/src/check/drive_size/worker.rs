//! Dedicated thread collecting filesystem statistics
//!
//! Statfs-like calls can block for a long time on a dead network mount, so
//! they never run on the async runtime. Requests are queued under a mutex,
//! the thread is woken with a condvar, and results go back through a
//! one-shot channel.

use super::filter::Filter;
use super::{FsStat, FsStatsProvider};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

struct Request {
    filter: Arc<Mutex<Filter>>,
    deadline: Instant,
    reply: oneshot::Sender<Vec<FsStat>>,
}

struct Queue {
    requests: VecDeque<Request>,
    active: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
    provider: Arc<dyn FsStatsProvider>,
}

pub struct DriveSizeWorker {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DriveSizeWorker {
    pub fn start(provider: Arc<dyn FsStatsProvider>) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                requests: VecDeque::new(),
                active: true,
            }),
            wake: Condvar::new(),
            provider,
        });

        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("drive-size".to_string())
            .spawn(move || run(thread_shared))?;
        info!("drive size worker thread started");

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queue a collection. `None` if the request expired or the worker stopped.
    pub async fn fs_stats(&self, filter: Arc<Mutex<Filter>>, timeout: Duration) -> Option<Vec<FsStat>> {
        let (reply, response) = oneshot::channel();
        {
            let mut queue = self.shared.queue.lock();
            if !queue.active {
                return None;
            }
            queue.requests.push_back(Request {
                filter,
                deadline: Instant::now() + timeout,
                reply,
            });
        }
        self.shared.wake.notify_one();
        response.await.ok()
    }

    /// Stop the thread and wait for it. Blocks while a collection is in
    /// progress, so call it off the async runtime.
    pub fn shutdown(&self) {
        self.stop();
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("drive size worker thread panicked");
            }
            info!("drive size worker thread stopped");
        }
    }

    /// Ask the thread to exit without waiting for it.
    fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if !queue.active {
                return;
            }
            queue.active = false;
            queue.requests.clear();
        }
        self.shared.wake.notify_all();
    }
}

impl Drop for DriveSizeWorker {
    fn drop(&mut self) {
        // the thread is detached and exits after its current collection
        self.stop();
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let request = {
            let mut queue = shared.queue.lock();
            while queue.active && queue.requests.is_empty() {
                shared.wake.wait(&mut queue);
            }
            if !queue.active {
                return;
            }
            queue.requests.pop_front()
        };
        let Some(request) = request else {
            continue;
        };

        if Instant::now() > request.deadline || request.reply.is_closed() {
            debug!("drive size request expired before processing");
            continue;
        }

        let stats = {
            let mut filter = request.filter.lock();
            shared.provider.fs_stats(&mut filter)
        };
        let _ = request.reply.send(stats);
    }
}
