use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::DeliveryError;
use crate::event::{Event, EventOptions, Identify};
use crate::transport::Transport;

enum Command {
    Enqueue(Event),
    Flush,
    Shutdown,
}

/// Queues events and sends them from a background worker thread.
///
/// Events are sent once `flush_queue_size` of them are waiting, once the oldest
/// has waited `flush_interval`, or when `flush` or `shutdown` is called.
/// `shutdown` blocks until every queued event has been handed to the
/// destination and its callback has run. Dropping the client shuts it down.
pub struct Amplitude {
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Amplitude {
    pub fn new(config: Config) -> Result<Self, DeliveryError> {
        let transport = Transport::new(&config)?;
        let (sender, receiver) = mpsc::channel();

        let worker = Worker {
            receiver,
            transport,
            queue: Vec::new(),
            flush_queue_size: config.flush_queue_size.max(1),
            flush_interval: config.flush_interval.max(Duration::from_millis(1)),
        };

        let handle = thread::Builder::new()
            .name("amplitude-worker".to_owned())
            .spawn(move || worker.run())
            .map_err(DeliveryError::Spawn)?;

        info!(endpoint = %config.endpoint(), "amplitude client started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn track(&self, event: Event) {
        self.send(Command::Enqueue(event));
    }

    pub fn identify(&self, identify: Identify, options: EventOptions) {
        self.track(identify.into_event(options));
    }

    /// Asks the worker to send everything queued so far. Does not wait.
    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    /// Sends everything still queued and stops the worker. Safe to call more than once.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(sender) = sender else {
            return;
        };

        if sender.send(Command::Shutdown).is_err() {
            warn!("amplitude worker exited before shutdown");
        }
        drop(sender);

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("amplitude worker panicked");
            }
        }
        debug!("amplitude client shut down");
    }

    fn send(&self, command: Command) {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => {
                if sender.send(command).is_err() {
                    error!("amplitude worker is gone, dropping command");
                }
            }
            None => warn!("amplitude client is shut down, dropping command"),
        }
    }
}

impl Drop for Amplitude {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    receiver: Receiver<Command>,
    transport: Transport,
    queue: Vec<Event>,
    flush_queue_size: usize,
    flush_interval: Duration,
}

impl Worker {
    fn run(mut self) {
        let mut deadline = Instant::now() + self.flush_interval;

        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(timeout) {
                Ok(Command::Enqueue(event)) => {
                    self.queue.push(event);
                    if self.queue.len() >= self.flush_queue_size {
                        self.send_queued();
                        deadline = Instant::now() + self.flush_interval;
                    }
                }
                Ok(Command::Flush) => {
                    self.send_queued();
                    deadline = Instant::now() + self.flush_interval;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.send_queued();
                    deadline = Instant::now() + self.flush_interval;
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    self.send_queued();
                    return;
                }
            }
        }
    }

    fn send_queued(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.queue);
        debug!(count = events.len(), "sending queued events");
        self.transport.deliver(&events);
    }
}
