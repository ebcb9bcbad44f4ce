//! Built-in placeholder service: a TCP listener that greets each client.
//!
//! Connections are accepted on a non-blocking socket and handed to a fixed
//! pool of workers through a bounded queue. When the queue is full the
//! connection is dropped.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{SERVICE_TARGET, Service, ServiceError, ServiceSettings};

/// Registry name of the placeholder listener.
pub const LISTENER_APP: &str = "warden.listener";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Placeholder service keeping a TCP port open under supervision.
#[derive(Debug, Default)]
pub struct ListenerService {
    settings: Option<ServiceSettings>,
    shutdown: Arc<AtomicBool>,
    local_addr: OnceCell<SocketAddr>,
}

impl ListenerService {
    /// An unconfigured listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address actually bound once `serve` is running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }
}

impl Service for ListenerService {
    fn configure(&mut self, settings: &ServiceSettings) -> Result<(), ServiceError> {
        if settings.tls.is_some() {
            warn!(
                target: SERVICE_TARGET,
                app = LISTENER_APP,
                "TLS material configured but the placeholder listener serves plain TCP"
            );
        }
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn serve(&self) -> Result<(), ServiceError> {
        let settings = self
            .settings
            .as_ref()
            .ok_or_else(|| ServiceError::NotConfigured {
                app: LISTENER_APP.to_owned(),
            })?;
        let listener = bind(settings)?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServiceError::Io { source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ServiceError::Io { source })?;
        self.local_addr.get_or_init(|| addr);
        info!(
            target: SERVICE_TARGET,
            %addr,
            threads = settings.threads.get(),
            queue_depth = settings.queue_depth.get(),
            "listener serving"
        );

        let pool = WorkerPool::spawn(settings)?;
        self.accept_loop(&listener, &pool);
        pool.join();
        info!(target: SERVICE_TARGET, %addr, "listener stopped");
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl ListenerService {
    fn accept_loop(&self, listener: &TcpListener, pool: &WorkerPool) {
        let mut last_error = None::<io::ErrorKind>;
        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    last_error = None;
                    pool.submit(stream, peer);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(error) => {
                    if last_error != Some(error.kind()) {
                        warn!(target: SERVICE_TARGET, %error, "accept failed");
                    }
                    last_error = Some(error.kind());
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
    }
}

fn bind(settings: &ServiceSettings) -> Result<TcpListener, ServiceError> {
    let address = settings.bind.to_string();
    let resolve_error = |source| ServiceError::Resolve {
        address: address.clone(),
        source,
    };
    let addr = (settings.bind.host(), settings.bind.port())
        .to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| {
            resolve_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no addresses resolved",
            ))
        })?;
    TcpListener::bind(addr).map_err(|source| ServiceError::Bind { addr, source })
}

struct WorkerPool {
    sender: SyncSender<TcpStream>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(settings: &ServiceSettings) -> Result<Self, ServiceError> {
        let (sender, queue) = mpsc::sync_channel(settings.queue_depth.get());
        let shared_queue = Arc::new(Mutex::new(queue));
        let shared_greeting: Arc<str> = Arc::from(format!("{}\n", settings.server_name));
        let mut workers = Vec::with_capacity(settings.threads.get());
        for index in 0..settings.threads.get() {
            let receiver = Arc::clone(&shared_queue);
            let greeting = Arc::clone(&shared_greeting);
            let timeout = settings.timeout;
            let worker = thread::Builder::new()
                .name(format!("warden-worker-{index}"))
                .spawn(move || work(&receiver, &greeting, timeout))
                .map_err(|source| ServiceError::Io { source })?;
            workers.push(worker);
        }
        Ok(Self { sender, workers })
    }

    fn submit(&self, stream: TcpStream, peer: SocketAddr) {
        match self.sender.try_send(stream) {
            Ok(()) => debug!(target: SERVICE_TARGET, %peer, "connection queued"),
            Err(TrySendError::Full(_)) => {
                warn!(target: SERVICE_TARGET, %peer, "request queue full; dropping connection");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(target: SERVICE_TARGET, %peer, "worker pool gone; dropping connection");
            }
        }
    }

    fn join(self) {
        drop(self.sender);
        for worker in self.workers {
            if worker.join().is_err() {
                warn!(target: SERVICE_TARGET, "worker thread panicked");
            }
        }
    }
}

fn work(receiver: &Mutex<Receiver<TcpStream>>, greeting: &str, timeout: Duration) {
    loop {
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(stream) = next else {
            return;
        };
        if let Err(error) = greet(stream, greeting, timeout) {
            debug!(target: SERVICE_TARGET, %error, "connection closed with error");
        }
    }
}

fn greet(mut stream: TcpStream, greeting: &str, timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let limit = (!timeout.is_zero()).then_some(timeout);
    stream.set_write_timeout(limit)?;
    stream.set_read_timeout(limit)?;
    stream.write_all(greeting.as_bytes())?;
    stream.flush()
}
