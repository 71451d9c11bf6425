use common::types::CameraId;
use simple_error::SimpleError as Error;
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One encoded image ready to be sent.
#[derive(Debug)]
pub struct Frame {
    pub camera: CameraId,
    pub jpeg: Vec<u8>,
    pub timestamp_ms: i64,
}

/// Newest undelivered frame per camera for one client.
#[derive(Default)]
pub struct Mailbox {
    frames: Mutex<HashMap<CameraId, Arc<Frame>>>,
}

impl Mailbox {
    pub fn put(&self, frame: Arc<Frame>) {
        lock(&self.frames).insert(frame.camera.clone(), frame);
    }

    /// Take the pending frame of `camera`, leaving nothing behind so the next
    /// request gets `no_frame` until the capture loop delivers again.
    pub fn take(&self, camera: &CameraId) -> Option<Arc<Frame>> {
        lock(&self.frames).remove(camera)
    }
}

/// Handler-side view of a registered client.
pub struct ClientHandle {
    pub id: u64,
    pub addr: SocketAddr,
    pub mailbox: Arc<Mailbox>,
    alive: Arc<AtomicBool>,
}

impl ClientHandle {
    /// Flag the client for removal on the next prune.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

struct ClientEntry {
    addr: SocketAddr,
    stream: TcpStream,
    mailbox: Arc<Mailbox>,
    alive: Arc<AtomicBool>,
}

/// Live clients of a server. The accept loop registers, the capture loop
/// delivers and prunes.
pub struct ClientRegistry {
    clients: Mutex<HashMap<u64, ClientEntry>>,
    next_id: AtomicU64,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        ClientRegistry {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_clients,
        }
    }

    pub fn register(&self, stream: &TcpStream, addr: SocketAddr) -> Result<ClientHandle, Error> {
        let mut clients = lock(&self.clients);
        if clients.len() >= self.max_clients {
            return Err(Error::new(format!(
                "server is full ({} clients)",
                self.max_clients
            )));
        }
        let closer = stream
            .try_clone()
            .map_err(|e| Error::new(format!("Failed to clone client socket: {}", e)))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mailbox = Arc::new(Mailbox::default());
        let alive = Arc::new(AtomicBool::new(true));
        clients.insert(
            id,
            ClientEntry {
                addr,
                stream: closer,
                mailbox: mailbox.clone(),
                alive: alive.clone(),
            },
        );
        Ok(ClientHandle {
            id,
            addr,
            mailbox,
            alive,
        })
    }

    /// Hand `frame` to every live client. Returns how many clients were found
    /// dead; they stay registered until `prune`.
    pub fn deliver(&self, frame: &Arc<Frame>) -> usize {
        let clients = lock(&self.clients);
        let mut dead = 0;
        for entry in clients.values() {
            if entry.alive.load(Ordering::SeqCst) {
                entry.mailbox.put(frame.clone());
            } else {
                dead += 1;
            }
        }
        dead
    }

    /// Drop dead clients and close their sockets.
    pub fn prune(&self) -> usize {
        let mut clients = lock(&self.clients);
        let dead: Vec<u64> = clients
            .iter()
            .filter(|(_, entry)| !entry.alive.load(Ordering::SeqCst))
            .map(|(id, _)| *id)
            .collect();
        for id in dead.iter() {
            if let Some(entry) = clients.remove(id) {
                let _ = entry.stream.shutdown(Shutdown::Both);
                info!("Removed client {}", entry.addr);
            }
        }
        dead.len()
    }

    /// Forget a client whose handler never ran and close its socket.
    pub fn discard(&self, id: u64) {
        if let Some(entry) = lock(&self.clients).remove(&id) {
            entry.alive.store(false, Ordering::SeqCst);
            let _ = entry.stream.shutdown(Shutdown::Both);
            debug!("Discarded client {}", entry.addr);
        }
    }

    pub fn close_all(&self) {
        let mut clients = lock(&self.clients);
        for (_, entry) in clients.drain() {
            entry.alive.store(false, Ordering::SeqCst);
            let _ = entry.stream.shutdown(Shutdown::Both);
            debug!("Closed client {}", entry.addr);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
