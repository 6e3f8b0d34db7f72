/*!
 * Socket Listener
 * UNIX-domain socket accept loop and the ingress worker pool
 *
 * Workers deserialize frames, run the synchronous validation path, and
 * write the reply. Peer identity comes from SO_PEERCRED, never from the
 * client's own claims.
 */

use log::{debug, info, warn};
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::ingress::{process_request, IngressShared, PeerIdentity};
use crate::core::errors::{Result, TuneError};
use crate::core::wire::{read_frame, write_frame, ClientRequest, ClientResponse};

struct ConnQueue {
    state: Mutex<(VecDeque<UnixStream>, bool)>,
    cond: Condvar,
}

impl ConnQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new((VecDeque::new(), false)),
            cond: Condvar::new(),
        }
    }

    fn push(&self, stream: UnixStream) {
        let mut state = self.state.lock();
        if state.1 {
            return;
        }
        state.0.push_back(stream);
        drop(state);
        self.cond.notify_one();
    }

    fn pop(&self) -> Option<UnixStream> {
        let mut state = self.state.lock();
        loop {
            if let Some(stream) = state.0.pop_front() {
                return Some(stream);
            }
            if state.1 {
                return None;
            }
            self.cond.wait(&mut state);
        }
    }

    fn close(&self) {
        self.state.lock().1 = true;
        self.cond.notify_all();
    }
}

/// The socket front end: one accept thread plus a fixed worker pool
pub struct Listener {
    socket_path: PathBuf,
    conns: Arc<ConnQueue>,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Listener {
    pub fn start(
        socket_path: impl AsRef<Path>,
        shared: Arc<IngressShared>,
        workers: usize,
    ) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        // A previous unclean exit leaves the socket file behind
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| TuneError::IoFailed(format!("bind {}: {}", socket_path.display(), e)))?;
        info!("listening on {}", socket_path.display());

        let conns = Arc::new(ConnQueue::new());
        let running = Arc::new(AtomicBool::new(true));

        let accept_conns = Arc::clone(&conns);
        let accept_running = Arc::clone(&running);
        let accept_thread = thread::Builder::new()
            .name("restune-accept".into())
            .spawn(move || {
                for stream in listener.incoming() {
                    if !accept_running.load(Ordering::SeqCst) {
                        break;
                    }
                    match stream {
                        Ok(stream) => accept_conns.push(stream),
                        Err(e) => {
                            debug!("accept interrupted: {}", e);
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn accept thread");

        let workers = (0..workers.max(1))
            .map(|i| {
                let conns = Arc::clone(&conns);
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("restune-ingress-{}", i))
                    .spawn(move || {
                        while let Some(stream) = conns.pop() {
                            handle_connection(&shared, stream);
                        }
                    })
                    .expect("failed to spawn ingress worker")
            })
            .collect();

        Ok(Self {
            socket_path,
            conns,
            running,
            accept_thread: Some(accept_thread),
            workers,
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.conns.close();
        // Unblock the accept loop with a throwaway connection
        let _ = UnixStream::connect(&self.socket_path);
        let _ = std::fs::remove_file(&self.socket_path);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("listener stopped");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn peer_identity(stream: &UnixStream) -> Result<PeerIdentity> {
    let creds = getsockopt(stream, PeerCredentials)
        .map_err(|e| TuneError::Internal(format!("SO_PEERCRED: {}", e)))?;
    Ok(PeerIdentity {
        pid: creds.pid() as u32,
        uid: creds.uid(),
    })
}

fn handle_connection(shared: &IngressShared, mut stream: UnixStream) {
    let peer = match peer_identity(&stream) {
        Ok(peer) => peer,
        Err(e) => {
            warn!("dropping connection without credentials: {}", e);
            return;
        }
    };
    debug!("connection from pid {} (uid {})", peer.pid, peer.uid);

    loop {
        let request: Option<ClientRequest> = match read_frame(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                // Malformed frame: answer with the error, then keep the
                // connection only if the stream is still framed; a decode
                // error mid-frame is unrecoverable, so bail.
                let _ = write_frame(&mut stream, &ClientResponse::failure(&e));
                return;
            }
        };
        let Some(request) = request else {
            debug!("pid {} disconnected", peer.pid);
            return;
        };
        let response = process_request(shared, peer, request);
        if let Err(e) = write_frame(&mut stream, &response) {
            warn!("reply to pid {} failed: {}", peer.pid, e);
            return;
        }
    }
}
