// SPDX-License-Identifier: GPL-3.0-only

//! TCP accept loop (C5), grounded on `Server::start`/`stop`/`forEachConnection`
//! from the socket layer this protocol was distilled from.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::connection::{Session, SessionFactory};
use crate::errors::{StreamError, StreamResult};

/// How many pending connections the kernel queues before `accept()`. The
/// standard library doesn't expose a knob for this; it's recorded here to
/// document the value the original enforced explicitly.
pub const INCOMING_CONNECTION_QUEUE: i32 = 5;

/// Accepts incoming TCP connections and hands each one to a [`SessionFactory`].
pub struct Server {
    factory: Arc<dyn SessionFactory>,
    sessions: Mutex<Vec<Arc<dyn Session>>>,
    stop_accepting: Arc<AtomicBool>,
}

impl Server {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            sessions: Mutex::new(Vec::new()),
            stop_accepting: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Binds `0.0.0.0:port` and accepts connections until `stop()` is called
    /// or `accept()` fails. Blocks the calling thread.
    ///
    /// The listener is polled non-blocking so `stop()` can be noticed between
    /// accepts without relying on closing a duplicated file descriptor to
    /// unstick a blocked `accept()`.
    pub fn start(&self, port: u16) -> StreamResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        info!(port, "listening for connections");

        self.stop_accepting.store(false, Ordering::SeqCst);

        while !self.stop_accepting.load(Ordering::SeqCst) {
            let (stream, peer_addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "accept() failed");
                    return Err(StreamError::from(e));
                }
            };

            info!(%peer_addr, "accepted connection");
            let session = match self.factory.make_session(stream, peer_addr, port) {
                Ok(session) => session,
                Err(e) => {
                    warn!(%peer_addr, error = %e, "failed to build a session for this connection, rejecting it");
                    continue;
                }
            };
            if let Err(e) = session.connection().start_reader_thread() {
                warn!(%peer_addr, error = %e, "failed to start the reader thread for this connection, rejecting it");
                continue;
            }
            self.sessions
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(session);
        }

        debug!("accept loop exiting");
        Ok(())
    }

    /// Stops accepting new connections and closes every active session.
    pub fn stop(&self) {
        self.stop_accepting.store(true, Ordering::SeqCst);
        self.for_each_session(|s| s.connection().close());
    }

    /// Runs `f` against every currently tracked session.
    pub fn for_each_session(&self, f: impl Fn(&Arc<dyn Session>)) {
        let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        for session in sessions.iter() {
            f(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    struct EchoFactory;

    struct EchoSession(Arc<Connection>);
    impl Session for EchoSession {
        fn connection(&self) -> &Arc<Connection> {
            &self.0
        }
    }

    impl SessionFactory for EchoFactory {
        fn make_session(
            &self,
            stream: TcpStream,
            peer_addr: SocketAddr,
            _port: u16,
        ) -> StreamResult<Arc<dyn Session>> {
            Ok(Arc::new(EchoSession(Connection::new(stream, peer_addr))))
        }
    }

    #[test]
    fn accepts_a_connection_and_tracks_it() {
        let server = Server::new(Arc::new(EchoFactory));
        let server_clone = server.clone();
        let handle = std::thread::spawn(move || server_clone.start(0));

        // start() binds immediately; give it a moment before we'd need a real
        // port. This test only exercises stop()'s shutdown path since port 0
        // can't be dialed without discovering the bound port first.
        std::thread::sleep(Duration::from_millis(50));
        server.stop();
        let _ = handle.join();
    }
}
