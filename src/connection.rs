// SPDX-License-Identifier: GPL-3.0-only

//! Per-peer connection (C4): owns the socket, a reader thread, and the
//! handler registry it dispatches into. Grounded on `Connection` from the
//! socket layer this protocol was distilled from — a reader thread per peer,
//! a writer mutex serializing sends, and `shutdown()` to unstick a blocked read.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, trace, warn};

use crate::codec::{read_frame, write_frame};
use crate::errors::{StreamError, StreamResult};
use crate::handlers::{Handler, HandlerRegistry, HandlerToken};
use crate::protocol::MessageKind;

/// One-way lifecycle: Open -> Closing -> Closed, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// A single TCP peer: the socket, a reader thread dispatching into a
/// [`HandlerRegistry`], and a mutex serializing writes.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Mutex<HandlerRegistry>,
    writer_lock: Mutex<()>,
    stop_reading: Arc<AtomicBool>,
    state: Mutex<ConnectionState>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Arc<Self> {
        let _ = stream.set_nodelay(true);
        Arc::new(Self {
            stream,
            peer_addr,
            registry: Mutex::new(HandlerRegistry::new()),
            writer_lock: Mutex::new(()),
            stop_reading: Arc::new(AtomicBool::new(true)),
            state: Mutex::new(ConnectionState::Open),
            reader_thread: Mutex::new(None),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn add_handler(&self, kind: MessageKind, handler: Handler) -> HandlerToken {
        self.lock_registry().add(kind, handler)
    }

    pub fn add_default_handler(&self, handler: Handler) -> HandlerToken {
        self.lock_registry().add_default(handler)
    }

    pub fn remove_handler(&self, kind: MessageKind, token: HandlerToken) {
        self.lock_registry().remove(kind, token);
    }

    pub fn remove_default_handler(&self, token: HandlerToken) {
        self.lock_registry().remove_default(token);
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, HandlerRegistry> {
        self.registry.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Starts the reader thread. Intended to be called exactly once, after
    /// handlers have been registered.
    pub fn start_reader_thread(self: &Arc<Self>) -> StreamResult<()> {
        let mut reader = self.stream.try_clone()?;
        self.stop_reading.store(false, Ordering::SeqCst);

        let conn = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            trace!(peer = %conn.peer_addr, "reader thread starting");
            while !conn.stop_reading.load(Ordering::SeqCst) {
                match read_frame(&mut reader) {
                    Ok(frame) => conn.lock_registry().dispatch(frame.kind, &frame.body),
                    Err(e) if e.is_peer_closed() => {
                        debug!(peer = %conn.peer_addr, "peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %conn.peer_addr, error = %e, "reader thread terminating on error");
                        break;
                    }
                }
            }
            conn.mark_closed();
        });

        *self
            .reader_thread
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    fn mark_closed(&self) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = ConnectionState::Closed;
    }

    /// Sends a complete frame. Serialized against other senders by `writer_lock`.
    pub fn send(&self, kind: MessageKind, body: &[u8]) -> StreamResult<()> {
        if self.is_closed() {
            return Err(StreamError::State(
                "cannot send on a closed connection".to_string(),
            ));
        }
        let _guard = self.writer_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut stream = &self.stream;
        write_frame(&mut stream, kind.as_u32(), body)
    }

    pub fn send_empty(&self, kind: MessageKind) -> StreamResult<()> {
        self.send(kind, &[])
    }

    /// Stops the reader loop, shuts down both directions of the socket, joins
    /// the reader thread, and moves the connection to `Closed`. Calling this
    /// more than once is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closing;
        }

        self.stop_reading.store(true, Ordering::SeqCst);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!(peer = %self.peer_addr, error = %e, "shutdown() on an already-shut-down socket");
        }

        self.mark_closed();
        self.join_reader_thread();
    }

    /// Blocks until the reader thread has exited. A no-op if called from
    /// inside the reader thread itself (e.g. a handler closing its own
    /// connection), since joining oneself would deadlock.
    fn join_reader_thread(&self) {
        let mut guard = self.reader_thread.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = guard.as_ref() {
            if handle.thread().id() == std::thread::current().id() {
                trace!(peer = %self.peer_addr, "skipping self-join of the reader thread");
                return;
            }
        }
        if let Some(handle) = guard.take() {
            drop(guard);
            let _ = handle.join();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// The logical pairing of a Connection with its side-specific state: a
/// server session owns a camera and a streamer thread, a viewer session owns
/// a renderer. Both expose the underlying Connection for sending and handler
/// registration.
pub trait Session: Send + Sync {
    fn connection(&self) -> &Arc<Connection>;
}

/// Constructs a [`Session`] for a freshly accepted or dialed socket.
///
/// Stands in for the subclass-overridable `newConnection` hook of the socket
/// layer this protocol was distilled from: a server and a client each supply
/// their own factory instead of subclassing `Connection`.
pub trait SessionFactory: Send + Sync {
    fn make_session(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        port: u16,
    ) -> StreamResult<Arc<dyn Session>>;
}
