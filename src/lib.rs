// SPDX-License-Identifier: GPL-3.0-only

//! webcam-stream - a TCP server and client for streaming webcam frames over a
//! small binary protocol.
//!
//! # Architecture
//!
//! - [`protocol`]: the closed message-kind catalog and the `ImageSpec` body.
//! - [`codec`]: reading and writing length-prefixed frames.
//! - [`scoped_lock`]: an RAII mutex guard with early release.
//! - [`errors`]: the error taxonomy shared across the crate.
//! - [`handlers`]: the per-connection message dispatch table.
//! - [`connection`]: the per-peer socket, reader thread, and `Session` traits.
//! - [`server`]: the TCP accept loop.
//! - [`client`]: the TCP dialer.
//! - [`webcam`]: the camera device abstraction, real and fake.
//! - [`renderer`]: the frame presentation sink.
//! - [`server_session`]: the webcam-owning half of a connection.
//! - [`viewer_session`]: the renderer-owning half of a connection.
//! - [`config`]: user configuration handling.

pub mod codec;
pub mod config;
pub mod connection;
pub mod errors;
pub mod handlers;
pub mod protocol;
pub mod renderer;
pub mod scoped_lock;
pub mod server_session;
pub mod viewer_session;
pub mod webcam;

pub mod client;
pub mod server;

pub use config::Config;
pub use connection::{Connection, Session, SessionFactory};
pub use errors::{StreamError, StreamResult};
pub use protocol::{ImageSpec, MessageKind};
pub use renderer::{LoggingRenderer, Renderer};
pub use server::Server;
pub use server_session::ServerSession;
pub use viewer_session::ViewerSession;
pub use webcam::{CameraDevice, FakeCamera, V4l2Camera};
