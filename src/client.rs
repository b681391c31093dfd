// SPDX-License-Identifier: GPL-3.0-only

//! Dialer (C6), grounded on `Client::connect` from the socket layer this
//! protocol was distilled from.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;

use tracing::info;

use crate::connection::{Session, SessionFactory};
use crate::errors::StreamResult;

/// Connects to `address:port` and hands the resulting socket to `factory`.
///
/// `address` must be an IPv4 dotted-quad, matching the `inet_pton(AF_INET, ...)`
/// pre-check of the socket layer this dialer is grounded on; a malformed
/// address is rejected before any socket is opened.
pub fn connect(
    address: &str,
    port: u16,
    factory: &dyn SessionFactory,
) -> StreamResult<Arc<dyn Session>> {
    let ip: Ipv4Addr = address.parse()?;

    let stream = TcpStream::connect((ip, port))?;
    let peer_addr: SocketAddr = stream.peer_addr()?;
    info!(%peer_addr, "connected to server");

    let session = factory.make_session(stream, peer_addr, port)?;
    session.connection().start_reader_thread()?;
    Ok(session)
}
