// SPDX-License-Identifier: GPL-3.0-only

//! The `webcam-server` binary: binds a port, accepts viewer connections, and
//! lets each one drive a webcam through a [`ServerSession`].

use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webcam_stream::connection::{Connection, Session, SessionFactory};
use webcam_stream::errors::StreamResult;
use webcam_stream::server::Server;
use webcam_stream::server_session::{CameraOpener, ServerSession};
use webcam_stream::webcam::{CameraDevice, V4l2Camera};
use webcam_stream::Config;

#[derive(Parser, Debug)]
#[command(name = "webcam-server", about = "Streams webcam frames to connected viewers")]
struct Args {
    /// Port to listen on. Defaults to the configured port.
    port: Option<u16>,

    /// Device path opened by OPEN_WEBCAM when the client doesn't name one.
    #[arg(long)]
    device: Option<String>,

    /// Path to a config file, overriding the default `~/.config/webcam-stream/config.json`.
    #[arg(long)]
    config: Option<PathBuf>,
}

struct WebcamServerFactory {
    camera_opener: CameraOpener,
}

impl SessionFactory for WebcamServerFactory {
    fn make_session(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        _port: u16,
    ) -> StreamResult<Arc<dyn Session>> {
        let connection = Connection::new(stream, peer_addr);
        Ok(ServerSession::new(connection, self.camera_opener.clone()))
    }
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone())))
        .init();

    let port = args.port.unwrap_or(config.port);
    let default_device = args.device.unwrap_or(config.device);

    let camera_opener: CameraOpener = Arc::new(move |path: &str| {
        let path = if path.is_empty() { default_device.as_str() } else { path };
        V4l2Camera::open(path).map(|cam| Box::new(cam) as Box<dyn CameraDevice>)
    });

    let factory = Arc::new(WebcamServerFactory { camera_opener });
    let server = Server::new(factory);

    let shutdown_server = server.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received interrupt, shutting down");
        shutdown_server.stop();
    }) {
        error!(error = %e, "failed to install Ctrl-C handler");
    }

    info!(port, "starting webcam server");
    if let Err(e) = server.start(port) {
        error!(error = %e, "server exited with an error");
        std::process::exit(1);
    }
}
