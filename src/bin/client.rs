// SPDX-License-Identifier: GPL-3.0-only

//! The `webcam-client` binary: dials a server and renders whatever it streams
//! back through a [`ViewerSession`].

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webcam_stream::client;
use webcam_stream::connection::{Connection, Session, SessionFactory};
use webcam_stream::errors::StreamResult;
use webcam_stream::protocol::MessageKind;
use webcam_stream::renderer::{LoggingRenderer, Renderer};
use webcam_stream::viewer_session::{RendererFactory, ViewerSession};
use webcam_stream::Config;

#[derive(Parser, Debug)]
#[command(name = "webcam-client", about = "Connects to a webcam-stream server and displays its frames")]
struct Args {
    /// IPv4 address of the server to connect to.
    address: String,

    /// Port to connect to. Defaults to the configured port.
    port: Option<u16>,

    /// If given, immediately asks the server to open this device path.
    #[arg(long)]
    open: Option<String>,
}

struct ViewerClientFactory {
    renderer_factory: RendererFactory,
}

impl SessionFactory for ViewerClientFactory {
    fn make_session(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        _port: u16,
    ) -> StreamResult<Arc<dyn Session>> {
        let connection = Connection::new(stream, peer_addr);
        Ok(ViewerSession::new(connection, self.renderer_factory.clone()))
    }
}

fn main() {
    let args = Args::parse();
    let config = Config::load_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone())))
        .init();

    let port = args.port.unwrap_or(config.port);

    let renderer_factory: RendererFactory =
        Arc::new(|w, h, fmt| Box::new(LoggingRenderer::new(w, h, fmt)) as Box<dyn Renderer>);
    let factory = ViewerClientFactory { renderer_factory };

    let session = match client::connect(&args.address, port, &factory) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "failed to connect");
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.open {
        if let Err(e) = session.connection().send(MessageKind::OpenWebcam, path.as_bytes()) {
            error!(error = %e, "failed to send OPEN_WEBCAM");
        }
    }

    let shutdown_connection = session.connection().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received interrupt, closing connection");
        let _ = shutdown_connection.send_empty(MessageKind::TerminatingConnection);
        shutdown_connection.close();
    }) {
        error!(error = %e, "failed to install Ctrl-C handler");
    }

    while !session.connection().is_closed() {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    info!("connection closed, exiting");
}
