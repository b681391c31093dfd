// SPDX-License-Identifier: GPL-3.0-only

//! Viewer-side session logic (C8): the renderer-owning half of a connection.
//! Grounded on `WebcamClientConnection` (lazy viewer creation on the first
//! `IMAGE_SPEC`, reformat/resize on later ones, teardown on `WEBCAM_IS_CLOSED`).

use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::connection::{Connection, Session};
use crate::protocol::{ImageSpec, MessageKind};
use crate::renderer::Renderer;

/// Builds the [`Renderer`] used the first time a viewer is needed.
pub type RendererFactory = Arc<dyn Fn(u32, u32, u32) -> Box<dyn Renderer> + Send + Sync>;

/// The renderer-owning half of a client-side connection.
pub struct ViewerSession {
    connection: Arc<Connection>,
    renderer: Mutex<Option<Box<dyn Renderer>>>,
    renderer_factory: RendererFactory,
}

impl ViewerSession {
    pub fn new(connection: Arc<Connection>, renderer_factory: RendererFactory) -> Arc<Self> {
        let session = Arc::new(Self {
            connection,
            renderer: Mutex::new(None),
            renderer_factory,
        });
        session.install_handlers();
        session
    }

    fn install_handlers(self: &Arc<Self>) {
        let conn = &self.connection;

        let default_session = self.clone();
        conn.add_default_handler(Box::new(move |kind, _body| {
            warn!(kind, "received a message with no handler registered");
            let _ = default_session
                .connection
                .send(MessageKind::InvalidMsg, &kind.to_le_bytes());
        }));

        macro_rules! on {
            ($kind:expr, $method:ident) => {{
                let session = self.clone();
                conn.add_handler($kind, Box::new(move |_kind, body| session.$method(body)));
            }};
        }

        on!(MessageKind::Frame, on_frame);
        on!(MessageKind::ImageSpec, on_image_spec);
        on!(MessageKind::StreamIsStarted, on_stream_is_started);
        on!(MessageKind::StreamIsStopped, on_stream_is_stopped);
        on!(MessageKind::WebcamIsClosed, on_webcam_is_closed);
        on!(MessageKind::WebcamIsOpened, on_webcam_is_opened);
        on!(MessageKind::InvalidSpec, on_server_error);
        on!(MessageKind::NoWebcamOpened, on_server_error);
        on!(MessageKind::RuntimeError, on_server_error);
        on!(MessageKind::WebcamUnavailable, on_server_error);
        on!(MessageKind::InvalidMsg, on_server_error);
    }

    fn on_frame(&self, body: &[u8]) {
        let mut renderer = self.renderer.lock().unwrap_or_else(|p| p.into_inner());
        match renderer.as_mut() {
            Some(r) => r.present(body),
            None => info!("dropping frame because the viewer isn't initialized"),
        }
    }

    fn on_image_spec(&self, body: &[u8]) {
        let spec = match ImageSpec::from_bytes(body) {
            Ok(spec) => spec,
            Err(e) => {
                error!(error = %e, "unexpected IMAGE_SPEC body from server");
                return;
            }
        };

        info!(width = spec.width, height = spec.height, fmt = format!("0x{:08x}", spec.fmt), "image format set");

        let mut renderer = self.renderer.lock().unwrap_or_else(|p| p.into_inner());
        match renderer.as_mut() {
            None => *renderer = Some((self.renderer_factory)(spec.width, spec.height, spec.fmt)),
            Some(r) => {
                r.set_format(spec.fmt);
                r.resize(spec.width, spec.height);
            }
        }
    }

    fn on_stream_is_started(&self, _body: &[u8]) {
        info!("server has started streaming");
    }

    fn on_stream_is_stopped(&self, _body: &[u8]) {
        info!("server has stopped streaming");
    }

    fn on_webcam_is_closed(&self, _body: &[u8]) {
        info!("server has closed the webcam");
        *self.renderer.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn on_webcam_is_opened(&self, _body: &[u8]) {
        // The viewer can't be created yet — the format and dimensions aren't
        // known until the server answers GET_CURRENT_SPEC.
        if let Err(e) = self.connection.send_empty(MessageKind::GetCurrentSpec) {
            warn!(error = %e, "failed to request the current spec");
        }
    }

    fn on_server_error(&self, body: &[u8]) {
        error!(message = %String::from_utf8_lossy(body), "server reported an error");
    }
}

impl Session for ViewerSession {
    fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}
