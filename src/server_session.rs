// SPDX-License-Identifier: GPL-3.0-only

//! Server-side session logic (C7): the webcam-owning half of a connection.
//! Grounded on `WebcamServerConnection` (handler bodies, `startStream`/
//! `stopStream`, the streamer thread loop).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{error, info, warn};

use crate::connection::{Connection, Session};
use crate::errors::StreamError;
use crate::protocol::{ImageSpec, MessageKind};
use crate::scoped_lock::ScopedLock;
use crate::webcam::CameraDevice;

/// Opens a camera device by name. `V4l2Camera::open` for real hardware, or a
/// closure handing back a [`crate::webcam::FakeCamera`] in tests.
pub type CameraOpener = Arc<dyn Fn(&str) -> Result<Box<dyn CameraDevice>, StreamError> + Send + Sync>;

/// The webcam-owning half of a server-side connection.
pub struct ServerSession {
    connection: Arc<Connection>,
    webcam: Arc<Mutex<Option<Box<dyn CameraDevice>>>>,
    camera_opener: CameraOpener,
    stream_active: Arc<AtomicBool>,
    streamer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ServerSession {
    pub fn new(connection: Arc<Connection>, camera_opener: CameraOpener) -> Arc<Self> {
        let session = Arc::new(Self {
            connection,
            webcam: Arc::new(Mutex::new(None)),
            camera_opener,
            stream_active: Arc::new(AtomicBool::new(false)),
            streamer_thread: Mutex::new(None),
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
                conn.add_handler(
                    $kind,
                    Box::new(move |_kind, body| session.$method(body)),
                );
            }};
        }

        on!(MessageKind::TerminatingConnection, on_terminating_connection);
        on!(MessageKind::GetWebcamStatus, on_get_webcam_status);
        on!(MessageKind::GetWebcamList, on_get_webcam_list);
        on!(MessageKind::OpenWebcam, on_open_webcam);
        on!(MessageKind::CloseWebcam, on_close_webcam);
        on!(MessageKind::GetStreamStatus, on_get_stream_status);
        on!(MessageKind::GetCurrentSpec, on_get_current_spec);
        on!(MessageKind::GetSupportedSpecs, on_get_supported_specs);
        on!(MessageKind::SetCurrentSpec, on_set_current_spec);
        on!(MessageKind::StartStream, on_start_stream);
        on!(MessageKind::StopStream, on_stop_stream);
    }

    fn on_terminating_connection(&self, _body: &[u8]) {
        info!(peer = %self.connection.peer_addr(), "peer is terminating the connection");
        self.connection.close();
    }

    fn on_get_webcam_status(&self, _body: &[u8]) {
        let mut lock = ScopedLock::new(&self.webcam);
        let reply = match lock.acquire().as_ref() {
            Some(cam) => self.connection.send(MessageKind::WebcamIsOpened, cam.name().as_bytes()),
            None => self.connection.send_empty(MessageKind::WebcamIsClosed),
        };
        lock.release();
        log_send_error(reply);
    }

    fn on_get_webcam_list(&self, _body: &[u8]) {
        let msg = b"get_webcam_list is currently unimplemented.";
        log_send_error(self.connection.send(MessageKind::RuntimeError, msg));
    }

    fn on_open_webcam(&self, body: &[u8]) {
        let path = String::from_utf8_lossy(body).into_owned();

        let new_camera = match (self.camera_opener)(&path) {
            Ok(cam) => cam,
            Err(e) => {
                error!(path, error = %e, "unable to open webcam for client");
                log_send_error(self.connection.send(MessageKind::WebcamUnavailable, body));
                return;
            }
        };

        let had_previous = {
            let lock = self.webcam.lock().unwrap_or_else(|p| p.into_inner());
            lock.is_some()
        };
        if had_previous {
            self.on_close_webcam(&[]);
        }

        let mut lock = ScopedLock::new(&self.webcam);
        *lock.acquire() = Some(new_camera);
        let name = lock.acquire().as_ref().unwrap().name().to_string();
        lock.release();

        log_send_error(self.connection.send(MessageKind::WebcamIsOpened, name.as_bytes()));
    }

    fn on_close_webcam(&self, _body: &[u8]) {
        if self.stream_active.load(Ordering::SeqCst) {
            self.stop_stream();
            log_send_error(self.connection.send_empty(MessageKind::StreamIsStopped));
        }

        let mut lock = self.webcam.lock().unwrap_or_else(|p| p.into_inner());
        *lock = None;
        drop(lock);

        log_send_error(self.connection.send_empty(MessageKind::WebcamIsClosed));
    }

    fn on_get_stream_status(&self, _body: &[u8]) {
        let kind = if self.stream_active.load(Ordering::SeqCst) {
            MessageKind::StreamIsStarted
        } else {
            MessageKind::StreamIsStopped
        };
        log_send_error(self.connection.send_empty(kind));
    }

    fn on_get_current_spec(&self, _body: &[u8]) {
        let mut lock = ScopedLock::new(&self.webcam);
        let result = match lock.acquire().as_ref() {
            None => {
                lock.release();
                Err(None)
            }
            Some(cam) => {
                let spec = cam.current_spec();
                lock.release();
                spec.map_err(Some)
            }
        };

        match result {
            Ok(spec) => log_send_error(self.connection.send(MessageKind::ImageSpec, &spec.to_bytes())),
            Err(None) => log_send_error(self.connection.send_empty(MessageKind::NoWebcamOpened)),
            Err(Some(e)) => {
                error!(error = %e, "failed to read current spec");
                log_send_error(self.connection.send(MessageKind::RuntimeError, e.to_string().as_bytes()));
            }
        }
    }

    fn on_get_supported_specs(&self, _body: &[u8]) {
        let mut lock = ScopedLock::new(&self.webcam);
        let result: Result<Vec<ImageSpec>, Option<StreamError>> = match lock.acquire().as_ref() {
            None => {
                lock.release();
                Err(None)
            }
            Some(cam) => {
                let outcome = (|| {
                    let mut specs = Vec::new();
                    for fmt in cam.list_formats()? {
                        for (width, height) in cam.list_resolutions(fmt)? {
                            specs.push(ImageSpec::new(width, height, fmt));
                        }
                    }
                    Ok(specs)
                })();
                lock.release();
                outcome.map_err(Some)
            }
        };

        match result {
            Ok(specs) => {
                let body = ImageSpec::encode_many(&specs);
                log_send_error(self.connection.send(MessageKind::SupportedSpecs, &body));
            }
            Err(None) => log_send_error(self.connection.send_empty(MessageKind::NoWebcamOpened)),
            Err(Some(e)) => {
                error!(error = %e, "failed to enumerate supported specs");
                log_send_error(self.connection.send(MessageKind::RuntimeError, e.to_string().as_bytes()));
            }
        }
    }

    fn on_set_current_spec(&self, body: &[u8]) {
        let spec = match ImageSpec::from_bytes(body) {
            Ok(spec) => spec,
            Err(_) => {
                log_send_error(self.connection.send_empty(MessageKind::InvalidSpec));
                return;
            }
        };

        let mut lock = ScopedLock::new(&self.webcam);
        let outcome = match lock.acquire().as_mut() {
            None => {
                lock.release();
                Err(None)
            }
            Some(cam) => {
                let result = cam.set_current_spec(spec);
                lock.release();
                result.map_err(Some)
            }
        };

        match outcome {
            Ok(()) => self.on_get_current_spec(&[]),
            Err(None) => log_send_error(self.connection.send_empty(MessageKind::NoWebcamOpened)),
            Err(Some(e)) => {
                error!(error = %e, "failed to set current spec");
                log_send_error(self.connection.send(MessageKind::RuntimeError, e.to_string().as_bytes()));
            }
        }
    }

    fn on_start_stream(&self, _body: &[u8]) {
        self.start_stream();
    }

    fn start_stream(&self) {
        let has_webcam = self.webcam.lock().unwrap_or_else(|p| p.into_inner()).is_some();
        if !has_webcam {
            error!("unable to start stream: no webcam is open");
            log_send_error(
                self.connection
                    .send(MessageKind::NoWebcamOpened, b"Unable to start stream: No webcam is open."),
            );
            return;
        }

        if self.stream_active.swap(true, Ordering::SeqCst) {
            info!("client tried to start a stream when it's already started");
            log_send_error(self.connection.send_empty(MessageKind::StreamIsStarted));
            return;
        }

        info!("starting stream");
        let connection = self.connection.clone();
        let stream_active = self.stream_active.clone();
        let webcam = self.webcam.clone();

        let handle = std::thread::spawn(move || {
            {
                let mut lock = ScopedLock::new(&webcam);
                if let Some(cam) = lock.acquire().as_mut() {
                    if let Err(e) = cam.start_capture() {
                        error!(error = %e, "failed to start capture");
                        stream_active.store(false, Ordering::SeqCst);
                        return;
                    }
                }
                lock.release();
            }

            while stream_active.load(Ordering::SeqCst) {
                let frame = {
                    let mut lock = ScopedLock::new(&webcam);
                    let result = lock.acquire().as_mut().map(|cam| cam.next_frame());
                    lock.release();
                    result
                };

                match frame {
                    Some(Ok(bytes)) => {
                        if let Err(e) = connection.send(MessageKind::Frame, &bytes) {
                            warn!(error = %e, "failed to send frame, stopping stream");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "failed to capture frame, stopping stream");
                        break;
                    }
                    None => break,
                }
            }

            stream_active.store(false, Ordering::SeqCst);
            let mut lock = ScopedLock::new(&webcam);
            if let Some(cam) = lock.acquire().as_mut() {
                if let Err(e) = cam.stop_capture() {
                    error!(error = %e, "failed to stop capture");
                }
            }
            lock.release();
        });

        *self.streamer_thread.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        log_send_error(self.connection.send_empty(MessageKind::StreamIsStarted));
    }

    fn on_stop_stream(&self, _body: &[u8]) {
        self.stop_stream();
        log_send_error(self.connection.send_empty(MessageKind::StreamIsStopped));
    }

    fn stop_stream(&self) {
        if self.stream_active.swap(false, Ordering::SeqCst) {
            info!("stopping stream");
            let handle = self
                .streamer_thread
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        } else {
            info!("stream is already stopped");
        }
    }
}

impl Session for ServerSession {
    fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

fn log_send_error(result: Result<(), StreamError>) {
    if let Err(e) = result {
        warn!(error = %e, "failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webcam::FakeCamera;
    use std::net::TcpStream;
    use std::time::Duration;

    fn fake_opener() -> CameraOpener {
        Arc::new(|_path: &str| Ok(Box::new(FakeCamera::new()) as Box<dyn CameraDevice>))
    }

    fn loopback() -> (Arc<ServerSession>, TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_stream, peer) = listener.accept().unwrap();
        let conn = Connection::new(server_stream, peer);
        let session = ServerSession::new(conn.clone(), fake_opener());
        conn.start_reader_thread().unwrap();
        (session, client)
    }

    fn recv_frame(client: &mut TcpStream) -> crate::codec::Frame {
        crate::codec::read_frame(client).unwrap()
    }

    #[test]
    fn get_webcam_status_reports_closed_before_any_open() {
        let (session, mut client) = loopback();
        crate::codec::write_frame(&mut client, MessageKind::GetWebcamStatus.as_u32(), &[]).unwrap();
        let reply = recv_frame(&mut client);
        assert_eq!(reply.kind, MessageKind::WebcamIsClosed.as_u32());
        session.connection().close();
    }

    #[test]
    fn open_webcam_replies_with_webcam_is_opened() {
        let (session, mut client) = loopback();
        crate::codec::write_frame(&mut client, MessageKind::OpenWebcam.as_u32(), b"/dev/video0").unwrap();
        let reply = recv_frame(&mut client);
        assert_eq!(reply.kind, MessageKind::WebcamIsOpened.as_u32());
        assert_eq!(reply.body, b"/dev/video0");
        session.connection().close();
    }

    #[test]
    fn start_stream_without_a_webcam_reports_no_webcam_opened() {
        let (session, mut client) = loopback();
        crate::codec::write_frame(&mut client, MessageKind::StartStream.as_u32(), &[]).unwrap();
        let reply = recv_frame(&mut client);
        assert_eq!(reply.kind, MessageKind::NoWebcamOpened.as_u32());
        session.connection().close();
    }

    #[test]
    fn full_open_spec_stream_stop_close_sequence() {
        let (session, mut client) = loopback();

        crate::codec::write_frame(&mut client, MessageKind::OpenWebcam.as_u32(), b"/dev/video0").unwrap();
        assert_eq!(recv_frame(&mut client).kind, MessageKind::WebcamIsOpened.as_u32());

        crate::codec::write_frame(&mut client, MessageKind::GetCurrentSpec.as_u32(), &[]).unwrap();
        let spec_reply = recv_frame(&mut client);
        assert_eq!(spec_reply.kind, MessageKind::ImageSpec.as_u32());
        assert_eq!(ImageSpec::from_bytes(&spec_reply.body).unwrap(), ImageSpec::new(640, 480, 0x5659_5559));

        crate::codec::write_frame(&mut client, MessageKind::StartStream.as_u32(), &[]).unwrap();
        assert_eq!(recv_frame(&mut client).kind, MessageKind::StreamIsStarted.as_u32());

        let frame = recv_frame(&mut client);
        assert_eq!(frame.kind, MessageKind::Frame.as_u32());
        assert_eq!(frame.body.len(), 640 * 480 * 2);

        crate::codec::write_frame(&mut client, MessageKind::StopStream.as_u32(), &[]).unwrap();
        let reply = recv_frame(&mut client);
        assert_eq!(reply.kind, MessageKind::StreamIsStopped.as_u32());

        crate::codec::write_frame(&mut client, MessageKind::CloseWebcam.as_u32(), &[]).unwrap();
        assert_eq!(recv_frame(&mut client).kind, MessageKind::WebcamIsClosed.as_u32());

        session.connection().close();
    }

    #[test]
    fn unknown_kind_triggers_invalid_msg() {
        let (session, mut client) = loopback();
        crate::codec::write_frame(&mut client, 0xDEAD_BEEF, &[]).unwrap();
        let reply = recv_frame(&mut client);
        assert_eq!(reply.kind, MessageKind::InvalidMsg.as_u32());
        assert_eq!(u32::from_le_bytes(reply.body.try_into().unwrap()), 0xDEAD_BEEF);
        session.connection().close();
    }

    #[test]
    fn reopening_implicitly_stops_the_stream_and_closes_the_old_camera() {
        let (session, mut client) = loopback();

        crate::codec::write_frame(&mut client, MessageKind::OpenWebcam.as_u32(), b"/dev/video0").unwrap();
        assert_eq!(recv_frame(&mut client).kind, MessageKind::WebcamIsOpened.as_u32());

        crate::codec::write_frame(&mut client, MessageKind::StartStream.as_u32(), &[]).unwrap();
        assert_eq!(recv_frame(&mut client).kind, MessageKind::StreamIsStarted.as_u32());
        let _ = recv_frame(&mut client); // at least one FRAME arrives before the reopen

        crate::codec::write_frame(&mut client, MessageKind::OpenWebcam.as_u32(), b"/dev/video1").unwrap();
        // Implicit close first sends STREAM_IS_STOPPED then WEBCAM_IS_CLOSED,
        // then the reopen itself sends WEBCAM_IS_OPENED.
        let stopped = recv_frame(&mut client);
        assert_eq!(stopped.kind, MessageKind::StreamIsStopped.as_u32());
        let closed = recv_frame(&mut client);
        assert_eq!(closed.kind, MessageKind::WebcamIsClosed.as_u32());
        let opened = recv_frame(&mut client);
        assert_eq!(opened.kind, MessageKind::WebcamIsOpened.as_u32());
        assert_eq!(opened.body, b"/dev/video1");

        session.connection().close();
        std::thread::sleep(Duration::from_millis(20));
    }
}
