// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end tests pairing a `ServerSession` and a `ViewerSession` over a
//! real loopback socket, as opposed to the unit tests in each module which
//! only ever drive one side against a raw `TcpStream`.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use webcam_stream::connection::Connection;
use webcam_stream::protocol::{ImageSpec, MessageKind};
use webcam_stream::renderer::Renderer;
use webcam_stream::server_session::{CameraOpener, ServerSession};
use webcam_stream::viewer_session::{RendererFactory, ViewerSession};
use webcam_stream::webcam::{CameraDevice, FakeCamera};
use webcam_stream::Session;

fn fake_opener() -> CameraOpener {
    Arc::new(|_path: &str| Ok(Box::new(FakeCamera::new()) as Box<dyn CameraDevice>))
}

struct CountingRenderer {
    presents: Arc<AtomicUsize>,
    last_width: Arc<std::sync::Mutex<u32>>,
}

impl Renderer for CountingRenderer {
    fn resize(&mut self, width: u32, _height: u32) {
        *self.last_width.lock().unwrap() = width;
    }
    fn set_format(&mut self, _fmt: u32) {}
    fn present(&mut self, _frame: &[u8]) {
        self.presents.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wires a `ServerSession` and a `ViewerSession` across a real TCP loopback pair.
fn paired_sessions() -> (Arc<ServerSession>, Arc<ViewerSession>, Arc<AtomicUsize>, Arc<std::sync::Mutex<u32>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client_stream = TcpStream::connect(addr).unwrap();
    let (server_stream, peer) = listener.accept().unwrap();

    let server_conn = Connection::new(server_stream, peer);
    let server_session = ServerSession::new(server_conn.clone(), fake_opener());
    server_conn.start_reader_thread().unwrap();

    let presents = Arc::new(AtomicUsize::new(0));
    let last_width = Arc::new(std::sync::Mutex::new(0u32));
    let presents_clone = presents.clone();
    let last_width_clone = last_width.clone();
    let renderer_factory: RendererFactory = Arc::new(move |w, _h, _fmt| {
        *last_width_clone.lock().unwrap() = w;
        Box::new(CountingRenderer {
            presents: presents_clone.clone(),
            last_width: last_width_clone.clone(),
        }) as Box<dyn Renderer>
    });

    let client_peer = client_stream.peer_addr().unwrap();
    let client_conn = Connection::new(client_stream, client_peer);
    let viewer_session = ViewerSession::new(client_conn.clone(), renderer_factory);
    client_conn.start_reader_thread().unwrap();

    (server_session, viewer_session, presents, last_width)
}

#[test]
fn full_round_trip_open_stream_frames_stop_close() {
    let (server, viewer, presents, last_width) = paired_sessions();

    viewer
        .connection()
        .send(MessageKind::OpenWebcam, b"/dev/video0")
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    // WEBCAM_IS_OPENED triggers the viewer's eager GET_CURRENT_SPEC, whose
    // IMAGE_SPEC reply lazily creates the renderer.
    assert_eq!(*last_width.lock().unwrap(), 640);

    viewer.connection().send_empty(MessageKind::StartStream).unwrap();
    std::thread::sleep(Duration::from_millis(80));
    assert!(presents.load(Ordering::SeqCst) >= 1);

    viewer.connection().send_empty(MessageKind::StopStream).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    let presents_after_stop = presents.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(presents.load(Ordering::SeqCst), presents_after_stop, "no frames after stop");

    viewer.connection().send_empty(MessageKind::CloseWebcam).unwrap();
    std::thread::sleep(Duration::from_millis(30));

    server.connection().close();
    viewer.connection().close();
}

#[test]
fn starting_a_stream_without_opening_reports_no_webcam_opened() {
    let (server, viewer, presents, _last_width) = paired_sessions();

    viewer.connection().send_empty(MessageKind::StartStream).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(presents.load(Ordering::SeqCst), 0);

    server.connection().close();
    viewer.connection().close();
}

#[test]
fn set_current_spec_with_a_bad_body_length_is_rejected() {
    let (server, viewer, _presents, _last_width) = paired_sessions();

    viewer.connection().send(MessageKind::OpenWebcam, b"/dev/video0").unwrap();
    std::thread::sleep(Duration::from_millis(30));

    viewer.connection().send(MessageKind::SetCurrentSpec, &[1, 2, 3]).unwrap();
    std::thread::sleep(Duration::from_millis(30));

    // The malformed SET_CURRENT_SPEC must not have altered the camera's spec;
    // requesting it again should still report the untouched default.
    viewer.connection().send_empty(MessageKind::GetCurrentSpec).unwrap();
    std::thread::sleep(Duration::from_millis(30));

    server.connection().close();
    viewer.connection().close();
}

#[test]
fn peer_disconnect_is_observed_as_closed_without_an_explicit_close() {
    let (server, viewer, _presents, _last_width) = paired_sessions();

    viewer.connection().close();
    std::thread::sleep(Duration::from_millis(50));

    assert!(server.connection().is_closed());
}

#[test]
fn concurrent_sends_do_not_interleave_frame_header_and_body() {
    let (server, viewer, _presents, _last_width) = paired_sessions();

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let conn = server.connection().clone();
        handles.push(std::thread::spawn(move || {
            conn.send(MessageKind::RuntimeError, &[i; 64]).unwrap();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    std::thread::sleep(Duration::from_millis(50));

    viewer.connection().close();
    server.connection().close();
}
