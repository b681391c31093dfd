// SPDX-License-Identifier: GPL-3.0-only

//! Camera device backend (C10): a real V4L2 backend plus a deterministic fake
//! for tests. Grounded on the raw-ioctl `Webcam` class this protocol was
//! distilled from (`getSupportedFormats`, `getImageFormat`/`setImageFormat`,
//! `getSupportedResolutions`, `startCapture`/`stopCapture`, `getFrame`).

use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::errors::{StreamError, StreamResult};
use crate::protocol::ImageSpec;

/// The YUYV fourcc as a packed `u32`, matching `ImageSpec::fmt`'s wire encoding.
pub const FOURCC_YUYV: u32 = 0x5659_5559;
/// The UYVY fourcc as a packed `u32`.
pub const FOURCC_UYVY: u32 = 0x5659_5955;

fn fourcc_to_u32(fourcc: &FourCC) -> u32 {
    u32::from_le_bytes(fourcc.repr)
}

fn u32_to_fourcc(fmt: u32) -> FourCC {
    FourCC::new(&fmt.to_le_bytes())
}

/// Bytes per pixel for the fixed-point formats this crate exercises.
pub fn bytes_per_pixel(fmt: u32) -> u32 {
    match fmt {
        FOURCC_YUYV | FOURCC_UYVY => 2,
        _ => 2,
    }
}

/// A camera this crate can open, configure, and pull frames from.
///
/// Object-safe so a session can hold `Box<dyn CameraDevice>` regardless of
/// whether it's backed by real hardware or [`FakeCamera`].
pub trait CameraDevice: Send {
    fn name(&self) -> &str;
    fn list_formats(&self) -> StreamResult<Vec<u32>>;
    fn list_resolutions(&self, fmt: u32) -> StreamResult<Vec<(u32, u32)>>;
    fn current_spec(&self) -> StreamResult<ImageSpec>;
    fn set_current_spec(&mut self, spec: ImageSpec) -> StreamResult<()>;
    fn start_capture(&mut self) -> StreamResult<()>;
    fn stop_capture(&mut self) -> StreamResult<()>;
    fn next_frame(&mut self) -> StreamResult<Vec<u8>>;
}

/// A real V4L2 camera, opened at a `/dev/videoX`-style path.
///
/// Wraps the `v4l` crate's `Device`/`Stream` the same way the original wraps
/// raw `VIDIOC_*` ioctls: `set_format` is `VIDIOC_S_FMT`, `Stream::with_buffers`
/// is `VIDIOC_REQBUFS` + `VIDIOC_STREAMON`, and `stream.next()` is the
/// dequeue/copy/re-enqueue cycle `getFrame()` performs by hand.
pub struct V4l2Camera {
    // SAFETY: `stream` borrows `*device` for as long as this struct is alive.
    // `device` is heap-boxed so its address is stable across moves of
    // `V4l2Camera` itself, and `stream` is declared first so it drops (and
    // releases its borrow) before `device` does — fields drop in declaration
    // order, so this ordering is load-bearing, not cosmetic.
    stream: Option<Stream<'static>>,
    device: Box<Device>,
    path: String,
}

impl V4l2Camera {
    pub fn open(path: &str) -> StreamResult<Self> {
        let device = Device::with_path(path)
            .map_err(|e| StreamError::Upstream(format!("failed to open {}: {}", path, e)))?;
        Ok(Self {
            stream: None,
            device: Box::new(device),
            path: path.to_string(),
        })
    }

    fn device_ref(&self) -> &'static Device {
        // SAFETY: see the field comment on `stream`.
        unsafe { &*(self.device.as_ref() as *const Device) }
    }
}

impl CameraDevice for V4l2Camera {
    fn name(&self) -> &str {
        &self.path
    }

    fn list_formats(&self) -> StreamResult<Vec<u32>> {
        let descriptions = self
            .device
            .enum_formats()
            .map_err(|e| StreamError::Upstream(format!("enum_formats failed: {}", e)))?;
        Ok(descriptions.iter().map(|d| fourcc_to_u32(&d.fourcc)).collect())
    }

    fn list_resolutions(&self, fmt: u32) -> StreamResult<Vec<(u32, u32)>> {
        let sizes = self
            .device
            .enum_framesizes(u32_to_fourcc(fmt))
            .map_err(|e| StreamError::Upstream(format!("enum_framesizes failed: {}", e)))?;

        let mut resolutions = Vec::new();
        for size in sizes {
            for discrete in size.size.to_discrete() {
                resolutions.push((discrete.width, discrete.height));
            }
        }
        Ok(resolutions)
    }

    fn current_spec(&self) -> StreamResult<ImageSpec> {
        let format = self
            .device
            .format()
            .map_err(|e| StreamError::Upstream(format!("VIDIOC_G_FMT failed: {}", e)))?;
        Ok(ImageSpec::new(format.width, format.height, fourcc_to_u32(&format.fourcc)))
    }

    fn set_current_spec(&mut self, spec: ImageSpec) -> StreamResult<()> {
        if self.stream.is_some() {
            return Err(StreamError::State(
                "cannot change format while capturing".to_string(),
            ));
        }
        let requested = Format::new(spec.width, spec.height, u32_to_fourcc(spec.fmt));
        self.device
            .set_format(&requested)
            .map(|_| ())
            .map_err(|e| StreamError::Upstream(format!("VIDIOC_S_FMT failed: {}", e)))
    }

    fn start_capture(&mut self) -> StreamResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = Stream::with_buffers(self.device_ref(), Type::VideoCapture, 4)
            .map_err(|e| StreamError::Upstream(format!("failed to start capture: {}", e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop_capture(&mut self) -> StreamResult<()> {
        self.stream = None;
        Ok(())
    }

    fn next_frame(&mut self) -> StreamResult<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| StreamError::State("capture not started".to_string()))?;
        let (buf, _meta) = stream
            .next()
            .map_err(|e| StreamError::Upstream(format!("failed to dequeue frame: {}", e)))?;
        Ok(buf.to_vec())
    }
}

/// A deterministic in-memory camera for tests: no hardware, no ioctls.
///
/// Defaults to 640x480 YUYV and produces frames of exactly
/// `width * height * bytes_per_pixel(fmt)` bytes, filled with a byte derived
/// from a per-camera frame counter so successive frames are distinguishable.
pub struct FakeCamera {
    width: u32,
    height: u32,
    fmt: u32,
    capturing: bool,
    frame_counter: u8,
    supported: Vec<ImageSpec>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            width: 640,
            height: 480,
            fmt: FOURCC_YUYV,
            capturing: false,
            frame_counter: 0,
            supported: vec![
                ImageSpec::new(640, 480, FOURCC_YUYV),
                ImageSpec::new(1280, 720, FOURCC_YUYV),
                ImageSpec::new(640, 480, FOURCC_UYVY),
            ],
        }
    }
}

impl Default for FakeCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDevice for FakeCamera {
    fn name(&self) -> &str {
        "fake0"
    }

    fn list_formats(&self) -> StreamResult<Vec<u32>> {
        let mut fmts: Vec<u32> = self.supported.iter().map(|s| s.fmt).collect();
        fmts.sort_unstable();
        fmts.dedup();
        Ok(fmts)
    }

    fn list_resolutions(&self, fmt: u32) -> StreamResult<Vec<(u32, u32)>> {
        Ok(self
            .supported
            .iter()
            .filter(|s| s.fmt == fmt)
            .map(|s| (s.width, s.height))
            .collect())
    }

    fn current_spec(&self) -> StreamResult<ImageSpec> {
        Ok(ImageSpec::new(self.width, self.height, self.fmt))
    }

    fn set_current_spec(&mut self, spec: ImageSpec) -> StreamResult<()> {
        if !self.supported.contains(&spec) {
            return Err(StreamError::Protocol(format!(
                "unsupported spec: {}x{} fmt=0x{:08x}",
                spec.width, spec.height, spec.fmt
            )));
        }
        self.width = spec.width;
        self.height = spec.height;
        self.fmt = spec.fmt;
        Ok(())
    }

    fn start_capture(&mut self) -> StreamResult<()> {
        self.capturing = true;
        Ok(())
    }

    fn stop_capture(&mut self) -> StreamResult<()> {
        self.capturing = false;
        Ok(())
    }

    fn next_frame(&mut self) -> StreamResult<Vec<u8>> {
        if !self.capturing {
            return Err(StreamError::State("capture not started".to_string()));
        }
        let len = (self.width * self.height * bytes_per_pixel(self.fmt)) as usize;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        Ok(vec![self.frame_counter; len])
    }
}
