// SPDX-License-Identifier: GPL-3.0-only

//! Renderer sink (C11): this crate never draws pixels, so presentation is an
//! opaque trait the viewer session drives, with a logging-only implementation
//! fulfilling the contract without a GUI dependency.

use tracing::trace;

/// A presentation surface for decoded frames.
pub trait Renderer: Send {
    fn resize(&mut self, width: u32, height: u32);
    fn set_format(&mut self, fmt: u32);
    fn present(&mut self, frame: &[u8]);
}

/// Logs what it would have drawn instead of drawing it.
pub struct LoggingRenderer {
    width: u32,
    height: u32,
    fmt: u32,
}

impl LoggingRenderer {
    pub fn new(width: u32, height: u32, fmt: u32) -> Self {
        Self { width, height, fmt }
    }
}

impl Renderer for LoggingRenderer {
    fn resize(&mut self, width: u32, height: u32) {
        trace!(width, height, "renderer resized");
        self.width = width;
        self.height = height;
    }

    fn set_format(&mut self, fmt: u32) {
        trace!(fmt = format!("0x{:08x}", fmt), "renderer format changed");
        self.fmt = fmt;
    }

    fn present(&mut self, frame: &[u8]) {
        trace!(
            width = self.width,
            height = self.height,
            fmt = format!("0x{:08x}", self.fmt),
            bytes = frame.len(),
            "presenting frame"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_and_set_format_update_subsequent_present_logs() {
        let mut renderer = LoggingRenderer::new(640, 480, 0x5659_5559);
        renderer.resize(1280, 720);
        renderer.set_format(0x5659_5955);
        renderer.present(&[0u8; 16]);
        assert_eq!(renderer.width, 1280);
        assert_eq!(renderer.height, 720);
        assert_eq!(renderer.fmt, 0x5659_5955);
    }
}
