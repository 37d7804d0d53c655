//! Screenshot and frame dump functionality.
//!
//! Captures the presented image straight from the host surface.
//! - Screenshots are written as PNG on a background thread
//! - Frame dumps feed every presented frame to a [`FrameSink`]
//!
//! Captured frames are always RGB24, top row first, regardless of the
//! host's row origin.

use anyhow::{Context, Result};
use efbridge_shared::{HostOrigin, TargetRectangle};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use crate::diagnostics::Diagnostics;
use crate::error::HostError;
use crate::host::{HostGpu, PresentTarget};

/// One presented image, RGB24, rows top-down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl CapturedFrame {
    /// RGB triple at `(x, y)`, with `y = 0` the top row.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 3) as usize;
        Some([self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]])
    }
}

/// Reads `rect` of the bound present target.
///
/// `rect` is in host rows; on a bottom-left host its first row is the bottom
/// of the image, so rows are reversed.
pub fn capture_frame(
    host: &mut dyn HostGpu,
    rect: TargetRectangle,
    origin: HostOrigin,
) -> Result<CapturedFrame, HostError> {
    let rect = rect.normalized();
    let width = rect.width().max(0) as u32;
    let height = rect.height().max(0) as u32;
    let argb = host.read_surface(rect)?;
    if argb.len() != (width * height) as usize {
        return Err(HostError::Readback {
            rect,
            reason: format!("expected {} pixels, got {}", width * height, argb.len()),
        });
    }

    let mut rgb = Vec::with_capacity(argb.len() * 3);
    for row in 0..height {
        let src_row = if origin.flips_rows() {
            height - 1 - row
        } else {
            row
        };
        let start = (src_row * width) as usize;
        for &pixel in &argb[start..start + width as usize] {
            rgb.extend_from_slice(&[(pixel >> 16) as u8, (pixel >> 8) as u8, pixel as u8]);
        }
    }

    Ok(CapturedFrame { width, height, rgb })
}

/// Receiver of dumped frames, typically a video encoder.
pub trait FrameSink: Send {
    /// Begins a dump session of `width` × `height` frames.
    fn start(&mut self, width: u32, height: u32) -> Result<()>;

    fn add_frame(&mut self, frame: &CapturedFrame) -> Result<()>;

    fn stop(&mut self);
}

/// Writes raw RGB24 frames back to back into one file.
pub struct RawFrameSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    frames_written: u64,
}

impl RawFrameSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for RawFrameSink {
    fn start(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).context("Failed to create dump directory")?;
        }
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        self.writer = Some(BufWriter::new(file));
        self.frames_written = 0;
        tracing::info!(
            "Frame dump started ({}x{}): {}",
            width,
            height,
            self.path.display()
        );
        Ok(())
    }

    fn add_frame(&mut self, frame: &CapturedFrame) -> Result<()> {
        let writer = self.writer.as_mut().context("Frame dump not started")?;
        writer
            .write_all(&frame.rgb)
            .context("Failed to write frame")?;
        self.frames_written += 1;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::error!("Failed to flush frame dump: {}", e);
            }
            tracing::info!("Frame dump stopped: {} frames", self.frames_written);
        }
    }
}

/// Session bookkeeping around a [`FrameSink`].
struct FrameDumper {
    sink: Box<dyn FrameSink>,
    /// Whether the previous presented frame went to the sink.
    last_frame_dumped: bool,
    size: (u32, u32),
    last_frame: Option<CapturedFrame>,
}

impl FrameDumper {
    fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            sink,
            last_frame_dumped: false,
            size: (0, 0),
            last_frame: None,
        }
    }

    /// Adds `frame`, starting a session first if none is running.
    fn dump(&mut self, frame: CapturedFrame) -> Result<()> {
        let size = (frame.width, frame.height);
        if self.last_frame_dumped && size != self.size {
            tracing::info!("Frame size changed to {}x{}, restarting dump", size.0, size.1);
            self.end();
        }
        if !self.last_frame_dumped {
            self.sink.start(size.0, size.1)?;
            self.last_frame_dumped = true;
            self.size = size;
        }
        self.sink.add_frame(&frame)?;
        self.last_frame = Some(frame);
        Ok(())
    }

    /// Re-submits the previous frame.
    fn repeat(&mut self) -> Result<()> {
        if !self.last_frame_dumped {
            return Ok(());
        }
        match self.last_frame.as_ref() {
            Some(frame) => self.sink.add_frame(frame),
            None => Ok(()),
        }
    }

    fn end(&mut self) {
        if self.last_frame_dumped {
            self.sink.stop();
            self.last_frame_dumped = false;
            self.last_frame = None;
        }
    }
}

/// Screen capture state.
///
/// Handles screenshot requests and frame dumping.
pub struct FrameCapture {
    /// Destination of the screenshot requested for the next frame
    screenshot_pending: Option<PathBuf>,
    /// Channel for receiving save completion notifications
    save_receiver: Option<mpsc::Receiver<Result<PathBuf>>>,
    dumper: Option<FrameDumper>,
    dump_enabled: bool,
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCapture {
    pub fn new() -> Self {
        Self {
            screenshot_pending: None,
            save_receiver: None,
            dumper: None,
            dump_enabled: false,
        }
    }

    /// Request a screenshot of the next presented frame, saved to `path`.
    pub fn request_screenshot(&mut self, path: PathBuf) {
        self.screenshot_pending = Some(path);
    }

    pub fn screenshot_pending(&self) -> bool {
        self.screenshot_pending.is_some()
    }

    /// Installs the sink dumped frames go to, ending any running session.
    pub fn set_frame_sink(&mut self, sink: Box<dyn FrameSink>) {
        if let Some(mut dumper) = self.dumper.take() {
            dumper.end();
        }
        self.dumper = Some(FrameDumper::new(sink));
    }

    /// Enables or disables frame dumping. The session starts or stops on
    /// the next presented frame.
    pub fn set_dump_enabled(&mut self, enabled: bool) {
        self.dump_enabled = enabled;
    }

    pub fn is_dump_enabled(&self) -> bool {
        self.dump_enabled
    }

    /// Whether a dump session is running.
    pub fn is_dumping(&self) -> bool {
        self.dumper.as_ref().is_some_and(|d| d.last_frame_dumped)
    }

    fn wants_frame(&self) -> bool {
        self.screenshot_pending.is_some() || (self.dump_enabled && self.dumper.is_some())
    }

    /// Called after a frame reached `target`. `rect` is the presented area
    /// in host rows.
    pub fn on_presented(
        &mut self,
        host: &mut dyn HostGpu,
        target: PresentTarget,
        rect: TargetRectangle,
        origin: HostOrigin,
        diag: &mut Diagnostics,
    ) {
        if !self.wants_frame() {
            self.end_dump();
            return;
        }

        let frame = match host
            .bind_present_target(target)
            .and_then(|()| capture_frame(host, rect, origin))
        {
            Ok(frame) => frame,
            Err(e) => {
                diag.resource_failure("Frame capture", &e);
                return;
            }
        };

        if let Some(path) = self.screenshot_pending.take() {
            let (tx, rx) = mpsc::channel();
            self.save_receiver = Some(rx);
            let screenshot = frame.clone();
            thread::spawn(move || {
                let _ = tx.send(save_screenshot(&screenshot, path));
            });
        }

        if self.dump_enabled {
            if let Some(dumper) = self.dumper.as_mut() {
                if let Err(e) = dumper.dump(frame) {
                    tracing::error!("Frame dump failed: {:#}", e);
                    diag.notify(format!("Frame dump failed: {e:#}"));
                    dumper.end();
                    self.dump_enabled = false;
                }
            }
        } else {
            self.end_dump();
        }
    }

    /// Called when a frame was not presented.
    pub fn on_skipped(&mut self) {
        if !self.dump_enabled {
            return;
        }
        if let Some(dumper) = self.dumper.as_mut() {
            if let Err(e) = dumper.repeat() {
                tracing::warn!("Failed to repeat dumped frame: {:#}", e);
            }
        }
    }

    /// Ends the dump session, if one is running.
    pub fn end_dump(&mut self) {
        if let Some(dumper) = self.dumper.as_mut() {
            dumper.end();
        }
    }

    /// Poll for save completion results.
    ///
    /// Returns the result if a screenshot save has completed.
    pub fn poll_save_result(&mut self) -> Option<Result<PathBuf>> {
        let receiver = self.save_receiver.as_ref()?;
        match receiver.try_recv() {
            Ok(result) => {
                self.save_receiver = None;
                Some(result)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.save_receiver = None;
                None
            }
        }
    }
}

impl Drop for FrameCapture {
    fn drop(&mut self) {
        self.end_dump();
    }
}

/// Timestamped screenshot path inside `dir`.
pub fn screenshot_path(dir: &Path) -> PathBuf {
    let now = chrono::Local::now();
    dir.join(format!("efbridge_{}.png", now.format("%Y-%m-%d_%H-%M-%S")))
}

/// Save a captured frame as PNG.
fn save_screenshot(frame: &CapturedFrame, path: PathBuf) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).context("Failed to create screenshots directory")?;
    }

    let file = File::create(&path).context("Failed to create screenshot file")?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);

    let mut png_writer = encoder
        .write_header()
        .context("Failed to write PNG header")?;
    png_writer
        .write_image_data(&frame.rgb)
        .context("Failed to write PNG data")?;
    png_writer.finish().context("Failed to finish PNG")?;

    tracing::info!("Screenshot saved: {}", path.display());

    Ok(path)
}
