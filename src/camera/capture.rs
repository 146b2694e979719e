use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open video source: {0}")]
    Open(String),
    #[error("video source is not open")]
    NotOpen,
    #[error("opencv error: {0}")]
    Cv(#[from] opencv::Error),
}

/// A decoded frame and its position in the stream.
pub struct Frame {
    pub index: u64,
    pub image: Mat,
}

/// Where frames come from. Implementations must tolerate `close` being called
/// more than once.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), SourceError>;

    /// `Ok(None)` marks the end of the stream.
    fn read_next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// The rate reported by the source; may be zero.
    fn frame_rate(&self) -> f64;

    /// Rewinds file sources. Live sources ignore it.
    fn reset_to_start(&mut self) -> Result<(), SourceError>;

    fn close(&mut self);

    fn is_live(&self) -> bool;
}

/// Replaces a zero, negative or non-finite reported rate with `default_fps`.
pub fn effective_frame_rate(reported: f64, default_fps: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        tracing::warn!(
            reported,
            default_fps,
            "source reported no usable frame rate, using default"
        );
        default_fps
    }
}

/// Backends may ignore the buffer size hint; either way capture carries on.
fn buffer_size_applied(result: opencv::Result<bool>) -> bool {
    match result {
        Ok(true) => true,
        Ok(false) => {
            tracing::debug!("camera backend ignored the buffer size hint");
            false
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to set camera buffer size");
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceKind {
    File(String),
    Camera(i32),
}

/// OpenCV-backed source: a video file, or a camera when the uri is a
/// plain integer index.
pub struct VideoSource {
    kind: SourceKind,
    capture: Option<VideoCapture>,
    next_index: u64,
}

impl VideoSource {
    pub fn new(uri: &str) -> Self {
        let kind = match uri.trim().parse::<i32>() {
            Ok(index) => SourceKind::Camera(index),
            Err(_) => SourceKind::File(uri.to_string()),
        };

        Self {
            kind,
            capture: None,
            next_index: 0,
        }
    }

    fn capture_mut(&mut self) -> Result<&mut VideoCapture, SourceError> {
        self.capture.as_mut().ok_or(SourceError::NotOpen)
    }
}

impl FrameSource for VideoSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let capture = match &self.kind {
            SourceKind::Camera(index) => {
                tracing::info!(camera = index, "opening camera");
                let mut cap = VideoCapture::new(*index, videoio::CAP_ANY)?;
                // Keep latency low on live sources
                buffer_size_applied(cap.set(videoio::CAP_PROP_BUFFERSIZE, 1.0));
                cap
            }
            SourceKind::File(path) => {
                tracing::info!(path = %path, "opening video file");
                VideoCapture::from_file(path, videoio::CAP_ANY)?
            }
        };

        if !capture.is_opened()? {
            let name = match &self.kind {
                SourceKind::Camera(index) => format!("camera {index}"),
                SourceKind::File(path) => path.clone(),
            };
            return Err(SourceError::Open(name));
        }

        self.capture = Some(capture);
        self.next_index = 0;
        Ok(())
    }

    fn read_next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let live = self.is_live();
        let capture = self.capture_mut()?;

        let mut image = Mat::default();
        let grabbed = match capture.read(&mut image) {
            Ok(grabbed) => grabbed,
            Err(e) if live => {
                tracing::warn!(error = %e, "camera read failed, treating as end of stream");
                false
            }
            Err(e) => return Err(e.into()),
        };

        if !grabbed || image.empty() {
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame { index, image }))
    }

    fn frame_rate(&self) -> f64 {
        self.capture
            .as_ref()
            .and_then(|c| c.get(videoio::CAP_PROP_FPS).ok())
            .unwrap_or(0.0)
    }

    fn reset_to_start(&mut self) -> Result<(), SourceError> {
        if self.is_live() {
            return Ok(());
        }
        let capture = self.capture_mut()?;
        if !capture.set(videoio::CAP_PROP_POS_FRAMES, 0.0)? {
            tracing::warn!("source refused to seek to the first frame");
        }
        self.next_index = 0;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!(error = %e, "failed to release video source");
            }
            tracing::debug!("video source released");
        }
    }

    fn is_live(&self) -> bool {
        matches!(self.kind, SourceKind::Camera(_))
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.close();
    }
}
