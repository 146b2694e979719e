mod capture;

pub use capture::{effective_frame_rate, Frame, FrameSource, SourceError, VideoSource};
