use opencv::core::{Mat, Rect};
use opencv::highgui;
use opencv::prelude::*;
use thiserror::Error;

use crate::config::RegionConfig;

#[derive(Debug, Error, PartialEq)]
pub enum RegionError {
    #[error("region {0:?} is empty")]
    Empty(Roi),
    #[error("region {roi:?} exceeds frame bounds {width}x{height}")]
    OutOfBounds { roi: Roi, width: i32, height: i32 },
}

/// Axis-aligned region of interest, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Roi {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Checks the region is non-empty and lies inside a frame of the given size.
    pub fn validate(&self, frame_width: i32, frame_height: i32) -> Result<(), RegionError> {
        if self.is_empty() {
            return Err(RegionError::Empty(*self));
        }

        let fits = self.x >= 0
            && self.y >= 0
            && self.x + self.width <= frame_width
            && self.y + self.height <= frame_height;
        if !fits {
            return Err(RegionError::OutOfBounds {
                roi: *self,
                width: frame_width,
                height: frame_height,
            });
        }

        Ok(())
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

impl From<Rect> for Roi {
    fn from(rect: Rect) -> Self {
        Self::new(rect.x, rect.y, rect.width, rect.height)
    }
}

impl From<RegionConfig> for Roi {
    fn from(region: RegionConfig) -> Self {
        Self::new(region.x, region.y, region.width, region.height)
    }
}

/// Picks the region to analyse. Called once per session.
pub trait RegionSelector: Send {
    fn select_region(&mut self, frame: &Mat) -> opencv::Result<Roi>;
}

/// Lets the user drag a rectangle over the first frame.
pub struct InteractiveSelector {
    window: String,
}

impl InteractiveSelector {
    pub fn new() -> Self {
        Self {
            window: "Select ROI".to_string(),
        }
    }
}

impl Default for InteractiveSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionSelector for InteractiveSelector {
    fn select_region(&mut self, frame: &Mat) -> opencv::Result<Roi> {
        tracing::info!("select ROI for respiratory analysis (press Enter when done)");
        let rect = highgui::select_roi(&self.window, frame, false, false, true)?;
        highgui::destroy_window(&self.window)?;
        Ok(rect.into())
    }
}

/// Region supplied up front, e.g. from the config file.
pub struct FixedRegion(pub Roi);

impl RegionSelector for FixedRegion {
    fn select_region(&mut self, frame: &Mat) -> opencv::Result<Roi> {
        tracing::debug!(
            roi = ?self.0,
            frame_width = frame.cols(),
            frame_height = frame.rows(),
            "using configured region"
        );
        Ok(self.0)
    }
}
