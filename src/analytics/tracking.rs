use opencv::core::{Mat, Point2f, Size, TermCriteria, TermCriteria_Type, Vector};
use opencv::prelude::*;
use opencv::video;

use crate::config::TrackingConfig;

use super::roi::Roi;

/// Positions after one tracking step. `status[i]` is false when point `i`
/// was lost; its position is then meaningless.
pub struct TrackedPoints {
    pub points: Vec<Point2f>,
    pub status: Vec<bool>,
}

pub trait PointTracker: Send {
    fn track(
        &mut self,
        prev_gray: &Mat,
        curr_gray: &Mat,
        points: &[Point2f],
    ) -> opencv::Result<TrackedPoints>;
}

/// Pyramidal Lucas-Kanade sparse optical flow.
pub struct LucasKanade {
    win_size: Size,
    max_level: i32,
    criteria: TermCriteria,
}

impl LucasKanade {
    pub fn new(config: &TrackingConfig) -> opencv::Result<Self> {
        let criteria = TermCriteria::new(
            TermCriteria_Type::COUNT as i32 | TermCriteria_Type::EPS as i32,
            config.max_iterations,
            config.epsilon,
        )?;

        Ok(Self {
            win_size: Size::new(config.win_size, config.win_size),
            max_level: config.max_level,
            criteria,
        })
    }
}

impl PointTracker for LucasKanade {
    fn track(
        &mut self,
        prev_gray: &Mat,
        curr_gray: &Mat,
        points: &[Point2f],
    ) -> opencv::Result<TrackedPoints> {
        if points.is_empty() {
            return Ok(TrackedPoints {
                points: Vec::new(),
                status: Vec::new(),
            });
        }

        let prev_pts = Vector::<Point2f>::from_slice(points);
        let mut next_pts = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();

        video::calc_optical_flow_pyr_lk(
            prev_gray,
            curr_gray,
            &prev_pts,
            &mut next_pts,
            &mut status,
            &mut err,
            self.win_size,
            self.max_level,
            self.criteria,
            0,
            1e-4,
        )?;

        Ok(TrackedPoints {
            points: next_pts.to_vec(),
            status: status.iter().map(|s| s == 1).collect(),
        })
    }
}

/// Regular grid inside the region, row by row from its top-left corner.
pub fn grid_points(roi: &Roi, step: i32) -> Vec<Point2f> {
    let step = step.max(1) as usize;
    let mut points = Vec::new();
    for dy in (0..roi.height.max(0)).step_by(step) {
        for dx in (0..roi.width.max(0)).step_by(step) {
            points.push(Point2f::new((roi.x + dx) as f32, (roi.y + dy) as f32));
        }
    }
    points
}
