use opencv::core::{self, Mat, Point, Point2f, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

use super::roi::Roi;
use super::tracking::{grid_points, PointTracker};

/// Turns frames into one scalar sample each.
pub trait FeatureExtractor: Send {
    /// Seeds the extractor from the first frame after the region is chosen.
    fn prime(&mut self, frame: &Mat, roi: Roi) -> opencv::Result<Option<f64>>;

    /// `Ok(None)` means no sample could be taken from this frame.
    fn extract(&mut self, frame: &Mat) -> opencv::Result<Option<f64>>;

    /// Draws extractor state onto a display frame.
    fn draw(&self, canvas: &mut Mat) -> opencv::Result<()>;
}

pub fn to_gray(frame: &Mat) -> opencv::Result<Mat> {
    if frame.channels() == 1 {
        return frame.try_clone();
    }
    let mut gray = Mat::default();
    imgproc::cvt_color_def(frame, &mut gray, imgproc::COLOR_BGR2GRAY)?;
    Ok(gray)
}

/// Mean absolute vertical displacement of a grid of tracked points.
pub struct OpticalFlowExtractor {
    tracker: Box<dyn PointTracker>,
    grid_step: i32,
    prev_gray: Option<Mat>,
    points: Vec<Point2f>,
    last_moves: Vec<(Point2f, Point2f)>,
}

impl OpticalFlowExtractor {
    pub fn new(tracker: Box<dyn PointTracker>, grid_step: i32) -> Self {
        Self {
            tracker,
            grid_step,
            prev_gray: None,
            points: Vec::new(),
            last_moves: Vec::new(),
        }
    }

    pub fn tracked_points(&self) -> usize {
        self.points.len()
    }
}

impl FeatureExtractor for OpticalFlowExtractor {
    fn prime(&mut self, frame: &Mat, roi: Roi) -> opencv::Result<Option<f64>> {
        self.prev_gray = Some(to_gray(frame)?);
        self.points = grid_points(&roi, self.grid_step);
        self.last_moves.clear();
        tracing::debug!(points = self.tracked_points(), "seeded tracking grid");
        Ok(None)
    }

    fn extract(&mut self, frame: &Mat) -> opencv::Result<Option<f64>> {
        let gray = to_gray(frame)?;
        let Some(prev_gray) = self.prev_gray.replace(gray) else {
            return Ok(None);
        };
        let Some(curr_gray) = self.prev_gray.as_ref() else {
            return Ok(None);
        };

        if self.points.is_empty() {
            return Ok(None);
        }

        let tracked = self.tracker.track(&prev_gray, curr_gray, &self.points)?;

        let mut kept = Vec::with_capacity(self.points.len());
        self.last_moves.clear();
        for ((old, new), ok) in self
            .points
            .iter()
            .zip(tracked.points.iter())
            .zip(tracked.status.iter())
        {
            if *ok {
                self.last_moves.push((*old, *new));
                kept.push(*new);
            }
        }

        let lost = self.points.len() - kept.len();
        if lost > 0 {
            tracing::trace!(lost, remaining = kept.len(), "tracked points lost");
        }
        self.points = kept;

        if self.last_moves.is_empty() {
            return Ok(None);
        }

        let total: f64 = self
            .last_moves
            .iter()
            .map(|(old, new)| f64::from((new.y - old.y).abs()))
            .sum();
        Ok(Some(total / self.last_moves.len() as f64))
    }

    fn draw(&self, canvas: &mut Mat) -> opencv::Result<()> {
        let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
        let red = Scalar::new(0.0, 0.0, 255.0, 0.0);
        for (old, new) in &self.last_moves {
            let a = Point::new(new.x as i32, new.y as i32);
            let b = Point::new(old.x as i32, old.y as i32);
            imgproc::line(canvas, a, b, green, 2, imgproc::LINE_8, 0)?;
            imgproc::circle(canvas, a, 3, red, -1, imgproc::LINE_8, 0)?;
        }
        Ok(())
    }
}

/// Mean gray level over the region.
pub struct IntensityExtractor {
    roi: Option<Roi>,
}

impl IntensityExtractor {
    pub fn new() -> Self {
        Self { roi: None }
    }

    fn region_mean(&self, frame: &Mat) -> opencv::Result<Option<f64>> {
        let Some(roi) = self.roi else {
            return Ok(None);
        };
        let crop = Mat::roi(frame, roi.rect())?.try_clone()?;
        let gray = to_gray(&crop)?;
        let mean = core::mean(&gray, &core::no_array())?;
        Ok(Some(mean[0]))
    }
}

impl Default for IntensityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for IntensityExtractor {
    fn prime(&mut self, frame: &Mat, roi: Roi) -> opencv::Result<Option<f64>> {
        self.roi = Some(roi);
        self.region_mean(frame)
    }

    fn extract(&mut self, frame: &Mat) -> opencv::Result<Option<f64>> {
        self.region_mean(frame)
    }

    fn draw(&self, _canvas: &mut Mat) -> opencv::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::tracking::TrackedPoints;
    use approx::assert_relative_eq;
    use opencv::core::{Rect, CV_8UC3};

    fn solid(value: f64) -> Mat {
        Mat::new_rows_cols_with_default(40, 40, CV_8UC3, Scalar::all(value)).unwrap()
    }

    /// Moves every point by a fixed `dy` and loses the point at `drop_index`.
    struct Shift {
        dy: f32,
        drop_index: Option<usize>,
    }

    impl PointTracker for Shift {
        fn track(
            &mut self,
            _prev: &Mat,
            _curr: &Mat,
            points: &[Point2f],
        ) -> opencv::Result<TrackedPoints> {
            Ok(TrackedPoints {
                points: points
                    .iter()
                    .map(|p| Point2f::new(p.x, p.y + self.dy))
                    .collect(),
                status: (0..points.len())
                    .map(|i| Some(i) != self.drop_index)
                    .collect(),
            })
        }
    }

    #[test]
    fn intensity_is_region_mean() {
        let mut frame = solid(10.0);
        imgproc::rectangle(
            &mut frame,
            Rect::new(0, 0, 10, 10),
            Scalar::all(200.0),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();

        let mut extractor = IntensityExtractor::new();
        let inside = extractor.prime(&frame, Roi::new(0, 0, 10, 10)).unwrap();
        assert_relative_eq!(inside.unwrap(), 200.0, epsilon = 1e-9);

        let mut extractor = IntensityExtractor::new();
        extractor.prime(&frame, Roi::new(0, 0, 20, 10)).unwrap();
        let half = extractor.extract(&frame).unwrap().unwrap();
        assert_relative_eq!(half, 105.0, epsilon = 1e-9);
    }

    #[test]
    fn flow_sample_is_mean_absolute_dy() {
        let mut extractor = OpticalFlowExtractor::new(
            Box::new(Shift {
                dy: -1.5,
                drop_index: None,
            }),
            5,
        );
        assert_eq!(
            extractor.prime(&solid(0.0), Roi::new(0, 0, 10, 10)).unwrap(),
            None
        );
        assert_eq!(extractor.tracked_points(), 4);

        let sample = extractor.extract(&solid(0.0)).unwrap().unwrap();
        assert_relative_eq!(sample, 1.5, epsilon = 1e-6);
    }

    #[test]
    fn lost_points_leave_the_set() {
        let mut extractor = OpticalFlowExtractor::new(
            Box::new(Shift {
                dy: 1.0,
                drop_index: Some(0),
            }),
            5,
        );
        extractor.prime(&solid(0.0), Roi::new(0, 0, 10, 10)).unwrap();

        let mut previous = extractor.tracked_points();
        for _ in 0..3 {
            extractor.extract(&solid(0.0)).unwrap();
            assert!(extractor.tracked_points() < previous);
            previous = extractor.tracked_points();
        }
        assert_eq!(previous, 1);

        // last point lost: no sample, session carries on
        assert_eq!(extractor.extract(&solid(0.0)).unwrap(), None);
        assert_eq!(extractor.tracked_points(), 0);
        assert_eq!(extractor.extract(&solid(0.0)).unwrap(), None);
    }
}
