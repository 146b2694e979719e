use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc;

use crate::analytics::Roi;

/// Text shown while no estimate is available.
pub const CALCULATING: &str = "calculating...";

pub fn rate_label(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("RR: {rate:.1} BPM"),
        None => format!("RR: {CALCULATING}"),
    }
}

/// ROI outline, frame counter and the current rate.
pub fn draw_overlay(
    canvas: &mut Mat,
    roi: &Roi,
    frame_index: u64,
    rate: Option<f64>,
) -> opencv::Result<()> {
    let blue = Scalar::new(255.0, 0.0, 0.0, 0.0);
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);

    imgproc::rectangle(canvas, roi.rect(), blue, 2, imgproc::LINE_8, 0)?;
    imgproc::put_text(
        canvas,
        &format!("Frame: {frame_index}"),
        Point::new(10, 24),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        green,
        2,
        imgproc::LINE_8,
        false,
    )?;
    imgproc::put_text(
        canvas,
        &rate_label(rate),
        Point::new(10, 52),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.7,
        green,
        2,
        imgproc::LINE_8,
        false,
    )
}

/// Large rate caption for the final frame.
pub fn annotate_final(canvas: &mut Mat, rate: f64) -> opencv::Result<()> {
    imgproc::put_text(
        canvas,
        &format!("RR: {rate:.1} BPM"),
        Point::new(50, 50),
        imgproc::FONT_HERSHEY_SIMPLEX,
        1.2,
        Scalar::new(0.0, 255.0, 0.0, 0.0),
        2,
        imgproc::LINE_8,
        false,
    )
}
