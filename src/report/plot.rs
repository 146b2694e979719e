use opencv::core::{Mat, Point, Rect, Scalar, Vector, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

use crate::analytics::RunSummary;

const PLOT_WIDTH: i32 = 1200;
const PLOT_HEIGHT: i32 = 720;
const MARGIN: i32 = 60;

fn blue() -> Scalar {
    Scalar::new(200.0, 80.0, 0.0, 0.0)
}

fn red() -> Scalar {
    Scalar::new(0.0, 0.0, 220.0, 0.0)
}

fn green() -> Scalar {
    Scalar::new(0.0, 160.0, 0.0, 0.0)
}

fn black() -> Scalar {
    Scalar::new(0.0, 0.0, 0.0, 0.0)
}

/// Maps data coordinates into a pixel rectangle.
struct Axes {
    area: Rect,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl Axes {
    fn new(area: Rect, xs: &[f64], ys: &[f64]) -> Self {
        Self {
            area,
            x_range: bounds(xs),
            y_range: bounds(ys),
        }
    }

    fn to_pixel(&self, x: f64, y: f64) -> Point {
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        let fx = (x - x0) / (x1 - x0);
        let fy = (y - y0) / (y1 - y0);
        Point::new(
            self.area.x + (fx * self.area.width as f64).round() as i32,
            self.area.y + self.area.height - (fy * self.area.height as f64).round() as i32,
        )
    }

    fn frame(&self, canvas: &mut Mat, title: &str, x_label: &str) -> opencv::Result<()> {
        imgproc::rectangle(canvas, self.area, black(), 1, imgproc::LINE_8, 0)?;
        label(canvas, title, Point::new(self.area.x, self.area.y - 10), 0.6)?;
        label(
            canvas,
            x_label,
            Point::new(self.area.x + self.area.width / 2 - 80, self.area.y + self.area.height + 22),
            0.5,
        )?;
        label(
            canvas,
            &format!("{:.1}", self.x_range.0),
            Point::new(self.area.x, self.area.y + self.area.height + 22),
            0.45,
        )?;
        label(
            canvas,
            &format!("{:.1}", self.x_range.1),
            Point::new(self.area.x + self.area.width - 40, self.area.y + self.area.height + 22),
            0.45,
        )
    }

    fn line(&self, canvas: &mut Mat, xs: &[f64], ys: &[f64], color: Scalar) -> opencv::Result<()> {
        if xs.len() < 2 {
            return Ok(());
        }
        let points: Vector<Point> = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| self.to_pixel(x, y))
            .collect();
        let mut polyline = Vector::<Vector<Point>>::new();
        polyline.push(points);
        imgproc::polylines(canvas, &polyline, false, color, 2, imgproc::LINE_AA, 0)
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 0.5, hi + 0.5);
    }
    (lo, hi)
}

fn label(canvas: &mut Mat, text: &str, origin: Point, scale: f64) -> opencv::Result<()> {
    imgproc::put_text(
        canvas,
        text,
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        scale,
        black(),
        1,
        imgproc::LINE_AA,
        false,
    )
}

/// Two-panel summary chart: the sample series (raw, smoothed, detected
/// peaks) over time, and the magnitude spectrum in cycles per minute.
pub fn render_plot(summary: &RunSummary) -> opencv::Result<Mat> {
    let mut canvas = Mat::new_rows_cols_with_default(
        PLOT_HEIGHT,
        PLOT_WIDTH,
        CV_8UC3,
        Scalar::all(255.0),
    )?;

    let panel_height = (PLOT_HEIGHT - 3 * MARGIN) / 2;
    let panel_width = PLOT_WIDTH - 2 * MARGIN;
    let top = Rect::new(MARGIN, MARGIN, panel_width, panel_height);
    let bottom = Rect::new(MARGIN, 2 * MARGIN + panel_height, panel_width, panel_height);

    let fps = summary.frame_rate;
    let raw_t: Vec<f64> = (0..summary.raw.len()).map(|i| i as f64 / fps).collect();
    let offset = summary.raw.len().saturating_sub(summary.smoothed.len()) / 2;
    let smooth_t: Vec<f64> = (0..summary.smoothed.len())
        .map(|i| (i + offset) as f64 / fps)
        .collect();

    let mut all_y = summary.raw.clone();
    all_y.extend_from_slice(&summary.smoothed);
    let series = Axes::new(top, &raw_t, &all_y);
    series.frame(&mut canvas, "Respiratory signal (raw blue, smoothed red)", "Time (seconds)")?;
    series.line(&mut canvas, &raw_t, &summary.raw, blue())?;
    series.line(&mut canvas, &smooth_t, &summary.smoothed, red())?;
    for &peak in &summary.peaks {
        if let (Some(&t), Some(&v)) = (smooth_t.get(peak), summary.smoothed.get(peak)) {
            imgproc::circle(
                &mut canvas,
                series.to_pixel(t, v),
                5,
                green(),
                -1,
                imgproc::LINE_AA,
                0,
            )?;
        }
    }

    let bpm: Vec<f64> = summary
        .spectrum
        .frequencies_hz
        .iter()
        .map(|f| f * 60.0)
        .collect();
    let spectrum = Axes::new(bottom, &bpm, &summary.spectrum.magnitudes);
    spectrum.frame(&mut canvas, "Frequency spectrum", "Frequency (breaths per minute)")?;
    if !summary.spectrum.is_empty() {
        spectrum.line(&mut canvas, &bpm, &summary.spectrum.magnitudes, blue())?;
    }

    let rate_text = match summary.rate_bpm {
        Some(rate) => {
            let (lo, hi) = spectrum.y_range;
            let a = spectrum.to_pixel(rate, lo);
            let b = spectrum.to_pixel(rate, hi);
            if a.x >= bottom.x && a.x <= bottom.x + bottom.width {
                imgproc::line(&mut canvas, a, b, red(), 1, imgproc::LINE_8, 0)?;
            }
            format!("Respiratory Rate: {rate:.1} BPM")
        }
        None => "Respiratory Rate: unavailable".to_string(),
    };
    label(
        &mut canvas,
        &rate_text,
        Point::new(bottom.x + bottom.width - 330, bottom.y + 24),
        0.6,
    )?;

    Ok(canvas)
}
