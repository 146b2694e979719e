use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opencv::core::Mat;
use opencv::highgui;
use opencv::prelude::*;

use crate::analytics::RunSummary;

use super::overlay::annotate_final;
use super::plot::render_plot;

const TRACKING_WINDOW: &str = "Respiratory Tracking";
const PLOT_WINDOW: &str = "Respiratory Motion Analysis";
const FINAL_WINDOW: &str = "Final Respiratory Rate";
const FRAME_DELAY: Duration = Duration::from_millis(30);

/// Whether the loop should keep going after a frame was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

pub trait Presenter: Send {
    fn show_frame(&mut self, frame: &Mat) -> opencv::Result<Control>;

    /// May block until the user dismisses it.
    fn render_summary(&mut self, summary: &RunSummary, last_frame: Option<&Mat>)
        -> opencv::Result<()>;
}

fn quit_pressed(key: i32) -> bool {
    key >= 0 && (key & 0xFF) as u8 == b'q'
}

/// A held window goes away on `q`, when the user closes it, or on shutdown.
fn release_hold(key: i32, visible: f64, stop_requested: bool) -> bool {
    quit_pressed(key) || visible < 1.0 || stop_requested
}

/// OpenCV windows; `q` stops the run and closes the summary.
pub struct WindowPresenter {
    shutdown: Arc<AtomicBool>,
}

impl WindowPresenter {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self { shutdown }
    }

    fn hold(&self, window: &str, image: &Mat) -> opencv::Result<()> {
        loop {
            highgui::imshow(window, image)?;
            let key = highgui::wait_key(FRAME_DELAY.as_millis() as i32)?;
            let visible = highgui::get_window_property(window, highgui::WND_PROP_VISIBLE)?;
            if release_hold(key, visible, self.shutdown.load(Ordering::Relaxed)) {
                return Ok(());
            }
        }
    }
}

impl Presenter for WindowPresenter {
    fn show_frame(&mut self, frame: &Mat) -> opencv::Result<Control> {
        highgui::imshow(TRACKING_WINDOW, frame)?;
        let key = highgui::wait_key(FRAME_DELAY.as_millis() as i32)?;
        if quit_pressed(key) {
            return Ok(Control::Stop);
        }
        Ok(Control::Continue)
    }

    fn render_summary(
        &mut self,
        summary: &RunSummary,
        last_frame: Option<&Mat>,
    ) -> opencv::Result<()> {
        highgui::destroy_all_windows()?;

        let plot = render_plot(summary)?;
        tracing::info!("press q to close the summary plot");
        self.hold(PLOT_WINDOW, &plot)?;

        if let (Some(rate), Some(frame)) = (summary.rate_bpm, last_frame) {
            let mut annotated = frame.try_clone()?;
            annotate_final(&mut annotated, rate)?;
            self.hold(FINAL_WINDOW, &annotated)?;
        }

        highgui::destroy_all_windows()
    }
}

/// No windows: frames are dropped and the summary only logged.
pub struct HeadlessPresenter;

impl Presenter for HeadlessPresenter {
    fn show_frame(&mut self, _frame: &Mat) -> opencv::Result<Control> {
        Ok(Control::Continue)
    }

    fn render_summary(
        &mut self,
        summary: &RunSummary,
        _last_frame: Option<&Mat>,
    ) -> opencv::Result<()> {
        tracing::info!(
            variant = %summary.variant,
            samples = summary.raw.len(),
            peaks = summary.peaks.len(),
            estimates = summary.estimates.len(),
            "run summary"
        );
        Ok(())
    }
}
