use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opencv::core::Mat;
use opencv::prelude::*;
use thiserror::Error;

use crate::alert::AlertDispatcher;
use crate::camera::{effective_frame_rate, Frame, FrameSource, SourceError};
use crate::config::{AlertConfig, AnalyticsConfig, Config, Variant};
use crate::report::{draw_overlay, Control, Presenter};

use super::extractor::{FeatureExtractor, IntensityExtractor, OpticalFlowExtractor};
use super::rate::{PeakRateTracker, PeakTrigger, RateTracker, RunSummary, SpectralRateTracker};
use super::roi::{RegionError, RegionSelector, Roi};
use super::tracking::{LucasKanade, PointTracker};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("video source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),
    #[error("initial frame unreadable")]
    InitialFrameUnreadable,
    #[error("invalid region: {0}")]
    InvalidRegion(#[from] RegionError),
    #[error("region selection failed: {0}")]
    Selection(#[source] opencv::Error),
    #[error("failed to initialise feature extractor: {0}")]
    Extractor(#[source] opencv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    AwaitingRoi,
    Sampling,
    Reporting,
    Terminated,
}

/// Per-session values fixed once the source is open and the region chosen.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub frame_rate: f64,
    pub roi: Roi,
    pub variant: Variant,
}

/// The extractor and rate tracker for one variant. The session only talks to
/// the traits.
pub struct Pipeline {
    pub extractor: Box<dyn FeatureExtractor>,
    pub tracker: Box<dyn RateTracker>,
}

impl Pipeline {
    pub fn for_variant(
        variant: Variant,
        analytics: &AnalyticsConfig,
        alert: &AlertConfig,
        frame_rate: f64,
        point_tracker: Box<dyn PointTracker>,
    ) -> Self {
        match variant {
            Variant::OpticalFlow => Self {
                extractor: Box::new(OpticalFlowExtractor::new(
                    point_tracker,
                    analytics.tracking.grid_step,
                )),
                tracker: Box::new(PeakRateTracker::new(frame_rate)),
            },
            Variant::Intensity => {
                let trigger = alert.enabled.then(|| {
                    PeakTrigger::new(alert.min_prominence, alert.refractory_ms as f64 / 1000.0)
                });
                Self {
                    extractor: Box::new(IntensityExtractor::new()),
                    tracker: Box::new(SpectralRateTracker::new(
                        frame_rate,
                        analytics.window_secs,
                        (analytics.min_hz, analytics.max_hz),
                        analytics.recompute_interval_ms as f64 / 1000.0,
                        trigger,
                    )),
                }
            }
        }
    }
}

/// Drives one run: region selection, the frame loop, and the final report.
pub struct Session<S: FrameSource> {
    config: Config,
    source: S,
    selector: Box<dyn RegionSelector>,
    presenter: Box<dyn Presenter>,
    alerts: Option<AlertDispatcher>,
    point_tracker: Option<Box<dyn PointTracker>>,
    shutdown: Arc<AtomicBool>,
    state: SessionState,
}

impl<S: FrameSource> Session<S> {
    pub fn new(
        config: Config,
        source: S,
        selector: Box<dyn RegionSelector>,
        presenter: Box<dyn Presenter>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            source,
            selector,
            presenter,
            alerts: None,
            point_tracker: None,
            shutdown,
            state: SessionState::Uninitialized,
        }
    }

    pub fn with_alerts(mut self, alerts: AlertDispatcher) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Overrides the Lucas-Kanade tracker built from the config.
    #[cfg(test)]
    pub fn with_point_tracker(mut self, tracker: Box<dyn PointTracker>) -> Self {
        self.point_tracker = Some(tracker);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Runs to completion. The source is closed on every path out.
    pub fn run(&mut self) -> Result<RunSummary, SessionError> {
        let result = self.drive();
        self.source.close();
        self.transition(SessionState::Terminated);
        result
    }

    fn drive(&mut self) -> Result<RunSummary, SessionError> {
        self.source.open().map_err(SessionError::SourceUnavailable)?;
        self.transition(SessionState::AwaitingRoi);

        let frame_rate =
            effective_frame_rate(self.source.frame_rate(), self.config.source.default_fps);
        let (context, mut pipeline) = self.await_roi(frame_rate)?;

        self.transition(SessionState::Sampling);
        tracing::info!(
            variant = %context.variant,
            frame_rate,
            roi = ?context.roi,
            "sampling started"
        );
        let last_frame = self.sample(&context, &mut pipeline);

        self.transition(SessionState::Reporting);
        let summary = pipeline.tracker.finish();
        if let Err(e) = self
            .presenter
            .render_summary(&summary, last_frame.as_ref())
        {
            tracing::warn!(error = %e, "failed to render summary");
        }
        crate::storage::export_all(&self.config.report, &summary);

        Ok(summary)
    }

    fn await_roi(&mut self, frame_rate: f64) -> Result<(SessionContext, Pipeline), SessionError> {
        let first = self
            .read_frame()
            .ok_or(SessionError::InitialFrameUnreadable)?;

        let roi = self
            .selector
            .select_region(&first.image)
            .map_err(SessionError::Selection)?;
        roi.validate(first.image.cols(), first.image.rows())?;

        if self.source.is_live() {
            tracing::debug!("live source, sampling continues from the next frame");
        } else if let Err(e) = self.source.reset_to_start() {
            tracing::warn!(error = %e, "failed to rewind source");
        }

        let seed = self
            .read_frame()
            .ok_or(SessionError::InitialFrameUnreadable)?;

        let variant = self.config.analytics.variant;
        let point_tracker = match self.point_tracker.take() {
            Some(tracker) => tracker,
            None => Box::new(
                LucasKanade::new(&self.config.analytics.tracking)
                    .map_err(SessionError::Extractor)?,
            ),
        };
        let mut pipeline = Pipeline::for_variant(
            variant,
            &self.config.analytics,
            &self.config.alert,
            frame_rate,
            point_tracker,
        );

        let context = SessionContext {
            frame_rate,
            roi,
            variant,
        };

        if let Some(sample) = pipeline
            .extractor
            .prime(&seed.image, roi)
            .map_err(SessionError::Extractor)?
        {
            self.push_sample(&context, &mut pipeline, sample, seed.index);
        }

        Ok((context, pipeline))
    }

    /// The frame loop. Returns the last frame seen, for the final overlay.
    fn sample(&mut self, context: &SessionContext, pipeline: &mut Pipeline) -> Option<Mat> {
        let mut last_frame = None;
        let mut frames = 0u64;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!("stop requested");
                break;
            }

            let Some(frame) = self.read_frame() else {
                tracing::info!(frames, "end of stream");
                break;
            };
            frames += 1;

            match pipeline.extractor.extract(&frame.image) {
                Ok(Some(sample)) => self.push_sample(context, pipeline, sample, frame.index),
                Ok(None) => tracing::trace!(frame = frame.index, "no sample for frame"),
                Err(e) => tracing::warn!(frame = frame.index, error = %e, "frame processing error"),
            }

            let mut canvas = frame.image;
            if let Err(e) = self.annotate(&mut canvas, context, pipeline, frame.index) {
                tracing::trace!(error = %e, "failed to draw overlay");
            }

            match self.presenter.show_frame(&canvas) {
                Ok(Control::Continue) => {}
                Ok(Control::Stop) => {
                    tracing::info!(frames, "stopped by user");
                    last_frame = Some(canvas);
                    break;
                }
                Err(e) => tracing::warn!(error = %e, "failed to show frame"),
            }

            last_frame = Some(canvas);
        }

        last_frame
    }

    fn push_sample(
        &self,
        context: &SessionContext,
        pipeline: &mut Pipeline,
        sample: f64,
        frame_index: u64,
    ) {
        let at_secs = frame_index as f64 / context.frame_rate;
        let outcome = pipeline.tracker.push(sample, at_secs);
        if outcome.recomputed {
            match pipeline.tracker.current() {
                Some(rate) => tracing::debug!(
                    frame = frame_index,
                    rate = format!("{:.1}", rate),
                    "rate updated"
                ),
                None => tracing::trace!(frame = frame_index, "rate unavailable"),
            }
        }
        if outcome.peak {
            tracing::trace!(frame = frame_index, "breath peak");
            if let Some(alerts) = &self.alerts {
                alerts.submit();
            }
        }
    }

    fn annotate(
        &self,
        canvas: &mut Mat,
        context: &SessionContext,
        pipeline: &Pipeline,
        frame_index: u64,
    ) -> opencv::Result<()> {
        pipeline.extractor.draw(canvas)?;
        draw_overlay(canvas, &context.roi, frame_index, pipeline.tracker.current())
    }

    fn read_frame(&mut self) -> Option<Frame> {
        match self.source.read_next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed, treating as end of stream");
                None
            }
        }
    }
}

/// Runs a session on the blocking pool, the way long-lived OpenCV work is
/// kept off the async runtime.
pub fn spawn_session<S>(
    session: Session<S>,
) -> tokio::task::JoinHandle<Result<RunSummary, SessionError>>
where
    S: FrameSource + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut session = session;
        session.run()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertChannel, AlertError};
    use crate::analytics::tracking::TrackedPoints;
    use crate::analytics::FixedRegion;
    use crate::report::HeadlessPresenter;
    use opencv::core::{Point2f, Scalar, CV_8UC3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Synthetic frames: each one is a flat gray image of `brightness(i)`.
    struct ScriptedSource {
        frames: usize,
        fps: f64,
        fail_open: bool,
        live: bool,
        brightness: fn(usize) -> f64,
        cursor: usize,
        closed: Arc<AtomicBool>,
        rewinds: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(frames: usize, fps: f64) -> Self {
            Self {
                frames,
                fps,
                fail_open: false,
                live: false,
                brightness: |_| 100.0,
                cursor: 0,
                closed: Arc::new(AtomicBool::new(false)),
                rewinds: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self) -> Result<(), SourceError> {
            if self.fail_open {
                return Err(SourceError::Open("scripted".into()));
            }
            Ok(())
        }

        fn read_next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.cursor >= self.frames {
                return Ok(None);
            }
            let index = self.cursor;
            self.cursor += 1;
            let image = Mat::new_rows_cols_with_default(
                64,
                64,
                CV_8UC3,
                Scalar::all((self.brightness)(index)),
            )?;
            Ok(Some(Frame {
                index: index as u64,
                image,
            }))
        }

        fn frame_rate(&self) -> f64 {
            self.fps
        }

        fn reset_to_start(&mut self) -> Result<(), SourceError> {
            self.cursor = 0;
            self.rewinds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_live(&self) -> bool {
            self.live
        }
    }

    /// Moves all points vertically by a scripted per-step displacement.
    struct ScriptedFlow {
        step: usize,
        displacement: Box<dyn Fn(usize) -> f64 + Send>,
    }

    impl PointTracker for ScriptedFlow {
        fn track(
            &mut self,
            _prev: &Mat,
            _curr: &Mat,
            points: &[Point2f],
        ) -> opencv::Result<TrackedPoints> {
            self.step += 1;
            let dy = (self.displacement)(self.step) as f32;
            Ok(TrackedPoints {
                points: points.iter().map(|p| Point2f::new(p.x, p.y + dy)).collect(),
                status: vec![true; points.len()],
            })
        }
    }

    /// Counts shown frames and keeps the rate of every summary it renders.
    struct RecordingPresenter {
        shown: Arc<AtomicUsize>,
        stop_after: Option<usize>,
        summaries: Arc<Mutex<Vec<Option<f64>>>>,
    }

    impl Presenter for RecordingPresenter {
        fn show_frame(&mut self, _frame: &Mat) -> opencv::Result<Control> {
            let shown = self.shown.fetch_add(1, Ordering::SeqCst) + 1;
            if self.stop_after.is_some_and(|n| shown >= n) {
                return Ok(Control::Stop);
            }
            Ok(Control::Continue)
        }

        fn render_summary(
            &mut self,
            summary: &RunSummary,
            _last_frame: Option<&Mat>,
        ) -> opencv::Result<()> {
            self.summaries.lock().unwrap().push(summary.rate_bpm);
            Ok(())
        }
    }

    fn config(variant: Variant) -> Config {
        let mut config = Config::default();
        config.source.uri = Some("scripted".into());
        config.analytics.variant = variant;
        config
    }

    fn fixed(roi: Roi) -> Box<dyn RegionSelector> {
        Box::new(FixedRegion(roi))
    }

    /// Uniform noise amplitude, relative to the unit breathing amplitude, that
    /// the quarter-second smoothing and peak spacing still absorb.
    const TOLERATED_NOISE: f64 = 0.01;

    #[test]
    fn optical_flow_end_to_end_rate() {
        // 150 frames at 30 fps; per-frame displacement follows 0.3 Hz with
        // seeded broadband noise on top. The offset keeps |dy| from folding.
        let fps = 30.0;
        let mut rng = StdRng::seed_from_u64(0x0b5e_55ed);
        let noise: Vec<f64> = (0..=150)
            .map(|_| TOLERATED_NOISE * rng.gen_range(-1.0..=1.0))
            .collect();
        let flow = ScriptedFlow {
            step: 0,
            displacement: Box::new(move |i| {
                let t = i as f64 / fps;
                1.5 + (2.0 * PI * 0.3 * t).sin() + noise[i]
            }),
        };

        let source = ScriptedSource::new(150, fps);
        let closed = Arc::clone(&source.closed);
        let mut session = Session::new(
            config(Variant::OpticalFlow),
            source,
            fixed(Roi::new(16, 16, 32, 32)),
            Box::new(HeadlessPresenter),
            Arc::new(AtomicBool::new(false)),
        )
        .with_point_tracker(Box::new(flow));

        let summary = session.run().unwrap();
        let rate = summary.rate_bpm.expect("rate available");
        assert!((16.0..=20.0).contains(&rate), "rate {rate}");
        assert_eq!(summary.raw.len(), 149);
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn file_source_is_rewound_after_selection() {
        let source = ScriptedSource::new(10, 30.0);
        let rewinds = Arc::clone(&source.rewinds);
        let mut session = Session::new(
            config(Variant::Intensity),
            source,
            fixed(Roi::new(0, 0, 10, 10)),
            Box::new(HeadlessPresenter),
            Arc::new(AtomicBool::new(false)),
        );

        let summary = session.run().unwrap();
        assert_eq!(rewinds.load(Ordering::SeqCst), 1);
        // the selection frame is sampled again after the rewind
        assert_eq!(summary.raw.len(), 10);
    }

    #[test]
    fn live_source_is_not_rewound() {
        let mut source = ScriptedSource::new(10, 30.0);
        source.live = true;
        let rewinds = Arc::clone(&source.rewinds);
        let mut session = Session::new(
            config(Variant::Intensity),
            source,
            fixed(Roi::new(0, 0, 10, 10)),
            Box::new(HeadlessPresenter),
            Arc::new(AtomicBool::new(false)),
        );

        let summary = session.run().unwrap();
        assert_eq!(rewinds.load(Ordering::SeqCst), 0);
        // frame 0 went to selection; sampling starts at frame 1
        assert_eq!(summary.raw.len(), 9);
    }

    #[test]
    fn zero_fps_source_uses_default() {
        let shown = Arc::new(AtomicUsize::new(0));
        let summaries = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::new(
            config(Variant::Intensity),
            ScriptedSource::new(40, 0.0),
            fixed(Roi::new(0, 0, 10, 10)),
            Box::new(RecordingPresenter {
                shown: Arc::clone(&shown),
                stop_after: None,
                summaries: Arc::clone(&summaries),
            }),
            Arc::new(AtomicBool::new(false)),
        );

        let summary = session.run().unwrap();
        assert_eq!(summary.frame_rate, 30.0);
        // seed frame plus 39 more after the rewind
        assert_eq!(summary.raw.len(), 40);
        assert_eq!(shown.load(Ordering::SeqCst), 39);
        assert_eq!(summaries.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_region_is_rejected_before_sampling() {
        let source = ScriptedSource::new(10, 30.0);
        let closed = Arc::clone(&source.closed);
        let shown = Arc::new(AtomicUsize::new(0));
        let mut session = Session::new(
            config(Variant::Intensity),
            source,
            fixed(Roi::new(5, 5, 0, 10)),
            Box::new(RecordingPresenter {
                shown: Arc::clone(&shown),
                stop_after: None,
                summaries: Arc::new(Mutex::new(Vec::new())),
            }),
            Arc::new(AtomicBool::new(false)),
        );

        let err = session.run().unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidRegion(RegionError::Empty(_))
        ));
        assert_eq!(shown.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn unopenable_source_is_fatal() {
        let mut source = ScriptedSource::new(10, 30.0);
        source.fail_open = true;
        let closed = Arc::clone(&source.closed);
        let mut session = Session::new(
            config(Variant::OpticalFlow),
            source,
            fixed(Roi::new(0, 0, 10, 10)),
            Box::new(HeadlessPresenter),
            Arc::new(AtomicBool::new(false)),
        );

        assert!(matches!(
            session.run(),
            Err(SessionError::SourceUnavailable(_))
        ));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn empty_stream_has_no_initial_frame() {
        let mut session = Session::new(
            config(Variant::Intensity),
            ScriptedSource::new(0, 30.0),
            fixed(Roi::new(0, 0, 10, 10)),
            Box::new(HeadlessPresenter),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(
            session.run(),
            Err(SessionError::InitialFrameUnreadable)
        ));
    }

    #[test]
    fn presenter_stop_ends_the_loop() {
        let shown = Arc::new(AtomicUsize::new(0));
        let mut session = Session::new(
            config(Variant::Intensity),
            ScriptedSource::new(500, 30.0),
            fixed(Roi::new(0, 0, 10, 10)),
            Box::new(RecordingPresenter {
                shown: Arc::clone(&shown),
                stop_after: Some(12),
                summaries: Arc::new(Mutex::new(Vec::new())),
            }),
            Arc::new(AtomicBool::new(false)),
        );

        let summary = session.run().unwrap();
        assert_eq!(shown.load(Ordering::SeqCst), 12);
        assert_eq!(summary.raw.len(), 13);
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn shutdown_flag_stops_before_first_frame() {
        let mut session = Session::new(
            config(Variant::Intensity),
            ScriptedSource::new(500, 30.0),
            fixed(Roi::new(0, 0, 10, 10)),
            Box::new(HeadlessPresenter),
            Arc::new(AtomicBool::new(true)),
        );
        let summary = session.run().unwrap();
        // only the seed frame was sampled
        assert_eq!(summary.raw.len(), 1);
        assert_eq!(summary.rate_bpm, None);
    }

    struct Counting(AtomicUsize);

    impl AlertChannel for Counting {
        fn emit_tone(&self, _frequency_hz: u32, _duration: Duration) -> Result<(), AlertError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn intensity_session_estimates_and_alerts() {
        // 1.5 Hz brightness oscillation: 90 per minute
        let mut source = ScriptedSource::new(300, 30.0);
        source.brightness = |i| 128.0 + 40.0 * (2.0 * PI * 1.5 * i as f64 / 30.0).cos();

        let channel = Arc::new(Counting(AtomicUsize::new(0)));
        let mut cfg = config(Variant::Intensity);
        cfg.alert.tone_ms = 0;
        let alerts = AlertDispatcher::new(channel.clone(), &cfg.alert);

        let mut session = Session::new(
            cfg,
            source,
            fixed(Roi::new(8, 8, 16, 16)),
            Box::new(HeadlessPresenter),
            Arc::new(AtomicBool::new(false)),
        )
        .with_alerts(alerts);

        let summary = session.run().unwrap();
        let rate = summary.rate_bpm.unwrap();
        // one bin at half window (75 samples) is 24 per minute
        assert!((rate - 90.0).abs() <= 24.0, "rate {rate}");
        assert!(!summary.estimates.is_empty());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while channel.0.load(Ordering::SeqCst) < 10 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        // a peak every 20 frames, none dropped by the 0.3 s refractory gate
        let alerts = channel.0.load(Ordering::SeqCst);
        assert!((10..=15).contains(&alerts), "alerts {alerts}");
    }
}
