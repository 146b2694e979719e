use crate::buffer::RollingBuffer;
use crate::config::Variant;

use super::peaks::{find_peaks, rate_from_peaks};
use super::signal::{moving_average, remove_bias, smoothing_window};
use super::spectrum::Spectrum;

/// What a single pushed sample caused.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SampleOutcome {
    /// The live estimate was recomputed on this sample.
    pub recomputed: bool,
    /// A local peak passed the alert gate.
    pub peak: bool,
}

/// Everything the end-of-run report needs.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub variant: Variant,
    pub frame_rate: f64,
    pub raw: Vec<f64>,
    pub smoothed: Vec<f64>,
    /// Indices into `smoothed`.
    pub peaks: Vec<usize>,
    pub spectrum: Spectrum,
    pub estimates: Vec<f64>,
    pub rate_bpm: Option<f64>,
}

/// Turns a sample stream into a rate. One implementation per variant.
pub trait RateTracker: Send {
    /// `at_secs` is stream time of the sample.
    fn push(&mut self, sample: f64, at_secs: f64) -> SampleOutcome;

    /// Latest live estimate, if any.
    fn current(&self) -> Option<f64>;

    fn finish(&mut self) -> RunSummary;
}

/// Keeps the whole history and counts peaks once at the end of the run.
pub struct PeakRateTracker {
    frame_rate: f64,
    history: Vec<f64>,
}

impl PeakRateTracker {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_rate,
            history: Vec::new(),
        }
    }
}

impl RateTracker for PeakRateTracker {
    fn push(&mut self, sample: f64, _at_secs: f64) -> SampleOutcome {
        self.history.push(sample);
        SampleOutcome::default()
    }

    fn current(&self) -> Option<f64> {
        None
    }

    fn finish(&mut self) -> RunSummary {
        let smoothed = moving_average(&self.history, smoothing_window(self.frame_rate));
        let peaks = find_peaks(&smoothed, self.frame_rate / 4.0);

        let rate_bpm = if (self.history.len() as f64) < self.frame_rate {
            tracing::warn!(
                samples = self.history.len(),
                "not enough frames to analyze"
            );
            None
        } else {
            let rate = rate_from_peaks(&peaks, self.frame_rate);
            if rate.is_none() {
                tracing::warn!(peaks = peaks.len(), "not enough peaks to estimate a rate");
            }
            rate
        };

        tracing::info!(
            samples = self.history.len(),
            peaks = peaks.len(),
            rate = ?rate_bpm,
            "peak analysis complete"
        );

        RunSummary {
            variant: Variant::OpticalFlow,
            frame_rate: self.frame_rate,
            spectrum: Spectrum::compute(&smoothed, self.frame_rate),
            raw: self.history.clone(),
            smoothed,
            peaks,
            estimates: rate_bpm.into_iter().collect(),
            rate_bpm,
        }
    }
}

/// 3-sample local maximum detector with a prominence floor and a
/// refractory interval between accepted peaks.
pub struct PeakTrigger {
    min_prominence: f64,
    refractory_secs: f64,
    last_fired: Option<f64>,
}

impl PeakTrigger {
    pub fn new(min_prominence: f64, refractory_secs: f64) -> Self {
        Self {
            min_prominence,
            refractory_secs,
            last_fired: None,
        }
    }

    /// Tests whether the second most recent sample was a peak.
    pub fn observe(&mut self, buffer: &RollingBuffer, at_secs: f64) -> bool {
        let (Some(tail), Some(mean)) = (buffer.tail(3), buffer.mean()) else {
            return false;
        };
        let (before, mid, after) = (tail[0], tail[1], tail[2]);

        if !(mid > before && mid > after) || mid - mean < self.min_prominence {
            return false;
        }
        if let Some(last) = self.last_fired {
            if at_secs - last < self.refractory_secs {
                return false;
            }
        }

        self.last_fired = Some(at_secs);
        true
    }
}

/// Band-limited dominant frequency over a rolling window, recomputed on a
/// fixed cadence. The whole run is kept separately for the report.
pub struct SpectralRateTracker {
    frame_rate: f64,
    buffer: RollingBuffer,
    history: Vec<f64>,
    min_hz: f64,
    max_hz: f64,
    interval_secs: f64,
    next_due: f64,
    current: Option<f64>,
    estimates: Vec<f64>,
    trigger: Option<PeakTrigger>,
}

impl SpectralRateTracker {
    pub fn new(
        frame_rate: f64,
        window_secs: f64,
        band_hz: (f64, f64),
        interval_secs: f64,
        trigger: Option<PeakTrigger>,
    ) -> Self {
        Self {
            frame_rate,
            buffer: RollingBuffer::for_window(frame_rate, window_secs),
            history: Vec::new(),
            min_hz: band_hz.0,
            max_hz: band_hz.1,
            interval_secs,
            next_due: interval_secs,
            current: None,
            estimates: Vec::new(),
            trigger,
        }
    }

    fn estimate(&self) -> Option<f64> {
        if !self.buffer.is_half_full() {
            return None;
        }
        let centred = remove_bias(&self.buffer.to_vec());
        Spectrum::compute(&centred, self.frame_rate)
            .dominant_in_band(self.min_hz, self.max_hz)
            .map(|hz| hz * 60.0)
    }
}

impl RateTracker for SpectralRateTracker {
    fn push(&mut self, sample: f64, at_secs: f64) -> SampleOutcome {
        self.buffer.push(sample);
        self.history.push(sample);

        let peak = match self.trigger.as_mut() {
            Some(trigger) => trigger.observe(&self.buffer, at_secs),
            None => false,
        };

        let recomputed = at_secs >= self.next_due;
        if recomputed {
            self.current = self.estimate();
            if let Some(rate) = self.current {
                self.estimates.push(rate);
            }
            self.next_due = at_secs + self.interval_secs;
        }

        SampleOutcome { recomputed, peak }
    }

    fn current(&self) -> Option<f64> {
        self.current
    }

    fn finish(&mut self) -> RunSummary {
        let raw = std::mem::take(&mut self.history);
        let smoothed = moving_average(&raw, smoothing_window(self.frame_rate));
        let rate_bpm = if self.estimates.is_empty() {
            None
        } else {
            Some(self.estimates.iter().sum::<f64>() / self.estimates.len() as f64)
        };

        tracing::info!(
            samples = raw.len(),
            estimates = self.estimates.len(),
            window = self.buffer.capacity(),
            evicted = self.buffer.evicted(),
            rate = ?rate_bpm,
            "spectral analysis complete"
        );

        RunSummary {
            variant: Variant::Intensity,
            frame_rate: self.frame_rate,
            spectrum: Spectrum::compute(&remove_bias(&raw), self.frame_rate),
            raw,
            smoothed,
            peaks: Vec::new(),
            estimates: self.estimates.clone(),
            rate_bpm,
        }
    }
}
