use rustfft::{num_complex::Complex, FftPlanner};

/// One-sided magnitude spectrum of a real signal.
#[derive(Debug, Clone, Default)]
pub struct Spectrum {
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

impl Spectrum {
    /// Real DFT of `signal`: bins `0..=n/2`, bin `k` at `k * sample_rate / n` Hz.
    pub fn compute(signal: &[f64], sample_rate: f64) -> Self {
        let n = signal.len();
        if n == 0 || sample_rate <= 0.0 {
            return Self::default();
        }

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
        fft.process(&mut buffer);

        let bins = n / 2 + 1;
        let resolution = sample_rate / n as f64;
        Self {
            frequencies_hz: (0..bins).map(|k| k as f64 * resolution).collect(),
            magnitudes: buffer.iter().take(bins).map(|c| c.norm()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Frequency of the strongest bin inside `[min_hz, max_hz]`; the earliest
    /// bin wins a tie. `None` when no bin falls inside the band.
    pub fn dominant_in_band(&self, min_hz: f64, max_hz: f64) -> Option<f64> {
        let mut best: Option<(f64, f64)> = None;
        for (&freq, &mag) in self.frequencies_hz.iter().zip(&self.magnitudes) {
            if freq < min_hz || freq > max_hz {
                continue;
            }
            match best {
                Some((_, best_mag)) if mag <= best_mag => {}
                _ => best = Some((freq, mag)),
            }
        }
        best.map(|(freq, _)| freq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sine(freq_hz: f64, sample_rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq_hz * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn bins_follow_rfft_layout() {
        let spectrum = Spectrum::compute(&[0.0; 10], 30.0);
        assert_eq!(spectrum.frequencies_hz.len(), 6);
        assert_relative_eq!(spectrum.frequencies_hz[1], 3.0);
        assert_relative_eq!(spectrum.frequencies_hz[5], 15.0);

        let odd = Spectrum::compute(&[0.0; 9], 30.0);
        assert_eq!(odd.frequencies_hz.len(), 5);
    }

    #[test]
    fn sinusoid_lands_within_one_bin() {
        let sample_rate = 30.0;
        for (freq, n) in [(1.0, 150), (1.5, 150), (2.3, 120), (3.7, 90), (1.2, 75)] {
            let spectrum = Spectrum::compute(&sine(freq, sample_rate, n), sample_rate);
            let found = spectrum.dominant_in_band(1.0, 4.0).unwrap();
            let bin_width = sample_rate / n as f64;
            assert!(
                (found - freq).abs() <= bin_width,
                "f={freq} n={n} found={found}"
            );
        }
    }

    #[test]
    fn no_bin_in_band() {
        // 4 samples at 30 Hz: bins at 0, 7.5 and 15 Hz
        let spectrum = Spectrum::compute(&[1.0, -1.0, 1.0, -1.0], 30.0);
        assert_eq!(spectrum.dominant_in_band(1.0, 4.0), None);
        assert_eq!(Spectrum::compute(&[], 30.0).dominant_in_band(1.0, 4.0), None);
    }
}
