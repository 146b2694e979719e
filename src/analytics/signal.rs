/// Moving-average window for a frame rate: a quarter second of samples,
/// bumped to the next odd length so it stays centred.
pub fn smoothing_window(frame_rate: f64) -> usize {
    let window = (frame_rate / 4.0).round().max(1.0) as usize;
    if window % 2 == 0 {
        window + 1
    } else {
        window
    }
}

/// Simple moving average over full windows only. The output is
/// `len - window + 1` long and empty when the input is shorter than the
/// window; edges are dropped, not padded.
pub fn moving_average(samples: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || samples.len() < window {
        return Vec::new();
    }

    let scale = 1.0 / window as f64;
    let mut sum: f64 = samples[..window].iter().sum();
    let mut out = Vec::with_capacity(samples.len() - window + 1);
    out.push(sum * scale);
    for i in window..samples.len() {
        sum += samples[i] - samples[i - window];
        out.push(sum * scale);
    }
    out
}

/// Subtracts the arithmetic mean from every sample.
pub fn remove_bias(samples: &[f64]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter().map(|s| s - mean).collect()
}
