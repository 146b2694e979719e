/// Local maxima of `signal` at least `min_distance` samples apart.
///
/// A flat top counts once, at its middle sample. The first and last samples
/// are never peaks. Where two maxima are too close the higher one is kept,
/// ties going to the earlier one.
pub fn find_peaks(signal: &[f64], min_distance: f64) -> Vec<usize> {
    let candidates = local_maxima(signal);
    if min_distance <= 1.0 || candidates.len() < 2 {
        return candidates;
    }

    // Visit candidates from highest to lowest; a kept peak suppresses
    // every lower candidate within reach.
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        signal[candidates[b]]
            .total_cmp(&signal[candidates[a]])
            .then(a.cmp(&b))
    });

    let mut keep = vec![true; candidates.len()];
    for &i in &order {
        if !keep[i] {
            continue;
        }
        let peak = candidates[i] as f64;

        for j in (0..i).rev() {
            if peak - candidates[j] as f64 >= min_distance {
                break;
            }
            keep[j] = false;
        }
        for j in i + 1..candidates.len() {
            if candidates[j] as f64 - peak >= min_distance {
                break;
            }
            keep[j] = false;
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(idx, kept)| kept.then_some(idx))
        .collect()
}

fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if signal.len() < 3 {
        return peaks;
    }

    let last = signal.len() - 1;
    let mut i = 1;
    while i < last {
        if signal[i - 1] < signal[i] {
            // walk across a plateau
            let mut ahead = i + 1;
            while ahead < last && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Cycles per minute from peak positions: `60 * (n - 1) / span_seconds`,
/// using only the first and last peaks. `None` below two peaks.
pub fn rate_from_peaks(peaks: &[usize], sample_rate: f64) -> Option<f64> {
    let (&first, &last) = (peaks.first()?, peaks.last()?);
    if peaks.len() < 2 || last <= first || sample_rate <= 0.0 {
        return None;
    }
    let span_secs = (last - first) as f64 / sample_rate;
    Some(60.0 * (peaks.len() - 1) as f64 / span_secs)
}
