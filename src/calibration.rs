//! Baseline calibration: sample confidences over a neutral face and derive
//! a personalised threshold from their mean.

use std::thread;
use std::time::Duration;

/// Upper bound of a calibrated threshold (percent)
pub const MAX_THRESHOLD: f64 = 95.0;

/// Outcome of a successful calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    /// Mean confidence over the collected samples
    pub mean: f64,
    pub threshold: f64,
    /// Number of usable samples
    pub samples: usize,
}

/// Derives the threshold from the collected samples.
///
/// Returns `None` when no sample was collected or the margin is not a
/// finite number. The threshold is `mean + margin` clamped to
/// `[0, MAX_THRESHOLD]`.
pub fn derive_threshold(samples: &[f64], margin: f64) -> Option<Baseline> {
    if samples.is_empty() || !margin.is_finite() {
        return None;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let threshold = (mean + margin).clamp(0.0, MAX_THRESHOLD);
    Some(Baseline {
        mean,
        threshold,
        samples: samples.len(),
    })
}

/// Takes `frames` readings from `sample`, pausing `spacing` between them.
///
/// Readings that produced no result are dropped. `progress` is told the
/// index of each attempt and how many usable samples exist so far.
pub fn collect_samples<S, P>(
    frames: usize,
    spacing: Duration,
    mut sample: S,
    mut progress: P,
) -> Vec<f64>
where
    S: FnMut() -> Option<f64>,
    P: FnMut(usize, usize),
{
    let mut samples = Vec::with_capacity(frames);
    for attempt in 0..frames {
        if let Some(confidence) = sample() {
            samples.push(confidence);
        }
        progress(attempt + 1, samples.len());
        if attempt + 1 < frames && !spacing.is_zero() {
            thread::sleep(spacing);
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_mean_plus_margin() {
        let baseline = derive_threshold(&[10.0, 20.0, 30.0], 15.0).unwrap();
        assert_eq!(baseline.mean, 20.0);
        assert_eq!(baseline.threshold, 35.0);
        assert_eq!(baseline.samples, 3);
    }

    #[test]
    fn threshold_is_clamped_to_max() {
        let baseline = derive_threshold(&[50.0], 90.0).unwrap();
        assert_eq!(baseline.threshold, MAX_THRESHOLD);
    }

    #[test]
    fn threshold_never_goes_negative() {
        let baseline = derive_threshold(&[5.0], -20.0).unwrap();
        assert_eq!(baseline.threshold, 0.0);
    }

    #[test]
    fn non_finite_margin_no_baseline() {
        assert_eq!(derive_threshold(&[10.0, 20.0], f64::NAN), None);
        assert_eq!(derive_threshold(&[10.0], f64::NEG_INFINITY), None);
    }

    #[test]
    fn no_samples_no_baseline() {
        assert_eq!(derive_threshold(&[], 15.0), None);
    }

    #[test]
    fn collect_drops_failed_reads() {
        let mut readings = vec![Some(10.0), None, Some(30.0), None].into_iter();
        let mut reports = Vec::new();

        let samples = collect_samples(
            4,
            Duration::ZERO,
            || readings.next().flatten(),
            |attempt, usable| reports.push((attempt, usable)),
        );

        assert_eq!(samples, vec![10.0, 30.0]);
        assert_eq!(reports, vec![(1, 1), (2, 1), (3, 2), (4, 2)]);
    }
}
