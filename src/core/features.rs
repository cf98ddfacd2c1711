//! Statistical and spectral features of accelerometer windows.
//!
//! Each axis of a window yields nine scalars; the three axes together form a
//! dense 27-value feature vector. Extraction is a pure function of the input.

use crate::core::windowing::Window;
use crate::source::types::{Axis, Sample, MAX_AXIS_MAGNITUDE};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

/// Number of features per axis.
pub const FEATURES_PER_AXIS: usize = 9;

/// Number of features per window.
pub const FEATURE_COUNT: usize = FEATURES_PER_AXIS * 3;

/// Column suffixes in output order.
pub const FEATURE_SUFFIXES: [&str; FEATURES_PER_AXIS] = [
    "mean",
    "variance",
    "median",
    "min",
    "max",
    "rms",
    "skew",
    "kurtosis",
    "FFT_variance",
];

/// Kurtosis suffix as spelled by existing training tables.
const LEGACY_KURTOSIS_SUFFIX: &str = "Kurtiosis";

/// Relative variance below which higher moments are treated as undefined.
const MOMENT_RESOLUTION: f64 = 1e-15;

/// Column naming style for feature vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureNaming {
    /// `x_kurtosis`
    #[default]
    Normalized,
    /// `x_Kurtiosis`, for consumers trained on the historical column set
    Legacy,
}

/// Features of one axis of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisFeatures {
    pub mean: f64,
    /// Population variance (divisor n)
    pub variance: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Root mean square
    pub rms: f64,
    /// Biased third standardized moment
    pub skew: f64,
    /// Biased excess kurtosis (fourth standardized moment minus 3)
    pub kurtosis: f64,
    /// Population variance of the DFT magnitude spectrum
    pub fft_variance: f64,
}

impl AxisFeatures {
    /// Values in [`FEATURE_SUFFIXES`] order.
    pub fn values(&self) -> [f64; FEATURES_PER_AXIS] {
        [
            self.mean,
            self.variance,
            self.median,
            self.min,
            self.max,
            self.rms,
            self.skew,
            self.kurtosis,
            self.fft_variance,
        ]
    }
}

/// The 27-value feature vector of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub x: AxisFeatures,
    pub y: AxisFeatures,
    pub z: AxisFeatures,
}

impl FeatureVector {
    /// Features of one axis.
    pub fn axis(&self, axis: Axis) -> &AxisFeatures {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    /// All values, axis-major, in column order.
    pub fn values(&self) -> Vec<f64> {
        Axis::ALL
            .iter()
            .flat_map(|&axis| self.axis(axis).values())
            .collect()
    }

    /// Column names matching [`values`](Self::values).
    pub fn names(naming: FeatureNaming) -> Vec<String> {
        Axis::ALL
            .iter()
            .flat_map(|axis| {
                FEATURE_SUFFIXES.iter().map(move |suffix| {
                    let suffix = match (naming, *suffix) {
                        (FeatureNaming::Legacy, "kurtosis") => LEGACY_KURTOSIS_SUFFIX,
                        _ => suffix,
                    };
                    format!("{}_{}", axis.prefix(), suffix)
                })
            })
            .collect()
    }

    /// `(name, value)` pairs in column order.
    pub fn named_values(&self, naming: FeatureNaming) -> Vec<(String, f64)> {
        Self::names(naming).into_iter().zip(self.values()).collect()
    }

    /// Whether every value is finite.
    pub fn is_finite(&self) -> bool {
        self.values().iter().all(|v| v.is_finite())
    }
}

/// Compute the feature vector of a window.
pub fn compute_features(window: &Window) -> FeatureVector {
    FeatureVector {
        x: compute_axis_features(&window.axis_values(Axis::X)),
        y: compute_axis_features(&window.axis_values(Axis::Y)),
        z: compute_axis_features(&window.axis_values(Axis::Z)),
    }
}

/// Compute the feature vector of a non-empty run of samples.
pub fn compute_sample_features(samples: &[Sample]) -> FeatureVector {
    let axis = |axis: Axis| {
        let values: Vec<f64> = samples.iter().map(|s| s.axis(axis)).collect();
        compute_axis_features(&values)
    };

    FeatureVector {
        x: axis(Axis::X),
        y: axis(Axis::Y),
        z: axis(Axis::Z),
    }
}

/// Compute the nine features of one axis.
///
/// An empty input yields all zeros; windows are never empty in practice.
/// Values are finite for inputs within [`MAX_AXIS_MAGNITUDE`], the bound the
/// sample source enforces; the fourth moment overflows beyond roughly 1e75.
pub fn compute_axis_features(values: &[f64]) -> AxisFeatures {
    if values.is_empty() {
        return AxisFeatures::default();
    }

    let mean = values.iter().mean();
    let (skew, kurtosis) = standardized_moments(values, mean);

    AxisFeatures {
        mean,
        variance: values.iter().population_variance(),
        median: Data::new(values.to_vec()).median(),
        min: Statistics::min(values.iter()),
        max: Statistics::max(values.iter()),
        rms: values.iter().quadratic_mean(),
        skew,
        kurtosis,
        fft_variance: fft_magnitude_variance(values),
    }
}

/// Biased skewness and excess kurtosis, `m3 / m2^1.5` and `m4 / m2^2 - 3`.
///
/// Both are 0 when the central second moment vanishes (single sample or
/// constant window).
fn standardized_moments(values: &[f64], mean: f64) -> (f64, f64) {
    let n = values.len() as f64;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for &v in values {
        let d = v - mean;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    m2 /= n;
    m3 /= n;
    m4 /= n;

    if m2 <= (MOMENT_RESOLUTION * mean).powi(2) {
        return (0.0, 0.0);
    }
    (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
}

/// Population variance of `|DFT(values)|` over exactly `values.len()` points.
fn fft_magnitude_variance(values: &[f64]) -> f64 {
    let mut buffer: Vec<Complex<f64>> = values.iter().map(|&v| Complex::new(v, 0.0)).collect();
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(buffer.len()).process(&mut buffer);

    let magnitudes: Vec<f64> = buffer.iter().map(|c| c.norm()).collect();
    magnitudes.iter().population_variance()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn window(values: &[(f64, f64, f64)]) -> Window {
        Window {
            device_id: "D1".to_string(),
            window_start_ms: 0,
            samples: values
                .iter()
                .enumerate()
                .map(|(i, &(x, y, z))| Sample::new("D1", i as i64 * 40, x, y, z))
                .collect(),
        }
    }

    #[test]
    fn test_basic_statistics() {
        let f = compute_axis_features(&[1.0, 2.0, 3.0, 4.0]);
        assert!(close(f.mean, 2.5));
        assert!(close(f.variance, 1.25));
        assert!(close(f.median, 2.5));
        assert_eq!(f.min, 1.0);
        assert_eq!(f.max, 4.0);
        assert!(close(f.rms, 7.5_f64.sqrt()));
        // Symmetric data has no skew.
        assert!(close(f.skew, 0.0));
        // Uniform four points: m4 / m2^2 = 2.5625 / 1.5625.
        assert!(close(f.kurtosis, 2.5625 / 1.5625 - 3.0));
    }

    #[test]
    fn test_odd_median() {
        let f = compute_axis_features(&[5.0, -1.0, 3.0]);
        assert_eq!(f.median, 3.0);
    }

    #[test]
    fn test_skewness_sign_and_value() {
        // Deviations from mean 1: -1, -1, 2 -> m2 = 2, m3 = 2.
        let f = compute_axis_features(&[0.0, 0.0, 3.0]);
        assert!(close(f.skew, 2.0 / 2.0_f64.powf(1.5)));
        assert!(f.skew > 0.0);
    }

    #[test]
    fn test_single_sample_is_degenerate_but_dense() {
        let f = compute_axis_features(&[-0.75]);
        assert_eq!(f.mean, -0.75);
        assert_eq!(f.median, -0.75);
        assert_eq!(f.min, -0.75);
        assert_eq!(f.max, -0.75);
        assert_eq!(f.rms, 0.75);
        assert_eq!(f.variance, 0.0);
        assert_eq!(f.skew, 0.0);
        assert_eq!(f.kurtosis, 0.0);
        assert_eq!(f.fft_variance, 0.0);
    }

    #[test]
    fn test_constant_window_has_zero_moments() {
        let f = compute_axis_features(&[0.3; 16]);
        assert_eq!(f.skew, 0.0);
        assert_eq!(f.kurtosis, 0.0);
        assert!(f.variance.abs() < 1e-20);
    }

    #[test]
    fn test_fft_variance_of_impulse_is_zero() {
        // Flat magnitude spectrum.
        let f = compute_axis_features(&[1.0, 0.0, 0.0, 0.0]);
        assert!(close(f.fft_variance, 0.0));
    }

    #[test]
    fn test_fft_variance_of_constant_signal() {
        // Spectrum magnitudes [4, 0, 0, 0]: mean 1, variance (9 + 1 + 1 + 1) / 4.
        let f = compute_axis_features(&[1.0, 1.0, 1.0, 1.0]);
        assert!(close(f.fft_variance, 3.0));
    }

    #[test]
    fn test_fft_uses_exact_length_without_padding() {
        // Odd length, checked against a direct DFT.
        let values = [2.0, 1.0, 0.0];
        let n = values.len();
        let mags: Vec<f64> = (0..n)
            .map(|k| {
                let (mut re, mut im) = (0.0, 0.0);
                for (t, v) in values.iter().enumerate() {
                    let angle = -2.0 * std::f64::consts::PI * (k * t) as f64 / n as f64;
                    re += v * angle.cos();
                    im += v * angle.sin();
                }
                (re * re + im * im).sqrt()
            })
            .collect();
        let mean = mags.iter().sum::<f64>() / n as f64;
        let expected = mags.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n as f64;

        let f = compute_axis_features(&values);
        assert!(close(f.fft_variance, expected));
    }

    #[test]
    fn test_vector_has_27_finite_values() {
        let w = window(&[(0.1, -0.2, 9.8), (0.3, -0.1, 9.7), (0.2, 0.0, 9.9)]);
        let features = compute_features(&w);
        let values = features.values();
        assert_eq!(values.len(), FEATURE_COUNT);
        assert!(features.is_finite());
        assert_eq!(features.z.max, 9.9);
    }

    #[test]
    fn test_extreme_accepted_values_stay_finite() {
        let m = MAX_AXIS_MAGNITUDE;
        let values = [m, -m, 0.3 * m, -0.9 * m, m];
        let f = compute_axis_features(&values);
        assert!(f.values().iter().all(|v| v.is_finite()), "{f:?}");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let w = window(&[(0.11, 0.5, 1.0), (0.7, -0.25, 0.9), (-0.3, 0.1, 1.1), (0.05, 0.0, 1.0)]);
        let a = compute_features(&w);
        let b = compute_features(&w.clone());
        let bits = |f: &FeatureVector| f.values().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_feature_names() {
        let names = FeatureVector::names(FeatureNaming::Normalized);
        assert_eq!(names.len(), FEATURE_COUNT);
        assert_eq!(names[0], "x_mean");
        assert_eq!(names[7], "x_kurtosis");
        assert_eq!(names[8], "x_FFT_variance");
        assert_eq!(names[26], "z_FFT_variance");

        let legacy = FeatureVector::names(FeatureNaming::Legacy);
        assert_eq!(legacy[7], "x_Kurtiosis");
        assert_eq!(legacy[16], "y_Kurtiosis");
        assert_eq!(legacy[0], "x_mean");
    }

    #[test]
    fn test_named_values_pair_up() {
        let w = window(&[(1.0, 2.0, 3.0)]);
        let pairs = compute_features(&w).named_values(FeatureNaming::Normalized);
        assert_eq!(pairs[9], ("y_mean".to_string(), 2.0));
        assert_eq!(pairs[18], ("z_mean".to_string(), 3.0));
    }
}
