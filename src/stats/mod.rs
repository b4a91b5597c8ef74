//! Statistics kernels.
//!
//! Every function in this module tree is pure and deterministic: given the
//! same samples it always returns the same answer, and it never panics on
//! degenerate input (empty slices, zero variance, all-equal samples). Callers
//! that need a neutral fallback instead of an error get one here; jobs built
//! on top of these kernels decide what "neutral" means for their own logic
//! (usually: skip the group).

pub mod bh;
pub mod corr;
pub mod dist;
pub mod drift;
pub mod quantile;
pub mod timeseries;
pub mod ttest;

pub use bh::benjamini_hochberg;
pub use corr::{pearson, sample_stddev, sharpe, t_stat_of_mean};
pub use drift::{population_stability_index, wasserstein_1d, DriftSeverity};
pub use quantile::{iqr_bounds, mad, quantile, robust_z_score};
pub use timeseries::{cusum, ewma};
pub use ttest::{welch_t_test, WelchResult};
