//! Filtering of low-information features before multiple-testing adjustment

mod independent;

pub use independent::{independent_filtering, FilterOutcome};
