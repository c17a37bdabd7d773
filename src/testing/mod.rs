//! Statistical testing: Wald statistics and multiple-testing adjustment

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::wald_pvalue;
pub use wald::{wald_test, WaldResults};
