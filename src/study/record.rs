//! One row of the study output

/// FDP of one (repetition, delta, q) triple.
///
/// Only `delta`, `rep`, `q` and `fdp` are persisted; the rejection counts are
/// diagnostics of the run that produced the record.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub delta: f64,
    /// 0-based repetition index
    pub rep: usize,
    pub q: f64,
    pub fdp: f64,
    pub n_rejected: usize,
    pub n_false: usize,
}

impl ResultRecord {
    /// The persisted tuple
    pub fn key(&self) -> (f64, usize, f64, f64) {
        (self.delta, self.rep, self.q, self.fdp)
    }
}
