//! Reading and writing the per-record result table

mod results;

pub use results::{read_records, read_records_from, write_records, write_records_to, RESULT_HEADER};
