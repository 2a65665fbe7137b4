mod error;
pub mod rte;

pub use error::{Errno, Result, check_rte_success, neg_code};
