pub mod log_safe;

pub use log_safe::LOG_SAFE;
