pub mod runtime_logger;
pub mod subscriber;

pub use runtime_logger::{RuntimeLogger, RuntimeLoggerConfig};
