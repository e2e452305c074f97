pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::Config;
pub use error::{AccessError, Result};
pub use logging::setup_logging;
pub use paths::Paths;
