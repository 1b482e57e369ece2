pub mod config;
pub mod error;
pub mod quality;
pub mod types;

pub use config::{Config, Tuning};
pub use error::ThreadlineError;
pub use quality::*;
pub use types::*;
