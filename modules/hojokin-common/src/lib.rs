pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, SearchEngine};
pub use error::HojokinError;
pub use types::*;
