pub mod agent;
pub mod config;
pub mod debate;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod intervention;
pub mod lobby;
pub mod log;
pub mod repetition;
pub mod roles;
pub mod sanitize;
pub mod transcript;
pub mod util;

pub use error::{Error, Result};
