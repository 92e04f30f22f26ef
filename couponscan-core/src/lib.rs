pub mod config;
pub mod settle;
pub mod types;

pub use config::*;
pub use settle::*;
pub use types::*;
