pub mod cli;
pub mod load_config;
pub mod notion;
pub mod wordpress;

pub use cli::{run, Cli, Commands};
