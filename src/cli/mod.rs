pub mod args;
pub mod commands;

pub use args::{Cli, Commands, ViewKind};
pub use commands::run;
