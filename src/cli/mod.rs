mod clean;
mod describe;
mod extract;
mod import;
mod merge;
mod sample;

pub use clean::*;
pub use describe::*;
pub use extract::*;
pub use import::*;
pub use merge::*;
pub use sample::*;

use clap::ValueEnum;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
