pub mod args;

use clap::Parser;

pub use args::{Arguments, Instrument};

pub fn parse() -> Arguments {
    Arguments::parse()
}
