//! # Cli
//!
//! This module contains everything needed for parsing the CLI arguments for
//! the `paws` interpreter.

use clap::{Parser, ValueEnum};

/// Struct containing the CLI configuration for paws.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Execute a file; use `-` to read the program from stdin. Can be
    /// passed multiple times, the files run in order on the same context.
    #[arg(short = 'f', value_name = "FILE")]
    pub files: Vec<String>,

    /// Enter the interactive shell after all files have run.
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Specify the log level of the interpreter.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

/// Enum for specifying the log level of paws.
#[derive(ValueEnum, Clone, Default, Debug)]
pub enum LogLevel {
    /// The default log level. Only critical errors will be logged.
    #[default]
    #[value(alias("0"))]
    Error,

    /// Also log warnings.
    #[value(alias("1"))]
    Warn,

    /// Log information about the general state of the interpreter.
    #[value(alias("2"))]
    Info,

    /// Log everything which happens internally in the interpreter.
    #[value(alias("3"))]
    Debug,

    /// Log extra information.
    #[value(alias("4"))]
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
