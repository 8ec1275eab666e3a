//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Hostname or address of the acquisition front end
    #[clap(short = 'H', long, default_value = "localhost")]
    pub host: String,
    /// Port of the device command socket
    #[clap(long, default_value_t = crate::COMMAND_PORT)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub command_port: u16,
    /// Port of the device data socket
    #[clap(long, default_value_t = crate::DATA_PORT)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub data_port: u16,
    /// Where to write the raw session file
    #[clap(short, long)]
    pub output: PathBuf,
    /// Overwrite an existing output file without asking
    #[clap(short, long)]
    pub force: bool,
    /// Decode and fan out only, never touch the disk
    #[clap(long)]
    pub no_write: bool,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}
