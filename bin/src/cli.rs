//! Parse from either cli or env var

/// the default path to config
pub static DEFAULT_CONFIG_PATH: &str = "/etc/confkeeper/config.yaml";
/// tokio worker thread name
pub static DEFAULT_THREAD_NAME: &str = "confkeeper-worker";
/// default log level. Can use this argument or CONFKEEPER_LOG env var
pub const DEFAULT_CONFKEEPER_LOG: &str = "info";
/// log as "json", "pretty" or "standard" (unstructured)
pub static DEFAULT_LOG_FORMAT: &str = "standard";

use std::path::PathBuf;

pub use clap::Parser;
use clap::Subcommand;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, name = "confkeeper", bin_name = "confkeeper", about, long_about = None)]
/// parses from cli & environment var. confkeeper will load `.env` in the working dir as well
pub struct Config {
    /// path to the coordinator config
    #[clap(
        short,
        long,
        value_parser,
        env,
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config_path: PathBuf,
    /// collection to resolve, overrides the config file
    #[clap(long, env, value_parser)]
    pub collection: Option<String>,
    /// address to register under, overrides the config file and the local host name
    #[clap(long, env, value_parser)]
    pub host_address: Option<String>,
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[clap(long, env = "CONFKEEPER_LOG", value_parser, default_value = DEFAULT_CONFKEEPER_LOG)]
    pub log: String,
    /// log output format: standard, json or pretty
    #[clap(long, env = "LOG_FORMAT", value_parser, default_value = DEFAULT_LOG_FORMAT)]
    pub log_format: String,
    /// Worker thread name
    #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
    pub thread_name: String,
    /// number of worker threads, defaults to logical CPU count
    #[clap(long, env, value_parser)]
    pub threads: Option<usize>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// print the bundle the collection resolves to
    Resolve,
    /// write a file from the resolved bundle to stdout
    Get {
        /// file name inside the bundle
        file: String,
    },
    /// print whether a path exists; exits with 1 when it does not
    Exists {
        /// absolute path in the coordination tree
        path: String,
    },
}
