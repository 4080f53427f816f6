use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "maestro-sync")]
#[command(about = "Keep a music library in sync with its folders", long_about = None)]
pub struct Cli {
    /// Configuration file name, without extension
    #[arg(short, long, default_value = "Maestro")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan enabled sources and reconcile them with the library
    Scan {
        /// Only scan the source with this name
        #[arg(short, long)]
        source: Option<String>,
        /// Never prompt; leave conflicts for the next scan
        #[arg(long)]
        defer: bool,
    },
    /// List configured sources
    Sources,
    /// Add a source and save the configuration
    AddSource {
        name: String,
        path: PathBuf,
        #[arg(long, default_value = "music")]
        domain: String,
        /// Allowed extensions, comma separated
        #[arg(long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,
    },
    /// Remove a source and save the configuration
    RemoveSource { name: String },
    /// Print the audio fingerprint of a file
    Fingerprint { path: PathBuf },
    /// Print configuration values
    PrintConfig,
}
