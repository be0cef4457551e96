use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "sealstore",
    about = "Envelope-encrypted key/value storage backed by the OS keychain",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Encrypt and store a value.
    Write { key: String, value: String },
    /// Print the value stored under a key.
    Read { key: String },
    /// Remove a key.
    Delete { key: String },
    /// Print the values of several keys as a JSON array.
    ReadAll {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Write a JSON object of entries; null values delete their key.
    WriteMap { json: String },
    /// Remove several keys.
    DeleteAll {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Invoke a named method with a JSON argument object, as a host would.
    Call {
        method: String,
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// Round-trip a health-check entry and report the available ciphers.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
