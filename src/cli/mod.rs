//! CLI for operating a cache repository over JSON records
//!
//! Each invocation builds the repository from the layered configuration,
//! runs one operation, then drains any pending write-behind entries.

mod run;

pub use run::{build_repository, run};

use clap::{Parser, Subcommand};

/// Tiered cache - read/write-through caching over a backing store
#[derive(Debug, Parser)]
#[command(name = "tiered-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read one record
    Get { id: String },

    /// Read several records, missing ids are skipped
    GetMany {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Write a record from a JSON document
    Put {
        /// Record id, generated when omitted
        #[arg(long)]
        id: Option<String>,

        /// JSON payload
        data: String,
    },

    /// Evict records from the cache tiers
    Invalidate {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Evict every cache key matching a glob
    InvalidatePattern { glob: String },

    /// Evict every key owned by this cache
    InvalidateAll,

    /// Connect to the backing store and create its table if needed
    EnsureSchema,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_put() {
        let cli = Cli::try_parse_from(["tiered-cache", "put", "--id", "a", r#"{"n":1}"#]).unwrap();

        match cli.command {
            Command::Put { id, data } => {
                assert_eq!(id.as_deref(), Some("a"));
                assert_eq!(data, r#"{"n":1}"#);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(!cli.metrics);
    }

    #[test]
    fn test_parse_get_many_with_metrics() {
        let cli = Cli::try_parse_from(["tiered-cache", "get-many", "a", "b", "--metrics"]).unwrap();

        assert!(cli.metrics);
        assert!(matches!(cli.command, Command::GetMany { ids } if ids == vec!["a", "b"]));
    }

    #[test]
    fn test_ids_required() {
        assert!(Cli::try_parse_from(["tiered-cache", "invalidate"]).is_err());
        assert!(Cli::try_parse_from(["tiered-cache", "get-many"]).is_err());
    }
}
