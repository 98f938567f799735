//! CLI definition and argument parsing for the portcullis admin client.

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "portcullis", author, version, about = "Portcullis admin CLI")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[non_exhaustive]
pub enum Commands {
    /// Check that the daemon is reachable
    Ping,

    /// Validate a policy file without installing it
    Validate(PolicyFileArgs),

    /// Compile and install a policy
    Apply(PolicyFileArgs),

    /// Re-install the previously applied policy
    Rollback,

    /// Remove every installed filter
    Teardown,

    /// Re-install the persisted Last-Known-Good policy
    RevertLkg,

    /// Set or clear the hot-reload watch target
    Watch(WatchArgs),

    /// Show the current watch target
    WatchStatus,

    /// Show the persisted Last-Known-Good policy
    GetLkg {
        /// Include the full policy body, not just the version
        #[arg(long)]
        full: bool,
    },

    /// Show recent audit journal entries
    Logs {
        /// Number of most recent entries to show
        #[arg(long, default_value_t = 50)]
        tail: usize,
    },
}

#[derive(Args, Debug)]
pub struct PolicyFileArgs {
    /// Path to a JSON policy document
    pub path: std::path::PathBuf,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Path to watch for hot-reload, or omit to stop watching
    pub path: Option<std::path::PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Control socket name
    #[arg(long, global = true, default_value = "portcullis-control")]
    pub socket: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
