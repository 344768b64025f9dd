pub mod commands;
pub mod output;

use crate::errors::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pstk")]
#[command(about = "Patchstack - a stack of editable patches on top of a git branch")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start managing a patch stack on the current branch
    Init,

    /// Create a new empty patch on top of the stack
    New {
        /// Patch name (derived from the message if omitted)
        name: Option<String>,

        /// Commit message of the patch
        #[arg(long, short)]
        message: String,
    },

    /// Record working tree changes in the top patch
    Refresh {
        /// Replace the patch message
        #[arg(long, short)]
        message: Option<String>,
    },

    /// List the patches of the stack
    Series {
        /// Include hidden patches
        #[arg(long, short)]
        all: bool,
    },

    /// Push unapplied patches onto the stack
    Push {
        /// Patches to push, in order (defaults to the next unapplied patch)
        names: Vec<String>,

        /// Number of patches to push
        #[arg(long, short, default_value_t = 1)]
        number: usize,

        /// Push every unapplied patch
        #[arg(long, short, conflicts_with_all = ["names", "number"])]
        all: bool,

        #[command(flatten)]
        checkout: CheckoutArgs,
    },

    /// Pop applied patches off the stack
    Pop {
        /// Patches to pop (defaults to the top patch)
        names: Vec<String>,

        /// Number of patches to pop
        #[arg(long, short, default_value_t = 1)]
        number: usize,

        /// Pop every applied patch
        #[arg(long, short, conflicts_with_all = ["names", "number"])]
        all: bool,

        #[command(flatten)]
        checkout: CheckoutArgs,
    },

    /// Push or pop patches until the given one is on top
    Goto {
        name: String,

        #[command(flatten)]
        checkout: CheckoutArgs,
    },

    /// Hide patches from the series
    Hide {
        #[arg(required = true)]
        names: Vec<String>,

        #[command(flatten)]
        checkout: CheckoutArgs,
    },

    /// Make hidden patches unapplied again
    Unhide {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show the transaction log of the stack
    Log {
        /// Maximum number of entries
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Bring the branch and the stack back in agreement
    Repair {
        /// Move a rewritten branch back to the stack head
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Copy, clap::Args)]
pub struct CheckoutArgs {
    /// Overwrite local changes in the working tree
    #[arg(long)]
    pub discard_local_changes: bool,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Set a configuration value
    Set { key: String, value: String },

    /// Get a configuration value
    Get { key: String },

    /// List all configuration values
    List,
}

/// How a successful command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// The command stopped on a conflict that needs the user
    Conflict,
}

impl From<CommandStatus> for ExitCode {
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Success => ExitCode::SUCCESS,
            CommandStatus::Conflict => ExitCode::from(1),
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<CommandStatus> {
        // Set up logging based on verbosity
        self.setup_logging();

        match self.command {
            Commands::Init => commands::init::run().await,
            Commands::New { name, message } => commands::patch::new(name, message).await,
            Commands::Refresh { message } => commands::patch::refresh(message).await,
            Commands::Series { all } => commands::series::show(all).await,
            Commands::Push {
                names,
                number,
                all,
                checkout,
            } => commands::series::push(names, number, all, checkout).await,
            Commands::Pop {
                names,
                number,
                all,
                checkout,
            } => commands::series::pop(names, number, all, checkout).await,
            Commands::Goto { name, checkout } => commands::series::goto(name, checkout).await,
            Commands::Hide { names, checkout } => commands::series::hide(names, checkout).await,
            Commands::Unhide { names } => commands::series::unhide(names).await,
            Commands::Log { limit } => commands::log::run(limit).await,
            Commands::Repair { force } => commands::repair::run(force).await,
            Commands::Config { action } => commands::config::run(action).await,
        }
    }

    fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        };

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .without_time();

        if self.no_color {
            console::set_colors_enabled(false);
            subscriber.with_ansi(false).init();
        } else {
            subscriber.init();
        }
    }
}
