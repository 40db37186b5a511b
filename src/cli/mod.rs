pub mod commands;
pub mod context;
pub mod output;
pub mod prompt;

use crate::errors::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "gf")]
#[command(about = "graft - stacked branches on top of git")]
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

    /// Never prompt; questions are answered with their safe default
    #[arg(long, global = true)]
    pub no_interactive: bool,
}

/// Which part of the stack around a branch a command acts on
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScopeArg {
    /// Only the branch itself
    Branch,
    /// The branch and its ancestors down to trunk
    Downstack,
    /// The branch and its descendants
    Upstack,
    /// Ancestors, the branch and descendants
    #[default]
    Stack,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize graft in this repository
    Init {
        /// Trunk branch (defaults to main or master)
        #[arg(long)]
        trunk: Option<String>,

        /// Remote to push to and fetch from
        #[arg(long)]
        remote: Option<String>,

        /// Forget every recorded parent
        #[arg(long)]
        reset: bool,
    },

    /// Start tracking a branch on a parent
    Track {
        /// Branch to track (defaults to the current branch)
        branch: Option<String>,

        /// Parent branch
        #[arg(long, short)]
        parent: Option<String>,
    },

    /// Stop tracking a branch
    Untrack {
        /// Branch to untrack (defaults to the current branch)
        branch: Option<String>,
    },

    /// Create a branch on top of the current one
    Create {
        /// Branch name (derived from the message when omitted)
        name: Option<String>,

        /// Commit message for the staged changes
        #[arg(long, short)]
        message: Option<String>,

        /// Stage all changes first
        #[arg(long, short)]
        all: bool,
    },

    /// Switch to a branch
    #[command(alias = "co")]
    Checkout {
        /// Branch to check out (prompts when omitted)
        branch: Option<String>,

        /// Discard local changes
        #[arg(long, short)]
        force: bool,
    },

    /// Rename the current branch
    Rename {
        /// New branch name
        name: String,
    },

    /// Fold the current branch into its parent
    Fold {
        /// Keep the current branch's name instead of the parent's
        #[arg(long, short)]
        keep: bool,
    },

    /// Delete a branch, handing its children to its parent
    Delete {
        /// Branch to delete (defaults to the current branch)
        branch: Option<String>,

        /// Delete even if the branch is not merged into trunk
        #[arg(long, short)]
        force: bool,
    },

    /// Delete the current branch, leaving its changes unstaged on its parent
    Unbranch,

    /// Split the current branch into a chain of branches
    Split {
        /// Names of the new branches, parent side first
        #[arg(long = "name", required = true)]
        names: Vec<String>,

        /// Commits back from the tip where each branch ends, tip first (0 is the tip)
        #[arg(long = "at", required = true)]
        points: Vec<usize>,
    },

    /// Collapse the current branch's commits into one
    Squash {
        /// Message for the squashed commit
        #[arg(long, short)]
        message: Option<String>,

        /// Keep the oldest commit's message
        #[arg(long)]
        no_edit: bool,
    },

    /// Interactively rebase the current branch's own commits, then restack above it
    Edit,

    /// Move a branch onto a new parent
    Move {
        /// New parent
        #[arg(long, short)]
        onto: String,

        /// Branch to move (defaults to the current branch)
        #[arg(long)]
        source: Option<String>,
    },

    /// Rebase branches onto their parents' current revisions
    Restack {
        /// Branch to start from (defaults to the current branch)
        branch: Option<String>,

        #[arg(long, value_enum, default_value_t = ScopeArg::Stack)]
        scope: ScopeArg,
    },

    /// Continue after resolving a rebase conflict
    Continue,

    /// Abort the interrupted rebase and forget the pending work
    Abort,

    /// Fetch a branch and its downstack from the remote
    Get {
        /// Branch to fetch
        branch: String,

        /// Overwrite local copies without asking
        #[arg(long, short)]
        force: bool,
    },

    /// Show the branch tree
    #[command(alias = "ls")]
    Log {
        /// Include untracked branches
        #[arg(long, short)]
        all: bool,
    },

    /// Show details about a branch
    Info {
        /// Branch (defaults to the current branch)
        branch: Option<String>,

        /// Print the branch's diff
        #[arg(long, short)]
        diff: bool,
    },

    /// Push branches and create or update their pull requests
    Submit {
        /// Branch to start from (defaults to the current branch)
        branch: Option<String>,

        #[arg(long, value_enum, default_value_t = ScopeArg::Downstack)]
        scope: ScopeArg,

        /// Open new pull requests as drafts
        #[arg(long)]
        draft: bool,

        /// Only report what would be submitted
        #[arg(long)]
        dry_run: bool,

        /// Only update branches that already have a pull request
        #[arg(long)]
        update_only: bool,

        /// Push with --force and update unchanged pull requests
        #[arg(long, short)]
        force: bool,
    },

    /// Pull request helpers
    Pr {
        #[command(subcommand)]
        action: PrAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum PrAction {
    /// Refresh pull request info from the review service
    Sync {
        /// Every tracked branch instead of the current stack
        #[arg(long, short)]
        all: bool,
    },

    /// Open a branch's pull request in the browser
    Open {
        /// Branch (defaults to the current branch)
        branch: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., github.owner)
        key: String,
        /// Configuration value
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// List all configuration values
    List,

    /// Save a GitHub token in the user settings
    Token {
        /// Personal access token
        token: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        self.setup_logging();
        if self.no_color {
            console::set_colors_enabled(false);
        }
        let interactive = !self.no_interactive && console::user_attended();

        match self.command {
            Commands::Init {
                trunk,
                remote,
                reset,
            } => commands::init::run(trunk, remote, reset, interactive),
            Commands::Track { branch, parent } => {
                commands::branch::track(branch, parent, interactive)
            }
            Commands::Untrack { branch } => commands::branch::untrack(branch),
            Commands::Create { name, message, all } => {
                commands::branch::create(name, message, all)
            }
            Commands::Checkout { branch, force } => {
                commands::branch::checkout(branch, force, interactive)
            }
            Commands::Rename { name } => commands::branch::rename(&name),
            Commands::Fold { keep } => commands::branch::fold(keep),
            Commands::Delete { branch, force } => {
                commands::branch::delete(branch, force, interactive)
            }
            Commands::Unbranch => commands::branch::unbranch(),
            Commands::Split { names, points } => commands::branch::split(names, points),
            Commands::Squash { message, no_edit } => commands::branch::squash(message, no_edit),
            Commands::Edit => commands::restack::edit(),
            Commands::Move { onto, source } => commands::restack::move_branch(source, &onto),
            Commands::Restack { branch, scope } => commands::restack::restack(branch, scope),
            Commands::Continue => commands::restack::continue_rebase(interactive),
            Commands::Abort => commands::restack::abort(),
            Commands::Get { branch, force } => {
                commands::remote::get(&branch, force, interactive).await
            }
            Commands::Log { all } => commands::log::log(all),
            Commands::Info { branch, diff } => commands::log::info(branch, diff),
            Commands::Submit {
                branch,
                scope,
                draft,
                dry_run,
                update_only,
                force,
            } => {
                let options = crate::github::SubmitOptions {
                    draft,
                    dry_run,
                    update_only,
                    force,
                };
                commands::remote::submit(branch, scope, options).await
            }
            Commands::Pr { action } => match action {
                PrAction::Sync { all } => commands::remote::pr_sync(all).await,
                PrAction::Open { branch } => commands::remote::pr_open(branch),
            },
            Commands::Config { action } => commands::config::run(action),
            Commands::Completions { shell } => commands::completions::generate_completions(shell),
        }
    }

    fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr);

        if self.no_color {
            subscriber.with_ansi(false).init();
        } else {
            subscriber.init();
        }
    }
}

impl From<ScopeArg> for crate::stack::ScopeSpec {
    fn from(scope: ScopeArg) -> Self {
        use crate::stack::ScopeSpec;
        match scope {
            ScopeArg::Branch => ScopeSpec::BRANCH,
            ScopeArg::Downstack => ScopeSpec::DOWNSTACK,
            ScopeArg::Upstack => ScopeSpec::UPSTACK,
            ScopeArg::Stack => ScopeSpec::STACK,
        }
    }
}
