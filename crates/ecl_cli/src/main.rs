//! ECL CLI
//!
//! Command-line tools for the external changelog.
//!
//! # Commands
//!
//! - `replay` - Run a changelog search over a JSON file of updates
//! - `cookie decode` - Show the change numbers held by a cookie
//! - `cookie compare` - Compare two cookies

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use ecl_engine::SearchScope;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// External changelog tools.
#[derive(Parser)]
#[command(name = "ecl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay updates through a changelog search and print the entries
    Replay {
        /// JSON file holding the updates, oldest first
        file: PathBuf,

        /// Search base
        #[arg(short, long, default_value = "cn=changelog")]
        base: String,

        /// Search scope
        #[arg(short, long, value_enum, default_value = "sub")]
        scope: ScopeArg,

        /// Search filter
        #[arg(short, long, default_value = "(objectClass=*)")]
        filter: String,

        /// Resume after this cookie
        #[arg(short, long, default_value = "")]
        cookie: String,

        /// Domains to leave out of the changelog (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Stop after this many entries
        #[arg(long)]
        size_limit: Option<usize>,

        /// Output format (ldif, json)
        #[arg(short = 'o', long, default_value = "ldif")]
        format: String,
    },

    /// Inspect resumption cookies
    Cookie {
        #[command(subcommand)]
        action: CookieAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CookieAction {
    /// Show the change numbers held by a cookie
    Decode {
        /// Cookie string
        cookie: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compare two cookies
    Compare {
        /// Left cookie
        left: String,
        /// Right cookie
        right: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Base,
    One,
    Sub,
    Subordinates,
}

impl From<ScopeArg> for SearchScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Base => SearchScope::BaseObject,
            ScopeArg::One => SearchScope::SingleLevel,
            ScopeArg::Sub => SearchScope::WholeSubtree,
            ScopeArg::Subordinates => SearchScope::Subordinates,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            file,
            base,
            scope,
            filter,
            cookie,
            exclude,
            size_limit,
            format,
        } => {
            let options = commands::replay::ReplayOptions {
                base,
                scope: scope.into(),
                filter,
                cookie,
                exclude,
                size_limit,
            };
            commands::replay::run(&file, &options, &format)?;
        }
        Commands::Cookie { action } => match action {
            CookieAction::Decode { cookie, format } => {
                commands::cookie::decode(&cookie, &format)?;
            }
            CookieAction::Compare { left, right } => {
                commands::cookie::compare(&left, &right)?;
            }
        },
        Commands::Version => {
            println!("ECL CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
