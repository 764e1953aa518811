//! These structs provide the CLI interface for the liftup CLI, plus the commands accepted inside
//! `liftup shell`.

use crate::model::{Amount, TransactionType};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// liftup: Income and expense tracking for microentrepreneurs.
///
/// Keep a live list of your transactions, see your monthly balance and ask an AI advisor plain
/// questions about running your business.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and the configuration file.
    ///
    /// This is the first command you should run. By default the data directory is $HOME/liftup,
    /// pass --liftup-home if you want it somewhere else.
    Init(InitArgs),
    /// Start an interactive session.
    ///
    /// Accounts and transactions live in memory for as long as the session runs. Type `help` at
    /// the prompt to see the available commands.
    Shell(ShellArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where liftup configuration is held. Defaults to ~/liftup
    #[arg(long, env = "LIFTUP_HOME", default_value_t = default_liftup_home())]
    liftup_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, liftup_home: PathBuf) -> Self {
        Self {
            log_level,
            liftup_home: liftup_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn liftup_home(&self) -> &DisplayPath {
        &self.liftup_home
    }
}

/// Args for the `liftup init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The advisor model to use, e.g. gemini-2.0-flash
    #[arg(long)]
    model: Option<String>,
}

impl InitArgs {
    pub fn new(model: Option<String>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

/// Args for the `liftup shell` command.
#[derive(Debug, Parser, Clone)]
pub struct ShellArgs {
    /// Load demo transactions into every account created during the session.
    #[arg(long)]
    seed: bool,
}

impl ShellArgs {
    pub fn new(seed: bool) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> bool {
        self.seed
    }
}

/// One line typed at the `liftup shell` prompt.
#[derive(Debug, Parser, Clone)]
#[command(no_binary_name = true, name = "liftup>", disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

impl ShellLine {
    /// Parses a line, honoring double quotes, e.g. `add income 50 "venta de tacos"`. A backslash
    /// escapes a quote or another backslash.
    pub fn parse_line(line: &str) -> std::result::Result<Self, clap::Error> {
        let words = split_line(line)
            .map_err(|e| clap::Error::raw(clap::error::ErrorKind::InvalidValue, format!("{e}\n")))?;
        Self::try_parse_from(words)
    }

    pub fn command(&self) -> &ShellCommand {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone, Eq, PartialEq)]
pub enum ShellCommand {
    /// Create an account and sign in.
    Signup { email: String, password: String },
    /// Sign in.
    Login { email: String, password: String },
    /// Sign out.
    Logout,
    /// Go to a route, e.g. / or /dashboard
    Goto { route: String },
    /// Record a transaction: add <income|expense> <amount> <description> [--date YYYY-MM-DD]
    Add(TransactionFields),
    /// Replace the fields of a transaction: update <id> <income|expense> <amount> <description>
    Update {
        id: String,
        #[command(flatten)]
        fields: TransactionFields,
    },
    /// Delete a transaction.
    Delete { id: String },
    /// Show your transactions, newest first.
    List,
    /// Show your totals and the monthly breakdown.
    Summary,
    /// Ask the financial advisor a question.
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// List the guides in the learning center.
    Articles,
    /// Show the last error, if any.
    Error,
    /// Forget the last error.
    ClearError,
    /// Leave the shell.
    #[command(alias = "exit")]
    Quit,
}

/// The editable fields of a transaction as typed in the shell.
#[derive(Debug, Clone, Eq, PartialEq, clap::Args)]
pub struct TransactionFields {
    /// income or expense
    pub transaction_type: TransactionType,
    /// A positive amount, e.g. 1250.50
    pub amount: Amount,
    pub description: String,
    /// Defaults to today.
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

/// Splits a line into words. Double quotes group words and are removed. Fails on an unbalanced
/// quote or a trailing backslash.
fn split_line(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                match chars.next() {
                    Some(escaped @ ('"' | '\\')) => current.push(escaped),
                    Some(other) => {
                        current.push('\\');
                        current.push(other);
                    }
                    None => return Err("The line ends with an unfinished escape".to_string()),
                }
                started = true;
            }
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    words.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if quoted {
        return Err("The line has an unbalanced quote".to_string());
    }
    if started {
        words.push(current);
    }
    Ok(words)
}

fn default_liftup_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("liftup"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --liftup-home or LIFTUP_HOME instead of relying on the default \
                liftup home directory.",
            );
            PathBuf::from("liftup")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}
