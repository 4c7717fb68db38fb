use crate::options::sub_command::Commands;
use clap::Parser;

/// Program to automate a marketplace message box for managed accounts.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Build main sub commands.
    #[clap(subcommand)]
    pub command: Commands,
    /// Path to a JSON file with the managed accounts.
    #[clap(short, long)]
    pub accounts: String,
    /// Path to a JSON file with the proxy pool.
    #[clap(short, long)]
    pub proxies: Option<String>,
    /// Marketplace origin, e.g. https://www.marketplace-example.com
    #[clap(short, long)]
    pub origin: Option<String>,
    /// Hard action deadline in milliseconds.
    #[clap(short, long)]
    pub deadline_ms: Option<u64>,
    /// Fetch worker concurrency, clamped to 1-4.
    #[clap(short, long)]
    pub concurrency: Option<usize>,
    /// Print progress on standard output.
    #[clap(short, long)]
    pub verbose: bool,
}
