use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "collate")]
#[command(about = "Plan and prepare per-client document batches", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Crawl the local mirror and write the current inventory
    Scan,
    /// Diff the inventory against the last run and refresh group plans
    Plan,
    /// Execute runnable plans
    Run,
    /// Scan, plan and run in one cycle
    Process,
    /// Show each group's plan and execution state
    Status,
    /// Forget a group's execution state and staged work
    Reset {
        group: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Print configuration values
    PrintConfig,
}
