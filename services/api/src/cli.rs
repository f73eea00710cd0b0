use crate::demo::{run_demo, run_preview, DemoArgs, PreviewArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use dorm_alloc::allocation::DEFAULT_ALGORITHM;
use dorm_alloc::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Dormitory Allocation Engine",
    about = "Assign students to dormitory beds by lifestyle compatibility",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Compute a candidate assignment for a roster without committing it
    Preview(PreviewArgs),
    /// Run an end-to-end allocation over a generated population
    Demo(DemoArgs),
}

/// Roster exports used to hydrate the in-memory population store.
#[derive(Args, Debug)]
pub(crate) struct RosterArgs {
    /// Path to the students.csv export
    #[arg(long, requires = "beds")]
    pub(crate) students: Option<PathBuf>,
    /// Path to the beds.csv export
    #[arg(long, requires = "students")]
    pub(crate) beds: Option<PathBuf>,
    /// Matching strategy of the default allocation config
    #[arg(long, default_value = DEFAULT_ALGORITHM)]
    pub(crate) algorithm: String,
}

impl Default for RosterArgs {
    fn default() -> Self {
        Self {
            students: None,
            beds: None,
            algorithm: DEFAULT_ALGORITHM.to_string(),
        }
    }
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    #[command(flatten)]
    pub(crate) roster: RosterArgs,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Preview(args) => run_preview(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
