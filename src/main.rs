use clap::Parser;
use graft_cli::cli::Cli;
use graft_cli::GraftError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.run().await {
        Ok(()) => Ok(()),
        // Already reported to the user; only the exit status is left
        Err(GraftError::Killed | GraftError::RebaseConflict(_)) => std::process::exit(1),
        Err(e) => Err(anyhow::Error::new(e)),
    }
}
