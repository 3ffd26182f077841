use anyhow::Result;
use clap::Parser;
use courier_cli::{init_tracing, run_cli, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    run_cli(cli).await
}
