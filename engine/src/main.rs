//! Engine binary entrypoint.

use clap::Parser as _;

use broodlink_engine::{Cli, inner_main};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    inner_main(Cli::parse()).await
}
