//! PageStream CLI: fetch a JSON page stream and merge it with content files.
//!
//! Pages decoded from the stream become virtual files that are listed, or
//! written out, alongside the files already under the content directory.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
