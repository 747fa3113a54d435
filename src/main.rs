use anyhow::Result;
use clap::Parser;
use offline_fc::cli::CliArgs;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    offline_fc::run(args).await
}
