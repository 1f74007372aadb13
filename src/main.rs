use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use dmcc_driver::cli::Cli;

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug to see register traffic)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = dmcc_driver::runtime::run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
