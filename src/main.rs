use rusty_faang::{config::Config, stock::StockRS, Result};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rusty_faang=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    println!("Starting FAANG data collection and plotting...");
    if let Err(e) = run() {
        error!(error = %e, "aborting");
        std::process::exit(1);
    }
    println!("Done!");
}

fn run() -> Result<()> {
    let config = Config::read_config()?;
    debug!(?config, "loaded config");
    let stocks = StockRS::from_config(&config)?;
    stocks.run()
}
