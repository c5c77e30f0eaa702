use tracing::warn;

use crate::{
    config::Config,
    error::Result,
    fetcher::{Fetcher, MarketData},
    stockplotter::{BitmapRenderer, Renderer, StockPlotter},
    storage::DatasetStore,
    yahoo::Yahoo,
};

/// Fetch then plot. The two halves only share the data directory.
pub struct StockRS<M = Yahoo, R = BitmapRenderer> {
    pub fetcher: Fetcher<M>,
    pub plotter: StockPlotter<R>,
}

impl StockRS {
    pub fn from_config(config: &Config) -> Result<Self> {
        let yahoo = Yahoo::new()?;
        let store = DatasetStore::new(&config.data_dir);
        let fetcher = Fetcher::new(yahoo, config.fetch.clone(), store);
        let plotter = StockPlotter::from_config(config);

        Ok(StockRS { fetcher, plotter })
    }
}

impl<M: MarketData, R: Renderer> StockRS<M, R> {
    /// A failed fetch still plots whatever dataset an earlier run left behind.
    /// Corrupt datasets are reported and skipped; only fatal errors return.
    pub fn run(&self) -> Result<()> {
        if let Err(error) = self.fetcher.fetch() {
            if error.is_fatal() {
                return Err(error);
            }
            warn!(%error, "fetch failed");
            println!("Fetch failed: {}", error);
        }

        match self.plotter.plot() {
            Ok(_chart) => Ok(()),
            Err(error) if !error.is_fatal() => {
                warn!(%error, "skipping plot");
                println!("Skipping plot: {}", error);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
