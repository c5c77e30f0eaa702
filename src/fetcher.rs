use std::path::PathBuf;

use tracing::info;

use crate::{
    config::FetchConfig,
    dataset::PriceDataset,
    error::{Error, Result},
    stamp::Stamp,
    storage::DatasetStore,
};

const PREVIEW_ROWS: usize = 5;

/// A source of recent price bars for a set of tickers.
pub trait MarketData {
    fn download(&self, request: &FetchConfig) -> Result<PriceDataset>;
}

pub struct Fetcher<M> {
    source: M,
    request: FetchConfig,
    store: DatasetStore,
}

impl<M: MarketData> Fetcher<M> {
    pub fn new(source: M, request: FetchConfig, store: DatasetStore) -> Self {
        Fetcher { source, request, store }
    }

    /// Downloads the configured window and writes it to `<data dir>/<now>.csv`.
    pub fn fetch(&self) -> Result<PathBuf> {
        self.fetch_at(Stamp::now())
    }

    pub fn fetch_at(&self, stamp: Stamp) -> Result<PathBuf> {
        info!(
            tickers = ?self.request.tickers,
            period = %self.request.period,
            interval = %self.request.interval,
            "fetching"
        );
        let dataset = self.source.download(&self.request)?;
        if dataset.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let path = self.store.save(&dataset, stamp)?;
        println!("Data saved to {}", path.display());
        println!("{}", dataset.head(PREVIEW_ROWS));
        Ok(path)
    }
}
