pub mod config;
pub mod dataset;
pub mod error;
pub mod fetcher;
pub mod stamp;
pub mod stock;
pub mod stockplotter;
pub mod storage;
pub mod yahoo;

pub use error::{Error, Result};
