use chrono::{TimeZone, Utc};
use json::JsonValue;
use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::{
    config::FetchConfig,
    dataset::{PriceDataset, PriceField},
    error::{Error, Result},
    fetcher::MarketData,
};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Yahoo Finance chart API client.
pub struct Yahoo {
    client: Client,
    base_url: String,
}

impl Yahoo {
    pub fn new() -> Result<Self> {
        Yahoo::with_base_url(CHART_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Yahoo {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fetch_symbol(
        &self,
        symbol: &str,
        request: &FetchConfig,
        dataset: &mut PriceDataset,
    ) -> Result<usize> {
        let url = format!("{}/{}", self.base_url, symbol);
        debug!(%url, period = %request.period, interval = %request.interval, "requesting chart");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("range", request.period.as_str()),
                ("interval", request.interval.as_str()),
                ("includePrePost", "false"),
            ])
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() && json::parse(&body).is_err() {
            return Err(Error::Provider {
                symbol: symbol.to_string(),
                message: format!("HTTP {}", status),
            });
        }
        parse_chart(symbol, &body, request.auto_adjust, dataset)
    }
}

impl MarketData for Yahoo {
    /// One request per ticker merged into one dataset. A ticker the provider
    /// rejects is left out; only when nothing came back is its error returned.
    fn download(&self, request: &FetchConfig) -> Result<PriceDataset> {
        let mut dataset = PriceDataset::new();
        let mut first_failure = None;
        for symbol in &request.tickers {
            match self.fetch_symbol(symbol, request, &mut dataset) {
                Ok(bars) => debug!(%symbol, bars, "downloaded"),
                Err(error) => {
                    warn!(%symbol, %error, "download failed");
                    first_failure.get_or_insert(error);
                }
            }
        }
        match first_failure {
            Some(error) if dataset.is_empty() => Err(error),
            _ => Ok(dataset),
        }
    }
}

/// Adds one chart response to `dataset`, returning the number of bars added.
///
/// With `auto_adjust` and an `adjclose` series present, open/high/low are
/// scaled by `adjclose / close` and close becomes `adjclose`.
pub fn parse_chart(
    symbol: &str,
    body: &str,
    auto_adjust: bool,
    dataset: &mut PriceDataset,
) -> Result<usize> {
    let provider_error = |message: String| Error::Provider {
        symbol: symbol.to_string(),
        message,
    };
    let parsed = json::parse(body)
        .map_err(|e| provider_error(format!("unparsable response: {}", e)))?;
    let chart = &parsed["chart"];

    let error = &chart["error"];
    if !error.is_null() {
        let message = match (error["code"].as_str(), error["description"].as_str()) {
            (Some(code), Some(description)) => format!("{}: {}", code, description),
            _ => error.dump(),
        };
        return Err(provider_error(message));
    }

    let result = &chart["result"][0];
    if result.is_null() {
        return Err(provider_error(String::from("response has no chart result")));
    }
    // Yahoo leaves out the timestamp array when the range holds no bars.
    let timestamps = &result["timestamp"];
    if timestamps.is_null() {
        return Ok(0);
    }

    let quote = &result["indicators"]["quote"][0];
    let adjclose = &result["indicators"]["adjclose"][0]["adjclose"];
    let mut bars = 0;
    for (i, ts) in timestamps.members().enumerate() {
        let timestamp = match ts.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()) {
            Some(timestamp) => timestamp,
            None => return Err(provider_error(format!("bad timestamp {}", ts.dump()))),
        };

        let mut open = value(&quote["open"], i);
        let mut high = value(&quote["high"], i);
        let mut low = value(&quote["low"], i);
        let mut close = value(&quote["close"], i);
        let volume = value(&quote["volume"], i);

        if auto_adjust {
            if let (Some(raw), Some(adjusted)) = (close, value(adjclose, i)) {
                if raw != 0.0 {
                    let ratio = adjusted / raw;
                    open = open.map(|v| v * ratio);
                    high = high.map(|v| v * ratio);
                    low = low.map(|v| v * ratio);
                    close = Some(adjusted);
                }
            }
        }

        let fields = [
            (PriceField::Open, open),
            (PriceField::High, high),
            (PriceField::Low, low),
            (PriceField::Close, close),
            (PriceField::Volume, volume),
        ];
        if fields.iter().all(|(_, v)| v.is_none()) {
            continue;
        }
        for (field, v) in fields.iter() {
            if let Some(v) = v {
                dataset.insert(timestamp, *field, symbol, *v);
            }
        }
        bars += 1;
    }
    Ok(bars)
}

fn value(series: &JsonValue, index: usize) -> Option<f64> {
    series[index].as_f64()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::parse_chart;
    use crate::{
        dataset::{PriceDataset, PriceField},
        error::Error,
    };

    const AAPL: &str = r#"{"chart":{"result":[{
        "meta":{"symbol":"AAPL","currency":"USD"},
        "timestamp":[1735741800,1735745400,1735749000],
        "indicators":{
            "quote":[{
                "open":[250.0,251.0,null],
                "high":[252.0,253.5,null],
                "low":[249.0,250.5,null],
                "close":[251.0,252.5,null],
                "volume":[1000,2000,null]
            }],
            "adjclose":[{"adjclose":[125.5,252.5,null]}]
        }
    }],"error":null}}"#;

    #[test]
    fn parses_bars_and_skips_empty_ones() {
        let mut dataset = PriceDataset::new();
        assert_eq!(parse_chart("AAPL", AAPL, false, &mut dataset).unwrap(), 2);
        assert_eq!(dataset.len(), 2);
        let first = Utc.with_ymd_and_hms(2025, 1, 1, 14, 30, 0).unwrap();
        assert_eq!(dataset.get(&first, PriceField::Close, "AAPL"), Some(251.0));
        assert_eq!(dataset.get(&first, PriceField::Volume, "AAPL"), Some(1000.0));
        assert_eq!(dataset.columns().len(), 5);
    }

    #[test]
    fn applies_adjustment() {
        let mut dataset = PriceDataset::new();
        parse_chart("AAPL", AAPL, true, &mut dataset).unwrap();
        let first = Utc.with_ymd_and_hms(2025, 1, 1, 14, 30, 0).unwrap();
        assert_eq!(dataset.get(&first, PriceField::Close, "AAPL"), Some(125.5));
        assert_eq!(dataset.get(&first, PriceField::Open, "AAPL"), Some(125.0));
        assert_eq!(dataset.get(&first, PriceField::High, "AAPL"), Some(126.0));
        assert_eq!(dataset.get(&first, PriceField::Volume, "AAPL"), Some(1000.0));
    }

    #[test]
    fn merges_symbols_on_timestamp() {
        let goog = AAPL.replace("AAPL", "GOOG");
        let mut dataset = PriceDataset::new();
        parse_chart("AAPL", AAPL, false, &mut dataset).unwrap();
        parse_chart("GOOG", &goog, false, &mut dataset).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.tickers(), vec!["AAPL", "GOOG"]);
        assert_eq!(dataset.columns().len(), 10);
    }

    #[test]
    fn empty_range_adds_nothing() {
        let body = r#"{"chart":{"result":[
            {"meta":{"symbol":"NFLX"},"indicators":{"quote":[{}]}}
        ],"error":null}}"#;
        let mut dataset = PriceDataset::new();
        assert_eq!(parse_chart("NFLX", body, true, &mut dataset).unwrap(), 0);
        assert!(dataset.is_empty());
    }

    #[test]
    fn surfaces_provider_errors() {
        let body = r#"{"chart":{"result":null,"error":{
            "code":"Not Found",
            "description":"No data found, symbol may be delisted"
        }}}"#;
        let mut dataset = PriceDataset::new();
        match parse_chart("XXXX", body, true, &mut dataset) {
            Err(Error::Provider { symbol, message }) => {
                assert_eq!(symbol, "XXXX");
                assert_eq!(message, "Not Found: No data found, symbol may be delisted");
            }
            other => panic!("expected provider error, got {:?}", other),
        }
        assert!(matches!(
            parse_chart("AAPL", "<html>", true, &mut dataset),
            Err(Error::Provider { .. })
        ));
    }
}
