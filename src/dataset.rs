use std::{collections::BTreeMap, fmt, io, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";
const FIELD_LABEL: &str = "Price";
const TICKER_LABEL: &str = "Ticker";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("expected two header rows (price field, ticker)")]
    MissingHeader,
    #[error("unknown price field {0:?}")]
    UnknownField(String),
    #[error("column {column} has no ticker")]
    EmptyTicker { column: usize },
    #[error("column {0} appears twice")]
    DuplicateColumn(Column),
    #[error("line {line}: expected {expected} cells, found {found}")]
    RowWidth { line: u64, expected: usize, found: usize },
    #[error("line {line}: can't parse timestamp {value:?}")]
    BadTimestamp { line: u64, value: String },
    #[error("line {line}: timestamp {value:?} appears twice")]
    DuplicateTimestamp { line: u64, value: String },
    #[error("line {line}: can't parse {column} value {value:?}")]
    BadValue { line: u64, column: Column, value: String },
    #[error("no {0} columns")]
    MissingField(PriceField),
    #[error("no {0} values")]
    NoValues(PriceField),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// First level of the column index. Declaration order is the column order
/// used when writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriceField {
    Close,
    High,
    Low,
    Open,
    Volume,
}

impl PriceField {
    pub const ALL: [PriceField; 5] = [
        PriceField::Close,
        PriceField::High,
        PriceField::Low,
        PriceField::Open,
        PriceField::Volume,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PriceField::Close => "Close",
            PriceField::High => "High",
            PriceField::Low => "Low",
            PriceField::Open => "Open",
            PriceField::Volume => "Volume",
        }
    }
}

impl FromStr for PriceField {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PriceField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FormatError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (price field, ticker) pair addressing one column of a [`PriceDataset`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column {
    pub field: PriceField,
    pub ticker: String,
}

impl Column {
    pub fn new(field: PriceField, ticker: &str) -> Self {
        Column {
            field,
            ticker: String::from(ticker),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.field, self.ticker)
    }
}

/// Timestamp indexed price table with two-level columns.
///
/// Cells are `None` where a ticker had no bar at that timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceDataset {
    columns: Vec<Column>,
    rows: BTreeMap<DateTime<Utc>, Vec<Option<f64>>>,
}

impl PriceDataset {
    pub fn new() -> Self {
        PriceDataset::default()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn tickers(&self) -> Vec<&str> {
        let mut tickers: Vec<&str> = self.columns.iter().map(|c| c.ticker.as_str()).collect();
        tickers.sort_unstable();
        tickers.dedup();
        tickers
    }

    /// Number of rows (timestamps).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.rows.keys()
    }

    pub fn get(&self, timestamp: &DateTime<Utc>, field: PriceField, ticker: &str) -> Option<f64> {
        let index = self.columns.iter().position(|c| c.field == field && c.ticker == ticker)?;
        self.rows.get(timestamp).and_then(|row| row[index])
    }

    pub fn insert(
        &mut self,
        timestamp: DateTime<Utc>,
        field: PriceField,
        ticker: &str,
        value: f64,
    ) {
        let index = self.column_index(field, ticker);
        let width = self.columns.len();
        let row = self.rows.entry(timestamp).or_insert_with(|| vec![None; width]);
        row[index] = if value.is_nan() { None } else { Some(value) };
    }

    fn column_index(&mut self, field: PriceField, ticker: &str) -> usize {
        let existing = self
            .columns
            .iter()
            .position(|c| c.field == field && c.ticker == ticker);
        if let Some(index) = existing {
            return index;
        }
        let column = Column::new(field, ticker);
        let index = self.columns.partition_point(|c| c < &column);
        self.columns.insert(index, column);
        for row in self.rows.values_mut() {
            row.insert(index, None);
        }
        index
    }

    /// Selects the `Close` field group: one column per ticker, same rows.
    pub fn close_prices(&self) -> Result<CloseTable, FormatError> {
        let series: Vec<(String, Vec<Option<f64>>)> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.field == PriceField::Close)
            .map(|(index, column)| {
                let values = self.rows.values().map(|row| row[index]).collect();
                (column.ticker.clone(), values)
            })
            .collect();
        if series.is_empty() {
            return Err(FormatError::MissingField(PriceField::Close));
        }
        Ok(CloseTable {
            timestamps: self.rows.keys().copied().collect(),
            series,
        })
    }

    pub fn head(&self, rows: usize) -> Preview<'_> {
        Preview { dataset: self, rows }
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);

        let mut fields = vec![FIELD_LABEL];
        fields.extend(self.columns.iter().map(|c| c.field.as_str()));
        csv.write_record(&fields)?;

        let mut tickers = vec![TICKER_LABEL];
        tickers.extend(self.columns.iter().map(|c| c.ticker.as_str()));
        csv.write_record(&tickers)?;

        for (timestamp, values) in &self.rows {
            let mut record = Vec::with_capacity(values.len() + 1);
            record.push(timestamp.format(TIMESTAMP_FORMAT).to_string());
            record.extend(values.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default()));
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Reads the two header row layout written by [`PriceDataset::write_csv`].
    ///
    /// A third header row naming the index (`Datetime,,,`) is skipped if present.
    pub fn read_csv<R: io::Read>(reader: R) -> Result<Self, FormatError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let mut records = csv.records();

        let fields = records.next().ok_or(FormatError::MissingHeader)??;
        let tickers = records.next().ok_or(FormatError::MissingHeader)??;
        if fields.is_empty() {
            return Err(FormatError::MissingHeader);
        }
        if tickers.len() != fields.len() {
            return Err(FormatError::RowWidth {
                line: line_of(&tickers),
                expected: fields.len(),
                found: tickers.len(),
            });
        }

        let mut columns: Vec<Column> = Vec::with_capacity(fields.len() - 1);
        for (index, (field, ticker)) in fields.iter().zip(tickers.iter()).enumerate().skip(1) {
            let ticker = ticker.trim();
            if ticker.is_empty() {
                return Err(FormatError::EmptyTicker { column: index + 1 });
            }
            let column = Column::new(field.parse()?, ticker);
            if columns.contains(&column) {
                return Err(FormatError::DuplicateColumn(column));
            }
            columns.push(column);
        }

        let mut rows = BTreeMap::new();
        for (index, record) in records.enumerate() {
            let record = record?;
            let line = line_of(&record);
            if record.len() != fields.len() {
                return Err(FormatError::RowWidth {
                    line,
                    expected: fields.len(),
                    found: record.len(),
                });
            }

            let raw = record.get(0).unwrap_or_default();
            let timestamp = match parse_timestamp(raw) {
                Some(timestamp) => timestamp,
                None if index == 0 && record.iter().skip(1).all(|cell| cell.trim().is_empty()) => {
                    continue
                }
                None => {
                    return Err(FormatError::BadTimestamp {
                        line,
                        value: raw.to_string(),
                    })
                }
            };

            let mut values = Vec::with_capacity(columns.len());
            for (cell, column) in record.iter().skip(1).zip(&columns) {
                values.push(parse_value(cell).map_err(|_| FormatError::BadValue {
                    line,
                    column: column.clone(),
                    value: cell.to_string(),
                })?);
            }

            if rows.insert(timestamp, values).is_some() {
                return Err(FormatError::DuplicateTimestamp {
                    line,
                    value: raw.to_string(),
                });
            }
        }

        Ok(PriceDataset { columns, rows })
    }
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

fn parse_value(cell: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    let value: f64 = cell.parse()?;
    Ok(if value.is_nan() { None } else { Some(value) })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Close prices reshaped to one column per ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseTable {
    timestamps: Vec<DateTime<Utc>>,
    series: Vec<(String, Vec<Option<f64>>)>,
}

impl CloseTable {
    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|(ticker, _)| ticker.as_str())
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The points of one ticker's line, skipping timestamps it has no close for.
    pub fn points(&self, ticker: &str) -> Vec<(DateTime<Utc>, f64)> {
        self.series
            .iter()
            .find(|(t, _)| t == ticker)
            .map(|(_, closes)| {
                self.timestamps
                    .iter()
                    .zip(closes)
                    .filter_map(|(ts, close)| close.map(|close| (*ts, close)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((*self.timestamps.first()?, *self.timestamps.last()?))
    }

    pub fn price_range(&self) -> Option<(f64, f64)> {
        self.series
            .iter()
            .flat_map(|(_, closes)| closes.iter().flatten().copied())
            .fold(None, |range, close| match range {
                None => Some((close, close)),
                Some((min, max)) => Some((f64::min(min, close), f64::max(max, close))),
            })
    }
}

/// Console preview of the first rows of a dataset.
pub struct Preview<'a> {
    dataset: &'a PriceDataset,
    rows: usize,
}

impl fmt::Display for Preview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = self.dataset.columns();
        write!(f, "{:<26}", FIELD_LABEL)?;
        for column in columns {
            write!(f, "{:>12}", column.field.as_str())?;
        }
        writeln!(f)?;
        write!(f, "{:<26}", TICKER_LABEL)?;
        for column in columns {
            write!(f, "{:>12}", column.ticker)?;
        }
        writeln!(f)?;
        for (timestamp, values) in self.dataset.rows.iter().take(self.rows) {
            write!(f, "{:<26}", timestamp.format(TIMESTAMP_FORMAT).to_string())?;
            for value in values {
                match value {
                    Some(value) => write!(f, "{:>12.2}", value)?,
                    None => write!(f, "{:>12}", "NaN")?,
                }
            }
            writeln!(f)?;
        }
        write!(f, "[{} rows x {} columns]", self.dataset.len(), columns.len())
    }
}
