use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, Duration, Utc};
use plotters::prelude::*;
use tracing::info;

use crate::{
    config::Config,
    dataset::{CloseTable, FormatError, PriceField},
    error::{Error, Result},
    stamp::Stamp,
    storage::{self, DatasetStore, Selection},
};

pub const CHART_EXTENSION: &str = "png";

/// Which stamp names the chart file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartNaming {
    /// Same stamp as the source dataset; replotting overwrites the chart.
    Dataset,
    /// The time of plotting.
    Fresh,
}

impl FromStr for ChartNaming {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dataset" => Ok(ChartNaming::Dataset),
            "fresh" => Ok(ChartNaming::Fresh),
            _ => Err(format!("unknown naming {:?}, expected \"dataset\" or \"fresh\"", s)),
        }
    }
}

/// Draws a close price chart to an image file.
pub trait Renderer {
    fn render(&self, closes: &CloseTable, title: &str, path: &Path) -> Result<()>;
}

pub struct BitmapRenderer {
    img_width: u32,
    img_height: u32,
}

impl BitmapRenderer {
    pub fn new(img_width: u32, img_height: u32) -> Self {
        BitmapRenderer { img_width, img_height }
    }
}

fn render_error<E: std::fmt::Display>(error: E) -> Error {
    Error::Render(error.to_string())
}

/// Number of x axis labels: one per calendar day spanned, so day formatted
/// labels don't repeat.
fn day_labels(from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
    let days = (to.date_naive() - from.date_naive()).num_days() + 1;
    days.max(2).min(10) as usize
}

impl Renderer for BitmapRenderer {
    fn render(&self, closes: &CloseTable, title: &str, path: &Path) -> Result<()> {
        let (x_min, x_max) = closes
            .time_range()
            .ok_or_else(|| render_error("no timestamps to plot"))?;
        let (y_min, y_max) = closes
            .price_range()
            .ok_or_else(|| render_error("no close prices to plot"))?;
        let x_max = if x_max > x_min { x_max } else { x_min + Duration::hours(1) };
        let padding = if y_max > y_min {
            (y_max - y_min) * 0.1
        } else {
            y_max.abs().max(1.0) * 0.05
        };

        // Dropping the backend writes the image, even after a failed draw.
        let root = BitMapBackend::new(path, (self.img_width, self.img_height)).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 30).into_font())
            .margin(15)
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(x_min..x_max, (y_min - padding)..(y_max + padding))
            .map_err(render_error)?;

        chart
            .configure_mesh()
            .x_desc("Time")
            .y_desc("Close Price")
            .x_labels(day_labels(x_min, x_max))
            .x_label_formatter(&|ts: &DateTime<Utc>| ts.format("%Y-%m-%d").to_string())
            .draw()
            .map_err(render_error)?;

        for (index, ticker) in closes.tickers().enumerate() {
            let color = Palette99::pick(index).to_rgba();
            chart
                .draw_series(LineSeries::new(closes.points(ticker), color.stroke_width(2)))
                .map_err(render_error)?
                .label(ticker)
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2))
                });
        }

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(render_error)?;

        root.present().map_err(render_error)
    }
}

pub struct StockPlotter<R = BitmapRenderer> {
    store: DatasetStore,
    plot_dir: PathBuf,
    selection: Selection,
    naming: ChartNaming,
    renderer: R,
}

impl StockPlotter<BitmapRenderer> {
    pub fn from_config(config: &Config) -> Self {
        StockPlotter::new(
            DatasetStore::new(&config.data_dir),
            &config.plot_dir,
            config.selection,
            config.naming,
            BitmapRenderer::new(config.img_width, config.img_height),
        )
    }
}

impl<R: Renderer> StockPlotter<R> {
    pub fn new(
        store: DatasetStore,
        plot_dir: impl Into<PathBuf>,
        selection: Selection,
        naming: ChartNaming,
        renderer: R,
    ) -> Self {
        StockPlotter {
            store,
            plot_dir: plot_dir.into(),
            selection,
            naming,
            renderer,
        }
    }

    /// Charts the latest dataset's close prices.
    ///
    /// `Ok(None)` when there is no dataset to plot.
    pub fn plot(&self) -> Result<Option<PathBuf>> {
        self.plot_at(Stamp::now())
    }

    pub fn plot_at(&self, now: Stamp) -> Result<Option<PathBuf>> {
        let dataset_path = match self.store.latest(self.selection)? {
            Some(path) => path,
            None => {
                println!("No CSV files found in {}", self.store.dir().display());
                return Ok(None);
            }
        };
        info!(dataset = %dataset_path.display(), "plotting latest dataset");

        let corrupt = |source: FormatError| Error::Corrupt {
            path: dataset_path.clone(),
            source,
        };
        let dataset = self.store.load(&dataset_path)?;
        let closes = dataset.close_prices().map_err(corrupt)?;
        if closes.price_range().is_none() {
            return Err(corrupt(FormatError::NoValues(PriceField::Close)));
        }

        let dataset_stamp = storage::stamp_of(&dataset_path).unwrap_or(now);
        let chart_stamp = match self.naming {
            ChartNaming::Dataset => dataset_stamp,
            ChartNaming::Fresh => now,
        };
        storage::ensure_dir(&self.plot_dir)?;
        let path = self.plot_dir.join(chart_stamp.file_name(CHART_EXTENSION));
        let title = format!("FAANG Close Prices - {}", dataset_stamp);

        // Render beside the chart and rename, so a failed render leaves no
        // half drawn image under the chart's name.
        let partial = self
            .plot_dir
            .join(format!(".{}", chart_stamp.file_name(CHART_EXTENSION)));
        if let Err(e) = self.renderer.render(&closes, &title, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, &path).map_err(|e| Error::io(&path, e))?;
        info!(chart = %path.display(), series = closes.tickers().count(), "saved chart");
        println!("Plot saved to {}", path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{cell::RefCell, fs, path::Path};

    use chrono::{TimeZone, Utc};

    use super::{day_labels, BitmapRenderer, ChartNaming, Renderer, StockPlotter};
    use crate::{
        dataset::{CloseTable, FormatError},
        error::{Error, Result},
        stamp::Stamp,
        storage::{DatasetStore, Selection},
    };

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Drawn {
        pub title: String,
        pub series: Vec<(String, usize)>,
    }

    /// Records what would have been drawn and writes an empty image file.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub drawn: RefCell<Vec<Drawn>>,
    }

    impl Renderer for Recorder {
        fn render(&self, closes: &CloseTable, title: &str, path: &Path) -> Result<()> {
            self.drawn.borrow_mut().push(Drawn {
                title: title.to_string(),
                series: closes.tickers().map(|t| (t.to_string(), closes.points(t).len())).collect(),
            });
            fs::write(path, b"").map_err(|e| Error::io(path, e))
        }
    }

    impl StockPlotter<Recorder> {
        pub(crate) fn recorded(&self) -> Vec<Drawn> {
            self.renderer.drawn.borrow().clone()
        }
    }

    fn plotter(root: &Path, naming: ChartNaming) -> StockPlotter<Recorder> {
        StockPlotter::new(
            DatasetStore::new(root.join("data")),
            root.join("plots"),
            Selection::Name,
            naming,
            Recorder::default(),
        )
    }

    fn write_dataset(root: &Path, name: &str, contents: &str) {
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(root.join("data").join(name), contents).unwrap();
    }

    const AAPL_TWO_HOURS: &str = "Price,Close,Open\n\
                                  Ticker,AAPL,AAPL\n\
                                  2025-01-01 09:00:00+00:00,100,99\n\
                                  2025-01-01 10:00:00+00:00,101,100\n";

    #[test]
    fn plots_latest_dataset_under_its_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let older = "Price,Close\nTicker,MSFT\n2024-12-31,400\n";
        write_dataset(dir.path(), "20241231-090000.csv", older);
        write_dataset(dir.path(), "20250101-090000.csv", AAPL_TWO_HOURS);
        let plotter = plotter(dir.path(), ChartNaming::Dataset);

        let chart = plotter.plot().unwrap().unwrap();
        assert_eq!(chart, dir.path().join("plots").join("20250101-090000.png"));
        assert!(chart.is_file());
        assert_eq!(
            plotter.renderer.drawn.borrow()[0],
            Drawn {
                title: String::from("FAANG Close Prices - 20250101-090000"),
                series: vec![(String::from("AAPL"), 2)],
            }
        );
    }

    #[test]
    fn nothing_to_plot_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let plotter = plotter(dir.path(), ChartNaming::Dataset);
        assert_eq!(plotter.plot().unwrap(), None);
        assert!(plotter.renderer.drawn.borrow().is_empty());
        assert!(!dir.path().join("plots").exists());
    }

    #[test]
    fn replotting_overwrites_dataset_named_chart() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "20250101-090000.csv", AAPL_TWO_HOURS);
        let plotter = plotter(dir.path(), ChartNaming::Dataset);

        let first = plotter.plot_at(Stamp::parse("20250102-000000").unwrap()).unwrap();
        let second = plotter.plot_at(Stamp::parse("20250102-000001").unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(dir.path().join("plots")).unwrap().count(), 1);
        let drawn = plotter.renderer.drawn.borrow();
        assert_eq!(drawn[0], drawn[1]);
    }

    #[test]
    fn fresh_naming_uses_plot_time() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "20250101-090000.csv", AAPL_TWO_HOURS);
        let plotter = plotter(dir.path(), ChartNaming::Fresh);

        let chart = plotter.plot_at(Stamp::parse("20250102-000000").unwrap()).unwrap().unwrap();
        assert_eq!(chart.file_name().unwrap(), "20250102-000000.png");
        assert_eq!(
            plotter.renderer.drawn.borrow()[0].title,
            "FAANG Close Prices - 20250101-090000"
        );
    }

    #[test]
    fn corrupt_dataset_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "20250101-090000.csv", "Price,Open\nTicker,AAPL\n2025-01-01,1\n");
        write_dataset(dir.path(), "20250102-090000.csv", "Price,Close\nTicker,AAPL\n");
        let plotter = plotter(dir.path(), ChartNaming::Dataset);

        match plotter.plot() {
            Err(Error::Corrupt { path, source: FormatError::NoValues(_) }) => {
                assert!(path.ends_with("20250102-090000.csv"))
            }
            other => panic!("expected corrupt dataset, got {:?}", other),
        }
        fs::remove_file(dir.path().join("data").join("20250102-090000.csv")).unwrap();
        let err = plotter.plot().unwrap_err();
        assert!(matches!(err, Error::Corrupt { source: FormatError::MissingField(_), .. }));
        assert!(!err.is_fatal());
    }

    /// Writes part of an image, then fails.
    struct Broken;

    impl Renderer for Broken {
        fn render(&self, _closes: &CloseTable, _title: &str, path: &Path) -> Result<()> {
            fs::write(path, b"\x89PNG").map_err(|e| Error::io(path, e))?;
            Err(Error::Render(String::from("font not found")))
        }
    }

    #[test]
    fn failed_render_leaves_no_chart() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "20250101-090000.csv", AAPL_TWO_HOURS);
        let plotter = StockPlotter::new(
            DatasetStore::new(dir.path().join("data")),
            dir.path().join("plots"),
            Selection::Name,
            ChartNaming::Dataset,
            Broken,
        );

        let err = plotter.plot().unwrap_err();
        assert!(matches!(err, Error::Render(_)));
        assert!(err.is_fatal());
        assert_eq!(fs::read_dir(dir.path().join("plots")).unwrap().count(), 0);
    }

    #[test]
    fn one_label_per_day() {
        let monday = Utc.with_ymd_and_hms(2025, 1, 6, 14, 30, 0).unwrap();
        let friday = Utc.with_ymd_and_hms(2025, 1, 10, 20, 30, 0).unwrap();
        assert_eq!(day_labels(monday, friday), 5);
        assert_eq!(day_labels(monday, monday + chrono::Duration::hours(6)), 2);
        assert_eq!(day_labels(monday, monday + chrono::Duration::days(60)), 10);
    }

    #[test]
    fn parses_naming() {
        assert_eq!("Fresh".parse::<ChartNaming>(), Ok(ChartNaming::Fresh));
        assert!("latest".parse::<ChartNaming>().is_err());
    }

    #[test]
    #[ignore = "needs system fonts for chart text"]
    fn renders_png() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "20250101-090000.csv", AAPL_TWO_HOURS);
        let plotter = StockPlotter::new(
            DatasetStore::new(dir.path().join("data")),
            dir.path().join("plots"),
            Selection::Name,
            ChartNaming::Dataset,
            BitmapRenderer::new(640, 320),
        );
        let chart = plotter.plot().unwrap().unwrap();
        let bytes = fs::read(chart).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
