use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    time::SystemTime,
};

use tracing::{debug, info};

use crate::{
    dataset::PriceDataset,
    error::{Error, Result},
    stamp::Stamp,
};

pub const DATASET_EXTENSION: &str = "csv";

/// How the plotter picks "the latest" dataset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Greatest file name. Stamps are fixed width, so this is the newest stamp.
    Name,
    /// Greatest filesystem creation time, or modification time where the
    /// platform doesn't record creation. Ties go to the greater name.
    Created,
}

impl FromStr for Selection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "name" => Ok(Selection::Name),
            "created" | "ctime" => Ok(Selection::Created),
            _ => Err(format!("unknown selection {:?}, expected \"name\" or \"created\"", s)),
        }
    }
}

/// Directory of `<stamp>.csv` dataset files.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DatasetStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `<stamp>.csv`. The data goes to a `.csv.tmp` sibling first and
    /// is renamed into place once complete. An existing dataset is never
    /// replaced.
    pub fn save(&self, dataset: &PriceDataset, stamp: Stamp) -> Result<PathBuf> {
        ensure_dir(&self.dir)?;
        let path = self.dir.join(stamp.file_name(DATASET_EXTENSION));
        if path.exists() {
            let exists = io::Error::new(ErrorKind::AlreadyExists, "dataset already exists");
            return Err(Error::io(&path, exists));
        }

        let partial = path.with_extension(format!("{}.tmp", DATASET_EXTENSION));
        let file = File::create(&partial).map_err(|e| Error::io(&partial, e))?;
        if let Err(e) = dataset.write_csv(BufWriter::new(file)) {
            let _ = fs::remove_file(&partial);
            return Err(Error::io(&partial, e.into()));
        }
        fs::rename(&partial, &path).map_err(|e| Error::io(&path, e))?;

        info!(
            path = %path.display(),
            rows = dataset.len(),
            columns = dataset.columns().len(),
            "saved dataset"
        );
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<PriceDataset> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        PriceDataset::read_csv(BufReader::new(file)).map_err(|source| Error::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Dataset files in the directory, unordered. A missing directory has none.
    pub fn candidates(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.dir, e)),
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::io(&self.dir, e))?.path();
            if path.is_file() && stamp_of(&path).is_some() {
                candidates.push(path);
            } else {
                debug!(path = %path.display(), "not a dataset file, skipping");
            }
        }
        Ok(candidates)
    }

    pub fn latest(&self, selection: Selection) -> Result<Option<PathBuf>> {
        let candidates = self.candidates()?;
        let latest = match selection {
            Selection::Name => candidates
                .into_iter()
                .max_by(|a, b| a.file_name().cmp(&b.file_name())),
            Selection::Created => {
                let mut timed = Vec::with_capacity(candidates.len());
                for path in candidates {
                    timed.push((created(&path)?, path));
                }
                timed
                    .into_iter()
                    .max_by(|(at, a), (bt, b)| {
                        at.cmp(bt).then_with(|| a.file_name().cmp(&b.file_name()))
                    })
                    .map(|(_, path)| path)
            }
        };
        if let Some(path) = &latest {
            debug!(path = %path.display(), ?selection, "latest dataset");
        }
        Ok(latest)
    }
}

/// The stamp encoded in a `<stamp>.csv` file name.
pub fn stamp_of(path: &Path) -> Option<Stamp> {
    if path.extension()? != DATASET_EXTENSION {
        return None;
    }
    Stamp::parse(path.file_stem()?.to_str()?)
}

fn created(path: &Path) -> Result<SystemTime> {
    let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map_err(|e| Error::io(path, e))
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
}
