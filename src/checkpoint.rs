use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{info, warn};
use tokio::fs;

use crate::cell::{Cell, ResultRow};
use crate::{Error, Result};

/// Completed rows of a run, mirrored to a CSV file after every append.
///
/// The file is the crawl output as well as the resume point: rows found in it
/// at start up are never queried again.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    rows: Vec<ResultRow>,
    completed: HashSet<Cell>,
}

impl Checkpoint {
    /// Loads `path` if it exists, otherwise starts empty.
    /// Nothing is written until the first append.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut checkpoint = Checkpoint {
            path,
            rows: Vec::new(),
            completed: HashSet::new(),
        };

        if !fs::try_exists(&checkpoint.path).await? {
            info!("No checkpoint at {:?}. Starting fresh.", checkpoint.path);
            return Ok(checkpoint);
        }

        let bytes = fs::read(&checkpoint.path).await?;
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(bytes.as_slice());
        let mut duplicates = 0;
        for row in rdr.deserialize::<ResultRow>() {
            let row = row.map_err(|source| Error::InvalidCheckpoint {
                path: checkpoint.path.clone(),
                source,
            })?;
            if !checkpoint.completed.insert(row.cell()) {
                duplicates += 1;
                continue;
            }
            checkpoint.rows.push(row);
        }
        if duplicates > 0 {
            warn!("Dropped {duplicates} duplicate rows from {:?}", checkpoint.path);
        }
        info!(
            "Resuming from {:?}: {} cells already done.",
            checkpoint.path,
            checkpoint.rows.len()
        );
        Ok(checkpoint)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn completed(&self) -> &HashSet<Cell> {
        &self.completed
    }

    pub fn contains(&self, cell: &Cell) -> bool {
        self.completed.contains(cell)
    }

    /// Appends `row` and rewrites the file. Returns `false`, writing nothing, when
    /// the row's cell is already recorded.
    pub async fn append(&mut self, row: ResultRow) -> Result<bool> {
        if !self.completed.insert(row.cell()) {
            warn!("{} is already checkpointed, ignoring new result", row.cell());
            return Ok(false);
        }
        self.rows.push(row);
        self.save().await?;
        Ok(true)
    }

    /// Writes every row to a temporary file next to the checkpoint and moves it into place.
    async fn save(&self) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        // An empty checkpoint still gets its header line.
        wtr.write_record(["search_term", "year", "num_results"])?;
        for row in &self.rows {
            wtr.write_record([
                row.search_term.clone(),
                row.year.to_string(),
                row.num_results.to_string(),
            ])?;
        }
        let bytes = wtr.into_inner().map_err(|e| Error::Io(e.into_error()))?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
