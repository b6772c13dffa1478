use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One unit of work: a search term restricted to a single year.
/// Terms compare exactly, no case folding or trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub term: String,
    pub year: i32,
}

impl Cell {
    pub fn new(term: impl Into<String>, year: i32) -> Self {
        Cell {
            term: term.into(),
            year,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' in {}", self.term, self.year)
    }
}

/// The requested cross product of terms and an inclusive year range.
#[derive(Debug, Clone)]
pub struct Grid {
    terms: Vec<String>,
    years: RangeInclusive<i32>,
}

impl Grid {
    pub fn new(terms: Vec<String>, start_year: i32, end_year: i32) -> Result<Self> {
        if start_year > end_year {
            return Err(Error::InvalidYearRange {
                start: start_year,
                end: end_year,
            });
        }
        if terms.is_empty() {
            return Err(Error::NoTerms);
        }
        Ok(Grid {
            terms,
            years: start_year..=end_year,
        })
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.years.clone()
    }

    /// Every cell in term order, years ascending. Repeated terms repeat their cells.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.terms
            .iter()
            .flat_map(move |term| self.years().map(move |year| Cell::new(term.as_str(), year)))
    }
}

/// A single line of the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub search_term: String,
    pub year: i32,
    pub num_results: u64,
}

impl ResultRow {
    pub fn new(cell: Cell, num_results: u64) -> Self {
        ResultRow {
            search_term: cell.term,
            year: cell.year,
            num_results,
        }
    }

    pub fn cell(&self) -> Cell {
        Cell::new(self.search_term.as_str(), self.year)
    }
}
