use std::collections::HashSet;

use crate::cell::{Cell, Grid};

/// Cells of `grid` that are not in `completed`.
///
/// The result behaves as a set: each cell appears once even when a term was
/// given twice. Order follows the grid (terms as given, years ascending), so
/// repeated runs walk the cells the same way.
pub fn plan(grid: &Grid, completed: &HashSet<Cell>) -> Vec<Cell> {
    let mut seen = HashSet::new();
    grid.cells()
        .filter(|cell| !completed.contains(cell))
        .filter(|cell| seen.insert(cell.clone()))
        .collect()
}
