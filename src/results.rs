use serde::Serialize;

use crate::scan::Scan;

/// One fitted peak of one scan, numbered from 1 for display
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ResultRow {
    pub scan: usize,
    pub peak: usize,
    /// Mode diameter (nm)
    pub dp: f64,
    pub height: f64,
    pub fwhh: f64,
}

/// Peak summaries gathered across the scans of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResultsTable {
    rows: Vec<ResultRow>,
}

impl ResultsTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from every fitted scan, numbering scans by their position in `scans`
    #[must_use]
    pub fn from_scans<'a>(scans: impl IntoIterator<Item = &'a Scan>) -> Self {
        let mut table = Self::new();
        for (index, scan) in scans.into_iter().enumerate() {
            table.push_scan(index + 1, scan);
        }
        table
    }

    /// Append the peaks of `scan`. Scans without a fit add nothing.
    pub fn push_scan(&mut self, scan_number: usize, scan: &Scan) {
        self.rows
            .extend(scan.peak_reports().into_iter().map(|report| ResultRow {
                scan: scan_number,
                peak: report.index + 1,
                dp: report.diameter_nm,
                height: report.height,
                fwhh: report.fwhh,
            }));
    }

    #[must_use]
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
