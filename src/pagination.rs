//! Keeps listeners covering the date window around the viewed date.
//!
//! When the UI moves to another day, week or month, the driver computes
//! the window `[first day of (date - before months), last day of
//! (date + after months)]` and asks the extender to widen every listener:
//! - range listeners to the window's ISO date bounds
//! - document-set listeners to the window's `YYYY-MM` month ids
//! - whole-collection listeners are left alone
//!
//! The driver never writes to the store itself.

use crate::config::WindowConfig;
use crate::error::{Result, SyncError};
use crate::extension::{ConstraintExtender, ExtendOutcome};
use crate::listeners::ListenerStore;
use crate::types::{CollectionId, Constraint, DocumentId};
use chrono::{Datelike, Months, NaiveDate};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

const ISO_DATE: &str = "%Y-%m-%d";
const MONTH_ID: &str = "%Y-%m";

/// Calendar window, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaginationWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PaginationWindow {
    /// Whole months around `date`.
    pub fn around(date: NaiveDate, config: &WindowConfig) -> Result<Self> {
        let out_of_range = || SyncError::Configuration(format!("window around {date} overflows"));
        let month_start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .ok_or_else(out_of_range)?;

        let start = month_start
            .checked_sub_months(Months::new(config.months_before))
            .ok_or_else(out_of_range)?;
        let end = month_start
            .checked_add_months(Months::new(config.months_after + 1))
            .and_then(|next| next.pred_opt())
            .ok_or_else(out_of_range)?;

        Ok(Self { start, end })
    }

    pub fn lower_bound(&self) -> String {
        self.start.format(ISO_DATE).to_string()
    }

    pub fn upper_bound(&self) -> String {
        self.end.format(ISO_DATE).to_string()
    }

    /// `YYYY-MM` id of every month the window touches.
    pub fn month_ids(&self) -> BTreeSet<DocumentId> {
        let mut months = BTreeSet::new();
        let mut month = self.start;
        while month <= self.end {
            months.insert(month.format(MONTH_ID).to_string());
            match month.checked_add_months(Months::new(1)) {
                Some(next) => month = next,
                None => break,
            }
        }
        months
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// What one date change did to the active listeners.
#[derive(Debug)]
pub struct PaginationReport {
    pub window: PaginationWindow,
    /// Collections whose coverage grew, with the number of subscriptions opened.
    pub extended: Vec<(CollectionId, usize)>,
    /// Collections already covering the window.
    pub unchanged: Vec<CollectionId>,
    /// Whole-collection listeners, or listeners gone before they were reached.
    pub skipped: Vec<CollectionId>,
    pub failed: Vec<(CollectionId, SyncError)>,
}

impl PaginationReport {
    fn new(window: PaginationWindow) -> Self {
        Self {
            window,
            extended: Vec::new(),
            unchanged: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// True if no subscription was opened.
    pub fn is_noop(&self) -> bool {
        self.extended.is_empty()
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.extended.iter().map(|(_, opened)| opened).sum()
    }
}

/// Reacts to changes of the viewed date.
pub struct PaginationDriver {
    store: Arc<ListenerStore>,
    extender: ConstraintExtender,
    window: WindowConfig,
    current: Mutex<Option<NaiveDate>>,
}

impl PaginationDriver {
    pub fn new(store: Arc<ListenerStore>, extender: ConstraintExtender, window: WindowConfig) -> Self {
        Self {
            store,
            extender,
            window,
            current: Mutex::new(None),
        }
    }

    /// The last date passed to `on_date_changed`.
    pub fn current_date(&self) -> Option<NaiveDate> {
        *self.current.lock()
    }

    /// Same as `on_date_changed`, for an ISO `YYYY-MM-DD` string.
    pub fn on_date_str(&self, date: &str) -> Result<PaginationReport> {
        let date = NaiveDate::parse_from_str(date, ISO_DATE)
            .map_err(|e| SyncError::Configuration(format!("invalid date {date:?}: {e}")))?;
        self.on_date_changed(date)
    }

    /// Extend every listener to cover the window around `date`.
    ///
    /// A failing collection is recorded in the report and does not stop
    /// the others.
    pub fn on_date_changed(&self, date: NaiveDate) -> Result<PaginationReport> {
        let window = PaginationWindow::around(date, &self.window)?;
        *self.current.lock() = Some(date);

        let lower = window.lower_bound();
        let upper = window.upper_bound();
        let months = window.month_ids();
        let mut report = PaginationReport::new(window);

        for (collection, listener) in self.store.listeners() {
            let result = match listener.constraint {
                Constraint::Range { .. } => self.extender.extend_range(&collection, &lower, &upper),
                Constraint::Documents { .. } => self
                    .extender
                    .extend_documents(&collection, months.iter().cloned()),
                Constraint::None => {
                    report.skipped.push(collection);
                    continue;
                }
            };

            match result {
                Ok(ExtendOutcome::Extended { opened }) => report.extended.push((collection, opened)),
                Ok(ExtendOutcome::Unchanged) => report.unchanged.push(collection),
                Ok(ExtendOutcome::Missing) => report.skipped.push(collection),
                Err(error) => {
                    tracing::warn!(collection = %collection, %error, "pagination extension failed");
                    report.failed.push((collection, error));
                }
            }
        }

        tracing::debug!(
            %date,
            lower = %lower,
            upper = %upper,
            opened = report.subscriptions_opened(),
            "pagination window applied"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, ISO_DATE).unwrap()
    }

    #[test]
    fn test_window_spans_whole_months() {
        let window = PaginationWindow::around(date("2022-01-01"), &WindowConfig::default()).unwrap();

        assert_eq!(window.lower_bound(), "2021-12-01");
        assert_eq!(window.upper_bound(), "2022-02-28");
        let months: Vec<_> = window.month_ids().into_iter().collect();
        assert_eq!(months, vec!["2021-12", "2022-01", "2022-02"]);
    }

    #[test]
    fn test_window_from_month_end() {
        let window = PaginationWindow::around(date("2022-03-31"), &WindowConfig::default()).unwrap();

        assert_eq!(window.lower_bound(), "2022-02-01");
        assert_eq!(window.upper_bound(), "2022-04-30");
    }

    #[test]
    fn test_leap_february() {
        let window = PaginationWindow::around(date("2024-01-15"), &WindowConfig::default()).unwrap();
        assert_eq!(window.upper_bound(), "2024-02-29");
    }

    #[test]
    fn test_custom_window_size() {
        let config = WindowConfig {
            months_before: 0,
            months_after: 2,
        };
        let window = PaginationWindow::around(date("2022-11-10"), &config).unwrap();

        assert_eq!(window.lower_bound(), "2022-11-01");
        assert_eq!(window.upper_bound(), "2023-01-31");
        assert_eq!(window.month_ids().len(), 3);
        assert!(window.contains(date("2022-12-25")));
        assert!(!window.contains(date("2023-02-01")));
    }
}
