// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Chain calculation over the streak ledger.
//!
//! Everything here is pure: callers load ledger rows and pass them in.
//!
//! Two walks are provided:
//! - [`chain_length`] counts consecutive *active* days and stops at anything else.
//! - [`bridged_chain`] also steps over freeze days (counting them as zero), so a
//!   freeze keeps the days on either side of it in one streak.

use crate::models::{DayKind, StreakDay};
use crate::time_utils::day_before;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};

/// Count consecutive active days ending at `ending_at` (inclusive).
pub fn chain_length(active_days: &HashSet<NaiveDate>, ending_at: NaiveDate) -> u32 {
    let mut length = 0;
    let mut cursor = ending_at;
    while active_days.contains(&cursor) {
        length += 1;
        cursor = day_before(cursor);
    }
    length
}

/// Ledger rows of one user keyed by day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayLedger {
    days: BTreeMap<NaiveDate, DayKind>,
}

impl DayLedger {
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a StreakDay>,
    {
        let days = rows.into_iter().map(|row| (row.day, row.kind)).collect();
        Self { days }
    }

    pub fn kind_on(&self, day: NaiveDate) -> Option<DayKind> {
        self.days.get(&day).copied()
    }

    pub fn insert(&mut self, day: NaiveDate, kind: DayKind) {
        self.days.entry(day).or_insert(kind);
    }

    /// Merge older rows without replacing known days.
    pub fn extend<'a, I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = &'a StreakDay>,
    {
        for row in rows {
            self.insert(row.day, row.kind);
        }
    }

    /// Set of active days (input for [`chain_length`]).
    pub fn active_days(&self) -> HashSet<NaiveDate> {
        self.days
            .iter()
            .filter(|(_, kind)| **kind == DayKind::Active)
            .map(|(day, _)| *day)
            .collect()
    }
}

/// Result of a freeze-bridged walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainWalk {
    /// Active days in the unbroken run.
    pub length: u32,
    /// The walk hit `window_start` without finding a gap, so rows older than
    /// the window may extend the run.
    pub open_ended: bool,
}

/// Walk backwards from `ending_at` over active and freeze days.
///
/// Active days count one, freeze days count zero, and the first day with no
/// row ends the walk. Days before `window_start` are treated as unknown.
pub fn bridged_chain(ledger: &DayLedger, ending_at: NaiveDate, window_start: NaiveDate) -> ChainWalk {
    let mut length = 0;
    let mut cursor = ending_at;

    loop {
        if cursor < window_start {
            return ChainWalk {
                length,
                open_ended: true,
            };
        }
        match ledger.kind_on(cursor) {
            Some(DayKind::Active) => length += 1,
            Some(DayKind::Freeze) => {}
            None => {
                return ChainWalk {
                    length,
                    open_ended: false,
                }
            }
        }
        cursor = day_before(cursor);
    }
}

/// Count consecutive freeze days immediately before `day`, stopping at `cap`.
pub fn freeze_run_before(ledger: &DayLedger, day: NaiveDate, cap: u32) -> u32 {
    let mut run = 0;
    let mut cursor = day_before(day);
    while run < cap && ledger.kind_on(cursor) == Some(DayKind::Freeze) {
        run += 1;
        cursor = day_before(cursor);
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ledger(rows: &[(&str, DayKind)]) -> DayLedger {
        let rows: Vec<StreakDay> = rows
            .iter()
            .map(|(d, k)| StreakDay::new("u", date(d), *k))
            .collect();
        DayLedger::from_rows(&rows)
    }

    const FAR: &str = "2000-01-01";

    #[test]
    fn test_chain_length_counts_consecutive_active_days() {
        let active: HashSet<_> = ["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-05"]
            .iter()
            .map(|d| date(d))
            .collect();

        assert_eq!(chain_length(&active, date("2024-01-03")), 3);
        assert_eq!(chain_length(&active, date("2024-01-05")), 1);
        assert_eq!(chain_length(&active, date("2024-01-04")), 0);
        assert_eq!(chain_length(&HashSet::new(), date("2024-01-04")), 0);
    }

    #[test]
    fn test_chain_length_crosses_month_and_leap_day() {
        let active: HashSet<_> = ["2024-02-28", "2024-02-29", "2024-03-01"]
            .iter()
            .map(|d| date(d))
            .collect();
        assert_eq!(chain_length(&active, date("2024-03-01")), 3);
    }

    #[test]
    fn test_freeze_is_not_active_for_chain_length() {
        let l = ledger(&[
            ("2024-01-01", DayKind::Active),
            ("2024-01-02", DayKind::Freeze),
            ("2024-01-03", DayKind::Active),
        ]);
        assert_eq!(chain_length(&l.active_days(), date("2024-01-03")), 1);
    }

    #[test]
    fn test_bridged_chain_steps_over_freezes() {
        let l = ledger(&[
            ("2024-01-01", DayKind::Active),
            ("2024-01-02", DayKind::Freeze),
            ("2024-01-03", DayKind::Active),
        ]);
        let walk = bridged_chain(&l, date("2024-01-03"), date(FAR));
        assert_eq!(walk.length, 2);
        assert!(!walk.open_ended);

        // Ending on the freeze itself: the freeze adds nothing.
        assert_eq!(bridged_chain(&l, date("2024-01-02"), date(FAR)).length, 1);
    }

    #[test]
    fn test_bridged_chain_stops_at_first_gap() {
        let l = ledger(&[
            ("2024-01-01", DayKind::Active),
            ("2024-01-02", DayKind::Active),
            ("2024-01-04", DayKind::Freeze),
            ("2024-01-05", DayKind::Active),
        ]);
        assert_eq!(bridged_chain(&l, date("2024-01-05"), date(FAR)).length, 1);
        assert_eq!(bridged_chain(&l, date("2024-01-06"), date(FAR)).length, 0);
    }

    #[test]
    fn test_bridged_chain_reports_open_window() {
        let l = ledger(&[
            ("2024-01-01", DayKind::Active),
            ("2024-01-02", DayKind::Active),
            ("2024-01-03", DayKind::Active),
        ]);
        let walk = bridged_chain(&l, date("2024-01-03"), date("2024-01-02"));
        assert_eq!(walk.length, 2);
        assert!(walk.open_ended);
    }

    #[test]
    fn test_freeze_run_before() {
        let l = ledger(&[
            ("2024-01-01", DayKind::Active),
            ("2024-01-02", DayKind::Freeze),
            ("2024-01-03", DayKind::Freeze),
            ("2024-01-04", DayKind::Freeze),
        ]);
        assert_eq!(freeze_run_before(&l, date("2024-01-05"), 2), 2);
        assert_eq!(freeze_run_before(&l, date("2024-01-05"), 5), 3);
        assert_eq!(freeze_run_before(&l, date("2024-01-03"), 2), 1);
        assert_eq!(freeze_run_before(&l, date("2024-01-02"), 2), 0);
    }

    #[test]
    fn test_ledger_insert_keeps_first() {
        let mut l = ledger(&[("2024-01-01", DayKind::Active)]);
        l.insert(date("2024-01-01"), DayKind::Freeze);
        assert_eq!(l.kind_on(date("2024-01-01")), Some(DayKind::Active));
    }
}
