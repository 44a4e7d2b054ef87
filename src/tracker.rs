use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use log::{debug, info, warn};

use crate::models::{Difficulty, ProblemStatus, ProgressRecord};
use crate::ports::{start_of_day, Clock};
use crate::store::Store;

/// Scores at or above this count toward mastery.
pub const MASTERY_SCORE: u8 = 75;
/// Scores at or above this hold the streak without advancing it.
pub const PASS_SCORE: u8 = 70;

// Review intervals in days, indexed by the qualifying streak.
const INTERVALS: [u32; 5] = [1, 3, 7, 14, 30];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreTier {
    Excellent,
    Passed,
    Relearn,
}

impl ScoreTier {
    pub fn from_score(score: u8) -> Self {
        if score >= MASTERY_SCORE {
            ScoreTier::Excellent
        } else if score >= PASS_SCORE {
            ScoreTier::Passed
        } else {
            ScoreTier::Relearn
        }
    }
}

pub fn interval_for_streak(streak: u32) -> u32 {
    let idx = (streak as usize).min(INTERVALS.len() - 1);
    INTERVALS[idx]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt<'a> {
    pub exercise_id: &'a str,
    pub score: u8,
    pub difficulty: Difficulty,
    pub time_spent_secs: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecorded {
    pub record: ProgressRecord,
    pub first_attempt: bool,
    /// The item was not due yet; only the best score and timestamp moved.
    pub extra_practice: bool,
}

/// Advances per-exercise mastery state. Store failures degrade to "no record"
/// on read and are logged on write; nothing here returns an error.
pub struct ProgressTracker<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(store: &'a dyn Store, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    pub fn record_attempt(&self, user: &str, attempt: &Attempt<'_>) -> AttemptRecorded {
        let existing = match self.store.load_progress(user, attempt.exercise_id) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "reading progress for {} failed, treating as first attempt: {}",
                    attempt.exercise_id, e
                );
                None
            }
        };

        let first_attempt = existing.is_none();
        let today = self.clock.today();
        let extra_practice = existing.as_ref().map_or(false, |r| {
            !r.is_mastered() && r.due_day().map_or(false, |due| due > today)
        });
        let mut record = existing.unwrap_or_else(|| ProgressRecord {
            exercise_id: attempt.exercise_id.to_string(),
            status: ProblemStatus::Learning,
            best_score: 0,
            review_count: 0,
            qualifying_streak: 0,
            interval_days: 0,
            last_reviewed_at: None,
            next_due_at: None,
        });

        let score = attempt.score.min(100);
        record.best_score = record.best_score.max(score);
        record.last_reviewed_at = Some(self.clock.now());

        if extra_practice {
            debug!(
                "{} is not due until {:?}, recording as extra practice",
                attempt.exercise_id,
                record.due_day()
            );
        } else {
            record.review_count += 1;
            // Mastered is terminal; a poor score does not demote it.
            if !record.is_mastered() {
                self.advance(&mut record, score, attempt.difficulty, first_attempt);
            }
        }

        debug!(
            "{} scored {} in {}s: status={} streak={} interval={}d",
            attempt.exercise_id,
            score,
            attempt.time_spent_secs,
            record.status.as_str(),
            record.qualifying_streak,
            record.interval_days
        );

        if let Err(e) = self.store.save_progress(user, &record) {
            warn!("saving progress for {} failed: {}", attempt.exercise_id, e);
        }

        AttemptRecorded {
            record,
            first_attempt,
            extra_practice,
        }
    }

    fn advance(&self, record: &mut ProgressRecord, score: u8, difficulty: Difficulty, first: bool) {
        match ScoreTier::from_score(score) {
            ScoreTier::Excellent => {
                record.qualifying_streak += 1;
                record.interval_days = interval_for_streak(record.qualifying_streak);
            }
            ScoreTier::Passed => {
                record.interval_days = INTERVALS[0];
            }
            ScoreTier::Relearn => {
                record.qualifying_streak = 0;
                record.interval_days = INTERVALS[0];
            }
        }

        // A passed review keeps the streak, so it can complete mastery too.
        if !first && record.qualifying_streak >= difficulty.required_streak() {
            info!(
                "{} mastered after {} reviews",
                record.exercise_id, record.review_count
            );
            record.status = ProblemStatus::Mastered;
            record.next_due_at = None;
            return;
        }

        record.status = ProblemStatus::Learning;
        let due = self.clock.today() + Days::new(record.interval_days as u64);
        record.next_due_at = Some(start_of_day(due));
    }

    /// All stored progress for the user keyed by exercise id; empty when the
    /// store cannot be read.
    pub fn progress_map(&self, user: &str) -> HashMap<String, ProgressRecord> {
        match self.store.list_progress(user) {
            Ok(records) => records
                .into_iter()
                .map(|r| (r.exercise_id.clone(), r))
                .collect(),
            Err(e) => {
                warn!("listing progress for {} failed: {}", user, e);
                HashMap::new()
            }
        }
    }

    /// Learning records due on or before today, most overdue first.
    pub fn due_today(&self, user: &str) -> Vec<ProgressRecord> {
        let today = self.clock.today();
        self.due_where(user, |day| day <= today)
    }

    /// Learning records due exactly tomorrow.
    pub fn due_tomorrow(&self, user: &str) -> Vec<ProgressRecord> {
        let tomorrow = self.clock.tomorrow();
        self.due_where(user, |day| day == tomorrow)
    }

    fn due_where<F>(&self, user: &str, pred: F) -> Vec<ProgressRecord>
    where
        F: Fn(NaiveDate) -> bool,
    {
        let mut due: Vec<ProgressRecord> = self
            .progress_map(user)
            .into_values()
            .filter(|r| r.status == ProblemStatus::Learning)
            .filter(|r| r.due_day().map(&pred).unwrap_or(false))
            .collect();

        due.sort_by(|a, b| {
            a.next_due_at
                .cmp(&b.next_due_at)
                .then_with(|| a.exercise_id.cmp(&b.exercise_id))
        });
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use crate::store::fakes::BrokenStore;
    use crate::store::MemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn attempt(id: &str, score: u8, difficulty: Difficulty) -> Attempt<'_> {
        Attempt {
            exercise_id: id,
            score,
            difficulty,
            time_spent_secs: 600,
        }
    }

    mod tier_tests {
        use super::*;

        #[test]
        fn boundaries() {
            assert_eq!(ScoreTier::from_score(100), ScoreTier::Excellent);
            assert_eq!(ScoreTier::from_score(75), ScoreTier::Excellent);
            assert_eq!(ScoreTier::from_score(74), ScoreTier::Passed);
            assert_eq!(ScoreTier::from_score(70), ScoreTier::Passed);
            assert_eq!(ScoreTier::from_score(69), ScoreTier::Relearn);
            assert_eq!(ScoreTier::from_score(0), ScoreTier::Relearn);
        }

        #[test]
        fn intervals_never_shrink_with_streak() {
            let mut last = 0;
            for streak in 0..10 {
                let interval = interval_for_streak(streak);
                assert!(interval >= last);
                last = interval;
            }
            assert_eq!(interval_for_streak(100), 30);
        }
    }

    mod record_attempt_tests {
        use super::*;

        #[test]
        fn first_attempt_creates_learning_record() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(10));
            let tracker = ProgressTracker::new(&store, &clock);

            let out = tracker.record_attempt("ada", &attempt("two-sum", 95, Difficulty::Easy));

            assert!(out.first_attempt);
            assert_eq!(out.record.status, ProblemStatus::Learning);
            assert_eq!(out.record.review_count, 1);
            assert_eq!(out.record.best_score, 95);
            assert_eq!(out.record.due_day(), Some(day(13)));
            assert_eq!(store.load_progress("ada", "two-sum").unwrap(), Some(out.record));
        }

        #[test]
        fn medium_masters_on_second_consecutive_qualifying_score() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(10));
            let tracker = ProgressTracker::new(&store, &clock);

            tracker.record_attempt("ada", &attempt("group-anagrams", 80, Difficulty::Medium));
            clock.advance_days(3);
            let out =
                tracker.record_attempt("ada", &attempt("group-anagrams", 80, Difficulty::Medium));

            assert!(!out.first_attempt);
            assert_eq!(out.record.status, ProblemStatus::Mastered);
            assert_eq!(out.record.qualifying_streak, 2);
            assert!(out.record.next_due_at.is_none());
        }

        #[test]
        fn hard_needs_three_qualifying_scores() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            // Each attempt lands on the day the previous one scheduled.
            for wait in [0, 3] {
                clock.advance_days(wait);
                let out = tracker.record_attempt("ada", &attempt("lru", 90, Difficulty::Hard));
                assert_eq!(out.record.status, ProblemStatus::Learning);
            }
            clock.advance_days(7);
            let out = tracker.record_attempt("ada", &attempt("lru", 90, Difficulty::Hard));
            assert_eq!(out.record.status, ProblemStatus::Mastered);
            assert_eq!(out.record.qualifying_streak, 3);
        }

        #[test]
        fn first_attempt_never_masters_easy() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            let out = tracker.record_attempt("ada", &attempt("two-sum", 100, Difficulty::Easy));
            assert_eq!(out.record.status, ProblemStatus::Learning);

            clock.advance_days(3);
            let out = tracker.record_attempt("ada", &attempt("two-sum", 100, Difficulty::Easy));
            assert_eq!(out.record.status, ProblemStatus::Mastered);
        }

        #[test]
        fn failing_score_resets_streak_and_interval() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            tracker.record_attempt("ada", &attempt("lru", 90, Difficulty::Hard));
            clock.advance_days(3);
            let out = tracker.record_attempt("ada", &attempt("lru", 90, Difficulty::Hard));
            assert_eq!(out.record.interval_days, 7);

            clock.advance_days(7);
            let out = tracker.record_attempt("ada", &attempt("lru", 40, Difficulty::Hard));
            assert_eq!(out.record.qualifying_streak, 0);
            assert_eq!(out.record.interval_days, 1);
            assert_eq!(out.record.due_day(), Some(day(12)));
            assert_eq!(out.record.best_score, 90);
            assert_eq!(out.record.review_count, 3);
        }

        #[test]
        fn passing_score_holds_streak_and_is_due_tomorrow() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            tracker.record_attempt("ada", &attempt("lru", 80, Difficulty::Hard));
            clock.advance_days(3);
            let out = tracker.record_attempt("ada", &attempt("lru", 72, Difficulty::Hard));

            assert_eq!(out.record.qualifying_streak, 1);
            assert_eq!(out.record.due_day(), Some(day(5)));
        }

        #[test]
        fn mastered_is_sticky() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            tracker.record_attempt("ada", &attempt("two-sum", 90, Difficulty::Easy));
            clock.advance_days(3);
            tracker.record_attempt("ada", &attempt("two-sum", 90, Difficulty::Easy));
            clock.advance_days(5);
            let out = tracker.record_attempt("ada", &attempt("two-sum", 10, Difficulty::Easy));

            assert_eq!(out.record.status, ProblemStatus::Mastered);
            assert_eq!(out.record.review_count, 3);
            assert!(out.record.next_due_at.is_none());
            assert_eq!(out.record.last_reviewed_at, Some(clock.now()));
        }

        #[test]
        fn attempts_before_the_due_day_are_extra_practice() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            tracker.record_attempt("ada", &attempt("lru", 80, Difficulty::Hard));
            for score in [90, 95] {
                let out = tracker.record_attempt("ada", &attempt("lru", score, Difficulty::Hard));
                assert!(out.extra_practice);
                assert_eq!(out.record.status, ProblemStatus::Learning);
                assert_eq!(out.record.qualifying_streak, 1);
                assert_eq!(out.record.interval_days, 3);
                assert_eq!(out.record.review_count, 1);
                assert_eq!(out.record.due_day(), Some(day(4)));
            }

            let stored = store.load_progress("ada", "lru").unwrap().unwrap();
            assert_eq!(stored.best_score, 95);
            assert_eq!(stored.last_reviewed_at, Some(clock.now()));
        }

        #[test]
        fn due_attempt_is_not_extra_practice() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            let first = tracker.record_attempt("ada", &attempt("lru", 80, Difficulty::Hard));
            assert!(!first.extra_practice);

            clock.advance_days(5);
            let overdue = tracker.record_attempt("ada", &attempt("lru", 80, Difficulty::Hard));
            assert!(!overdue.extra_practice);
            assert_eq!(overdue.record.qualifying_streak, 2);
        }

        #[test]
        fn passing_review_completes_easy_mastery() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            tracker.record_attempt("ada", &attempt("two-sum", 80, Difficulty::Easy));
            clock.advance_days(3);
            let out = tracker.record_attempt("ada", &attempt("two-sum", 72, Difficulty::Easy));

            assert_eq!(out.record.status, ProblemStatus::Mastered);
            assert_eq!(out.record.qualifying_streak, 1);
        }

        #[test]
        fn broken_store_does_not_fail_the_attempt() {
            let store = BrokenStore;
            let clock = FixedClock::on(day(1));
            let tracker = ProgressTracker::new(&store, &clock);

            let out = tracker.record_attempt("ada", &attempt("two-sum", 50, Difficulty::Easy));

            assert!(out.first_attempt);
            assert_eq!(out.record.status, ProblemStatus::Learning);
            assert_eq!(out.record.review_count, 1);
            assert!(tracker.due_today("ada").is_empty());
        }
    }

    mod due_tests {
        use super::*;

        fn seed(store: &MemoryStore, id: &str, status: ProblemStatus, due: Option<NaiveDate>) {
            store
                .save_progress(
                    "ada",
                    &ProgressRecord {
                        exercise_id: id.to_string(),
                        status,
                        best_score: 60,
                        review_count: 1,
                        qualifying_streak: 0,
                        interval_days: 1,
                        last_reviewed_at: None,
                        next_due_at: due.map(start_of_day),
                    },
                )
                .unwrap();
        }

        #[test]
        fn due_sets_are_disjoint_and_exclude_mastered() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(10));
            seed(&store, "overdue", ProblemStatus::Learning, Some(day(7)));
            seed(&store, "today", ProblemStatus::Learning, Some(day(10)));
            seed(&store, "tomorrow", ProblemStatus::Learning, Some(day(11)));
            seed(&store, "later", ProblemStatus::Learning, Some(day(14)));
            seed(&store, "mastered", ProblemStatus::Mastered, Some(day(9)));

            let tracker = ProgressTracker::new(&store, &clock);
            let today: Vec<String> = tracker
                .due_today("ada")
                .into_iter()
                .map(|r| r.exercise_id)
                .collect();
            let tomorrow: Vec<String> = tracker
                .due_tomorrow("ada")
                .into_iter()
                .map(|r| r.exercise_id)
                .collect();

            assert_eq!(today, vec!["overdue", "today"]);
            assert_eq!(tomorrow, vec!["tomorrow"]);
        }

        #[test]
        fn rolling_the_clock_moves_tomorrow_into_today() {
            let store = MemoryStore::new();
            let clock = FixedClock::on(day(10));
            seed(&store, "tomorrow", ProblemStatus::Learning, Some(day(11)));
            let tracker = ProgressTracker::new(&store, &clock);
            assert!(tracker.due_today("ada").is_empty());

            clock.advance_days(1);
            assert_eq!(tracker.due_today("ada").len(), 1);
            assert!(tracker.due_tomorrow("ada").is_empty());
        }
    }
}
