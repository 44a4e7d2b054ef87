use std::collections::HashMap;

use chrono::NaiveDate;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::assignment::ALL_DONE_TOPIC;
use crate::catalog::Catalog;
use crate::models::{Exercise, ProgressRecord, ResolvedSpot, StudySettings};

/// Days held back from the target when pacing new material.
pub const BUFFER_DAYS: u32 = 2;
pub const DEFAULT_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    DailyCapReached,
    AllDone,
    TopicExhausted,
    NoReviewsDue,
    CompanyNotSelected,
}

impl EmptyReason {
    pub fn message(&self) -> &'static str {
        match self {
            EmptyReason::DailyCapReached => "Daily limit reached. Come back tomorrow!",
            EmptyReason::AllDone => "Everything is learned or mastered. Nice work!",
            EmptyReason::TopicExhausted => "No new problems left in this topic.",
            EmptyReason::NoReviewsDue => "No reviews due today.",
            EmptyReason::CompanyNotSelected => "Select a company first.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedExercise {
    pub exercise: Exercise,
    pub review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum QueueOutcome {
    Ready(Vec<QueuedExercise>),
    NothingAvailable(EmptyReason),
}

/// Read-only view of the learner's state the builder works from.
pub struct QueueContext<'a> {
    pub catalog: &'a Catalog,
    pub progress: &'a HashMap<String, ProgressRecord>,
    /// Due reviews, most overdue first.
    pub due_reviews: &'a [ProgressRecord],
    pub attempts_completed_today: u32,
    pub batch_size: usize,
    pub today: NaiveDate,
}

impl<'a> QueueContext<'a> {
    fn is_new(&self, exercise: &Exercise) -> bool {
        !self.progress.contains_key(&exercise.id)
    }

    fn remaining_new(&self) -> usize {
        self.catalog
            .exercises()
            .iter()
            .filter(|e| self.is_new(e))
            .count()
    }

    fn reviews(&self, topic: Option<&'a str>) -> impl Iterator<Item = QueuedExercise> + 'a {
        let catalog = self.catalog;
        self.due_reviews
            .iter()
            .filter_map(move |r| catalog.get(&r.exercise_id))
            .filter(move |e| topic.map_or(true, |t| e.topic == t))
            .map(|e| QueuedExercise {
                exercise: e.clone(),
                review: true,
            })
    }

    fn new_items(&self, topic: Option<&'a str>) -> impl Iterator<Item = QueuedExercise> + 'a {
        let progress = self.progress;
        self.catalog
            .exercises()
            .iter()
            .filter(move |e| !progress.contains_key(&e.id))
            .filter(move |e| topic.map_or(true, |t| e.topic == t))
            .map(|e| QueuedExercise {
                exercise: e.clone(),
                review: false,
            })
    }
}

/// Days from the start date to the target, counting today; zero once past it.
pub fn days_left(settings: &StudySettings, today: NaiveDate) -> u32 {
    let elapsed = (today - settings.start_date).num_days().max(0);
    let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
    settings.target_days.saturating_sub(elapsed)
}

/// New items to introduce per day to finish on time, with a safety buffer.
pub fn new_per_day(remaining_new: usize, settings: &StudySettings, today: NaiveDate) -> u32 {
    if remaining_new == 0 {
        return 0;
    }
    let effective = days_left(settings, today).saturating_sub(BUFFER_DAYS).max(1) as usize;
    let per_day = remaining_new.div_ceil(effective);
    u32::try_from(per_day).unwrap_or(u32::MAX)
}

pub fn build_daily_queue<R: Rng + ?Sized>(
    spot: &ResolvedSpot,
    settings: &StudySettings,
    ctx: &QueueContext<'_>,
    rng: &mut R,
) -> QueueOutcome {
    let left_today = settings.daily_cap.saturating_sub(ctx.attempts_completed_today) as usize;
    let cap = left_today.min(ctx.batch_size);
    if cap == 0 {
        return QueueOutcome::NothingAvailable(EmptyReason::DailyCapReached);
    }

    let location = &spot.location;
    if location.is_company_specific && spot.selected_company.is_none() {
        return QueueOutcome::NothingAvailable(EmptyReason::CompanyNotSelected);
    }

    let pace = new_per_day(ctx.remaining_new(), settings, ctx.today) as usize;

    if location.new_problems_only {
        if spot.topic == ALL_DONE_TOPIC {
            return QueueOutcome::NothingAvailable(EmptyReason::AllDone);
        }
        let mut queue: Vec<QueuedExercise> = ctx.new_items(Some(spot.topic.as_str())).collect();
        queue.sort_by_key(|q| q.exercise.difficulty);
        queue.truncate(cap.min(pace));
        return ready_or(queue, EmptyReason::TopicExhausted);
    }

    if location.is_random || location.is_company_specific {
        let mut queue: Vec<QueuedExercise> = ctx.reviews(None).take(cap).collect();
        let slots = pace.min(cap - queue.len());
        let mut pool: Vec<QueuedExercise> = ctx.new_items(None).collect();
        pool.shuffle(rng);
        queue.extend(pool.into_iter().take(slots));
        queue.shuffle(rng);
        return ready_or(queue, EmptyReason::AllDone);
    }

    if location.reviews_priority || location.only_reviews {
        let mut queue: Vec<QueuedExercise> = ctx.reviews(None).take(cap).collect();
        if location.only_reviews {
            return ready_or(queue, EmptyReason::NoReviewsDue);
        }
        let slots = pace.min(cap - queue.len());
        queue.extend(ctx.new_items(None).take(slots));
        return ready_or(queue, EmptyReason::AllDone);
    }

    let topic = Some(spot.topic.as_str());
    let mut queue: Vec<QueuedExercise> = ctx.reviews(topic).take(cap).collect();
    let slots = pace.min(cap - queue.len());
    queue.extend(ctx.new_items(topic).take(slots));
    ready_or(queue, EmptyReason::TopicExhausted)
}

fn ready_or(queue: Vec<QueuedExercise>, reason: EmptyReason) -> QueueOutcome {
    if queue.is_empty() {
        debug!("empty queue: {:?}", reason);
        QueueOutcome::NothingAvailable(reason)
    } else {
        QueueOutcome::Ready(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::small_catalog;
    use crate::models::{find_location, CompanySelection, Difficulty, ProblemStatus};
    use crate::ports::start_of_day;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, d).unwrap()
    }

    fn settings(target_days: u32, daily_cap: u32) -> StudySettings {
        StudySettings {
            target_days,
            daily_cap,
            daily_new_goal: daily_cap.min(5),
            start_date: day(1),
        }
    }

    fn learning(id: &str, due: u32) -> ProgressRecord {
        ProgressRecord {
            exercise_id: id.to_string(),
            status: ProblemStatus::Learning,
            best_score: 60,
            review_count: 1,
            qualifying_streak: 0,
            interval_days: 1,
            last_reviewed_at: None,
            next_due_at: Some(start_of_day(day(due))),
        }
    }

    fn spot_at(location_id: &str, topic: &str) -> ResolvedSpot {
        ResolvedSpot {
            location: *find_location(location_id).unwrap(),
            topic: topic.to_string(),
            topic_display: topic.to_string(),
            remaining: 0,
            locked: false,
            questions_answered: 0,
            daily_new_completed: None,
            daily_new_remaining: None,
            selected_company: None,
        }
    }

    fn ids(outcome: &QueueOutcome) -> Vec<String> {
        match outcome {
            QueueOutcome::Ready(items) => items.iter().map(|q| q.exercise.id.clone()).collect(),
            QueueOutcome::NothingAvailable(r) => panic!("expected a queue, got {:?}", r),
        }
    }

    struct Fixture {
        catalog: Catalog,
        progress: HashMap<String, ProgressRecord>,
        due: Vec<ProgressRecord>,
    }

    impl Fixture {
        fn new(records: Vec<ProgressRecord>, due_ids: &[&str]) -> Self {
            let due = due_ids
                .iter()
                .filter_map(|id| records.iter().find(|r| r.exercise_id == *id).cloned())
                .collect();
            Self {
                catalog: small_catalog(),
                progress: records
                    .into_iter()
                    .map(|r| (r.exercise_id.clone(), r))
                    .collect(),
                due,
            }
        }

        fn ctx(&self, attempts: u32, batch_size: usize) -> QueueContext<'_> {
            QueueContext {
                catalog: &self.catalog,
                progress: &self.progress,
                due_reviews: &self.due,
                attempts_completed_today: attempts,
                batch_size,
                today: day(1),
            }
        }
    }

    mod pacing_tests {
        use super::*;

        #[test]
        fn spreads_new_material_over_the_target() {
            let s = settings(10, 15);
            assert_eq!(new_per_day(75, &s, day(1)), 10);
            assert_eq!(new_per_day(80, &s, day(1)), 10);
            assert_eq!(new_per_day(81, &s, day(1)), 11);
        }

        #[test]
        fn accelerates_as_the_deadline_nears() {
            let s = settings(10, 15);
            assert_eq!(days_left(&s, day(8)), 3);
            assert_eq!(new_per_day(30, &s, day(8)), 30);
            assert!(new_per_day(30, &s, day(6)) < new_per_day(30, &s, day(7)));
        }

        #[test]
        fn past_the_target_everything_is_due() {
            let s = settings(10, 15);
            assert_eq!(days_left(&s, day(25)), 0);
            assert_eq!(new_per_day(12, &s, day(25)), 12);
        }

        #[test]
        fn before_the_start_counts_as_day_one() {
            let mut s = settings(10, 15);
            s.start_date = day(20);
            assert_eq!(days_left(&s, day(5)), 10);
        }

        #[test]
        fn nothing_new_means_zero() {
            assert_eq!(new_per_day(0, &settings(10, 15), day(1)), 0);
        }
    }

    mod cap_tests {
        use super::*;

        #[test]
        fn daily_cap_reached() {
            let f = Fixture::new(vec![], &[]);
            let outcome = build_daily_queue(
                &spot_at("mysterious_forest", "random"),
                &settings(10, 10),
                &f.ctx(10, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(outcome, QueueOutcome::NothingAvailable(EmptyReason::DailyCapReached));
        }

        #[test]
        fn cap_is_the_smaller_of_budget_and_batch() {
            let f = Fixture::new(vec![], &[]);
            let outcome = build_daily_queue(
                &spot_at("coffee_sanctuary", "arrays"),
                &settings(3, 10),
                &f.ctx(8, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(ids(&outcome).len(), 2);

            let outcome = build_daily_queue(
                &spot_at("coffee_sanctuary", "arrays"),
                &settings(3, 10),
                &f.ctx(0, 3),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(ids(&outcome).len(), 3);
        }
    }

    mod review_spot_tests {
        use super::*;

        #[test]
        fn nothing_due_does_not_fall_back_to_new_material() {
            let f = Fixture::new(vec![], &[]);
            let outcome = build_daily_queue(
                &spot_at("daily_commute", "reviews"),
                &settings(10, 10),
                &f.ctx(0, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(outcome, QueueOutcome::NothingAvailable(EmptyReason::NoReviewsDue));
        }

        #[test]
        fn reviews_come_most_overdue_first_across_topics() {
            let f = Fixture::new(
                vec![
                    learning("num-islands", 1),
                    learning("two-sum", 1),
                    learning("validate-bst", 1),
                ],
                &["validate-bst", "num-islands", "two-sum"],
            );
            let outcome = build_daily_queue(
                &spot_at("daily_commute", "reviews"),
                &settings(10, 10),
                &f.ctx(0, 2),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(ids(&outcome), vec!["validate-bst", "num-islands"]);
        }
    }

    mod new_only_tests {
        use super::*;

        #[test]
        fn only_new_items_of_the_topic_easy_first() {
            let f = Fixture::new(
                vec![learning("validate-bst", 1), learning("two-sum", 1)],
                &["validate-bst", "two-sum"],
            );
            let outcome = build_daily_queue(
                &spot_at("coffee_sanctuary", "trees"),
                &settings(3, 10),
                &f.ctx(0, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(ids(&outcome), vec!["invert-tree", "max-path-sum"]);
            if let QueueOutcome::Ready(items) = outcome {
                assert!(items.iter().all(|q| !q.review));
                assert_eq!(items[0].exercise.difficulty, Difficulty::Easy);
            }
        }

        #[test]
        fn pace_limits_new_items_below_the_cap() {
            let f = Fixture::new(vec![], &[]);
            // 9 new items over 100 days paces one new item per day.
            let outcome = build_daily_queue(
                &spot_at("coffee_sanctuary", "arrays"),
                &settings(100, 10),
                &f.ctx(0, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(ids(&outcome), vec!["two-sum"]);
        }

        #[test]
        fn exhausted_topic() {
            let f = Fixture::new(vec![learning("num-islands", 3), learning("alien-dictionary", 3)], &[]);
            let outcome = build_daily_queue(
                &spot_at("coffee_sanctuary", "graphs"),
                &settings(10, 10),
                &f.ctx(0, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(outcome, QueueOutcome::NothingAvailable(EmptyReason::TopicExhausted));
        }

        #[test]
        fn all_done_pseudo_topic() {
            let f = Fixture::new(vec![], &[]);
            let outcome = build_daily_queue(
                &spot_at("coffee_sanctuary", ALL_DONE_TOPIC),
                &settings(10, 10),
                &f.ctx(0, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(outcome, QueueOutcome::NothingAvailable(EmptyReason::AllDone));
        }
    }

    mod mixed_spot_tests {
        use super::*;

        #[test]
        fn random_mixes_reviews_with_paced_new_items() {
            let f = Fixture::new(vec![learning("two-sum", 1)], &["two-sum"]);
            // 8 new items over 100 days paces one new item per day.
            let outcome = build_daily_queue(
                &spot_at("mysterious_forest", "random"),
                &settings(100, 10),
                &f.ctx(0, 5),
                &mut StdRng::seed_from_u64(1),
            );
            let QueueOutcome::Ready(items) = outcome else {
                panic!("expected a queue");
            };
            assert_eq!(items.len(), 2);
            assert_eq!(items.iter().filter(|q| q.review).count(), 1);
        }

        #[test]
        fn random_draws_new_items_from_every_topic() {
            let f = Fixture::new(vec![], &[]);
            let mut seen = std::collections::HashSet::new();
            for seed in 0..30 {
                let outcome = build_daily_queue(
                    &spot_at("mysterious_forest", "random"),
                    &settings(100, 10),
                    &f.ctx(0, 5),
                    &mut StdRng::seed_from_u64(seed),
                );
                let QueueOutcome::Ready(items) = outcome else {
                    panic!("expected a queue");
                };
                assert_eq!(items.len(), 1);
                seen.insert(items[0].exercise.topic.clone());
            }
            assert!(seen.len() > 1, "always drew from {:?}", seen);
        }

        #[test]
        fn random_is_deterministic_per_seed() {
            let f = Fixture::new(vec![], &[]);
            let build = |seed| {
                build_daily_queue(
                    &spot_at("mysterious_forest", "random"),
                    &settings(3, 10),
                    &f.ctx(0, 5),
                    &mut StdRng::seed_from_u64(seed),
                )
            };
            assert_eq!(build(9), build(9));
            assert_eq!(ids(&build(9)).len(), 5);
        }

        #[test]
        fn company_spot_needs_a_selection() {
            let f = Fixture::new(vec![], &[]);
            let mut park = spot_at("himmel_park", "company_specific");
            let outcome = build_daily_queue(
                &park,
                &settings(3, 10),
                &f.ctx(0, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(outcome, QueueOutcome::NothingAvailable(EmptyReason::CompanyNotSelected));

            park.selected_company = Some(CompanySelection {
                company_id: "acme".to_string(),
                company_name: "Acme".to_string(),
            });
            let outcome = build_daily_queue(
                &park,
                &settings(3, 10),
                &f.ctx(0, 5),
                &mut StdRng::seed_from_u64(1),
            );
            assert_eq!(ids(&outcome).len(), 5);
        }

        #[test]
        fn reasons_serialize_snake_case() {
            let json = serde_json::to_string(&QueueOutcome::NothingAvailable(
                EmptyReason::NoReviewsDue,
            ))
            .unwrap();
            assert_eq!(json, r#"{"status":"nothing_available","detail":"no_reviews_due"}"#);
        }
    }
}
