use std::collections::HashMap;

use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::assignment::{
    self, lock_spot, record_on_topic_attempt, remember_pick, reroll_topic,
    resolve_todays_assignments, todays_assignment, TodayContext, ALL_DONE_TOPIC, UNLOCK_THRESHOLD,
};
use crate::catalog::TopicGroup;
use crate::catalog::Catalog;
use crate::models::{
    find_location, CompanySelection, DailyActivity, Difficulty, ExerciseProgress, GroupProgress,
    ProblemStatus, ProgressRecord, ResolvedSpot, SpotLock, StudySettings, StudySummary,
    DEFAULT_DAILY_CAP, DEFAULT_DAILY_NEW_GOAL, DEFAULT_TARGET_DAYS,
};
use crate::ports::{Clock, RngSource};
use crate::queue::{self, build_daily_queue, QueueContext, QueueOutcome, DEFAULT_BATCH_SIZE};
use crate::store::{Store, StoreError};
use crate::tracker::{Attempt, ProgressTracker};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown location '{0}'")]
    UnknownLocation(String),
    #[error("'{0}' does not offer company practice")]
    NotCompanySpot(String),
    #[error("'{0}' cannot be refreshed: only open topic spots can")]
    NotRefreshable(String),
    #[error("no other topic is available for '{0}'")]
    NoAlternativeTopic(String),
    #[error("unknown exercise '{0}'")]
    UnknownExercise(String),
    #[error("score {0} is outside 0..=100")]
    InvalidScore(u32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Tunables that are not per-user settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub unlock_threshold: u32,
    pub batch_size: usize,
    pub target_days: u32,
    pub daily_cap: u32,
    pub daily_new_goal: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            unlock_threshold: UNLOCK_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            target_days: DEFAULT_TARGET_DAYS,
            daily_cap: DEFAULT_DAILY_CAP,
            daily_new_goal: DEFAULT_DAILY_NEW_GOAL,
        }
    }
}

impl Policy {
    fn settings_from(&self, start_date: NaiveDate) -> StudySettings {
        StudySettings {
            target_days: self.target_days,
            daily_cap: self.daily_cap,
            daily_new_goal: self.daily_new_goal,
            start_date,
        }
        .clamped()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub exercise_id: String,
    pub score: u32,
    pub difficulty: Difficulty,
    pub time_spent_secs: u32,
    /// Where the attempt happened, when it came from a spot.
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptOutcome {
    pub record: ProgressRecord,
    pub first_attempt: bool,
    pub extra_practice: bool,
    pub questions_answered: Option<u32>,
    pub unlocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnteredSpot {
    pub spot: ResolvedSpot,
    pub queue: QueueOutcome,
}

// Per-call view of one user's state.
struct Snapshot {
    today: NaiveDate,
    progress: HashMap<String, ProgressRecord>,
    due: Vec<ProgressRecord>,
    locked: Vec<SpotLock>,
    activity: DailyActivity,
    settings: StudySettings,
}

/// The session-facing entry point. Holds no per-user state between calls;
/// everything is read from the store on demand.
pub struct Scheduler<S: Store, C: Clock, R: RngSource> {
    store: S,
    clock: C,
    rng: R,
    catalog: Catalog,
    policy: Policy,
}

impl<S: Store, C: Clock, R: RngSource> Scheduler<S, C, R> {
    pub fn new(store: S, clock: C, rng: R, catalog: Catalog, policy: Policy) -> Self {
        Self {
            store,
            clock,
            rng,
            catalog,
            policy,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[cfg(test)]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn tracker(&self) -> ProgressTracker<'_> {
        ProgressTracker::new(&self.store, &self.clock)
    }

    fn activity(&self, user: &str, today: NaiveDate) -> DailyActivity {
        match self.store.load_activity(user, today) {
            Ok(activity) => activity.unwrap_or_else(|| DailyActivity::empty(today)),
            Err(e) => {
                warn!("reading activity for {} failed: {}", user, e);
                DailyActivity::empty(today)
            }
        }
    }

    fn snapshot(&self, user: &str) -> Snapshot {
        let today = self.clock.today();
        let tracker = self.tracker();
        Snapshot {
            today,
            progress: tracker.progress_map(user),
            due: tracker.due_today(user),
            locked: todays_assignment(&self.store, user, today)
                .map(|a| a.assignments)
                .unwrap_or_default(),
            activity: self.activity(user, today),
            settings: self.settings(user),
        }
    }

    fn today_context<'a>(&self, snap: &'a Snapshot, groups: &'a [TopicGroup]) -> TodayContext<'a> {
        TodayContext {
            groups,
            locked: &snap.locked,
            due_review_count: snap.due.len(),
            daily_new_completed: snap.activity.new_completed,
            daily_new_goal: snap.settings.daily_new_goal,
            unlock_threshold: self.policy.unlock_threshold,
        }
    }

    fn resolve(&self, user: &str, snap: &Snapshot) -> Vec<ResolvedSpot> {
        let groups = self.catalog.groups(&snap.progress);
        let mut rng = self.rng.rng_for(user, snap.today);
        resolve_todays_assignments(&self.today_context(snap, &groups), &mut rng)
    }

    pub fn spots_for_today(&self, user: &str) -> Vec<ResolvedSpot> {
        let snap = self.snapshot(user);
        self.resolve(user, &snap)
    }

    /// Enters a spot: freezes its topic if it was open and builds the queue.
    pub fn enter_spot(&self, user: &str, location_id: &str) -> Result<EnteredSpot> {
        let snap = self.snapshot(user);
        let mut spot = self
            .resolve(user, &snap)
            .into_iter()
            .find(|s| s.location.id == location_id)
            .ok_or_else(|| SchedulerError::UnknownLocation(location_id.to_string()))?;

        if lock_spot(&self.store, user, snap.today, &spot) {
            spot.locked = true;
            spot.questions_answered = 0;
        }

        let ctx = QueueContext {
            catalog: &self.catalog,
            progress: &snap.progress,
            due_reviews: &snap.due,
            attempts_completed_today: snap.activity.attempts_completed,
            batch_size: self.policy.batch_size,
            today: snap.today,
        };
        let mut rng = self.rng.rng_for(user, snap.today);
        let queue = build_daily_queue(&spot, &snap.settings, &ctx, &mut rng);

        Ok(EnteredSpot { spot, queue })
    }

    /// Swaps an open topic spot to a different topic. Locked spots and spots
    /// without a topic of their own are rejected.
    pub fn refresh_spot(&self, user: &str, location_id: &str) -> Result<ResolvedSpot> {
        let snap = self.snapshot(user);
        let groups = self.catalog.groups(&snap.progress);
        let ctx = self.today_context(&snap, &groups);
        let mut rng = self.rng.rng_for(user, snap.today);
        let spots = resolve_todays_assignments(&ctx, &mut rng);

        let spot = spots
            .iter()
            .find(|s| s.location.id == location_id)
            .ok_or_else(|| SchedulerError::UnknownLocation(location_id.to_string()))?;
        if !spot.location.is_lockable()
            || spot.locked
            || spot.remaining == 0
            || spot.topic == ALL_DONE_TOPIC
        {
            return Err(SchedulerError::NotRefreshable(location_id.to_string()));
        }

        let rerolled = reroll_topic(spot, &spots, &ctx, &mut rng)
            .ok_or_else(|| SchedulerError::NoAlternativeTopic(location_id.to_string()))?;
        if !remember_pick(&self.store, user, snap.today, &rerolled) {
            return Err(SchedulerError::Store(StoreError::Unavailable(
                "refreshed topic was not saved".to_string(),
            )));
        }
        Ok(rerolled)
    }

    pub fn report_attempt(&self, user: &str, report: &AttemptReport) -> Result<AttemptOutcome> {
        let score = u8::try_from(report.score)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or(SchedulerError::InvalidScore(report.score))?;
        let exercise = self
            .catalog
            .get(&report.exercise_id)
            .ok_or_else(|| SchedulerError::UnknownExercise(report.exercise_id.clone()))?;
        let location = report
            .location_id
            .as_deref()
            .map(|id| {
                find_location(id).ok_or_else(|| SchedulerError::UnknownLocation(id.to_string()))
            })
            .transpose()?;

        let recorded = self.tracker().record_attempt(
            user,
            &Attempt {
                exercise_id: &exercise.id,
                score,
                difficulty: report.difficulty,
                time_spent_secs: report.time_spent_secs,
            },
        );

        let today = self.clock.today();
        let mut activity = self.activity(user, today);
        if recorded.first_attempt {
            activity.new_completed += 1;
        }
        activity.attempts_completed += 1;
        if let Err(e) = self.store.save_activity(user, &activity) {
            warn!("saving activity for {} failed: {}", user, e);
        }

        let questions_answered = location
            .filter(|l| l.new_problems_only)
            .map(|l| record_on_topic_attempt(&self.store, user, today, l.id, &exercise.topic));
        let unlocked = questions_answered.map_or(false, |n| n >= self.policy.unlock_threshold);
        if unlocked {
            info!("{} may move on from '{}'", user, exercise.topic);
        }

        Ok(AttemptOutcome {
            record: recorded.record,
            first_attempt: recorded.first_attempt,
            extra_practice: recorded.extra_practice,
            questions_answered,
            unlocked,
        })
    }

    pub fn study_summary(&self, user: &str) -> StudySummary {
        let today = self.clock.today();
        let tracker = self.tracker();
        let progress = tracker.progress_map(user);
        let settings = self.settings(user);

        let status_of = |id: &str| progress.get(id).map(|p| p.status).unwrap_or(ProblemStatus::New);
        let count = |status| {
            self.catalog
                .exercises()
                .iter()
                .filter(|e| status_of(e.id.as_str()) == status)
                .count()
        };

        let total = self.catalog.len();
        let new_count = count(ProblemStatus::New);
        let learning_count = count(ProblemStatus::Learning);
        let mastered_count = count(ProblemStatus::Mastered);

        let elapsed = (today - settings.start_date).num_days().max(0) as u64;
        let target = settings.target_days.max(1) as u64;
        let introduced = (learning_count + mastered_count) as u64;
        let on_pace = introduced * target >= (elapsed + 1).min(target) * total as u64;

        StudySummary {
            total,
            new_count,
            learning_count,
            mastered_count,
            due_today: tracker.due_today(user).len(),
            due_tomorrow: tracker.due_tomorrow(user).len(),
            days_left: queue::days_left(&settings, today).max(1),
            on_pace,
            new_per_day: queue::new_per_day(new_count, &settings, today),
        }
    }

    /// Stored settings, or the policy defaults starting today (persisted on
    /// first use).
    pub fn settings(&self, user: &str) -> StudySettings {
        match self.store.load_settings(user) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                let settings = self.policy.settings_from(self.clock.today());
                if let Err(e) = self.store.save_settings(user, &settings) {
                    warn!("saving default settings for {} failed: {}", user, e);
                }
                settings
            }
            Err(e) => {
                warn!("reading settings for {} failed: {}", user, e);
                self.policy.settings_from(self.clock.today())
            }
        }
    }

    pub fn save_settings(&self, user: &str, settings: StudySettings) -> Result<StudySettings> {
        let settings = settings.clamped();
        self.store.save_settings(user, &settings)?;
        Ok(settings)
    }

    pub fn select_company(
        &self,
        user: &str,
        location_id: &str,
        company_id: &str,
        company_name: &str,
    ) -> Result<ResolvedSpot> {
        let location = find_location(location_id)
            .ok_or_else(|| SchedulerError::UnknownLocation(location_id.to_string()))?;
        if !location.is_company_specific {
            return Err(SchedulerError::NotCompanySpot(location_id.to_string()));
        }

        let company = CompanySelection {
            company_id: company_id.to_string(),
            company_name: company_name.to_string(),
        };
        let today = self.clock.today();
        if !assignment::select_company(&self.store, user, today, location.id, &company) {
            return Err(SchedulerError::Store(StoreError::Unavailable(
                "company selection was not saved".to_string(),
            )));
        }

        self.spots_for_today(user)
            .into_iter()
            .find(|s| s.location.id == location.id)
            .ok_or_else(|| SchedulerError::UnknownLocation(location_id.to_string()))
    }

    pub fn progress_grid(&self, user: &str) -> Vec<GroupProgress> {
        let today = self.clock.today();
        let progress = self.tracker().progress_map(user);

        self.catalog
            .groups(&progress)
            .into_iter()
            .map(|group| {
                let mastered_count = group.mastered_count();
                let exercises: Vec<ExerciseProgress> = group
                    .exercises
                    .into_iter()
                    .map(|(exercise, _)| {
                        let record = progress.get(&exercise.id).cloned();
                        let due_today = record.as_ref().map_or(false, |r| {
                            !r.is_mastered() && r.due_day().map_or(false, |d| d <= today)
                        });
                        ExerciseProgress {
                            exercise,
                            progress: record,
                            due_today,
                        }
                    })
                    .collect();
                GroupProgress {
                    topic: group.topic,
                    display_name: group.display_name,
                    total_count: exercises.len(),
                    mastered_count,
                    exercises,
                }
            })
            .collect()
    }

    /// Restarts the pacing clock with default settings from today.
    pub fn reset_study_plan(&self, user: &str) -> Result<StudySettings> {
        let settings = self.policy.settings_from(self.clock.today());
        self.store.save_settings(user, &settings)?;
        info!("study plan reset for {}", user);
        Ok(settings)
    }

    /// Forgets all attempts and today's spot bindings. Settings are kept.
    pub fn reset_progress(&self, user: &str) -> Result<()> {
        self.store.delete_progress(user)?;
        self.store.delete_assignment(user)?;
        self.store
            .save_activity(user, &DailyActivity::empty(self.clock.today()))?;
        info!("progress reset for {}", user);
        Ok(())
    }
}
