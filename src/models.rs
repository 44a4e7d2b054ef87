use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "easy" | "e" => Some(Difficulty::Easy),
            "medium" | "med" | "m" => Some(Difficulty::Medium),
            "hard" | "h" => Some(Difficulty::Hard),
            _ => None,
        }
    }

    /// Qualifying streak that masters the item. The streak only grows on scores
    /// of 75 or more, but once it is reached any later due review scoring 70 or
    /// more completes mastery.
    pub fn required_streak(&self) -> u32 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub title: String,
    pub topic: String,
    pub difficulty: Difficulty,
}

// Persisted progress never carries `New`: a missing record is the new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemStatus {
    New,
    Learning,
    Mastered,
}

impl ProblemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemStatus::New => "new",
            ProblemStatus::Learning => "learning",
            ProblemStatus::Mastered => "mastered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "new" => Some(ProblemStatus::New),
            "learning" => Some(ProblemStatus::Learning),
            "mastered" => Some(ProblemStatus::Mastered),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProblemStatus::New => "New",
            ProblemStatus::Learning => "Learning",
            ProblemStatus::Mastered => "Mastered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub exercise_id: String,
    pub status: ProblemStatus,
    pub best_score: u8,
    pub review_count: u32,
    pub qualifying_streak: u32,
    pub interval_days: u32,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn is_mastered(&self) -> bool {
        self.status == ProblemStatus::Mastered
    }

    pub fn due_day(&self) -> Option<NaiveDate> {
        self.next_due_at.map(|ts| ts.date_naive())
    }
}

/// A practice location. Static policy, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub id: &'static str,
    pub name: &'static str,
    pub ritual: &'static str,
    pub description: &'static str,
    pub is_random: bool,
    pub reviews_priority: bool,
    pub only_reviews: bool,
    pub new_problems_only: bool,
    pub is_company_specific: bool,
}

impl Location {
    /// Locations whose topic binding can be frozen for the day.
    pub fn is_lockable(&self) -> bool {
        !self.is_random && !self.only_reviews && !self.is_company_specific
    }
}

pub const LOCATIONS: [Location; 4] = [
    Location {
        id: "daily_commute",
        name: "The Daily Commute",
        ritual: "Transit",
        description: "Never miss your daily reviews!",
        is_random: false,
        reviews_priority: true,
        only_reviews: true,
        new_problems_only: false,
        is_company_specific: false,
    },
    Location {
        id: "coffee_sanctuary",
        name: "The Coffee Sanctuary",
        ritual: "Deep Focus",
        description: "A warm brew and focused topic practice.",
        is_random: false,
        reviews_priority: false,
        only_reviews: false,
        new_problems_only: true,
        is_company_specific: false,
    },
    Location {
        id: "mysterious_forest",
        name: "The Mysterious Forest",
        ritual: "Adventure",
        description: "Venture into the unknown with mixed challenges.",
        is_random: true,
        reviews_priority: false,
        only_reviews: false,
        new_problems_only: false,
        is_company_specific: false,
    },
    Location {
        id: "himmel_park",
        name: "Himmel Park",
        ritual: "Interview Prep",
        description: "Company-specific interview practice.",
        is_random: false,
        reviews_priority: false,
        only_reviews: false,
        new_problems_only: false,
        is_company_specific: true,
    },
];

pub fn find_location(id: &str) -> Option<&'static Location> {
    LOCATIONS.iter().find(|l| l.id == id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotLock {
    pub location_id: String,
    pub topic: String,
    pub topic_display: String,
    pub locked: bool,
    pub questions_answered: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAssignment {
    pub date: NaiveDate,
    pub assignments: Vec<SpotLock>,
    /// Bumped on every write; lets a store reject stale writers.
    #[serde(default)]
    pub revision: u64,
}

impl DailyAssignment {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            assignments: Vec::new(),
            revision: 0,
        }
    }

    #[cfg(test)]
    pub fn lock_for(&self, location_id: &str) -> Option<&SpotLock> {
        self.assignments
            .iter()
            .find(|a| a.location_id == location_id && a.locked)
    }

    pub fn lock_for_mut(&mut self, location_id: &str) -> Option<&mut SpotLock> {
        self.assignments
            .iter_mut()
            .find(|a| a.location_id == location_id && a.locked)
    }
}

pub const DEFAULT_TARGET_DAYS: u32 = 10;
pub const DEFAULT_DAILY_CAP: u32 = 15;
pub const DEFAULT_DAILY_NEW_GOAL: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySettings {
    pub target_days: u32,
    pub daily_cap: u32,
    pub daily_new_goal: u32,
    pub start_date: NaiveDate,
}

impl StudySettings {
    /// Repairs values that would break pacing instead of rejecting them.
    pub fn clamped(mut self) -> Self {
        self.target_days = self.target_days.max(1);
        self.daily_cap = self.daily_cap.max(1);
        self.daily_new_goal = self.daily_new_goal.min(self.daily_cap);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub new_completed: u32,
    pub attempts_completed: u32,
}

impl DailyActivity {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            new_completed: 0,
            attempts_completed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanySelection {
    pub company_id: String,
    pub company_name: String,
}

/// A location bound to today's topic, as shown to the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSpot {
    pub location: Location,
    pub topic: String,
    pub topic_display: String,
    pub remaining: usize,
    pub locked: bool,
    pub questions_answered: u32,
    pub daily_new_completed: Option<u32>,
    pub daily_new_remaining: Option<u32>,
    pub selected_company: Option<CompanySelection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudySummary {
    pub total: usize,
    pub new_count: usize,
    pub learning_count: usize,
    pub mastered_count: usize,
    pub due_today: usize,
    pub due_tomorrow: usize,
    pub days_left: u32,
    pub on_pace: bool,
    pub new_per_day: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExerciseProgress {
    pub exercise: Exercise,
    pub progress: Option<ProgressRecord>,
    pub due_today: bool,
}

impl ExerciseProgress {
    pub fn status(&self) -> ProblemStatus {
        self.progress
            .as_ref()
            .map(|p| p.status)
            .unwrap_or(ProblemStatus::New)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupProgress {
    pub topic: String,
    pub display_name: String,
    pub exercises: Vec<ExerciseProgress>,
    pub mastered_count: usize,
    pub total_count: usize,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
