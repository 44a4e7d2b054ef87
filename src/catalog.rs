use std::collections::HashMap;

use thiserror::Error;

use crate::models::{Exercise, ProblemStatus, ProgressRecord};

const BLIND_75: &str = include_str!("data/blind75.json");

// Curriculum order for topic listings; groups not named here sort after, by name.
const GROUP_ORDER: [&str; 17] = [
    "arrays_hashing",
    "two_pointers",
    "sliding_window",
    "stack",
    "binary_search",
    "linked_list",
    "trees",
    "tries",
    "heap",
    "backtracking",
    "graphs",
    "dynamic_programming_1d",
    "dynamic_programming_2d",
    "greedy",
    "intervals",
    "math_geometry",
    "bit_manipulation",
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate exercise id '{0}' in catalog")]
    DuplicateId(String),
}

/// The static exercise catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    exercises: Vec<Exercise>,
}

impl Catalog {
    pub fn blind75() -> Result<Self, CatalogError> {
        let exercises: Vec<Exercise> = serde_json::from_str(BLIND_75)?;
        Self::from_exercises(exercises)
    }

    pub fn from_exercises(exercises: Vec<Exercise>) -> Result<Self, CatalogError> {
        let mut seen = std::collections::HashSet::new();
        for e in &exercises {
            if !seen.insert(e.id.as_str()) {
                return Err(CatalogError::DuplicateId(e.id.clone()));
            }
        }
        Ok(Self { exercises })
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    pub fn exercises(&self) -> &[Exercise] {
        &self.exercises
    }

    pub fn get(&self, id: &str) -> Option<&Exercise> {
        self.exercises.iter().find(|e| e.id == id)
    }

    /// Groups the catalog by topic and tags each exercise with the user's status.
    pub fn groups(&self, progress: &HashMap<String, ProgressRecord>) -> Vec<TopicGroup> {
        let mut groups: Vec<TopicGroup> = Vec::new();

        for exercise in &self.exercises {
            let status = progress
                .get(&exercise.id)
                .map(|p| p.status)
                .unwrap_or(ProblemStatus::New);

            match groups.iter_mut().find(|g| g.topic == exercise.topic) {
                Some(group) => group.exercises.push((exercise.clone(), status)),
                None => groups.push(TopicGroup {
                    topic: exercise.topic.clone(),
                    display_name: format_group_name(&exercise.topic),
                    exercises: vec![(exercise.clone(), status)],
                }),
            }
        }

        groups.sort_by(|a, b| {
            let ai = GROUP_ORDER.iter().position(|g| *g == a.topic);
            let bi = GROUP_ORDER.iter().position(|g| *g == b.topic);
            match (ai, bi) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.topic.cmp(&b.topic),
            }
        });

        groups
    }
}

/// One topic of the catalog with per-user attempt status.
#[derive(Debug, Clone)]
pub struct TopicGroup {
    pub topic: String,
    pub display_name: String,
    pub exercises: Vec<(Exercise, ProblemStatus)>,
}

impl TopicGroup {
    /// Never-attempted exercises.
    pub fn new_count(&self) -> usize {
        self.exercises
            .iter()
            .filter(|(_, s)| *s == ProblemStatus::New)
            .count()
    }

    pub fn unmastered_count(&self) -> usize {
        self.exercises
            .iter()
            .filter(|(_, s)| *s != ProblemStatus::Mastered)
            .count()
    }

    pub fn mastered_count(&self) -> usize {
        self.exercises.len() - self.unmastered_count()
    }
}

pub fn format_group_name(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
