use chrono::NaiveDate;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::catalog::{format_group_name, TopicGroup};
use crate::models::{CompanySelection, DailyAssignment, Location, ResolvedSpot, SpotLock, LOCATIONS};
use crate::store::Store;

/// Attempts on the locked topic before a new-problems spot may move on.
pub const UNLOCK_THRESHOLD: u32 = 3;

pub const ALL_DONE_TOPIC: &str = "all_done";
pub const REVIEWS_TOPIC: &str = "reviews";
pub const RANDOM_TOPIC: &str = "random";
pub const COMPANY_TOPIC: &str = "company_specific";
pub const COMPANY_PREFIX: &str = "company:";

/// Everything the resolver needs about today, gathered by the caller.
#[derive(Debug, Clone)]
pub struct TodayContext<'a> {
    pub groups: &'a [TopicGroup],
    /// Today's stored entries. Unlocked ones are refreshed picks.
    pub locked: &'a [SpotLock],
    pub due_review_count: usize,
    pub daily_new_completed: u32,
    pub daily_new_goal: u32,
    pub unlock_threshold: u32,
}

/// Binds every location to today's topic. Pure: the same inputs and RNG state
/// always give the same spots.
pub fn resolve_todays_assignments<R: Rng + ?Sized>(
    ctx: &TodayContext<'_>,
    rng: &mut R,
) -> Vec<ResolvedSpot> {
    let mut taken: Vec<String> = Vec::new();
    let mut spots = Vec::with_capacity(LOCATIONS.len());

    for location in LOCATIONS.iter() {
        let mut spot = if location.is_company_specific {
            resolve_company(location, ctx)
        } else if location.only_reviews {
            let due = ctx.due_review_count;
            resolved(location, REVIEWS_TOPIC, "Due Reviews", due, due == 0, 0)
        } else if location.is_random {
            resolved(location, RANDOM_TOPIC, "Random Mix", total_unmastered(ctx.groups), false, 0)
        } else {
            resolve_topic_spot(location, ctx, &taken, rng)
        };

        if location.new_problems_only {
            spot.daily_new_completed = Some(ctx.daily_new_completed);
            spot.daily_new_remaining =
                Some(ctx.daily_new_goal.saturating_sub(ctx.daily_new_completed));
        }

        if location.is_lockable() && spot.topic != ALL_DONE_TOPIC {
            taken.push(spot.topic.clone());
        }
        spots.push(spot);
    }

    spots
}

fn resolved(
    location: &Location,
    topic: &str,
    display: &str,
    remaining: usize,
    locked: bool,
    questions_answered: u32,
) -> ResolvedSpot {
    ResolvedSpot {
        location: *location,
        topic: topic.to_string(),
        topic_display: display.to_string(),
        remaining,
        locked,
        questions_answered,
        daily_new_completed: None,
        daily_new_remaining: None,
        selected_company: None,
    }
}

fn total_unmastered(groups: &[TopicGroup]) -> usize {
    groups.iter().map(TopicGroup::unmastered_count).sum()
}

fn inventory(location: &Location, group: &TopicGroup) -> usize {
    if location.new_problems_only {
        group.new_count()
    } else {
        group.unmastered_count()
    }
}

fn resolve_company(location: &Location, ctx: &TodayContext<'_>) -> ResolvedSpot {
    let selection = ctx
        .locked
        .iter()
        .find(|l| l.location_id == location.id && l.locked)
        .and_then(|l| {
            l.topic.strip_prefix(COMPANY_PREFIX).map(|id| CompanySelection {
                company_id: id.to_string(),
                company_name: l.topic_display.clone(),
            })
        });

    match selection {
        Some(company) => {
            let mut spot = resolved(
                location,
                &format!("{}{}", COMPANY_PREFIX, company.company_id),
                &company.company_name,
                total_unmastered(ctx.groups),
                true,
                0,
            );
            spot.selected_company = Some(company);
            spot
        }
        None => resolved(location, COMPANY_TOPIC, "Pick a Company", 0, false, 0),
    }
}

fn resolve_topic_spot<R: Rng + ?Sized>(
    location: &Location,
    ctx: &TodayContext<'_>,
    taken: &[String],
    rng: &mut R,
) -> ResolvedSpot {
    let held: Vec<&str> = ctx
        .locked
        .iter()
        .filter(|l| l.locked && l.location_id != location.id)
        .map(|l| l.topic.as_str())
        .chain(taken.iter().map(String::as_str))
        .collect();

    let Some(lock) = ctx
        .locked
        .iter()
        .find(|l| l.location_id == location.id && l.locked)
    else {
        if let Some(pick) = remembered_pick(location, ctx, &held) {
            return pick;
        }
        return select_topic(location, ctx.groups, &held, &[], rng);
    };

    let Some(group) = ctx.groups.iter().find(|g| g.topic == lock.topic) else {
        // Fail closed: a lock we cannot verify is kept.
        warn!(
            "{}: locked topic '{}' is missing from the catalog, keeping lock",
            location.id, lock.topic
        );
        return resolved(
            location,
            &lock.topic,
            &lock.topic_display,
            0,
            true,
            lock.questions_answered,
        );
    };

    let unlock =
        location.new_problems_only && lock.questions_answered >= ctx.unlock_threshold;
    if !unlock {
        return resolved(
            location,
            &lock.topic,
            &lock.topic_display,
            inventory(location, group),
            true,
            lock.questions_answered,
        );
    }

    info!(
        "{}: '{}' unlocked after {} attempts",
        location.id, lock.topic, lock.questions_answered
    );
    select_topic(location, ctx.groups, &held, &[lock.topic.as_str()], rng)
}

// An open spot keeps a topic picked by a refresh while it still has inventory
// and no other spot holds it.
fn remembered_pick(
    location: &Location,
    ctx: &TodayContext<'_>,
    held: &[&str],
) -> Option<ResolvedSpot> {
    let pick = ctx
        .locked
        .iter()
        .find(|l| l.location_id == location.id && !l.locked)?;
    let group = ctx.groups.iter().find(|g| g.topic == pick.topic)?;
    let remaining = inventory(location, group);
    if remaining == 0 || held.contains(&pick.topic.as_str()) {
        return None;
    }
    Some(resolved(location, &group.topic, &group.display_name, remaining, false, 0))
}

fn select_topic<R: Rng + ?Sized>(
    location: &Location,
    groups: &[TopicGroup],
    held: &[&str],
    avoid: &[&str],
    rng: &mut R,
) -> ResolvedSpot {
    let eligible: Vec<&TopicGroup> = groups
        .iter()
        .filter(|g| inventory(location, g) > 0)
        .collect();
    let not_avoided = |g: &&TopicGroup| !avoid.contains(&g.topic.as_str());

    let isolated: Vec<&TopicGroup> = eligible
        .iter()
        .copied()
        .filter(not_avoided)
        .filter(|g| !held.contains(&g.topic.as_str()))
        .collect();
    let shared: Vec<&TopicGroup> = eligible.iter().copied().filter(not_avoided).collect();

    let picked = [isolated, shared, eligible]
        .into_iter()
        .find(|pool| !pool.is_empty())
        .and_then(|mut pool| {
            pool.shuffle(rng);
            pool.first().copied()
        });

    match picked {
        Some(group) => {
            debug!("{}: selected '{}'", location.id, group.topic);
            resolved(
                location,
                &group.topic,
                &group.display_name,
                inventory(location, group),
                false,
                0,
            )
        }
        None => {
            debug!("{}: nothing left to assign", location.id);
            resolved(location, ALL_DONE_TOPIC, &format_group_name(ALL_DONE_TOPIC), 0, false, 0)
        }
    }
}

/// Today's stored assignment. A record from another day is deleted and
/// reported as absent, as is one the store cannot read.
pub fn todays_assignment(
    store: &dyn Store,
    user: &str,
    today: NaiveDate,
) -> Option<DailyAssignment> {
    let stored = match store.load_assignment(user) {
        Ok(stored) => stored?,
        Err(e) => {
            warn!("reading assignment for {} failed: {}", user, e);
            return None;
        }
    };

    if stored.date != today {
        info!(
            "discarding {} assignment for {} (today is {})",
            stored.date, user, today
        );
        if let Err(e) = store.delete_assignment(user) {
            warn!("deleting stale assignment for {} failed: {}", user, e);
        }
        return None;
    }

    Some(stored)
}

fn persist(store: &dyn Store, user: &str, assignment: &mut DailyAssignment) -> bool {
    assignment.revision += 1;
    match store.save_assignment(user, assignment) {
        Ok(()) => true,
        Err(e) => {
            warn!("saving assignment for {} failed: {}", user, e);
            false
        }
    }
}

fn put_lock(assignment: &mut DailyAssignment, lock: SpotLock) {
    assignment
        .assignments
        .retain(|a| a.location_id != lock.location_id);
    assignment.assignments.push(lock);
}

/// Freezes a resolved spot's topic for the rest of the day with a fresh
/// counter. Returns whether a new lock was written.
pub fn lock_spot(store: &dyn Store, user: &str, today: NaiveDate, spot: &ResolvedSpot) -> bool {
    if spot.locked || !spot.location.is_lockable() || spot.topic == ALL_DONE_TOPIC {
        return false;
    }

    let mut assignment =
        todays_assignment(store, user, today).unwrap_or_else(|| DailyAssignment::empty(today));
    put_lock(
        &mut assignment,
        SpotLock {
            location_id: spot.location.id.to_string(),
            topic: spot.topic.clone(),
            topic_display: spot.topic_display.clone(),
            locked: true,
            questions_answered: 0,
        },
    );

    info!("{}: locked '{}' for {}", spot.location.id, spot.topic, user);
    persist(store, user, &mut assignment)
}

/// Re-rolls an open topic spot. `spots` is today's resolution, so topics
/// shown at other lockable locations are avoided. Returns the new spot, or
/// `None` when no other topic has inventory.
pub fn reroll_topic<R: Rng + ?Sized>(
    spot: &ResolvedSpot,
    spots: &[ResolvedSpot],
    ctx: &TodayContext<'_>,
    rng: &mut R,
) -> Option<ResolvedSpot> {
    let location = &spot.location;
    let held: Vec<&str> = spots
        .iter()
        .filter(|s| s.location.id != location.id && s.location.is_lockable())
        .map(|s| s.topic.as_str())
        .chain(
            ctx.locked
                .iter()
                .filter(|l| l.locked && l.location_id != location.id)
                .map(|l| l.topic.as_str()),
        )
        .collect();
    let mut avoid = vec![spot.topic.as_str()];
    if let Some(spent) = ctx
        .locked
        .iter()
        .find(|l| l.location_id == location.id && l.locked)
    {
        avoid.push(spent.topic.as_str());
    }

    let rerolled = select_topic(location, ctx.groups, &held, &avoid, rng);
    if avoid.contains(&rerolled.topic.as_str()) || rerolled.topic == ALL_DONE_TOPIC {
        return None;
    }
    Some(rerolled)
}

/// Remembers a refreshed topic as an unlocked entry so later resolutions
/// show it until the spot is entered.
pub fn remember_pick(store: &dyn Store, user: &str, today: NaiveDate, spot: &ResolvedSpot) -> bool {
    let mut assignment =
        todays_assignment(store, user, today).unwrap_or_else(|| DailyAssignment::empty(today));
    put_lock(
        &mut assignment,
        SpotLock {
            location_id: spot.location.id.to_string(),
            topic: spot.topic.clone(),
            topic_display: spot.topic_display.clone(),
            locked: false,
            questions_answered: 0,
        },
    );

    info!("{}: refreshed to '{}' for {}", spot.location.id, spot.topic, user);
    persist(store, user, &mut assignment)
}

/// Records the company chosen for a company-specific location; it holds until
/// the day rolls over.
pub fn select_company(
    store: &dyn Store,
    user: &str,
    today: NaiveDate,
    location_id: &str,
    company: &CompanySelection,
) -> bool {
    let mut assignment =
        todays_assignment(store, user, today).unwrap_or_else(|| DailyAssignment::empty(today));
    put_lock(
        &mut assignment,
        SpotLock {
            location_id: location_id.to_string(),
            topic: format!("{}{}", COMPANY_PREFIX, company.company_id),
            topic_display: company.company_name.clone(),
            locked: true,
            questions_answered: 0,
        },
    );
    persist(store, user, &mut assignment)
}

/// Bumps the attempt counter of a locked spot when the attempt was on its
/// topic. Returns the counter after the call.
pub fn record_on_topic_attempt(
    store: &dyn Store,
    user: &str,
    today: NaiveDate,
    location_id: &str,
    topic: &str,
) -> u32 {
    let Some(mut assignment) = todays_assignment(store, user, today) else {
        return 0;
    };
    let Some(lock) = assignment.lock_for_mut(location_id) else {
        return 0;
    };

    if lock.topic != topic {
        debug!(
            "{}: attempt on '{}' does not count toward '{}'",
            location_id, topic, lock.topic
        );
        return lock.questions_answered;
    }

    lock.questions_answered += 1;
    let count = lock.questions_answered;
    persist(store, user, &mut assignment);
    count
}
