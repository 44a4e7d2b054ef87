use chrono::{DateTime, Days, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Source of "now" for every calendar-day comparison in the scheduler.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn tomorrow(&self) -> NaiveDate {
        self.today() + Days::new(1)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant. Tests move it forward with `advance_days`.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: std::cell::Cell<DateTime<Utc>>,
}

#[cfg(test)]
impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: std::cell::Cell::new(now),
        }
    }

    /// Noon UTC on the given day.
    pub fn on(day: NaiveDate) -> Self {
        Self::at(start_of_day(day) + chrono::Duration::hours(12))
    }

    pub fn advance_days(&self, days: u64) {
        self.now.set(self.now.get() + Days::new(days));
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

pub fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

/// Randomness port. Hands out an RNG that is stable for one user on one day, so
/// the topic shown by `spots` is the topic `enter` locks.
pub trait RngSource {
    fn rng_for(&self, user: &str, day: NaiveDate) -> StdRng;
}

#[derive(Debug, Clone, Copy)]
pub struct SeededRng {
    seed: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl RngSource for SeededRng {
    fn rng_for(&self, user: &str, day: NaiveDate) -> StdRng {
        StdRng::seed_from_u64(mix_seed(self.seed, user, day))
    }
}

// FNV-1a over the user id and the ISO day, folded into the base seed.
fn mix_seed(seed: u64, user: &str, day: NaiveDate) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let day_key = day.format("%Y-%m-%d").to_string();
    let mut hash = FNV_OFFSET ^ seed;
    for byte in user.bytes().chain([0u8]).chain(day_key.bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
