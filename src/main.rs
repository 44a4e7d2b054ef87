mod assignment;
mod catalog;
mod config;
mod db;
mod models;
mod ports;
mod queue;
mod scheduler;
mod store;
mod tracker;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use catalog::Catalog;
use config::Config;
use db::SqliteStore;
use models::{Difficulty, JsonOutput, ResolvedSpot};
use ports::{SeededRng, SystemClock};
use queue::QueueOutcome;
use scheduler::{AttemptReport, Scheduler};

const COMPANY_LOCATION: &str = "himmel_park";

#[derive(Parser)]
#[command(name = "blindspot")]
#[command(about = "Daily practice spots, topic locks and spaced repetition for the Blind 75")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// User id (defaults to the one in config.toml)
    #[arg(long, short, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and write a default config if none exists
    Init,

    /// Show today's practice spots
    Spots,

    /// Enter a spot, locking its topic, and print the practice queue
    Enter {
        /// Location id, e.g. coffee_sanctuary
        location: String,
    },

    /// Swap an open spot to a different topic before entering it
    Refresh {
        /// Location id, e.g. coffee_sanctuary
        location: String,
    },

    /// Record the result of one attempt
    Report {
        /// Exercise id, e.g. two-sum
        exercise: String,

        /// Score from 0 to 100
        #[arg(long, short)]
        score: u32,

        /// easy/medium/hard (defaults to the catalog difficulty)
        #[arg(long, short)]
        difficulty: Option<String>,

        /// Time spent in seconds
        #[arg(long, short, default_value_t = 0)]
        time: u32,

        /// Location the attempt was made at
        #[arg(long, short)]
        location: Option<String>,
    },

    /// Show progress counts, due reviews and pacing
    Summary,

    /// Show per-topic progress for every exercise
    Grid,

    /// View or change study settings
    #[command(subcommand)]
    Settings(SettingsCommands),

    /// Pick today's company for company-specific practice
    Company {
        /// Company id
        id: String,

        /// Display name (defaults to the id)
        #[arg(long, short)]
        name: Option<String>,
    },

    /// Forget all attempts, or with --plan restart the study plan from today
    Reset {
        /// Reset the study plan instead of progress
        #[arg(long)]
        plan: bool,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show current settings
    Show,

    /// Update one or more settings
    Set {
        #[arg(long)]
        target_days: Option<u32>,

        #[arg(long)]
        daily_cap: Option<u32>,

        #[arg(long)]
        daily_new_goal: Option<u32>,

        /// Start date as YYYY-MM-DD
        #[arg(long)]
        start_date: Option<String>,
    },
}

type App = Scheduler<SqliteStore, SystemClock, SeededRng>;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            let output = JsonOutput::<()>::err(e.to_string());
            match serde_json::to_string(&output) {
                Ok(line) => println!("{}", line),
                Err(_) => eprintln!("Error: {}", e),
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = Config::default_path();
    let config = Config::load_from(&config_path)?;
    let user = cli.user.clone().unwrap_or_else(|| config.user.clone());

    let db_path = config.db_path();
    let store = SqliteStore::open(&db_path)?;
    store.init()?;

    if let Commands::Init = cli.command {
        if !config_path.exists() {
            config.save_to(&config_path)?;
        }
        if cli.json {
            println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
        } else {
            println!("Database initialized at: {}", db_path.display());
            println!("Config: {}", config_path.display());
        }
        return Ok(());
    }

    let app: App = Scheduler::new(
        store,
        SystemClock,
        SeededRng::new(config.rng_seed),
        Catalog::blind75()?,
        config.policy(),
    );

    match cli.command {
        Commands::Init => {}

        Commands::Spots => {
            let spots = app.spots_for_today(&user);
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&spots))?);
            } else {
                for spot in &spots {
                    print_spot(spot);
                    println!();
                }
            }
        }

        Commands::Enter { location } => {
            let entered = app.enter_spot(&user, &location)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&entered))?);
            } else {
                print_spot(&entered.spot);
                println!();
                match &entered.queue {
                    QueueOutcome::Ready(items) => {
                        println!("{:<4} {:<32} {:<8} KIND", "#", "EXERCISE", "LEVEL");
                        println!("{}", "-".repeat(56));
                        for (i, item) in items.iter().enumerate() {
                            println!(
                                "{:<4} {:<32} {:<8} {}",
                                i + 1,
                                truncate(&item.exercise.id, 30),
                                item.exercise.difficulty.as_str(),
                                if item.review { "review" } else { "new" }
                            );
                        }
                        println!();
                        println!("After each attempt, record it with:");
                        println!(
                            "  blindspot report <exercise> --score <0-100> --location {}",
                            entered.spot.location.id
                        );
                    }
                    QueueOutcome::NothingAvailable(reason) => println!("{}", reason.message()),
                }
            }
        }

        Commands::Refresh { location } => {
            let spot = app.refresh_spot(&user, &location)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&spot))?);
            } else {
                println!("New topic for {}: {}", spot.location.name, spot.topic_display);
                print_spot(&spot);
            }
        }

        Commands::Report {
            exercise,
            score,
            difficulty,
            time,
            location,
        } => {
            let difficulty = match difficulty {
                Some(d) => Difficulty::from_str(&d).ok_or_else(|| {
                    format!("Invalid difficulty '{}'. Use: easy, medium, or hard", d)
                })?,
                None => app
                    .catalog()
                    .get(&exercise)
                    .map(|e| e.difficulty)
                    .ok_or_else(|| format!("Unknown exercise '{}'", exercise))?,
            };

            let outcome = app.report_attempt(
                &user,
                &AttemptReport {
                    exercise_id: exercise.clone(),
                    score,
                    difficulty,
                    time_spent_secs: time,
                    location_id: location,
                },
            )?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&outcome))?);
            } else {
                let record = &outcome.record;
                println!("Attempt recorded for {}.", exercise);
                println!(
                    "Status: {} (best {}, {} reviews)",
                    record.status.label(),
                    record.best_score,
                    record.review_count
                );
                if outcome.extra_practice {
                    println!("Not due yet: counted as extra practice, not a review.");
                }
                if let Some(next) = record.due_day() {
                    println!("Next review: {}", next);
                }
                if let Some(n) = outcome.questions_answered {
                    println!("Topic attempts today: {}", n);
                }
                if outcome.unlocked {
                    println!("Topic complete. The spot will offer a new topic.");
                }
            }
        }

        Commands::Summary => {
            let summary = app.study_summary(&user);
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&summary))?);
            } else {
                println!("=== Study Summary ===");
                println!("Total problems: {}", summary.total);
                println!("New: {}", summary.new_count);
                println!("Learning: {}", summary.learning_count);
                println!("Mastered: {}", summary.mastered_count);
                println!("Due today: {}", summary.due_today);
                println!("Due tomorrow: {}", summary.due_tomorrow);
                println!("Days left: {}", summary.days_left);
                println!("New per day: {}", summary.new_per_day);
                println!("On pace: {}", if summary.on_pace { "yes" } else { "no" });
            }
        }

        Commands::Grid => {
            let grid = app.progress_grid(&user);
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&grid))?);
            } else {
                for group in &grid {
                    println!(
                        "{} ({}/{} mastered)",
                        group.display_name, group.mastered_count, group.total_count
                    );
                    for ep in &group.exercises {
                        println!(
                            "  {:<32} {:<8} {:<9}{}",
                            truncate(&ep.exercise.title, 30),
                            ep.exercise.difficulty.as_str(),
                            ep.status().label(),
                            if ep.due_today { " due" } else { "" }
                        );
                    }
                }
            }
        }

        Commands::Settings(settings_cmd) => match settings_cmd {
            SettingsCommands::Show => {
                let settings = app.settings(&user);
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&settings))?);
                } else {
                    print_settings(&settings);
                }
            }

            SettingsCommands::Set {
                target_days,
                daily_cap,
                daily_new_goal,
                start_date,
            } => {
                let mut settings = app.settings(&user);
                if let Some(v) = target_days {
                    settings.target_days = v;
                }
                if let Some(v) = daily_cap {
                    settings.daily_cap = v;
                }
                if let Some(v) = daily_new_goal {
                    settings.daily_new_goal = v;
                }
                if let Some(d) = start_date {
                    settings.start_date = NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD", d))?;
                }

                let saved = app.save_settings(&user, settings)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&saved))?);
                } else {
                    println!("Settings saved.");
                    print_settings(&saved);
                }
            }
        },

        Commands::Company { id, name } => {
            let name = name.unwrap_or_else(|| id.clone());
            let spot = app.select_company(&user, COMPANY_LOCATION, &id, &name)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&spot))?);
            } else {
                println!("Company practice set to {} for today.", name);
                print_spot(&spot);
            }
        }

        Commands::Reset { plan } => {
            if plan {
                let settings = app.reset_study_plan(&user)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&settings))?);
                } else {
                    println!("Study plan restarted from {}.", settings.start_date);
                }
            } else {
                app.reset_progress(&user)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                } else {
                    println!("Progress reset for {}.", user);
                }
            }
        }
    }

    Ok(())
}

fn print_spot(spot: &ResolvedSpot) {
    let state = if spot.location.only_reviews && spot.locked {
        "complete"
    } else if spot.locked {
        "locked"
    } else {
        "open"
    };

    println!("{} [{}] ({})", spot.location.name, spot.location.id, state);
    println!("  {}", spot.location.description);
    println!("  Topic: {} ({} remaining)", spot.topic_display, spot.remaining);
    if spot.location.new_problems_only && spot.locked {
        println!("  Attempts on topic: {}", spot.questions_answered);
    }
    if let (Some(done), Some(left)) = (spot.daily_new_completed, spot.daily_new_remaining) {
        println!("  New today: {} done, {} to goal", done, left);
    }
}

fn print_settings(settings: &models::StudySettings) {
    println!("Target days: {}", settings.target_days);
    println!("Daily cap: {}", settings.daily_cap);
    println!("Daily new goal: {}", settings.daily_new_goal);
    println!("Start date: {}", settings.start_date);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
