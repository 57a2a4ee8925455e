use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use stride_core::{
    AssessmentResponses, CheckInFilter, CheckInPatch, Engine, GoalPlanChange, GoalType,
    NewCheckIn, NewGoal, NewStep, SkipReason, StaticIdentity, StepType, TeachingHelper,
};

mod config;
mod export;
mod file_store;
mod state;

use file_store::FileStore;

#[derive(Parser, Debug)]
#[command(name = "stride", version, about = "Points, streaks and check-ins for skill-building goals")]
struct Cli {
    /// Act as this user instead of `user.id` from config.toml
    #[arg(long = "as", global = true)]
    as_user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage ~/.stride/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Create, inspect and plan goals
    Goal {
        #[command(subcommand)]
        command: GoalCommand,
    },

    /// Add and list goal steps
    Step {
        #[command(subcommand)]
        command: StepCommand,
    },

    /// Record a three-question skill assessment for a goal
    Assess {
        goal_id: String,
        q1: i32,
        q2: i32,
        q3: i32,
    },

    /// Suggest a starting frequency; save it with --select or --accept
    SmartStart {
        goal_id: String,
        /// Target sessions per week
        #[arg(long)]
        target: u32,
        /// Save the suggested frequency
        #[arg(long, conflicts_with = "select")]
        accept: bool,
        /// Save a different starting frequency
        #[arg(long)]
        select: Option<u32>,
    },

    /// Mark a step done and update the goal streak
    Complete { goal_id: String, step_id: String },

    /// Skip a step with a reason
    Skip {
        goal_id: String,
        step_id: String,
        /// not_feeling_well | no_time | forgot | helper_unavailable | too_difficult | other
        #[arg(long)]
        reason: SkipReason,
        #[arg(long)]
        note: Option<String>,
    },

    /// Show streak state for a goal
    Streak {
        goal_id: String,
        /// Rebuild stored counters from completion history
        #[arg(long)]
        recompute: bool,
    },

    /// Record, list and edit check-ins
    Checkin {
        #[command(subcommand)]
        command: CheckinCommand,
    },

    /// Progression analytics
    Analytics {
        #[command(subcommand)]
        command: AnalyticsCommand,
    },

    /// Points ledger
    Points {
        #[command(subcommand)]
        command: PointsCommand,
    },

    /// Rebuild streaks and earned points for every goal of a user
    Reconcile {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Export records
    Export {
        #[command(subcommand)]
        command: ExportCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a default config.toml if none exists
    Init,
}

#[derive(Subcommand, Debug)]
enum GoalCommand {
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: String,
        /// habit | progressive_mastery | milestone
        #[arg(long = "type")]
        goal_type: GoalType,
        #[arg(long, default_value_t = 0)]
        frequency: u32,
        #[arg(long, default_value_t = 0)]
        weeks: u32,
        #[arg(long, default_value_t = 0)]
        milestones: u32,
        #[arg(long, default_value_t = 0)]
        scaffolds: u32,
        /// YYYY-MM-DD
        #[arg(long)]
        due: Option<NaiveDate>,
        #[arg(long)]
        owner: Option<String>,
        /// Teaching helper user id
        #[arg(long)]
        helper: Option<String>,
        #[arg(long, requires = "helper")]
        helper_name: Option<String>,
        #[arg(long, requires = "helper")]
        helper_relationship: Option<String>,
    },
    Show { goal_id: String },
    List {
        /// Goals where this user is the teaching helper
        #[arg(long)]
        helper: Option<String>,
        #[arg(long, conflicts_with = "helper")]
        owner: Option<String>,
    },
    Archive { goal_id: String },
    /// Change cadence or structure; total possible points are recomputed
    Plan {
        goal_id: String,
        #[arg(long)]
        frequency: Option<u32>,
        #[arg(long)]
        weeks: Option<u32>,
        #[arg(long)]
        steps: Option<u32>,
        #[arg(long)]
        milestones: Option<u32>,
        #[arg(long)]
        scaffolds: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
enum StepCommand {
    Add {
        goal_id: String,
        #[arg(long)]
        title: String,
        /// habit | action | milestone | scaffolding
        #[arg(long = "type")]
        step_type: Option<StepType>,
        #[arg(long)]
        optional: bool,
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    List { goal_id: String },
}

#[derive(Subcommand, Debug)]
enum CheckinCommand {
    Add {
        goal_id: String,
        step_id: String,
        #[arg(long)]
        quality: i32,
        #[arg(long)]
        independence: i32,
        #[arg(long)]
        minutes: Option<i32>,
        #[arg(long, requires = "after")]
        before: Option<i32>,
        #[arg(long, requires = "before")]
        after: Option<i32>,
        #[arg(long)]
        notes: Option<String>,
        /// Helper user id; marks the helper as present
        #[arg(long)]
        helper: Option<String>,
        #[arg(long)]
        allow_duplicate: bool,
    },
    List {
        #[arg(long, group = "target")]
        goal: Option<String>,
        #[arg(long, group = "target")]
        step: Option<String>,
        #[arg(long, group = "target")]
        user: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    Update {
        check_in_id: String,
        #[arg(long)]
        quality: Option<i32>,
        #[arg(long)]
        independence: Option<i32>,
        #[arg(long)]
        minutes: Option<i32>,
        #[arg(long)]
        before: Option<i32>,
        #[arg(long)]
        after: Option<i32>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        helper: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AnalyticsCommand {
    Goal { goal_id: String },
    Step { step_id: String },
}

#[derive(Subcommand, Debug)]
enum PointsCommand {
    Balance {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Ledger {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ExportCommand {
    /// Write a goal's check-ins as CSV
    Checkins {
        goal_id: String,
        /// Output file (stdout when omitted)
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log.level))
        .context("invalid log.level in config.toml")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let user = cli.as_user.clone().unwrap_or_else(|| cfg.user.id.clone());
    let store = Arc::new(FileStore::open(state::state_path()?).await?);
    tracing::debug!(path = %store.path().display(), user = %user, "opened state");
    let engine = Engine::new(store, Arc::new(StaticIdentity::new(user.clone())), cfg.engine)?;

    run(&engine, &user, cli.command).await
}

async fn run(engine: &Engine, user: &str, command: Command) -> Result<()> {
    let now = Utc::now();

    match command {
        Command::Config { command } => match command {
            ConfigCommand::Init => config::init_config()?,
        },

        Command::Goal { command } => match command {
            GoalCommand::Create {
                title,
                category,
                goal_type,
                frequency,
                weeks,
                milestones,
                scaffolds,
                due,
                owner,
                helper,
                helper_name,
                helper_relationship,
            } => {
                let mut input = NewGoal::new(title, category, goal_type)
                    .with_cadence(frequency, weeks)
                    .with_structure(milestones, scaffolds);
                if let Some(due) = due {
                    input = input.with_due_date(due);
                }
                if let Some(owner) = owner {
                    input = input.with_owner(owner);
                }
                if let Some(user_id) = helper {
                    input = input.with_helper(TeachingHelper {
                        user_id,
                        name: helper_name,
                        relationship: helper_relationship,
                    });
                }
                let goal = engine.create_goal(input, now).await?;
                println!("Created goal {} (TPP {})", goal.id, goal.total_possible_points);
            }
            GoalCommand::Show { goal_id } => {
                let goal = engine.goal(&goal_id).await?;
                println!("{}", serde_json::to_string_pretty(&goal)?);
            }
            GoalCommand::List { helper, owner } => {
                let goals = match helper {
                    Some(h) => engine.goals_for_helper(&h).await?,
                    None => engine.goals_for_owner(owner.as_deref().unwrap_or(user)).await?,
                };
                if goals.is_empty() {
                    println!("No goals.");
                }
                for g in goals {
                    println!(
                        "{} | {} | {} | {:?} | {}/{} pts | streak {}{}",
                        g.id,
                        g.title,
                        g.category,
                        g.goal_type,
                        g.earned_points,
                        g.total_possible_points,
                        g.streak_count,
                        if g.archived { " | archived" } else { "" }
                    );
                }
            }
            GoalCommand::Archive { goal_id } => {
                engine.archive_goal(&goal_id, now).await?;
                println!("Archived {goal_id}");
            }
            GoalCommand::Plan {
                goal_id,
                frequency,
                weeks,
                steps,
                milestones,
                scaffolds,
            } => {
                let change = GoalPlanChange {
                    frequency_per_week: frequency,
                    duration_weeks: weeks,
                    planned_steps: steps,
                    planned_milestones: milestones,
                    planned_scaffolds: scaffolds,
                };
                if change == GoalPlanChange::default() {
                    bail!("nothing to change (pass --frequency, --weeks, --steps, --milestones or --scaffolds)");
                }
                let goal = engine.update_goal_plan(&goal_id, change, now).await?;
                println!("Updated {} (TPP {})", goal.id, goal.total_possible_points);
            }
        },

        Command::Step { command } => match command {
            StepCommand::Add {
                goal_id,
                title,
                step_type,
                optional,
                due,
            } => {
                let step = engine
                    .add_step(
                        &goal_id,
                        NewStep {
                            title,
                            step_type,
                            required: Some(!optional),
                            due_date: due,
                        },
                        now,
                    )
                    .await?;
                println!("Added step {} (#{})", step.id, step.order_index);
            }
            StepCommand::List { goal_id } => {
                for s in engine.list_steps(&goal_id).await? {
                    println!(
                        "#{} {} | {} | {} | {}{}",
                        s.order_index,
                        s.id,
                        s.title,
                        s.step_type.as_str(),
                        s.status.as_str(),
                        if s.required { "" } else { " | optional" }
                    );
                }
            }
        },

        Command::Assess { goal_id, q1, q2, q3 } => {
            let a = engine
                .planner()
                .save_skill_assessment(&goal_id, AssessmentResponses::new(q1, q2, q3), now)
                .await?;
            println!("Skill level {} ({})", a.calculated_level, a.level_label);
        }

        Command::SmartStart {
            goal_id,
            target,
            accept,
            select,
        } => {
            let suggestion = engine.planner().recommend(&goal_id, target).await?;
            println!(
                "Suggested start: {}x/week toward {}x/week",
                suggestion.suggested_initial, suggestion.target_frequency
            );
            println!("{}", suggestion.rationale);
            println!("{}", suggestion.phase_guidance);

            let selected = match (accept, select) {
                (true, _) => Some(suggestion.suggested_initial),
                (false, Some(f)) => Some(f),
                (false, None) => None,
            };
            if let Some(selected) = selected {
                let accepted = selected == suggestion.suggested_initial;
                let goal = engine
                    .planner()
                    .save_smart_start_plan(&goal_id, suggestion, accepted, selected, now)
                    .await?;
                println!(
                    "Saved: {}x/week (TPP {})",
                    goal.frequency_per_week, goal.total_possible_points
                );
                if let Some(plan) = &goal.metadata.smart_start {
                    for p in &plan.ramp {
                        println!("  weeks {}-{}: {}x/week", p.start_week, p.end_week, p.frequency_per_week);
                    }
                }
            }
        }

        Command::Complete { goal_id, step_id } => {
            let done = engine.streaks().mark_habit_complete(&step_id, &goal_id, now).await?;
            println!(
                "+{} pts{} | streak {} ({:?})",
                done.points_awarded,
                if done.bonus_awarded > 0 {
                    format!(" +{} goal bonus", done.bonus_awarded)
                } else {
                    String::new()
                },
                done.streak.current_streak,
                done.milestone
            );
            if let Some(next) = done.next_step {
                println!("Next: {} ({})", next.id, next.title);
            }
        }

        Command::Skip {
            goal_id,
            step_id,
            reason,
            note,
        } => {
            let out = engine
                .streaks()
                .record_skip(&step_id, &goal_id, reason, note, now)
                .await?;
            if out.streak_broken {
                println!("Skipped. Streak reset.");
            } else {
                println!("Skipped. Streak holds at {}.", out.streak_count);
            }
        }

        Command::Streak { goal_id, recompute } => {
            let calc = if recompute {
                engine.streaks().recompute_streak(&goal_id, now).await?
            } else {
                engine.streaks().calculate_streak(&goal_id, now).await?
            };
            let status = engine.streaks().check_streak_status(&goal_id, now).await?;
            println!(
                "current {} | longest {} | consecutive {} | {:?}",
                calc.current_streak, calc.longest_streak, calc.consecutive_days, calc.streak_milestone
            );
            if status.is_at_risk {
                println!("At risk: {:.1}h left", status.hours_remaining);
            }
        }

        Command::Checkin { command } => checkin(engine, user, command).await?,

        Command::Analytics { command } => match command {
            AnalyticsCommand::Goal { goal_id } => {
                let a = engine.check_ins().get_progression_analytics(&goal_id).await?;
                println!("{}", serde_json::to_string_pretty(&a)?);
            }
            AnalyticsCommand::Step { step_id } => {
                let p = engine.check_ins().get_step_progression_data(&step_id).await?;
                println!("{}", serde_json::to_string_pretty(&p)?);
            }
        },

        Command::Points { command } => match command {
            PointsCommand::Balance { user: who, category } => {
                let who = who.as_deref().unwrap_or(user);
                let s = engine.points_balance(who, category.as_deref()).await?;
                println!("earned {} | redeemed {} | balance {}", s.earned, s.redeemed, s.balance);
            }
            PointsCommand::Ledger { user: who, category } => {
                let who = who.as_deref().unwrap_or(user);
                for e in engine.ledger(who, category.as_deref()).await? {
                    println!(
                        "{} | {:?} | {} | {:+} | {}",
                        e.created_at.format("%Y-%m-%d %H:%M"),
                        e.kind,
                        e.category,
                        e.amount,
                        e.step_id.as_deref().unwrap_or("-")
                    );
                }
            }
        },

        Command::Reconcile { owner } => {
            let owner = owner.as_deref().unwrap_or(user);
            for r in engine.reconcile_owner(owner, now).await? {
                println!(
                    "{} | streak {} | points {} (was {})",
                    r.goal_id, r.streak.current_streak, r.earned_points, r.previous_earned_points
                );
            }
        }

        Command::Export { command } => match command {
            ExportCommand::Checkins { goal_id, csv } => {
                let rows = engine.check_ins().get_by_goal(&goal_id, Some(usize::MAX)).await?;
                match csv {
                    Some(path) => {
                        let file = std::fs::File::create(&path)
                            .with_context(|| format!("create {}", path.display()))?;
                        export::write_check_ins_csv(file, &rows)?;
                        println!("Wrote {} check-ins to {}", rows.len(), path.display());
                    }
                    None => export::write_check_ins_csv(std::io::stdout().lock(), &rows)?,
                }
            }
        },
    }

    Ok(())
}

async fn checkin(engine: &Engine, user: &str, command: CheckinCommand) -> Result<()> {
    let now = Utc::now();
    let collector = engine.check_ins();

    match command {
        CheckinCommand::Add {
            goal_id,
            step_id,
            quality,
            independence,
            minutes,
            before,
            after,
            notes,
            helper,
            allow_duplicate,
        } => {
            let mut input = NewCheckIn::new(goal_id, step_id, quality, independence);
            input.time_spent_minutes = minutes;
            input.confidence_before = before;
            input.confidence_after = after;
            input.notes = notes;
            if let Some(h) = helper {
                input = input.with_helper(h);
            }
            input.allow_duplicate = allow_duplicate;

            let recorded = collector.create(input, now).await?;
            println!("Recorded check-in {}", recorded.check_in.id);
            // Wait so the phase write lands before the process exits.
            if let Ok(Some(phase)) = recorded.phase_update.await {
                println!("Phase: {}", phase.as_str());
            }
        }
        CheckinCommand::List {
            goal,
            step,
            user: who,
            limit,
        } => {
            let filter = match (goal, step, who) {
                (Some(g), _, _) => CheckInFilter::Goal(g),
                (_, Some(s), _) => CheckInFilter::Step(s),
                (_, _, Some(u)) => CheckInFilter::User(u),
                (None, None, None) => CheckInFilter::User(user.to_string()),
            };
            let rows = match &filter {
                CheckInFilter::Goal(id) => collector.get_by_goal(id, limit).await?,
                CheckInFilter::Step(id) => collector.get_by_step(id, limit).await?,
                CheckInFilter::User(id) => collector.get_recent_activity(id, limit).await?,
            };
            for c in rows {
                println!(
                    "{} | {} | step {} | quality {} | independence {}{}",
                    c.created_at.format("%Y-%m-%d %H:%M"),
                    c.id,
                    c.step_id,
                    c.quality_rating,
                    c.independence_level,
                    if c.helper_present { " | helper" } else { "" }
                );
            }
        }
        CheckinCommand::Update {
            check_in_id,
            quality,
            independence,
            minutes,
            before,
            after,
            notes,
            helper,
        } => {
            let patch = CheckInPatch {
                quality_rating: quality,
                independence_level: independence,
                time_spent_minutes: minutes,
                confidence_before: before,
                confidence_after: after,
                notes,
                helper_present: helper.as_ref().map(|_| true),
                helper_id: helper,
            };
            let c = collector.update(&check_in_id, patch, now).await?;
            println!("Updated check-in {}", c.id);
        }
    }
    Ok(())
}
