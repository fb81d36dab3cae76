use std::path::Path;
use std::sync::Arc;

use catchup::analysis::{AnalysisRouter, AnthropicBackend, OpenAiBackend};
use catchup::config::{CoreConfig, Credentials};
use catchup::orchestrator::Orchestrator;
use catchup::patterns::LearningFeedback;
use catchup::source::SlackSource;
use catchup::store::{LibSqlStore, StoreStats};
use catchup::todos::{TodoItem, TodoList};
use chrono::Utc;
use clap::{Parser, Subcommand};
use secrecy::SecretString;

#[derive(Debug, Parser)]
#[command(
    name = "catchup",
    about = "Priority triage for missed team messages",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch recent messages, classify them and print a ranked todo list.
    Analyze {
        /// Lookback window in hours.
        #[arg(long)]
        hours: Option<u32>,

        /// Maximum number of messages to process.
        #[arg(long)]
        max: Option<usize>,

        /// Also write the full run as pretty JSON to this path.
        #[arg(long, value_name = "PATH")]
        save: Option<std::path::PathBuf>,
    },

    /// Show full detail for one todo from the latest run.
    Details {
        /// Todo id as printed by analyze.
        id: u32,
    },

    /// Rate a todo from the latest run, 1 (useless) to 5 (spot on).
    Feedback {
        /// Todo id as printed by analyze.
        id: u32,

        /// Rating from 1 to 5.
        rating: u8,

        /// Optional comment, archived with the rating.
        #[arg(long)]
        comment: Option<String>,
    },

    /// Print the effective configuration as TOML.
    Config,

    /// Print usage and feedback statistics.
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = match &cli.config {
        Some(path) => CoreConfig::load_from_path(path).unwrap_or_else(|e| {
            eprintln!("Error: invalid configuration {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => CoreConfig::default(),
    };

    let _log_guard = init_tracing(&config);

    if matches!(cli.command, Command::Config) {
        match toml::to_string_pretty(&config) {
            Ok(rendered) => print!("{rendered}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Collaborator credentials are only required for analyze; the other
    // commands work entirely against the local database.
    let credentials = Credentials::from_env();
    let online = matches!(cli.command, Command::Analyze { .. });
    let slack_token = if online {
        credentials.require_slack().unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            eprintln!("  export SLACK_BOT_TOKEN=xoxb-...");
            std::process::exit(1);
        })
    } else {
        offline_placeholder(&credentials.slack_bot_token)
    };
    let openai_key = if online {
        credentials.require_openai().unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            eprintln!("  export OPENAI_API_KEY=sk-...");
            std::process::exit(1);
        })
    } else {
        offline_placeholder(&credentials.openai_api_key)
    };
    let anthropic_key = if online {
        credentials.require_anthropic().unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
            std::process::exit(1);
        })
    } else {
        offline_placeholder(&credentials.anthropic_api_key)
    };

    let store = Arc::new(
        LibSqlStore::new_local(Path::new(&config.db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: failed to open database at {}: {}", config.db_path, e);
                std::process::exit(1);
            }),
    );

    let source = Arc::new(SlackSource::new(slack_token));
    let router = AnalysisRouter::new(
        Arc::new(OpenAiBackend::new(openai_key, config.low_cost_model_id.clone())),
        Arc::new(AnthropicBackend::new(
            anthropic_key,
            config.high_cost_model_id.clone(),
        )),
        &config,
    )
    .unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let orchestrator = Orchestrator::init(source, router, store, config)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(1);
        });

    let result = match cli.command {
        Command::Analyze { hours, max, save } => match orchestrator.analyze(hours, max).await {
            Ok(list) => {
                print_list(&list);
                if let Some(path) = save {
                    save_list(&list, &path).unwrap_or_else(|e| {
                        eprintln!("Error: failed to write {}: {}", path.display(), e);
                        std::process::exit(1);
                    });
                    println!("Saved run to {}.", path.display());
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Details { id } => match orchestrator.get_details(id).await {
            Ok(item) => {
                print_details(&item);
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Feedback { id, rating, comment } => orchestrator
            .submit_feedback(LearningFeedback {
                todo_id: id,
                rating,
                comment,
                created_at: Utc::now(),
            })
            .await
            .map(|()| println!("Feedback recorded for todo {id}.")),
        Command::Stats => match orchestrator.get_stats().await {
            Ok(stats) => {
                print_stats(&stats);
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Config => return,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr, and additionally to a daily-rolling file when
/// `log_dir` is configured. The guard must outlive all logging.
fn init_tracing(config: &CoreConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Some(dir) = &config.log_dir {
        let appender = tracing_appender::rolling::daily(dir, "catchup.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

/// A set credential passes through even for offline commands; an unset
/// one becomes an empty placeholder that is never sent anywhere.
fn offline_placeholder(credential: &Option<SecretString>) -> SecretString {
    credential.clone().unwrap_or_else(|| SecretString::from(""))
}

fn save_list(list: &TodoList, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(list)?;
    std::fs::write(path, json)
}

fn print_list(list: &TodoList) {
    if list.is_empty() {
        println!(
            "Nothing needs attention from the last {}h.",
            list.window_hours
        );
        return;
    }

    println!(
        "{} todos from the last {}h ({} urgent, {} high, {} medium, {} low)",
        list.items.len(),
        list.window_hours,
        list.tier_counts.urgent,
        list.tier_counts.high,
        list.tier_counts.medium,
        list.tier_counts.low,
    );
    println!();
    for item in &list.items {
        println!(
            "{:>3}. [{:<6}] {:.2}  {}",
            item.id,
            item.tier.label(),
            item.score.value,
            item.title,
        );
        println!(
            "     handle: {} | tags: {}",
            item.window.label(),
            item.tags.join(", "),
        );
    }
    println!();
    println!(
        "Run {} | details <id> for more, feedback <id> <1-5> to rate.",
        list.run_id
    );
}

fn print_details(item: &TodoItem) {
    println!("Todo {}: {}", item.id, item.title);
    println!(
        "Tier: {} (score {:.2}) | handle: {}",
        item.tier.label(),
        item.score.value,
        item.window.label(),
    );
    println!("Tags: {}", item.tags.join(", "));
    println!(
        "From: {} in #{} at {}",
        item.message.sender_name,
        item.message.channel_name,
        item.message.timestamp.format("%Y-%m-%d %H:%M UTC"),
    );
    print!("Kind: {}", item.message.kind.label());
    if item.message.thread_engaged {
        print!(" (engaged thread)");
    }
    println!();
    print!("Classified by: {}", item.analysis.backend);
    if item.analysis.degraded {
        print!(" (degraded)");
    }
    println!(
        " as {} / {}",
        item.analysis.category.label(),
        item.analysis.urgency.label(),
    );
    println!(
        "Sub-scores: authority {:.2}, time {:.2}, content {:.2}, patterns {:.2}",
        item.score.authority,
        item.score.time_urgency,
        item.score.content_importance,
        item.score.pattern_adjustment,
    );
    println!();
    println!("{}", item.description);
}

fn print_stats(stats: &StoreStats) {
    println!("Runs recorded:      {}", stats.runs_recorded);
    println!("Messages processed: {}", stats.messages_processed);
    match stats.average_rating {
        Some(avg) => println!(
            "Feedback entries:   {} (average rating {:.1})",
            stats.feedback_count, avg,
        ),
        None => println!("Feedback entries:   0"),
    }

    if !stats.backend_usage.is_empty() {
        let total_calls: u64 = stats.backend_usage.iter().map(|u| u.calls).sum();
        println!();
        println!("Backend usage:");
        for usage in &stats.backend_usage {
            let share = 100.0 * usage.calls as f64 / total_calls.max(1) as f64;
            println!(
                "  {:<10} {:>6} calls ({share:>5.1}%)   ${}",
                usage.backend, usage.calls, usage.estimated_cost,
            );
        }
    }

    if !stats.average_score_by_tier.is_empty() {
        println!();
        println!("Average score by tier:");
        for entry in &stats.average_score_by_tier {
            println!(
                "  {:<7} {:>6} items   {:.2}",
                entry.tier.label(),
                entry.items,
                entry.average_score,
            );
        }
    }
}
