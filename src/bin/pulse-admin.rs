use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse::config::{Config, DatabaseBackend};
use pulse::models::GoalKind;
use pulse::storage::{PostgresStorage, SqliteStorage, Storage, StorageError};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pulse-admin")]
#[command(about = "Pulse website and goal management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a tracked website
    AddWebsite {
        name: String,
        /// Domain allowed to send beacons (subdomains included)
        #[arg(long)]
        domain: Option<String>,
        /// Use a specific website id instead of generating one
        #[arg(long)]
        id: Option<Uuid>,
    },
    /// Add a conversion goal
    AddGoal {
        website_id: Uuid,
        /// page_view or custom_event
        kind: GoalKind,
        /// Exact URL path or exact event name
        target: String,
    },
    /// Remove a goal
    RemoveGoal { goal_id: String },
    /// List a website's goals with their completion counts
    ListGoals { website_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    storage.init().await?;

    match cli.command {
        Commands::AddWebsite { name, domain, id } => {
            let id = id.unwrap_or_else(Uuid::new_v4);
            match storage.create_website(&id, &name, domain.as_deref()).await {
                Ok(website) => println!("✓ Registered website '{}' with id {}", website.name, website.id),
                Err(StorageError::Conflict) => println!("⚠ Website {} already exists", id),
                Err(StorageError::Other(e)) => return Err(e),
            }
        }
        Commands::AddGoal {
            website_id,
            kind,
            target,
        } => {
            storage
                .get_website(&website_id)
                .await?
                .with_context(|| format!("Website {} not found", website_id))?;

            let goal = storage.create_goal(&website_id, kind, &target).await?;
            println!("✓ Created {} goal '{}' with id {}", kind, target, goal.id);
            println!(
                "  Running servers pick it up within {}s",
                config.tracking.goal_cache_ttl_secs
            );
        }
        Commands::RemoveGoal { goal_id } => {
            if storage.delete_goal(&goal_id).await? {
                println!("✓ Removed goal {}", goal_id);
            } else {
                println!("⚠ Goal {} not found", goal_id);
            }
        }
        Commands::ListGoals { website_id } => {
            let goals = storage.goals_for_website(&website_id).await?;
            if goals.is_empty() {
                println!("No goals found.");
            } else {
                println!("{:<38} {:<14} {:<30} {}", "Goal ID", "Kind", "Target", "Completions");
                println!("{}", "-".repeat(96));
                for goal in goals {
                    let completions = storage.count_goal_completions(&goal.id).await?;
                    println!(
                        "{:<38} {:<14} {:<30} {}",
                        goal.id, goal.kind, goal.target, completions
                    );
                }
            }
        }
    }

    Ok(())
}
