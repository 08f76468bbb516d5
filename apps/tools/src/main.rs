use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use server_api::{auth::hash_password, import::parse_leads, AuthConfig};
use shared::domain::Role;
use storage::{NewUser, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Maintenance commands that work on the database directly.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/crm.db")]
    database_url: String,
    #[arg(long, default_value_t = AuthConfig::default().bcrypt_cost)]
    bcrypt_cost: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateAdmin {
        username: String,
        password: String,
        #[arg(long)]
        name: Option<String>,
    },
    CreateSeller {
        username: String,
        password: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        region: Option<String>,
    },
    ListSellers,
    ImportCsv {
        path: PathBuf,
    },
    RecomputeCounters,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateAdmin {
            username,
            password,
            name,
        } => {
            let id = create_user(&storage, cli.bcrypt_cost, username, password, name, Role::Admin, None)
                .await?;
            println!("created admin user_id={id}");
        }
        Command::CreateSeller {
            username,
            password,
            name,
            region,
        } => {
            let id = create_user(
                &storage,
                cli.bcrypt_cost,
                username,
                password,
                name,
                Role::Seller,
                region,
            )
            .await?;
            println!("created seller user_id={id}");
        }
        Command::ListSellers => {
            for seller in storage.list_sellers().await? {
                println!(
                    "{:>5}  {:<20} {:<16} leads={} contacted={} converted={}",
                    seller.id.0,
                    seller.name,
                    seller.region.as_deref().unwrap_or("-"),
                    seller.total_leads,
                    seller.total_contacted,
                    seller.total_converted,
                );
            }
        }
        Command::ImportCsv { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let parsed = parse_leads(&bytes).map_err(|e| anyhow!(e.message))?;
            let (imported, duplicates) = storage.insert_leads(&parsed.leads).await?;
            println!("imported={imported} duplicates={duplicates} rejected={}", parsed.errors.len());
            for error in parsed.errors {
                println!("  line {}: {}", error.line, error.message);
            }
        }
        Command::RecomputeCounters => {
            let sellers = storage.recompute_counters().await?;
            println!("recomputed counters for {sellers} sellers");
        }
    }

    Ok(())
}

async fn create_user(
    storage: &Storage,
    bcrypt_cost: u32,
    username: String,
    password: String,
    name: Option<String>,
    role: Role,
    region: Option<String>,
) -> Result<shared::domain::UserId> {
    if username.trim().is_empty() || password.is_empty() {
        bail!("username and password are required");
    }
    let password_hash = hash_password(&password, bcrypt_cost).map_err(|e| anyhow!(e.message))?;
    let user = NewUser {
        name: name.unwrap_or_else(|| username.clone()),
        username: username.trim().to_string(),
        password_hash,
        role,
        region,
    };
    let id = storage
        .create_user(&user)
        .await?
        .ok_or_else(|| anyhow!("username '{}' is already taken", user.username))?;
    info!(user_id = %id, role = role.as_str(), "user created");
    Ok(id)
}
