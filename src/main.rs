use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use sourcepods_cache::config;
use sourcepods_cache::gateway::{GraphqlGateway, RestGateway};
use sourcepods_cache::{Actions, Credentials, Entity, EntityType, Gateway, PayloadSource, Store};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List all users
    Users,
    /// Show one user with their repositories
    User { username: String },
    /// Show the signed-in user
    Me,
    /// List repositories owned by a user
    Repos { owner: String },
    /// Sign in and show the resulting user
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Change a user's display name
    UpdateUser {
        username: String,
        #[arg(long)]
        name: String,
    },
    /// Delete a user and print the refreshed listing
    DeleteUser { username: String },
    /// Load users and the signed-in user, then report cache inconsistencies
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(args.config.as_path()))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let settings = cfg.http_settings()?;
    let store = Store::new(cfg.merge_policies());

    info!(source = %cfg.api.source, base_url = %settings.base_url, "starting cache client");
    match cfg.api.source {
        PayloadSource::Rest => {
            let actions = Actions::new(RestGateway::new(settings)?, store);
            run(&actions, args.command).await
        }
        PayloadSource::Graphql => {
            let actions = Actions::new(GraphqlGateway::new(settings)?, store);
            run(&actions, args.command).await
        }
    }
}

async fn run<G: Gateway>(actions: &Actions<G>, command: Command) -> Result<()> {
    let output = match command {
        Command::Users => listing(&actions.fetch_all(EntityType::User).await?),
        Command::User { username } => {
            let user = actions.fetch_one(EntityType::User, &username).await?;
            let repositories = actions.read(|query| {
                query.related_to(EntityType::User, user.id(), "repositories")
            });
            json!({ "user": user.to_value(), "repositories": listing(&repositories) })
        }
        Command::Me => actions.fetch_authenticated().await?.to_value(),
        Command::Repos { owner } => listing(&actions.fetch_owned(&owner).await?),
        Command::Login { email, password } => {
            let credentials = Credentials { email, password };
            actions.authenticate(&credentials).await?.to_value()
        }
        Command::UpdateUser { username, name } => actions
            .update(EntityType::User, &username, &json!({ "name": name }))
            .await?
            .to_value(),
        Command::DeleteUser { username } => {
            listing(&actions.delete(EntityType::User, &username).await?)
        }
        Command::Check => {
            let (users, me) = futures::join!(
                actions.fetch_all(EntityType::User),
                actions.fetch_authenticated()
            );
            users.context("failed to list users")?;
            if let Err(err) = me {
                info!(%err, "no authenticated user");
            }
            let warnings = actions.read(|query| query.consistency_report());
            Value::Array(
                warnings
                    .iter()
                    .map(|warning| Value::String(warning.to_string()))
                    .collect(),
            )
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn listing(entities: &[Entity]) -> Value {
    Value::Array(entities.iter().map(Entity::to_value).collect())
}
