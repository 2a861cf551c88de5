//! Rowbase command-line host
//!
//! Opens a rowbase data directory and drives the entity/row engine:
//! schema files, permissions, row CRUD and queries.

mod commands;
mod executor;
mod formatter;
mod schema;

use std::path::PathBuf;

use clap::Parser;
use commands::Command;
use executor::{CliError, Session};
use formatter::OutputFormat;
use rowbase_core::{Actor, ApiKeyId, Database, EngineConfig, TenantId, UserId};

/// Identity used when neither `--user` nor `--api-key` is given.
const CLI_USER: UserId = UserId::from_bytes([0u8; 16]);

/// Rowbase command-line host
#[derive(Parser, Debug)]
#[command(name = "rowbase")]
#[command(version, about = "Runtime-defined entities and rows, from the command line")]
pub struct Args {
    /// Data directory
    #[arg(short = 'd', long, default_value = "./rowbase_data")]
    pub data_path: PathBuf,

    /// Tenant the command acts in (omit for system scope)
    #[arg(short, long)]
    pub tenant: Option<TenantId>,

    /// Act as this user
    #[arg(long, conflicts_with = "api_key")]
    pub user: Option<UserId>,

    /// Act as this API key
    #[arg(long)]
    pub api_key: Option<ApiKeyId>,

    /// Roles of the acting identity (repeatable)
    #[arg(short, long = "role", default_value = "admin")]
    pub roles: Vec<String>,

    /// Output format
    #[arg(long, default_value = "json", value_enum)]
    pub format: OutputFormat,

    /// Rows kept in the row cache
    #[arg(long, default_value_t = 10_000)]
    pub cache_rows: usize,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    fn actor(&self) -> Actor {
        let mut actor = match self.api_key {
            Some(key) => Actor::api_key(key),
            None => Actor::user(self.user.unwrap_or(CLI_USER)),
        };
        for role in &self.roles {
            actor = actor.with_role(role.clone());
        }
        if let Some(tenant) = self.tenant {
            actor = actor.in_tenant(tenant);
        }
        actor
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(&self.data_path)
            .with_row_cache_capacity(self.cache_rows)
            .with_event_buffer(None)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rowbase=info,rowbase_core=info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let db = Database::open(args.engine_config())?;
    let session = Session {
        db: &db,
        tenant: args.tenant,
        actor: args.actor(),
    };
    let formatter = formatter::create_formatter(args.format);

    let output = executor::execute(&session, args.command, &*formatter).await;
    db.flush().await?;
    let output = output?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_actor_is_cli_admin() {
        let args = Args::parse_from(["rowbase", "entities"]);
        let actor = args.actor();
        assert_eq!(actor, Actor::user(CLI_USER).with_role("admin"));
    }

    #[test]
    fn test_user_and_api_key_conflict() {
        let key = ApiKeyId::new().to_string();
        let user = UserId::new().to_string();
        let parsed = Args::try_parse_from(["rowbase", "--user", &user, "--api-key", &key, "entities"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_tenant_scopes_actor() {
        let tenant = TenantId::new();
        let key = ApiKeyId::new();
        let args = Args::parse_from([
            "rowbase",
            "--tenant",
            &tenant.to_string(),
            "--api-key",
            &key.to_string(),
            "-r",
            "editor",
            "entities",
        ]);
        let actor = args.actor();
        assert_eq!(actor.tenant_id, Some(tenant));
        assert!(actor.has_role("editor"));
        assert_eq!(actor, Actor::api_key(key).with_role("editor").in_tenant(tenant));
    }
}
