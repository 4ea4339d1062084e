use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::info;
use serde_json::Value;

use crate::adapters::SqliteCollection;
use crate::api::AppState;
use crate::config::Config;
use crate::demo;
use crate::error::DataKitError;
use crate::query::schema::parse_request;

const DEFAULT_SEED_COUNT: usize = 100;

#[derive(Parser)]
#[command(
    name = "datakit",
    version,
    about = "datakit: paginated, filterable, sortable collection fetching"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the server (default if no command specified)
    Serve,

    /// Insert generated demo users into the database
    Seed {
        /// Number of users to insert
        #[arg(long, short = 'c', default_value_t = DEFAULT_SEED_COUNT)]
        count: usize,
    },

    /// Run one fetch request and print the result envelope as JSON
    Fetch {
        /// Collection name, e.g. "users"
        collection: String,

        /// Fetch request as JSON, e.g. '{"page":1,"limit":10}'
        request: String,
    },
}

impl Cli {
    pub fn handle_command_line(project_dirs: &ProjectDirs) -> Result<(), DataKitError> {
        let args = Cli::parse();
        Self::run(args.command.unwrap_or(Command::Serve), project_dirs)
    }

    fn run(command: Command, project_dirs: &ProjectDirs) -> Result<(), DataKitError> {
        let config = Config::get();
        let db_path = config.database_path(project_dirs);

        match command {
            Command::Serve => {
                let collection = SqliteCollection::open(&db_path, demo::USERS)?;
                Self::start_server(&config, demo::app_state(collection, config.query.max_limit))
            }
            Command::Seed { count } => {
                let collection = SqliteCollection::open(&db_path, demo::USERS)?;
                let ids = demo::seed_users(&collection, count)?;
                println!("Inserted {} users into {}", ids.len(), db_path.display());
                Ok(())
            }
            Command::Fetch {
                collection,
                request,
            } => {
                let users = SqliteCollection::open(&db_path, demo::USERS)?;
                let state = demo::app_state(users, config.query.max_limit);
                let output = Self::runtime()?.block_on(fetch_json(&state, &collection, &request))?;
                println!("{}", output);
                Ok(())
            }
        }
    }

    fn start_server(config: &Config, state: AppState) -> Result<(), DataKitError> {
        let host = config.server.host.clone();
        let port = config.server.port;

        info!("Starting server on {}:{}", host, port);

        Self::runtime()?.block_on(async {
            let web_server = crate::server::WebServer::new(host, port, state);
            web_server.start().await
        })
    }

    fn runtime() -> Result<tokio::runtime::Runtime, DataKitError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| DataKitError::Error(format!("Failed to create runtime: {}", e)))
    }
}

/// Parses `request`, runs it against `collection` and returns the envelope
/// as pretty-printed JSON.
pub async fn fetch_json(
    state: &AppState,
    collection: &str,
    request: &str,
) -> Result<String, DataKitError> {
    let action = state
        .collection(collection)
        .ok_or_else(|| DataKitError::CollectionNotFound(collection.to_owned()))?;

    let body: Value = serde_json::from_str(request)?;
    let request = parse_request(&body)?;
    let result = action.call(request).await?;

    Ok(serde_json::to_string_pretty(&result)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing_no_command_defaults_to_serve() {
        let result = Cli::try_parse_from(["datakit"]);
        assert!(result.is_ok(), "Should accept no command");

        let cli = result.unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(cli.command.unwrap_or(Command::Serve), Command::Serve));
    }

    #[test]
    fn test_cli_parsing_seed() {
        let cli = Cli::try_parse_from(["datakit", "seed"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Seed { count: DEFAULT_SEED_COUNT })));

        let cli = Cli::try_parse_from(["datakit", "seed", "--count", "7"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Seed { count: 7 })));
    }

    #[test]
    fn test_cli_parsing_fetch() {
        let cli = Cli::try_parse_from(["datakit", "fetch", "users", r#"{"page":1,"limit":5}"#])
            .unwrap();
        match cli.command {
            Some(Command::Fetch {
                collection,
                request,
            }) => {
                assert_eq!(collection, "users");
                assert_eq!(request, r#"{"page":1,"limit":5}"#);
            }
            _ => panic!("expected fetch"),
        }

        assert!(Cli::try_parse_from(["datakit", "fetch", "users"]).is_err());
    }

    #[test]
    fn test_cli_parsing_invalid_arguments() {
        let result = Cli::try_parse_from(["datakit", "nonexistent-command"]);
        assert!(result.is_err(), "Should reject unknown commands");

        let result = Cli::try_parse_from(["datakit", "serve", "--invalid-flag"]);
        assert!(result.is_err(), "Should reject unknown flags on serve");
    }

    #[tokio::test]
    async fn test_fetch_json() {
        let coll = SqliteCollection::open_in_memory(demo::USERS).unwrap();
        demo::seed_users(&coll, 4).unwrap();
        let state = demo::app_state(coll, 100);

        let output = fetch_json(&state, "users", r#"{"page":1,"limit":2}"#)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["documentTotal"], 4);
        assert_eq!(value["items"].as_array().unwrap().len(), 2);

        let err = fetch_json(&state, "orders", r#"{"page":1,"limit":2}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, DataKitError::CollectionNotFound(_)));

        let err = fetch_json(&state, "users", "not json").await.unwrap_err();
        assert!(matches!(err, DataKitError::JsonError(_)));
    }
}
