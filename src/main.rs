use clap::{Parser, Subcommand};
use content_repo::config::AppConfig;
use content_repo::logic::{ContentRepository, WebRootRequest};
use content_repo::model::{ContainerType, SchemaChange, UserContext};
use content_repo::seed;
use content_repo::store::{InMemoryStore, PostgresStore, Store};
use std::path::PathBuf;
use std::sync::Arc;

/// Operator tool for the content repository
#[derive(Parser, Debug)]
#[command(name = "content-repo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Run against a throwaway in-memory store preloaded with the demo content
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database tables
    Bootstrap,

    /// Load the demo project
    Seed,

    /// Append a new schema version from a JSON array of schema changes
    ApplyChanges {
        /// Schema container id or name
        schema: String,
        file: PathBuf,
    },

    /// Migrate content of a release to a newer schema version
    Migrate {
        /// Schema container id or name
        schema: String,
        /// Project id or name
        #[arg(long)]
        project: String,
        #[arg(long, default_value_t = 0)]
        from: u32,
        /// Target version, the latest one when omitted
        #[arg(long)]
        to: Option<u32>,
        /// Release id or name, the latest one when omitted
        #[arg(long)]
        release: Option<String>,
    },

    /// Resolve a WebRoot path
    Resolve {
        /// Project id or name
        project: String,
        path: String,
        #[arg(long)]
        release: Option<String>,
        /// Resolve drafts instead of published content
        #[arg(long)]
        draft: bool,
        /// Language preference, most preferred first
        #[arg(long, value_delimiter = ',')]
        lang: Vec<String>,
        /// Resolve on behalf of this user
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    if cli.memory {
        let repository = ContentRepository::from_config(Arc::new(InMemoryStore::new()), &config).build();
        seed::load_demo_content(&repository).await?;
        return run(&repository, cli.command).await;
    }

    let database_url = config.database_url()?;
    let store = PostgresStore::new(&database_url, config.max_connections()).await?;
    if matches!(cli.command, Command::Bootstrap) {
        store.migrate().await?;
        println!("Database ready");
        return Ok(());
    }

    let repository = ContentRepository::from_config(Arc::new(store), &config).build();
    run(&repository, cli.command).await
}

fn to_json<T: serde::Serialize>(value: T) -> content_repo::Result<serde_json::Value> {
    Ok(serde_json::to_value(value).map_err(anyhow::Error::from)?)
}

async fn run<S: Store>(repository: &ContentRepository<S>, command: Command) -> anyhow::Result<()> {
    let outcome = match command {
        Command::Bootstrap => {
            println!("Nothing to bootstrap for the in-memory store");
            return Ok(());
        }
        Command::Seed => seed::load_demo_content(repository)
            .await
            .and_then(to_json),
        Command::ApplyChanges { schema, file } => {
            let changes: Vec<SchemaChange> = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            match repository.schemas.find(&schema).await {
                Ok(container) => repository
                    .apply_changes(&container.id, changes)
                    .await
                    .and_then(to_json),
                Err(e) => Err(e),
            }
        }
        Command::Migrate {
            schema,
            project,
            from,
            to,
            release,
        } => {
            let migration = async {
                let container = repository.schemas.find(&schema).await?;
                let project = repository.content.get_project(&project).await?;
                let release = repository.content.release(&project.id, release.as_deref()).await?;
                let to = match to {
                    Some(to) => to,
                    None => container.latest_version().map(|v| v.version).unwrap_or_default(),
                };
                repository.migrate(&container.id, from, to, &release.id).await
            };
            migration
                .await
                .and_then(to_json)
        }
        Command::Resolve {
            project,
            path,
            release,
            draft,
            lang,
            user,
        } => {
            let mut request = WebRootRequest::new(project, path)
                .with_mode(if draft { ContainerType::Draft } else { ContainerType::Published })
                .with_languages(lang);
            if let Some(release) = release {
                request = request.with_release(release);
            }
            if let Some(user) = user {
                request = request.as_user(UserContext::new(user));
            }
            repository
                .resolve_path(&request)
                .await
                .and_then(to_json)
        }
    };

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            let body = serde_json::json!({ "error": e.code(), "message": e.to_string() });
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
    }
}
