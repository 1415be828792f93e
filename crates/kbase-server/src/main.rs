//! kbase: multi-tenant knowledge-base server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kbase_chat::{ChatGenerator, LLMConfig};
use kbase_core::{IdentitySource, KbaseConfig, Role};
use kbase_infer::{create_embedder, EmbedderSettings};
use kbase_ingest::FsObjectStorage;
use kbase_runtime::RuntimeLimits;
use kbase_server::auth::hash_password;
use kbase_server::{build_router, AppState};
use kbase_store::{NewUser, SqliteStore};

fn resolve_data_dir() -> PathBuf {
    std::env::var("KBASE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn open_store(config: &KbaseConfig) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&config.data_paths.db, config.embedding_dim)
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let data_dir = resolve_data_dir();

    match args.get(1).map(String::as_str) {
        None | Some("serve") => serve(data_dir).await,
        Some("init-admin") => {
            if args.len() != 5 {
                eprintln!("Usage: kbase init-admin <email> <username> <password>");
                std::process::exit(1);
            }
            init_admin(data_dir, &args[2], &args[3], &args[4])
        }
        Some("--help" | "-h" | "help") => {
            println!("kbase: multi-tenant knowledge-base server");
            println!();
            println!("Usage: kbase [command]");
            println!();
            println!("Commands:");
            println!("  serve (default)                          Start the server");
            println!("  init-admin <email> <username> <password> Create an administrator");
            println!("  help                                     Show this help message");
            println!();
            println!("Data directory: $KBASE_DATA_DIR (default ./data)");
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}. Use 'kbase help' for usage.", other);
            std::process::exit(1);
        }
    }
}

fn init_admin(data_dir: PathBuf, email: &str, username: &str, password: &str) -> anyhow::Result<()> {
    let config = KbaseConfig::from_env(&data_dir)?;
    let store = open_store(&config)?;
    if password.is_empty() {
        bail!("admin password must not be empty");
    }
    let user = store.create_user(NewUser {
        email: email.to_string(),
        username: username.to_string(),
        identity: IdentitySource::Local {
            credential_hash: hash_password(password)?,
        },
        department_id: None,
        role: Role::Admin,
    })?;
    info!("Created administrator {} (id {})", user.username, user.id);
    Ok(())
}

async fn serve(data_dir: PathBuf) -> anyhow::Result<()> {
    info!("Data directory: {}", data_dir.display());

    let config = KbaseConfig::from_env(&data_dir)?;
    let port = config.port;

    let store = Arc::new(open_store(&config)?);
    let storage = Arc::new(FsObjectStorage::new(&config.data_paths.files));

    let embedder = create_embedder(&EmbedderSettings::from_env(&config)?)?;
    if embedder.dimension() != config.embedding_dim {
        bail!(
            "embedder {} produces {}-dim vectors but EMBEDDING_DIM is {}",
            embedder.model_name(),
            embedder.dimension(),
            config.embedding_dim
        );
    }

    let llm_config = LLMConfig::load(&config.data_paths.llm_config_file);
    let target = llm_config
        .resolve_provider()
        .context("no usable generation provider configured")?;
    info!("Generation via {} model {} at {}", target.provider, target.model, target.base_url);
    let generator = Arc::new(ChatGenerator::new(target));

    let limits = RuntimeLimits::from_config(&config, llm_config.temperature, llm_config.max_tokens);
    let state = Arc::new(AppState::new(config, store, storage, embedder, generator, limits));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("kbase server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
