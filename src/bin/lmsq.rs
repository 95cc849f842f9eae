//! `lmsq`, the command-line front door for the assistant.
//!
//! Subcommands cover the full lifecycle: `migrate` and `index` build the
//! graph and vector stores from the relational source, `query` routes a
//! question through the engine chain, the per-engine subcommands bypass
//! the router for debugging, and `serve` exposes the HTTP API.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lms_assistant::config::AssistantConfig;
use lms_assistant::embeddings::OpenAiEmbedder;
use lms_assistant::engines::{GraphEngine, QueryEngine, SqlEngine, VectorEngine};
use lms_assistant::history::HistoryStore;
use lms_assistant::indexer::VectorIndexer;
use lms_assistant::llm::OpenAiChat;
use lms_assistant::migrate::GraphMigrator;
use lms_assistant::router::{self, Router};
use lms_assistant::schema::SchemaCatalog;
use lms_assistant::server;
use lms_assistant::stores::{Neo4jHttp, PineconeIndex, SqlStore, SqliteStore};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lmsq", version, about = "Conversational query engine for LMS data")]
struct Cli {
    /// Site config file (falls back to environment variables when absent)
    #[arg(long, global = true, default_value = "site_config.json", env = "LMS_SITE_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Route a question through the full engine chain
    Query {
        #[arg(long)]
        q: String,
        #[arg(long, default_value = "default_user")]
        user_id: String,
    },
    /// Ask the SQL engine directly
    Sql {
        #[arg(long)]
        q: String,
    },
    /// Ask the vector engine directly
    Vector {
        #[arg(long)]
        q: String,
    },
    /// Ask the graph engine directly
    Graph {
        #[arg(long)]
        q: String,
    },
    /// Mirror allow-listed tables and joins into the graph store
    Migrate {
        /// Wipe the graph before migrating
        #[arg(long)]
        clear: bool,
    },
    /// Populate the vector index from the relational store
    Index {
        /// Restrict to one doctype (all allow-listed doctypes by default)
        #[arg(long)]
        doctype: Option<String>,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
}

/// Everything the engine builders need, loaded once.
struct Services {
    config: AssistantConfig,
    catalog: Arc<SchemaCatalog>,
    store: Arc<dyn SqlStore>,
}

impl Services {
    fn load(config_path: &str) -> anyhow::Result<Self> {
        let config = if Path::new(config_path).exists() {
            AssistantConfig::from_file(config_path)
                .with_context(|| format!("loading site config {config_path}"))?
        } else {
            tracing::info!(%config_path, "no site config file; using environment");
            AssistantConfig::from_env()
        };
        let catalog = Arc::new(
            SchemaCatalog::load(&config.schema_path)
                .with_context(|| format!("loading schema catalog {}", config.schema_path))?,
        );
        let store: Arc<dyn SqlStore> = Arc::new(
            SqliteStore::open(&config.sqlite_path)
                .with_context(|| format!("opening database {}", config.sqlite_path))?,
        );
        Ok(Self {
            config,
            catalog,
            store,
        })
    }

    fn chat_llm(&self) -> anyhow::Result<Arc<OpenAiChat>> {
        Ok(Arc::new(OpenAiChat::from_config(
            &self.config,
            &self.config.chat_model,
        )?))
    }

    /// Stronger model used for SQL and Cypher generation.
    fn generator_llm(&self) -> anyhow::Result<Arc<OpenAiChat>> {
        Ok(Arc::new(OpenAiChat::from_config(
            &self.config,
            &self.config.sql_model,
        )?))
    }

    fn graph_store(&self) -> anyhow::Result<Arc<Neo4jHttp>> {
        if !self.config.graph_ready() {
            bail!("graph store is not configured (set neo4j_uri and enable_graph)");
        }
        Ok(Arc::new(Neo4jHttp::new(
            self.config.neo4j_uri.clone(),
            self.config.neo4j_user.clone(),
            self.config.neo4j_password.clone(),
            self.config.neo4j_database.clone(),
            self.config.request_timeout(),
        )?))
    }

    fn vector_index(&self) -> anyhow::Result<Arc<PineconeIndex>> {
        if self.config.vector_index_host.is_empty() {
            bail!("vector index is not configured (set vector_index_host)");
        }
        Ok(Arc::new(PineconeIndex::new(
            self.config.vector_index_host.clone(),
            self.config.vector_api_key.clone(),
            self.config.request_timeout(),
        )?))
    }

    fn sql_engine(&self) -> anyhow::Result<Arc<SqlEngine>> {
        Ok(Arc::new(SqlEngine::new(
            self.generator_llm()?,
            Arc::clone(&self.store),
            Arc::clone(&self.catalog),
            self.config.request_timeout(),
            self.config.sql_row_limit,
        )))
    }

    fn graph_engine(&self) -> anyhow::Result<Arc<GraphEngine>> {
        Ok(Arc::new(GraphEngine::new(
            self.generator_llm()?,
            self.graph_store()?,
            Arc::clone(&self.catalog),
            self.config.graph_row_limit,
            self.config.request_timeout(),
        )))
    }

    fn vector_engine(&self) -> anyhow::Result<Arc<VectorEngine>> {
        Ok(Arc::new(VectorEngine::new(
            self.chat_llm()?,
            Arc::new(OpenAiEmbedder::from_config(&self.config)?),
            self.vector_index()?,
            Arc::clone(&self.store),
            Arc::clone(&self.catalog),
            self.config.top_k,
            self.config.route_top_n,
            self.config.max_context_chars,
            self.config.request_timeout(),
        )))
    }

    fn router(&self) -> anyhow::Result<Arc<Router>> {
        let graph: Option<Arc<dyn QueryEngine>> = if self.config.graph_ready() {
            Some(self.graph_engine()?)
        } else {
            None
        };
        let chain = router::engine_chain(
            &self.config,
            self.sql_engine()?,
            graph,
            self.vector_engine()?,
        );
        Ok(Arc::new(Router::new(chain, self.history())))
    }

    fn single_engine_router(&self, engine: Arc<dyn QueryEngine>) -> Arc<Router> {
        Arc::new(Router::new(vec![engine], self.history()))
    }

    fn history(&self) -> Arc<HistoryStore> {
        Arc::new(HistoryStore::new(
            self.config.history_max_turns,
            self.config.history_ttl(),
        ))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let services = Services::load(&cli.config)?;

    match cli.command {
        Command::Query { q, user_id } => {
            let result = services.router()?.route(&q, &user_id).await;
            print_json(&result)?;
        }
        Command::Sql { q } => {
            let router = services.single_engine_router(services.sql_engine()?);
            print_json(&router.route(&q, "cli").await)?;
        }
        Command::Vector { q } => {
            let router = services.single_engine_router(services.vector_engine()?);
            print_json(&router.route(&q, "cli").await)?;
        }
        Command::Graph { q } => {
            let router = services.single_engine_router(services.graph_engine()?);
            print_json(&router.route(&q, "cli").await)?;
        }
        Command::Migrate { clear } => {
            let migrator = GraphMigrator::new(
                services.graph_store()?,
                Arc::clone(&services.store),
                Arc::clone(&services.catalog),
                services.config.batch_size,
                services.config.max_errors_per_type,
            );
            let report = migrator.migrate(clear).await?;
            print_json(&report)?;
            if !report.errors.is_empty() {
                std::process::exit(1);
            }
        }
        Command::Index { doctype } => {
            let indexer = VectorIndexer::new(
                Arc::new(OpenAiEmbedder::from_config(&services.config)?),
                services.vector_index()?,
                Arc::clone(&services.store),
                Arc::clone(&services.catalog),
                services.config.batch_size,
            );
            let report = match doctype {
                Some(doctype) => indexer.index_doctype(&doctype).await?,
                None => indexer.index_all().await?,
            };
            print_json(&report)?;
            if !report.errors.is_empty() {
                std::process::exit(1);
            }
        }
        Command::Serve { addr } => {
            let router = services.router()?;
            let token = services.config.api_token.clone();
            server::serve(addr, router, token).await?;
        }
    }
    Ok(())
}
