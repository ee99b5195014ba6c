//! Core application

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value as JsonValue, json};

use crate::core::cli::{self, Commands};
use crate::core::config::EngineConfig;
use crate::core::constants::{DEFAULT_LOG_FILTER, ENV_LOG, ENV_LOG_FORMAT};
use crate::pagination::Window;
use crate::query::{QueryEngine, QueryPlan, QueryRequest, RequestContext};
use crate::resolver::InMemorySavedFilters;
use crate::schema::Schema;
use crate::sql::{SqlDialect, Statement};
use crate::store::{self, DuckdbStore};

pub struct CoreApp {
    pub config: EngineConfig,
    pub engine: QueryEngine,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        let config = EngineConfig::load(&cli_config).context("Failed to load configuration")?;

        match command {
            Commands::Compile {
                schema,
                request,
                saved_filters,
                viewer,
            } => {
                let app = Self::init(config, &schema, saved_filters.as_deref())?;
                let request = read_request(&request)?;
                app.compile(&request, context(viewer)).await
            }
            Commands::Run {
                schema,
                request,
                database,
                init_sql,
                saved_filters,
                viewer,
            } => {
                let app = Self::init(config, &schema, saved_filters.as_deref())?;
                let request = read_request(&request)?;
                let store = open_store(database.as_deref(), init_sql.as_deref()).await?;
                app.execute(&store, &request, context(viewer)).await
            }
        }
    }

    fn init(config: EngineConfig, schema: &Path, saved_filters: Option<&Path>) -> Result<Self> {
        let schema = Schema::load(schema)
            .with_context(|| format!("Failed to load schema: {}", schema.display()))?;
        let mut engine = QueryEngine::new(Arc::new(schema), config.clone());

        if let Some(path) = saved_filters {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read saved filters: {}", path.display()))?;
            let value: JsonValue = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse saved filters: {}", path.display()))?;
            let store = InMemorySavedFilters::from_json(&value)?;
            tracing::debug!(count = store.len(), "Saved filters loaded");
            engine = engine.with_saved_filters(Arc::new(store));
        }

        Ok(Self { config, engine })
    }

    /// Print the statements a request compiles to, without executing them
    async fn compile(&self, request: &QueryRequest, ctx: RequestContext) -> Result<()> {
        let plan = self.engine.plan(request, &ctx).await?;
        let dialect = self.config.dialect.dialect();

        let select = if let Some(memory) = &plan.sort.memory {
            let mut projection = plan.projection();
            projection.extend(plan.sort.sort_columns.iter().cloned());
            let limit = u64::try_from(memory.cap).unwrap_or(u64::MAX).saturating_add(1);
            plan.select_statement(dialect, &projection, Some(Window { offset: 0, limit }))
        } else {
            plan.select_statement(
                dialect,
                &plan.projection(),
                Some(plan.pagination.requested_window()),
            )
        };

        let output = json!({
            "model": plan.model,
            "dialect": dialect.name(),
            "matchesNothing": plan.matches_nothing(),
            "inMemoryOrdering": plan.sort.is_in_memory(),
            "count": count_statement(&plan, dialect).map(|s| statement_json(&s)),
            "select": statement_json(&select),
        });
        print_json(&output)
    }

    /// Execute a request and print its page of rows
    async fn execute(
        &self,
        store: &DuckdbStore,
        request: &QueryRequest,
        ctx: RequestContext,
    ) -> Result<()> {
        let plan = self.engine.plan(request, &ctx).await?;
        let result = store::execute(store, &plan).await?;
        print_json(&serde_json::to_value(&result)?)
    }

    fn init_logging() {
        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
        let json = std::env::var(ENV_LOG_FORMAT)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        // stdout carries command output, logs go to stderr
        if json {
            tracing_subscriber::fmt()
                .json()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_thread_ids(false)
                .with_level(true)
                .with_ansi(true)
                .compact()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn context(viewer: Option<String>) -> RequestContext {
    RequestContext {
        viewer,
        ..Default::default()
    }
}

fn count_statement(plan: &QueryPlan, dialect: &dyn SqlDialect) -> Option<Statement> {
    (plan.pagination.needs_total() && !plan.sort.is_in_memory())
        .then(|| plan.count_statement(dialect))
}

fn statement_json(stmt: &Statement) -> JsonValue {
    json!({
        "sql": stmt.sql,
        "params": stmt.params.iter().map(|p| p.to_json()).collect::<Vec<_>>(),
    })
}

fn print_json(value: &JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a request file; `-` reads stdin
fn read_request(path: &Path) -> Result<QueryRequest> {
    let content = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request: {}", path.display()))?
    };
    serde_json::from_str(&content).context("Failed to parse request JSON")
}

async fn open_store(database: Option<&Path>, init_sql: Option<&Path>) -> Result<DuckdbStore> {
    let store = match database {
        Some(path) => DuckdbStore::open(path)
            .await
            .with_context(|| format!("Failed to open database: {}", path.display()))?,
        None => DuckdbStore::in_memory()?,
    };
    if let Some(path) = init_sql {
        let sql = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read init SQL: {}", path.display()))?;
        store
            .execute_batch(&sql)
            .await
            .with_context(|| format!("Failed to run init SQL: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Init SQL executed");
    }
    Ok(store)
}
