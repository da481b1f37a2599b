//! Thin command-line host over the library.
//!
//! Argument parsing stays minimal (default clap help, JSON output); the
//! interesting behaviour lives in the library. Exit codes follow the host
//! contract: 0 success, 1 generic error, 2 invalid arguments, 3 not
//! initialised, 4 busy timeout, 5 configuration error.

// CLI output goes to the standard streams on purpose.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use crate::config::{MemoryConfig, ProjectPaths};
use crate::git::{GitImporter, resolve_user_id};
use crate::learner::Learner;
use crate::mcp::{McpServer, ToolContext};
use crate::models::{LearnRequest, RecallOptions, RecallResult, RecallStrategy, SourceType};
use crate::queue::{DRAIN_GRACE, LearnQueue};
use crate::recall::{RecallCaches, RecallEngine};
use crate::storage::MemoryStore;
use crate::{Error, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Project-scoped cognitive memory for AI coding assistants.
#[derive(Debug, Parser)]
#[command(name = "kuzu-memory", version, about)]
pub struct Cli {
    /// Project directory (defaults to the current directory's project).
    #[arg(long, global = true, env = "KUZU_MEMORY_PROJECT")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the kuzu-memory directory and a default config.
    Init,
    /// Run the stdio JSON-RPC server.
    Serve,
    /// Store one observation synchronously.
    Learn {
        /// The observation text.
        content: String,
        /// Origin tag.
        #[arg(long, default_value = "cli")]
        source: String,
        /// Session scope.
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Query memories.
    Recall {
        /// Free-text query.
        query: String,
        /// Maximum memories to return.
        #[arg(long, default_value_t = 5)]
        max_memories: usize,
        /// Strategy: auto, keyword, entity, temporal.
        #[arg(long, default_value = "auto")]
        strategy: String,
    },
    /// Rewrite a prompt with recalled context.
    Enhance {
        /// The prompt to enhance.
        prompt: String,
        /// Maximum memories to prepend.
        #[arg(long, default_value_t = 5)]
        max_memories: usize,
    },
    /// List the most recent memories.
    Recent {
        /// Maximum rows.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show store statistics.
    Stats {
        /// Include the per-user breakdown.
        #[arg(long)]
        detailed: bool,
    },
    /// Delete a memory by id.
    Delete {
        /// The memory id.
        id: String,
    },
    /// Sweep expired memories now.
    Cleanup,
    /// Import significant git commits as memories.
    Sync {
        /// Re-walk the full history instead of starting at the last cursor.
        #[arg(long)]
        full: bool,
    },
}

/// Everything an opened project provides.
struct AppContext {
    paths: ProjectPaths,
    config: MemoryConfig,
    store: MemoryStore,
    engine: Arc<RecallEngine>,
    learner: Arc<Learner>,
    user_id: String,
}

impl AppContext {
    fn open(project: Option<&PathBuf>) -> Result<Self> {
        let paths = match project {
            Some(root) => ProjectPaths::at_root(root.clone()),
            None => {
                let cwd = std::env::current_dir().map_err(|e| Error::OperationFailed {
                    operation: "current_dir".to_string(),
                    cause: e.to_string(),
                })?;
                ProjectPaths::discover(cwd)?
            },
        };
        paths.require_initialised()?;
        let config = MemoryConfig::load(&paths.config_path())?;
        crate::observability::init_logging(&config.logging, Some(&paths.logs_dir()))?;

        let store = MemoryStore::open(&paths.database_path(&config), &config)?;
        let caches = Arc::new(RecallCaches::new(
            config.recall.cache_entries,
            Duration::from_secs(config.recall.cache_ttl_secs),
        ));
        let engine = Arc::new(RecallEngine::new(store.clone(), Arc::clone(&caches), &config));
        let user_id = resolve_user_id(&config.learning, paths.project_root());
        let learner = Arc::new(Learner::new(
            store.clone(),
            caches,
            &config,
            Some(user_id.clone()),
        )?);

        Ok(Self {
            paths,
            config,
            store,
            engine,
            learner,
            user_id,
        })
    }

    fn default_options(&self, max_memories: usize, strategy: &str) -> Result<RecallOptions> {
        let strategy = RecallStrategy::parse(strategy)
            .ok_or_else(|| Error::Invalid(format!("unknown strategy: {strategy}")))?;
        Ok(RecallOptions {
            max_memories: max_memories.clamp(1, 100),
            strategy,
            filters: crate::models::RecallFilters::default(),
        })
    }
}

/// Runs a parsed command, returning the process exit code.
#[must_use]
pub fn run(cli: &Cli) -> i32 {
    match execute(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        },
    }
}

fn execute(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Init => init(cli.project.as_ref()),
        Command::Serve => serve(cli.project.as_ref()),
        Command::Learn {
            content,
            source,
            session_id,
        } => learn(cli.project.as_ref(), content, source, session_id.clone()),
        Command::Recall {
            query,
            max_memories,
            strategy,
        } => recall(cli.project.as_ref(), query, *max_memories, strategy),
        Command::Enhance {
            prompt,
            max_memories,
        } => enhance(cli.project.as_ref(), prompt, *max_memories),
        Command::Recent { limit } => recent(cli.project.as_ref(), *limit),
        Command::Stats { detailed } => stats(cli.project.as_ref(), *detailed),
        Command::Delete { id } => delete(cli.project.as_ref(), id),
        Command::Cleanup => cleanup(cli.project.as_ref()),
        Command::Sync { full } => sync(cli.project.as_ref(), *full),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| Error::OperationFailed {
        operation: "render_output".to_string(),
        cause: e.to_string(),
    })?;
    println!("{rendered}");
    Ok(())
}

fn init(project: Option<&PathBuf>) -> Result<()> {
    let paths = match project {
        Some(root) => ProjectPaths::at_root(root.clone()),
        None => {
            let cwd = std::env::current_dir().map_err(|e| Error::OperationFailed {
                operation: "current_dir".to_string(),
                cause: e.to_string(),
            })?;
            ProjectPaths::discover(cwd)?
        },
    };
    paths.init()?;
    println!("initialised {}", paths.memory_dir().display());
    Ok(())
}

fn serve(project: Option<&PathBuf>) -> Result<()> {
    let context = AppContext::open(project)?;
    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::OperationFailed {
        operation: "start_runtime".to_string(),
        cause: e.to_string(),
    })?;

    runtime.block_on(async {
        let queue = Arc::new(LearnQueue::start(
            Arc::clone(&context.learner),
            &context.config,
        ));

        // Periodic TTL sweep; never on the request path.
        let sweeper = context.config.storage.auto_compact.then(|| {
            let store = context.store.clone();
            let caches = Arc::clone(context.engine.caches());
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(300));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let swept = tokio::task::block_in_place(|| store.sweep_expired(chrono::Utc::now()))
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "ttl sweep failed");
                            0
                        });
                    if swept > 0 {
                        caches.flush_all();
                    }
                }
            })
        });

        let server = McpServer::new(ToolContext {
            engine: Arc::clone(&context.engine),
            queue: Arc::clone(&queue),
            store: context.store.clone(),
            current_user: Some(context.user_id.clone()),
        });

        let outcome = tokio::select! {
            outcome = crate::mcp::run(server) => outcome,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                Ok(())
            },
        };

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        queue.shutdown(DRAIN_GRACE).await;
        context.store.database().shutdown(Duration::from_secs(5));
        outcome
    })
}

fn learn(
    project: Option<&PathBuf>,
    content: &str,
    source: &str,
    session_id: Option<String>,
) -> Result<()> {
    let context = AppContext::open(project)?;
    let source =
        SourceType::parse(source).ok_or_else(|| Error::Invalid(format!("unknown source: {source}")))?;
    let outcome = context.learner.learn(&LearnRequest {
        content: content.to_string(),
        source,
        session_id,
        ..LearnRequest::default()
    })?;
    print_json(&outcome)
}

fn recall(
    project: Option<&PathBuf>,
    query: &str,
    max_memories: usize,
    strategy: &str,
) -> Result<()> {
    let context = AppContext::open(project)?;
    let opts = context.default_options(max_memories, strategy)?;
    let result = context.engine.recall(query, &opts)?;
    print_json(&result)?;
    context.engine.record_access(&result)
}

fn enhance(project: Option<&PathBuf>, prompt: &str, max_memories: usize) -> Result<()> {
    let context = AppContext::open(project)?;
    let opts = context.default_options(max_memories, "auto")?;
    let enhanced = context.engine.enhance(prompt, &opts)?;
    println!("{}", enhanced.enhanced_prompt);
    // The selected memories came out of a recall; bump their access counts
    // after the output is written, like the server's deferred path.
    let recall = RecallResult {
        memories: enhanced.memories,
        strategy_used: String::new(),
        confidence: enhanced.confidence,
        elapsed_ms: enhanced.elapsed_ms,
    };
    context.engine.record_access(&recall)
}

fn recent(project: Option<&PathBuf>, limit: usize) -> Result<()> {
    let context = AppContext::open(project)?;
    let memories = context
        .store
        .query_recent(limit.clamp(1, 100), &crate::models::RecallFilters::default())?;
    print_json(&memories)
}

fn stats(project: Option<&PathBuf>, detailed: bool) -> Result<()> {
    let context = AppContext::open(project)?;
    let stats = context.store.stats(Some(&context.user_id), detailed)?;
    print_json(&stats)
}

fn delete(project: Option<&PathBuf>, id: &str) -> Result<()> {
    let context = AppContext::open(project)?;
    let existed = context.store.delete(&crate::models::MemoryId::new(id))?;
    if !existed {
        return Err(Error::Invalid(format!("no memory with id {id}")));
    }
    context.engine.caches().flush_all();
    println!("deleted {id}");
    Ok(())
}

fn cleanup(project: Option<&PathBuf>) -> Result<()> {
    let context = AppContext::open(project)?;
    let swept = context.store.sweep_expired(chrono::Utc::now())?;
    context.engine.caches().flush_all();
    println!("swept {swept} expired memories");
    Ok(())
}

fn sync(project: Option<&PathBuf>, full: bool) -> Result<()> {
    let context = AppContext::open(project)?;
    let importer = GitImporter::new(context.config.git_sync.clone());
    let outcome = importer.sync(context.paths.project_root(), &context.learner, !full)?;

    // Persist the cursor so the next incremental run starts where we left off.
    let mut config = context.config.clone();
    config.git_sync.last_commit_sha.clone_from(&outcome.last_sha);
    config.git_sync.last_sync_timestamp = Some(chrono::Utc::now());
    config.save(&context.paths.config_path())?;

    print_json(&outcome)
}
