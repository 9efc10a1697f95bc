use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::warn;

use tether::cli::{
    autolink, commits, context, conversations, hook, link, links, parse_date_arg, read, search,
    sources, stats,
};
use tether::linker::AutoLinkOptions;
use tether::reader::{ReaderRegistry, SearchOptions};
use tether::store::{with_store, CommitFilter, ConversationFilter};
use tether::telemetry::init_tracing;
use tether::util::to_forward_slashes;
use tether::Config;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Links AI coding conversations to the git commits they produced")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = "tether.yaml")]
    config: String,

    /// Debug logging to stderr (same as TETHER_DEBUG=1)
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle an editor or git hook event (payload JSON on stdin)
    Hook {
        /// Event name (file-touched, session-end, commit or an editor alias);
        /// falls back to the payload's hook_event_name
        event: Option<String>,

        #[arg(long)]
        conversation_id: Option<String>,

        /// File the assistant edited
        #[arg(long)]
        file: Option<String>,

        #[arg(long)]
        workspace_root: Option<String>,

        /// Source tag (cursor, claude-code, cline, copilot, ...)
        #[arg(long)]
        agent: Option<String>,

        /// Commit to record (defaults to HEAD)
        #[arg(long)]
        commit: Option<String>,
    },

    /// Link a conversation to a commit by hand
    Link {
        conversation: String,
        /// Full hash or unique prefix
        commit: String,
        /// Confidence in [0, 1]
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Show links
    Links {
        #[command(subcommand)]
        command: LinksCommands,
    },

    /// Conversations and commits that touched a file
    Context {
        file: String,
        /// Only conversations whose text mentions this keyword
        #[arg(short, long)]
        keyword: Option<String>,
    },

    /// List recorded conversations
    Conversations {
        #[arg(long)]
        workspace: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
        /// Substring of a referenced file
        #[arg(short, long)]
        file: Option<String>,
        #[arg(short, long)]
        agent: Option<String>,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// List recorded commits
    Commits {
        #[arg(short, long)]
        repo: Option<String>,
        /// RFC 3339 or YYYY-MM-DD
        #[arg(long)]
        since: Option<String>,
        /// RFC 3339 or YYYY-MM-DD
        #[arg(long)]
        until: Option<String>,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Full-text search across every source
    Search {
        query: String,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Read a conversation straight from its source
    Read {
        id: String,
        /// Only look in this source
        #[arg(short, long)]
        source: Option<String>,
        /// Show the files each message referenced
        #[arg(long)]
        files: bool,
    },

    /// List conversation sources and whether they were found
    Sources,

    /// Re-run auto-linking for a recorded commit
    Autolink {
        commit: String,
        #[arg(long)]
        window_days: Option<f64>,
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Show store statistics
    Stats,
}

#[derive(Subcommand)]
enum LinksCommands {
    /// Commits linked to a conversation
    Conversation { id: String },
    /// Conversations linked to a commit
    Commit { hash: String },
}

fn run(command: Commands, config: Config) -> Result<()> {
    let db_path = config.database_path();

    match command {
        Commands::Hook {
            event,
            conversation_id,
            file,
            workspace_root,
            agent,
            commit,
        } => {
            hook::run(
                config,
                hook::HookArgs {
                    event,
                    conversation_id,
                    file,
                    workspace_root,
                    agent,
                    commit,
                },
            )?;
        }
        Commands::Link {
            conversation,
            commit,
            confidence,
        } => {
            with_store(&db_path, |store| {
                link::run(store, &conversation, &commit, confidence)
            })?;
        }
        Commands::Links { command } => match command {
            LinksCommands::Conversation { id } => {
                with_store(&db_path, |store| links::for_conversation(store, &id))?;
            }
            LinksCommands::Commit { hash } => {
                with_store(&db_path, |store| links::for_commit(store, &hash))?;
            }
        },
        Commands::Context { file, keyword } => {
            with_store(&db_path, |store| context::run(store, &file, keyword.as_deref()))?;
        }
        Commands::Conversations {
            workspace,
            project,
            file,
            agent,
            limit,
        } => {
            let filter = ConversationFilter {
                workspace_root: workspace.map(|w| to_forward_slashes(&w)),
                project_name: project,
                file,
                agent,
                limit,
            };
            with_store(&db_path, |store| conversations::run(store, &filter))?;
        }
        Commands::Commits {
            repo,
            since,
            until,
            limit,
        } => {
            let filter = CommitFilter {
                repo_path: repo.map(|r| to_forward_slashes(&r)),
                since: since.as_deref().map(parse_date_arg).transpose()?,
                until: until.as_deref().map(parse_date_arg).transpose()?,
                limit,
            };
            with_store(&db_path, |store| commits::run(store, &filter))?;
        }
        Commands::Search {
            query,
            project,
            limit,
        } => {
            let registry = ReaderRegistry::new(&config);
            search::run(&registry, &query, &SearchOptions { project, limit })?;
        }
        Commands::Read { id, source, files } => {
            let registry = ReaderRegistry::new(&config);
            read::run(&registry, &id, source.as_deref(), files)?;
        }
        Commands::Sources => {
            sources::run(&ReaderRegistry::new(&config))?;
        }
        Commands::Autolink {
            commit,
            window_days,
            min_score,
        } => {
            let mut options = AutoLinkOptions::from(&config.linking);
            if let Some(days) = window_days {
                options.window_days = days;
            }
            if let Some(score) = min_score {
                options.min_score = score;
            }
            with_store(&db_path, |store| autolink::run(store, &commit, &options))?;
        }
        Commands::Stats => {
            with_store(&db_path, |store| stats::run(store, &db_path))?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let loaded = Config::load(&cli.config);
    let debug = cli.debug || loaded.as_ref().map_or(false, |c| c.hooks.debug);
    init_tracing(debug);

    // A broken config file must not break the editor hooks
    let config = loaded.unwrap_or_else(|e| {
        warn!("using default configuration: {e:#}");
        Config::default()
    });

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tether: {e:#}");
            ExitCode::FAILURE
        }
    }
}
