//! Backlog CLI - A concurrency-safe task store shared by AI agent sessions.

use backlog::cli::{
    Cli, Commands, ConfigCommands, EpicCommands, ItemCommands, ReleaseCommands, SessionCommands,
    SubCommands, WorkspaceCommands,
};
use backlog::commands::{self, ListFilter, Output};
use backlog::config::{self, ConfigOverrides, ConfigPaths, ResolvedConfig};
use backlog::models::ops::{ItemPatch, NewItem};
use backlog::models::{ItemStatus, Priority, SessionContext, SessionStatus};
use backlog::storage::{self, Storage};
use backlog::sync::SyncNotifier;
use backlog::sys::{self, GIT_TIMEOUT};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "BL_LOG";

fn main() {
    init_logging();

    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = run(cli) {
        report_error(&e, human);
        process::exit(1);
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report_error(e: &backlog::Error, human: bool) {
    if human {
        eprintln!("Error: {}", e);
        if let Some(hint) = e.hint() {
            eprintln!("Hint: {}", hint);
        }
        return;
    }

    let mut err = serde_json::json!({ "error": e.to_string() });
    if let Some(hint) = e.hint() {
        err["hint"] = serde_json::Value::String(hint);
    }
    if let backlog::Error::UnresolvedSubitems { id, subitems } = e {
        err["id"] = serde_json::json!(id);
        err["subitems"] = serde_json::json!(subitems);
    }
    eprintln!("{}", err);
}

fn run(cli: Cli) -> Result<(), backlog::Error> {
    let human = cli.human_readable;
    let data_dir = match cli.data_dir.clone() {
        Some(dir) => dir,
        None => storage::default_data_dir()?,
    };
    let paths = ConfigPaths {
        data_dir: data_dir.clone(),
        system_config: config::system_config_path(cli.config_dir.as_deref()),
    };
    let overrides = ConfigOverrides::from_env()
        .with_team(cli.team.clone())
        .with_sync_endpoint(cli.sync_endpoint.clone());
    let config = config::resolve_config(&paths, &overrides)?;
    tracing::debug!(team = config.team(), prefix = config.id_prefix(), "Resolved config");

    // Config commands work before the backlog exists.
    if let Commands::Config { command } = &cli.command {
        match command {
            ConfigCommands::Show => output(&commands::config_show(&config), human),
            ConfigCommands::Set { key, value } => {
                output(&commands::config_set(&config, key, value)?, human)
            }
        }
        return Ok(());
    }

    let notifier = SyncNotifier::new(
        config.sync_endpoint(),
        config.team(),
        config.sync_timeout_ms(),
    );

    if matches!(cli.command, Commands::Init) {
        let (storage, created) = Storage::init_with_data_dir(&data_dir, config.team())?;
        let storage = storage.with_sync(notifier);
        output(&commands::init(&storage, created, &config)?, human);
        storage.finish_sync();
        return Ok(());
    }

    let storage = Storage::open_with_data_dir(&data_dir, config.team())?.with_sync(notifier);
    let ctx = session_context(&cli, &config);

    let result = run_command(cli.command, &storage, &config, &ctx, human);
    // Notifications go out after the result is printed, even on failure.
    storage.finish_sync();
    result
}

/// Build the caller's context: explicit flags win, then git discovery.
fn session_context(cli: &Cli, config: &ResolvedConfig) -> SessionContext {
    let mut ctx = SessionContext::new(config.team());
    if let Some(session) = &cli.session {
        ctx = ctx.with_session(session.clone());
    }

    let workspace: Option<PathBuf> = match &cli.workspace {
        Some(path) => Some(path.clone()),
        None => env::current_dir().ok().and_then(|cwd| sys::find_git_root(&cwd)),
    };
    let branch = match &cli.branch {
        Some(branch) => Some(branch.clone()),
        None => workspace
            .as_deref()
            .and_then(|ws| sys::detect_branch(ws, GIT_TIMEOUT)),
    };
    if let Some(ws) = workspace {
        ctx = ctx.with_workspace(ws);
    }
    if let Some(branch) = branch {
        ctx = ctx.with_branch(branch);
    }
    ctx
}

fn parse_priority(value: Option<String>, default: Priority) -> Result<Priority, backlog::Error> {
    value.map_or(Ok(default), |p| Priority::parse(&p))
}

fn run_command(
    command: Commands,
    storage: &Storage,
    config: &ResolvedConfig,
    ctx: &SessionContext,
    human: bool,
) -> Result<(), backlog::Error> {
    let prefix = config.id_prefix();

    match command {
        Commands::Item { command } => match command {
            ItemCommands::Add {
                title,
                description,
                priority,
                tag,
                ticket,
                epic,
            } => {
                let new = NewItem {
                    title,
                    description,
                    priority: parse_priority(priority, config.default_priority())?,
                    tags: tag,
                    external_id: ticket,
                    epic,
                };
                output(&commands::item_add(storage, prefix, new)?, human);
            }
            ItemCommands::List {
                status,
                priority,
                tag,
                epic,
                all,
            } => {
                let filter = ListFilter {
                    status: status.as_deref().map(ItemStatus::parse).transpose()?,
                    priority: priority.as_deref().map(Priority::parse).transpose()?,
                    tag,
                    epic,
                    all,
                };
                output(&commands::item_list(storage, &filter)?, human);
            }
            ItemCommands::Show { id } => {
                output(&commands::item_show(storage, prefix, &id)?, human);
            }
            ItemCommands::Update {
                id,
                title,
                description,
                priority,
                add_tag,
                remove_tag,
                ticket,
                epic,
            } => {
                let patch = ItemPatch {
                    title,
                    description,
                    priority: priority.as_deref().map(Priority::parse).transpose()?,
                    add_tags: add_tag,
                    remove_tags: remove_tag,
                    external_id: ticket,
                    epic,
                };
                output(&commands::item_update(storage, prefix, &id, patch)?, human);
            }
            ItemCommands::Start { id } => {
                output(&commands::item_start(storage, prefix, &id, ctx)?, human);
            }
            ItemCommands::Complete { id, force } => {
                output(&commands::item_complete(storage, prefix, &id, force)?, human);
            }
            ItemCommands::Cancel { id, reason, force } => {
                output(
                    &commands::item_cancel(storage, prefix, &id, reason, force)?,
                    human,
                );
            }
            ItemCommands::Pause { id, reason } => {
                output(&commands::item_pause(storage, prefix, &id, &reason)?, human);
            }
            ItemCommands::Resume { id } => {
                output(&commands::item_resume(storage, prefix, &id)?, human);
            }
            ItemCommands::Remove { id } => {
                output(&commands::item_remove(storage, prefix, &id)?, human);
            }
        },

        Commands::Sub { command } => match command {
            SubCommands::Add {
                parent,
                title,
                description,
                priority,
                tag,
            } => {
                let new = NewItem {
                    title,
                    description,
                    priority: parse_priority(priority, config.default_priority())?,
                    tags: tag,
                    ..Default::default()
                };
                output(&commands::sub_add(storage, prefix, &parent, new)?, human);
            }
        },

        Commands::Block { target, blocker } => {
            output(&commands::block(storage, prefix, &target, &blocker)?, human);
        }

        Commands::Unblock { target, blocker } => {
            output(&commands::unblock(storage, prefix, &target, &blocker)?, human);
        }

        Commands::Workspace { command } => match command {
            WorkspaceCommands::Link { id, path } => {
                output(
                    &commands::workspace_link(storage, prefix, &id, path.as_deref(), ctx)?,
                    human,
                );
            }
            WorkspaceCommands::Unlink { id } => {
                output(&commands::workspace_unlink(storage, prefix, &id)?, human);
            }
            WorkspaceCommands::Check { id, path } => {
                output(
                    &commands::workspace_check(
                        storage,
                        prefix,
                        id.as_deref(),
                        path.as_deref(),
                        ctx,
                    )?,
                    human,
                );
            }
        },

        Commands::Session { command } => match command {
            SessionCommands::Status { status, task } => {
                let status = SessionStatus::parse(&status)?;
                output(&commands::session_status(storage, ctx, status, task)?, human);
            }
            SessionCommands::Pause { reason } => {
                output(&commands::session_pause(storage, ctx, &reason)?, human);
            }
            SessionCommands::Resume => {
                output(&commands::session_resume(storage, ctx)?, human);
            }
            SessionCommands::Remove { id } => {
                output(&commands::session_remove(storage, ctx, id.as_deref())?, human);
            }
            SessionCommands::WorkingOn { id, clear } => {
                let selector = if clear { None } else { id.as_deref() };
                output(
                    &commands::session_working_on(storage, prefix, ctx, selector)?,
                    human,
                );
            }
            SessionCommands::List => {
                output(&commands::session_list(storage)?, human);
            }
            SessionCommands::Reconcile { live } => {
                output(&commands::session_reconcile(storage, live)?, human);
            }
        },

        Commands::Epic { command } => match command {
            EpicCommands::Add { title, description } => {
                output(
                    &commands::epic_add(storage, prefix, &title, description)?,
                    human,
                );
            }
            EpicCommands::List => {
                output(&commands::epic_list(storage)?, human);
            }
        },

        Commands::Release { command } => match command {
            ReleaseCommands::Add { name, items } => {
                output(&commands::release_add(storage, prefix, &name, &items)?, human);
            }
            ReleaseCommands::List => {
                output(&commands::release_list(storage)?, human);
            }
        },

        Commands::Doctor { fix } => {
            output(&commands::doctor(storage, prefix, fix)?, human);
        }

        Commands::Export => {
            output(&commands::export(storage)?, human);
        }

        // Handled before the storage is opened.
        Commands::Init | Commands::Config { .. } => {}
    }

    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
