//! Shipline - ship local work to a preview deploy and a pull request.
//!
//! Takes the working tree from "changes on my machine" to a feature branch,
//! a preview channel and an open pull request, asking only when it has to.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use crossterm::style::Stylize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shipline::core::{Config, WorkflowContext};
use shipline::hosting::HostingCli;
use shipline::prompt::{AutoPrompter, Prompter, TerminalPrompter};
use shipline::workflow::{RunOptions, StatusReport, WorkflowDriver};

/// Ship local work to a preview deploy and a pull request
#[derive(Parser)]
#[command(name = "shipline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the discovered one
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full workflow (default)
    Run(RunArgs),

    /// Show branch, working tree, logins and the open pull request
    Status,

    /// Manage preview channels
    Channels {
        #[command(subcommand)]
        operation: ChannelOperation,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Default)]
struct RunArgs {
    /// Trunk branch to branch from and open the pull request against
    #[arg(long, value_name = "BRANCH")]
    trunk: Option<String>,

    /// Skip the preview deploy
    #[arg(long)]
    no_deploy: bool,

    /// Skip opening a pull request
    #[arg(long)]
    no_pr: bool,

    /// Answer every question with its default
    #[arg(short = 'y', long)]
    yes: bool,

    /// Feature branch to create when starting on trunk
    #[arg(short, long, value_name = "NAME")]
    branch: Option<String>,

    /// Commit message for pending changes
    #[arg(short, long, value_name = "TEXT")]
    message: Option<String>,
}

#[derive(Subcommand)]
enum ChannelOperation {
    /// List preview channels
    List,

    /// Delete a preview channel
    Delete {
        /// Channel id
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("SHIPLINE_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    match cli.command {
        Some(Commands::Run(args)) => cmd_run(cli.config.as_deref(), args),
        None => cmd_run(cli.config.as_deref(), RunArgs::default()),
        Some(Commands::Status) => cmd_status(cli.config.as_deref()),
        Some(Commands::Channels { operation }) => cmd_channels(cli.config.as_deref(), operation),
        Some(Commands::Config { path }) => cmd_config(cli.config.as_deref(), path),
        Some(Commands::Completions { shell }) => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

/// Repository containing the current directory.
struct Workspace {
    root: PathBuf,
    /// `owner/name` of the GitHub remote, when known
    slug: Option<String>,
}

fn locate() -> Result<Workspace> {
    let cwd = std::env::current_dir().context("cannot read current directory")?;

    #[cfg(feature = "git")]
    {
        if let Some(location) = shipline::git::RepoLocation::discover(&cwd, "origin") {
            tracing::debug!(root = %location.root.display(), "Discovered repository");
            let slug = location.github_slug();
            return Ok(Workspace { root: location.root, slug });
        }
    }

    Ok(Workspace { root: cwd, slug: None })
}

fn load_config(explicit: Option<&Path>, root: &Path) -> Result<Config> {
    match explicit {
        Some(path) => Config::load_from_file(path),
        None => Config::load(root),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread().enable_all().build()?)
}

/// Run the workflow and exit with its status.
fn cmd_run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let root = locate()?.root;
    let mut config = load_config(config_path, &root)?;
    if let Some(trunk) = args.trunk {
        config.git.trunk = trunk;
    }

    let options = RunOptions {
        branch: args.branch,
        message: args.message,
        deploy: !args.no_deploy,
        pull_request: !args.no_pr,
        assume_yes: args.yes,
    };
    let prompter: Box<dyn Prompter> =
        if args.yes { Box::new(AutoPrompter) } else { Box::new(TerminalPrompter) };

    let ctx = WorkflowContext::new("ship", &root, config);
    let summary = runtime()?.block_on(WorkflowDriver::new(ctx, prompter, options).run());

    print!("{}", summary.render());
    std::process::exit(summary.exit_code());
}

/// Print repository status.
fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let workspace = locate()?;
    let config = load_config(config_path, &workspace.root)?;
    let ctx = WorkflowContext::new("status", &workspace.root, config).quiet();

    match runtime()?.block_on(StatusReport::collect(&ctx)) {
        Ok(report) => {
            if let Some(slug) = &workspace.slug {
                println!("Repo:     {slug}");
            }
            print!("{}", report.render());
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            if let Some(fix) = e.remediation() {
                eprintln!("  try: {fix}");
            }
            std::process::exit(1);
        }
    }
}

/// Handle preview channel commands.
fn cmd_channels(config_path: Option<&Path>, operation: ChannelOperation) -> Result<()> {
    let root = locate()?.root;
    let config = load_config(config_path, &root)?;
    let ctx = WorkflowContext::new("channels", &root, config).quiet();
    let hosting = HostingCli::new(
        ctx.executor.clone(),
        ctx.config.deploy.clone(),
        ctx.config.executor.deploy_timeout(),
    );
    let rt = runtime()?;

    match operation {
        ChannelOperation::List => {
            let channels = rt.block_on(hosting.list_channels())?;
            if channels.is_empty() {
                println!("No preview channels.");
            }
            for channel in channels {
                let url = channel.url.as_deref().unwrap_or("-");
                match channel.expires_at {
                    Some(expires) => println!("{:<40} {url}  (expires {expires})", channel.id),
                    None => println!("{:<40} {url}", channel.id),
                }
            }
        }
        ChannelOperation::Delete { id } => {
            rt.block_on(hosting.delete_channel(&id))?;
            println!("{} Deleted channel {id}", "✓".green());
        }
    }
    Ok(())
}

/// Show configuration.
fn cmd_config(config_path: Option<&Path>, show_path: bool) -> Result<()> {
    if show_path {
        match config_path {
            Some(path) => println!("{}", path.display()),
            None => {
                if let Some(path) = Config::config_dir() {
                    println!("{}", path.join("config.toml").display());
                }
            }
        }
        return Ok(());
    }

    let root = locate()?.root;
    let config = load_config(config_path, &root)?;
    println!("{}", config.to_toml()?);
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "shipline", &mut io::stdout());
}
