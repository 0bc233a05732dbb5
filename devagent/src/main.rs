//! `devagent` command line.
//!
//! Creates jobs and runs their steps against on-disk stores under the
//! configured data directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use devagent::controller::MetaController;
use devagent::core::types::Program;
use devagent::core::views::{AgentHints, GoalView, TaskType};
use devagent::exit_codes;
use devagent::io::capability::Capabilities;
use devagent::io::config::{AgentConfig, CONFIG_PATH, load_config, write_config};
use devagent::io::jobs::FileJobs;
use devagent::io::schema::{PROGRAM_SCHEMA, validate_json};
use devagent::io::store::Stores;
use devagent::logging;
use devagent::task::{JobNotFound, TaskRunner};

#[derive(Parser)]
#[command(
    name = "devagent",
    version,
    about = "Sandboxed instruction execution with event-derived memory"
)]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Create jobs and run their steps.
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },
}

#[derive(Subcommand)]
enum JobCommand {
    /// Create a job and print its id.
    Create {
        /// Repository the job works in.
        #[arg(long)]
        repo: PathBuf,
        /// One of init_project, fix_failures, run_experiments, upgrade_repo.
        #[arg(long, value_parser = parse_task_type)]
        task_type: TaskType,
        #[arg(long)]
        goal: String,
    },
    /// Run one step and print the result as JSON.
    Step {
        job_id: String,
        /// JSON file holding `{"instructions": [...]}`.
        #[arg(long)]
        program: PathBuf,
        #[arg(long)]
        last_outcome: Option<String>,
        #[arg(long, default_value_t = 0)]
        no_progress: u32,
    },
}

fn parse_task_type(raw: &str) -> Result<TaskType, String> {
    TaskType::parse(raw).ok_or_else(|| format!("unknown task type {raw:?}"))
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            std::process::exit(code);
        }
    };
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            if err.downcast_ref::<JobNotFound>().is_some() {
                exit_codes::NOT_FOUND
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Job { command } => {
            let config = load_config(&cli.config)?;
            let runner = task_runner(config)?;
            match command {
                JobCommand::Create {
                    repo,
                    task_type,
                    goal,
                } => cmd_create(&runner, &repo, task_type, goal),
                JobCommand::Step {
                    job_id,
                    program,
                    last_outcome,
                    no_progress,
                } => {
                    let hints = AgentHints {
                        last_step_outcome: last_outcome,
                        consecutive_no_progress: no_progress,
                    };
                    cmd_step(&runner, &job_id, &program, &hints)
                }
            }
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!("{} already exists", config_path.display());
        return Ok(());
    }
    write_config(config_path, &AgentConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(())
}

fn task_runner(config: AgentConfig) -> Result<TaskRunner> {
    let workdir = std::env::current_dir().context("resolve working directory")?;
    let stores = Stores::on_disk(&config.data_dir);
    let jobs = FileJobs::new(config.data_dir.join("jobs"));
    let capabilities = Capabilities::from_config(&config, &workdir)?;
    Ok(TaskRunner::new(
        MetaController::new(config, stores, capabilities),
        Box::new(jobs),
    ))
}

fn cmd_create(runner: &TaskRunner, repo: &Path, task_type: TaskType, goal: String) -> Result<()> {
    let repo_root = repo
        .canonicalize()
        .with_context(|| format!("resolve repo {}", repo.display()))?;
    let job_id = runner.create_job(
        repo_root,
        GoalView {
            task_type,
            natural_language_goal: goal,
        },
    )?;
    println!("{job_id}");
    Ok(())
}

fn cmd_step(runner: &TaskRunner, job_id: &str, program_path: &Path, hints: &AgentHints) -> Result<()> {
    let raw = fs::read_to_string(program_path)
        .with_context(|| format!("read program {}", program_path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parse program {}", program_path.display()))?;
    validate_json("program", PROGRAM_SCHEMA, &value)?;
    let program: Program = serde_json::from_value(value).context("decode program")?;

    let result = runner.run_step(job_id, &program, Some(hints))?;
    let mut out = serde_json::to_string_pretty(&result).context("serialize step result")?;
    out.push('\n');
    print!("{out}");
    Ok(())
}
