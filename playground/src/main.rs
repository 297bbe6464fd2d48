//! Playground CLI.
//!
//! Runs sessions against the configured interpreter worker and converts
//! sessions to and from permalink tokens. Exit codes are listed in
//! [`playground::exit_codes`].

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use playground::core::session::Session;
use playground::engine::RunRequest;
use playground::exit_codes;
use playground::io::compat_file::load_compat_table;
use playground::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_config, write_config};
use playground::io::session_file::{load_session, write_session};
use playground::io::worker::ProcessSpawner;
use playground::logging;
use playground::run::run_session;
use playground::share::{Restored, restore_session, share_session};

#[derive(Debug, Parser)]
#[command(
    name = "playground",
    version,
    about = "Run playground sessions and convert permalinks"
)]
struct Cli {
    /// Config file (TOML). Missing files fall back to defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a session file or permalink through the interpreter worker.
    Run {
        /// Session JSON file.
        #[arg(required_unless_present = "permalink", conflicts_with = "permalink")]
        session: Option<PathBuf>,
        /// Permalink token (with or without a leading `#`).
        #[arg(long)]
        permalink: Option<String>,
        /// Run only this group (0-based); runs every group otherwise.
        #[arg(long)]
        group: Option<usize>,
        /// Whole-run timeout in seconds, overriding the config.
        #[arg(long, conflicts_with = "no_timeout")]
        timeout: Option<u64>,
        /// Disable the timeout.
        #[arg(long)]
        no_timeout: bool,
        /// Never emit ANSI escape codes.
        #[arg(long)]
        no_color: bool,
    },
    /// Print the permalink token for a session file.
    Encode { session: PathBuf },
    /// Decode a permalink token into a session file (stdout by default).
    Decode {
        token: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a config file with default values.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli.config;
    let config = || -> Result<EngineConfig> {
        let config = load_config(&config_path)?;
        debug!(config = %config_path.display(), "loaded config");
        Ok(config)
    };
    match cli.command {
        Command::Run {
            session,
            permalink,
            group,
            timeout,
            no_timeout,
            no_color,
        } => {
            let config = config()?;
            let session = match (session, permalink) {
                (Some(path), _) => load_session(&path)?,
                (None, Some(token)) => match session_from_token(&token, &config)? {
                    Ok(session) => session,
                    Err(code) => return Ok(code),
                },
                (None, None) => bail!("either a session file or --permalink is required"),
            };
            let timeout = match (no_timeout, timeout) {
                (true, _) | (false, Some(0)) => None,
                (false, Some(secs)) => Some(std::time::Duration::from_secs(secs)),
                (false, None) => config.timeout(),
            };
            cmd_run(&config, session, group, timeout, !no_color)
        }
        Command::Encode { session } => {
            let config = config()?;
            let session = load_session(&session)?;
            println!("{}", share_session(&session, &config));
            Ok(exit_codes::OK)
        }
        Command::Decode { token, output } => cmd_decode(&token, output.as_deref(), &config()?),
        Command::InitConfig { force } => cmd_init_config(&config_path, force),
    }
}

fn cmd_run(
    config: &EngineConfig,
    session: Session,
    group: Option<usize>,
    timeout: Option<std::time::Duration>,
    color: bool,
) -> Result<i32> {
    let request = RunRequest::from_session(&session, group, timeout);
    let spawner = ProcessSpawner::new(config.worker.command.clone());
    let color = color && std::io::stdout().is_terminal();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let outcome = runtime.block_on(async {
        let mut stdout = std::io::stdout();
        run_session(spawner, config.engine_options(), request, &mut stdout, color).await
    })?;

    Ok(match outcome.terminated {
        None => exit_codes::OK,
        Some(_) => exit_codes::TERMINATED,
    })
}

/// Decode `token` into a session, or the exit code to stop with.
fn session_from_token(token: &str, config: &EngineConfig) -> Result<Result<Session, i32>> {
    let compat = load_compat_table(config.compat_path.as_deref())?;
    Ok(match restore_session(token, &compat, config) {
        Restored::Session { session } => Ok(session),
        Restored::Redirect { version, url } => {
            println!("{url}");
            eprintln!("permalink targets interpreter {version}; open the archived build above");
            Err(exit_codes::INCOMPATIBLE)
        }
        Restored::Failed { reason, .. } => {
            eprintln!("{reason}");
            Err(exit_codes::UNPARSEABLE)
        }
    })
}

fn cmd_decode(token: &str, output: Option<&Path>, config: &EngineConfig) -> Result<i32> {
    let session = match session_from_token(token, config)? {
        Ok(session) => session,
        Err(code) => return Ok(code),
    };
    match output {
        Some(path) => write_session(path, &session)?,
        None => println!(
            "{}",
            serde_json::to_string_pretty(&session).context("serialize session json")?
        ),
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &EngineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_session_or_permalink() {
        let cli = Cli::try_parse_from(["playground", "run", "s.json", "--group", "1"])
            .expect("session");
        let Command::Run { session, group, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(session, Some(PathBuf::from("s.json")));
        assert_eq!(group, Some(1));

        let cli = Cli::try_parse_from(["playground", "run", "--permalink", "#abc"])
            .expect("permalink");
        assert!(matches!(cli.command, Command::Run { permalink: Some(_), .. }));
    }

    #[test]
    fn run_requires_a_source() {
        assert!(Cli::try_parse_from(["playground", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["playground", "run", "s.json", "--permalink", "x"]).is_err()
        );
    }

    #[test]
    fn timeout_flags_conflict() {
        assert!(
            Cli::try_parse_from(["playground", "run", "s.json", "--timeout", "3", "--no-timeout"])
                .is_err()
        );
    }

    #[test]
    fn config_is_global() {
        let cli = Cli::try_parse_from(["playground", "encode", "s.json", "--config", "c.toml"])
            .expect("parse");
        assert_eq!(cli.config, PathBuf::from("c.toml"));
    }
}
