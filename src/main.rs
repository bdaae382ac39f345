use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use space_workbench::db::SqlDialect;
use space_workbench::utils::{credential_store, AppConfig};
use space_workbench::workbench::{EventSink, FileScriptStore, RunOutcome};
use space_workbench::{App, WorkbenchError, WorkbenchResult};

/// Run SQL scripts against a saved connection profile.
#[derive(Parser, Debug)]
#[command(name = "space_workbench", version)]
#[command(about = "Headless SQL workbench", long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Saved connection profile name (defaults to the last used one)
    #[arg(short = 'p', long = "profile")]
    profile: Option<String>,

    /// Database to use after connecting
    #[arg(short = 'd', long = "database")]
    database: Option<String>,

    /// SQL dialect used for splitting and formatting
    #[arg(long = "dialect")]
    dialect: Option<SqlDialect>,

    /// Password; overrides the keyring
    #[arg(long = "password")]
    password: Option<String>,

    /// Store --password in the OS keyring
    #[arg(long = "remember-password", requires = "password")]
    remember_password: bool,

    /// Remove the stored password for the profile and exit
    #[arg(long = "forget-password")]
    forget_password: bool,

    /// Pretty-print the script instead of executing it
    #[arg(long = "format")]
    format: bool,

    /// SQL to execute
    #[arg(short = 'e', long = "execute", conflicts_with = "script")]
    execute: Option<String>,

    /// Script file to execute (reads stdin when neither is given)
    script: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> WorkbenchResult<ExitCode> {
    let config_path = cli.config.clone().or_else(AppConfig::config_path);
    let config = match &config_path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::new(),
    };
    let mut app = App::new(config);
    let dialect = cli.dialect.unwrap_or(app.config().dialect);

    if cli.forget_password {
        let name = cli
            .profile
            .as_deref()
            .or(app.config().last_connection.as_deref())
            .ok_or_else(|| WorkbenchError::Config("no connection profile selected".to_string()))?;
        credential_store::delete_password(name)?;
        println!("Forgot stored password for {name}");
        return Ok(ExitCode::SUCCESS);
    }

    let script = load_script(&cli)?;

    if cli.format {
        let workbench = app.open_workbench(dialect, Arc::new(FileScriptStore::new()), EventSink::default());
        workbench.buffer().set_text(&script);
        workbench.format();
        println!("{}", workbench.buffer().text());
        return Ok(ExitCode::SUCCESS);
    }

    let mut profile = app.resolve_profile(cli.profile.as_deref())?;
    if let Some(password) = &cli.password {
        profile.password = password.clone();
        if cli.remember_password {
            credential_store::store_password(&profile.name, password)?;
        }
    }

    let workbench = app.open_workbench(dialect, Arc::new(FileScriptStore::new()), EventSink::default());
    workbench.buffer().set_text(&script);

    let connected = workbench.connect(&profile, cli.database.as_deref()).await;
    profile.clear_password();
    if !connected {
        eprintln!("{}", workbench.status().unwrap_or_default());
        return Ok(ExitCode::FAILURE);
    }

    let outcome = workbench.execute().await;
    print!("{}", workbench.render_all());
    if let Some(status) = workbench.status() {
        println!("{status}");
    }

    workbench.close().await;
    app.shutdown().await;

    app.config_mut().last_connection = Some(profile.name.clone());
    if let Some(path) = &config_path {
        if let Err(err) = app.config().save_to(path) {
            warn!("{err}");
        }
    }

    let code = match outcome {
        Some(RunOutcome::Completed(summary)) if summary.error_count == 0 => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    };
    Ok(code)
}

fn load_script(cli: &Cli) -> WorkbenchResult<String> {
    if let Some(sql) = &cli.execute {
        return Ok(sql.clone());
    }
    if let Some(path) = &cli.script {
        return std::fs::read_to_string(path).map_err(|err| {
            WorkbenchError::Config(format!("cannot read {}: {err}", path.display()))
        });
    }
    let mut sql = String::new();
    std::io::stdin()
        .read_to_string(&mut sql)
        .map_err(|err| WorkbenchError::Config(format!("cannot read stdin: {err}")))?;
    Ok(sql)
}
