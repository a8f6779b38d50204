#![forbid(unsafe_code)]

//! `monodb` CLI: create/open a database file, run one-off commands against
//! it as JSON, or start the `OP_MSG`/`OP_QUERY` wire listener
//! (`monodb::wire::server`) for real drivers to connect to. Grounded on the
//! teacher's `src/bin/nexuslite.rs`: clap subcommands, a TOML `AppConfig`
//! with CLI > env > config-file > defaults precedence, and a `--pretty`
//! output flag in place of the teacher's `--json`/`--plain` pair.

use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use monodb::config::EngineOptions;
use monodb::database::Database;
use monodb::utils::{feature_flags, logger};
use monodb::wire::server;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct AppConfig {
    db_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    log_level: Option<String>,
}

fn load_config(cli_cfg: Option<&PathBuf>) -> AppConfig {
    let mut cfg = AppConfig::default();
    let mut paths: Vec<PathBuf> = vec![];
    if let Some(p) = cli_cfg {
        paths.push(p.clone());
    }
    if let Ok(p) = std::env::var("MONODB_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        paths.push(PathBuf::from(home).join(".config").join("monodb.toml"));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join("monodb.toml"));
    }
    for p in paths {
        if p.exists()
            && let Ok(s) = std::fs::read_to_string(&p)
            && let Ok(file_cfg) = toml::from_str::<AppConfig>(&s)
        {
            if cfg.db_path.is_none() {
                cfg.db_path = file_cfg.db_path;
            }
            if cfg.log_dir.is_none() {
                cfg.log_dir = file_cfg.log_dir;
            }
            if cfg.log_level.is_none() {
                cfg.log_level = file_cfg.log_level;
            }
        }
    }
    if cfg.db_path.is_none()
        && let Ok(s) = std::env::var("MONODB_DB")
    {
        cfg.db_path = Some(PathBuf::from(s));
    }
    if cfg.log_dir.is_none()
        && let Ok(s) = std::env::var("MONODB_LOG_DIR")
    {
        cfg.log_dir = Some(PathBuf::from(s));
    }
    if cfg.log_level.is_none()
        && let Ok(s) = std::env::var("MONODB_LOG_LEVEL")
    {
        cfg.log_level = Some(s);
    }
    cfg
}

#[derive(Parser, Debug)]
#[command(name = "monodb", version, about = "monodb embedded document database CLI", long_about = None)]
struct Cli {
    /// Path to a config file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override database path (takes precedence over config/env).
    #[arg(long)]
    db: Option<PathBuf>,
    /// Pretty-print JSON output.
    #[arg(long)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum FeatureCommands {
    /// List feature flags and their status.
    List,
    /// Enable a runtime feature flag.
    Enable { name: String },
    /// Disable a runtime feature flag.
    Disable { name: String },
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new database file (no-op if it already exists).
    New,
    /// Run a single command document (JSON) against a database and print the reply.
    Run {
        /// Database name the command runs against (the `$db` field drivers send).
        db_name: String,
        /// Command document as JSON, e.g. '{"ping": 1}'.
        command: String,
    },
    /// Read JSON command documents from stdin, one per line, printing each reply.
    Repl {
        /// Database name the commands run against.
        db_name: String,
    },
    /// Run the `validate` command against a collection and print its report.
    Validate { db_name: String, collection: String },
    /// Start the OP_MSG/OP_QUERY wire listener against a database file.
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:27017.
        #[arg(long, default_value = "127.0.0.1:27017")]
        addr: SocketAddr,
    },
    Feature {
        #[command(subcommand)]
        cmd: FeatureCommands,
    },
}

fn ensure_db_path(cli_db: Option<&PathBuf>, cfg: &AppConfig) -> PathBuf {
    cli_db.cloned().or_else(|| cfg.db_path.clone()).unwrap_or_else(|| PathBuf::from("monodb.db"))
}

fn open_db(path: &std::path::Path) -> io::Result<Database> {
    Database::open(path).map_err(|e| io::Error::other(e.to_string()))
}

fn print_doc(doc: &bson::Document, pretty: bool) {
    let value = bson::Bson::Document(doc.clone()).into_relaxed_extjson();
    let text = if pretty {
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    };
    println!("{text}");
}

fn run_one(db: &Database, db_name: &str, command_json: &str, pretty: bool) -> Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(command_json).map_err(|e| format!("invalid JSON command: {e}"))?;
    let cmd: bson::Document =
        bson::to_document(&value).map_err(|e| format!("command is not a BSON document: {e}"))?;
    match db.run_command(db_name, &cmd) {
        Ok(reply) => {
            print_doc(&reply, pretty);
            Ok(())
        }
        Err(e) => {
            let (code, code_name) = e.code();
            let reply = bson::doc! {"ok": 0.0, "errmsg": e.to_string(), "code": code, "codeName": code_name};
            print_doc(&reply, pretty);
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref());
    logger::configure_logging(cfg.log_dir.as_deref(), cfg.log_level.as_deref(), None);
    feature_flags::ensure("regex", cfg!(feature = "regex"), "Regular expression operators ($regex) in queries.");

    let db_path = ensure_db_path(cli.db.as_ref(), &cfg);

    let result = match &cli.command {
        Commands::New => Database::open_with_options(&db_path, EngineOptions::default())
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Commands::Run { db_name, command } => open_db(&db_path)
            .map_err(|e| e.to_string())
            .and_then(|db| run_one(&db, db_name, command, cli.pretty)),
        Commands::Repl { db_name } => open_db(&db_path).map_err(|e| e.to_string()).and_then(|db| {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = line.map_err(|e| e.to_string())?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = run_one(&db, db_name, line, cli.pretty) {
                    eprintln!("error: {e}");
                }
                io::stdout().flush().ok();
            }
            Ok(())
        }),
        Commands::Validate { db_name, collection } => open_db(&db_path).map_err(|e| e.to_string()).and_then(|db| {
            run_one(&db, db_name, &format!(r#"{{"validate": "{collection}"}}"#), cli.pretty)
        }),
        Commands::Serve { addr } => open_db(&db_path).map_err(|e| e.to_string()).and_then(|db| {
            let db = Arc::new(db);
            let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
            runtime.block_on(server::serve(db, *addr)).map_err(|e| e.to_string())
        }),
        Commands::Feature { cmd } => {
            match cmd {
                FeatureCommands::List => {
                    for f in feature_flags::list() {
                        println!("{}\t{}\t{}", f.name, f.enabled, f.description);
                    }
                }
                FeatureCommands::Enable { name } => {
                    if !feature_flags::set(name, true) {
                        eprintln!("unknown feature: {name}");
                        std::process::exit(1);
                    }
                }
                FeatureCommands::Disable { name } => {
                    if !feature_flags::set(name, false) {
                        eprintln!("unknown feature: {name}");
                        std::process::exit(1);
                    }
                }
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
