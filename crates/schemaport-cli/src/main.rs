//! schemaport CLI - schema migrations, dumps and verification across SQLite,
//! MySQL/MariaDB and PostgreSQL.

use clap::{Parser, Subcommand};
use schemaport::migration::tenant::record_consolidation;
use schemaport::{
    drivers, verify, Catalog, Config, DatabaseKind, DumpEngine, DumpOptions, DumpScript,
    PortError, ResilientExecutor, SchemaOperations, VerifyOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit code when a database stays unreachable through every retry.
const EXIT_DATABASE_UNREACHABLE: i32 = 3;

#[derive(Parser)]
#[command(name = "schemaport")]
#[command(about = "Cross-database schema migrations, dumps and verification")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: trace, debug, info, warn, error (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migration steps
    Migrate {
        /// Migration catalog (YAML)
        #[arg(long)]
        catalog: PathBuf,
    },

    /// Show the state of every migration step
    Status {
        /// Migration catalog (YAML)
        #[arg(long)]
        catalog: PathBuf,
    },

    /// Revert applied steps newer than a given id
    Revert {
        /// Migration catalog (YAML)
        #[arg(long)]
        catalog: PathBuf,

        /// Keep steps up to and including this id
        #[arg(long)]
        to: i64,
    },

    /// Record which tenant a multi-tenant table's rows are consolidated into
    Consolidate {
        /// Table to be retrofitted
        #[arg(long)]
        table: String,

        /// Existing tenant that receives every row
        #[arg(long)]
        tenant: String,
    },

    /// Write schema and data as a SQL script for a target engine
    Dump {
        /// Target engine: sqlite, mysql or postgres (default: the source engine)
        #[arg(long)]
        target: Option<String>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Comma-separated tables to dump (default: all)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Override rows per INSERT statement
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Omit CREATE statements
        #[arg(long, conflicts_with = "schema_only")]
        data_only: bool,

        /// Omit row data
        #[arg(long)]
        schema_only: bool,

        /// Emit upserts keyed on the primary key
        #[arg(long)]
        upsert: bool,
    },

    /// Execute a dump script against the configured database
    Import {
        /// Script written by `dump`
        script: PathBuf,
    },

    /// Compare row and foreign key counts with another database
    Verify {
        /// Configuration of the database to compare against
        #[arg(long)]
        against: PathBuf,

        /// Comma-separated tables to compare (default: all)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Also compare row values
        #[arg(long)]
        values: bool,
    },

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

/// Returns `Ok(false)` when the command ran but its check did not pass.
async fn run() -> Result<bool, PortError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(PortError::Config)?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Migrate { catalog } => {
            let ops = open(&config).await?;
            let migrator = Catalog::load(&catalog)?.into_migrator(config.tenant.as_ref())?;
            let report = migrator.run(&ops).await;
            ops.close().await;
            let report = report?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({ "applied": report.applied, "skipped": report.skipped })
                );
            } else {
                println!("Migrations complete!");
                println!("  Applied: {}", report.applied.len());
                println!("  Already applied: {}", report.skipped.len());
            }
        }

        Commands::Status { catalog } => {
            let ops = open(&config).await?;
            let migrator = Catalog::load(&catalog)?.into_migrator(config.tenant.as_ref())?;
            let status = migrator.status(&ops).await;
            ops.close().await;

            for step in status? {
                if cli.output_json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "id": step.id,
                            "description": step.description,
                            "state": step.state.to_string(),
                            "applied_at": step.applied_at,
                        })
                    );
                } else {
                    println!(
                        "  {:>16}  {:<12} {}{}",
                        step.id,
                        step.state,
                        step.description,
                        step.applied_at
                            .map(|at| format!(" (at {})", at))
                            .unwrap_or_default()
                    );
                }
            }
        }

        Commands::Revert { catalog, to } => {
            let ops = open(&config).await?;
            let migrator = Catalog::load(&catalog)?.into_migrator(config.tenant.as_ref())?;
            let reverted = migrator.revert_to(&ops, to).await;
            ops.close().await;
            let reverted = reverted?;
            println!("Reverted {} steps: {:?}", reverted.len(), reverted);
        }

        Commands::Consolidate { table, tenant } => {
            let ops = open(&config).await?;
            let recorded = record_consolidation(&ops, &table, &tenant).await;
            ops.close().await;
            recorded?;
            println!("Rows of {} will be assigned to tenant {}", table, tenant);
        }

        Commands::Dump {
            target,
            output,
            tables,
            chunk_size,
            data_only,
            schema_only,
            upsert,
        } => {
            let target = match target {
                Some(name) => DatabaseKind::parse(&name)?,
                None => config.database.kind()?,
            };
            let mut options = DumpOptions::from(&config.dump);
            options.tables = tables;
            options.include_ddl &= !data_only;
            options.include_data &= !schema_only;
            options.upsert |= upsert;
            if let Some(size) = chunk_size {
                options.chunk_size = size;
            }

            let ops = open(&config).await?;
            let started = Instant::now();
            let script = DumpEngine::new(&ops).generate(target, &options).await;
            ops.close().await;
            let script = script?;
            script.write(&output)?;

            println!("Dump written to {}", output.display());
            println!("  Target: {}", script.target);
            println!("  Statements: {}", script.len());
            println!("  Duration: {:.2}s", started.elapsed().as_secs_f64());
        }

        Commands::Import { script } => {
            let script = DumpScript::load(&script)?;
            let ops = open(&config).await?;
            let report = script.import(&ops).await;
            ops.close().await;
            let report = report?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({
                        "statements": report.statements,
                        "rows_inserted": report.rows_inserted,
                    })
                );
            } else {
                println!("Import complete!");
                println!("  Statements: {}", report.statements);
                println!("  Rows: {}", report.rows_inserted);
            }
        }

        Commands::Verify {
            against,
            tables,
            values,
        } => {
            let other = Config::load(&against)?;
            let source = open(&config).await?;
            let target = open(&other).await?;
            let options = VerifyOptions {
                compare_values: values,
            };
            let result = verify::compare_with(&source, &target, &tables, &options).await;
            source.close().await;
            target.close().await;
            let result = result?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                for table in &result.tables {
                    println!(
                        "  {} {} (rows: {}/{}, foreign keys: {}/{})",
                        if table.is_match() { "OK  " } else { "DIFF" },
                        table.table_name,
                        table.source_row_count,
                        table
                            .target_row_count
                            .map_or_else(|| "missing".to_string(), |c| c.to_string()),
                        table.source_foreign_keys,
                        table.target_foreign_keys
                    );
                }
            }

            if !result.is_match() {
                eprintln!("Verification failed for: {}", result.mismatched().join(", "));
                return Ok(false);
            }
        }

        Commands::HealthCheck => {
            let started = Instant::now();
            let outcome = match open(&config).await {
                Ok(ops) => {
                    let reply = ops.query("SELECT 1").await.map(|_| ());
                    ops.close().await;
                    reply
                }
                Err(e) => Err(e),
            };
            let latency_ms = started.elapsed().as_millis();
            let healthy = outcome.is_ok();

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({
                        "engine": config.database.r#type,
                        "connected": healthy,
                        "latency_ms": latency_ms,
                        "error": outcome.as_ref().err().map(|e| e.to_string()),
                    })
                );
            } else {
                println!("Health Check Results:");
                println!(
                    "  Database ({}): {} ({}ms)",
                    config.database.r#type,
                    if healthy { "OK" } else { "FAILED" },
                    latency_ms
                );
                if let Err(ref err) = outcome {
                    println!("    Error: {}", err);
                }
            }

            if !healthy {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Connect and wrap the session in a retrying executor that exits the process
/// once the database stays unreachable.
async fn open(config: &Config) -> Result<SchemaOperations, PortError> {
    let executor =
        ResilientExecutor::new(config.retry.policy()).exit_on_exhaustion(EXIT_DATABASE_UNREACHABLE);
    let conn = executor.run(|| drivers::connect(&config.database)).await?;
    Ok(SchemaOperations::new(conn, executor))
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("schemaport={}", level)));

    // Logs go to stderr so stdout stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        "json" => subscriber.json().try_init(),
        "text" => subscriber.try_init(),
        other => return Err(format!("Unknown log format: {} (expected text or json)", other)),
    };
    installed.map_err(|e| e.to_string())
}
