use std::io;
use std::{env, fs, process};

use clap::{arg, ArgAction, Command};
use tracing_subscriber::EnvFilter;

use dbalign::client::cli::{self, CliOptions};
use dbalign::db::{mysql::MySqlAdapter, postgres::PostgresAdapter, DatabaseAdapter};
use dbalign::models::connections::{ConnectionConfig, DbType};
use dbalign::models::schema::Structure;
use dbalign::sql::{mysql::MySqlGenerator, postgres::PostgresGenerator, SqlGenerator};

fn command() -> Command {
    let pkg_name = env!("CARGO_PKG_NAME");

    Command::new(pkg_name)
        .bin_name(pkg_name)
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(arg!(<SCHEMA> "path to the schema description file"))
        .arg(arg!(-t --tables [PATTERNS] "comma-separated table names or globs to check"))
        .arg(arg!(-e --exclude [PATTERNS] "comma-separated table names or globs to skip"))
        .arg(
            arg!(-c --"check-risky" "probe column data to settle risky changes")
                .action(ArgAction::SetTrue),
        )
        .arg(arg!(-f --fix [LEVELS] "apply fixes for the given levels (safe,dbindex,unsafe)"))
}

fn config_from_env() -> Result<ConnectionConfig, Box<dyn std::error::Error>> {
    let database_url =
        env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;
    let db_type = if database_url.starts_with("postgres://")
        || database_url.starts_with("postgresql://")
    {
        DbType::Postgres
    } else if database_url.starts_with("mysql://") {
        DbType::MySql
    } else {
        return Err("DATABASE_URL must use a postgres:// or mysql:// scheme".into());
    };

    Ok(ConnectionConfig {
        db_type,
        database_url,
        prefix: env::var("DB_PREFIX").unwrap_or_default(),
    })
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match try_main().await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    }
}

async fn try_main() -> Result<i32, Box<dyn std::error::Error>> {
    let matches = match command().try_get_matches() {
        Ok(matches) => matches,
        Err(err) => {
            // Help and version requests are not errors.
            if err.use_stderr() {
                eprintln!("{}", err);
                return Ok(1);
            }
            err.print()?;
            return Ok(0);
        }
    };

    let schema_path = matches
        .get_one::<String>("SCHEMA")
        .ok_or("a schema description file is required")?;
    let raw = fs::read_to_string(schema_path)?;
    let structure = Structure::from_json_str(&raw)?;

    let options = CliOptions {
        tables: matches
            .get_one::<String>("tables")
            .map(|p| cli::split_patterns(p)),
        exclude: matches
            .get_one::<String>("exclude")
            .map(|p| cli::split_patterns(p)),
        check_risky: matches.get_flag("check-risky"),
        fix: matches
            .get_one::<String>("fix")
            .map(|levels| cli::parse_fix_levels(levels))
            .transpose()?,
    };

    let config = config_from_env()?;
    let mut stdout = io::stdout();

    let code = match config.db_type {
        DbType::Postgres => {
            let adapter = PostgresAdapter::connect(&config.database_url, &config.prefix).await?;
            let generator = PostgresGenerator::new(&config.prefix);
            run(&adapter, &generator, &structure, &options, &mut stdout).await?
        }
        DbType::MySql => {
            let adapter = MySqlAdapter::connect(&config.database_url, &config.prefix).await?;
            let generator = MySqlGenerator::new(&config.prefix);
            run(&adapter, &generator, &structure, &options, &mut stdout).await?
        }
    };

    Ok(code)
}

async fn run(
    adapter: &dyn DatabaseAdapter,
    generator: &dyn SqlGenerator,
    structure: &Structure,
    options: &CliOptions,
    out: &mut dyn io::Write,
) -> Result<i32, Box<dyn std::error::Error>> {
    Ok(cli::run(adapter, generator, structure, options, out).await?)
}
