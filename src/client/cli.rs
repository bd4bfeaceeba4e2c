use std::io::Write;

use regex::Regex;

use crate::check::diff::{CheckOptions, SchemaComparator};
use crate::check::fixer::SchemaFixer;
use crate::check::risk::evaluate_risky;
use crate::db::DatabaseAdapter;
use crate::errors::DbError;
use crate::models::report::{SchemaError, Safety};
use crate::models::schema::Structure;
use crate::sql::SqlGenerator;

/// Width of the rule line between tables in the report.
const RULE_WIDTH: usize = 60;

/// Parsed command-line selection.
#[derive(Debug, Default)]
pub struct CliOptions {
    pub tables: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub check_risky: bool,
    pub fix: Option<Vec<Safety>>,
}

/// Splits a comma-separated pattern list, dropping empty elements.
pub fn split_patterns(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands a pattern list against a name universe. Literal patterns pass
/// through verbatim (even when the name is unknown); globs are anchored
/// and expand to every matching name. Output order follows the input
/// patterns, then the iteration order of the names.
pub fn resolve_table_patterns(
    patterns: &[String],
    names: &[String],
) -> Result<Vec<String>, DbError> {
    let mut resolved: Vec<String> = Vec::new();
    for pattern in patterns {
        if pattern.contains('*') {
            let anchored = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
            let regex = Regex::new(&anchored)
                .map_err(|e| DbError::Config(format!("Bad table pattern '{}': {}", pattern, e)))?;
            for name in names {
                if regex.is_match(name) && !resolved.contains(name) {
                    resolved.push(name.clone());
                }
            }
        } else if !resolved.contains(pattern) {
            resolved.push(pattern.clone());
        }
    }
    Ok(resolved)
}

/// Parses the `--fix` level list. `risky` is not a valid request: risky
/// records only become actionable once `--check-risky` has settled them.
pub fn parse_fix_levels(input: &str) -> Result<Vec<Safety>, DbError> {
    let mut levels = Vec::new();
    for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let level = match token {
            "safe" => Safety::Safe,
            "dbindex" => Safety::DbIndex,
            "unsafe" => Safety::Unsafe,
            "risky" => {
                return Err(DbError::Config(
                    "'risky' cannot be fixed directly; run with --check-risky to settle \
                     risky changes into safe or unsafe first"
                        .to_string(),
                ))
            }
            other => {
                return Err(DbError::Config(format!("Unknown fix level '{}'", other)));
            }
        };
        if !levels.contains(&level) {
            levels.push(level);
        }
    }
    if levels.is_empty() {
        return Err(DbError::Config(
            "--fix requires at least one of: safe, dbindex, unsafe".to_string(),
        ));
    }
    Ok(levels)
}

/// One block per table, in discovery order, each line carrying the record's
/// safety classification.
pub fn print_report(out: &mut dyn Write, errors: &[SchemaError]) -> Result<(), DbError> {
    let mut tables: Vec<&str> = Vec::new();
    for error in errors {
        if !tables.contains(&error.table.as_str()) {
            tables.push(&error.table);
        }
    }
    for table in tables {
        writeln!(out, "{}", table).map_err(|e| DbError::Unknown(e.to_string()))?;
        for error in errors.iter().filter(|e| e.table == table) {
            writeln!(out, " * fix={}   {}", error.safety, error.desc)
                .map_err(|e| DbError::Unknown(e.to_string()))?;
        }
        writeln!(out, "{}", "-".repeat(RULE_WIDTH))
            .map_err(|e| DbError::Unknown(e.to_string()))?;
    }
    Ok(())
}

/// Drives a full check (and optional repair) run and returns the process
/// exit code: 0 on success, 2 when the database holds no application
/// tables yet.
pub async fn run(
    adapter: &dyn DatabaseAdapter,
    generator: &dyn SqlGenerator,
    structure: &Structure,
    options: &CliOptions,
    out: &mut dyn Write,
) -> Result<i32, DbError> {
    let live_tables = adapter.table_names().await?;
    if live_tables.is_empty() {
        writeln!(out, "The database has not been initialised yet.")
            .map_err(|e| DbError::Unknown(e.to_string()))?;
        return Ok(2);
    }

    // Patterns resolve against everything either side knows about, so a
    // glob can select declared-but-missing and live-but-undeclared tables
    // alike.
    let mut universe: Vec<String> = structure.tables.iter().map(|t| t.name.clone()).collect();
    for name in &live_tables {
        if !universe.contains(name) {
            universe.push(name.clone());
        }
    }

    let limit = match &options.tables {
        Some(patterns) => Some(resolve_table_patterns(patterns, &universe)?),
        None => None,
    };
    let exclude = match &options.exclude {
        Some(patterns) => Some(resolve_table_patterns(patterns, &universe)?),
        None => None,
    };

    let check_options = CheckOptions {
        limit,
        exclude,
        ..CheckOptions::default()
    };

    let comparator = SchemaComparator::new(adapter, generator);
    let mut errors = comparator.compare(structure, &check_options).await?;

    if options.check_risky {
        evaluate_risky(adapter, &mut errors).await?;
    }

    print_report(out, &errors)?;

    if let Some(levels) = &options.fix {
        let fixer = SchemaFixer::new(adapter, generator);
        let resolved = fixer.fix(structure, &mut errors, levels).await?;
        if resolved > 0 {
            writeln!(out, "{} schema issues were resolved.", resolved)
                .map_err(|e| DbError::Unknown(e.to_string()))?;
        } else {
            writeln!(out, "No schema issues were resolved.")
                .map_err(|e| DbError::Unknown(e.to_string()))?;
        }
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::{ErrorKind, Status};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn globs_are_anchored_and_literals_pass_through() {
        let universe = names(&["ab", "bc", "xc", "d"]);
        let resolved =
            resolve_table_patterns(&names(&["a", "b*", "*c"]), &universe).unwrap();
        assert_eq!(resolved, names(&["a", "bc", "xc"]));
    }

    #[test]
    fn resolution_order_follows_the_input() {
        let universe = names(&[
            "config",
            "config_log",
            "config_plugins",
            "course",
            "course_modules",
        ]);
        let resolved =
            resolve_table_patterns(&names(&["config*", "course"]), &universe).unwrap();
        assert_eq!(
            resolved,
            names(&["config", "config_log", "config_plugins", "course"])
        );
    }

    #[test]
    fn fix_levels_parse_and_reject_risky() {
        assert_eq!(
            parse_fix_levels("safe,dbindex").unwrap(),
            vec![Safety::Safe, Safety::DbIndex]
        );
        assert_eq!(parse_fix_levels("unsafe").unwrap(), vec![Safety::Unsafe]);
        assert!(matches!(parse_fix_levels("risky"), Err(DbError::Config(_))));
        assert!(matches!(
            parse_fix_levels("safe,bogus"),
            Err(DbError::Config(_))
        ));
        assert!(matches!(parse_fix_levels(""), Err(DbError::Config(_))));
    }

    #[test]
    fn report_groups_lines_under_table_headers() {
        let errors = vec![
            SchemaError::new(
                "users",
                ErrorKind::MissingTables,
                Status::Error,
                Safety::Safe,
                "Table 'users' is missing",
            ),
            SchemaError::new(
                "notes",
                ErrorKind::ExtraColumns,
                Status::Info,
                Safety::Unsafe,
                "Unexpected column 'stale'",
            ),
        ];
        let mut out = Vec::new();
        print_report(&mut out, &errors).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("users\n * fix=safe   Table 'users' is missing\n"));
        assert!(text.contains("notes\n * fix=unsafe   Unexpected column 'stale'\n"));
        assert!(text.contains(&"-".repeat(60)));
    }
}
