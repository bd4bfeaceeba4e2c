use serde_json::Value;
use tracing::debug;

use crate::db::DatabaseAdapter;
use crate::errors::DbError;
use crate::models::report::{DataFix, ErrorKind, Issue, SchemaError, Safety};
use crate::models::schema::{ColumnInfo, Field, FieldType};

/// All changed-column records for one live column, collapsed.
#[derive(Debug)]
pub(crate) struct ColumnGroup {
    pub table: String,
    pub column: String,
    /// Positions of the member records in the original error list.
    pub indices: Vec<usize>,
    pub issues: Vec<Issue>,
    pub safety: Safety,
}

/// Groups changed-column records by (table, column). The group's safety is
/// the worst safety among its members.
pub(crate) fn group_changed_columns(errors: &[SchemaError]) -> Vec<ColumnGroup> {
    let mut groups: Vec<ColumnGroup> = Vec::new();
    for (position, error) in errors.iter().enumerate() {
        if error.kind != ErrorKind::ChangedColumns {
            continue;
        }
        let Some(column) = error.column_name() else {
            continue;
        };
        match groups
            .iter_mut()
            .find(|g| g.table == error.table && g.column == column)
        {
            Some(group) => {
                group.indices.push(position);
                if let Some(issue) = error.issue {
                    if !group.issues.contains(&issue) {
                        group.issues.push(issue);
                    }
                }
                group.safety = group.safety.max(error.safety);
            }
            None => groups.push(ColumnGroup {
                table: error.table.clone(),
                column: column.to_string(),
                indices: vec![position],
                issues: error.issue.into_iter().collect(),
                safety: error.safety,
            }),
        }
    }
    groups
}

/// Resolves every `risky` column group into `safe`, `unsafe` or
/// `unfixable` by probing the actual data, and records the data fixes a
/// repair will need. Mutates the records in place; after this call no
/// changed-column record is left `risky`.
pub async fn evaluate_risky(
    adapter: &dyn DatabaseAdapter,
    errors: &mut [SchemaError],
) -> Result<(), DbError> {
    let groups = group_changed_columns(errors);
    for group in groups.iter().filter(|g| g.safety == Safety::Risky) {
        let first = &errors[group.indices[0]];
        let (Some(field), Some(db_column)) = (first.field.clone(), first.db_column.clone()) else {
            continue;
        };

        let (safety, fixes) = probe_column(adapter, group, &field, &db_column).await?;
        debug!(
            table = %group.table,
            column = %group.column,
            safety = %safety,
            "risk evaluated"
        );

        for &position in &group.indices {
            errors[position].safety = safety;
            errors[position].fixes = fixes.clone();
        }
    }
    Ok(())
}

async fn probe_column(
    adapter: &dyn DatabaseAdapter,
    group: &ColumnGroup,
    field: &Field,
    db_column: &ColumnInfo,
) -> Result<(Safety, Vec<DataFix>), DbError> {
    let mut safety = Safety::Safe;
    let mut fixes = Vec::new();
    let target = field.field_type.comparison_type();

    // Tightening to NOT NULL is only a problem when NULLs are present;
    // those rows get the declared default written first.
    if group.issues.contains(&Issue::Null) && field.not_null && !db_column.not_null {
        let has_nulls = adapter
            .exists_where(&group.table, &format!("{} IS NULL", group.column), &[])
            .await?;
        if has_nulls {
            safety = Safety::Unsafe;
            fixes.push(DataFix::NullDefault);
        }
    }

    // Converting into a non-textual type requires every stored value to
    // survive the cast; one bad value makes the change unfixable.
    if group.issues.contains(&Issue::Type)
        && target != FieldType::Text
        && target != FieldType::Char
    {
        match target {
            FieldType::Integer => {
                for value in column_values(adapter, &group.table, &group.column).await? {
                    if !is_strict_integer(&value) {
                        return Ok((Safety::Unfixable, fixes));
                    }
                }
            }
            FieldType::Number => {
                for value in column_values(adapter, &group.table, &group.column).await? {
                    if value.parse::<f64>().is_err() {
                        return Ok((Safety::Unfixable, fixes));
                    }
                }
            }
            _ => return Ok((Safety::Unfixable, fixes)),
        }
    }

    match target {
        FieldType::Text | FieldType::Integer => {}
        FieldType::Char => {
            if let Some(length) = field.length {
                let oversize = adapter
                    .exists_where(
                        &group.table,
                        &format!("LENGTH({}) > ?", group.column),
                        &[Value::from(length)],
                    )
                    .await?;
                if oversize {
                    safety = Safety::Unsafe;
                    fixes.push(DataFix::Truncate);
                }
            }
        }
        FieldType::Number => {
            let length = field.length.unwrap_or(0);
            let decimals = field.decimals.unwrap_or(0);
            if decimals < db_column.scale.unwrap_or(0) {
                safety = Safety::Unsafe;
            }
            for value in column_values(adapter, &group.table, &group.column).await? {
                let (intdigits, decdigits) = digit_counts(&value);
                if intdigits > length.saturating_sub(decimals) {
                    return Ok((Safety::Unfixable, fixes));
                }
                if decdigits > decimals && safety == Safety::Safe {
                    safety = Safety::Unsafe;
                }
            }
        }
        _ => return Ok((Safety::Unfixable, fixes)),
    }

    Ok((safety, fixes))
}

/// Every non-NULL value of the column, rendered as text.
async fn column_values(
    adapter: &dyn DatabaseAdapter,
    table: &str,
    column: &str,
) -> Result<Vec<String>, DbError> {
    let rows = adapter.select_rows(table, &[column]).await?;
    let mut values = Vec::new();
    for row in rows {
        match row.get(column) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => values.push(s.clone()),
            Some(other) => values.push(other.to_string()),
        }
    }
    Ok(values)
}

/// Optional leading minus followed by digits only; no whitespace, no
/// decimal point, no exponent.
fn is_strict_integer(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Digit counts of the integer and fractional parts of a rendered number.
fn digit_counts(value: &str) -> (u32, u32) {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part.len() as u32, frac_part.len() as u32),
        None => (unsigned.len() as u32, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::Status;

    fn changed(table: &str, column: &str, issue: Issue, safety: Safety) -> SchemaError {
        SchemaError::new(table, ErrorKind::ChangedColumns, Status::Error, safety, "d").with_field(
            Field {
                name: column.to_string(),
                field_type: FieldType::Char,
                length: Some(10),
                decimals: None,
                not_null: false,
                default: None,
                sequence: false,
            },
        )
        .with_issue(issue)
    }

    #[test]
    fn strict_integers() {
        assert!(is_strict_integer("0"));
        assert!(is_strict_integer("-42"));
        assert!(!is_strict_integer(""));
        assert!(!is_strict_integer("-"));
        assert!(!is_strict_integer("1.5"));
        assert!(!is_strict_integer(" 7"));
        assert!(!is_strict_integer("1e3"));
    }

    #[test]
    fn digit_counting_splits_on_the_point() {
        assert_eq!(digit_counts("1234.56"), (4, 2));
        assert_eq!(digit_counts("-1234.5"), (4, 1));
        assert_eq!(digit_counts("7"), (1, 0));
        assert_eq!(digit_counts("-0.125"), (1, 3));
    }

    #[test]
    fn groups_collapse_per_column_with_worst_safety() {
        let errors = vec![
            changed("notes", "body", Issue::Length, Safety::Risky),
            changed("notes", "body", Issue::Default, Safety::Safe),
            changed("notes", "title", Issue::Null, Safety::Safe),
            changed("users", "body", Issue::Type, Safety::Unsafe),
        ];
        let groups = group_changed_columns(&errors);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].table, "notes");
        assert_eq!(groups[0].column, "body");
        assert_eq!(groups[0].indices, vec![0, 1]);
        assert_eq!(groups[0].issues, vec![Issue::Length, Issue::Default]);
        assert_eq!(groups[0].safety, Safety::Risky);
        assert_eq!(groups[2].table, "users");
        assert_eq!(groups[2].safety, Safety::Unsafe);
    }
}
