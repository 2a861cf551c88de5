//! Subcommands and their argument parsers.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Subcommand;
use rowbase_core::security::{parse_actions, Action};
use rowbase_core::{FilterOp, RowFilter, RowId, SortDirection, SortSpec};
use serde_json::Value;

/// What to do.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Schema files
    #[command(subcommand)]
    Schema(SchemaCommand),

    /// List the entities visible in the current tenant
    Entities,

    /// Describe one entity
    Describe {
        /// Entity id, name or slug
        entity: String,
    },

    /// Grant a role actions on an entity (e.g. `create,read` or `*`)
    Grant {
        entity: String,
        role: String,
        #[arg(value_parser = parse_action_list)]
        actions: ActionList,
    },

    /// Create a row from a JSON object keyed by property name
    Create {
        entity: String,
        #[arg(value_parser = parse_json_object)]
        values: Value,
        /// Pre-fill from a named template
        #[arg(long)]
        template: Option<String>,
    },

    /// Fetch a row
    Get { row: RowId },

    /// Update the given properties of a row
    Update {
        row: RowId,
        #[arg(value_parser = parse_json_object)]
        values: Value,
    },

    /// Delete a row
    Delete { row: RowId },

    /// Filter, sort and page the rows of an entity
    Query {
        entity: String,
        /// `property:op[:json]`, repeatable
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<RowFilter>,
        /// `property[:asc|desc]`, repeatable
        #[arg(long = "sort", value_parser = parse_sort)]
        sort: Vec<SortSpec>,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        page: i64,
        /// Rows per page; -1 returns every row
        #[arg(long, default_value_t = 25, allow_negative_numbers = true)]
        page_size: i64,
        /// Run a saved view instead of the filter and sort flags
        #[arg(long, conflicts_with_all = ["filters", "sort", "page_size"])]
        view: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SchemaCommand {
    /// Define the entities, relationships and grants of a JSON schema file
    Apply { file: PathBuf },
}

/// Parsed action list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionList(pub Vec<Action>);

fn parse_action_list(raw: &str) -> Result<ActionList, String> {
    parse_actions(raw).map(ActionList)
}

fn parse_json_object(raw: &str) -> Result<Value, String> {
    match serde_json::from_str(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

/// `status:eq:"draft"`, `amount:gt:100`, `notes:isEmpty`.
///
/// An operand that is not valid JSON is taken as a plain string, so
/// `status:eq:draft` works without quoting.
pub fn parse_filter(raw: &str) -> Result<RowFilter, String> {
    let mut parts = raw.splitn(3, ':');
    let property = parts.next().filter(|p| !p.is_empty()).ok_or("missing property")?;
    let op = parts.next().ok_or("missing operator")?;
    let op = FilterOp::from_str(op)?;
    let value = match parts.next() {
        None => Value::Null,
        Some(operand) => serde_json::from_str(operand).unwrap_or_else(|_| Value::String(operand.to_string())),
    };
    if value.is_null() && !op.is_unary() {
        return Err(format!("operator {} needs an operand", op));
    }
    Ok(RowFilter::new(property, op, value))
}

/// `amount`, `amount:desc`.
pub fn parse_sort(raw: &str) -> Result<SortSpec, String> {
    let (property, direction) = match raw.split_once(':') {
        Some((property, direction)) => (property, SortDirection::from_str(direction)?),
        None => (raw, SortDirection::Asc),
    };
    if property.is_empty() {
        return Err("missing property".to_string());
    }
    Ok(SortSpec {
        property: property.to_string(),
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_filter() {
        let filter = parse_filter("amount:gte:100").unwrap();
        assert_eq!(filter, RowFilter::new("amount", FilterOp::Gte, json!(100)));

        let filter = parse_filter("tags:in:[\"a\",\"b\"]").unwrap();
        assert_eq!(filter.value, json!(["a", "b"]));

        let filter = parse_filter("status:eq:draft").unwrap();
        assert_eq!(filter.value, json!("draft"));

        let filter = parse_filter("due:overlaps:{\"min\":\"2024-01-01\"}").unwrap();
        assert_eq!(filter.op, FilterOp::Overlaps);
        assert_eq!(filter.value["min"], "2024-01-01");

        assert_eq!(parse_filter("notes:isEmpty").unwrap().op, FilterOp::IsEmpty);
    }

    #[test]
    fn test_parse_filter_errors() {
        assert!(parse_filter(":eq:1").is_err());
        assert!(parse_filter("amount").is_err());
        assert!(parse_filter("amount:between:1").is_err());
        assert!(parse_filter("amount:gt").is_err());
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(parse_sort("amount").unwrap(), SortSpec::asc("amount"));
        assert_eq!(parse_sort("amount:DESC").unwrap(), SortSpec::desc("amount"));
        assert!(parse_sort("amount:sideways").is_err());
        assert!(parse_sort(":asc").is_err());
    }

    #[test]
    fn test_parse_values() {
        assert!(parse_json_object("{\"amount\": 1}").is_ok());
        assert!(parse_json_object("[1]").is_err());
        assert!(parse_json_object("{").is_err());
        assert_eq!(parse_action_list("create,read").unwrap().0, vec![Action::Create, Action::Read]);
        assert_eq!(parse_action_list("*").unwrap().0.len(), 4);
    }
}
