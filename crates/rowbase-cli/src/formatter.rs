//! Output formatters for rows, pages and schema listings.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use rowbase_core::query::RowPage;
use rowbase_core::{EntityDef, Row};
use serde_json::{json, Value};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON keyed by property name
    Json,
    /// ASCII table format
    Table,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a single row.
    fn format_row(&self, entity: &EntityDef, row: &Row) -> String;

    /// Format one page of query results.
    fn format_page(&self, entity: &EntityDef, page: &RowPage) -> String;

    /// Format an entity listing.
    fn format_entities(&self, entities: &[&EntityDef]) -> String;

    /// Format a full entity definition.
    fn format_entity(&self, entity: &EntityDef) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Table => Box::new(TableFormatter),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_row(&self, entity: &EntityDef, row: &Row) -> String {
        pretty(&row.to_json(entity))
    }

    fn format_page(&self, entity: &EntityDef, page: &RowPage) -> String {
        pretty(&page.to_json(entity))
    }

    fn format_entities(&self, entities: &[&EntityDef]) -> String {
        let listing: Vec<Value> = entities
            .iter()
            .map(|e| {
                json!({
                    "id": e.id,
                    "name": e.name,
                    "slug": e.slug,
                    "title": e.title,
                    "isSystem": e.is_system,
                    "properties": e.properties.len(),
                })
            })
            .collect();
        pretty(&Value::Array(listing))
    }

    fn format_entity(&self, entity: &EntityDef) -> String {
        serde_json::to_value(entity)
            .map(|v| pretty(&v))
            .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string())
    }

    fn format_message(&self, message: &str) -> String {
        json!({ "message": message }).to_string()
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_row(&self, entity: &EntityDef, row: &Row) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Property", "Value"]);
        let values = row.to_json(entity);
        for property in entity.ordered_properties() {
            if property.hidden {
                continue;
            }
            table.add_row(vec![
                Cell::new(&property.title),
                Cell::new(format_cell(&values[property.name.as_str()])),
            ]);
        }
        table.to_string()
    }

    fn format_page(&self, entity: &EntityDef, page: &RowPage) -> String {
        if page.items.is_empty() {
            return "No results".to_string();
        }
        let columns: Vec<_> = entity.ordered_properties().into_iter().filter(|p| !p.hidden).collect();
        let mut table = Table::new();
        table.set_header(columns.iter().map(|p| Cell::new(&p.title)).collect::<Vec<_>>());
        for row in &page.items {
            let values = row.to_json(entity);
            table.add_row(
                columns
                    .iter()
                    .map(|p| Cell::new(format_cell(&values[p.name.as_str()])))
                    .collect::<Vec<_>>(),
            );
        }
        format!(
            "{}\nPage {} of {} ({} rows)",
            table,
            page.page,
            page.total_pages,
            page.total_items
        )
    }

    fn format_entities(&self, entities: &[&EntityDef]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Name", "Slug", "Properties", "Scope"]);
        for entity in entities {
            let scope = if entity.tenant_id.is_some() { "tenant" } else { "system" };
            table.add_row(vec![
                Cell::new(&entity.name),
                Cell::new(&entity.slug),
                Cell::new(entity.properties.len()),
                Cell::new(scope),
            ]);
        }
        table.to_string()
    }

    fn format_entity(&self, entity: &EntityDef) -> String {
        let mut table = Table::new();
        table.set_header(vec!["#", "Property", "Type", "Flags"]);
        for property in entity.ordered_properties() {
            let mut flags = Vec::new();
            for (set, flag) in [
                (property.required, "required"),
                (property.unique, "unique"),
                (property.hidden, "hidden"),
                (property.read_only, "read-only"),
                (property.is_default, "built-in"),
            ] {
                if set {
                    flags.push(flag);
                }
            }
            table.add_row(vec![
                Cell::new(property.order),
                Cell::new(&property.name),
                Cell::new(property.kind.property_type()),
                Cell::new(flags.join(", ")),
            ]);
        }
        format!("{} ({})\n{}", entity.name, entity.slug, table)
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// Render one JSON value in a table cell.
fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(format_cell).collect::<Vec<_>>().join(", "),
        Value::Object(map) if map.contains_key("min") || map.contains_key("max") => {
            let bound = |key: &str| map.get(key).map(format_cell).unwrap_or_default();
            format!("{} .. {}", bound("min"), bound("max"))
        }
        Value::Object(map) => map
            .get("name")
            .map(format_cell)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cell() {
        assert_eq!(format_cell(&Value::Null), "");
        assert_eq!(format_cell(&json!("draft")), "draft");
        assert_eq!(format_cell(&json!(["a", "b"])), "a, b");
        assert_eq!(format_cell(&json!({"min": 1, "max": null})), "1 .. ");
        assert_eq!(format_cell(&json!([{"name": "cv.pdf", "file": "f/1"}])), "cv.pdf");
        assert_eq!(format_cell(&json!(true)), "true");
    }

    #[test]
    fn test_entity_listing() {
        let entity = EntityDef::new("Invoice");
        let output = JsonFormatter.format_entities(&[&entity]);
        let parsed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["slug"], "invoice");
        assert_eq!(parsed[0]["properties"], 4);

        let table = TableFormatter.format_entities(&[&entity]);
        assert!(table.contains("invoice"));
        assert!(table.contains("system"));
    }
}
