//! The eleven-tool catalogue and `tools/call` dispatcher.
//!
//! Argument shapes are validated here, at the MCP boundary, before ever
//! reaching [`SecureClient`]; the client's own guard/gate layer is the
//! second, independent line of defence against anything that slips past.

use mysql_mcp_core::{QueryResult, SanitizedError, SecureClient};
use mysql_mcp_core::sanitize::{Category, Severity};
use serde_json::{json, Value};

/// One entry in the `tools/list` response.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// The full, fixed tool catalogue.
#[must_use]
pub fn catalogue() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "query",
            description: "Run a read-only SELECT, WITH, or SHOW statement.",
            input_schema: json!({
                "type": "object",
                "properties": { "sql": { "type": "string" } },
                "required": ["sql"],
            }),
        },
        ToolDef {
            name: "execute",
            description: "Run an INSERT, UPDATE, or DELETE statement. Large writes require confirm_key.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string" },
                    "confirm_key": { "type": "string" },
                },
                "required": ["sql"],
            }),
        },
        ToolDef {
            name: "execute_ddl",
            description: "Run a CREATE, DROP, ALTER, or TRUNCATE statement. Always requires confirm_key.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string" },
                    "confirm_key": { "type": "string" },
                },
                "required": ["sql", "confirm_key"],
            }),
        },
        ToolDef {
            name: "tables",
            description: "List tables in the current database.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDef {
            name: "describe",
            description: "Describe a table's columns.",
            input_schema: json!({
                "type": "object",
                "properties": { "table": { "type": "string" } },
                "required": ["table"],
            }),
        },
        ToolDef {
            name: "views",
            description: "List views in the current database.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDef {
            name: "indexes",
            description: "List indexes on a table.",
            input_schema: json!({
                "type": "object",
                "properties": { "table": { "type": "string" } },
                "required": ["table"],
            }),
        },
        ToolDef {
            name: "explain",
            description: "Show the execution plan for a SELECT statement.",
            input_schema: json!({
                "type": "object",
                "properties": { "sql": { "type": "string" } },
                "required": ["sql"],
            }),
        },
        ToolDef {
            name: "count",
            description: "Count rows in a table, with an optional WHERE fragment.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string" },
                    "where": { "type": "string" },
                },
                "required": ["table"],
            }),
        },
        ToolDef {
            name: "sample",
            description: "Return up to 100 sample rows from a table.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string" },
                    "limit": { "type": "integer" },
                },
                "required": ["table"],
            }),
        },
        ToolDef {
            name: "database_info",
            description: "Report backend version and active database name.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDef {
            name: "show_safety_info",
            description: "Report the active safety policy shape. Never touches the database.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// Render the catalogue as the `tools/list` result payload.
#[must_use]
pub fn list_payload() -> Value {
    let tools: Vec<Value> = catalogue()
        .into_iter()
        .map(|t| json!({ "name": t.name, "description": t.description, "inputSchema": t.input_schema }))
        .collect();
    json!({ "tools": tools })
}

fn query_result_payload(result: QueryResult) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}

fn string_arg(arguments: &Value, key: &str) -> Result<String, SanitizedError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing_arg(key))
}

fn optional_string_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments.get(key).and_then(Value::as_str).map(str::to_string)
}

fn optional_u32_arg(arguments: &Value, key: &str) -> Option<u32> {
    arguments.get(key).and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
}

fn missing_arg(name: &str) -> SanitizedError {
    SanitizedError::fixed(
        Category::User,
        Severity::Warning,
        &format!("missing required argument: {name}"),
        &format!("missing required argument: {name}"),
    )
}

/// Run `name` against `client` with `arguments`, returning the tool result
/// payload or the sanitised error the envelope produced.
pub async fn dispatch(client: &SecureClient, name: &str, arguments: &Value) -> Result<Value, SanitizedError> {
    match name {
        "query" => {
            let sql = string_arg(arguments, "sql")?;
            if !starts_with_read_keyword(&sql) {
                return Err(SanitizedError::fixed(
                    Category::User,
                    Severity::Warning,
                    "query must begin with SELECT, WITH, or SHOW",
                    "query tool invoked with a non-read statement",
                ));
            }
            client.query(&sql).await.map(query_result_payload)
        }
        "execute" => {
            let sql = string_arg(arguments, "sql")?;
            let confirm_key = optional_string_arg(arguments, "confirm_key");
            client.execute(&sql, confirm_key.as_deref()).await.map(query_result_payload)
        }
        "execute_ddl" => {
            let sql = string_arg(arguments, "sql")?;
            let confirm_key = string_arg(arguments, "confirm_key")?;
            client.execute_ddl(&sql, Some(&confirm_key)).await.map(query_result_payload)
        }
        "tables" => client.list_tables().await.map(query_result_payload),
        "describe" => {
            let table = string_arg(arguments, "table")?;
            client.describe_table(&table).await.map(query_result_payload)
        }
        "views" => client.list_views().await.map(query_result_payload),
        "indexes" => {
            let table = string_arg(arguments, "table")?;
            client.list_indexes(&table).await.map(query_result_payload)
        }
        "explain" => {
            let sql = string_arg(arguments, "sql")?;
            client.explain(&sql).await.map(query_result_payload)
        }
        "count" => {
            let table = string_arg(arguments, "table")?;
            let where_clause = optional_string_arg(arguments, "where");
            client.count_rows(&table, where_clause.as_deref()).await.map(query_result_payload)
        }
        "sample" => {
            let table = string_arg(arguments, "table")?;
            let limit = optional_u32_arg(arguments, "limit");
            client.sample_rows(&table, limit).await.map(query_result_payload)
        }
        "database_info" => client.database_info().await.map(query_result_payload),
        "show_safety_info" => Ok(client.show_safety_info()),
        other => Err(SanitizedError::fixed(
            Category::User,
            Severity::Warning,
            "unknown tool",
            &format!("unknown tool: {other}"),
        )),
    }
}

fn starts_with_read_keyword(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH") || upper.starts_with("SHOW")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_twelve_tools() {
        assert_eq!(catalogue().len(), 12);
    }

    #[test]
    fn read_keyword_check_accepts_select_with_show() {
        assert!(starts_with_read_keyword("select 1"));
        assert!(starts_with_read_keyword("  WITH cte AS (SELECT 1) SELECT * FROM cte"));
        assert!(starts_with_read_keyword("SHOW TABLES"));
        assert!(!starts_with_read_keyword("DELETE FROM t"));
    }

    #[test]
    fn missing_required_argument_is_a_user_error() {
        let err = string_arg(&json!({}), "sql").unwrap_err();
        assert_eq!(err.category, Category::User);
    }
}
