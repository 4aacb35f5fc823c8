//! Built-in tools available to the CLI agent.

use astrolabe_core::error::ToolError;
use astrolabe_core::tool::{Tool, ToolContext, ToolExecutionResult, ToolRegistry};
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};

/// Create the registry the `chat` command runs with.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CurrentTimeTool));
    registry
}

/// Reports the current date and time, optionally at a UTC offset.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Optionally pass a UTC offset in hours."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "number",
                    "description": "Offset from UTC in hours, e.g. 5.5 for India"
                }
            }
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _context: &ToolContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        let offset_hours = match &arguments["utc_offset_hours"] {
            serde_json::Value::Null => 0.0,
            value => value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| {
                    ToolError::InvalidArguments("utc_offset_hours must be a number".into())
                })?,
        };

        let offset = FixedOffset::east_opt((offset_hours * 3600.0).round() as i32).ok_or_else(
            || ToolError::InvalidArguments(format!("UTC offset out of range: {offset_hours}")),
        )?;
        let now = Utc::now().with_timezone(&offset);

        Ok(ToolExecutionResult::success(
            serde_json::json!({ "datetime": now.to_rfc3339() }),
            format!("Current time is {}", now.format("%Y-%m-%d %H:%M %:z")),
        ))
    }
}
