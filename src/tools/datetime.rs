use async_trait::async_trait;
use chrono::{ DateTime, FixedOffset, Utc };
use serde_json::{ json, Value };

use super::{ Tool, ToolSchema };
use crate::error::ToolError;

pub const DATETIME_TOOL: &str = "current_datetime";

pub struct CurrentDateTimeTool {
    schema: ToolSchema,
}

impl Default for CurrentDateTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentDateTimeTool {
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new(
                DATETIME_TOOL,
                "Returns the current date and time, optionally shifted to a UTC offset in hours.",
                json!({
                    "type": "object",
                    "properties": {
                        "utc_offset_hours": {"type": "integer", "description": "Offset from UTC, -12 to 14"}
                    },
                    "additionalProperties": false
                })
            ),
        }
    }
}

fn render(now: DateTime<Utc>, offset_hours: i64) -> Result<String, ToolError> {
    if !(-12..=14).contains(&offset_hours) {
        return Err(
            ToolError::invalid_arguments(DATETIME_TOOL, format!("utc_offset_hours {} is out of range", offset_hours))
        );
    }
    let offset = FixedOffset::east_opt((offset_hours * 3600) as i32).ok_or_else(||
        ToolError::execution_failed(DATETIME_TOOL, "could not build offset")
    )?;
    let local = now.with_timezone(&offset);
    Ok(
        json!({
            "datetime": local.to_rfc3339(),
            "date": local.format("%Y-%m-%d").to_string(),
            "weekday": local.format("%A").to_string(),
        }).to_string()
    )
}

#[async_trait]
impl Tool for CurrentDateTimeTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        let offset = arguments.get("utc_offset_hours").and_then(Value::as_i64).unwrap_or(0);
        render(Utc::now(), offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_shifted_time() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        let out: Value = serde_json::from_str(&render(now, 7).unwrap()).unwrap();
        assert_eq!(out["date"], "2024-03-02");
        assert_eq!(out["weekday"], "Saturday");
        assert_eq!(out["datetime"], "2024-03-02T06:30:00+07:00");
    }

    #[tokio::test]
    async fn rejects_out_of_range_offset() {
        let tool = CurrentDateTimeTool::new();
        assert!(tool.invoke(json!({"utc_offset_hours": 40})).await.is_err());
        assert!(tool.invoke(json!({})).await.is_ok());
    }
}
