// # JSON feed extraction
//
// The `?format=json` variant of the page groups samples by line:
//
// ```json
// {
//   "生成时间": "...",
//   "完整数据列表": {
//     "电信": [{"优选IP": "104.16.1.1", "丢包": "0.00%", "延迟": 45.2, ...}],
//     "联通": [...]
//   }
// }
// ```
//
// Items that lack a line column inherit the group key. A bare array of row
// objects is accepted too.

use serde_json::Value;

use cfbest_core::measurement::RawRow;
use cfbest_core::{Error, Result};

/// Key holding the per-line sample lists
pub const FULL_LIST_KEY: &str = "完整数据列表";

pub fn parse_json(body: &str) -> Result<Vec<RawRow>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::fetch(format!("feed is not valid JSON: {}", e)))?;

    match &value {
        Value::Array(items) => Ok(rows_from_items(items, None)),
        Value::Object(object) => match object.get(FULL_LIST_KEY) {
            Some(Value::Object(groups)) => Ok(groups
                .iter()
                .flat_map(|(line, items)| match items {
                    Value::Array(items) => rows_from_items(items, Some(line.as_str())),
                    _ => Vec::new(),
                })
                .collect()),
            Some(Value::Array(items)) => Ok(rows_from_items(items, None)),
            _ => Err(Error::fetch(format!("JSON feed has no \"{}\"", FULL_LIST_KEY))),
        },
        _ => Err(Error::fetch("JSON feed is neither an object nor an array")),
    }
}

fn rows_from_items(items: &[Value], line: Option<&str>) -> Vec<RawRow> {
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|object| {
            let row = RawRow::from_json_object(object);
            match line {
                Some(line) => row.with_default_carrier(line),
                None => row,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_feed() {
        let body = r#"{
            "生成时间": "2025-01-09 12:00:00",
            "完整数据列表": {
                "电信": [
                    {"优选IP": "104.16.1.1", "丢包": "0.00%", "延迟": 45.2, "速度": 12.5},
                    {"优选IP": "104.16.1.2", "线路": "联通", "丢包": "0.00%"}
                ],
                "移动": [{"优选IP": "2606:4700::1", "丢包": "0.00%"}, "garbage"]
            }
        }"#;

        let rows = parse_json(body).unwrap();
        assert_eq!(rows.len(), 3);

        let line_of = |ip: &str| {
            rows.iter()
                .find(|r| r.get(&["优选ip"]) == Some(ip))
                .and_then(|r| r.get(&["线路"]))
                .map(str::to_string)
        };
        assert_eq!(line_of("104.16.1.1").as_deref(), Some("电信"));
        assert_eq!(line_of("104.16.1.2").as_deref(), Some("联通"));
        assert_eq!(line_of("2606:4700::1").as_deref(), Some("移动"));

        let first = rows.iter().find(|r| r.get(&["优选ip"]) == Some("104.16.1.1")).unwrap();
        assert_eq!(first.get(&["延迟"]), Some("45.2"));
    }

    #[test]
    fn test_bare_array() {
        let rows = parse_json(r#"[{"ip": "1.1.1.1", "line": "ct", "loss": 0}]"#).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&["loss"]), Some("0"));
    }

    #[test]
    fn test_unrecognized_shape() {
        assert!(matches!(parse_json(r#"{"status": "ok"}"#), Err(Error::Fetch(_))));
        assert!(matches!(parse_json("<html>"), Err(Error::Fetch(_))));
    }
}
