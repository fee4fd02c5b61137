//! JSON I/O handling for CLI
//!
//! - Input: a JSON array of records, from a file or stdin
//! - Output: a single JSON object on stdout
//! - UTF-8 only

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use serde_json::Value;

use super::errors::{CliError, CliResult};
use crate::record::{records_from_value, Record};

/// Read a record array from `path`, or from stdin when no path is given
pub fn read_records(path: Option<&Path>) -> CliResult<Vec<Record>> {
    let content = match path {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| CliError::input(format!("Failed to read {}: {}", path.display(), e)))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .lock()
                .read_to_string(&mut buf)
                .map_err(|e| CliError::input(format!("Failed to read stdin: {}", e)))?;
            buf
        }
    };

    if content.trim().is_empty() {
        return Err(CliError::input("Empty input"));
    }

    let value: Value = serde_json::from_str(&content)
        .map_err(|e| CliError::input(format!("Records are not valid JSON: {}", e)))?;
    Ok(records_from_value(value)?)
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });
    write_line(&response)
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });
    write_line(&response)
}

fn write_line(response: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, response).map_err(|e| CliError::Output(e.into()))?;
    writeln!(stdout)
        .and_then(|()| stdout.flush())
        .map_err(CliError::Output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_records_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        fs::write(&path, r#"[{"id": 1}, {"id": 2, "title": "x"}]"#).unwrap();
        let records = read_records(Some(&path)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["title"], "x");
    }

    #[test]
    fn test_non_array_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        fs::write(&path, r#"{"id": 1}"#).unwrap();
        let err = read_records(Some(&path)).unwrap_err();
        assert_eq!(err.code(), "VAULT_VALIDATION");

        fs::write(&path, "   ").unwrap();
        assert_eq!(read_records(Some(&path)).unwrap_err().code(), "VAULT_CLI_INPUT");

        fs::write(&path, "[{\"id\": ").unwrap();
        assert_eq!(read_records(Some(&path)).unwrap_err().code(), "VAULT_CLI_INPUT");
    }
}
