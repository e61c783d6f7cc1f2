//! Download list parsing.
//!
//! One transfer per line, tab separated: `url`, `local path`, `size`, then
//! optional columns of which the sixth holds the control flag (`0` or `-1`).

use std::io::BufRead;

use replica_engine::{ControlFlag, Task};

use crate::error::{AppError, Result};

const FLAG_COLUMN: usize = 5;

/// Parse one line. Lines with fewer than three columns yield `None`.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Task>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 3 {
        return Ok(None);
    }

    let invalid = |message: String| AppError::InvalidInput {
        line: line_no,
        message,
    };

    let url = fields[0].trim();
    let local = fields[1].trim();
    if url.is_empty() || local.is_empty() {
        return Err(invalid("empty url or local path".to_string()));
    }

    let size = match fields[2].trim() {
        "" => None,
        s => Some(
            s.parse::<u64>()
                .map_err(|_| invalid(format!("invalid size '{s}'")))?,
        ),
    };

    let flag = match fields.get(FLAG_COLUMN) {
        Some(raw) => raw
            .parse::<ControlFlag>()
            .map_err(|e| invalid(e.to_string()))?,
        None => ControlFlag::Normal,
    };

    Ok(Some(Task::new(local, url, size, flag)))
}

/// Parse every line of a download list.
pub fn read_tasks(reader: impl BufRead) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        if let Some(task) = parse_line(&line?, idx + 1)? {
            tasks.push(task);
        }
    }
    Ok(tasks)
}
