//! Record document wire format: a TOML metadata header between `---`
//! delimiters, followed by the free-form payload text. This layout is the
//! contract detectors and executors read and write.

use std::path::Path;

use crate::error::{Result, TandemError};

use super::TaskRecord;

const DELIMITER: &str = "---";

/// Render a record into its document form.
pub fn render_document(record: &TaskRecord) -> Result<String> {
    let header =
        toml::to_string_pretty(record).map_err(|e| TandemError::Config(e.to_string()))?;
    Ok(format!(
        "{}\n{}{}\n{}",
        DELIMITER, header, DELIMITER, record.payload
    ))
}

/// Parse a document back into a record. `path` is used for error context
/// only.
pub fn parse_document(content: &str, path: &Path) -> Result<TaskRecord> {
    let parse_err = |message: String| TandemError::DocumentParse {
        path: path.to_path_buf(),
        message,
    };

    let rest = content
        .strip_prefix(DELIMITER)
        .ok_or_else(|| parse_err("missing opening header delimiter".to_string()))?
        .trim_start_matches(['\r', '\n']);

    let end = rest
        .find(&format!("\n{}", DELIMITER))
        .ok_or_else(|| parse_err("missing closing header delimiter".to_string()))?;

    let header = &rest[..end];
    let mut record: TaskRecord =
        toml::from_str(header).map_err(|e| parse_err(e.to_string()))?;

    let after = &rest[end + 1 + DELIMITER.len()..];
    record.payload = after.strip_prefix('\n').unwrap_or(after).to_string();
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Domain, TaskKind, TaskRecord};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn sample() -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let mut record = TaskRecord::new(TaskKind::Message, Domain::Business, "client@corp", at)
            .with_payload("Reply to the invoice question.\n\nContext: thread #42.")
            .with_supersedes("message-client-corp-20250531t120000z");
        record.trace("detector:mail", "created", at);
        record
    }

    #[test]
    fn test_document_round_trip() {
        let record = sample();
        let doc = render_document(&record).unwrap();
        let parsed = parse_document(&doc, &PathBuf::from("x.task.md")).unwrap();

        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.kind, record.kind);
        assert_eq!(parsed.domain, record.domain);
        assert_eq!(parsed.payload, record.payload);
        assert_eq!(parsed.decision_trace, record.decision_trace);
        assert_eq!(parsed.supersedes, record.supersedes);
    }

    #[test]
    fn test_document_layout() {
        let doc = render_document(&sample()).unwrap();
        assert!(doc.starts_with("---\n"));
        assert!(doc.contains("\n---\n"));
        assert!(doc.ends_with("thread #42."));
    }

    #[test]
    fn test_parse_rejects_missing_header() {
        let err = parse_document("no header here", &PathBuf::from("bad.task.md"));
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let record = TaskRecord::new(TaskKind::CalendarEvent, Domain::Personal, "cal-7", at);
        let doc = render_document(&record).unwrap();
        let parsed = parse_document(&doc, &PathBuf::from("x.task.md")).unwrap();
        assert_eq!(parsed.payload, "");
    }
}
