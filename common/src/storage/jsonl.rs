use std::{
    collections::HashSet,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    error::AppError,
    storage::types::{gold_record::GoldRecord, passage::Passage},
};

/// Reads a line-delimited JSON file. Blank lines are skipped; any malformed
/// line aborts the load and names its 1-based line number.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, AppError> {
    let file = File::open(path).map_err(|err| {
        AppError::NotFound(format!("opening {}: {err}", path.display()))
    })?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx.saturating_add(1);
        let raw = line.map_err(|err| {
            AppError::data_format(path.display().to_string(), line_no, err.to_string())
        })?;
        if raw.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&raw).map_err(|err| {
            AppError::data_format(path.display().to_string(), line_no, err.to_string())
        })?;
        rows.push(row);
    }

    Ok(rows)
}

/// Loads the gold set, rejecting duplicate ids, empty claims and records that
/// carry a label without an evidence passage.
pub fn load_gold_set(path: &Path) -> Result<Vec<GoldRecord>, AppError> {
    let mut records: Vec<GoldRecord> = read_jsonl(path)?;
    for (position, record) in records.iter_mut().enumerate() {
        record.line = line_of(path, position)?;
    }

    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        let line = record.line;
        if !seen.insert(record.id.as_str()) {
            return Err(AppError::data_format(
                path.display().to_string(),
                line,
                format!("duplicate gold record id '{}'", record.id),
            ));
        }
        if record.claim.trim().is_empty() {
            return Err(AppError::data_format(
                path.display().to_string(),
                line,
                format!("gold record '{}' has an empty claim", record.id),
            ));
        }
        if record.evidence.is_none() && record.entailment.is_some() {
            return Err(AppError::data_format(
                path.display().to_string(),
                line,
                format!(
                    "gold record '{}' has an entailment label but no evidence passage",
                    record.id
                ),
            ));
        }
    }

    info!(path = %path.display(), records = records.len(), "Loaded gold set");
    Ok(records)
}

/// Loads the passages collection, rejecting duplicate ids and empty embeddings.
pub fn load_passages(path: &Path) -> Result<Vec<Passage>, AppError> {
    let passages: Vec<Passage> = read_jsonl(path)?;
    let mut seen = HashSet::with_capacity(passages.len());

    for (position, passage) in passages.iter().enumerate() {
        if !seen.insert(passage.id.as_str()) {
            return Err(AppError::data_format(
                path.display().to_string(),
                line_of(path, position)?,
                format!("duplicate passage id '{}'", passage.id),
            ));
        }
        if passage.embedding.as_ref().is_some_and(Vec::is_empty) {
            return Err(AppError::data_format(
                path.display().to_string(),
                line_of(path, position)?,
                format!("passage '{}' has an empty embedding", passage.id),
            ));
        }
    }

    info!(path = %path.display(), passages = passages.len(), "Loaded passages");
    Ok(passages)
}

/// SHA-256 hex digest of a file, used to fingerprint the gold set in reports.
pub fn file_checksum(path: &Path) -> Result<String, AppError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(buffer.get(..read).unwrap_or_default());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// Maps the position of a parsed record back to its physical line, accounting
// for skipped blank lines.
fn line_of(path: &Path, position: usize) -> Result<usize, AppError> {
    let file = File::open(path)?;
    let mut seen = 0usize;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        if line?.trim().is_empty() {
            continue;
        }
        if seen == position {
            return Ok(idx.saturating_add(1));
        }
        seen = seen.saturating_add(1);
    }
    Ok(position.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn malformed_line_is_reported_with_line_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("passages.jsonl");
        fs::write(
            &path,
            "{\"id\":\"s1\",\"text\":\"ok\"}\n\n{\"id\":\"s2\",\"text\":\n",
        )
        .unwrap();

        let err = load_passages(&path).unwrap_err();
        match err {
            AppError::DataFormat { line, .. } => assert_eq!(line, 3),
            other => panic!("expected data format error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_gold_ids_point_at_second_occurrence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gold.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"id\":\"g1\",\"claim\":\"a\",\"evidence\":\"s1\",\"entailment\":\"ENTAILMENT\"}\n",
                "\n",
                "{\"id\":\"g1\",\"claim\":\"b\",\"evidence\":\"s2\",\"entailment\":\"NEUTRAL\"}\n",
            ),
        )
        .unwrap();

        let err = load_gold_set(&path).unwrap_err();
        match err {
            AppError::DataFormat { line, message, .. } => {
                assert_eq!(line, 3);
                assert!(message.contains("duplicate"));
            }
            other => panic!("expected data format error, got {other:?}"),
        }
    }

    #[test]
    fn gold_records_remember_their_source_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gold.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"id\":\"g1\",\"claim\":\"a\",\"evidence\":\"s1\",\"entailment\":\"NEUTRAL\"}\n",
                "\n",
                "{\"id\":\"g2\",\"claim\":\"b\",\"evidence\":null,\"entailment\":null}\n",
            ),
        )
        .unwrap();

        let records = load_gold_set(&path).unwrap();
        assert_eq!(records[0].line, 1);
        assert_eq!(records[1].line, 3);
    }

    #[test]
    fn label_without_evidence_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gold.jsonl");
        fs::write(
            &path,
            "{\"id\":\"g1\",\"claim\":\"a\",\"evidence\":null,\"entailment\":\"NEUTRAL\"}\n",
        )
        .unwrap();
        assert!(matches!(
            load_gold_set(&path),
            Err(AppError::DataFormat { line: 1, .. })
        ));
    }

    #[test]
    fn unknown_label_fails_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gold.jsonl");
        fs::write(
            &path,
            "{\"id\":\"g1\",\"claim\":\"a\",\"evidence\":\"s1\",\"entailment\":\"PARTIAL\"}\n",
        )
        .unwrap();
        assert!(matches!(
            load_gold_set(&path),
            Err(AppError::DataFormat { line: 1, .. })
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_passages(&dir.path().join("absent.jsonl")),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn checksum_changes_with_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gold.jsonl");
        fs::write(&path, "a").unwrap();
        let first = file_checksum(&path).unwrap();
        fs::write(&path, "b").unwrap();
        assert_ne!(first, file_checksum(&path).unwrap());
        assert_eq!(first.len(), 64);
    }
}
