//! Cache inspection commands
//!
//! Every command reads the store directly; no stage code is loaded, so the
//! output shows what is on disk rather than what a pipeline would consider
//! fresh.

use crate::cli::Commands;
use crate::errors::CliError;
use chrono::{DateTime, Utc};
use stagecache_cache::{CacheKey, CacheStore};
use std::io::Write;

/// Run one command against `store`, writing its report to `out`.
pub fn run(command: &Commands, store: &CacheStore, out: &mut impl Write) -> Result<(), CliError> {
    tracing::debug!(root = %store.root().display(), ?command, "Running command");
    match command {
        Commands::Stages => stages(store, out),
        Commands::List { stage } => list(store, stage.as_deref(), out),
        Commands::Show { stage, key } => show(store, stage, key, out),
        Commands::Verify { stage } => verify(store, stage.as_deref(), out),
    }
}

fn selected_stages(store: &CacheStore, stage: Option<&str>) -> Result<Vec<String>, CliError> {
    match stage {
        Some(stage) => Ok(vec![stage.to_string()]),
        None => Ok(store.list_stages()?),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_version(version: f64) -> String {
    if version <= 0.0 {
        return "never".to_string();
    }
    DateTime::<Utc>::from_timestamp_micros((version * 1_000_000.0).round() as i64)
        .map_or_else(|| version.to_string(), |at| at.to_rfc3339())
}

fn stages(store: &CacheStore, out: &mut impl Write) -> Result<(), CliError> {
    for stage in store.list_stages()? {
        let entries = store.list_entries(&stage)?.len();
        let version = format_version(store.last_modified(&stage));
        writeln!(out, "{stage}\t{entries} entries\tlast computed {version}")?;
    }
    Ok(())
}

fn list(store: &CacheStore, stage: Option<&str>, out: &mut impl Write) -> Result<(), CliError> {
    for stage in selected_stages(store, stage)? {
        for entry in store.list_entries(&stage)? {
            match &entry.metadata {
                Ok(metadata) => write!(
                    out,
                    "{stage}\t{}\t{}\t{:.3}s",
                    entry.key,
                    metadata.created_at.to_rfc3339(),
                    metadata.time_taken
                )?,
                Err(reason) => write!(out, "{stage}\t{}\tunreadable metadata: {reason}", entry.key)?,
            }
            if !entry.has_result {
                write!(out, "\tmissing result")?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

fn show(store: &CacheStore, stage: &str, key: &str, out: &mut impl Write) -> Result<(), CliError> {
    let key = CacheKey::from_hex(key)?;
    let metadata = store.read_metadata(stage, &key)?;
    let json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| stagecache_cache::Error::serialization(e.to_string()))?;
    writeln!(out, "{json}")?;
    Ok(())
}

fn verify(store: &CacheStore, stage: Option<&str>, out: &mut impl Write) -> Result<(), CliError> {
    let mut total = 0;
    let mut failed = 0;
    for stage in selected_stages(store, stage)? {
        for entry in store.list_entries(&stage)? {
            total += 1;
            let outcome = CacheKey::from_hex(entry.key.as_str())
                .and_then(|key| store.verify_entry(&stage, &key));
            match outcome {
                Ok(()) => writeln!(out, "ok\t{stage}\t{}", entry.key)?,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(stage = %stage, key = %entry.key, "Entry failed verification: {e}");
                    writeln!(out, "FAIL\t{stage}\t{}\t{e}", entry.key)?;
                }
            }
        }
    }
    if failed > 0 {
        return Err(CliError::VerifyFailed { failed, total });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecache_core::{Pipeline, Stage, Value, args};
    use tempfile::TempDir;

    fn populated() -> (TempDir, Pipeline) {
        let tmp = TempDir::new().unwrap();
        let pipeline = Pipeline::builder(tmp.path())
            .stage(
                Stage::new("double", |inv| Ok(Value::Int(inv.i64("x")? * 2))).param("x"),
            )
            .build()
            .unwrap();
        pipeline.get_or_compute("double", args([("x", 1)])).unwrap();
        pipeline.get_or_compute("double", args([("x", 2)])).unwrap();
        (tmp, pipeline)
    }

    fn output(command: &Commands, store: &CacheStore) -> (Result<(), CliError>, String) {
        let mut out = Vec::new();
        let result = run(command, store, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_stages_lists_versions() {
        let (_tmp, pipeline) = populated();
        let (result, text) = output(&Commands::Stages, pipeline.store());
        result.unwrap();
        assert!(text.starts_with("double\t2 entries\tlast computed "));
        assert!(!text.contains("never"));
    }

    #[test]
    fn test_list_and_show() {
        let (_tmp, pipeline) = populated();
        let (result, text) = output(&Commands::List { stage: None }, pipeline.store());
        result.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("double\t")));
        assert!(!text.contains("missing result"));

        let key = lines[0].split('\t').nth(1).unwrap().to_string();
        let (result, text) = output(
            &Commands::Show {
                stage: "double".to_string(),
                key,
            },
            pipeline.store(),
        );
        result.unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["function"], "double");
    }

    #[test]
    fn test_show_rejects_bad_key() {
        let (_tmp, pipeline) = populated();
        let (result, _) = output(
            &Commands::Show {
                stage: "double".to_string(),
                key: "nothex".to_string(),
            },
            pipeline.store(),
        );
        assert!(matches!(result, Err(CliError::Cache(_))));
    }

    #[test]
    fn test_verify_reports_corruption() {
        let (_tmp, pipeline) = populated();
        let store = pipeline.store();
        let (result, text) = output(&Commands::Verify { stage: None }, store);
        result.unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("ok\t")).count(), 2);

        let entry = &store.list_entries("double").unwrap()[0];
        let key = CacheKey::from_hex(entry.key.as_str()).unwrap();
        std::fs::write(store.paths_for("double", &key).unwrap().result, b"junk").unwrap();

        let (result, text) = output(
            &Commands::Verify {
                stage: Some("double".to_string()),
            },
            store,
        );
        assert!(matches!(
            result,
            Err(CliError::VerifyFailed { failed: 1, total: 2 })
        ));
        assert!(text.contains(&format!("FAIL\tdouble\t{}", entry.key)));
    }

    #[test]
    fn test_empty_root() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("absent"));
        let (result, text) = output(&Commands::Stages, &store);
        result.unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(0.0), "never");
        assert_eq!(format_version(1_704_067_200.25), "2024-01-01T00:00:00.250+00:00");
    }
}
