use std::path::Path;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::images::GeneratedImage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub model: String,
    pub concurrency: String,
    pub reference_images: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<GeneratedImage>,
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_summary(path: &Path) -> anyhow::Result<RunSummary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid run summary {}", path.display()))
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{read_summary, write_summary, RunSummary};
    use crate::images::GeneratedImage;

    #[test]
    fn summary_round_trips_with_extra_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");
        let summary = RunSummary {
            run_id: "run-123".to_string(),
            started_at: "2026-12-01T00:00:00+00:00".to_string(),
            finished_at: "2026-12-01T00:01:00+00:00".to_string(),
            model: "dryrun-image-1".to_string(),
            concurrency: "parallel:4".to_string(),
            reference_images: 3,
            succeeded: 0,
            failed: 1,
            results: vec![GeneratedImage::placeholder(0, "https://example.test/p.png")],
        };
        let mut extra = Map::new();
        extra.insert("collage_path".to_string(), json!("collage.png"));
        write_summary(&path, &summary, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["run_id"], json!("run-123"));
        assert_eq!(parsed["results"][0]["succeeded"], json!(false));
        assert_eq!(parsed["collage_path"], json!("collage.png"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());

        assert_eq!(read_summary(&path)?, summary);
        Ok(())
    }
}
