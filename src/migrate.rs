// 该文件是 Huakuang （画框） 项目的一部分。
// src/migrate.rs - 旧版 JSON 结果迁移
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  detection::AnnotationSource,
  normalize::{PredictionsField, RawInferenceResult, extract_detections, normalize},
  record::{AnalysisRecord, ResultRepository, Status, StoredPrediction},
};

const TIMESTAMP_FORMATS: [&str; 3] = [
  "%Y%m%d_%H%M%S",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
];

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum MigrateError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("不是推理结果: {0}")]
  NotAResult(String),
  #[error("写入存储失败: {0}")]
  StoreError(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
  pub total_files: usize,
  pub migrated: usize,
  pub failed: usize,
  pub total_predictions: usize,
}

/// 按时间格式依次尝试，带时区的 RFC 3339 优先；无时区的时间视为 UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
  let text = text.trim();
  if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
    return Some(parsed.with_timezone(&Utc));
  }
  TIMESTAMP_FORMATS
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    .map(|naive| naive.and_utc())
}

/// 从 `name_YYYYMMDD_HHMMSS.json` 这样的文件名中取时间
pub fn timestamp_from_filename(name: &str) -> Option<DateTime<Utc>> {
  let stem = name.strip_suffix(".json").unwrap_or(name);
  let parts: Vec<&str> = stem.split('_').collect();
  parts.windows(2).find_map(|pair| {
    let (date, time) = (pair[0], pair[1]);
    let is_digits = |s: &str, n: usize| s.len() == n && s.bytes().all(|b| b.is_ascii_digit());
    if is_digits(date, 8) && is_digits(time, 6) {
      parse_timestamp(&format!("{date}_{time}"))
    } else {
      None
    }
  })
}

fn timestamp_from_payload(payload: &Map<String, Value>) -> Option<DateTime<Utc>> {
  match payload.get("timestamp")? {
    Value::Number(number) => {
      let millis = number.as_f64()? * 1000.0;
      if !millis.is_finite() {
        return None;
      }
      DateTime::from_timestamp_millis(millis.round() as i64)
    }
    Value::String(text) => {
      let parsed = parse_timestamp(text);
      if parsed.is_none() {
        warn!("无法解析时间戳 '{}'", text);
      }
      parsed
    }
    _ => None,
  }
}

fn file_mtime(path: &Path) -> Result<DateTime<Utc>, std::io::Error> {
  Ok(DateTime::<Utc>::from(std::fs::metadata(path)?.modified()?))
}

/// `<dir>/../annotated_images/<stem>.{jpg,jpeg,png}`
fn sibling_image(path: &Path, stem: &str) -> Option<PathBuf> {
  let images = path.parent()?.parent()?.join("annotated_images");
  IMAGE_EXTENSIONS
    .iter()
    .map(|ext| images.join(format!("{stem}.{ext}")))
    .find(|candidate| candidate.is_file())
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
  payload.get(key).and_then(Value::as_str).map(str::to_string)
}

fn build_record(
  path: &Path,
  raw: &RawInferenceResult,
) -> Result<(AnalysisRecord, Option<Vec<u8>>), MigrateError> {
  let display = path.display().to_string();
  let payload = raw
    .payload()
    .ok_or_else(|| MigrateError::NotAResult(display.clone()))?;
  let stem = path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .ok_or_else(|| MigrateError::NotAResult(display.clone()))?;
  let name = path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();

  let created_at = match timestamp_from_payload(payload).or_else(|| timestamp_from_filename(&name)) {
    Some(created_at) => created_at,
    None => file_mtime(path)?,
  };

  let (detections, dropped) = extract_detections(PredictionsField::of(payload).records());
  let predictions: Vec<_> = detections
    .iter()
    .enumerate()
    .map(|(index, detection)| StoredPrediction::from_detection(index, detection))
    .collect();

  let image = match sibling_image(path, &stem) {
    Some(image_path) => {
      debug!("找到标注图像: {}", image_path.display());
      Some(std::fs::read(image_path)?)
    }
    None => normalize(raw).annotated.map(|image| image.bytes().to_vec()),
  };

  let metadata = payload
    .get("metadata")
    .filter(|value| value.as_object().is_some_and(|map| !map.is_empty()))
    .cloned();

  let record = AnalysisRecord {
    result_id: AnalysisRecord::new_id(),
    filename: format!("{stem}.jpg"),
    created_at,
    user_id: string_field(payload, "user_id"),
    metadata,
    prediction_count: predictions.len(),
    predictions,
    dropped_count: dropped,
    model_version: string_field(payload, "model_version"),
    processing_time_ms: payload.get("processing_time_ms").and_then(Value::as_u64),
    source_url: string_field(payload, "source_url"),
    annotation: image.as_ref().map(|_| AnnotationSource::Api),
    status: Status::Completed,
    raw_result: Some(raw.to_value()),
  };

  Ok((record, image))
}

/// 迁移单个文件，返回写入存储的记录
pub fn migrate_file<R>(path: &Path, repository: &R) -> Result<AnalysisRecord, MigrateError>
where
  R: ResultRepository,
  R::Error: std::fmt::Display,
{
  let value: Value = serde_json::from_slice(&std::fs::read(path)?)?;

  // 已经是分析记录的文件原样导入
  let (record, image) = match serde_json::from_value::<AnalysisRecord>(value.clone()) {
    Ok(record) => {
      let image = sibling_image(path, &record.result_id)
        .map(std::fs::read)
        .transpose()?;
      (record, image)
    }
    Err(_) => build_record(path, &RawInferenceResult::from(value))?,
  };

  repository
    .save(&record, image.as_deref())
    .map_err(|e| MigrateError::StoreError(e.to_string()))?;
  Ok(record)
}

/// 目录下所有 `.json` 文件，按文件名排序
pub fn json_files(dir: &Path) -> Result<Vec<PathBuf>, MigrateError> {
  let mut files: Vec<_> = std::fs::read_dir(dir)?
    .filter_map(|entry| entry.ok().map(|entry| entry.path()))
    .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
    .collect();
  files.sort();
  Ok(files)
}

/// 单个文件失败只计数，不中断迁移
pub fn migrate_dir<R>(dir: &Path, repository: &R) -> Result<MigrationSummary, MigrateError>
where
  R: ResultRepository,
  R::Error: std::fmt::Display,
{
  let files = json_files(dir)?;
  let mut summary = MigrationSummary {
    total_files: files.len(),
    ..Default::default()
  };
  info!("在 {} 中找到 {} 个 JSON 文件", dir.display(), files.len());

  for (index, path) in files.iter().enumerate() {
    match migrate_file(path, repository) {
      Ok(record) => {
        summary.migrated += 1;
        summary.total_predictions += record.prediction_count;
        info!(
          "[{}/{}] {} -> {} ({} 个目标)",
          index + 1,
          files.len(),
          path.display(),
          record.result_id,
          record.prediction_count
        );
      }
      Err(e) => {
        summary.failed += 1;
        error!("[{}/{}] 迁移 {} 失败: {}", index + 1, files.len(), path.display(), e);
      }
    }
  }

  info!(
    "迁移完成: 成功 {}，失败 {}，共 {} 个目标",
    summary.migrated, summary.failed, summary.total_predictions
  );
  Ok(summary)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::{ListQuery, MemoryRecords};
  use chrono::TimeZone;
  use serde_json::json;

  fn legacy_dir() -> (tempfile::TempDir, PathBuf) {
    let root = tempfile::tempdir().unwrap();
    let json_dir = root.path().join("output_json");
    std::fs::create_dir_all(&json_dir).unwrap();
    std::fs::create_dir_all(root.path().join("annotated_images")).unwrap();
    (root, json_dir)
  }

  #[test]
  fn timestamps_in_several_formats() {
    let expected = Utc.with_ymd_and_hms(2025, 9, 29, 12, 31, 30).unwrap();
    assert_eq!(parse_timestamp("20250929_123130"), Some(expected));
    assert_eq!(parse_timestamp("2025-09-29T12:31:30"), Some(expected));
    assert_eq!(
      parse_timestamp("2025-09-29T12:31:30.250"),
      Some(expected + chrono::Duration::milliseconds(250))
    );
    assert_eq!(parse_timestamp("2025-09-29T14:31:30+02:00"), Some(expected));
    assert_eq!(parse_timestamp("yesterday"), None);
  }

  #[test]
  fn fractional_epoch_timestamps_keep_their_sign() {
    let payload = |seconds: f64| {
      json!({ "timestamp": seconds })
        .as_object()
        .cloned()
        .unwrap()
    };
    assert_eq!(
      timestamp_from_payload(&payload(-1.5)),
      DateTime::from_timestamp_millis(-1500)
    );
    assert_eq!(
      timestamp_from_payload(&payload(1759149090.25)),
      DateTime::from_timestamp_millis(1_759_149_090_250)
    );
  }

  #[test]
  fn timestamp_from_file_name() {
    let expected = Utc.with_ymd_and_hms(2025, 9, 29, 12, 31, 30).unwrap();
    assert_eq!(timestamp_from_filename("image_20250929_123130.json"), Some(expected));
    assert_eq!(timestamp_from_filename("street_cam_20250929_123130_x.json"), Some(expected));
    assert_eq!(timestamp_from_filename("image_2025_123130.json"), None);
    assert_eq!(timestamp_from_filename("notes.json"), None);
  }

  #[test]
  fn migrates_legacy_payloads() {
    let (root, json_dir) = legacy_dir();
    std::fs::write(
      json_dir.join("dog_20250929_123130.json"),
      r#"[{
        "predictions": {"predictions": [
          {"class": "dog", "confidence": 0.9, "x": 10, "y": 10, "width": 4, "height": 4},
          {"class_name": "cat", "confidence": 0.8, "x": 20, "y": 20, "width": 4, "height": 4}
        ]},
        "user_id": "alice",
        "metadata": {"camera": "north"}
      }]"#,
    )
    .unwrap();
    std::fs::write(root.path().join("annotated_images/dog_20250929_123130.jpg"), b"jpeg").unwrap();
    std::fs::write(
      json_dir.join("bare.json"),
      r#"{"predictions": [], "timestamp": 1759149090}"#,
    )
    .unwrap();

    let store = MemoryRecords::new();
    let summary = migrate_dir(&json_dir, &store).unwrap();
    assert_eq!(
      summary,
      MigrationSummary {
        total_files: 2,
        migrated: 2,
        failed: 0,
        total_predictions: 2
      }
    );

    let page = store.list(&ListQuery::default()).unwrap();
    let dog = page
      .results
      .iter()
      .find(|s| s.filename == "dog_20250929_123130.jpg")
      .unwrap();
    assert_eq!(
      dog.created_at,
      Utc.with_ymd_and_hms(2025, 9, 29, 12, 31, 30).unwrap()
    );
    assert_eq!(dog.user_id.as_deref(), Some("alice"));

    let record = store.get(&dog.result_id).unwrap().unwrap();
    assert_eq!(record.predictions[1].class_name, "cat");
    assert_eq!(record.annotation, Some(AnnotationSource::Api));
    assert_eq!(store.image(&dog.result_id).unwrap(), Some(b"jpeg".to_vec()));

    let bare = page.results.iter().find(|s| s.filename == "bare.jpg").unwrap();
    assert_eq!(bare.created_at, DateTime::from_timestamp(1759149090, 0).unwrap());
    assert_eq!(bare.prediction_count, 0);
  }

  #[test]
  fn broken_files_are_counted_not_fatal() {
    let (_root, json_dir) = legacy_dir();
    std::fs::write(json_dir.join("a.json"), "{ nope").unwrap();
    std::fs::write(json_dir.join("b.json"), "42").unwrap();
    std::fs::write(json_dir.join("c.json"), r#"{"predictions": []}"#).unwrap();
    std::fs::write(json_dir.join("readme.txt"), "skip").unwrap();

    let store = MemoryRecords::new();
    let summary = migrate_dir(&json_dir, &store).unwrap();
    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.migrated, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn existing_records_are_imported_as_is() {
    let (_root, json_dir) = legacy_dir();
    let record = crate::record::tests::record("kept-id", Some("bob"), 7, Status::Failed);
    std::fs::write(
      json_dir.join("kept-id.json"),
      serde_json::to_vec(&record).unwrap(),
    )
    .unwrap();

    let store = MemoryRecords::new();
    let migrated = migrate_file(&json_dir.join("kept-id.json"), &store).unwrap();
    assert_eq!(migrated, record);
    assert_eq!(store.get("kept-id").unwrap(), Some(record));
  }

  #[test]
  fn missing_directory_is_an_error() {
    let store = MemoryRecords::new();
    assert!(migrate_dir(Path::new("/nonexistent/huakuang"), &store).is_err());
  }
}
