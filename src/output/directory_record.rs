// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/directory_record.rs - 基于目录的分析结果存储
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

use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::AnnotationSource,
  normalize::{PredictionsField, RawInferenceResult, extract_detections},
  output::Publish,
  record::{
    AnalysisRecord, AnalysisSummary, ListQuery, Page, ResultRepository, Statistics, Status,
    StoredPrediction,
  },
  task::Analysis,
};

const RESULTS_DIR: &str = "results";
const IMAGES_DIR: &str = "annotated_images";
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum DirectoryRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("非法的结果 ID: {0}")]
  InvalidId(String),
}

/// 目录布局：
/// - `<root>/results/<id>.json`
/// - `<root>/annotated_images/<id>.<ext>`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
  root: PathBuf,
}

impl FromUrlWithScheme for JsonFileStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for JsonFileStore {
  type Error = DirectoryRecordError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordError::SchemeMismatch);
    }
    Self::open(uri.path())
  }
}

fn is_safe_id(result_id: &str) -> bool {
  !result_id.is_empty()
    && !result_id.contains('/')
    && !result_id.contains('\\')
    && !result_id.contains("..")
}

fn mtime_of(path: &Path) -> DateTime<Utc> {
  std::fs::metadata(path)
    .and_then(|meta| meta.modified())
    .map(DateTime::<Utc>::from)
    .unwrap_or_else(|_| Utc::now())
}

impl JsonFileStore {
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, DirectoryRecordError> {
    let root = root.into();
    std::fs::create_dir_all(root.join(RESULTS_DIR))?;
    std::fs::create_dir_all(root.join(IMAGES_DIR))?;
    debug!("打开结果目录: {}", root.display());
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn record_path(&self, result_id: &str) -> PathBuf {
    self.root.join(RESULTS_DIR).join(format!("{result_id}.json"))
  }

  fn image_path(&self, result_id: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
      .iter()
      .map(|ext| self.root.join(IMAGES_DIR).join(format!("{result_id}.{ext}")))
      .find(|path| path.is_file())
  }

  fn read_record(&self, path: &Path) -> Option<AnalysisRecord> {
    let value: Value = match std::fs::read(path)
      .map_err(DirectoryRecordError::from)
      .and_then(|data| serde_json::from_slice(&data).map_err(DirectoryRecordError::from))
    {
      Ok(value) => value,
      Err(e) => {
        warn!("读取 {} 失败: {}", path.display(), e);
        return None;
      }
    };

    if value.is_array() {
      return self.legacy_record(path, value);
    }
    match serde_json::from_value(value) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!("解析 {} 失败: {}", path.display(), e);
        None
      }
    }
  }

  /// 由旧版推理结果数组还原记录，检测结果从原始数据中重新提取
  fn legacy_record(&self, path: &Path, value: Value) -> Option<AnalysisRecord> {
    let summary = Self::legacy_summary(path, &value)?;
    let raw = RawInferenceResult::from(value);
    let payload = raw.payload()?;
    let (detections, dropped) = extract_detections(PredictionsField::of(payload).records());

    Some(AnalysisRecord {
      predictions: detections
        .iter()
        .enumerate()
        .map(|(index, detection)| StoredPrediction::from_detection(index, detection))
        .collect(),
      dropped_count: dropped,
      metadata: payload.get("metadata").filter(|value| value.is_object()).cloned(),
      model_version: None,
      processing_time_ms: None,
      source_url: None,
      annotation: self
        .image_path(&summary.result_id)
        .map(|_| AnnotationSource::Api),
      raw_result: Some(raw.to_value()),
      result_id: summary.result_id,
      filename: summary.filename,
      created_at: summary.created_at,
      user_id: summary.user_id,
      prediction_count: summary.prediction_count,
      status: summary.status,
    })
  }

  /// 旧版本直接保存推理结果数组，只能拼出摘要
  fn legacy_summary(path: &Path, value: &Value) -> Option<AnalysisSummary> {
    let first = value.as_array()?.first()?.as_object()?;
    let result_id = path.file_stem()?.to_string_lossy().into_owned();
    Some(AnalysisSummary {
      result_id,
      filename: first
        .get("filename")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string(),
      created_at: mtime_of(path),
      user_id: first.get("user_id").and_then(Value::as_str).map(str::to_string),
      prediction_count: first
        .get("count_objects")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize,
      status: Status::Completed,
    })
  }

  fn summaries(&self) -> Result<Vec<AnalysisSummary>, DirectoryRecordError> {
    let mut entries: Vec<_> = std::fs::read_dir(self.root.join(RESULTS_DIR))?
      .filter_map(|entry| entry.ok().map(|entry| entry.path()))
      .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
      .collect();
    entries.sort();

    let mut summaries = Vec::with_capacity(entries.len());
    for path in entries {
      let value: Value = match std::fs::read(&path)
        .map_err(DirectoryRecordError::from)
        .and_then(|data| serde_json::from_slice(&data).map_err(DirectoryRecordError::from))
      {
        Ok(value) => value,
        Err(e) => {
          warn!("跳过无法读取的结果 {}: {}", path.display(), e);
          continue;
        }
      };

      let summary = if value.is_array() {
        Self::legacy_summary(&path, &value)
      } else {
        serde_json::from_value::<AnalysisRecord>(value)
          .map(|record| record.summary())
          .map_err(|e| warn!("跳过格式错误的结果 {}: {}", path.display(), e))
          .ok()
      };
      summaries.extend(summary);
    }
    Ok(summaries)
  }

  fn write_record(&self, record: &AnalysisRecord) -> Result<(), DirectoryRecordError> {
    let data = serde_json::to_vec_pretty(record)?;
    std::fs::write(self.record_path(&record.result_id), data)?;
    Ok(())
  }
}

impl ResultRepository for JsonFileStore {
  type Error = DirectoryRecordError;

  fn save(&self, record: &AnalysisRecord, image: Option<&[u8]>) -> Result<(), Self::Error> {
    if !is_safe_id(&record.result_id) {
      return Err(DirectoryRecordError::InvalidId(record.result_id.clone()));
    }

    self.write_record(record)?;
    if let Some(image) = image {
      let ext = match image::guess_format(image) {
        Ok(ImageFormat::Png) => "png",
        _ => "jpg",
      };
      let path = self
        .root
        .join(IMAGES_DIR)
        .join(format!("{}.{}", record.result_id, ext));
      std::fs::write(&path, image)?;
      debug!("保存标注图像: {}", path.display());
    }

    info!("保存分析结果: {}", record.result_id);
    Ok(())
  }

  fn get(&self, result_id: &str) -> Result<Option<AnalysisRecord>, Self::Error> {
    if !is_safe_id(result_id) {
      return Ok(None);
    }
    let path = self.record_path(result_id);
    if !path.is_file() {
      return Ok(None);
    }
    Ok(self.read_record(&path))
  }

  fn list(&self, query: &ListQuery) -> Result<Page, Self::Error> {
    Ok(query.paginate(self.summaries()?))
  }

  fn delete(&self, result_id: &str) -> Result<bool, Self::Error> {
    if !is_safe_id(result_id) {
      return Ok(false);
    }

    let path = self.record_path(result_id);
    if !path.is_file() {
      return Ok(false);
    }
    std::fs::remove_file(&path)?;
    if let Some(image) = self.image_path(result_id) {
      std::fs::remove_file(image)?;
    }

    info!("删除分析结果: {}", result_id);
    Ok(true)
  }

  fn update_status(
    &self,
    result_id: &str,
    status: Status,
  ) -> Result<Option<AnalysisRecord>, Self::Error> {
    let Some(mut record) = self.get(result_id)? else {
      return Ok(None);
    };
    record.status = status;
    self.write_record(&record)?;
    info!("更新 {} 状态为 {}", result_id, status);
    Ok(Some(record))
  }

  fn statistics(&self, user_id: Option<&str>) -> Result<Statistics, Self::Error> {
    Ok(Statistics::tally(&self.summaries()?, user_id))
  }

  fn image(&self, result_id: &str) -> Result<Option<Vec<u8>>, Self::Error> {
    if !is_safe_id(result_id) {
      return Ok(None);
    }
    match self.image_path(result_id) {
      Some(path) => Ok(Some(std::fs::read(path)?)),
      None => Ok(None),
    }
  }
}

impl Publish for JsonFileStore {
  type Error = DirectoryRecordError;

  fn publish(&self, analysis: &Analysis) -> Result<(), Self::Error> {
    let image = analysis.annotated.as_ref().map(|image| image.bytes());
    self.save(&analysis.record, image)
  }
}
