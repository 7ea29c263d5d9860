// 该文件是 Huakuang （画框） 项目的一部分。
// src/record.rs - 分析记录与存储接口
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

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::detection::{AnnotationSource, Detection};

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Processing,
  Completed,
  Failed,
}

impl Status {
  pub const ALL: [Status; 3] = [Status::Processing, Status::Completed, Status::Failed];

  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Processing => "processing",
      Status::Completed => "completed",
      Status::Failed => "failed",
    }
  }
}

#[derive(Error, Debug)]
#[error("未知状态: {0}，应为 processing / completed / failed")]
pub struct StatusParseError(String);

impl FromStr for Status {
  type Err = StatusParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Status::ALL
      .into_iter()
      .find(|status| status.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| StatusParseError(s.to_string()))
  }
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 以中心点表示的检测框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x: f64,
  pub y: f64,
  pub width: f64,
  pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrediction {
  pub id: String,
  #[serde(rename = "class", alias = "class_name")]
  pub class_name: String,
  pub confidence: f64,
  pub bounding_box: BoundingBox,
}

impl StoredPrediction {
  /// id 形如 `pred_{序号}_{8 位十六进制}`
  pub fn from_detection(index: usize, detection: &Detection) -> Self {
    let suffix = Uuid::new_v4().simple().to_string();
    Self {
      id: format!("pred_{}_{}", index, &suffix[..8]),
      class_name: detection.class_label().to_string(),
      confidence: detection.confidence(),
      bounding_box: BoundingBox {
        x: detection.center_x(),
        y: detection.center_y(),
        width: detection.width(),
        height: detection.height(),
      },
    }
  }
}

/// 一次分析的完整记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
  pub result_id: String,
  pub filename: String,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub user_id: Option<String>,
  #[serde(default)]
  pub metadata: Option<Value>,
  #[serde(default)]
  pub predictions: Vec<StoredPrediction>,
  pub prediction_count: usize,
  #[serde(default)]
  pub dropped_count: usize,
  #[serde(default)]
  pub model_version: Option<String>,
  #[serde(default)]
  pub processing_time_ms: Option<u64>,
  #[serde(default)]
  pub source_url: Option<String>,
  #[serde(default)]
  pub annotation: Option<AnnotationSource>,
  pub status: Status,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub raw_result: Option<Value>,
}

impl AnalysisRecord {
  pub fn new_id() -> String {
    Uuid::new_v4().to_string()
  }

  pub fn summary(&self) -> AnalysisSummary {
    AnalysisSummary {
      result_id: self.result_id.clone(),
      filename: self.filename.clone(),
      created_at: self.created_at,
      user_id: self.user_id.clone(),
      prediction_count: self.prediction_count,
      status: self.status,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
  pub result_id: String,
  pub filename: String,
  pub created_at: DateTime<Utc>,
  pub user_id: Option<String>,
  pub prediction_count: usize,
  pub status: Status,
}

#[derive(Error, Debug)]
#[error("limit 必须在 1 到 100 之间，实际为 {0}")]
pub struct ListQueryError(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
  pub user_id: Option<String>,
  pub status: Option<Status>,
  limit: usize,
  pub offset: usize,
}

impl Default for ListQuery {
  fn default() -> Self {
    Self {
      user_id: None,
      status: None,
      limit: DEFAULT_LIST_LIMIT,
      offset: 0,
    }
  }
}

impl ListQuery {
  pub fn with_limit(mut self, limit: usize) -> Result<Self, ListQueryError> {
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
      return Err(ListQueryError(limit));
    }
    self.limit = limit;
    Ok(self)
  }

  pub fn with_offset(mut self, offset: usize) -> Self {
    self.offset = offset;
    self
  }

  pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
    self.user_id = user_id;
    self
  }

  pub fn with_status(mut self, status: Option<Status>) -> Self {
    self.status = status;
    self
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  pub fn matches(&self, summary: &AnalysisSummary) -> bool {
    let user_ok = self
      .user_id
      .as_ref()
      .is_none_or(|user_id| summary.user_id.as_ref() == Some(user_id));
    let status_ok = self.status.is_none_or(|status| summary.status == status);
    user_ok && status_ok
  }

  /// 过滤、按创建时间倒序排列并分页
  pub fn paginate(&self, summaries: impl IntoIterator<Item = AnalysisSummary>) -> Page {
    let mut results: Vec<_> = summaries
      .into_iter()
      .filter(|summary| self.matches(summary))
      .collect();
    results.sort_by(|a, b| {
      b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.result_id.cmp(&b.result_id))
    });

    let total_count = results.len();
    let results: Vec<_> = results
      .into_iter()
      .skip(self.offset)
      .take(self.limit)
      .collect();

    Page {
      results,
      total_count,
      limit: self.limit,
      offset: self.offset,
      has_more: self.offset.saturating_add(self.limit) < total_count,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
  pub results: Vec<AnalysisSummary>,
  pub total_count: usize,
  pub limit: usize,
  pub offset: usize,
  pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
  pub total_analyses: usize,
  pub total_predictions: usize,
  pub status_counts: BTreeMap<Status, usize>,
}

impl Statistics {
  pub fn tally<'a>(
    summaries: impl IntoIterator<Item = &'a AnalysisSummary>,
    user_id: Option<&str>,
  ) -> Self {
    let mut stats = Statistics {
      total_analyses: 0,
      total_predictions: 0,
      status_counts: Status::ALL.into_iter().map(|status| (status, 0)).collect(),
    };

    for summary in summaries {
      if user_id.is_some_and(|user_id| summary.user_id.as_deref() != Some(user_id)) {
        continue;
      }
      stats.total_analyses += 1;
      stats.total_predictions += summary.prediction_count;
      *stats.status_counts.entry(summary.status).or_default() += 1;
    }

    stats
  }
}

/// 分析记录的持久化
pub trait ResultRepository {
  type Error;

  fn save(&self, record: &AnalysisRecord, image: Option<&[u8]>) -> Result<(), Self::Error>;
  fn get(&self, result_id: &str) -> Result<Option<AnalysisRecord>, Self::Error>;
  fn list(&self, query: &ListQuery) -> Result<Page, Self::Error>;
  fn delete(&self, result_id: &str) -> Result<bool, Self::Error>;
  fn update_status(
    &self,
    result_id: &str,
    status: Status,
  ) -> Result<Option<AnalysisRecord>, Self::Error>;
  fn statistics(&self, user_id: Option<&str>) -> Result<Statistics, Self::Error>;
  fn image(&self, result_id: &str) -> Result<Option<Vec<u8>>, Self::Error>;
}

type StoredEntry = (AnalysisRecord, Option<Vec<u8>>);

/// 进程内存储，用于试运行与测试
#[derive(Debug, Default)]
pub struct MemoryRecords {
  entries: Mutex<BTreeMap<String, StoredEntry>>,
}

impl MemoryRecords {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredEntry>> {
    self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl ResultRepository for MemoryRecords {
  type Error = std::convert::Infallible;

  fn save(&self, record: &AnalysisRecord, image: Option<&[u8]>) -> Result<(), Self::Error> {
    self.lock().insert(
      record.result_id.clone(),
      (record.clone(), image.map(<[u8]>::to_vec)),
    );
    Ok(())
  }

  fn get(&self, result_id: &str) -> Result<Option<AnalysisRecord>, Self::Error> {
    Ok(self.lock().get(result_id).map(|(record, _)| record.clone()))
  }

  fn list(&self, query: &ListQuery) -> Result<Page, Self::Error> {
    let summaries: Vec<_> = self
      .lock()
      .values()
      .map(|(record, _)| record.summary())
      .collect();
    Ok(query.paginate(summaries))
  }

  fn delete(&self, result_id: &str) -> Result<bool, Self::Error> {
    Ok(self.lock().remove(result_id).is_some())
  }

  fn update_status(
    &self,
    result_id: &str,
    status: Status,
  ) -> Result<Option<AnalysisRecord>, Self::Error> {
    let mut entries = self.lock();
    Ok(entries.get_mut(result_id).map(|(record, _)| {
      record.status = status;
      record.clone()
    }))
  }

  fn statistics(&self, user_id: Option<&str>) -> Result<Statistics, Self::Error> {
    let summaries: Vec<_> = self
      .lock()
      .values()
      .map(|(record, _)| record.summary())
      .collect();
    Ok(Statistics::tally(&summaries, user_id))
  }

  fn image(&self, result_id: &str) -> Result<Option<Vec<u8>>, Self::Error> {
    Ok(self.lock().get(result_id).and_then(|(_, image)| image.clone()))
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use chrono::TimeZone;

  pub(crate) fn record(id: &str, user: Option<&str>, minute: u32, status: Status) -> AnalysisRecord {
    AnalysisRecord {
      result_id: id.to_string(),
      filename: format!("{id}.jpg"),
      created_at: Utc.with_ymd_and_hms(2025, 9, 29, 12, minute, 0).unwrap(),
      user_id: user.map(str::to_string),
      metadata: None,
      predictions: Vec::new(),
      prediction_count: minute as usize,
      dropped_count: 0,
      model_version: None,
      processing_time_ms: None,
      source_url: None,
      annotation: None,
      status,
      raw_result: None,
    }
  }

  #[test]
  fn status_parses_case_insensitively() {
    assert_eq!("Completed".parse::<Status>().unwrap(), Status::Completed);
    assert!("done".parse::<Status>().is_err());
    assert_eq!(serde_json::to_string(&Status::Failed).unwrap(), "\"failed\"");
  }

  #[test]
  fn limit_is_bounded() {
    assert!(ListQuery::default().with_limit(0).is_err());
    assert!(ListQuery::default().with_limit(101).is_err());
    assert_eq!(ListQuery::default().with_limit(100).unwrap().limit(), 100);
    assert_eq!(ListQuery::default().limit(), DEFAULT_LIST_LIMIT);
  }

  #[test]
  fn pagination_is_newest_first() {
    let summaries: Vec<_> = (0..5)
      .map(|i| record(&format!("r{i}"), None, i, Status::Completed).summary())
      .collect();

    let query = ListQuery::default().with_limit(2).unwrap().with_offset(1);
    let page = query.paginate(summaries.clone());
    let ids: Vec<_> = page.results.iter().map(|s| s.result_id.as_str()).collect();
    assert_eq!(ids, ["r3", "r2"]);
    assert_eq!(page.total_count, 5);
    assert!(page.has_more);

    let last = ListQuery::default().with_limit(2).unwrap().with_offset(3).paginate(summaries);
    assert_eq!(last.results.len(), 2);
    assert!(!last.has_more);
  }

  #[test]
  fn filters_by_user_and_status() {
    let summaries = vec![
      record("a", Some("alice"), 1, Status::Completed).summary(),
      record("b", Some("bob"), 2, Status::Completed).summary(),
      record("c", Some("alice"), 3, Status::Failed).summary(),
    ];

    let query = ListQuery::default()
      .with_user_id(Some("alice".into()))
      .with_status(Some(Status::Completed));
    let page = query.paginate(summaries);
    assert_eq!(page.total_count, 1);
    assert_eq!(page.results[0].result_id, "a");
  }

  #[test]
  fn statistics_count_every_status() {
    let summaries = vec![
      record("a", Some("alice"), 1, Status::Completed).summary(),
      record("b", Some("bob"), 2, Status::Failed).summary(),
    ];

    let all = Statistics::tally(&summaries, None);
    assert_eq!(all.total_analyses, 2);
    assert_eq!(all.total_predictions, 3);
    assert_eq!(all.status_counts[&Status::Processing], 0);

    let alice = Statistics::tally(&summaries, Some("alice"));
    assert_eq!(alice.total_analyses, 1);
    assert_eq!(alice.status_counts[&Status::Completed], 1);
    assert_eq!(alice.status_counts[&Status::Failed], 0);
  }

  #[test]
  fn memory_records_support_crud() {
    let store = MemoryRecords::new();
    store.save(&record("a", None, 1, Status::Processing), Some(&[1u8, 2][..])).unwrap();

    assert_eq!(store.image("a").unwrap(), Some(vec![1, 2]));
    let updated = store.update_status("a", Status::Completed).unwrap().unwrap();
    assert_eq!(updated.status, Status::Completed);
    assert!(store.update_status("missing", Status::Failed).unwrap().is_none());

    assert!(store.delete("a").unwrap());
    assert!(!store.delete("a").unwrap());
    assert!(store.is_empty());
  }

  #[test]
  fn prediction_ids_follow_the_legacy_shape() {
    let det = Detection::new("cat", 0.5, 1.0, 2.0, 3.0, 4.0).unwrap();
    let stored = StoredPrediction::from_detection(3, &det);
    assert!(stored.id.starts_with("pred_3_"));
    assert_eq!(stored.id.len(), "pred_3_".len() + 8);

    let json = serde_json::to_value(&stored).unwrap();
    assert_eq!(json["class"], "cat");
    assert_eq!(json["bounding_box"]["width"], 3.0);
  }
}
