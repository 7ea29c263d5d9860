// 该文件是 Huakuang （画框） 项目的一部分。
// src/response.rs - 对外输出的 JSON 结构
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

use serde::Serialize;

use crate::{
  detection::AnnotatedImage,
  migrate::MigrationSummary,
  record::{AnalysisRecord, Page, Statistics},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  ValidationError,
  ProcessingError,
  NotFound,
  InternalError,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
  pub success: bool,
  pub result: AnalysisRecord,
  /// base64 编码的标注图像
  #[serde(skip_serializing_if = "Option::is_none")]
  pub annotated_image: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

impl AnalysisResponse {
  pub fn new(result: AnalysisRecord, annotated: Option<&AnnotatedImage>) -> Self {
    let message = format!("检测到 {} 个目标", result.prediction_count);
    Self {
      success: true,
      result,
      annotated_image: annotated.map(AnnotatedImage::to_base64),
      message: Some(message),
    }
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsListResponse {
  pub success: bool,
  #[serde(flatten)]
  pub page: Page,
}

impl From<Page> for ResultsListResponse {
  fn from(page: Page) -> Self {
    Self {
      success: true,
      page,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
  pub success: bool,
  pub message: String,
  pub deleted_result_id: String,
}

impl DeleteResponse {
  pub fn new(result_id: &str) -> Self {
    Self {
      success: true,
      message: format!("已删除分析结果 {result_id}"),
      deleted_result_id: result_id.to_string(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsResponse {
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  #[serde(flatten)]
  pub statistics: Statistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationResponse {
  pub success: bool,
  pub dry_run: bool,
  #[serde(flatten)]
  pub summary: MigrationSummary,
}

impl MigrationResponse {
  pub fn new(summary: MigrationSummary, dry_run: bool) -> Self {
    Self {
      success: summary.failed == 0,
      dry_run,
      summary,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
  pub success: bool,
  pub error: ErrorKind,
  pub message: String,
}

impl ErrorResponse {
  pub fn new(error: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      success: false,
      error,
      message: message.into(),
    }
  }

  pub fn not_found(result_id: &str) -> Self {
    Self::new(ErrorKind::NotFound, format!("未找到分析结果 {result_id}"))
  }
}
