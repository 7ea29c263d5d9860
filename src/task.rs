// 该文件是 Huakuang （画框） 项目的一部分。
// src/task.rs - 分析任务
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

use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  detection::AnnotatedImage,
  inference::InferenceService,
  input::ImageFileInput,
  normalize::{RawInferenceResult, normalize},
  output::{Publish, draw::Draw, draw::DrawError},
  record::{AnalysisRecord, Status, StoredPrediction},
};

#[cfg(feature = "read_image_url")]
use crate::input::ImageUrlInput;

#[derive(Error, Debug)]
pub enum AnalysisError {
  #[error("绘制标注图像失败: {0}")]
  Draw(#[from] DrawError),
  #[error("metadata 必须是 JSON 对象")]
  InvalidMetadata,
}

/// 一次分析请求
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
  pub filename: String,
  pub image: Vec<u8>,
  pub user_id: Option<String>,
  pub metadata: Option<Value>,
  pub source_url: Option<String>,
  pub started_at: Instant,
}

impl AnalysisRequest {
  pub fn new(filename: impl Into<String>, image: Vec<u8>) -> Self {
    Self {
      filename: filename.into(),
      image,
      user_id: None,
      metadata: None,
      source_url: None,
      started_at: Instant::now(),
    }
  }

  pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
    self.user_id = user_id;
    self
  }

  /// 只接受 JSON 对象，空对象视为未提供
  pub fn with_metadata(mut self, metadata: Option<Value>) -> Result<Self, AnalysisError> {
    self.metadata = match metadata {
      None => None,
      Some(Value::Object(map)) if map.is_empty() => None,
      Some(value @ Value::Object(_)) => Some(value),
      Some(_) => return Err(AnalysisError::InvalidMetadata),
    };
    Ok(self)
  }

  pub fn with_source_url(mut self, source_url: Option<String>) -> Self {
    self.source_url = source_url;
    self
  }
}

impl From<ImageFileInput> for AnalysisRequest {
  fn from(input: ImageFileInput) -> Self {
    let (filename, image) = input.into_parts();
    AnalysisRequest::new(filename, image)
  }
}

#[cfg(feature = "read_image_url")]
impl From<ImageUrlInput> for AnalysisRequest {
  fn from(input: ImageUrlInput) -> Self {
    let (source, image) = input.into_parts();
    AnalysisRequest::from(image).with_source_url(Some(source.to_string()))
  }
}

/// 分析结果：持久化记录与标注图像
#[derive(Debug, Clone)]
pub struct Analysis {
  pub record: AnalysisRecord,
  pub annotated: Option<AnnotatedImage>,
}

pub struct Analyzer {
  draw: Draw,
  model_version: Option<String>,
}

impl Analyzer {
  pub fn new(draw: Draw) -> Self {
    Self {
      draw,
      model_version: None,
    }
  }

  pub fn with_model_version(mut self, model_version: Option<String>) -> Self {
    self.model_version = model_version;
    self
  }

  pub fn analyze(
    &self,
    request: AnalysisRequest,
    raw: &RawInferenceResult,
  ) -> Result<Analysis, AnalysisError> {
    let normalized = normalize(raw);

    // 优先使用推理服务返回的图像，仅在没有时本地绘制
    let annotated = match normalized.annotated {
      Some(pre_rendered) => Some(pre_rendered),
      None if !normalized.detections.is_empty() => {
        let now = Instant::now();
        let encoded = self
          .draw
          .render_encoded(&request.image, &normalized.detections)?;
        info!(
          "本地绘制 {} 个检测框，耗时: {:.2?}",
          normalized.detections.len(),
          now.elapsed()
        );
        Some(AnnotatedImage::Rendered(encoded))
      }
      None => None,
    };

    let predictions: Vec<_> = normalized
      .detections
      .iter()
      .enumerate()
      .map(|(index, detection)| StoredPrediction::from_detection(index, detection))
      .collect();

    if normalized.dropped > 0 {
      warn!(
        "{}: 丢弃了 {} 条不完整的检测记录",
        request.filename, normalized.dropped
      );
    }

    let record = AnalysisRecord {
      result_id: AnalysisRecord::new_id(),
      filename: request.filename,
      created_at: Utc::now(),
      user_id: request.user_id,
      metadata: request.metadata,
      prediction_count: predictions.len(),
      predictions,
      dropped_count: normalized.dropped,
      model_version: self.model_version.clone(),
      processing_time_ms: Some(request.started_at.elapsed().as_millis() as u64),
      source_url: request.source_url,
      annotation: annotated.as_ref().map(AnnotatedImage::source),
      status: Status::Completed,
      raw_result: Some(raw.to_value()),
    };

    Ok(Analysis { record, annotated })
  }
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, outputs: &[O]) -> Result<Self::Output, Self::Error>;
}

/// 单张图像：推理、规整、绘制，再交给所有输出
pub struct OneShotTask {
  analyzer: Analyzer,
  user_id: Option<String>,
  metadata: Option<Value>,
}

impl OneShotTask {
  pub fn new(analyzer: Analyzer) -> Self {
    Self {
      analyzer,
      user_id: None,
      metadata: None,
    }
  }

  pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
    self.user_id = user_id;
    self
  }

  pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
    self.metadata = metadata;
    self
  }
}

impl<
  I: Into<AnalysisRequest>,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  M: InferenceService<Error = ME>,
  O: Publish<Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Output = Analysis;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, outputs: &[O]) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let request = input
      .into()
      .with_user_id(self.user_id)
      .with_metadata(self.metadata)?;
    info!("输入图像: {} ({} 字节)", request.filename, request.image.len());

    let now = Instant::now();
    let raw = model.infer(&request.image)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let mut analyzer = self.analyzer;
    if let Some(model_version) = model.model_version() {
      analyzer.model_version = Some(model_version);
    }
    let analysis = analyzer.analyze(request, &raw)?;
    info!(
      "分析完成: {} 个目标，标注来源: {:?}",
      analysis.record.prediction_count, analysis.record.annotation
    );

    for output in outputs {
      output.publish(&analysis)?;
    }
    info!("输出完成，总耗时: {:.2?}", now.elapsed());

    Ok(analysis)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::AnnotationSource;
  use serde_json::json;
  use std::io::Cursor;

  fn jpeg_bytes() -> Vec<u8> {
    let mut data = Vec::new();
    image::RgbImage::from_pixel(64, 64, image::Rgb([200, 200, 200]))
      .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Jpeg)
      .unwrap();
    data
  }

  fn analyzer() -> Analyzer {
    Analyzer::new(Draw::new().unwrap()).with_model_version(Some("coco/3".into()))
  }

  #[test]
  fn renders_locally_when_no_image_is_returned() {
    let raw = RawInferenceResult::from(json!([{
      "predictions": {"predictions": [
        {"class": "dog", "confidence": 0.9, "x": 32.0, "y": 32.0, "width": 20.0, "height": 20.0},
        {"class": "cat", "confidence": 0.4}
      ]}
    }]));

    let request = AnalysisRequest::new("dog.jpg", jpeg_bytes()).with_user_id(Some("alice".into()));
    let analysis = analyzer().analyze(request, &raw).unwrap();

    assert_eq!(analysis.record.prediction_count, 1);
    assert_eq!(analysis.record.dropped_count, 1);
    assert_eq!(analysis.record.predictions[0].class_name, "dog");
    assert_eq!(analysis.record.status, Status::Completed);
    assert_eq!(analysis.record.model_version.as_deref(), Some("coco/3"));
    assert_eq!(analysis.record.annotation, Some(AnnotationSource::Local));
    assert!(analysis.record.raw_result.is_some());

    let bytes = analysis.annotated.unwrap().bytes().to_vec();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 64));
  }

  #[test]
  fn no_detections_means_no_annotated_image() {
    let raw = RawInferenceResult::from(json!({"predictions": []}));
    let analysis = analyzer()
      .analyze(AnalysisRequest::new("empty.jpg", jpeg_bytes()), &raw)
      .unwrap();

    assert_eq!(analysis.record.prediction_count, 0);
    assert!(analysis.annotated.is_none());
    assert!(analysis.record.annotation.is_none());
  }

  #[test]
  fn undecodable_upload_fails_only_when_drawing() {
    let raw = RawInferenceResult::from(json!({"predictions": [
      {"class": "dog", "confidence": 0.9, "x": 1.0, "y": 1.0, "width": 1.0, "height": 1.0}
    ]}));
    let result = analyzer().analyze(AnalysisRequest::new("x.jpg", b"nope".to_vec()), &raw);
    assert!(matches!(result, Err(AnalysisError::Draw(_))));
  }

  #[test]
  fn metadata_must_be_an_object() {
    let request = AnalysisRequest::new("a.jpg", Vec::new());
    assert!(matches!(
      request.clone().with_metadata(Some(json!([1, 2]))),
      Err(AnalysisError::InvalidMetadata)
    ));
    let kept = request.clone().with_metadata(Some(json!({"camera": "north"}))).unwrap();
    assert_eq!(kept.metadata, Some(json!({"camera": "north"})));
    let empty = request.with_metadata(Some(json!({}))).unwrap();
    assert!(empty.metadata.is_none());
  }
}
