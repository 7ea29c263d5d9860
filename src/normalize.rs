// 该文件是 Huakuang （画框） 项目的一部分。
// src/normalize.rs - 推理结果规整
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

//! 推理服务返回的数据结构并不稳定，这里把已知的几种形态显式建模，
//! 统一规整为 [`DetectionBatch`] 和可选的预渲染图像。
//!
//! 所有形态上的问题都在本模块内部吸收，只记录日志，不向调用者报错。

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::detection::{AnnotatedImage, Detection, DetectionBatch};

const PREDICTIONS_KEY: &str = "predictions";
const OUTPUT_IMAGE_KEY: &str = "output_image";

/// 推理服务的原始返回
#[derive(Debug, Clone, PartialEq)]
pub enum RawInferenceResult {
  /// `[payload, ...]`，只使用第一个元素
  Wrapped(Vec<Value>),
  /// 顶层即为 payload
  Bare(Map<String, Value>),
  /// 标量或 `null`
  Unrecognized(Value),
}

impl From<Value> for RawInferenceResult {
  fn from(value: Value) -> Self {
    match value {
      Value::Array(items) => RawInferenceResult::Wrapped(items),
      Value::Object(map) => RawInferenceResult::Bare(map),
      other => RawInferenceResult::Unrecognized(other),
    }
  }
}

impl RawInferenceResult {
  pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice::<Value>(data).map(Self::from)
  }

  /// 还原为 JSON，用于留存审计
  pub fn to_value(&self) -> Value {
    match self {
      RawInferenceResult::Wrapped(items) => Value::Array(items.clone()),
      RawInferenceResult::Bare(map) => Value::Object(map.clone()),
      RawInferenceResult::Unrecognized(value) => value.clone(),
    }
  }

  /// 取出真正的 payload 对象
  pub fn payload(&self) -> Option<&Map<String, Value>> {
    match self {
      RawInferenceResult::Wrapped(items) => match items.first() {
        Some(Value::Object(map)) => Some(map),
        Some(other) => {
          debug!("推理结果首元素不是对象: {}", kind_of(other));
          None
        }
        None => {
          debug!("推理结果为空数组");
          None
        }
      },
      RawInferenceResult::Bare(map) => Some(map),
      RawInferenceResult::Unrecognized(value) => {
        debug!("无法识别的推理结果: {}", kind_of(value));
        None
      }
    }
  }
}

/// `payload.predictions` 的几种形态
#[derive(Debug)]
pub enum PredictionsField<'a> {
  /// `predictions: [...]`
  Flat(&'a [Value]),
  /// `predictions: { predictions: [...] }`
  Nested(&'a [Value]),
  Missing,
  Unrecognized(&'a Value),
}

impl<'a> PredictionsField<'a> {
  pub fn of(payload: &'a Map<String, Value>) -> Self {
    let Some(value) = payload.get(PREDICTIONS_KEY) else {
      return PredictionsField::Missing;
    };

    match value {
      Value::Null => PredictionsField::Missing,
      Value::Array(records) => PredictionsField::Flat(records),
      Value::Object(inner) => match inner.get(PREDICTIONS_KEY) {
        Some(Value::Array(records)) => PredictionsField::Nested(records),
        _ => PredictionsField::Unrecognized(value),
      },
      _ => PredictionsField::Unrecognized(value),
    }
  }

  pub fn records(&self) -> &'a [Value] {
    match self {
      PredictionsField::Flat(records) | PredictionsField::Nested(records) => *records,
      PredictionsField::Missing => &[],
      PredictionsField::Unrecognized(value) => {
        debug!("无法识别的 predictions 字段: {}", kind_of(value));
        &[]
      }
    }
  }
}

/// `payload.output_image` 的几种形态
#[derive(Debug)]
enum OutputImageField<'a> {
  /// 直接是 base64 字符串
  Encoded(&'a str),
  /// `{ "type": "base64", "value": "..." }`
  Tagged(&'a str),
  Missing,
  Unrecognized(&'a Value),
}

impl<'a> OutputImageField<'a> {
  fn of(payload: &'a Map<String, Value>) -> Self {
    let Some(value) = payload.get(OUTPUT_IMAGE_KEY) else {
      return OutputImageField::Missing;
    };

    match value {
      Value::Null => OutputImageField::Missing,
      Value::String(encoded) => OutputImageField::Encoded(encoded),
      Value::Object(inner) => match inner.get("value") {
        Some(Value::String(encoded)) => OutputImageField::Tagged(encoded),
        _ => OutputImageField::Unrecognized(value),
      },
      _ => OutputImageField::Unrecognized(value),
    }
  }

  fn decode(&self) -> Option<Vec<u8>> {
    let encoded = match self {
      OutputImageField::Encoded(encoded) | OutputImageField::Tagged(encoded) => *encoded,
      OutputImageField::Missing => return None,
      OutputImageField::Unrecognized(value) => {
        warn!("output_image 字段类型错误: {}, 改为本地绘制", kind_of(value));
        return None;
      }
    };

    match decode_base64_image(encoded) {
      Ok(bytes) => Some(bytes),
      Err(e) => {
        warn!("预渲染图像解码失败: {}, 改为本地绘制", e);
        None
      }
    }
  }
}

#[derive(Debug, thiserror::Error)]
enum Base64ImageError {
  #[error("base64 编码无效: {0}")]
  InvalidBase64(#[from] base64::DecodeError),
  #[error("图像数据为空")]
  EmptyData,
}

fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, Base64ImageError> {
  // 兼容 data URL
  let encoded = match encoded.strip_prefix("data:") {
    Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
    None => encoded,
  };

  // 上游可能按行折断 base64
  let compact: Vec<u8> = encoded
    .bytes()
    .filter(|b| !b.is_ascii_whitespace())
    .collect();
  let bytes = STANDARD.decode(&compact)?;
  if bytes.is_empty() {
    return Err(Base64ImageError::EmptyData);
  }
  Ok(bytes)
}

/// 上游检测记录，字段均可缺失
#[derive(Debug, Deserialize)]
struct RawPrediction {
  #[serde(rename = "class", alias = "class_name")]
  class: Option<String>,
  confidence: Option<f64>,
  x: Option<f64>,
  y: Option<f64>,
  width: Option<f64>,
  height: Option<f64>,
}

impl RawPrediction {
  fn into_detection(self) -> Option<Detection> {
    Detection::new(
      self.class?,
      self.confidence?,
      self.x?,
      self.y?,
      self.width?,
      self.height?,
    )
  }
}

/// 提取完整的检测记录，返回结果与被丢弃的记录数
pub fn extract_detections(records: &[Value]) -> (DetectionBatch, usize) {
  let mut detections = Vec::with_capacity(records.len());
  let mut dropped = 0;

  for (index, record) in records.iter().enumerate() {
    let detection = RawPrediction::deserialize(record)
      .ok()
      .and_then(RawPrediction::into_detection);
    match detection {
      Some(detection) => detections.push(detection),
      None => {
        debug!("丢弃第 {} 条不完整的检测记录", index);
        dropped += 1;
      }
    }
  }

  if dropped > 0 {
    warn!("共丢弃 {} / {} 条不完整的检测记录", dropped, records.len());
  }

  (detections.into(), dropped)
}

/// 规整后的推理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
  pub detections: DetectionBatch,
  pub annotated: Option<AnnotatedImage>,
  pub dropped: usize,
}

pub fn normalize(raw: &RawInferenceResult) -> Normalized {
  let Some(payload) = raw.payload() else {
    return Normalized::default();
  };

  let annotated = OutputImageField::of(payload)
    .decode()
    .map(AnnotatedImage::PreRendered);

  let (detections, dropped) = extract_detections(PredictionsField::of(payload).records());

  Normalized {
    detections,
    annotated,
    dropped,
  }
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
