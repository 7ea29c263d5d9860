// 该文件是 Huakuang （画框） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// 单个目标检测结果
///
/// 坐标位于原图像素空间，`(center_x, center_y)` 是框的中心点。
/// 置信度按原样保存，即使超出 `[0, 1]`。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  class_label: String,
  confidence: f64,
  center_x: f64,
  center_y: f64,
  width: f64,
  height: f64,
}

impl Detection {
  /// 类别为空时返回 `None`
  pub fn new(
    class_label: impl Into<String>,
    confidence: f64,
    center_x: f64,
    center_y: f64,
    width: f64,
    height: f64,
  ) -> Option<Self> {
    let class_label = class_label.into();
    if class_label.is_empty() {
      return None;
    }

    Some(Self {
      class_label,
      confidence,
      center_x,
      center_y,
      width,
      height,
    })
  }

  pub fn class_label(&self) -> &str {
    &self.class_label
  }

  pub fn confidence(&self) -> f64 {
    self.confidence
  }

  pub fn center_x(&self) -> f64 {
    self.center_x
  }

  pub fn center_y(&self) -> f64 {
    self.center_y
  }

  pub fn width(&self) -> f64 {
    self.width
  }

  pub fn height(&self) -> f64 {
    self.height
  }

  /// 左上角与右下角的整数像素坐标（向零截断）
  pub fn corners(&self) -> ((i32, i32), (i32, i32)) {
    let half_w = self.width / 2.0;
    let half_h = self.height / 2.0;
    (
      (
        (self.center_x - half_w) as i32,
        (self.center_y - half_h) as i32,
      ),
      (
        (self.center_x + half_w) as i32,
        (self.center_y + half_h) as i32,
      ),
    )
  }

  /// 标签文本，置信度保留两位小数
  pub fn label(&self) -> String {
    format!("{} {:.2}", self.class_label, self.confidence)
  }
}

/// 按推理服务返回顺序排列的检测结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionBatch {
  items: Box<[Detection]>,
}

impl DetectionBatch {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectionBatch {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl FromIterator<Detection> for DetectionBatch {
  fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
    iter.into_iter().collect::<Vec<_>>().into()
  }
}

impl<'a> IntoIterator for &'a DetectionBatch {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

/// 标注图像的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationSource {
  /// 推理服务直接返回
  Api,
  /// 本地绘制
  Local,
}

/// 已编码的标注图像，两种来源互斥
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotatedImage {
  PreRendered(Vec<u8>),
  Rendered(Vec<u8>),
}

impl AnnotatedImage {
  /// 从存储中读回的图像，来源以记录为准
  pub fn with_source(source: AnnotationSource, bytes: Vec<u8>) -> Self {
    match source {
      AnnotationSource::Api => AnnotatedImage::PreRendered(bytes),
      AnnotationSource::Local => AnnotatedImage::Rendered(bytes),
    }
  }

  pub fn source(&self) -> AnnotationSource {
    match self {
      AnnotatedImage::PreRendered(_) => AnnotationSource::Api,
      AnnotatedImage::Rendered(_) => AnnotationSource::Local,
    }
  }

  pub fn bytes(&self) -> &[u8] {
    match self {
      AnnotatedImage::PreRendered(bytes) | AnnotatedImage::Rendered(bytes) => bytes,
    }
  }

  pub fn to_base64(&self) -> String {
    STANDARD.encode(self.bytes())
  }
}
