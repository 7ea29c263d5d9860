// 该文件是 Huakuang （画框） 项目的一部分。
// src/inference.rs - 推理服务接口
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, normalize::RawInferenceResult};

/// 托管的目标检测服务，对本仓库而言是不透明的
pub trait InferenceService {
  type Error;

  fn infer(&self, image: &[u8]) -> Result<RawInferenceResult, Self::Error>;

  /// 记录在分析结果中的模型版本
  fn model_version(&self) -> Option<String> {
    None
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理结果路径错误: {0}")]
  PathError(String),
  #[error("读取推理结果失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("推理结果不是合法 JSON: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 回放保存在磁盘上的推理结果
#[derive(Debug, Clone)]
pub struct RecordedInference {
  path: PathBuf,
  model_version: Option<String>,
}

impl FromUrlWithScheme for RecordedInference {
  const SCHEME: &'static str = "json";
}

impl FromUrl for RecordedInference {
  type Error = InferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InferenceError::PathError(format!(
        "推理结果路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_version = url
      .query_pairs()
      .find(|(k, _)| k == "model_version")
      .map(|(_, v)| v.into_owned());

    Ok(RecordedInference {
      path: PathBuf::from(url.path()),
      model_version,
    })
  }
}

impl RecordedInference {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      model_version: None,
    }
  }

  pub fn with_model_version(mut self, model_version: Option<String>) -> Self {
    self.model_version = model_version;
    self
  }
}

impl InferenceService for RecordedInference {
  type Error = InferenceError;

  fn infer(&self, image: &[u8]) -> Result<RawInferenceResult, Self::Error> {
    info!("读取推理结果: {}", self.path.display());
    debug!("输入图像大小: {} 字节", image.len());
    let data = std::fs::read(&self.path)?;
    Ok(RawInferenceResult::from_slice(&data)?)
  }

  fn model_version(&self) -> Option<String> {
    self.model_version.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn replays_recorded_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.json");
    std::fs::write(&path, r#"[{"predictions": {"predictions": []}}]"#).unwrap();

    let url = Url::parse(&format!("json://{}?model_version=coco-v3", path.display())).unwrap();
    let service = RecordedInference::from_url(&url).unwrap();
    assert_eq!(service.model_version().as_deref(), Some("coco-v3"));

    let raw = service.infer(&[]).unwrap();
    assert!(matches!(raw, RawInferenceResult::Wrapped(ref items) if items.len() == 1));
  }

  #[test]
  fn invalid_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    let service = RecordedInference::new(&path);
    assert!(matches!(service.infer(&[]), Err(InferenceError::JsonError(_))));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("image:///tmp/a.jpg").unwrap();
    assert!(RecordedInference::from_url(&url).is_err());
  }
}
