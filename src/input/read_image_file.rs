// 该文件是 Huakuang （画框） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::ImageFormat;
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_FILENAME: &str = "upload.jpg";

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("File must be an image (JPEG, PNG): {0}")]
  NotAnImage(String),
}

/// 待分析的原始图像，保留编码后的字节
#[derive(Debug, Clone)]
pub struct ImageFileInput {
  filename: String,
  data: Vec<u8>,
  format: ImageFormat,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = Path::new(url.path());
    let data = std::fs::read(path)?;
    let filename = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    Self::from_bytes(filename, data)
  }
}

impl ImageFileInput {
  /// 仅按文件头判断格式，完整解码留到绘制阶段
  pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Result<Self, ImageFileInputError> {
    let filename = filename.into();
    let format =
      image::guess_format(&data).map_err(|_| ImageFileInputError::NotAnImage(filename.clone()))?;

    let filename = if filename.is_empty() {
      DEFAULT_FILENAME.to_string()
    } else {
      filename
    };

    Ok(Self {
      filename,
      data,
      format,
    })
  }

  pub fn filename(&self) -> &str {
    &self.filename
  }

  pub fn format(&self) -> ImageFormat {
    self.format
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn into_parts(self) -> (String, Vec<u8>) {
    (self.filename, self.data)
  }
}
