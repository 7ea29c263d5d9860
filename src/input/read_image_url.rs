// 该文件是 Huakuang （画框） 项目的一部分。
// src/input/read_image_url.rs - 网络图像输入
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

use std::time::Duration;

use reqwest::{blocking::Client, header::CONTENT_TYPE};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::{ImageFileInput, ImageFileInputError};
use crate::{FromUrl, FromUrlWithScheme};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FILENAME: &str = "upload.jpg";

#[derive(Error, Debug)]
pub enum ImageUrlInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("下载图像失败: {0}")]
  Download(#[from] reqwest::Error),
  #[error("URL does not point to an image. Content-Type: {0}")]
  NotAnImageUrl(String),
  #[error(transparent)]
  Image(#[from] ImageFileInputError),
}

/// 从 http(s) 地址下载的图像，保留来源地址
#[derive(Debug, Clone)]
pub struct ImageUrlInput {
  source: Url,
  image: ImageFileInput,
}

impl FromUrlWithScheme for ImageUrlInput {
  const SCHEME: &'static str = "https";
}

impl ImageUrlInput {
  pub const PLAIN_SCHEME: &'static str = "http";

  pub fn accepts(url: &Url) -> bool {
    url.scheme() == Self::SCHEME || url.scheme() == Self::PLAIN_SCHEME
  }

  /// 由已下载的响应构造，`content_type` 必须是 `image/*`
  pub fn from_response(
    source: Url,
    content_type: &str,
    data: Vec<u8>,
  ) -> Result<Self, ImageUrlInputError> {
    if !content_type.starts_with("image/") {
      return Err(ImageUrlInputError::NotAnImageUrl(content_type.to_string()));
    }

    let filename = source
      .path_segments()
      .and_then(|mut segments| segments.next_back())
      .filter(|name| !name.is_empty())
      .unwrap_or(DEFAULT_FILENAME)
      .to_string();
    let image = ImageFileInput::from_bytes(filename, data)?;

    Ok(Self { source, image })
  }

  pub fn source(&self) -> &Url {
    &self.source
  }

  pub fn image(&self) -> &ImageFileInput {
    &self.image
  }

  pub fn into_parts(self) -> (Url, ImageFileInput) {
    (self.source, self.image)
  }
}

impl FromUrl for ImageUrlInput {
  type Error = ImageUrlInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !Self::accepts(url) {
      error!(
        "URI scheme mismatch: expected '{}' or '{}', found '{}'",
        Self::SCHEME,
        Self::PLAIN_SCHEME,
        url.scheme()
      );
      return Err(ImageUrlInputError::SchemaMismatch);
    }

    let client = Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
    let response = client.get(url.clone()).send()?.error_for_status()?;
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .unwrap_or_default()
      .to_string();
    let data = response.bytes()?.to_vec();
    info!("已下载 {}: {} 字节, {}", url, data.len(), content_type);

    Self::from_response(url.clone(), &content_type, data)
  }
}
