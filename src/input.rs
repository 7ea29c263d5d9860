// 该文件是 Huakuang （画框） 项目的一部分。
// src/input.rs - 图像输入
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};
use crate::task::AnalysisRequest;

mod read_image_file;

pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "read_image_url")]
mod read_image_url;
#[cfg(feature = "read_image_url")]
pub use self::read_image_url::{ImageUrlInput, ImageUrlInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("读取图像文件错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "read_image_url")]
  #[error("下载图像错误: {0}")]
  ImageUrlInputError(#[from] ImageUrlInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URI 方案选择的图像来源
#[derive(Debug, Clone)]
pub enum InputWrapper {
  ImageFileInput(ImageFileInput),
  #[cfg(feature = "read_image_url")]
  ImageUrlInput(ImageUrlInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => {
        let input = ImageFileInput::from_url(url)?;
        Ok(InputWrapper::ImageFileInput(input))
      }
      #[cfg(feature = "read_image_url")]
      ImageUrlInput::SCHEME | ImageUrlInput::PLAIN_SCHEME => {
        let input = ImageUrlInput::from_url(url)?;
        Ok(InputWrapper::ImageUrlInput(input))
      }
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl From<InputWrapper> for AnalysisRequest {
  fn from(input: InputWrapper) -> Self {
    match input {
      InputWrapper::ImageFileInput(input) => input.into(),
      #[cfg(feature = "read_image_url")]
      InputWrapper::ImageUrlInput(input) => input.into(),
    }
  }
}
