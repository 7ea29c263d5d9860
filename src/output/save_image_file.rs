// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
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

use image::ImageFormat;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Publish, task::Analysis};

pub struct SaveImageFileOutput {
  path: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput::new(uri.path()))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// 编码与扩展名一致时原样写入，否则按扩展名重新编码
  fn save_bytes(&self, bytes: &[u8]) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let wanted = ImageFormat::from_path(&self.path).ok();
    let actual = image::guess_format(bytes).ok();
    if wanted.is_none() || wanted == actual {
      std::fs::write(&self.path, bytes)?;
    } else {
      image::load_from_memory(bytes)?.save(&self.path)?;
    }

    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Publish for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn publish(&self, analysis: &Analysis) -> Result<(), Self::Error> {
    match &analysis.annotated {
      Some(annotated) => self.save_bytes(annotated.bytes()),
      None => {
        warn!(
          "{} 没有标注图像，跳过保存: {}",
          analysis.record.result_id,
          self.path.display()
        );
        Ok(())
      }
    }
  }
}
