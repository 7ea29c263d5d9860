// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::detection::{Detection, DetectionBatch};

// 绘制常量
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_STROKE_WIDTH: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0]; // 黑色
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_CLEARANCE: i32 = 10;
const LABEL_INSET: i32 = 2;
const LABEL_COORD_LIMIT: i32 = 1 << 20;
const JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("读取字体文件失败: {0}")]
  FontIo(#[from] std::io::Error),
  #[error("无法解码原始图像: {0}")]
  Decode(image::ImageError),
  #[error("无法编码标注图像: {0}")]
  Encode(image::ImageError),
}

/// 标签文本的像素尺寸，`height` 为基线以上部分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextFootprint {
  pub width: i32,
  pub height: i32,
  pub baseline: i32,
}

/// 标签锚点（文本基线左端）
///
/// 框上方留得出 10 像素间隙时放在框上方，否则放到框内顶边之下。
pub fn label_origin(top_left: (i32, i32), footprint: &TextFootprint) -> (i32, i32) {
  let (x, y) = top_left;
  if y - LABEL_CLEARANCE > footprint.height {
    (x, y - LABEL_CLEARANCE)
  } else {
    (x, y + footprint.height + LABEL_INSET)
  }
}

pub struct Draw {
  font: FontArc,
  scale: PxScale,
  box_color: Rgb<u8>,
  text_color: Rgb<u8>,
  stroke_width: i32,
}

impl Draw {
  /// 使用内置字体
  pub fn new() -> Result<Self, DrawError> {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    Ok(Self::with_font(FontArc::try_from_slice(font_data)?))
  }

  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    Ok(Self::with_font(FontArc::try_from_vec(data)?))
  }

  fn with_font(font: FontArc) -> Self {
    Self {
      font,
      scale: PxScale::from(LABEL_FONT_SIZE),
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(LABEL_TEXT_COLOR),
      stroke_width: BOX_STROKE_WIDTH,
    }
  }

  pub fn label_footprint(&self, text: &str) -> TextFootprint {
    let (width, _) = text_size(self.scale, &self.font, text);
    let scaled = self.font.as_scaled(self.scale);
    TextFootprint {
      width: width.max(1) as i32,
      height: scaled.ascent().ceil() as i32,
      baseline: (-scaled.descent()).ceil() as i32,
    }
  }

  /// 在图像上绘制所有检测框
  ///
  /// 图像按值传入并在其上直接修改，需要保留原图时调用方应先克隆。
  /// 检测结果为空时原样返回。
  pub fn render(&self, mut image: RgbImage, detections: &DetectionBatch) -> RgbImage {
    for detection in detections {
      self.draw_bbox_with_label(&mut image, detection);
    }
    image
  }

  /// 解码、绘制并重新编码为 JPEG
  pub fn render_encoded(
    &self,
    source: &[u8],
    detections: &DetectionBatch,
  ) -> Result<Vec<u8>, DrawError> {
    let image = image::load_from_memory(source)
      .map_err(DrawError::Decode)?
      .to_rgb8();
    let image = self.render(image, detections);
    encode_jpeg(&image)
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    let (top_left, bottom_right) = detection.corners();
    self.draw_bbox(image, top_left, bottom_right);

    let label = detection.label();
    let footprint = self.label_footprint(&label);
    let anchor = (
      top_left.0.clamp(-LABEL_COORD_LIMIT, LABEL_COORD_LIMIT),
      top_left.1.clamp(-LABEL_COORD_LIMIT, LABEL_COORD_LIMIT),
    );
    let (label_x, label_y) = label_origin(anchor, &footprint);

    // 标签背景
    let top = label_y - footprint.height - footprint.baseline;
    let background = Rect::at(label_x, top).of_size(
      footprint.width as u32,
      (footprint.height + 2 * footprint.baseline).max(1) as u32,
    );
    draw_filled_rect_mut(image, background, self.box_color);

    // draw_text_mut 的 y 为文本顶端
    draw_text_mut(
      image,
      self.text_color,
      label_x,
      label_y - footprint.height,
      self.scale,
      &self.font,
      &label,
    );
  }

  fn draw_bbox(&self, image: &mut RgbImage, top_left: (i32, i32), bottom_right: (i32, i32)) {
    // 先裁到图像附近，避免超大坐标逐点画线
    let margin = self.stroke_width + 1;
    let (width, height) = (image.width() as i32, image.height() as i32);
    let clamp_x = |x: i32| x.clamp(-margin, width + margin);
    let clamp_y = |y: i32| y.clamp(-margin, height + margin);

    let (x0, x1) = (clamp_x(top_left.0), clamp_x(bottom_right.0));
    let (y0, y1) = (clamp_y(top_left.1), clamp_y(bottom_right.1));
    let (x_min, x_max) = (x0.min(x1), x0.max(x1));
    let (y_min, y_max) = (y0.min(y1), y0.max(y1));

    for inset in 0..self.stroke_width {
      let (left, right) = (x_min + inset, x_max - inset);
      let (top, bottom) = (y_min + inset, y_max - inset);
      if left > right || top > bottom {
        break;
      }
      let rect = Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
      draw_hollow_rect_mut(image, rect, self.box_color);
    }
  }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, DrawError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
    .encode_image(image)
    .map_err(DrawError::Encode)?;
  Ok(buffer)
}
