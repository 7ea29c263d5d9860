// 该文件是 Huakuang （画框） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像标注
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use huakuang::{
  FromUrl,
  output::draw::Draw,
  task::{Analyzer, OneShotTask, Task},
};
use tracing::info;

/// Huakuang 单张图像标注
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 推理结果来源
  #[arg(long, value_name = "INFERENCE")]
  pub inference: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("推理来源: {}", args.inference);
  info!("输出路径: {}", args.output);

  let input_image = huakuang::input::InputWrapper::from_url(&args.input)?;
  let service = huakuang::inference::RecordedInference::from_url(&args.inference)?;
  let output = huakuang::output::OutputWrapper::from_url(&args.output)?;

  let analysis =
    OneShotTask::new(Analyzer::new(Draw::new()?)).run_task(input_image, service, &[output])?;
  info!(
    "结果 {}: {} 个目标",
    analysis.record.result_id, analysis.record.prediction_count
  );

  Ok(())
}
