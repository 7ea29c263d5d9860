// 该文件是 Huakuang （画框） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{Args as ClapArgs, Parser, Subcommand};
use huakuang::record::{DEFAULT_LIST_LIMIT, Status};
use url::Url;

/// Huakuang 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 分析一张图像并输出结果
  Analyze(AnalyzeArgs),
  /// 查询与管理已保存的分析结果
  Results {
    /// 结果目录，例如 folder:///var/lib/huakuang
    #[arg(long, value_name = "STORE")]
    store: Url,
    #[command(subcommand)]
    action: ResultsAction,
  },
  /// 将旧版 JSON 结果导入结果目录
  Migrate(MigrateArgs),
}

#[derive(ClapArgs, Debug)]
pub struct AnalyzeArgs {
  /// 输入图像
  /// 支持:
  /// - 本地文件: image:///tmp/street.jpg
  /// - 网络图像: https://example.com/street.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 推理结果来源，例如 json:///tmp/result.json
  #[arg(long, value_name = "INFERENCE")]
  pub inference: Url,
  /// 输出路径，可重复
  /// 支持:
  /// - 图片: image:///tmp/annotated.jpg
  /// - 结果目录: folder:///var/lib/huakuang
  #[arg(long, value_name = "OUTPUT")]
  pub output: Vec<Url>,
  /// 用户标识
  #[arg(long)]
  pub user_id: Option<String>,
  /// 附加信息（JSON 对象）
  #[arg(long, value_name = "JSON")]
  pub metadata: Option<String>,
  /// 模型版本，优先于推理来源中的设置
  #[arg(long)]
  pub model_version: Option<String>,
  /// 标签字体文件，默认使用内置的 DejaVu Sans
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ResultsAction {
  /// 分页列出结果
  List {
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    status: Option<Status>,
    /// 每页数量 (1 - 100)
    #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
  },
  /// 查看单个结果
  Show {
    result_id: String,
    /// 同时输出 base64 编码的标注图像
    #[arg(long)]
    with_image: bool,
  },
  /// 导出标注图像
  Image {
    result_id: String,
    #[arg(long, value_name = "FILE")]
    output: PathBuf,
  },
  /// 删除结果及其标注图像
  Delete { result_id: String },
  /// 更新结果状态
  Status { result_id: String, status: Status },
  /// 统计信息
  Stats {
    #[arg(long)]
    user_id: Option<String>,
  },
}

#[derive(ClapArgs, Debug)]
pub struct MigrateArgs {
  /// 旧版 JSON 结果所在目录
  #[arg(long, value_name = "DIR")]
  pub from: PathBuf,
  /// 目标结果目录
  #[arg(long, value_name = "STORE")]
  pub store: Url,
  /// 不再确认，直接迁移
  #[arg(long, short)]
  pub yes: bool,
  /// 只统计，不写入
  #[arg(long)]
  pub dry_run: bool,
}
