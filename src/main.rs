// 该文件是 Huakuang （画框） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::io::{BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use args::{AnalyzeArgs, Command, MigrateArgs, ResultsAction};
use huakuang::{
  FromUrl,
  detection::AnnotatedImage,
  inference::RecordedInference,
  input::InputWrapper,
  migrate::{json_files, migrate_dir},
  output::{JsonFileStore, OutputWrapper, draw::Draw},
  record::{ListQuery, MemoryRecords, ResultRepository},
  response::{
    AnalysisResponse, DeleteResponse, ErrorResponse, MigrationResponse, ResultsListResponse,
    StatisticsResponse,
  },
  task::{Analyzer, OneShotTask, Task},
};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn not_found(result_id: &str) -> Result<ExitCode> {
  print_json(&ErrorResponse::not_found(result_id))?;
  Ok(ExitCode::FAILURE)
}

fn analyze(args: AnalyzeArgs) -> Result<ExitCode> {
  info!("输入来源: {}", args.input);
  info!("推理来源: {}", args.inference);

  let input = InputWrapper::from_url(&args.input)
    .with_context(|| format!("无法读取输入图像 {}", args.input))?;
  let service = RecordedInference::from_url(&args.inference)?;
  let service = match args.model_version {
    Some(model_version) => service.with_model_version(Some(model_version)),
    None => service,
  };

  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)
      .with_context(|| format!("无法加载字体 {}", path.display()))?,
    None => Draw::new()?,
  };

  let outputs = args
    .output
    .iter()
    .map(|url| {
      info!("输出路径: {}", url);
      OutputWrapper::from_url(url).with_context(|| format!("无法创建输出 {url}"))
    })
    .collect::<Result<Vec<_>>>()?;

  let metadata = args
    .metadata
    .as_deref()
    .map(serde_json::from_str::<Value>)
    .transpose()
    .context("metadata 不是合法 JSON")?;

  let task = OneShotTask::new(Analyzer::new(draw))
    .with_user_id(args.user_id)
    .with_metadata(metadata);
  let analysis = task.run_task(input, service, &outputs)?;

  print_json(&AnalysisResponse::new(
    analysis.record,
    analysis.annotated.as_ref(),
  ))?;
  Ok(ExitCode::SUCCESS)
}

fn results(store: &JsonFileStore, action: ResultsAction) -> Result<ExitCode> {
  match action {
    ResultsAction::List {
      user_id,
      status,
      limit,
      offset,
    } => {
      let query = ListQuery::default()
        .with_limit(limit)?
        .with_offset(offset)
        .with_user_id(user_id)
        .with_status(status);
      print_json(&ResultsListResponse::from(store.list(&query)?))?;
    }
    ResultsAction::Show {
      result_id,
      with_image,
    } => {
      let Some(record) = store.get(&result_id)? else {
        return not_found(&result_id);
      };
      let annotated = match (with_image, record.annotation) {
        (true, Some(source)) => store
          .image(&result_id)?
          .map(|bytes| AnnotatedImage::with_source(source, bytes)),
        _ => None,
      };
      print_json(&AnalysisResponse::new(record, annotated.as_ref()))?;
    }
    ResultsAction::Image { result_id, output } => {
      let Some(bytes) = store.image(&result_id)? else {
        return not_found(&result_id);
      };
      std::fs::write(&output, bytes)
        .with_context(|| format!("无法写入 {}", output.display()))?;
      info!("标注图像已导出到 {}", output.display());
    }
    ResultsAction::Delete { result_id } => {
      if !store.delete(&result_id)? {
        return not_found(&result_id);
      }
      print_json(&DeleteResponse::new(&result_id))?;
    }
    ResultsAction::Status { result_id, status } => {
      let Some(record) = store.update_status(&result_id, status)? else {
        return not_found(&result_id);
      };
      print_json(&AnalysisResponse::new(record, None).with_message(format!("状态已更新为 {status}")))?;
    }
    ResultsAction::Stats { user_id } => {
      let statistics = store.statistics(user_id.as_deref())?;
      print_json(&StatisticsResponse {
        success: true,
        user_id,
        statistics,
      })?;
    }
  }
  Ok(ExitCode::SUCCESS)
}

fn confirm(count: usize) -> Result<bool> {
  eprint!("将迁移 {count} 个 JSON 文件，是否继续? (yes/no): ");
  std::io::stderr().flush()?;
  let mut line = String::new();
  std::io::stdin().lock().read_line(&mut line)?;
  Ok(matches!(line.trim().to_lowercase().as_str(), "yes" | "y"))
}

fn migrate(args: MigrateArgs) -> Result<ExitCode> {
  let files = json_files(&args.from)
    .with_context(|| format!("无法读取目录 {}", args.from.display()))?;
  info!("在 {} 中找到 {} 个 JSON 文件", args.from.display(), files.len());

  if !files.is_empty() && !args.yes && !args.dry_run && !confirm(files.len())? {
    info!("迁移已取消");
    return Ok(ExitCode::SUCCESS);
  }

  let summary = if args.dry_run {
    migrate_dir(&args.from, &MemoryRecords::new())?
  } else {
    let store = JsonFileStore::from_url(&args.store)?;
    migrate_dir(&args.from, &store)?
  };

  print_json(&MigrationResponse::new(summary, args.dry_run))?;
  Ok(if summary.failed == 0 {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}

fn main() -> Result<ExitCode> {
  // 标准输出留给 JSON
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = args::Args::parse();
  match args.command {
    Command::Analyze(analyze_args) => analyze(analyze_args),
    Command::Results { store, action } => {
      let store = JsonFileStore::from_url(&store)
        .with_context(|| format!("无法打开结果目录 {store}"))?;
      results(&store, action)
    }
    Command::Migrate(migrate_args) => migrate(migrate_args),
  }
}
