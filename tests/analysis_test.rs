// 该文件是 Huakuang （画框） 项目的一部分。
// tests/analysis_test.rs - 分析流程测试
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

#![cfg(all(feature = "directory_record", feature = "save_image_file"))]

use std::io::Cursor;
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use huakuang::{
  FromUrl,
  detection::AnnotationSource,
  inference::RecordedInference,
  input::ImageFileInput,
  migrate::migrate_dir,
  output::{JsonFileStore, OutputWrapper, draw::Draw},
  record::{ListQuery, ResultRepository, Status},
  task::{Analyzer, OneShotTask, Task},
};
use serde_json::json;
use url::Url;

fn write_jpeg(path: &Path, width: u32, height: u32) {
  let mut data = Vec::new();
  image::RgbImage::from_pixel(width, height, image::Rgb([90, 90, 90]))
    .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Jpeg)
    .unwrap();
  std::fs::write(path, data).unwrap();
}

fn url(scheme: &str, path: &Path) -> Url {
  Url::parse(&format!("{scheme}://{}", path.display())).unwrap()
}

fn run(
  image: &Path,
  inference: &Path,
  outputs: &[Url],
  user_id: Option<&str>,
) -> huakuang::task::Analysis {
  let input = ImageFileInput::from_url(&url("image", image)).unwrap();
  let service = RecordedInference::from_url(&url("json", inference)).unwrap();
  let outputs: Vec<_> = outputs
    .iter()
    .map(|url| OutputWrapper::from_url(url).unwrap())
    .collect();

  OneShotTask::new(Analyzer::new(Draw::new().unwrap()))
    .with_user_id(user_id.map(str::to_string))
    .with_metadata(Some(json!({"camera": "gate"})))
    .run_task(input, service, &outputs)
    .unwrap()
}

#[test]
fn analyze_store_and_query() {
  let dir = tempfile::tempdir().unwrap();
  let image = dir.path().join("gate.jpg");
  write_jpeg(&image, 160, 120);

  let inference = dir.path().join("gate.json");
  std::fs::write(
    &inference,
    json!([{
      "predictions": {"predictions": [
        {"class": "person", "confidence": 0.91, "x": 80, "y": 60, "width": 40, "height": 80},
        {"class": "car", "confidence": 0.55, "x": 30, "y": 90, "width": 50, "height": 30},
        {"class": "bike"}
      ]}
    }])
    .to_string(),
  )
  .unwrap();

  let store_root = dir.path().join("store");
  let annotated = dir.path().join("out/gate_annotated.jpg");
  let analysis = run(
    &image,
    &inference,
    &[url("folder", &store_root), url("image", &annotated)],
    Some("alice"),
  );

  assert_eq!(analysis.record.prediction_count, 2);
  assert_eq!(analysis.record.dropped_count, 1);
  assert_eq!(analysis.record.annotation, Some(AnnotationSource::Local));
  assert_eq!(analysis.record.metadata, Some(json!({"camera": "gate"})));

  let rendered = image::open(&annotated).unwrap();
  assert_eq!((rendered.width(), rendered.height()), (160, 120));

  let store = JsonFileStore::open(&store_root).unwrap();
  let id = analysis.record.result_id.clone();
  assert_eq!(store.get(&id).unwrap(), Some(analysis.record.clone()));
  assert_eq!(
    store.image(&id).unwrap(),
    analysis.annotated.as_ref().map(|image| image.bytes().to_vec())
  );

  let page = store
    .list(&ListQuery::default().with_user_id(Some("alice".into())))
    .unwrap();
  assert_eq!(page.total_count, 1);
  assert_eq!(page.results[0].prediction_count, 2);

  store.update_status(&id, Status::Failed).unwrap();
  let stats = store.statistics(None).unwrap();
  assert_eq!(stats.total_analyses, 1);
  assert_eq!(stats.total_predictions, 2);
  assert_eq!(stats.status_counts[&Status::Failed], 1);
  assert_eq!(stats.status_counts[&Status::Completed], 0);

  assert!(store.delete(&id).unwrap());
  assert!(store.get(&id).unwrap().is_none());
  assert!(store.image(&id).unwrap().is_none());
}

#[test]
fn pre_rendered_image_is_stored_verbatim() {
  let dir = tempfile::tempdir().unwrap();
  let image = dir.path().join("in.jpg");
  write_jpeg(&image, 32, 32);

  let mut returned = Vec::new();
  image::RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 0]))
    .write_to(&mut Cursor::new(&mut returned), image::ImageFormat::Png)
    .unwrap();

  let inference = dir.path().join("result.json");
  std::fs::write(
    &inference,
    json!({
      "predictions": [
        {"class_name": "cat", "confidence": 0.7, "x": 4, "y": 4, "width": 2, "height": 2}
      ],
      "output_image": STANDARD.encode(&returned)
    })
    .to_string(),
  )
  .unwrap();

  let store_root = dir.path().join("store");
  let analysis = run(&image, &inference, &[url("folder", &store_root)], None);
  assert_eq!(analysis.record.annotation, Some(AnnotationSource::Api));

  let store = JsonFileStore::open(&store_root).unwrap();
  assert_eq!(
    store.image(&analysis.record.result_id).unwrap(),
    Some(returned)
  );
}

#[test]
fn migrated_results_are_listed() {
  let dir = tempfile::tempdir().unwrap();
  let legacy = dir.path().join("data/output_json");
  std::fs::create_dir_all(&legacy).unwrap();
  std::fs::write(
    legacy.join("photo_20250929_123130.json"),
    r#"[{"predictions": {"predictions": [
      {"class": "dog", "confidence": 0.9, "x": 1, "y": 1, "width": 1, "height": 1}
    ]}}]"#,
  )
  .unwrap();
  std::fs::write(legacy.join("broken.json"), "[").unwrap();

  let store = JsonFileStore::open(dir.path().join("store")).unwrap();
  let summary = migrate_dir(&legacy, &store).unwrap();
  assert_eq!(summary.total_files, 2);
  assert_eq!(summary.migrated, 1);
  assert_eq!(summary.failed, 1);
  assert_eq!(summary.total_predictions, 1);

  let page = store.list(&ListQuery::default()).unwrap();
  assert_eq!(page.total_count, 1);
  assert_eq!(page.results[0].filename, "photo_20250929_123130.jpg");
}
