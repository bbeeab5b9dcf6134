//! Config unit lifecycle: initial pass, source-driven batches, hooks and isolation.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reconf::config::Settings;
use reconf::manifest::{ConfigUnit, parse_manifest};
use reconf::render::{JinjaRenderer, Renderer, ValuesLoader};
use reconf::unit::{UnitRunner, UnitRuntime, UnitState};
use tempfile::TempDir;

use common::{CountingRenderer, line_count, test_settings, wait_for_content, wait_until};

fn unit(root: &Path, manifest: &str) -> ConfigUnit {
    parse_manifest(manifest, &root.join("config.yml"), root)
        .unwrap()
        .remove(0)
}

fn runtime_with(settings: &Settings, renderer: Arc<dyn Renderer>) -> UnitRuntime {
    UnitRuntime::from_settings(settings, renderer, Arc::new(ValuesLoader))
}

fn runtime(root: &Path) -> UnitRuntime {
    runtime_with(&test_settings(root), Arc::new(JinjaRenderer::new()))
}

#[tokio::test]
async fn test_data_source_change_rerenders_and_fires_unit_hook_once() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let r = root.display();
    std::fs::write(root.join("data.yaml"), "port: 80\n").unwrap();
    std::fs::write(root.join("a.tmpl"), "port={{ cfg.port }}").unwrap();

    let manifest = format!(
        r#"
watch: true
datasources:
  - url: data.yaml
    alias: cfg
files:
  - input_path: a.tmpl
    output_path: a.out
on_change: ["sh", "-c", "cat {r}/a.out >> {r}/hook.log; echo >> {r}/hook.log"]
"#
    );

    let runner = UnitRunner::start(unit(root, &manifest), &runtime(root))
        .await
        .unwrap();
    assert_eq!(runner.state(), UnitState::Active);
    assert!(runner.is_watching());
    assert_eq!(std::fs::read_to_string(root.join("a.out")).unwrap(), "port=80");

    std::fs::write(root.join("data.yaml"), "port: 8080\n").unwrap();
    assert!(wait_for_content(&root.join("a.out"), "port=8080").await);

    let hook_log = root.join("hook.log");
    assert!(wait_until(Duration::from_secs(5), || line_count(&hook_log) == 1).await);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(std::fs::read_to_string(&hook_log).unwrap(), "port=8080\n");

    runner.shutdown().await;
}

#[tokio::test]
async fn test_sources_do_not_render_before_init() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("values.yaml"), "name: svc\n").unwrap();
    std::fs::write(root.join("partial.tmpl"), "unused").unwrap();
    std::fs::write(root.join("a.tmpl"), "{{ values.name }}").unwrap();

    let manifest = r#"
watch: true
templates: [partial.tmpl]
datasources: [values.yaml]
files:
  - input_path: a.tmpl
    output_path: a.out
"#;

    let renderer = CountingRenderer::new();
    let runtime = runtime_with(&test_settings(root), renderer.clone());
    let runner = UnitRunner::start(unit(root, manifest), &runtime).await.unwrap();

    // Source scans filled their caches but only the file's own pass rendered
    assert_eq!(runner.caches().datasources.read().len(), 1);
    assert_eq!(runner.caches().templates.read().len(), 1);
    assert_eq!(renderer.calls(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(renderer.calls(), 1);
    assert_eq!(std::fs::read_to_string(root.join("a.out")).unwrap(), "svc");

    runner.shutdown().await;
}

#[tokio::test]
async fn test_rapid_changes_coalesce_into_one_render() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.tmpl"), "v0").unwrap();

    let manifest = r#"
watch: true
files:
  - input_path: a.tmpl
    output_path: a.out
"#;

    let mut settings = test_settings(root);
    settings.render.file_delay_ms = 200;
    let renderer = CountingRenderer::new();
    let runtime = runtime_with(&settings, renderer.clone());
    let runner = UnitRunner::start(unit(root, manifest), &runtime).await.unwrap();
    assert_eq!(renderer.calls(), 1);

    for i in 1..=5 {
        std::fs::write(root.join("a.tmpl"), format!("v{i}")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(wait_for_content(&root.join("a.out"), "v5").await);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(renderer.calls(), 2);

    runner.shutdown().await;
}

#[tokio::test]
async fn test_failing_file_does_not_block_siblings() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let r = root.display();
    std::fs::write(root.join("good.tmpl"), "ok").unwrap();
    std::fs::write(root.join("bad.tmpl"), "{{ broken").unwrap();

    let manifest = format!(
        r#"
files:
  - input_path: good.tmpl
    output_path: good.out
    on_change: ["touch", "{r}/good.hook"]
  - input_path: bad.tmpl
    output_path: bad.out
"#
    );

    let runtime = runtime(root);
    let runner = UnitRunner::start(unit(root, &manifest), &runtime).await.unwrap();

    assert_eq!(std::fs::read_to_string(root.join("good.out")).unwrap(), "ok");
    assert!(!root.join("bad.out").exists());
    assert!(wait_until(Duration::from_secs(5), || root.join("good.hook").exists()).await);
    assert_eq!(runtime.sink.count(), 1);
    // One-shot units close their sessions after the initial pass
    assert!(!runner.is_watching());

    runner.shutdown().await;
}

#[tokio::test]
async fn test_partial_batch_still_fires_hooks() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let r = root.display();
    std::fs::write(root.join("data.yaml"), "v: 1\n").unwrap();
    std::fs::write(root.join("good.tmpl"), "{{ data.v }}").unwrap();
    std::fs::write(root.join("bad.tmpl"), "{% if %}").unwrap();

    let manifest = format!(
        r#"
watch: true
datasources:
  - url: data.yaml
    alias: data
    on_change: ["sh", "-c", "echo source >> {r}/hook.log"]
files:
  - input_path: good.tmpl
    output_path: good.out
  - input_path: bad.tmpl
    output_path: bad.out
on_change: ["sh", "-c", "echo unit >> {r}/hook.log"]
"#
    );

    let runtime = runtime(root);
    let runner = UnitRunner::start(unit(root, &manifest), &runtime).await.unwrap();
    assert_eq!(runtime.sink.count(), 1);

    std::fs::write(root.join("data.yaml"), "v: 2\n").unwrap();
    assert!(wait_for_content(&root.join("good.out"), "2").await);

    let hook_log = root.join("hook.log");
    assert!(wait_until(Duration::from_secs(5), || line_count(&hook_log) == 2).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut lines: Vec<String> = std::fs::read_to_string(&hook_log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    assert_eq!(lines, vec!["source", "unit"]);

    // The batch failure is reported once more
    assert!(wait_until(Duration::from_secs(5), || runtime.sink.count() == 2).await);

    runner.shutdown().await;
}

#[tokio::test]
async fn test_failed_batch_skips_hooks() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let r = root.display();
    std::fs::write(root.join("data.yaml"), "v: 1\n").unwrap();
    std::fs::write(root.join("a.tmpl"), "{% if %}").unwrap();
    std::fs::write(root.join("b.tmpl"), "{{ broken").unwrap();

    let manifest = format!(
        r#"
watch: true
datasources:
  - url: data.yaml
    alias: data
    on_change: ["sh", "-c", "echo source >> {r}/hook.log"]
files:
  - input_path: a.tmpl
    output_path: a.out
  - input_path: b.tmpl
    output_path: b.out
on_change: ["sh", "-c", "echo unit >> {r}/hook.log"]
"#
    );

    let runtime = runtime(root);
    let runner = UnitRunner::start(unit(root, &manifest), &runtime).await.unwrap();
    assert_eq!(runtime.sink.count(), 2);

    std::fs::write(root.join("data.yaml"), "v: 2\n").unwrap();

    // One report for the whole batch
    assert!(wait_until(Duration::from_secs(5), || runtime.sink.count() == 3).await);
    runtime.hooks.close();
    runtime.hooks.wait().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runtime.sink.count(), 3);
    assert!(!root.join("hook.log").exists());
    assert!(!root.join("a.out").exists());
    assert!(!root.join("b.out").exists());

    runner.shutdown().await;
}

#[tokio::test]
async fn test_failing_hook_keeps_render_successful() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.tmpl"), "done").unwrap();

    let manifest = r#"
files:
  - input_path: a.tmpl
    output_path: a.out
    on_change:
      command: ["sh", "-c", "echo failing hook >&2; exit 2"]
      stderr: true
"#;

    let runtime = runtime(root);
    let runner = UnitRunner::start(unit(root, manifest), &runtime).await.unwrap();

    assert_eq!(std::fs::read_to_string(root.join("a.out")).unwrap(), "done");
    runtime.hooks.close();
    runtime.hooks.wait().await;
    assert_eq!(runtime.sink.count(), 0);

    runner.shutdown().await;
}

#[tokio::test]
async fn test_path_matched_twice_gets_one_entry() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.tmpl"), "once").unwrap();

    let manifest = r#"
files:
  - input_path: a.tmpl
    output_path: out/a
  - input_path: "*.tmpl"
    output_path: other/[name]
"#;

    let renderer = CountingRenderer::new();
    let runtime = runtime_with(&test_settings(root), renderer.clone());
    let runner = UnitRunner::start(unit(root, manifest), &runtime).await.unwrap();

    assert_eq!(runner.caches().files.read().len(), 1);
    assert_eq!(renderer.calls(), 1);
    assert_eq!(std::fs::read_to_string(root.join("out/a")).unwrap(), "once");
    assert!(!root.join("other").exists());

    runner.shutdown().await;
}

#[tokio::test]
async fn test_output_name_follows_input() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("tmpl")).unwrap();
    std::fs::write(root.join("tmpl/app.tmpl"), "app").unwrap();
    std::fs::write(root.join("tmpl/db.conf.tmpl"), "db").unwrap();

    let manifest = r#"
files:
  - input_path: tmpl/*.tmpl
    output_path: out/[name].out
"#;

    let runner = UnitRunner::start(unit(root, manifest), &runtime(root))
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(root.join("out/app.out")).unwrap(), "app");
    assert_eq!(std::fs::read_to_string(root.join("out/db.conf.out")).unwrap(), "db");

    runner.shutdown().await;
}

#[tokio::test]
async fn test_custom_environment_reloads() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("env.yaml"), "region: eu\n").unwrap();
    std::fs::write(root.join("a.tmpl"), "{{ region }}").unwrap();

    let manifest = r#"
watch: true
custom: [env.yaml]
files:
  - input_path: a.tmpl
    output_path: a.out
"#;

    let runner = UnitRunner::start(unit(root, manifest), &runtime(root))
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(root.join("a.out")).unwrap(), "eu");
    assert_eq!(runner.environment().globals["region"], "eu");

    std::fs::write(root.join("env.yaml"), "region: us-east\n").unwrap();
    assert!(wait_for_content(&root.join("a.out"), "us-east").await);

    runner.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_rendering() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.tmpl"), "before").unwrap();

    let manifest = r#"
watch: true
files:
  - input_path: a.tmpl
    output_path: a.out
"#;

    let runner = UnitRunner::start(unit(root, manifest), &runtime(root))
        .await
        .unwrap();
    runner.shutdown().await;

    std::fs::write(root.join("a.tmpl"), "after").unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(std::fs::read_to_string(root.join("a.out")).unwrap(), "before");
}
