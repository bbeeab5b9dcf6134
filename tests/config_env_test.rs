use reconf::Settings;
use reconf::config::PolicyKind;
use std::env;
use tempfile::TempDir;

#[test]
fn test_env_overrides_nested_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("reconf.toml");
    std::fs::write(
        &config_path,
        "manifest_path = \"from-file.yml\"\n\n[render]\nconcurrency = 4\n",
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("RECONF_RENDER__CONCURRENCY", "16");
        env::set_var("RECONF_RENDER__POLICY", "throttle");
        env::set_var("RECONF_WATCH__AWAIT_WRITE_MS", "0");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("RECONF_RENDER__CONCURRENCY");
        env::remove_var("RECONF_RENDER__POLICY");
        env::remove_var("RECONF_WATCH__AWAIT_WRITE_MS");
    }

    // Env wins over the file, the file wins over defaults
    assert_eq!(settings.render.concurrency, 16);
    assert_eq!(settings.render.policy, PolicyKind::Throttle);
    assert!(settings.watch.stability().is_none());
    assert_eq!(settings.manifest_path.to_string_lossy(), "from-file.yml");
    assert_eq!(settings.render.batch_delay_ms, 1000);
}
