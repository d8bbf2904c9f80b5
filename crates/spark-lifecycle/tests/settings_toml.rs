//! 从 TOML 片段加载 `LifecycleSettings`。

use spark_lifecycle::{ConfigError, LifecycleSettings};

#[test]
fn reads_the_lifecycle_table() {
    let settings = LifecycleSettings::from_toml_str(
        r#"
        [lifecycle]
        label = "provider.orders"
        spin_limit = 16
        park_micros = 200
        "#,
    )
    .expect("配置合法");
    assert_eq!(settings.label, "provider.orders");
    assert_eq!(settings.spin_limit, 16);
    assert_eq!(settings.park_micros, 200);
}

#[test]
fn missing_fields_fall_back_to_defaults() {
    let settings = LifecycleSettings::from_toml_str("[lifecycle]\nlabel = \"consumer\"\n")
        .expect("配置合法");
    assert_eq!(
        settings,
        LifecycleSettings {
            label: "consumer".to_owned(),
            ..LifecycleSettings::default()
        }
    );

    let untouched = LifecycleSettings::from_toml_str("[server]\nport = 8080\n").expect("配置合法");
    assert_eq!(untouched, LifecycleSettings::default());
}

#[test]
fn zero_backoff_fails_validation() {
    let error = LifecycleSettings::from_toml_str("[lifecycle]\nspin_limit = 0\npark_micros = 0\n")
        .expect_err("既不自旋也不休眠");
    assert!(matches!(error, ConfigError::Invalid(_)));
}

#[test]
fn unknown_fields_and_bad_syntax_are_parse_errors() {
    let unknown = LifecycleSettings::from_toml_str("[lifecycle]\nretries = 3\n")
        .expect_err("未知字段");
    assert!(matches!(unknown, ConfigError::Parse(_)));

    let broken = LifecycleSettings::from_toml_str("[lifecycle\nlabel = ").expect_err("语法错误");
    assert!(matches!(broken, ConfigError::Parse(_)));
    assert!(broken.to_string().starts_with("failed to parse lifecycle settings"));
}
