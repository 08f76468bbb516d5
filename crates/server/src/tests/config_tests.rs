use super::*;

use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
}

#[test]
fn app_prefixed_env_overrides_legacy_names() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("SERVER_BIND", "0.0.0.0:1"),
        ("APP__BIND_ADDR", "0.0.0.0:2"),
        ("DATABASE_URL", "sqlite://a.db"),
        ("APP__LOGIN_MAX_ATTEMPTS", "9"),
        ("APP__BCRYPT_COST", "not-a-number"),
        ("APP__BOOTSTRAP_ADMIN_USERNAME", "root"),
    ]);
    let mut settings = Settings::default();
    apply_env(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_bind, "0.0.0.0:2");
    assert_eq!(settings.database_url, "sqlite://a.db");
    assert_eq!(settings.login_max_attempts, 9);
    assert_eq!(settings.bcrypt_cost, Settings::default().bcrypt_cost);
    assert_eq!(settings.bootstrap_admin_username.as_deref(), Some("root"));
}

#[test]
fn settings_file_values_are_applied() {
    let file_cfg: HashMap<String, String> = toml::from_str(
        r#"
        bind_addr = "127.0.0.1:9000"
        max_import_bytes = "1024"
        jwt_secret = "from-file"
        "#,
    )
    .expect("toml");
    let mut settings = Settings::default();
    apply_file(&mut settings, &file_cfg);

    assert_eq!(settings.server_bind, "127.0.0.1:9000");
    assert_eq!(settings.max_import_bytes, 1024);
    assert_eq!(settings.auth_config().jwt_secret, "from-file");
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("lead_desk_server_open_test_{suffix}"));
    let db_path = temp_root.join("nested").join("server.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref());
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );

    fs::remove_dir_all(temp_root).expect("cleanup");
}
