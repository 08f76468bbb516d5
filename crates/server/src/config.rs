use std::{collections::HashMap, fs, str::FromStr};

use serde::Deserialize;
use server_api::AuthConfig;
use tracing::warn;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    pub login_max_attempts: u32,
    pub login_window_seconds: u64,
    pub max_import_bytes: usize,
    pub bcrypt_cost: u32,
    pub bootstrap_admin_username: Option<String>,
    pub bootstrap_admin_password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let auth = AuthConfig::default();
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/crm.db".into(),
            jwt_secret: auth.jwt_secret,
            token_ttl_seconds: auth.token_ttl_seconds,
            login_max_attempts: 5,
            login_window_seconds: 300,
            max_import_bytes: 5 * 1024 * 1024,
            bcrypt_cost: auth.bcrypt_cost,
            bootstrap_admin_username: None,
            bootstrap_admin_password: None,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, &file_cfg),
            Err(error) => warn!(%error, file = SETTINGS_FILE, "ignoring unreadable settings file"),
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("jwt_secret") {
        settings.jwt_secret = v.clone();
    }
    set_parsed(&mut settings.token_ttl_seconds, file_cfg.get("token_ttl_seconds"));
    set_parsed(&mut settings.login_max_attempts, file_cfg.get("login_max_attempts"));
    set_parsed(
        &mut settings.login_window_seconds,
        file_cfg.get("login_window_seconds"),
    );
    set_parsed(&mut settings.max_import_bytes, file_cfg.get("max_import_bytes"));
    set_parsed(&mut settings.bcrypt_cost, file_cfg.get("bcrypt_cost"));
    if let Some(v) = file_cfg.get("bootstrap_admin_username") {
        settings.bootstrap_admin_username = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("bootstrap_admin_password") {
        settings.bootstrap_admin_password = Some(v.clone());
    }
}

/// Later variables win: `APP__*` overrides the short legacy names.
fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = lookup("APP__JWT_SECRET") {
        settings.jwt_secret = v;
    }
    set_parsed(
        &mut settings.token_ttl_seconds,
        lookup("APP__TOKEN_TTL_SECONDS").as_ref(),
    );
    set_parsed(
        &mut settings.login_max_attempts,
        lookup("APP__LOGIN_MAX_ATTEMPTS").as_ref(),
    );
    set_parsed(
        &mut settings.login_window_seconds,
        lookup("APP__LOGIN_WINDOW_SECONDS").as_ref(),
    );
    set_parsed(
        &mut settings.max_import_bytes,
        lookup("APP__MAX_IMPORT_BYTES").as_ref(),
    );
    set_parsed(&mut settings.bcrypt_cost, lookup("APP__BCRYPT_COST").as_ref());

    if let Some(v) = lookup("APP__BOOTSTRAP_ADMIN_USERNAME") {
        settings.bootstrap_admin_username = Some(v);
    }
    if let Some(v) = lookup("APP__BOOTSTRAP_ADMIN_PASSWORD") {
        settings.bootstrap_admin_password = Some(v);
    }
}

fn set_parsed<T: FromStr>(slot: &mut T, raw: Option<&String>) {
    if let Some(parsed) = raw.and_then(|v| v.trim().parse::<T>().ok()) {
        *slot = parsed;
    }
}

impl Settings {
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.jwt_secret.clone(),
            token_ttl_seconds: self.token_ttl_seconds,
            bcrypt_cost: self.bcrypt_cost,
        }
    }
}

/// Turns plain file paths into `sqlite://` urls. Parent directories are
/// created by `Storage::new`.
pub fn prepare_database_url(raw_database_url: &str) -> String {
    normalize_database_url(raw_database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
