use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_API_URL: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "qwen-mt-turbo";

const CONFIG_DIR: &str = ".cliptranslate";
const CONFIG_FILE: &str = "config.json";

/// Legacy key -> current key. Earlier entries win when several legacy keys
/// map to the same field.
const LEGACY_KEYS: &[(&str, &str)] = &[
    ("qwen_api_key", "chat_api_key"),
    ("qwen_api_url", "chat_api_url"),
    ("qwen_api_model", "chat_api_model"),
    ("api_key", "chat_api_key"),
    ("api_url", "chat_api_url"),
    ("api_model", "chat_api_model"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hotkey_to_chinese: String,
    pub hotkey_to_english: String,
    pub hotkey_to_emoji: String,
    pub chat_api_key: String,
    pub chat_api_url: String,
    pub chat_api_model: String,
    pub window_opacity: f32,
    pub chinese_threshold: usize,
    pub english_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hotkey_to_chinese: "f2".to_string(),
            hotkey_to_english: "f4".to_string(),
            hotkey_to_emoji: "f6".to_string(),
            chat_api_key: String::new(),
            chat_api_url: DEFAULT_API_URL.to_string(),
            chat_api_model: DEFAULT_MODEL.to_string(),
            window_opacity: 0.95,
            chinese_threshold: 300,
            english_threshold: 1000,
        }
    }
}

impl Config {
    /// `~/.cliptranslate`, created if missing. Failing here is fatal for startup.
    pub fn dir() -> Result<PathBuf, ConfigError> {
        let dir = dirs::home_dir().ok_or(ConfigError::NoHome)?.join(CONFIG_DIR);
        fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(Self::dir()?.join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::load_from(&Self::path()?))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// Never fails: unreadable or invalid files fall back to defaults. A
    /// missing file is created, a legacy file is rewritten in the new schema.
    pub fn load_from(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no config at {}, writing defaults", path.display());
                let cfg = Self::default();
                if let Err(e) = cfg.save_to(path) {
                    warn!("failed to write default config: {}", e);
                }
                return cfg;
            }
            Err(e) => {
                warn!("failed to read {}: {}; using defaults", path.display(), e);
                return Self::default();
            }
        };

        let map = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!("config root is not an object; using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!("config is not valid JSON ({}); using defaults", e);
                return Self::default();
            }
        };

        let migrated = needs_migration(&map);
        let cfg = Self::from_map(migrate(map));
        if migrated {
            info!("migrated legacy config keys");
            if let Err(e) = cfg.save_to(path) {
                warn!("failed to write migrated config: {}", e);
            }
        }
        cfg
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let s = serde_json::to_string_pretty(self)?;
        fs::write(path, s)?;
        info!("config saved to {}", path.display());
        Ok(())
    }

    /// Builds a config from an already-migrated map. Fields with the wrong
    /// type are replaced by their defaults one at a time.
    fn from_map(mut map: Map<String, Value>) -> Self {
        let defaults = match serde_json::to_value(Self::default()) {
            Ok(Value::Object(d)) => d,
            _ => Map::new(),
        };
        let parsed = serde_json::from_value::<Self>(Value::Object(map.clone()));
        let cfg = match parsed {
            Ok(cfg) => cfg,
            Err(_) => {
                for (key, default) in &defaults {
                    let Some(value) = map.get(key) else { continue };
                    let probe = Value::Object(Map::from_iter([(key.clone(), value.clone())]));
                    if serde_json::from_value::<Self>(probe).is_err() {
                        warn!("config key `{}` has an invalid value; using default", key);
                        map.insert(key.clone(), default.clone());
                    }
                }
                serde_json::from_value(Value::Object(map)).unwrap_or_default()
            }
        };
        cfg.normalized()
    }

    fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if !(0.0..=1.0).contains(&self.window_opacity) {
            warn!("window_opacity {} out of range", self.window_opacity);
            self.window_opacity = if self.window_opacity.is_nan() {
                defaults.window_opacity
            } else {
                self.window_opacity.clamp(0.0, 1.0)
            };
        }
        for (value, default) in [
            (&mut self.hotkey_to_chinese, defaults.hotkey_to_chinese),
            (&mut self.hotkey_to_english, defaults.hotkey_to_english),
            (&mut self.hotkey_to_emoji, defaults.hotkey_to_emoji),
        ] {
            if value.trim().is_empty() {
                *value = default;
            }
        }
        if self.chinese_threshold == 0 {
            self.chinese_threshold = defaults.chinese_threshold;
        }
        if self.english_threshold == 0 {
            self.english_threshold = defaults.english_threshold;
        }
        self
    }
}

fn needs_migration(map: &Map<String, Value>) -> bool {
    let known = match serde_json::to_value(Config::default()) {
        Ok(Value::Object(d)) => d,
        _ => return false,
    };
    map.keys().any(|k| !known.contains_key(k))
}

/// Rewrites a config object from the legacy schema. Pure: the same input
/// always yields the same output. Current keys already present are kept,
/// recognized legacy keys fill the gaps, everything unrecognized is dropped.
pub fn migrate(mut map: Map<String, Value>) -> Map<String, Value> {
    for (old, new) in LEGACY_KEYS {
        if let Some(value) = map.remove(*old) {
            map.entry(new.to_string()).or_insert(value);
        }
    }
    let known = match serde_json::to_value(Config::default()) {
        Ok(Value::Object(d)) => d,
        _ => return map,
    };
    map.retain(|k, _| known.contains_key(k));
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn migrate_renames_plain_api_keys() {
        let out = migrate(obj(json!({
            "api_key": "old_key",
            "api_url": "old_url",
            "api_model": "old_model",
        })));
        assert_eq!(out["chat_api_key"], "old_key");
        assert_eq!(out["chat_api_url"], "old_url");
        assert_eq!(out["chat_api_model"], "old_model");
        assert!(!out.contains_key("api_key"));
    }

    #[test]
    fn migrate_maps_qwen_keys_and_drops_translator_type() {
        let out = migrate(obj(json!({
            "qwen_api_key": "qwen_key",
            "qwen_api_url": "qwen_url",
            "qwen_api_model": "qwen_model",
            "translator_type": "qwen",
        })));
        assert_eq!(out["chat_api_key"], "qwen_key");
        assert_eq!(out["chat_api_url"], "qwen_url");
        assert_eq!(out["chat_api_model"], "qwen_model");
        assert!(!out.contains_key("translator_type"));
    }

    #[test]
    fn migrate_prefers_current_then_qwen_then_plain() {
        let out = migrate(obj(json!({
            "chat_api_key": "current",
            "qwen_api_key": "qwen",
            "api_key": "plain",
            "qwen_api_model": "qwen_model",
            "api_model": "plain_model",
            "api_url": "plain_url",
        })));
        assert_eq!(out["chat_api_key"], "current");
        assert_eq!(out["chat_api_model"], "qwen_model");
        assert_eq!(out["chat_api_url"], "plain_url");
    }

    #[test]
    fn migrate_is_deterministic() {
        let input = obj(json!({
            "api_key": "k",
            "hotkey_to_chinese": "f3",
            "mystery": 1,
        }));
        let a = migrate(input.clone());
        let b = migrate(input);
        assert_eq!(a, b);
        assert_eq!(a["hotkey_to_chinese"], "f3");
        assert!(!a.contains_key("mystery"));
    }

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = Config::load_from(&path);
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn load_fills_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"hotkey_to_chinese": "f5", "window_opacity": 0.9}"#).unwrap();

        let cfg = Config::load_from(&path);
        assert_eq!(cfg.hotkey_to_chinese, "f5");
        assert_eq!(cfg.window_opacity, 0.9);
        assert_eq!(cfg.hotkey_to_english, "f4");
        assert_eq!(cfg.chat_api_url, DEFAULT_API_URL);
    }

    #[test]
    fn legacy_file_is_rewritten_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"api_key": "old_key", "translator_type": "qwen", "hotkey_to_english": "f7"}"#,
        )
        .unwrap();

        let cfg = Config::load_from(&path);
        assert_eq!(cfg.chat_api_key, "old_key");
        assert_eq!(cfg.hotkey_to_english, "f7");

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["chat_api_key"], "old_key");
        assert!(on_disk.get("api_key").is_none());
        assert!(on_disk.get("translator_type").is_none());
    }

    #[test]
    fn load_save_reload_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"qwen_api_key": "abc", "chinese_threshold": 120}"#).unwrap();

        let first = Config::load_from(&path);
        first.save_to(&path).unwrap();
        let second = Config::load_from(&path);
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_values_fall_back_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"chinese_threshold": "lots", "hotkey_to_chinese": "f9", "window_opacity": 3.5}"#,
        )
        .unwrap();

        let cfg = Config::load_from(&path);
        assert_eq!(cfg.chinese_threshold, 300);
        assert_eq!(cfg.hotkey_to_chinese, "f9");
        assert_eq!(cfg.window_opacity, 1.0);
    }

    #[test]
    fn garbage_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json at all").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}
