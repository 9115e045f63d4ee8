use crate::error::{CramError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `<spreadsheet_id>.xlsx` を置くフォルダ
    pub data_dir: Option<PathBuf>,
    pub books_master_id: String,
    pub students_master_id: String,
    pub books_sheet: String,
    pub students_sheet: String,
    pub preview_ttl_seconds: i64,
    pub plan_text_max_length: usize,
    pub books_find_limit: usize,
    pub students_find_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            books_master_id: "books_master".into(),
            students_master_id: "students_master".into(),
            books_sheet: "参考書マスター".into(),
            students_sheet: "生徒一覧".into(),
            preview_ttl_seconds: 300,
            plan_text_max_length: 52,
            books_find_limit: 20,
            students_find_limit: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let config = Self::load_from(&config_path)?;
        Ok(config.with_env_overrides())
    }

    /// 指定パスから読む（なければ既定値）
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| CramError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("cram-sheets").join("config.json"))
    }

    /// 環境変数を優先
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("CRAM_SHEETS_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(id) = std::env::var("CRAM_SHEETS_BOOKS_ID") {
            if !id.trim().is_empty() {
                self.books_master_id = id.trim().to_string();
            }
        }
        if let Ok(id) = std::env::var("CRAM_SHEETS_STUDENTS_ID") {
            if !id.trim().is_empty() {
                self.students_master_id = id.trim().to_string();
            }
        }
        self
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let home = dirs::home_dir()
                    .ok_or_else(|| CramError::Config("ホームディレクトリが見つかりません".into()))?;
                Ok(home.join(".config").join("cram-sheets").join("sheets"))
            }
        }
    }

    pub fn set_data_dir(&mut self, dir: PathBuf) -> Result<()> {
        self.data_dir = Some(dir);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.preview_ttl_seconds, 300);
        assert_eq!(config.plan_text_max_length, 52);
        assert_eq!(config.books_find_limit, 20);
        assert_eq!(config.students_find_limit, 10);
        assert_eq!(config.books_sheet, "参考書マスター");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"books_master_id": "abc"}"#).unwrap();
        assert_eq!(config.books_master_id, "abc");
        assert_eq!(config.students_sheet, "生徒一覧");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.plan_text_max_length = 40;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.plan_text_max_length, 40);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("none.json")).unwrap();
        assert_eq!(loaded.preview_ttl_seconds, 300);
    }
}
