use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// 配置文件结构
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub lexicon: LexiconConfig,
    pub import: ImportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub db_file: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_file: "data/lexicon.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LexiconConfig {
    pub data_file: String,
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            data_file: "data/lexicon.json".to_string(),
        }
    }
}

// 目录导入设置
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImportConfig {
    // 目录导入时接受的扩展名（不含点）
    pub extensions: Vec<String>,
    // 音频文件名各位置字段之间的分隔符
    pub filename_delimiter: char,
    // 可选的逐文件元数据 JSON 列表，按 filename 索引
    pub metadata_file: Option<String>,
    // 是否在导入目录写入 import_results.json
    pub write_report: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            extensions: ["wav", "mp3", "flac", "m4a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            filename_delimiter: '_',
            metadata_file: None,
            write_report: true,
        }
    }
}

impl ImportConfig {
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Config> {
        Self::from_file("config.toml")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config_content = std::fs::read_to_string(path)
            .with_context(|| format!("配置文件 {} 不存在或无法读取", path.display()))?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Config> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("配置文件解析失败: {}", e))
    }
}
