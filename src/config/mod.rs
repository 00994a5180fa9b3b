// 配置管理模块

use crate::uploader::MIN_PART_SIZE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 应用服务器配置
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 应用服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// 服务器基地址，例如 https://app.example.com/
    pub base_url: String,
    /// Bearer 认证令牌（可选，预签名 URL 请求不携带）
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// 单个 HTTP 请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 多分片阈值（字节），低于此值走直传
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,
    /// 分片并发上限（窗口大小）
    #[serde(default = "default_part_concurrency")]
    pub part_concurrency: usize,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_multipart_threshold() -> u64 {
    // 与服务端最小分片约束一致
    MIN_PART_SIZE
}

fn default_part_concurrency() -> usize {
    3
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: default_multipart_threshold(),
            part_concurrency: default_part_concurrency(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

impl UploadConfig {
    /// 校验配置可用性
    pub fn validate(&self) -> Result<()> {
        if self.part_concurrency == 0 {
            anyhow::bail!("分片并发数不能为 0");
        }
        if self.multipart_threshold == 0 {
            anyhow::bail!("多分片阈值不能为 0");
        }
        Ok(())
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {}", path))?;

        let config: AppConfig =
            toml::from_str(&content).context("解析配置文件失败")?;
        config.upload.validate().context("上传配置无效")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload.validate().context("上传配置无效")?;

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {}", path))?;

        Ok(())
    }
}
