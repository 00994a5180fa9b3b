// 分片直传
//
// 把单个分片的字节写入预签名 URL（一次 PUT，成功即 2xx），
// 从响应头提取 ETag 作为完成令牌。本层不做重试。
//
// 取消语义：请求与取消令牌竞争，令牌触发时放弃在途请求立即返回，
// 而不是只在下一个分片开始前检查标志。

use crate::uploader::{PartDescriptor, UploadError};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, ETAG};
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 单分片传输单元
///
/// 抽象成 trait 以便调度器/协调器测试注入假传输。
#[async_trait]
pub trait PartTransport: Send + Sync {
    /// 上传一个分片的字节到预签名 URL
    ///
    /// # 返回
    /// 归一化后的完成令牌（ETag，已去引号；响应头缺失时为空字符串）
    async fn transfer(
        &self,
        part: &PartDescriptor,
        data: Vec<u8>,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError>;
}

/// 基于 reqwest 的分片传输实现
#[derive(Debug, Clone)]
pub struct HttpPartTransport {
    /// HTTP 客户端（预签名 URL 自带授权，除内容类型外不加任何头）
    client: Client,
}

impl HttpPartTransport {
    /// 创建分片传输单元
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("创建传输客户端失败")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PartTransport for HttpPartTransport {
    async fn transfer(
        &self,
        part: &PartDescriptor,
        data: Vec<u8>,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        debug!(
            "[分片#{}] 开始直传 (大小: {} bytes)",
            part.part_number,
            data.len()
        );

        let request = self
            .client
            .put(&part.presigned_url)
            .header(CONTENT_TYPE, content_type)
            .body(data)
            .send();

        // 在途请求与取消令牌竞争
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("[分片#{}] 在途请求被取消", part.part_number);
                return Err(UploadError::Cancelled);
            }
            resp = request => resp.map_err(|e| UploadError::PartTransfer {
                part_number: part.part_number,
                reason: e.to_string(),
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::PartTransfer {
                part_number: part.part_number,
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        // 提取完成令牌；存储偶尔不回 ETag，视为成功但令牌为空
        let etag = match response.headers().get(ETAG) {
            Some(value) => normalize_etag(value.to_str().unwrap_or_default()),
            None => {
                warn!(
                    "[分片#{}] 响应缺少 ETag 头，记为空令牌",
                    part.part_number
                );
                String::new()
            }
        };

        debug!("[分片#{}] 直传成功, etag={}", part.part_number, etag);
        Ok(etag)
    }
}

/// 归一化完成令牌
///
/// 存储返回的 ETag 通常带一对双引号（`"d41d8cd9..."`），只剥离最外层
/// 一对；complete 接口收到的是去引号后的字节。
pub fn normalize_etag(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner.to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_quoted_etag() {
        assert_eq!(normalize_etag("\"abc123\""), "abc123");
        assert_eq!(normalize_etag("abc123"), "abc123");
    }

    #[test]
    fn test_normalize_strips_single_pair_only() {
        // 只剥最外层一对引号
        assert_eq!(normalize_etag("\"\"abc\"\""), "\"abc\"");
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        assert_eq!(normalize_etag("  \"abc\"  "), "abc");
        assert_eq!(normalize_etag(""), "");
    }

    #[test]
    fn test_normalize_unbalanced_quotes_kept() {
        assert_eq!(normalize_etag("\"abc"), "\"abc");
        assert_eq!(normalize_etag("abc\""), "abc\"");
    }
}
