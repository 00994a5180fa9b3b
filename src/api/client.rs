// 应用服务器客户端实现
//
// 多分片上传协议的服务端协作方：
// - initiate    创建会话，下发分片大小与预签名 URL
// - report-part 上报单个分片完成（失败非致命）
// - complete    按编号升序提交全部 etag，合并对象
// - abort       中止会话（失败非致命）
// - status      查询会话状态快照
// - simple      小文件单次 multipart 表单直传
//
// 认证方式为 Bearer 凭证；对象存储侧的授权完全编码在预签名 URL 中。

use crate::api::types::{
    CompleteRequest, InitiateRequest, InitiateResponse, ReportPartRequest, SimpleUploadRequest,
    UploadOutcome, UploadStatusResponse,
};
use crate::config::ApiConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// 传输进度回调：(已发送字节数, 总字节数)
pub type TransferProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 简单上传的流式读块大小: 64KB
const SIMPLE_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

// API 路由
const INITIATE_ROUTE: &str = "api/uploads/initiate";
const REPORT_PART_ROUTE: &str = "api/uploads/report-part";
const COMPLETE_ROUTE: &str = "api/uploads/complete";
const ABORT_ROUTE: &str = "api/uploads/abort";
const SIMPLE_UPLOAD_ROUTE: &str = "api/uploads/simple";

/// 应用服务器上传 API
///
/// 抽象成 trait 以便在不发起网络请求的情况下测试协调器的状态机。
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// 创建多分片上传会话
    async fn initiate(&self, req: &InitiateRequest) -> Result<InitiateResponse>;

    /// 上报单个分片完成（调用方对失败做降级处理）
    async fn report_part(&self, req: &ReportPartRequest) -> Result<()>;

    /// 提交全部分片，合并对象
    async fn complete(&self, req: &CompleteRequest) -> Result<UploadOutcome>;

    /// 中止上传会话
    async fn abort_upload(&self, upload_id: &str) -> Result<()>;

    /// 查询会话状态快照
    async fn upload_status(&self, upload_id: &str) -> Result<UploadStatusResponse>;

    /// 小文件单次表单上传，progress 以 (已发送, 总大小) 持续回调
    async fn simple_upload(
        &self,
        req: &SimpleUploadRequest,
        progress: TransferProgressFn,
    ) -> Result<UploadOutcome>;
}

/// 应用服务器 HTTP 客户端
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// HTTP 客户端
    client: Client,
    /// 服务器基地址
    base_url: Url,
    /// Bearer 凭证（由嵌入方提供）
    bearer_token: Option<String>,
}

impl ApiClient {
    /// 创建新的应用服务器客户端
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("无效的服务器地址: {}", config.base_url))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("创建 HTTP 客户端失败")?;

        info!("初始化上传 API 客户端: base_url={}", base_url);

        Ok(Self {
            client,
            base_url,
            bearer_token: config.bearer_token.clone(),
        })
    }

    /// 拼接接口地址
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("拼接接口地址失败: {}", path))
    }

    /// 附加 Bearer 认证
    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// 读取响应；非 2xx 时把状态码和响应体一起带出
    async fn expect_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{} 失败: HTTP {} {}", what, status.as_u16(), body)
    }
}

#[async_trait]
impl UploadApi for ApiClient {
    async fn initiate(&self, req: &InitiateRequest) -> Result<InitiateResponse> {
        debug!(
            "initiate: filename={}, size={}, folder={}",
            req.filename, req.file_size, req.target_folder
        );

        let resp = self
            .with_auth(self.client.post(self.endpoint(INITIATE_ROUTE)?))
            .json(req)
            .send()
            .await
            .context("initiate 请求发送失败")?;

        let resp = Self::expect_success(resp, "initiate").await?;
        resp.json::<InitiateResponse>()
            .await
            .context("解析 initiate 响应失败")
    }

    async fn report_part(&self, req: &ReportPartRequest) -> Result<()> {
        let resp = self
            .with_auth(self.client.post(self.endpoint(REPORT_PART_ROUTE)?))
            .json(req)
            .send()
            .await
            .context("report-part 请求发送失败")?;

        Self::expect_success(resp, "report-part").await?;
        Ok(())
    }

    async fn complete(&self, req: &CompleteRequest) -> Result<UploadOutcome> {
        info!(
            "complete: upload_id={}, parts={}",
            req.upload_id,
            req.parts.len()
        );

        let resp = self
            .with_auth(self.client.post(self.endpoint(COMPLETE_ROUTE)?))
            .json(req)
            .send()
            .await
            .context("complete 请求发送失败")?;

        let resp = Self::expect_success(resp, "complete").await?;
        resp.json::<UploadOutcome>()
            .await
            .context("解析 complete 响应失败")
    }

    async fn abort_upload(&self, upload_id: &str) -> Result<()> {
        let resp = self
            .with_auth(self.client.post(self.endpoint(ABORT_ROUTE)?))
            .json(&serde_json::json!({ "upload_id": upload_id }))
            .send()
            .await
            .context("abort 请求发送失败")?;

        Self::expect_success(resp, "abort").await?;
        Ok(())
    }

    async fn upload_status(&self, upload_id: &str) -> Result<UploadStatusResponse> {
        let path = format!("api/uploads/{}/status", upload_id);
        let resp = self
            .with_auth(self.client.get(self.endpoint(&path)?))
            .send()
            .await
            .context("status 请求发送失败")?;

        let resp = Self::expect_success(resp, "status").await?;
        resp.json::<UploadStatusResponse>()
            .await
            .context("解析 status 响应失败")
    }

    async fn simple_upload(
        &self,
        req: &SimpleUploadRequest,
        progress: TransferProgressFn,
    ) -> Result<UploadOutcome> {
        let meta = tokio::fs::metadata(&req.file_path)
            .await
            .with_context(|| format!("读取文件信息失败: {:?}", req.file_path))?;
        let total = meta.len();

        let file = tokio::fs::File::open(&req.file_path)
            .await
            .with_context(|| format!("打开文件失败: {:?}", req.file_path))?;

        // 计数字节流：reqwest 每读走一块就推一次进度，实现 0→100 连续上报
        let stream = async_stream::stream! {
            let mut reader = file;
            let mut sent = 0u64;
            let mut buf = vec![0u8; SIMPLE_UPLOAD_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        sent += n as u64;
                        progress(sent, total);
                        yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        let file_part =
            reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
                .file_name(req.filename.clone())
                .mime_str(&req.content_type)
                .context("无效的内容类型")?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("folder", req.folder.clone());
        if let Some(model) = &req.target_model {
            form = form.text("target_model", model.clone());
        }
        if let Some(field) = &req.target_field {
            form = form.text("target_field", field.clone());
        }
        if let Some(object_id) = &req.target_object_id {
            form = form.text("target_object_id", object_id.clone());
        }

        let resp = self
            .with_auth(self.client.post(self.endpoint(SIMPLE_UPLOAD_ROUTE)?))
            .multipart(form)
            .send()
            .await
            .context("简单上传请求发送失败")?;

        let resp = Self::expect_success(resp, "简单上传").await?;
        resp.json::<UploadOutcome>()
            .await
            .context("解析简单上传响应失败")
    }
}
