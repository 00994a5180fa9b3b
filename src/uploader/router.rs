// 上传入口路由
//
// 对外只暴露一个 upload 入口：按文件大小选择直传或多分片路径，
// 两条路径共用同一套进度/完成/错误回调。
//
// 进度回调保证百分比单调不减，且成功返回前必然回调过 100%。

use crate::api::types::UploadOutcome;
use crate::api::{ApiClient, UploadApi};
use crate::config::{AppConfig, UploadConfig};
use crate::uploader::{
    HttpPartTransport, PartTransport, SessionCoordinator, SimplePathUploader, UploadError,
    UploadInput, UploadProgress,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// 进度回调
pub type OnProgress = Arc<dyn Fn(&UploadProgress) + Send + Sync>;
/// 完成回调
pub type OnComplete = Arc<dyn Fn(&UploadOutcome) + Send + Sync>;
/// 错误回调
pub type OnError = Arc<dyn Fn(&str) + Send + Sync>;

/// 上传路由器
///
/// 同一实例可顺序发起多次上传；同一时刻只跟踪一个活动会话，
/// abort 作用于当前活动会话。
pub struct UploadRouter {
    api: Arc<dyn UploadApi>,
    transport: Arc<dyn PartTransport>,
    config: UploadConfig,
    on_progress: Option<OnProgress>,
    on_complete: Option<OnComplete>,
    on_error: Option<OnError>,
    /// 当前活动的多分片协调器
    active: tokio::sync::Mutex<Option<Arc<SessionCoordinator>>>,
}

impl UploadRouter {
    pub fn new(
        api: Arc<dyn UploadApi>,
        transport: Arc<dyn PartTransport>,
        config: UploadConfig,
    ) -> Self {
        Self {
            api,
            transport,
            config,
            on_progress: None,
            on_complete: None,
            on_error: None,
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// 从配置构建真实 HTTP 栈的路由器
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let api = Arc::new(ApiClient::new(&config.api)?);
        let transport = Arc::new(HttpPartTransport::new(config.api.timeout_secs)?);
        Ok(Self::new(api, transport, config.upload.clone()))
    }

    pub fn on_progress(mut self, callback: OnProgress) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn on_complete(mut self, callback: OnComplete) -> Self {
        self.on_complete = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: OnError) -> Self {
        self.on_error = Some(callback);
        self
    }

    /// 上传一个文件
    ///
    /// # 路由规则
    /// 文件大小低于 `multipart_threshold` 走直传，否则走多分片。
    /// 两条路径的结果统一通过返回值和回调送出。
    pub async fn upload(&self, input: UploadInput) -> Result<UploadOutcome, UploadError> {
        let total_bytes = match tokio::fs::metadata(&input.file_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                let err = UploadError::NoFile(format!("{:?}: 不是普通文件", input.file_path));
                self.emit_error(&err);
                return Err(err);
            }
            Err(e) => {
                let err = UploadError::NoFile(format!("{:?}: {}", input.file_path, e));
                self.emit_error(&err);
                return Err(err);
            }
        };

        let gate = MonotonicGate::new(self.on_progress.clone());
        let sink = gate.as_sink();

        let result = if total_bytes < self.config.multipart_threshold {
            debug!(
                "路由: 直传 (size={} < threshold={})",
                total_bytes, self.config.multipart_threshold
            );
            SimplePathUploader::new(self.api.clone())
                .upload(&input, sink)
                .await
        } else {
            debug!(
                "路由: 多分片 (size={} >= threshold={})",
                total_bytes, self.config.multipart_threshold
            );
            let coordinator = Arc::new(
                SessionCoordinator::new(
                    self.api.clone(),
                    self.transport.clone(),
                    self.config.part_concurrency,
                )
                .with_progress_sink(sink.unwrap_or_else(|| Arc::new(|_: &UploadProgress| {}))),
            );
            *self.active.lock().await = Some(coordinator.clone());

            let result = coordinator.run(&input).await;
            for diag in coordinator.diagnostics() {
                warn!("上传诊断: {}", diag);
            }
            *self.active.lock().await = None;
            result
        };

        match result {
            Ok(outcome) => {
                // 成功必然对应 100%，补齐可能被节流掉的最后一次进度
                gate.finish(total_bytes);
                if let Some(callback) = &self.on_complete {
                    callback(&outcome);
                }
                info!("上传成功: {:?}", input.file_path);
                Ok(outcome)
            }
            Err(err) => {
                self.emit_error(&err);
                Err(err)
            }
        }
    }

    /// 中止当前活动的多分片上传；无活动会话时为空操作
    pub async fn abort(&self) {
        let coordinator = self.active.lock().await.clone();
        match coordinator {
            Some(coordinator) => coordinator.abort().await,
            None => debug!("abort: 无活动会话"),
        }
    }

    /// 复位路由器：丢弃对当前活动会话的引用
    ///
    /// 不向服务端发送任何请求；需要清理服务端资源时先调用 abort。
    pub async fn reset(&self) {
        *self.active.lock().await = None;
        debug!("路由器已复位");
    }

    fn emit_error(&self, err: &UploadError) {
        warn!("上传失败: {}", err);
        if let Some(callback) = &self.on_error {
            callback(&err.to_string());
        }
    }
}

/// 进度单调闸门
///
/// 并发分片的完成顺序不定，按万分位比较并丢弃回退的快照，
/// 保证调用方看到的百分比单调不减。
struct MonotonicGate {
    callback: Option<OnProgress>,
    /// 已放行的最高进度（万分位）
    high_water: Arc<AtomicU64>,
    /// 最近一次放行的快照，用于补发 100%
    last: Arc<Mutex<Option<UploadProgress>>>,
}

impl MonotonicGate {
    fn new(callback: Option<OnProgress>) -> Self {
        Self {
            callback,
            high_water: Arc::new(AtomicU64::new(0)),
            last: Arc::new(Mutex::new(None)),
        }
    }

    fn as_sink(&self) -> Option<crate::uploader::ProgressSink> {
        let callback = self.callback.clone()?;
        let high_water = self.high_water.clone();
        let last = self.last.clone();
        Some(Arc::new(move |progress: &UploadProgress| {
            let bp = (progress.percent * 100.0) as u64;
            let prev = high_water.fetch_max(bp, Ordering::SeqCst);
            if bp >= prev {
                *last.lock().unwrap() = Some(progress.clone());
                callback(progress);
            }
        }))
    }

    /// 成功收尾：若最后放行的快照未到 100%，补发一次终态快照
    fn finish(&self, total_bytes: u64) {
        let Some(callback) = &self.callback else {
            return;
        };
        if self.high_water.load(Ordering::SeqCst) >= 10_000 {
            return;
        }
        let (completed_parts, total_parts) = match self.last.lock().unwrap().as_ref() {
            Some(last) => (last.total_parts, last.total_parts),
            None => (1, 1),
        };
        let snapshot = UploadProgress::new(total_bytes, total_bytes, completed_parts, total_parts, 0.0);
        callback(&snapshot);
    }
}
