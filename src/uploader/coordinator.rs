// 会话协调器
//
// 持有一次多分片上传的完整生命周期：
//   initiate → 分片调度 → 逐片上报 → complete →（失败时）abort
//
// 状态机：
//   Idle → Initiating → Transferring → Finalizing → Completed
//   任何非终态可进入 Aborting → Aborted（致命错误或调用方主动中止）
//   Failed 仅用于初始化阶段失败（服务端无会话，不发 abort）
//
// 两个刻意保留的不对称：
// - report-part 失败只记诊断不判失败，etag 在本地留存并照常参与 complete
// - abort 通知本身失败只记诊断，不改变已中止的结局

use crate::api::types::{
    CompletedPart, CompleteRequest, InitiateRequest, ReportPartRequest, UploadOutcome,
};
use crate::api::{InitiateResponse, UploadApi};
use crate::uploader::{
    plan_parts, run_batched, PartDescriptor, PartResult, PartTransport, UploadError, UploadPhase,
    UploadProgress, UploadSession,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 进度回调
pub type ProgressSink = Arc<dyn Fn(&UploadProgress) + Send + Sync>;

/// 一次上传的输入参数
#[derive(Debug, Clone)]
pub struct UploadInput {
    /// 本地文件路径
    pub file_path: PathBuf,
    /// 文件名（上报给服务端）
    pub filename: String,
    /// 声明的内容类型
    pub content_type: String,
    /// 目标文件夹
    pub target_folder: String,
    /// 关联模型（透传）
    pub target_model: Option<String>,
    /// 关联字段（透传）
    pub target_field: Option<String>,
    /// 关联对象 ID（透传）
    pub target_object_id: Option<String>,
}

/// 多分片上传会话协调器
///
/// 一个实例只服务一次上传调用；会话状态和分片结果由本实例独占，
/// 并发上传各自创建独立协调器。
pub struct SessionCoordinator {
    /// 应用服务器 API
    api: Arc<dyn UploadApi>,
    /// 分片传输单元
    transport: Arc<dyn PartTransport>,
    /// 分片并发上限（窗口大小）
    concurrency: usize,
    /// 当前阶段
    phase: Mutex<UploadPhase>,
    /// 上传会话（initiate 成功后创建）
    session: tokio::sync::Mutex<Option<UploadSession>>,
    /// 取消令牌（调度器和在途传输共同消费）
    cancel_token: CancellationToken,
    /// abort 通知至多发送一次
    abort_sent: AtomicBool,
    /// 已上传字节数
    uploaded_bytes: Arc<AtomicU64>,
    /// 已完成分片数
    completed_parts: Arc<AtomicU32>,
    /// 非致命错误诊断记录
    diagnostics: Arc<Mutex<Vec<UploadError>>>,
    /// 进度回调
    progress_sink: Option<ProgressSink>,
}

impl SessionCoordinator {
    /// 创建协调器
    pub fn new(
        api: Arc<dyn UploadApi>,
        transport: Arc<dyn PartTransport>,
        concurrency: usize,
    ) -> Self {
        Self {
            api,
            transport,
            concurrency,
            phase: Mutex::new(UploadPhase::Idle),
            session: tokio::sync::Mutex::new(None),
            cancel_token: CancellationToken::new(),
            abort_sent: AtomicBool::new(false),
            uploaded_bytes: Arc::new(AtomicU64::new(0)),
            completed_parts: Arc::new(AtomicU32::new(0)),
            diagnostics: Arc::new(Mutex::new(Vec::new())),
            progress_sink: None,
        }
    }

    /// 设置进度回调
    pub fn with_progress_sink(mut self, sink: ProgressSink) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    /// 当前阶段
    pub fn phase(&self) -> UploadPhase {
        *self.phase.lock().unwrap()
    }

    /// 非致命错误诊断（上报失败、abort 通知失败）
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    fn set_phase(&self, phase: UploadPhase) {
        debug!("阶段切换: {:?}", phase);
        *self.phase.lock().unwrap() = phase;
    }

    fn record_diagnostic(&self, err: UploadError) {
        push_diagnostic(&self.diagnostics, err);
    }

    /// 执行上传
    ///
    /// # 上传流程
    /// 1. initiate 创建会话，取回分片大小与预签名 URL
    /// 2. 按窗口并发上传分片，逐片尽力上报
    /// 3. 按分片编号升序提交 complete
    /// 4. 致命错误触发至多一次 abort 后把原始错误抛回调用方
    pub async fn run(&self, input: &UploadInput) -> Result<UploadOutcome, UploadError> {
        let started = Instant::now();

        let total_bytes = match tokio::fs::metadata(&input.file_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                let err = UploadError::NoFile(format!("{:?}: {}", input.file_path, e));
                return Err(self.fatal(err).await);
            }
        };

        info!(
            "开始多分片上传: file={:?}, size={}, folder={}",
            input.file_path, total_bytes, input.target_folder
        );

        // 1. 初始化会话
        self.set_phase(UploadPhase::Initiating);
        let init_req = InitiateRequest {
            filename: input.filename.clone(),
            content_type: input.content_type.clone(),
            file_size: total_bytes,
            target_folder: input.target_folder.clone(),
            target_model: input.target_model.clone(),
            target_field: input.target_field.clone(),
            target_object_id: input.target_object_id.clone(),
        };
        let init_resp = match self.api.initiate(&init_req).await {
            Ok(resp) => resp,
            Err(e) => {
                let err = UploadError::Initiation(e.to_string());
                return Err(self.fatal(err).await);
            }
        };

        let session = UploadSession::from_initiate(
            &init_resp,
            total_bytes,
            input.content_type.clone(),
            input.target_folder.clone(),
            input.target_model.clone(),
            input.target_field.clone(),
            input.target_object_id.clone(),
        );
        info!(
            "会话已建立: upload_id={}, key={}, part_size={}, total_parts={}",
            session.upload_id, session.object_key, session.part_size, session.total_parts
        );
        *self.session.lock().await = Some(session.clone());

        let descriptors = match build_descriptors(&init_resp, total_bytes) {
            Ok(descriptors) => descriptors,
            Err(e) => return Err(self.fatal(e).await),
        };

        // 2. 分片传输
        if self.cancel_token.is_cancelled() {
            return Err(self.fatal(UploadError::Cancelled).await);
        }
        self.set_phase(UploadPhase::Transferring);
        let mut results = match self
            .transfer_parts(&input.file_path, &session, descriptors, started)
            .await
        {
            Ok(results) => results,
            Err(e) => return Err(self.fatal(e).await),
        };

        // 最后一窗结算期间到达的 abort：进入合并阶段前再查一次令牌，
        // 避免在已中止的会话上发送 complete
        if self.cancel_token.is_cancelled() {
            return Err(self.fatal(UploadError::Cancelled).await);
        }

        // 3. 合并：complete 要求按分片编号升序，与实际完成顺序无关
        results.sort_by_key(|r| r.part_number);
        if let Err(e) = verify_part_results(&results, session.total_parts) {
            return Err(self.fatal(e).await);
        }

        self.set_phase(UploadPhase::Finalizing);
        let complete_req = CompleteRequest {
            upload_id: session.upload_id.clone(),
            parts: results
                .into_iter()
                .map(|r| CompletedPart {
                    part_number: r.part_number,
                    etag: r.etag,
                })
                .collect(),
        };
        let outcome = match self.api.complete(&complete_req).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = UploadError::Completion(e.to_string());
                return Err(self.fatal(err).await);
            }
        };

        self.set_phase(UploadPhase::Completed);
        info!("上传完成: key={}", session.object_key);
        Ok(outcome)
    }

    /// 并发上传全部分片
    ///
    /// 每个分片成功后尽力上报 report-part；上报失败记诊断后继续，
    /// 完成令牌在本地留存并照常参与 complete。
    async fn transfer_parts(
        &self,
        file_path: &std::path::Path,
        session: &UploadSession,
        descriptors: Vec<PartDescriptor>,
        started: Instant,
    ) -> Result<Vec<PartResult>, UploadError> {
        let api = self.api.clone();
        let transport = self.transport.clone();
        let cancel = self.cancel_token.clone();
        let uploaded_bytes = self.uploaded_bytes.clone();
        let completed_parts = self.completed_parts.clone();
        let diagnostics = self.diagnostics.clone();
        let progress_sink = self.progress_sink.clone();
        let file_path = file_path.to_path_buf();
        let content_type = session.content_type.clone();
        let upload_id = session.upload_id.clone();
        let total_bytes = session.total_bytes;
        let total_parts = session.total_parts;

        let unit = move |part: PartDescriptor| {
            let api = api.clone();
            let transport = transport.clone();
            let cancel = cancel.clone();
            let uploaded_bytes = uploaded_bytes.clone();
            let completed_parts = completed_parts.clone();
            let diagnostics = diagnostics.clone();
            let progress_sink = progress_sink.clone();
            let file_path = file_path.clone();
            let content_type = content_type.clone();
            let upload_id = upload_id.clone();

            async move {
                let data = part.read_data(&file_path).await.map_err(|e| {
                    UploadError::PartTransfer {
                        part_number: part.part_number,
                        reason: format!("读取分片失败: {}", e),
                    }
                })?;

                let etag = transport
                    .transfer(&part, data, &content_type, &cancel)
                    .await?;

                // 传输结算与取消同时就绪时传输分支可能胜出；
                // 已中止的会话不再上报
                if cancel.is_cancelled() {
                    return Err(UploadError::Cancelled);
                }

                // 尽力上报；失败不判分片失败（令牌已在本地留存）
                let report = ReportPartRequest {
                    upload_id: upload_id.clone(),
                    part_number: part.part_number,
                    etag: etag.clone(),
                };
                if let Err(e) = api.report_part(&report).await {
                    push_diagnostic(
                        &diagnostics,
                        UploadError::Report(format!("分片 #{}: {}", part.part_number, e)),
                    );
                }

                let done_bytes =
                    uploaded_bytes.fetch_add(part.size(), Ordering::SeqCst) + part.size();
                let done_parts = completed_parts.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    "[分片#{}] ✓ 完成 ({}/{}, {}/{} bytes)",
                    part.part_number, done_parts, total_parts, done_bytes, total_bytes
                );

                if let Some(sink) = &progress_sink {
                    let snapshot = UploadProgress::new(
                        done_bytes,
                        total_bytes,
                        done_parts,
                        total_parts,
                        started.elapsed().as_secs_f64(),
                    );
                    sink(&snapshot);
                }

                Ok(PartResult {
                    part_number: part.part_number,
                    etag,
                })
            }
        };

        run_batched(descriptors, self.concurrency, &self.cancel_token, unit).await
    }

    /// 致命错误善后：会话需要清理时触发至多一次 abort，然后原样抛回
    async fn fatal(&self, err: UploadError) -> UploadError {
        if matches!(err, UploadError::Cancelled) {
            // 调用方 abort() 已完成中止簿记
            return err;
        }
        if err.triggers_abort() && self.session.lock().await.is_some() {
            self.trigger_abort().await;
        } else {
            self.set_phase(UploadPhase::Failed);
        }
        err
    }

    /// 调用方主动中止
    ///
    /// 尚无会话或已到终态时为空操作：前者服务端没有可清理的资源，
    /// 后者会话已经结束，不能把 Completed/Failed 改写成 Aborted。
    pub async fn abort(&self) {
        let phase = self.phase();
        if phase.is_terminal() {
            debug!("abort: 会话已到终态 {:?}，视为空操作", phase);
            return;
        }
        if self.session.lock().await.is_none() {
            debug!("abort: 尚无会话，视为空操作");
            return;
        }
        self.trigger_abort().await;
    }

    /// 中止簿记：取消在途传输 + 至多一次 abort 通知
    async fn trigger_abort(&self) {
        if self.abort_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel_token.cancel();
        self.set_phase(UploadPhase::Aborting);

        let upload_id = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.upload_id.clone());
        if let Some(upload_id) = upload_id {
            info!("发送中止通知: upload_id={}", upload_id);
            if let Err(e) = self.api.abort_upload(&upload_id).await {
                self.record_diagnostic(UploadError::AbortNotification(e.to_string()));
            }
        }

        self.set_phase(UploadPhase::Aborted);
    }
}

/// 非致命错误统一入口：记 warn 日志后进入诊断记录
fn push_diagnostic(diagnostics: &Mutex<Vec<UploadError>>, err: UploadError) {
    warn!("非致命错误: {}", err);
    debug_assert!(err.is_non_fatal());
    diagnostics.lock().unwrap().push(err);
}

/// 把分片计划与服务端下发的预签名 URL 拼成分片描述
fn build_descriptors(
    resp: &InitiateResponse,
    total_bytes: u64,
) -> Result<Vec<PartDescriptor>, UploadError> {
    let plans = plan_parts(total_bytes, resp.part_size)?;

    if plans.len() as u32 != resp.total_parts {
        return Err(UploadError::InvalidPlan(format!(
            "服务端分片数 {} 与本地计划 {} 不一致",
            resp.total_parts,
            plans.len()
        )));
    }

    let mut urls: HashMap<u32, String> = resp
        .presigned_urls
        .iter()
        .map(|u| (u.part_number, u.presigned_url.clone()))
        .collect();

    plans
        .into_iter()
        .map(|plan| {
            let presigned_url = urls.remove(&plan.part_number).ok_or_else(|| {
                UploadError::InvalidPlan(format!("缺少分片 #{} 的预签名 URL", plan.part_number))
            })?;
            Ok(PartDescriptor {
                part_number: plan.part_number,
                range: plan.range,
                presigned_url,
            })
        })
        .collect()
}

/// 校验分片结果不变量：排序后为 1..=total_parts 的严格递增序列
fn verify_part_results(results: &[PartResult], total_parts: u32) -> Result<(), UploadError> {
    if results.len() as u32 != total_parts {
        return Err(UploadError::Completion(format!(
            "分片结果数 {} 与总分片数 {} 不符",
            results.len(),
            total_parts
        )));
    }
    for (index, result) in results.iter().enumerate() {
        let expected = index as u32 + 1;
        if result.part_number != expected {
            return Err(UploadError::Completion(format!(
                "分片结果不连续: 期望 #{}, 实际 #{}",
                expected, result.part_number
            )));
        }
    }
    Ok(())
}
