// 上传会话定义
//
// 会话是一次多分片上传的值对象：由成功的 initiate 响应创建，
// 创建后除累计的分片结果外不再变更，完成或中止后逻辑上销毁。
// 单个协调器实例独占一个会话，并发上传调用各自持有独立实例。

use crate::api::types::InitiateResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    /// 空闲（尚未发起）
    Idle,
    /// 会话初始化中
    Initiating,
    /// 分片传输中
    Transferring,
    /// 合并分片中
    Finalizing,
    /// 已完成
    Completed,
    /// 中止进行中
    Aborting,
    /// 已中止
    Aborted,
    /// 失败（初始化阶段，服务端无会话可清理）
    Failed,
}

impl UploadPhase {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadPhase::Completed | UploadPhase::Aborted | UploadPhase::Failed
        )
    }
}

/// 上传会话
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// 客户端本地任务 ID（日志追踪用）
    pub task_id: String,
    /// 应用服务器侧上传 ID
    pub upload_id: String,
    /// 存储提供方侧上传 ID（S3 multipart upload id）
    pub provider_upload_id: String,
    /// 存储对象键
    pub object_key: String,
    /// 文件总大小
    pub total_bytes: u64,
    /// 声明的内容类型
    pub content_type: String,
    /// 服务端下发的分片大小
    pub part_size: u64,
    /// 总分片数
    pub total_parts: u32,
    /// 目标文件夹
    pub target_folder: String,
    /// 关联模型（透传）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_model: Option<String>,
    /// 关联字段（透传）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
    /// 关联对象 ID（透传）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_object_id: Option<String>,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
}

impl UploadSession {
    /// 从 initiate 响应创建会话
    pub fn from_initiate(
        resp: &InitiateResponse,
        total_bytes: u64,
        content_type: String,
        target_folder: String,
        target_model: Option<String>,
        target_field: Option<String>,
        target_object_id: Option<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            upload_id: resp.upload_id.clone(),
            provider_upload_id: resp.s3_upload_id.clone(),
            object_key: resp.s3_key.clone(),
            total_bytes,
            content_type,
            part_size: resp.part_size,
            total_parts: resp.total_parts,
            target_folder,
            target_model,
            target_field,
            target_object_id,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// 分片结果：成功传输一个分片后留存的完成令牌
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartResult {
    /// 分片编号
    pub part_number: u32,
    /// 存储返回的完成令牌（已去引号）
    pub etag: String,
}

/// 进度快照（字节加权口径）
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadProgress {
    /// 已上传字节数
    pub uploaded_bytes: u64,
    /// 文件总大小
    pub total_bytes: u64,
    /// 百分比 [0, 100]
    pub percent: f64,
    /// 已完成分片数（简单路径把整个文件视作一个分片）
    pub completed_parts: u32,
    /// 总分片数
    pub total_parts: u32,
    /// 平均速度 (bytes/s)
    pub speed: u64,
    /// 估算剩余时间 (秒)
    pub eta: Option<u64>,
}

impl UploadProgress {
    /// 由字节计数与耗时构造快照
    pub fn new(
        uploaded_bytes: u64,
        total_bytes: u64,
        completed_parts: u32,
        total_parts: u32,
        elapsed_secs: f64,
    ) -> Self {
        let percent = if total_bytes == 0 {
            0.0
        } else {
            (uploaded_bytes as f64 / total_bytes as f64) * 100.0
        };

        let speed = if elapsed_secs > 0.0 {
            (uploaded_bytes as f64 / elapsed_secs) as u64
        } else {
            0
        };

        let eta = if speed > 0 && uploaded_bytes < total_bytes {
            Some((total_bytes - uploaded_bytes) / speed)
        } else {
            None
        };

        Self {
            uploaded_bytes,
            total_bytes,
            percent,
            completed_parts,
            total_parts,
            speed,
            eta,
        }
    }
}
