// 应用服务器 API 数据类型
//
// 字段名与服务端 JSON 约定严格一致（snake_case）。

use serde::{Deserialize, Serialize};

/// initiate 请求：创建多分片上传会话
#[derive(Debug, Clone, Serialize)]
pub struct InitiateRequest {
    /// 文件名
    pub filename: String,
    /// 声明的内容类型
    pub content_type: String,
    /// 声明的文件大小（字节）
    pub file_size: u64,
    /// 目标文件夹
    pub target_folder: String,
    /// 关联模型（透传，不做解释）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_model: Option<String>,
    /// 关联字段（透传）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
    /// 关联对象 ID（透传）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_object_id: Option<String>,
}

/// 单个分片的预签名 URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignedPartUrl {
    /// 分片编号（1 起始）
    pub part_number: u32,
    /// 预签名直传 URL
    pub presigned_url: String,
}

/// initiate 响应
#[derive(Debug, Clone, Deserialize)]
pub struct InitiateResponse {
    /// 应用服务器侧上传 ID
    pub upload_id: String,
    /// 存储侧（S3）上传 ID
    pub s3_upload_id: String,
    /// 存储对象键
    pub s3_key: String,
    /// 服务端下发的分片大小
    pub part_size: u64,
    /// 总分片数
    pub total_parts: u32,
    /// 每个分片的预签名 URL 列表
    #[serde(default)]
    pub presigned_urls: Vec<PresignedPartUrl>,
}

/// report-part 请求：上报单个分片完成
#[derive(Debug, Clone, Serialize)]
pub struct ReportPartRequest {
    /// 上传 ID
    pub upload_id: String,
    /// 分片编号
    pub part_number: u32,
    /// 存储返回的完成令牌（已去引号）
    pub etag: String,
}

/// complete 请求中的分片条目
#[derive(Debug, Clone, Serialize)]
pub struct CompletedPart {
    /// 分片编号
    pub part_number: u32,
    /// 完成令牌
    pub etag: String,
}

/// complete 请求：按分片编号升序提交全部完成令牌
#[derive(Debug, Clone, Serialize)]
pub struct CompleteRequest {
    /// 上传 ID
    pub upload_id: String,
    /// 分片列表（必须按 part_number 升序）
    pub parts: Vec<CompletedPart>,
}

/// 上传结果：服务端 finalize 返回的对象描述
///
/// 对客户端来说是不透明值，原样透传给调用方。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct UploadOutcome(pub serde_json::Value);

/// status 响应：会话状态快照
#[derive(Debug, Clone, Deserialize)]
pub struct UploadStatusResponse {
    /// 上传 ID
    pub upload_id: String,
    /// 会话状态
    #[serde(default)]
    pub status: String,
    /// 其余字段原样保留
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 简单上传请求（小文件单次 multipart 表单）
#[derive(Debug, Clone)]
pub struct SimpleUploadRequest {
    /// 本地文件路径
    pub file_path: std::path::PathBuf,
    /// 表单文件名
    pub filename: String,
    /// 内容类型
    pub content_type: String,
    /// 目标文件夹
    pub folder: String,
    /// 关联模型（透传）
    pub target_model: Option<String>,
    /// 关联字段（透传）
    pub target_field: Option<String>,
    /// 关联对象 ID（透传）
    pub target_object_id: Option<String>,
}
