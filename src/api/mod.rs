// 应用服务器 API 模块

pub mod client;
pub mod types;

pub use client::{ApiClient, TransferProgressFn, UploadApi};
pub use types::{
    CompletedPart, CompleteRequest, InitiateRequest, InitiateResponse, PresignedPartUrl,
    ReportPartRequest, SimpleUploadRequest, UploadOutcome, UploadStatusResponse,
};
