// S3 Direct Upload Rust Library
// 预签名 URL 直传客户端核心库

// 应用服务器 API 模块
pub mod api;

// 配置管理模块
pub mod config;

// 日志系统模块
pub mod logging;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use api::{ApiClient, UploadApi};
pub use config::{ApiConfig, AppConfig, LogConfig, UploadConfig};
pub use logging::{init_logging, LogGuard};
pub use uploader::{
    HttpPartTransport, PartTransport, SessionCoordinator, SimplePathUploader, UploadError,
    UploadInput, UploadPhase, UploadProgress, UploadRouter,
};
