// 上传错误分类
//
// 错误分为两类：
// - 致命错误：终止整个上传，多分片路径需要触发 abort 清理
// - 非致命错误：记录诊断日志后继续（分片进度上报失败、abort 通知失败）

use thiserror::Error;

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 未提供上传文件（或文件不可读）
    #[error("未找到上传文件: {0}")]
    NoFile(String),

    /// 初始化上传会话失败（服务端尚无会话，无需 abort）
    #[error("初始化上传会话失败: {0}")]
    Initiation(String),

    /// 分片参数无效
    #[error("分片计划无效: {0}")]
    InvalidPlan(String),

    /// 单个分片上传失败（致命，触发 abort）
    #[error("分片 #{part_number} 上传失败: {reason}")]
    PartTransfer { part_number: u32, reason: String },

    /// 分片进度上报失败（非致命，仅记录）
    #[error("分片进度上报失败: {0}")]
    Report(String),

    /// 合并分片失败（致命，触发 abort）
    #[error("合并分片失败: {0}")]
    Completion(String),

    /// abort 通知本身失败（非致命，仅记录）
    #[error("中止通知失败: {0}")]
    AbortNotification(String),

    /// 简单上传路径失败
    #[error("简单上传失败: {0}")]
    SimpleUpload(String),

    /// 上传已被取消
    #[error("上传已取消")]
    Cancelled,
}

impl UploadError {
    /// 是否需要向服务端发送 abort 清理
    ///
    /// 初始化失败时服务端尚未创建任何资源，不需要清理；
    /// 取消路径由调用方自己触发 abort，这里不重复。
    /// InvalidPlan 在会话建立后才可能出现（分片几何与服务端不一致），
    /// 此时会话需要清理；协调器只在会话存在时真正发送通知。
    pub fn triggers_abort(&self) -> bool {
        matches!(
            self,
            UploadError::PartTransfer { .. }
                | UploadError::Completion(_)
                | UploadError::InvalidPlan(_)
        )
    }

    /// 是否为非致命错误（记录后可继续上传）
    pub fn is_non_fatal(&self) -> bool {
        matches!(
            self,
            UploadError::Report(_) | UploadError::AbortNotification(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triggers_abort() {
        assert!(UploadError::PartTransfer {
            part_number: 2,
            reason: "HTTP 500".to_string()
        }
        .triggers_abort());
        assert!(UploadError::Completion("errno=2".to_string()).triggers_abort());
        assert!(UploadError::InvalidPlan("分片数不一致".to_string()).triggers_abort());

        // 初始化失败时服务端无会话，不触发 abort
        assert!(!UploadError::Initiation("bad request".to_string()).triggers_abort());
        assert!(!UploadError::NoFile("missing".to_string()).triggers_abort());
        assert!(!UploadError::Cancelled.triggers_abort());
    }

    #[test]
    fn test_non_fatal_classification() {
        assert!(UploadError::Report("timeout".to_string()).is_non_fatal());
        assert!(UploadError::AbortNotification("503".to_string()).is_non_fatal());

        assert!(!UploadError::Cancelled.is_non_fatal());
        assert!(!UploadError::SimpleUpload("x".to_string()).is_non_fatal());
    }

    #[test]
    fn test_display_contains_part_number() {
        let err = UploadError::PartTransfer {
            part_number: 7,
            reason: "HTTP 500".to_string(),
        };
        assert!(err.to_string().contains("#7"));
    }
}
