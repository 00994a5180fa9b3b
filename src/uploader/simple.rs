// 小文件直传
//
// 低于多分片阈值的文件走单请求 multipart/form-data 直传，
// 不创建多分片会话，失败时也没有需要清理的服务端资源。

use crate::api::types::{SimpleUploadRequest, UploadOutcome};
use crate::api::UploadApi;
use crate::uploader::{ProgressSink, UploadError, UploadInput, UploadProgress};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// 简单路径上传器
pub struct SimplePathUploader {
    api: Arc<dyn UploadApi>,
}

impl SimplePathUploader {
    pub fn new(api: Arc<dyn UploadApi>) -> Self {
        Self { api }
    }

    /// 直传整个文件
    ///
    /// 进度按已发送字节连续回调，与多分片路径使用同一个百分比口径。
    pub async fn upload(
        &self,
        input: &UploadInput,
        progress_sink: Option<ProgressSink>,
    ) -> Result<UploadOutcome, UploadError> {
        let total_bytes = tokio::fs::metadata(&input.file_path)
            .await
            .map_err(|e| UploadError::NoFile(format!("{:?}: {}", input.file_path, e)))?
            .len();

        info!(
            "开始直传: file={:?}, size={}, folder={}",
            input.file_path, total_bytes, input.target_folder
        );

        let request = SimpleUploadRequest {
            file_path: input.file_path.clone(),
            filename: input.filename.clone(),
            content_type: input.content_type.clone(),
            folder: input.target_folder.clone(),
            target_model: input.target_model.clone(),
            target_field: input.target_field.clone(),
            target_object_id: input.target_object_id.clone(),
        };

        let started = Instant::now();
        let on_sent: crate::api::TransferProgressFn = match progress_sink {
            Some(sink) => Arc::new(move |sent: u64, total: u64| {
                // 单请求上传视作一个整体分片
                let done = if sent >= total { 1 } else { 0 };
                let snapshot =
                    UploadProgress::new(sent, total, done, 1, started.elapsed().as_secs_f64());
                sink(&snapshot);
            }),
            None => Arc::new(|_, _| {}),
        };

        let outcome = self
            .api
            .simple_upload(&request, on_sent)
            .await
            .map_err(|e| UploadError::SimpleUpload(e.to_string()))?;

        info!("直传完成: file={:?}", input.file_path);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{
        CompleteRequest, InitiateRequest, InitiateResponse, ReportPartRequest,
        UploadStatusResponse,
    };
    use crate::api::TransferProgressFn;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;

    /// 只实现直传、按步进回调进度的假服务器
    struct SimpleOnlyApi {
        fail: bool,
        steps: u64,
    }

    #[async_trait]
    impl UploadApi for SimpleOnlyApi {
        async fn initiate(&self, _req: &InitiateRequest) -> AnyResult<InitiateResponse> {
            anyhow::bail!("不应走多分片路径")
        }

        async fn report_part(&self, _req: &ReportPartRequest) -> AnyResult<()> {
            anyhow::bail!("不应走多分片路径")
        }

        async fn complete(&self, _req: &CompleteRequest) -> AnyResult<UploadOutcome> {
            anyhow::bail!("不应走多分片路径")
        }

        async fn abort_upload(&self, _upload_id: &str) -> AnyResult<()> {
            anyhow::bail!("不应走多分片路径")
        }

        async fn upload_status(&self, _upload_id: &str) -> AnyResult<UploadStatusResponse> {
            anyhow::bail!("未实现")
        }

        async fn simple_upload(
            &self,
            req: &SimpleUploadRequest,
            progress: TransferProgressFn,
        ) -> AnyResult<UploadOutcome> {
            if self.fail {
                anyhow::bail!("HTTP 413");
            }
            let total = tokio::fs::metadata(&req.file_path).await?.len();
            for step in 1..=self.steps {
                progress(total * step / self.steps, total);
            }
            Ok(UploadOutcome(serde_json::json!({"key": "uploads/small.bin"})))
        }
    }

    fn temp_file(size: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0x5au8; size]).unwrap();
        file
    }

    fn input_at(path: &std::path::Path) -> UploadInput {
        UploadInput {
            file_path: path.to_path_buf(),
            filename: "small.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            target_folder: "docs".to_string(),
            target_model: None,
            target_field: None,
            target_object_id: None,
        }
    }

    #[tokio::test]
    async fn test_simple_upload_reports_continuous_progress() {
        let file = temp_file(2048);
        let uploader = SimplePathUploader::new(Arc::new(SimpleOnlyApi {
            fail: false,
            steps: 4,
        }));

        let percents: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let percents_c = percents.clone();

        let outcome = uploader
            .upload(
                &input_at(file.path()),
                Some(Arc::new(move |p: &UploadProgress| {
                    percents_c.lock().unwrap().push(p.percent);
                })),
            )
            .await
            .unwrap();

        assert_eq!(outcome.0["key"], "uploads/small.bin");
        let percents = percents.lock().unwrap();
        assert_eq!(percents.len(), 4);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_simple_upload_failure_maps_to_error() {
        let file = temp_file(128);
        let uploader = SimplePathUploader::new(Arc::new(SimpleOnlyApi {
            fail: true,
            steps: 1,
        }));

        let err = uploader
            .upload(&input_at(file.path()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::SimpleUpload(_)));
    }

    #[tokio::test]
    async fn test_missing_file_rejected_before_request() {
        let uploader = SimplePathUploader::new(Arc::new(SimpleOnlyApi {
            fail: false,
            steps: 1,
        }));

        let err = uploader
            .upload(
                &input_at(std::path::Path::new("/nonexistent/small.bin")),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::NoFile(_)));
    }
}
