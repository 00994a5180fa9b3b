// 上传引擎模块
//
// 以预签名 URL 为核心的两条上传路径：
// - 多分片：initiate → 窗口并发传输 → 逐片上报 → complete
// - 直传：小于阈值的文件单请求提交
//
// 路由、进度口径和错误分类由 router / coordinator 统一收口。

pub mod coordinator;
pub mod error;
pub mod part;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod simple;
pub mod transfer;

pub use coordinator::{ProgressSink, SessionCoordinator, UploadInput};
pub use error::UploadError;
pub use part::{plan_parts, PartDescriptor, PartPlan, MAX_PART_COUNT, MIN_PART_SIZE};
pub use router::{OnComplete, OnError, OnProgress, UploadRouter};
pub use scheduler::run_batched;
pub use session::{PartResult, UploadPhase, UploadProgress, UploadSession};
pub use simple::SimplePathUploader;
pub use transfer::{normalize_etag, HttpPartTransport, PartTransport};
