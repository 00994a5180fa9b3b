// 分片批次调度
//
// 批次同步模型：把分片序列按并发上限切成连续窗口，窗口内全部
// 一起发起，整窗结算完才进入下一窗。单个分片失败即判整个调度失败
// （第一个失败胜出，同窗其余在途任务的结果被丢弃）。
//
// 每个窗口开始前检查取消令牌；已触发则不再发起新窗口。
// 这里用窗口而不是滑动池换取简单的失败语义：一个窗口可以被
// 协调器整体干净地判定成功或失败。

use crate::uploader::{PartDescriptor, PartResult, UploadError};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 按窗口批次执行分片传输
///
/// # 参数
/// * `descriptors` - 待传输的分片描述（按编号升序）
/// * `window_size` - 并发上限（单窗口分片数）
/// * `cancel` - 取消令牌，窗口开始前检查
/// * `unit` - 单分片传输函数
///
/// # 返回
/// 分片结果，窗口内按完成顺序排列（调用方按需排序）
pub async fn run_batched<F, Fut>(
    descriptors: Vec<PartDescriptor>,
    window_size: usize,
    cancel: &CancellationToken,
    unit: F,
) -> Result<Vec<PartResult>, UploadError>
where
    F: Fn(PartDescriptor) -> Fut,
    Fut: Future<Output = Result<PartResult, UploadError>>,
{
    let window_size = window_size.max(1);
    let total = descriptors.len();
    let mut results = Vec::with_capacity(total);

    info!("[批次调度] 分片数: {}, 窗口大小: {}", total, window_size);

    for (window_index, window) in descriptors.chunks(window_size).enumerate() {
        if cancel.is_cancelled() {
            debug!("[批次调度] 窗口 {} 前检测到取消", window_index);
            return Err(UploadError::Cancelled);
        }

        debug!(
            "[批次调度] 窗口 {}: 分片 {:?}",
            window_index,
            window.iter().map(|p| p.part_number).collect::<Vec<_>>()
        );

        // 整窗一起发起；第一个失败立即返回，同窗其余任务被丢弃
        let mut in_flight: FuturesUnordered<_> = window.iter().cloned().map(&unit).collect();
        while let Some(settled) = in_flight.next().await {
            results.push(settled?);
        }
    }

    info!("[批次调度] 全部 {} 个分片结算完成", total);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn descriptor(part_number: u32) -> PartDescriptor {
        let start = (part_number as u64 - 1) * 100;
        PartDescriptor {
            part_number,
            range: start..start + 100,
            presigned_url: String::new(),
        }
    }

    fn descriptors(count: u32) -> Vec<PartDescriptor> {
        (1..=count).map(descriptor).collect()
    }

    #[tokio::test]
    async fn test_all_parts_settle() {
        let cancel = CancellationToken::new();
        let results = run_batched(descriptors(5), 2, &cancel, |part| async move {
            Ok(PartResult {
                part_number: part.part_number,
                etag: format!("etag-{}", part.part_number),
            })
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 5);
        let mut numbers: Vec<u32> = results.iter().map(|r| r.part_number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_window_never_exceeds_limit() {
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let in_flight_c = in_flight.clone();
        let peak_c = peak.clone();
        run_batched(descriptors(7), 3, &cancel, move |part| {
            let in_flight = in_flight_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(PartResult {
                    part_number: part.part_number,
                    etag: String::new(),
                })
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_window_settles_before_next_starts() {
        // 窗口 1 里有一个慢分片，窗口 2 必须等它结算后才开始
        let cancel = CancellationToken::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let events_c = events.clone();
        run_batched(descriptors(4), 2, &cancel, move |part| {
            let events = events_c.clone();
            async move {
                events
                    .lock()
                    .unwrap()
                    .push(format!("start-{}", part.part_number));
                // 分片 1 故意拖慢，验证队头阻塞语义
                let delay = if part.part_number == 1 { 30 } else { 5 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                events
                    .lock()
                    .unwrap()
                    .push(format!("end-{}", part.part_number));
                Ok(PartResult {
                    part_number: part.part_number,
                    etag: String::new(),
                })
            }
        })
        .await
        .unwrap();

        let events = events.lock().unwrap();
        let end_1 = events.iter().position(|e| e == "end-1").unwrap();
        let start_3 = events.iter().position(|e| e == "start-3").unwrap();
        let start_4 = events.iter().position(|e| e == "start-4").unwrap();
        assert!(start_3 > end_1, "窗口 2 必须在窗口 1 整体结算后开始");
        assert!(start_4 > end_1);
    }

    #[tokio::test]
    async fn test_first_failure_wins_and_stops_later_windows() {
        let cancel = CancellationToken::new();
        let started = Arc::new(Mutex::new(Vec::new()));

        let started_c = started.clone();
        let err = run_batched(descriptors(6), 3, &cancel, move |part| {
            let started = started_c.clone();
            async move {
                started.lock().unwrap().push(part.part_number);
                if part.part_number == 2 {
                    return Err(UploadError::PartTransfer {
                        part_number: 2,
                        reason: "HTTP 500".to_string(),
                    });
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(PartResult {
                    part_number: part.part_number,
                    etag: String::new(),
                })
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            UploadError::PartTransfer { part_number: 2, .. }
        ));
        // 第二窗口（分片 4..6）不再发起
        let started = started.lock().unwrap();
        assert!(started.iter().all(|n| *n <= 3));
    }

    #[tokio::test]
    async fn test_cancel_skips_remaining_windows() {
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));

        let cancel_inner = cancel.clone();
        let started_c = started.clone();
        let err = run_batched(descriptors(4), 2, &cancel, move |part| {
            let cancel = cancel_inner.clone();
            let started = started_c.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                // 第一窗口期间触发取消
                cancel.cancel();
                Ok(PartResult {
                    part_number: part.part_number,
                    etag: String::new(),
                })
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_descriptor_list() {
        let cancel = CancellationToken::new();
        let results = run_batched(Vec::new(), 3, &cancel, |part: PartDescriptor| async move {
            Ok(PartResult {
                part_number: part.part_number,
                etag: String::new(),
            })
        })
        .await
        .unwrap();
        assert!(results.is_empty());
    }
}
