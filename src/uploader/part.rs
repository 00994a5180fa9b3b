// 分片规划
//
// S3 多分片上传协议规则：
// - 除最后一个分片外，单个分片最小 5MB
// - 单个上传最多 10000 个分片
// - 分片编号从 1 开始
//
// 分片大小由应用服务器在 initiate 响应中下发，客户端只负责按该大小
// 切出连续、不重叠、并集等于整个文件的字节区间。

use crate::uploader::UploadError;
use std::ops::Range;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// 最小分片大小: 5MB（协议下限，同时也是多分片路径的启用阈值）
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// 单个上传的最大分片数: 10000（协议上限）
pub const MAX_PART_COUNT: u64 = 10_000;

/// 分片计划（规划器输出，尚未绑定预签名 URL）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    /// 分片编号（1 起始）
    pub part_number: u32,
    /// 字节范围 [start, end)
    pub range: Range<u64>,
}

impl PartPlan {
    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// 分片描述（计划 + initiate 响应下发的预签名 URL）
#[derive(Debug, Clone)]
pub struct PartDescriptor {
    /// 分片编号（1 起始）
    pub part_number: u32,
    /// 字节范围 [start, end)
    pub range: Range<u64>,
    /// 预签名直传 URL
    pub presigned_url: String,
}

impl PartDescriptor {
    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 读取分片数据
    ///
    /// # 参数
    /// * `file_path` - 本地文件路径
    ///
    /// # 返回
    /// 分片数据字节数组
    pub async fn read_data(&self, file_path: &Path) -> Result<Vec<u8>, std::io::Error> {
        let mut file = File::open(file_path).await?;

        // 定位到分片起始位置
        file.seek(std::io::SeekFrom::Start(self.range.start)).await?;

        let part_size = self.size() as usize;
        let mut buffer = vec![0u8; part_size];
        file.read_exact(&mut buffer).await?;

        debug!(
            "读取分片 #{}: bytes={}-{}, 大小={} bytes",
            self.part_number,
            self.range.start,
            self.range.end - 1,
            part_size
        );

        Ok(buffer)
    }
}

/// 计算分片计划
///
/// 确定性纯函数：最后一个分片的范围是 [start, file_size)，可能小于 part_size。
///
/// # 参数
/// * `file_size` - 文件总大小（必须 > 0）
/// * `part_size` - 服务端下发的分片大小（必须 > 0）
///
/// # 返回
/// 按分片编号升序排列的分片计划
pub fn plan_parts(file_size: u64, part_size: u64) -> Result<Vec<PartPlan>, UploadError> {
    if file_size == 0 {
        return Err(UploadError::InvalidPlan("文件大小为 0".to_string()));
    }
    if part_size == 0 {
        return Err(UploadError::InvalidPlan("分片大小为 0".to_string()));
    }

    let total_parts = file_size.div_ceil(part_size);
    if total_parts > MAX_PART_COUNT {
        return Err(UploadError::InvalidPlan(format!(
            "分片数 {} 超过协议上限 {}",
            total_parts, MAX_PART_COUNT
        )));
    }

    let mut parts = Vec::with_capacity(total_parts as usize);
    let mut offset = 0u64;
    let mut part_number = 1u32;

    while offset < file_size {
        let end = std::cmp::min(offset + part_size, file_size);
        parts.push(PartPlan {
            part_number,
            range: offset..end,
        });
        offset = end;
        part_number += 1;
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_plan_exact_multiple() {
        // 15MB 文件，5MB 分片 -> 3 个整分片
        let parts = plan_parts(15 * MB, 5 * MB).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].range, 0..(5 * MB));
        assert_eq!(parts[1].range, (5 * MB)..(10 * MB));
        assert_eq!(parts[2].range, (10 * MB)..(15 * MB));
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[2].part_number, 3);
    }

    #[test]
    fn test_plan_trailing_part() {
        // 12MB 文件，5MB 分片 -> 5MB + 5MB + 2MB
        let parts = plan_parts(12 * MB, 5 * MB).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].range, (10 * MB)..(12 * MB));
        assert_eq!(parts[2].size(), 2 * MB);
    }

    #[test]
    fn test_plan_single_part() {
        let parts = plan_parts(3 * MB, 5 * MB).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].range, 0..(3 * MB));
    }

    #[test]
    fn test_plan_rejects_zero() {
        assert!(matches!(
            plan_parts(0, 5 * MB),
            Err(UploadError::InvalidPlan(_))
        ));
        assert!(matches!(
            plan_parts(10 * MB, 0),
            Err(UploadError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_plan_rejects_excess_parts() {
        // 超过 10000 个分片
        let result = plan_parts(MAX_PART_COUNT * MB + 1, MB);
        assert!(matches!(result, Err(UploadError::InvalidPlan(_))));
    }

    proptest! {
        /// 分片范围连续、不重叠，并集恰好覆盖整个文件
        #[test]
        fn prop_parts_cover_file(file_size in 1u64..200_000_000, part_size in 1u64..50_000_000) {
            prop_assume!(file_size.div_ceil(part_size) <= MAX_PART_COUNT);
            let parts = plan_parts(file_size, part_size).unwrap();

            prop_assert_eq!(parts.len() as u64, file_size.div_ceil(part_size));
            prop_assert_eq!(parts[0].range.start, 0);
            prop_assert_eq!(parts.last().unwrap().range.end, file_size);

            let total: u64 = parts.iter().map(|p| p.size()).sum();
            prop_assert_eq!(total, file_size);

            for pair in parts.windows(2) {
                prop_assert_eq!(pair[0].range.end, pair[1].range.start);
                prop_assert_eq!(pair[0].part_number + 1, pair[1].part_number);
            }
        }
    }

    #[tokio::test]
    async fn test_read_data_slices_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        file.write_all(&content).unwrap();

        let desc = PartDescriptor {
            part_number: 2,
            range: 256..512,
            presigned_url: String::new(),
        };

        let data = desc.read_data(file.path()).await.unwrap();
        assert_eq!(data.len(), 256);
        assert_eq!(data, content[256..512]);
    }
}
