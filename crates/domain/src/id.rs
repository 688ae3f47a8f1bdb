use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::{RelayError, RelayResult};

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// 节点号上限（含）
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;

/// 时间戳起点：2010-11-04T01:42:54.657Z
const EPOCH_MS: i64 = 1_288_834_974_657;

/// 客户端ID生成器
///
/// 布局为41位毫秒时间戳、10位节点号、12位序号。节点号由部署方按进程分配，
/// 共享同一数据库的进程必须使用不同的节点号。同一生成器产出的ID严格递增，
/// 同一毫秒内超过4096个ID时借用下一毫秒的空间。
#[derive(Debug, Default)]
pub struct IdGenerator {
    node: i64,
    /// 时间戳与序号合成的计数，`(ms << 12) | seq`
    last: AtomicI64,
}

impl IdGenerator {
    /// 节点号为0的生成器，适用于单进程部署与测试
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(node_id: u16) -> RelayResult<Self> {
        if node_id > MAX_NODE_ID {
            return Err(RelayError::Configuration(format!(
                "节点号超出范围: {node_id}（最大{MAX_NODE_ID}）"
            )));
        }
        Ok(Self {
            node: i64::from(node_id),
            last: AtomicI64::new(0),
        })
    }

    pub fn node_id(&self) -> u16 {
        self.node as u16
    }

    pub fn next_id(&self) -> i64 {
        let floor = (Utc::now().timestamp_millis() - EPOCH_MS) << SEQUENCE_BITS;
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(floor.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let tick = floor.max(previous + 1);

        let millis = tick >> SEQUENCE_BITS;
        let sequence = tick & SEQUENCE_MASK;
        (millis << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS) | sequence
    }
}
