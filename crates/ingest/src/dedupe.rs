use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Serialize)]
struct DedupeBody<'a> {
    source: &'a str,
    event_type: &'a str,
    external_issue_id: &'a str,
    payload: &'a serde_json::Value,
}

/// 事件内容的去重键：`"{source}:" + sha256(json{source, event_type, external_issue_id, payload})`
///
/// 同一webhook的重复投递得到相同的键，写入时落到同一行事件日志。
pub fn compute_dedupe_key(
    source: &str,
    event_type: &str,
    external_issue_id: &str,
    payload: &serde_json::Value,
) -> String {
    let body = DedupeBody {
        source,
        event_type,
        external_issue_id,
        payload,
    };
    // 由字符串与Value组成的结构体序列化不会失败
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{source}:{digest:x}")
}
