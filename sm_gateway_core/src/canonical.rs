//! 签名原文构造
//!
//! 字段固定顺序：method & uri & query & body & nonce & timestamp，
//! 以单个 `&` 连接，空字段保留为空串。客户端与网关必须逐字节一致。

use crate::types::SignableRequest;

const SEPARATOR: u8 = b'&';

/// 构造签名原文
pub fn build(
    method: &str,
    uri: &str,
    query: &str,
    body: &str,
    nonce: &str,
    timestamp: &str,
) -> Vec<u8> {
    let fields = [method, uri, query, body, nonce, timestamp];
    let capacity = fields.iter().map(|f| f.len()).sum::<usize>() + fields.len() - 1;
    let mut out = Vec::with_capacity(capacity);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.extend_from_slice(field.as_bytes());
    }
    out
}

impl SignableRequest {
    /// 按固定字段顺序序列化
    pub fn canonical_bytes(&self) -> Vec<u8> {
        build(
            &self.method,
            &self.uri,
            &self.query,
            &self.body,
            &self.nonce,
            &self.timestamp,
        )
    }
}
