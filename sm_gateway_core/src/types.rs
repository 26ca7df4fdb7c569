//! 数据类型定义

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SM2 私钥标量长度
pub const PRIVATE_SCALAR_LEN: usize = 32;
/// 未压缩公钥点长度（04 || X || Y）
pub const PUBLIC_POINT_LEN: usize = 65;

/// SM2 私钥标量（32 字节大端）
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateScalar([u8; PRIVATE_SCALAR_LEN]);

impl PrivateScalar {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; PRIVATE_SCALAR_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "private key must be {} bytes, got {}",
                PRIVATE_SCALAR_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    /// 从 64 位十六进制字符串解析
    pub fn from_hex(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.len() != PRIVATE_SCALAR_LEN * 2 {
            return Err(Error::InvalidKey(format!(
                "private key hex must be {} chars, got {}",
                PRIVATE_SCALAR_LEN * 2,
                text.len()
            )));
        }
        let bytes = hex::decode(text).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PRIVATE_SCALAR_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

// 私钥不进入日志
impl fmt::Debug for PrivateScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateScalar(..)")
    }
}

/// SM2 未压缩公钥点
#[derive(Clone, PartialEq, Eq)]
pub struct PublicPoint([u8; PUBLIC_POINT_LEN]);

impl PublicPoint {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; PUBLIC_POINT_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_POINT_LEN,
                bytes.len()
            ))
        })?;
        if raw[0] != 0x04 {
            return Err(Error::InvalidKey(format!(
                "public key must be uncompressed (0x04 prefix), got 0x{:02x}",
                raw[0]
            )));
        }
        Ok(Self(raw))
    }

    /// 从 130 位十六进制字符串解析；128 位（缺少 04 前缀）时自动补齐
    pub fn from_hex(text: &str) -> Result<Self> {
        let text = text.trim();
        let bytes = match text.len() {
            130 => hex::decode(text),
            128 => hex::decode(format!("04{}", text)),
            n => {
                return Err(Error::InvalidKey(format!(
                    "public key hex must be 130 chars, got {}",
                    n
                )))
            }
        }
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_POINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicPoint({})", self.to_hex())
    }
}

/// SM2 密钥对
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_scalar: PrivateScalar,
    pub public_point: PublicPoint,
}

/// 签名编码形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureFormat {
    /// SEQUENCE { INTEGER r, INTEGER s }
    Der,
    /// 定长 r || s（64 字节）
    Raw,
}

/// 签名在请求头中的文本形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireText {
    Hex,
    Base64,
}

/// 签名协议版本参数，签名方与验签方必须一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureScheme {
    /// 是否先做 SM3 杂凑（含默认 userId 的 Z 值）
    pub hash: bool,
    pub format: SignatureFormat,
    pub text: WireText,
}

impl Default for SignatureScheme {
    fn default() -> Self {
        Self {
            hash: true,
            format: SignatureFormat::Der,
            text: WireText::Hex,
        }
    }
}

/// 参与签名的请求字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignableRequest {
    pub method: String,
    pub uri: String,
    pub query: String,
    pub body: String,
    pub nonce: String,
    pub timestamp: String,
}

/// 请求头名称
pub mod headers {
    pub const APP_ID: &str = "X-App-ID";
    pub const SIGNATURE: &str = "X-Signature";
    pub const NONCE: &str = "X-Nonce";
    pub const TIMESTAMP: &str = "X-Timestamp";
    pub const RESPONSE_SIGNATURE: &str = "X-Response-Signature";
    pub const ENCRYPTED: &str = "X-Encrypted";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}
