//! 错误类型定义

use thiserror::Error;

/// 错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// DER 结构截断或长度字段与剩余数据不符
    #[error("Malformed DER: {0}")]
    MalformedDer(String),

    /// 标签与期望结构不符
    #[error("Unexpected DER tag: expected 0x{expected:02x}, found 0x{found:02x}")]
    UnexpectedTag { expected: u8, found: u8 },

    /// 不支持的算法 OID
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// PEM 文本无法解析
    #[error("Malformed PEM: {0}")]
    MalformedPem(String),

    /// SM2 密钥材料非法
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// SM4 密钥长度非法
    #[error("Invalid SM4 key length: {0}")]
    InvalidKeyLength(String),

    /// SM4 IV 长度非法
    #[error("Invalid SM4 IV length: {0}")]
    InvalidIvLength(String),

    /// 解密失败（填充错误或密文损坏）
    #[error("Decrypt failed: {0}")]
    DecryptFailed(String),

    /// 密码学错误
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// 网络错误
    #[error("Network error: {0}")]
    Network(String),

    /// 网关返回的非成功响应
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// 响应签名验证失败
    #[error("Response signature verification failed")]
    ResponseSignature,

    /// 参数错误
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 编解码错误
    #[error("Encoding/Decoding error: {0}")]
    Encoding(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 结果类型
pub type Result<T> = std::result::Result<T, Error>;
