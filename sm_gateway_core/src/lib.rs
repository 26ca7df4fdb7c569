//! 国密 API 网关请求认证核心库
//!
//! 提供网关与客户端两侧共用的协议实现，包括：
//! - SM2 密钥 DER/PEM 编解码
//! - 签名原文构造与 SM2 签名/验签
//! - SM4-CBC 报文加解密
//! - nonce 防重放与请求计数

pub mod canonical;
pub mod cipher;
pub mod client;
pub mod credential;
pub mod der;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod rate;
pub mod replay;
pub mod signer;
pub mod types;

pub use cipher::{Sm4Iv, Sm4Key};
pub use client::{ClientConfig, GatewayClient, GatewayResponse, SignedRequest};
pub use credential::{AppCredential, CredentialStore, MemoryCredentialStore, ResolvedCredential};
pub use error::{Error, Result};
pub use gateway::{AuthenticatedRequest, Gateway, GatewayConfig, InboundRequest, Rejection, SealedResponse};
pub use rate::RateCounter;
pub use replay::{ReplayGuard, ReplayOutcome};
pub use types::*;
