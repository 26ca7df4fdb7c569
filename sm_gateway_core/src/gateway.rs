//! 网关侧请求认证与响应封装
//!
//! 入站：读取请求头 -> 查凭据 -> IP 白名单 -> 解密报文体 -> 构造签名原文并验签 -> 防重放 -> 计数。
//! 出站：网关私钥对明文签名 -> SM4 加密 -> 输出响应头。

use crate::canonical;
use crate::cipher;
use crate::credential::{CredentialStore, ResolvedCredential};
use crate::error::{Error, Result};
use crate::rate::RateCounter;
use crate::replay::{ReplayGuard, ReplayOutcome};
use crate::signer;
use crate::types::{headers, SignatureScheme};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 网关配置
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 签名协议参数
    pub scheme: SignatureScheme,
    /// nonce 记录清理周期
    pub sweep_interval: Duration,
    /// nonce 最小位数
    pub nonce_min_len: usize,
    /// nonce 最大位数
    pub nonce_max_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            scheme: SignatureScheme::default(),
            sweep_interval: Duration::from_secs(60),
            nonce_min_len: 10,
            nonce_max_len: 20,
        }
    }
}

/// 拒绝原因
///
/// 对外只暴露状态码与通用消息，具体原因仅写日志。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("malformed header {0}")]
    MalformedHeader(&'static str),
    #[error("unknown app")]
    UnknownApp,
    #[error("app disabled")]
    AppDisabled,
    #[error("client ip not allowed")]
    IpNotAllowed,
    #[error("body cannot be decrypted")]
    BodyUndecryptable,
    #[error("bad signature")]
    BadSignature,
    #[error("timestamp outside nonce window")]
    Expired,
    #[error("nonce replayed")]
    Replayed,
    #[error("internal error")]
    Internal,
}

impl Rejection {
    /// HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Rejection::MissingHeader(_)
            | Rejection::MalformedHeader(_)
            | Rejection::UnknownApp
            | Rejection::BodyUndecryptable
            | Rejection::BadSignature => 401,
            Rejection::AppDisabled
            | Rejection::IpNotAllowed
            | Rejection::Expired
            | Rejection::Replayed => 403,
            Rejection::Internal => 500,
        }
    }

    /// 返回给客户端的消息
    pub fn public_message(&self) -> &'static str {
        match self.status_code() {
            401 => "Unauthorized",
            403 => "Forbidden",
            _ => "Internal Server Error",
        }
    }
}

/// 入站请求
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    /// 小写头名 -> 值
    headers: HashMap<String, String>,
    /// base64 编码的密文，空串表示无报文体
    pub body: String,
    pub client_ip: Option<String>,
}

impl InboundRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn with_client_ip(mut self, ip: &str) -> Self {
        self.client_ip = Some(ip.to_string());
        self
    }

    /// 按名称读取请求头（不区分大小写）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// 认证通过的请求
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    pub appid: String,
    /// 解密后的报文体
    pub body: Vec<u8>,
    pub nonce: String,
    pub timestamp: u64,
    /// 该应用的累计请求数
    pub request_count: u64,
    pub credential: ResolvedCredential,
}

/// 封装后的响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedResponse {
    /// base64 密文；报文体为空时为空串
    pub body: String,
    pub signature: String,
    pub encrypted: bool,
}

impl SealedResponse {
    /// 需要附加的响应头
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (headers::RESPONSE_SIGNATURE, self.signature.clone()),
            (headers::ENCRYPTED, self.encrypted.to_string()),
        ]
    }
}

/// 网关认证器
pub struct Gateway {
    store: Arc<dyn CredentialStore>,
    replay: Arc<ReplayGuard>,
    rate: RateCounter,
    config: GatewayConfig,
}

fn required<'a>(request: &'a InboundRequest, name: &'static str) -> std::result::Result<&'a str, Rejection> {
    request
        .header(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(Rejection::MissingHeader(name))
}

impl Gateway {
    pub fn new(store: Arc<dyn CredentialStore>, config: GatewayConfig) -> Self {
        Self::with_replay_guard(store, Arc::new(ReplayGuard::new()), config)
    }

    /// 使用共享的防重放守卫（多个网关实例共用）
    pub fn with_replay_guard(
        store: Arc<dyn CredentialStore>,
        replay: Arc<ReplayGuard>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            replay,
            rate: RateCounter::new(),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn replay_guard(&self) -> &Arc<ReplayGuard> {
        &self.replay
    }

    /// 启动 nonce 清理任务，周期通常取 `config().sweep_interval`
    pub fn spawn_replay_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        info!("Starting nonce sweeper every {}s", interval.as_secs());
        self.replay.spawn_sweeper(interval)
    }

    /// 查询应用请求计数
    pub fn request_count(&self, appid: &str) -> u64 {
        self.rate.get(appid)
    }

    fn load_credential(&self, appid: &str) -> std::result::Result<ResolvedCredential, Rejection> {
        let record = match self.store.get(appid) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(Rejection::UnknownApp),
            Err(e) => {
                warn!("Credential lookup for app {} failed: {}", appid, e);
                return Err(Rejection::Internal);
            }
        };
        if !record.is_active() {
            return Err(Rejection::AppDisabled);
        }
        record.resolve().map_err(|e| {
            warn!("Credential for app {} is unusable: {}", appid, e);
            Rejection::Internal
        })
    }

    fn check_nonce(&self, nonce: &str) -> bool {
        (self.config.nonce_min_len..=self.config.nonce_max_len).contains(&nonce.len())
            && nonce.bytes().all(|b| b.is_ascii_digit())
    }

    /// 认证入站请求
    pub fn authenticate(
        &self,
        request: &InboundRequest,
        now: u64,
    ) -> std::result::Result<AuthenticatedRequest, Rejection> {
        let result = self.authenticate_inner(request, now);
        if let Err(rejection) = &result {
            warn!(
                "Rejected {} {} from app {:?}: {} ({})",
                request.method,
                request.path,
                request.header(headers::APP_ID),
                rejection,
                rejection.status_code()
            );
        }
        result
    }

    fn authenticate_inner(
        &self,
        request: &InboundRequest,
        now: u64,
    ) -> std::result::Result<AuthenticatedRequest, Rejection> {
        let appid = required(request, headers::APP_ID)?;
        let signature = required(request, headers::SIGNATURE)?;
        let nonce = required(request, headers::NONCE)?;
        let timestamp_text = required(request, headers::TIMESTAMP)?;

        if !self.check_nonce(nonce) {
            return Err(Rejection::MalformedHeader(headers::NONCE));
        }
        if !timestamp_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Rejection::MalformedHeader(headers::TIMESTAMP));
        }
        let timestamp: u64 = timestamp_text
            .parse()
            .map_err(|_| Rejection::MalformedHeader(headers::TIMESTAMP))?;

        let credential = self.load_credential(appid)?;

        if !credential.ip_allowed(request.client_ip.as_deref()) {
            return Err(Rejection::IpNotAllowed);
        }

        let body = cipher::decrypt_body(&request.body, &credential.sm4_key, &credential.sm4_iv)
            .map_err(|e| {
                debug!("Body decryption for app {} failed: {}", appid, e);
                Rejection::BodyUndecryptable
            })?;
        let body_text = std::str::from_utf8(&body).map_err(|_| Rejection::BodyUndecryptable)?;

        let message = canonical::build(
            &request.method,
            &request.path,
            &request.query,
            body_text,
            nonce,
            timestamp_text,
        );
        let valid = signer::verify_wire(
            &message,
            signature,
            &credential.client_public_key,
            &self.config.scheme,
        )
        .map_err(|e| {
            warn!("Public key of app {} is unusable: {}", appid, e);
            Rejection::Internal
        })?;
        if !valid {
            return Err(Rejection::BadSignature);
        }

        match self
            .replay
            .check_and_register(appid, nonce, timestamp, now, credential.nonce_window)
        {
            ReplayOutcome::Ok => {}
            ReplayOutcome::Expired => return Err(Rejection::Expired),
            ReplayOutcome::Replayed => return Err(Rejection::Replayed),
        }

        let request_count = self.rate.increment(appid);
        debug!(
            "Authenticated {} {} for app {} ({} bytes, request #{})",
            request.method,
            request.path,
            appid,
            body.len(),
            request_count
        );

        Ok(AuthenticatedRequest {
            appid: appid.to_string(),
            body,
            nonce: nonce.to_string(),
            timestamp,
            request_count,
            credential,
        })
    }

    /// 按 appid 封装响应
    pub fn seal_response(&self, appid: &str, body: &[u8]) -> Result<SealedResponse> {
        let record = self
            .store
            .get(appid)?
            .ok_or_else(|| Error::Config(format!("unknown app {}", appid)))?;
        self.seal_response_for(&record.resolve()?, body)
    }

    /// 使用已解析的凭据封装响应
    pub fn seal_response_for(&self, credential: &ResolvedCredential, body: &[u8]) -> Result<SealedResponse> {
        let gateway_key = credential.gateway_private_key.as_ref().ok_or_else(|| {
            Error::Config(format!("app {} has no gateway SM2 private key", credential.appid))
        })?;

        let signature = signer::sign_to_wire(body, gateway_key, &self.config.scheme)?;
        let encrypted_body = cipher::encrypt_body(body, &credential.sm4_key, &credential.sm4_iv)?;

        Ok(SealedResponse {
            encrypted: !body.is_empty(),
            body: encrypted_body,
            signature,
        })
    }
}
