//! 网关客户端
//!
//! 请求：构造签名原文 -> SM2 签名 -> SM4 加密报文体 -> 附加认证头。
//! 响应：按 `X-Encrypted` 解密 -> 用网关公钥校验 `X-Response-Signature`。

use crate::canonical;
use crate::cipher::{self, Sm4Iv, Sm4Key};
use crate::error::{Error, Result};
use crate::replay::unix_now;
use crate::signer;
use crate::types::{headers, PrivateScalar, PublicPoint, SignatureScheme};
use rand::Rng;
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 网关 URL
    pub gateway_url: String,
    /// 请求超时（秒）
    pub timeout: u64,
    /// 是否验证 TLS 证书
    pub verify_tls: bool,
    pub appid: String,
    /// 客户端 SM2 私钥
    pub private_key: PrivateScalar,
    /// 网关 SM2 公钥；为空时跳过响应验签
    pub gateway_public_key: Option<PublicPoint>,
    pub sm4_key: Sm4Key,
    pub sm4_iv: Sm4Iv,
    pub scheme: SignatureScheme,
}

impl ClientConfig {
    /// 以默认网关地址与协议参数创建配置
    pub fn new(appid: &str, private_key: PrivateScalar, sm4_key: Sm4Key, sm4_iv: Sm4Iv) -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8082".to_string(),
            timeout: 30,
            verify_tls: true,
            appid: appid.to_string(),
            private_key,
            gateway_public_key: None,
            sm4_key,
            sm4_iv,
            scheme: SignatureScheme::default(),
        }
    }
}

/// 已签名待发送的请求
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    /// 请求头（含 Content-Type）
    pub headers: Vec<(&'static str, String)>,
    /// base64 密文报文体
    pub body: String,
}

impl SignedRequest {
    /// 按名称读取请求头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// 网关响应
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    /// 解密后的报文体
    pub body: Vec<u8>,
    /// 是否经过网关加密
    pub encrypted: bool,
    /// 响应签名是否已校验
    pub signature_verified: bool,
}

impl GatewayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 报文体按 UTF-8 输出
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 报文体按 JSON 解析
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Encoding(format!("response body is not valid JSON: {}", e)))
    }
}

/// 生成 20 位数字 nonce：10 位随机数 + 10 位秒级时间戳
pub fn generate_nonce() -> String {
    let random: u64 = rand::thread_rng().gen_range(0..10_000_000_000);
    format!("{:010}{:010}", random, unix_now() % 10_000_000_000)
}

/// 网关客户端
pub struct GatewayClient {
    config: ClientConfig,
    http_client: Client,
}

impl GatewayClient {
    /// 创建新的客户端实例
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 签名并加密请求，不涉及网络
    pub fn prepare(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: &str,
        now: u64,
    ) -> Result<SignedRequest> {
        self.prepare_with_nonce(method, path, query, body, &generate_nonce(), now)
    }

    /// 使用指定 nonce 签名并加密请求
    pub fn prepare_with_nonce(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: &str,
        nonce: &str,
        now: u64,
    ) -> Result<SignedRequest> {
        let method = method.to_ascii_uppercase();
        let timestamp = now.to_string();

        let message = canonical::build(&method, path, query, body, nonce, &timestamp);
        let signature = signer::sign_to_wire(&message, &self.config.private_key, &self.config.scheme)?;
        let encrypted = cipher::encrypt_body(body.as_bytes(), &self.config.sm4_key, &self.config.sm4_iv)?;

        debug!(
            "Prepared {} {} for app {} ({} plaintext bytes)",
            method,
            path,
            self.config.appid,
            body.len()
        );

        Ok(SignedRequest {
            method,
            path: path.to_string(),
            query: query.to_string(),
            headers: vec![
                (headers::APP_ID, self.config.appid.clone()),
                (headers::SIGNATURE, signature),
                (headers::NONCE, nonce.to_string()),
                (headers::TIMESTAMP, timestamp),
                (headers::CONTENT_TYPE, headers::OCTET_STREAM.to_string()),
            ],
            body: encrypted,
        })
    }

    /// 响应后处理：解密并校验签名
    ///
    /// 响应头的键不区分大小写。
    pub fn open_response(
        &self,
        status: u16,
        response_headers: &HashMap<String, String>,
        body: &str,
    ) -> Result<GatewayResponse> {
        let header = |name: &str| {
            response_headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.trim())
        };

        let encrypted = header(headers::ENCRYPTED).map_or(false, |v| v.eq_ignore_ascii_case("true"));
        let plaintext = if encrypted {
            cipher::decrypt_body(body, &self.config.sm4_key, &self.config.sm4_iv)?
        } else {
            body.as_bytes().to_vec()
        };

        let mut signature_verified = false;
        if status == 200 {
            match (header(headers::RESPONSE_SIGNATURE), &self.config.gateway_public_key) {
                (Some(signature), Some(public_key)) if !signature.is_empty() => {
                    if !signer::verify_wire(&plaintext, signature, public_key, &self.config.scheme)? {
                        return Err(Error::ResponseSignature);
                    }
                    signature_verified = true;
                }
                (None, Some(_)) => warn!("Response carries no signature, skipping verification"),
                _ => debug!("Response signature verification skipped"),
            }
        }

        Ok(GatewayResponse {
            status,
            body: plaintext,
            encrypted,
            signature_verified,
        })
    }

    /// 发送请求
    pub async fn send(&self, method: &str, path: &str, query: &str, body: &str) -> Result<GatewayResponse> {
        let request = self.prepare(method, path, query, body, unix_now())?;

        let mut url = format!("{}{}", self.config.gateway_url.trim_end_matches('/'), request.path);
        if !request.query.is_empty() {
            url.push('?');
            url.push_str(&request.query);
        }
        let http_method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::InvalidParam(format!("invalid HTTP method {}: {}", request.method, e)))?;

        info!("Sending {} {}", request.method, url);

        let mut builder = self.http_client.request(http_method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to connect to {}: {}", url, e)))?;

        let status = response.status().as_u16();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response from {}: {}", url, e)))?;

        debug!("Gateway answered {} with {} bytes", status, text.len());

        if !(200..300).contains(&status) {
            // 认证失败时网关返回明文错误
            let message = self
                .open_response(status, &response_headers, &text)
                .map(|r| r.text())
                .unwrap_or(text);
            return Err(Error::Api { status, message });
        }

        self.open_response(status, &response_headers, &text)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.config.gateway_url.trim_end_matches('/'));
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}
