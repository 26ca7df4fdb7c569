//! 应用凭据与凭据存储
//!
//! 凭据由外部存储维护（键 `app:<appid>`，值为 JSON），核心只读。

use crate::cipher::{Sm4Iv, Sm4Key};
use crate::error::{Error, Result};
use crate::keys;
use crate::signer;
use crate::types::{PrivateScalar, PublicPoint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

/// 默认 nonce 窗口（秒）
pub const DEFAULT_NONCE_WINDOW: u64 = 300;

fn default_status() -> String {
    "active".to_string()
}

fn default_nonce_window() -> u64 {
    DEFAULT_NONCE_WINDOW
}

/// 凭据存储中的原始记录
#[derive(Clone, Serialize, Deserialize)]
pub struct AppCredential {
    pub appid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sm2_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sm2_private_key_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sm2_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sm2_public_key_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_sm2_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_sm2_private_key_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_sm2_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_sm2_public_key_pem: Option<String>,
    pub sm4_key: String,
    pub sm4_iv: String,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default = "default_nonce_window")]
    pub nonce_window: u64,
}

// 密钥字段不输出
impl fmt::Debug for AppCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredential")
            .field("appid", &self.appid)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("ip_whitelist", &self.ip_whitelist)
            .field("nonce_window", &self.nonce_window)
            .finish_non_exhaustive()
    }
}

/// `_pem` 字段优先，其次为十六进制字段
fn pick<'a>(pem: &'a Option<String>, plain: &'a Option<String>) -> Option<&'a str> {
    pem.as_deref()
        .or(plain.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn resolve_private(pem: &Option<String>, plain: &Option<String>) -> Result<Option<(PrivateScalar, Option<PublicPoint>)>> {
    match pick(pem, plain) {
        Some(text) => {
            let decoded = keys::parse_private_key(text)?;
            Ok(Some((decoded.scalar, decoded.public)))
        }
        None => Ok(None),
    }
}

fn resolve_public(pem: &Option<String>, plain: &Option<String>) -> Result<Option<PublicPoint>> {
    pick(pem, plain).map(keys::parse_public_key).transpose()
}

/// 以公钥字段为准，缺失时取私钥结构内嵌的公钥，再不行由私钥推导
fn complete_public(
    public: Option<PublicPoint>,
    private: &Option<(PrivateScalar, Option<PublicPoint>)>,
) -> Result<Option<PublicPoint>> {
    match (public, private) {
        (Some(point), _) => Ok(Some(point)),
        (None, Some((_, Some(embedded)))) => Ok(Some(embedded.clone())),
        (None, Some((scalar, None))) => signer::derive_public_key(scalar).map(Some),
        (None, None) => Ok(None),
    }
}

impl AppCredential {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }

    /// 解析为强类型凭据
    pub fn resolve(&self) -> Result<ResolvedCredential> {
        let client_private = resolve_private(&self.sm2_private_key_pem, &self.sm2_private_key)?;
        let client_public = complete_public(
            resolve_public(&self.sm2_public_key_pem, &self.sm2_public_key)?,
            &client_private,
        )?
        .ok_or_else(|| {
            Error::InvalidKey(format!("app {} has no SM2 public key", self.appid))
        })?;

        let gateway_private =
            resolve_private(&self.gateway_sm2_private_key_pem, &self.gateway_sm2_private_key)?;
        let gateway_public = complete_public(
            resolve_public(&self.gateway_sm2_public_key_pem, &self.gateway_sm2_public_key)?,
            &gateway_private,
        )?;

        Ok(ResolvedCredential {
            appid: self.appid.clone(),
            active: self.is_active(),
            client_private_key: client_private.map(|(scalar, _)| scalar),
            client_public_key: client_public,
            gateway_private_key: gateway_private.map(|(scalar, _)| scalar),
            gateway_public_key: gateway_public,
            sm4_key: Sm4Key::parse(&self.sm4_key)?,
            sm4_iv: Sm4Iv::parse(&self.sm4_iv)?,
            ip_whitelist: self.ip_whitelist.clone(),
            nonce_window: self.nonce_window,
        })
    }
}

/// 解析后的凭据
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub appid: String,
    pub active: bool,
    /// 客户端私钥，仅客户端侧持有
    pub client_private_key: Option<PrivateScalar>,
    /// 客户端公钥，网关验签使用
    pub client_public_key: PublicPoint,
    /// 网关私钥，用于响应签名
    pub gateway_private_key: Option<PrivateScalar>,
    /// 网关公钥，客户端校验响应签名使用
    pub gateway_public_key: Option<PublicPoint>,
    pub sm4_key: Sm4Key,
    pub sm4_iv: Sm4Iv,
    pub ip_whitelist: Vec<String>,
    pub nonce_window: u64,
}

fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

impl ResolvedCredential {
    /// 白名单为空时不限制
    pub fn ip_allowed(&self, client_ip: Option<&str>) -> bool {
        if self.ip_whitelist.is_empty() {
            return true;
        }
        let Some(client_ip) = client_ip.map(str::trim) else {
            return false;
        };
        let parsed = client_ip.parse::<IpAddr>().ok().map(normalize_ip);
        self.ip_whitelist.iter().any(|allowed| {
            let allowed = allowed.trim();
            match (parsed, allowed.parse::<IpAddr>().ok().map(normalize_ip)) {
                (Some(a), Some(b)) => a == b,
                _ => allowed == client_ip,
            }
        })
    }
}

/// 凭据存储
///
/// 实现可以阻塞（远程查询），调用方不得在持有其他锁时调用。
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    fn get(&self, appid: &str) -> Result<Option<AppCredential>>;
}

/// 内存凭据存储
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    apps: RwLock<HashMap<String, AppCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<AppCredential>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// 解析 JSON：记录数组，或以 `app:<appid>` 为键的对象（值可以是对象或 JSON 字符串）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid credential JSON: {}", e)))?;

        let records = match value {
            Value::Array(items) => items
                .into_iter()
                .map(parse_record)
                .collect::<Result<Vec<_>>>()?,
            Value::Object(map) => map
                .into_iter()
                .map(|(key, item)| {
                    let record = parse_record(item)?;
                    let expected = key.strip_prefix("app:").unwrap_or(&key);
                    if expected != record.appid {
                        return Err(Error::Config(format!(
                            "credential key {} does not match appid {}",
                            key, record.appid
                        )));
                    }
                    Ok(record)
                })
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(Error::Config(
                    "credential JSON must be an array or an object".to_string(),
                ))
            }
        };

        Ok(Self::from_records(records))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let store = Self::from_json_str(&content)?;
        info!("Loaded {} app credentials from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn insert(&self, credential: AppCredential) {
        debug!("Registering credential for app {}", credential.appid);
        self.apps
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(credential.appid.clone(), credential);
    }

    pub fn remove(&self, appid: &str) -> Option<AppCredential> {
        self.apps.write().unwrap_or_else(|e| e.into_inner()).remove(appid)
    }

    pub fn len(&self) -> usize {
        self.apps.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_record(value: Value) -> Result<AppCredential> {
    let value = match value {
        // 键值存储中常以字符串保存 JSON
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid credential record: {}", e)))?,
        other => other,
    };
    serde_json::from_value(value).map_err(|e| Error::Config(format!("invalid credential record: {}", e)))
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, appid: &str) -> Result<Option<AppCredential>> {
        Ok(self
            .apps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(appid)
            .cloned())
    }
}
