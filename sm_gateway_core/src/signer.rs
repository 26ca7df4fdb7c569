//! SM2 签名验签
//!
//! `hash = true` 时先按 GM/T 0009 计算 Z 值（默认 userId `1234567812345678`）并做 SM3 杂凑，
//! 否则原文按大端整数对 n 取模后作为 e 进入签名运算。签名可输出 DER 或定长 r || s。

use crate::der::{self, tag, Reader};
use crate::error::{Error, Result};
use crate::types::{KeyPair, PrivateScalar, PublicPoint, SignatureFormat, SignatureScheme, WireText};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use libsm::sm2::ecc::{EccCtx, Point};
use libsm::sm2::signature::{SigCtx, Signature};
use libsm::sm3::hash::Sm3Hash;
use num_bigint::BigUint;
use tracing::debug;

const COMPONENT_LEN: usize = 32;

/// 计算 SM3 哈希
pub fn sm3_digest(data: &[u8]) -> [u8; 32] {
    Sm3Hash::new(data).get_hash()
}

fn load_secret(ctx: &SigCtx, scalar: &PrivateScalar) -> Result<BigUint> {
    ctx.load_seckey(scalar.as_bytes())
        .map_err(|e| Error::InvalidKey(format!("SM2 private key rejected: {}", e)))
}

fn load_public(ctx: &SigCtx, point: &PublicPoint) -> Result<Point> {
    ctx.load_pubkey(point.as_bytes())
        .map_err(|e| Error::InvalidKey(format!("SM2 public key rejected: {}", e)))
}

fn left_pad(bytes: &[u8]) -> Result<[u8; COMPONENT_LEN]> {
    if bytes.len() > COMPONENT_LEN {
        return Err(Error::Crypto("SM2 signature component too large".to_string()));
    }
    let mut out = [0u8; COMPONENT_LEN];
    out[COMPONENT_LEN - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

/// 不杂凑时的 e：原文按大端整数对曲线阶取模，补齐为 32 字节
fn raw_digest(message: &[u8]) -> Result<[u8; COMPONENT_LEN]> {
    let e = BigUint::from_bytes_be(message) % EccCtx::new().get_n();
    left_pad(&e.to_bytes_be())
}

/// 生成 SM2 密钥对
pub fn generate_keypair() -> Result<KeyPair> {
    let ctx = SigCtx::new();
    let (pk, sk) = ctx
        .new_keypair()
        .map_err(|e| Error::Crypto(format!("SM2 keypair generation failed: {}", e)))?;
    let public = ctx
        .serialize_pubkey(&pk, false)
        .map_err(|e| Error::Crypto(e.to_string()))?;

    Ok(KeyPair {
        private_scalar: PrivateScalar::from_bytes(&left_pad(&sk.to_bytes_be())?)?,
        public_point: PublicPoint::from_bytes(&public)?,
    })
}

/// 由私钥推导公钥
pub fn derive_public_key(scalar: &PrivateScalar) -> Result<PublicPoint> {
    let ctx = SigCtx::new();
    let sk = load_secret(&ctx, scalar)?;
    let pk = ctx
        .pk_from_sk(&sk)
        .map_err(|e| Error::InvalidKey(format!("failed to derive public key: {}", e)))?;
    let public = ctx
        .serialize_pubkey(&pk, false)
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    PublicPoint::from_bytes(&public)
}

/// SM2 签名
pub fn sign(message: &[u8], private_key: &PrivateScalar, scheme: &SignatureScheme) -> Result<Vec<u8>> {
    let ctx = SigCtx::new();
    let sk = load_secret(&ctx, private_key)?;

    let signature = if scheme.hash {
        let pk = ctx
            .pk_from_sk(&sk)
            .map_err(|e| Error::InvalidKey(format!("failed to derive public key: {}", e)))?;
        ctx.sign(message, &sk, &pk)
    } else {
        ctx.sign_raw(&raw_digest(message)?, &sk)
    }
    .map_err(|e| Error::Crypto(format!("SM2 signing failed: {}", e)))?;

    let r = left_pad(&signature.get_r().to_bytes_be())?;
    let s = left_pad(&signature.get_s().to_bytes_be())?;
    Ok(encode_signature(&r, &s, scheme.format))
}

/// SM2 验签
///
/// 签名格式错误或不匹配返回 `Ok(false)`；只有公钥非法才返回错误。
pub fn verify(
    message: &[u8],
    signature: &[u8],
    public_key: &PublicPoint,
    scheme: &SignatureScheme,
) -> Result<bool> {
    let ctx = SigCtx::new();
    let pk = load_public(&ctx, public_key)?;

    let (r, s) = match decode_signature(signature, scheme.format) {
        Some(components) => components,
        None => {
            debug!("Signature of {} bytes is not well-formed", signature.len());
            return Ok(false);
        }
    };
    let signature = Signature::new(&r, &s);

    let result = if scheme.hash {
        ctx.verify(message, &pk, &signature)
    } else {
        ctx.verify_raw(&raw_digest(message)?, &pk, &signature)
    };

    match result {
        Ok(valid) => Ok(valid),
        Err(e) => {
            debug!("SM2 verification rejected signature: {}", e);
            Ok(false)
        }
    }
}

/// 按格式编码 (r, s)
pub fn encode_signature(r: &[u8; 32], s: &[u8; 32], format: SignatureFormat) -> Vec<u8> {
    match format {
        SignatureFormat::Der => der::encode_sequence(&[
            &der::encode_unsigned_integer(r),
            &der::encode_unsigned_integer(s),
        ]),
        SignatureFormat::Raw => [r.as_slice(), s.as_slice()].concat(),
    }
}

/// 解析签名为定长 (r, s)，格式不符返回 None
pub fn decode_signature(signature: &[u8], format: SignatureFormat) -> Option<([u8; 32], [u8; 32])> {
    match format {
        SignatureFormat::Raw => {
            if signature.len() != COMPONENT_LEN * 2 {
                return None;
            }
            let r = left_pad(&signature[..COMPONENT_LEN]).ok()?;
            let s = left_pad(&signature[COMPONENT_LEN..]).ok()?;
            Some((r, s))
        }
        SignatureFormat::Der => {
            let content = der::parse_single(signature, tag::SEQUENCE).ok()?;
            let mut reader = Reader::new(content);
            let r = reader.read_unsigned_integer().ok()?;
            let s = reader.read_unsigned_integer().ok()?;
            reader.finish().ok()?;
            Some((left_pad(r).ok()?, left_pad(s).ok()?))
        }
    }
}

/// 签名转为请求头文本
pub fn encode_wire(signature: &[u8], text: WireText) -> String {
    match text {
        WireText::Hex => hex::encode(signature),
        WireText::Base64 => BASE64.encode(signature),
    }
}

/// 请求头文本转为签名字节，无法解码返回 None
pub fn decode_wire(signature: &str, text: WireText) -> Option<Vec<u8>> {
    let signature = signature.trim();
    match text {
        WireText::Hex => hex::decode(signature).ok(),
        WireText::Base64 => BASE64.decode(signature).ok(),
    }
}

/// 签名并编码为请求头文本
pub fn sign_to_wire(message: &[u8], private_key: &PrivateScalar, scheme: &SignatureScheme) -> Result<String> {
    let signature = sign(message, private_key, scheme)?;
    Ok(encode_wire(&signature, scheme.text))
}

/// 校验请求头文本形式的签名
pub fn verify_wire(
    message: &[u8],
    signature: &str,
    public_key: &PublicPoint,
    scheme: &SignatureScheme,
) -> Result<bool> {
    match decode_wire(signature, scheme.text) {
        Some(bytes) => verify(message, &bytes, public_key, scheme),
        None => {
            // 公钥仍需校验，保证非法密钥总是报错
            load_public(&SigCtx::new(), public_key)?;
            Ok(false)
        }
    }
}
