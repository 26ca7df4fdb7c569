//! SM2 密钥 DER/PEM 编解码
//!
//! 私钥编码（规范形式）：
//! ```text
//! SEQUENCE {
//!   INTEGER 1,
//!   OCTET STRING (32) privateKey,
//!   [0] EXPLICIT OBJECT IDENTIFIER 1.2.156.10197.1.301,
//!   [1] EXPLICIT BIT STRING (00 || 04 || X || Y)   -- 可选
//! }
//! ```
//! 公钥编码：
//! ```text
//! SEQUENCE { SEQUENCE { OBJECT IDENTIFIER sm2, NULL }, BIT STRING (00 || 04 || X || Y) }
//! ```
//! 解码还兼容 PKCS#8 包装（OCTET STRING 内嵌上述私钥 SEQUENCE）以及
//! `id-ecPublicKey + sm2` 形式的算法标识。

use crate::der::{self, tag, Reader};
use crate::error::{Error, Result};
use crate::types::{PrivateScalar, PublicPoint, PRIVATE_SCALAR_LEN, PUBLIC_POINT_LEN};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// 1.2.156.10197.1.301
pub const SM2_OID: [u8; 8] = [0x2a, 0x81, 0x1c, 0xcf, 0x55, 0x01, 0x82, 0x2d];
/// 1.2.840.10045.2.1
pub const EC_PUBLIC_KEY_OID: [u8; 7] = [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];

const PEM_LINE_WIDTH: usize = 64;

/// PEM 标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemLabel {
    PrivateKey,
    PublicKey,
}

impl PemLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PemLabel::PrivateKey => "PRIVATE KEY",
            PemLabel::PublicKey => "PUBLIC KEY",
        }
    }
}

/// 解码后的私钥
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPrivateKey {
    pub scalar: PrivateScalar,
    /// 结构中携带的公钥（如果有）
    pub public: Option<PublicPoint>,
}

/// 编码私钥
pub fn encode_private_key(scalar: &PrivateScalar, public: Option<&PublicPoint>) -> Vec<u8> {
    let version = der::encode_small_integer(1);
    let private_key = der::encode_tlv(tag::OCTET_STRING, scalar.as_bytes());
    let parameters = der::encode_tlv(
        tag::CONTEXT_0,
        &der::encode_tlv(tag::OBJECT_IDENTIFIER, &SM2_OID),
    );

    match public {
        Some(point) => {
            let public_key = der::encode_tlv(
                tag::CONTEXT_1,
                &der::encode_bit_string(point.as_bytes()),
            );
            der::encode_sequence(&[&version, &private_key, &parameters, &public_key])
        }
        None => der::encode_sequence(&[&version, &private_key, &parameters]),
    }
}

/// 编码公钥
pub fn encode_public_key(point: &PublicPoint) -> Vec<u8> {
    let algorithm = der::encode_sequence(&[
        &der::encode_tlv(tag::OBJECT_IDENTIFIER, &SM2_OID),
        &der::encode_tlv(tag::NULL, &[]),
    ]);
    der::encode_sequence(&[&algorithm, &der::encode_bit_string(point.as_bytes())])
}

/// 解码私钥，按结构形态识别规范形式与 PKCS#8 形式
pub fn decode_private_key(bytes: &[u8]) -> Result<DecodedPrivateKey> {
    let outer = der::parse_single(bytes, tag::SEQUENCE)?;
    let mut reader = Reader::new(outer);
    let _version = reader.read_unsigned_integer()?;

    match reader.peek_tag() {
        Some(tag::OCTET_STRING) => decode_ec_private_key_body(&mut reader),
        Some(tag::SEQUENCE) => {
            let algorithm = reader.read(tag::SEQUENCE)?;
            check_algorithm(algorithm)?;
            let wrapped = reader.read(tag::OCTET_STRING)?;
            // attributes [0]
            reader.read_optional(tag::CONTEXT_0)?;
            reader.finish()?;

            let inner = der::parse_single(wrapped, tag::SEQUENCE)?;
            let mut inner_reader = Reader::new(inner);
            let _inner_version = inner_reader.read_unsigned_integer()?;
            decode_ec_private_key_body(&mut inner_reader)
        }
        Some(found) => Err(Error::UnexpectedTag {
            expected: tag::OCTET_STRING,
            found,
        }),
        None => Err(Error::MalformedDer("private key structure ends after version".to_string())),
    }
}

/// 解码 version 之后的部分：OCTET STRING、[0] 参数、[1] 公钥
fn decode_ec_private_key_body(reader: &mut Reader<'_>) -> Result<DecodedPrivateKey> {
    let raw = reader.read(tag::OCTET_STRING)?;
    if raw.is_empty() || raw.len() > PRIVATE_SCALAR_LEN {
        return Err(Error::MalformedDer(format!(
            "private key octet string of {} bytes",
            raw.len()
        )));
    }
    // 部分编码器会省略前导零
    let mut padded = [0u8; PRIVATE_SCALAR_LEN];
    padded[PRIVATE_SCALAR_LEN - raw.len()..].copy_from_slice(raw);
    let scalar = PrivateScalar::from_bytes(&padded)?;

    if let Some(parameters) = reader.read_optional(tag::CONTEXT_0)? {
        let oid = der::parse_single(parameters, tag::OBJECT_IDENTIFIER)?;
        if oid != SM2_OID {
            return Err(Error::UnsupportedAlgorithm(der::oid_to_string(oid)?));
        }
    }

    let public = match reader.read_optional(tag::CONTEXT_1)? {
        Some(explicit) => {
            let mut bit_reader = Reader::new(explicit);
            let bits = bit_reader.read_bit_string()?;
            bit_reader.finish()?;
            Some(point_from_bits(bits)?)
        }
        None => None,
    };

    reader.finish()?;
    Ok(DecodedPrivateKey { scalar, public })
}

/// 解码公钥
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicPoint> {
    let outer = der::parse_single(bytes, tag::SEQUENCE)?;
    let mut reader = Reader::new(outer);
    let algorithm = reader.read(tag::SEQUENCE)?;
    check_algorithm(algorithm)?;
    let bits = reader.read_bit_string()?;
    reader.finish()?;
    point_from_bits(bits)
}

/// 校验算法标识：`{ sm2, NULL? }` 或 `{ id-ecPublicKey, sm2 }`
fn check_algorithm(content: &[u8]) -> Result<()> {
    let mut reader = Reader::new(content);
    let oid = reader.read(tag::OBJECT_IDENTIFIER)?;

    if oid == SM2_OID {
        reader.read_optional(tag::NULL)?;
    } else if oid == EC_PUBLIC_KEY_OID {
        let curve = reader.read(tag::OBJECT_IDENTIFIER)?;
        if curve != SM2_OID {
            return Err(Error::UnsupportedAlgorithm(der::oid_to_string(curve)?));
        }
    } else {
        return Err(Error::UnsupportedAlgorithm(der::oid_to_string(oid)?));
    }

    reader.finish()
}

fn point_from_bits(bits: &[u8]) -> Result<PublicPoint> {
    if bits.len() != PUBLIC_POINT_LEN || bits[0] != 0x04 {
        return Err(Error::MalformedDer(format!(
            "public key bit string of {} bytes is not an uncompressed point",
            bits.len()
        )));
    }
    PublicPoint::from_bytes(bits)
}

/// DER 转 PEM，base64 每 64 字符换行
pub fn pem_wrap(der_bytes: &[u8], label: PemLabel) -> String {
    let encoded = BASE64.encode(der_bytes);
    let mut pem = String::with_capacity(encoded.len() + encoded.len() / PEM_LINE_WIDTH + 64);
    pem.push_str("-----BEGIN ");
    pem.push_str(label.as_str());
    pem.push_str("-----\n");
    // base64 输出均为 ASCII，按字节切分安全
    for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END ");
    pem.push_str(label.as_str());
    pem.push_str("-----");
    pem
}

/// PEM 转 DER，返回 (DER, 标签)
pub fn pem_unwrap(pem: &str) -> Result<(Vec<u8>, String)> {
    let mut lines = pem.lines().map(str::trim).filter(|l| !l.is_empty());

    let begin = lines
        .next()
        .ok_or_else(|| Error::MalformedPem("empty input".to_string()))?;
    let label = begin
        .strip_prefix("-----BEGIN ")
        .and_then(|rest| rest.strip_suffix("-----"))
        .ok_or_else(|| Error::MalformedPem("missing BEGIN marker".to_string()))?
        .to_string();
    let end_marker = format!("-----END {}-----", label);

    let mut body = String::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line == end_marker {
            closed = true;
            break;
        }
        if line.starts_with("-----") {
            return Err(Error::MalformedPem(format!("unexpected marker: {}", line)));
        }
        body.push_str(line);
    }
    if !closed {
        return Err(Error::MalformedPem(format!("missing END marker for {}", label)));
    }
    if lines.next().is_some() {
        return Err(Error::MalformedPem("data after END marker".to_string()));
    }

    let der_bytes = BASE64
        .decode(body.as_bytes())
        .map_err(|e| Error::MalformedPem(e.to_string()))?;
    Ok((der_bytes, label))
}

/// 私钥转 PEM
pub fn private_key_to_pem(scalar: &PrivateScalar, public: Option<&PublicPoint>) -> String {
    pem_wrap(&encode_private_key(scalar, public), PemLabel::PrivateKey)
}

/// 公钥转 PEM
pub fn public_key_to_pem(point: &PublicPoint) -> String {
    pem_wrap(&encode_public_key(point), PemLabel::PublicKey)
}

fn looks_like_pem(text: &str) -> bool {
    text.trim_start().starts_with("-----BEGIN ")
}

/// 解析私钥文本：PEM 或 64 位十六进制
pub fn parse_private_key(text: &str) -> Result<DecodedPrivateKey> {
    if !looks_like_pem(text) {
        return Ok(DecodedPrivateKey {
            scalar: PrivateScalar::from_hex(text)?,
            public: None,
        });
    }
    let (der_bytes, label) = pem_unwrap(text)?;
    match label.as_str() {
        "PRIVATE KEY" | "EC PRIVATE KEY" => decode_private_key(&der_bytes),
        other => Err(Error::MalformedPem(format!(
            "expected PRIVATE KEY, found {}",
            other
        ))),
    }
}

/// 解析公钥文本：PEM 或 130 位十六进制
pub fn parse_public_key(text: &str) -> Result<PublicPoint> {
    if !looks_like_pem(text) {
        return PublicPoint::from_hex(text);
    }
    let (der_bytes, label) = pem_unwrap(text)?;
    if label != PemLabel::PublicKey.as_str() {
        return Err(Error::MalformedPem(format!("expected PUBLIC KEY, found {}", label)));
    }
    decode_public_key(&der_bytes)
}
