//! SM4-CBC 报文加解密
//!
//! 密钥与 IV 的文本形式：16 字符按原始字节使用；32 字符按十六进制解码。
//! 其他长度一律拒绝，不做截断或补零。空明文对应空密文。

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use libsm::sm4::cipher::Sm4Cipher;
use libsm::sm4::{Cipher, Mode};
use std::fmt;

/// SM4 分组长度
pub const BLOCK_LEN: usize = 16;

/// SM4 密钥（16 字节）
#[derive(Clone, PartialEq, Eq)]
pub struct Sm4Key([u8; BLOCK_LEN]);

/// SM4 初始向量（16 字节）
#[derive(Clone, PartialEq, Eq)]
pub struct Sm4Iv([u8; BLOCK_LEN]);

/// 归一化文本形式为 16 字节；None 表示长度或编码不合法
fn normalize(text: &str) -> Option<[u8; BLOCK_LEN]> {
    let bytes = match text.len() {
        BLOCK_LEN => text.as_bytes().to_vec(),
        n if n == BLOCK_LEN * 2 => hex::decode(text).ok()?,
        _ => return None,
    };
    bytes.try_into().ok()
}

impl Sm4Key {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; BLOCK_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidKeyLength(format!("expected {} bytes, got {}", BLOCK_LEN, bytes.len()))
        })?;
        Ok(Self(raw))
    }

    /// 解析 16 字符原文或 32 字符十六进制
    pub fn parse(text: &str) -> Result<Self> {
        normalize(text).map(Self).ok_or_else(|| {
            Error::InvalidKeyLength(format!(
                "expected 16 raw or 32 hex characters, got {} characters",
                text.len()
            ))
        })
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_LEN] {
        &self.0
    }
}

impl Sm4Iv {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; BLOCK_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidIvLength(format!("expected {} bytes, got {}", BLOCK_LEN, bytes.len()))
        })?;
        Ok(Self(raw))
    }

    /// 解析 16 字符原文或 32 字符十六进制
    pub fn parse(text: &str) -> Result<Self> {
        normalize(text).map(Self).ok_or_else(|| {
            Error::InvalidIvLength(format!(
                "expected 16 raw or 32 hex characters, got {} characters",
                text.len()
            ))
        })
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_LEN] {
        &self.0
    }
}

impl fmt::Debug for Sm4Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sm4Key(..)")
    }
}

impl fmt::Debug for Sm4Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sm4Iv({})", hex::encode(self.0))
    }
}

/// SM4-CBC 加密（PKCS#7 填充）
pub fn encrypt(plaintext: &[u8], key: &Sm4Key, iv: &Sm4Iv) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
        return Ok(Vec::new());
    }
    let cipher = Cipher::new(key.as_bytes(), Mode::Cbc)
        .map_err(|e| Error::Crypto(format!("SM4 cipher init failed: {}", e)))?;
    cipher
        .encrypt(plaintext, iv.as_bytes())
        .map_err(|e| Error::Crypto(format!("SM4 encrypt failed: {}", e)))
}

/// 剥离 PKCS#7 填充，末尾 n 个字节必须全部等于 n
fn strip_padding(mut plaintext: Vec<u8>) -> Result<Vec<u8>> {
    let pad = match plaintext.last() {
        Some(&n) if (1..=BLOCK_LEN as u8).contains(&n) => n as usize,
        _ => return Err(Error::DecryptFailed("invalid PKCS#7 padding".to_string())),
    };
    if plaintext.len() < pad || plaintext[plaintext.len() - pad..].iter().any(|&b| b as usize != pad) {
        return Err(Error::DecryptFailed("invalid PKCS#7 padding".to_string()));
    }
    plaintext.truncate(plaintext.len() - pad);
    Ok(plaintext)
}

/// SM4-CBC 解密
///
/// 分组链接在此完成，填充校验不依赖 libsm 的宽松实现。
pub fn decrypt(ciphertext: &[u8], key: &Sm4Key, iv: &Sm4Iv) -> Result<Vec<u8>> {
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(Error::DecryptFailed(format!(
            "ciphertext length {} is not a multiple of {}",
            ciphertext.len(),
            BLOCK_LEN
        )));
    }
    let cipher = Sm4Cipher::new(key.as_bytes())
        .map_err(|e| Error::Crypto(format!("SM4 cipher init failed: {}", e)))?;

    let mut plaintext = Vec::with_capacity(ciphertext.len());
    let mut previous: &[u8] = iv.as_bytes();
    for block in ciphertext.chunks(BLOCK_LEN) {
        let decrypted = cipher
            .decrypt(block)
            .map_err(|e| Error::DecryptFailed(e.to_string()))?;
        plaintext.extend(decrypted.iter().zip(previous).map(|(a, b)| a ^ b));
        previous = block;
    }

    let plaintext = strip_padding(plaintext)?;
    // 非空密文解出空明文意味着填充被整块剥离，协议中不会出现
    if plaintext.is_empty() {
        return Err(Error::DecryptFailed("empty plaintext after unpadding".to_string()));
    }
    Ok(plaintext)
}

/// 加密并 base64 编码，用于报文体传输
pub fn encrypt_body(plaintext: &[u8], key: &Sm4Key, iv: &Sm4Iv) -> Result<String> {
    Ok(BASE64.encode(encrypt(plaintext, key, iv)?))
}

/// base64 解码后解密
pub fn decrypt_body(body: &str, key: &Sm4Key, iv: &Sm4Iv) -> Result<Vec<u8>> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let ciphertext = BASE64
        .decode(body)
        .map_err(|e| Error::DecryptFailed(format!("body is not base64: {}", e)))?;
    decrypt(&ciphertext, key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_iv() -> (Sm4Key, Sm4Iv) {
        (
            Sm4Key::parse("1234567890abcdef").unwrap(),
            Sm4Iv::parse("abcdef1234567890").unwrap(),
        )
    }

    #[test]
    fn test_raw_text_is_literal_bytes() {
        let key = Sm4Key::parse("1234567890abcdef").unwrap();
        assert_eq!(key.as_bytes(), b"1234567890abcdef");
    }

    #[test]
    fn test_hex_text_is_decoded() {
        let key = Sm4Key::parse("0123456789abcdeffedcba9876543210").unwrap();
        assert_eq!(
            key.as_bytes(),
            &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54, 0x32, 0x10]
        );
    }

    #[test]
    fn test_length_rejection() {
        assert!(matches!(Sm4Key::parse("123456789012345"), Err(Error::InvalidKeyLength(_))));
        assert!(matches!(Sm4Key::parse("12345678901234567"), Err(Error::InvalidKeyLength(_))));
        assert!(matches!(Sm4Iv::parse("123456789012345"), Err(Error::InvalidIvLength(_))));
        assert!(matches!(Sm4Iv::parse("12345678901234567"), Err(Error::InvalidIvLength(_))));
        assert!(matches!(Sm4Key::from_bytes(&[0u8; 15]), Err(Error::InvalidKeyLength(_))));
        assert!(matches!(Sm4Iv::from_bytes(&[0u8; 17]), Err(Error::InvalidIvLength(_))));
        // 32 字符但不是十六进制
        assert!(matches!(
            Sm4Key::parse("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(Error::InvalidKeyLength(_))
        ));
    }

    #[test]
    fn test_standard_vector() {
        // GB/T 32907 示例：单分组 ECB 结果即为 IV 全零时 CBC 的首块
        let key = Sm4Key::parse("0123456789abcdeffedcba9876543210").unwrap();
        let iv = Sm4Iv::from_bytes(&[0u8; 16]).unwrap();
        let plaintext = hex::decode("0123456789abcdeffedcba9876543210").unwrap();
        let ciphertext = encrypt(&plaintext, &key, &iv).unwrap();
        assert_eq!(ciphertext.len(), 32);
        assert_eq!(hex::encode(&ciphertext[..16]), "681edf34d206965e86b3e94f536e4246");
    }

    #[test]
    fn test_roundtrip_lengths() {
        let (key, iv) = key_iv();
        for len in [1usize, 15, 16, 17, 31, 32, 100, 1000, 10000] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ciphertext = encrypt(&plaintext, &key, &iv).unwrap();
            assert_eq!(ciphertext.len(), (len / 16 + 1) * 16);
            assert_eq!(decrypt(&ciphertext, &key, &iv).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_empty_is_identity() {
        let (key, iv) = key_iv();
        assert!(encrypt(&[], &key, &iv).unwrap().is_empty());
        assert!(decrypt(&[], &key, &iv).unwrap().is_empty());
        assert_eq!(encrypt_body(&[], &key, &iv).unwrap(), "");
        assert!(decrypt_body("", &key, &iv).unwrap().is_empty());
    }

    #[test]
    fn test_partial_block_rejected() {
        let (key, iv) = key_iv();
        let mut ciphertext = encrypt(b"hello world", &key, &iv).unwrap();
        ciphertext.pop();
        assert!(matches!(decrypt(&ciphertext, &key, &iv), Err(Error::DecryptFailed(_))));
    }

    #[test]
    fn test_bad_padding_rejected() {
        let (key, iv) = key_iv();
        // 明文恰好两块且以 0x02 结尾，去掉整块填充后末块只剩一个 0x02
        let mut plaintext = vec![b'a'; 31];
        plaintext.push(0x02);
        let mut ciphertext = encrypt(&plaintext, &key, &iv).unwrap();
        assert_eq!(ciphertext.len(), 48);
        ciphertext.truncate(32);
        assert!(matches!(decrypt(&ciphertext, &key, &iv), Err(Error::DecryptFailed(_))));
    }

    #[test]
    fn test_corrupted_last_block_rejected() {
        let (key, iv) = key_iv();
        let ciphertext = encrypt(b"hello world, sm4", &key, &iv).unwrap();
        // 翻转倒数第二块的字节会翻转末块明文中对应的填充字节
        let mut flipped = ciphertext.clone();
        flipped[ciphertext.len() - BLOCK_LEN - 1] ^= 0x01;
        assert!(matches!(decrypt(&flipped, &key, &iv), Err(Error::DecryptFailed(_))));

        // 只破坏非末字节的填充，末字节仍为 0x10
        let mut flipped = ciphertext.clone();
        flipped[ciphertext.len() - BLOCK_LEN - 2] ^= 0x01;
        assert!(matches!(decrypt(&flipped, &key, &iv), Err(Error::DecryptFailed(_))));
    }

    #[test]
    fn test_strip_padding() {
        assert_eq!(strip_padding(vec![1, 2, 3, 2, 2]).unwrap(), vec![1, 2, 3]);
        assert!(strip_padding(vec![1, 2, 3, 1, 2]).is_err());
        assert!(strip_padding(vec![0u8; 16]).is_err());
        assert!(strip_padding(vec![17u8; 16]).is_err());
    }

    #[test]
    fn test_body_roundtrip() {
        let (key, iv) = key_iv();
        let body = r#"{"name":"Test User","email":"test@example.com"}"#;
        let encoded = encrypt_body(body.as_bytes(), &key, &iv).unwrap();
        assert_eq!(decrypt_body(&encoded, &key, &iv).unwrap(), body.as_bytes());
        assert!(matches!(
            decrypt_body("***", &key, &iv),
            Err(Error::DecryptFailed(_))
        ));
    }
}
