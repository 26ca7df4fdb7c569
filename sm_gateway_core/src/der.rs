//! ASN.1 DER 基础编解码
//!
//! 只覆盖密钥与签名用到的少量类型：SEQUENCE、INTEGER、BIT STRING、
//! OCTET STRING、NULL、OBJECT IDENTIFIER 以及 [0]/[1] 显式上下文标签。
//!
//! 长度字段采用定长编码：小于 0x80 时单字节；否则 `0x80|n` 后跟 n 个大端字节。
//! 编码总是输出最短形式，解码同时接受非最短的长格式。

use crate::error::{Error, Result};

/// 标签常量
pub mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const BIT_STRING: u8 = 0x03;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;
    pub const CONTEXT_0: u8 = 0xa0;
    pub const CONTEXT_1: u8 = 0xa1;
}

/// 编码长度字段
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// 编码完整 TLV
pub fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    encode_length(content.len(), &mut out);
    out.extend_from_slice(content);
    out
}

/// 将多个已编码元素拼成 SEQUENCE
pub fn encode_sequence(parts: &[&[u8]]) -> Vec<u8> {
    encode_tlv(tag::SEQUENCE, &parts.concat())
}

/// 编码非负大端整数为 INTEGER（去掉多余前导零，最高位为 1 时补 0x00）
pub fn encode_unsigned_integer(value: &[u8]) -> Vec<u8> {
    let skip = value.iter().take_while(|&&b| b == 0).count();
    let trimmed = &value[skip..];
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.is_empty() || trimmed[0] & 0x80 != 0 {
        content.push(0x00);
    }
    content.extend_from_slice(trimmed);
    encode_tlv(tag::INTEGER, &content)
}

/// 编码小整数（版本号）
pub fn encode_small_integer(value: u8) -> Vec<u8> {
    encode_unsigned_integer(&[value])
}

/// 编码 BIT STRING，未使用位数固定为 0
pub fn encode_bit_string(bits: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(bits.len() + 1);
    content.push(0x00);
    content.extend_from_slice(bits);
    encode_tlv(tag::BIT_STRING, &content)
}

/// 编码 OID 内容（不含标签与长度）
pub fn encode_oid(arcs: &[u64]) -> Result<Vec<u8>> {
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(Error::InvalidParam(format!("invalid OID arcs: {:?}", arcs)));
    }
    let mut out = Vec::new();
    push_base128(arcs[0] * 40 + arcs[1], &mut out);
    for &arc in &arcs[2..] {
        push_base128(arc, &mut out);
    }
    Ok(out)
}

fn push_base128(mut value: u64, out: &mut Vec<u8>) {
    let mut chunk = [0u8; 10];
    let mut i = chunk.len();
    loop {
        i -= 1;
        chunk[i] = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = chunk.len() - 1;
    for (idx, byte) in chunk.iter().enumerate().skip(i) {
        out.push(if idx == last { *byte } else { byte | 0x80 });
    }
}

/// 将 OID 内容转为点分形式，用于错误信息与日志
pub fn oid_to_string(content: &[u8]) -> Result<String> {
    if content.is_empty() {
        return Err(Error::MalformedDer("empty OBJECT IDENTIFIER".to_string()));
    }
    let mut arcs: Vec<u64> = Vec::new();
    let mut value: u64 = 0;
    for (i, &byte) in content.iter().enumerate() {
        if value > (u64::MAX >> 7) {
            return Err(Error::MalformedDer("OID arc overflow".to_string()));
        }
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            if arcs.is_empty() {
                let first = if value < 80 { value / 40 } else { 2 };
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        } else if i == content.len() - 1 {
            return Err(Error::MalformedDer("truncated OID arc".to_string()));
        }
    }
    Ok(arcs
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("."))
}

/// DER 读取器，按顺序消费 TLV
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// 查看下一个标签而不消费
    pub fn peek_tag(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// 读取任意 TLV，返回标签与内容
    pub fn read_any(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = self
            .peek_tag()
            .ok_or_else(|| Error::MalformedDer("unexpected end of input".to_string()))?;
        self.pos += 1;
        let len = self.read_length()?;
        if len > self.remaining() {
            return Err(Error::MalformedDer(format!(
                "declared length {} exceeds remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        let content = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok((tag, content))
    }

    /// 读取指定标签的 TLV
    pub fn read(&mut self, expected: u8) -> Result<&'a [u8]> {
        match self.peek_tag() {
            Some(found) if found != expected => Err(Error::UnexpectedTag { expected, found }),
            _ => self.read_any().map(|(_, content)| content),
        }
    }

    /// 下一个标签匹配时读取，否则返回 None
    pub fn read_optional(&mut self, expected: u8) -> Result<Option<&'a [u8]>> {
        if self.peek_tag() == Some(expected) {
            self.read(expected).map(Some)
        } else {
            Ok(None)
        }
    }

    /// 读取 BIT STRING，要求未使用位数为 0
    pub fn read_bit_string(&mut self) -> Result<&'a [u8]> {
        let content = self.read(tag::BIT_STRING)?;
        match content.split_first() {
            Some((&0, bits)) => Ok(bits),
            Some((unused, _)) => Err(Error::MalformedDer(format!(
                "BIT STRING with {} unused bits",
                unused
            ))),
            None => Err(Error::MalformedDer("empty BIT STRING".to_string())),
        }
    }

    /// 读取非负 INTEGER，返回去掉符号填充后的大端字节
    pub fn read_unsigned_integer(&mut self) -> Result<&'a [u8]> {
        let content = self.read(tag::INTEGER)?;
        match content.split_first() {
            None => Err(Error::MalformedDer("empty INTEGER".to_string())),
            Some((&first, _)) if first & 0x80 != 0 => {
                Err(Error::MalformedDer("negative INTEGER".to_string()))
            }
            Some((&0, rest)) if !rest.is_empty() => Ok(rest),
            Some(_) => Ok(content),
        }
    }

    /// 要求数据已全部消费
    pub fn finish(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::MalformedDer(format!(
                "{} trailing bytes after structure",
                self.remaining()
            )))
        }
    }

    fn read_length(&mut self) -> Result<usize> {
        let first = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::MalformedDer("missing length".to_string()))?;
        self.pos += 1;
        if first < 0x80 {
            return Ok(first as usize);
        }
        let count = (first & 0x7f) as usize;
        if count == 0 {
            return Err(Error::MalformedDer("indefinite length".to_string()));
        }
        if count > std::mem::size_of::<usize>() {
            return Err(Error::MalformedDer(format!("length of {} bytes", count)));
        }
        if count > self.remaining() {
            return Err(Error::MalformedDer("truncated length".to_string()));
        }
        let len = self.buf[self.pos..self.pos + count]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        self.pos += count;
        Ok(len)
    }
}

/// 解析恰好一个外层 TLV，且不允许尾随数据
pub fn parse_single(buf: &[u8], expected: u8) -> Result<&[u8]> {
    let mut reader = Reader::new(buf);
    let content = reader.read(expected)?;
    reader.finish()?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_boundaries() {
        let mut out = Vec::new();
        encode_length(127, &mut out);
        assert_eq!(out, vec![0x7f]);

        out.clear();
        encode_length(128, &mut out);
        assert_eq!(out, vec![0x81, 0x80]);

        out.clear();
        encode_length(256, &mut out);
        assert_eq!(out, vec![0x82, 0x01, 0x00]);
    }

    #[test]
    fn test_tlv_with_127_and_128_bytes() {
        let short = encode_tlv(tag::OCTET_STRING, &[0xaa; 127]);
        assert_eq!(&short[..2], &[0x04, 0x7f]);
        assert_eq!(short.len(), 129);

        let long = encode_tlv(tag::OCTET_STRING, &[0xaa; 128]);
        assert_eq!(&long[..3], &[0x04, 0x81, 0x80]);
        assert_eq!(long.len(), 131);
    }

    #[test]
    fn test_reader_accepts_non_minimal_length() {
        // 长度 3 用长格式 0x81 0x03 表示
        let buf = [0x04, 0x81, 0x03, 1, 2, 3];
        let content = parse_single(&buf, tag::OCTET_STRING).unwrap();
        assert_eq!(content, &[1, 2, 3]);
    }

    #[test]
    fn test_reader_rejects_truncated() {
        let buf = [0x30, 0x05, 0x02, 0x01];
        assert!(matches!(
            parse_single(&buf, tag::SEQUENCE),
            Err(Error::MalformedDer(_))
        ));
    }

    #[test]
    fn test_reader_rejects_trailing_bytes() {
        let buf = [0x05, 0x00, 0x00];
        assert!(matches!(
            parse_single(&buf, tag::NULL),
            Err(Error::MalformedDer(_))
        ));
    }

    #[test]
    fn test_reader_tag_mismatch() {
        let buf = [0x02, 0x01, 0x01];
        match parse_single(&buf, tag::SEQUENCE) {
            Err(Error::UnexpectedTag { expected, found }) => {
                assert_eq!(expected, tag::SEQUENCE);
                assert_eq!(found, tag::INTEGER);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let buf = [0x30, 0x80, 0x00, 0x00];
        assert!(parse_single(&buf, tag::SEQUENCE).is_err());
    }

    #[test]
    fn test_sm2_oid_encoding() {
        let oid = encode_oid(&[1, 2, 156, 10197, 1, 301]).unwrap();
        assert_eq!(oid, hex::decode("2a811ccf5501822d").unwrap());
        assert_eq!(oid_to_string(&oid).unwrap(), "1.2.156.10197.1.301");

        let ec = encode_oid(&[1, 2, 840, 10045, 2, 1]).unwrap();
        assert_eq!(ec, hex::decode("2a8648ce3d0201").unwrap());
    }

    #[test]
    fn test_unsigned_integer_padding() {
        assert_eq!(encode_unsigned_integer(&[0x00, 0x00, 0x7f]), vec![0x02, 0x01, 0x7f]);
        assert_eq!(encode_unsigned_integer(&[0x80]), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(encode_small_integer(1), vec![0x02, 0x01, 0x01]);

        let encoded = encode_unsigned_integer(&[0xff, 0x01]);
        let mut reader = Reader::new(&encoded);
        assert_eq!(reader.read_unsigned_integer().unwrap(), &[0xff, 0x01]);
    }
}
