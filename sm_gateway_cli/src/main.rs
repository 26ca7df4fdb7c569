//! 国密网关认证 CLI 工具

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sm_gateway_core::credential::CredentialStore;
use sm_gateway_core::{
    canonical, cipher, keys, signer, ClientConfig, GatewayClient, MemoryCredentialStore,
    PrivateScalar, PublicPoint, SignatureFormat, SignatureScheme, Sm4Iv, Sm4Key, WireText,
};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smgw")]
#[command(about = "国密 API 网关认证工具", long_about = None)]
struct Cli {
    /// 日志级别（trace/debug/info/warn/error）
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// 文本参数以 `@` 开头时按文件路径读取
fn read_arg(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("无法读取文件 {}", path)),
        None => Ok(value.to_string()),
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Der,
    Raw,
}

#[derive(Clone, Copy, ValueEnum)]
enum TextArg {
    Hex,
    Base64,
}

#[derive(Args)]
struct SchemeArgs {
    /// 不做 SM3 杂凑，直接对消息签名
    #[arg(long)]
    no_hash: bool,
    /// 签名编码
    #[arg(long, value_enum, default_value = "der")]
    format: FormatArg,
    /// 签名文本形式
    #[arg(long, value_enum, default_value = "hex")]
    text: TextArg,
}

impl SchemeArgs {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme {
            hash: !self.no_hash,
            format: match self.format {
                FormatArg::Der => SignatureFormat::Der,
                FormatArg::Raw => SignatureFormat::Raw,
            },
            text: match self.text {
                TextArg::Hex => WireText::Hex,
                TextArg::Base64 => WireText::Base64,
            },
        }
    }
}

#[derive(Args)]
struct Sm4Args {
    /// SM4 密钥（16 字符原文或 32 字符十六进制）
    #[arg(long)]
    key: String,
    /// SM4 IV（16 字符原文或 32 字符十六进制）
    #[arg(long)]
    iv: String,
}

impl Sm4Args {
    fn parse(&self) -> anyhow::Result<(Sm4Key, Sm4Iv)> {
        Ok((Sm4Key::parse(&self.key)?, Sm4Iv::parse(&self.iv)?))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// 生成 SM2 密钥对
    Keygen,
    /// 十六进制密钥转 PEM
    ToPem {
        /// 十六进制私钥（64 字符）
        #[arg(long)]
        private: Option<String>,
        /// 十六进制公钥（130 字符，或去掉 04 前缀的 128 字符）
        #[arg(long)]
        public: Option<String>,
    },
    /// PEM 密钥转十六进制
    FromPem {
        /// PEM 文本，或 @文件路径
        pem: String,
    },
    /// 输出签名原文
    Canonical {
        #[arg(long)]
        method: String,
        #[arg(long)]
        uri: String,
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long)]
        nonce: String,
        #[arg(long)]
        timestamp: String,
    },
    /// SM2 签名
    Sign {
        /// 私钥（十六进制或 PEM），或 @文件路径
        #[arg(long)]
        key: String,
        /// 待签名消息，或 @文件路径
        #[arg(long)]
        message: String,
        #[command(flatten)]
        scheme: SchemeArgs,
    },
    /// SM2 验签
    Verify {
        /// 公钥（十六进制或 PEM），或 @文件路径
        #[arg(long)]
        key: String,
        /// 原始消息，或 @文件路径
        #[arg(long)]
        message: String,
        /// 签名文本
        #[arg(long)]
        signature: String,
        #[command(flatten)]
        scheme: SchemeArgs,
    },
    /// SM4-CBC 加密，输出 base64
    Encrypt {
        #[command(flatten)]
        sm4: Sm4Args,
        /// 明文，或 @文件路径
        data: String,
    },
    /// SM4-CBC 解密 base64 密文
    Decrypt {
        #[command(flatten)]
        sm4: Sm4Args,
        /// base64 密文，或 @文件路径
        data: String,
    },
    /// SM3 摘要
    Digest {
        /// 数据，或 @文件路径
        data: String,
        /// 以 base64 输出
        #[arg(long)]
        base64: bool,
    },
    /// 发送签名请求
    Send {
        /// 凭据 JSON 文件
        #[arg(long)]
        credentials: PathBuf,
        #[arg(long)]
        appid: String,
        /// 网关地址
        #[arg(long, default_value = "http://127.0.0.1:8082")]
        gateway: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        path: String,
        #[arg(long, default_value = "")]
        query: String,
        /// 请求体，或 @文件路径
        #[arg(long, default_value = "")]
        body: String,
        /// 不验证 TLS 证书
        #[arg(long)]
        insecure: bool,
        #[command(flatten)]
        scheme: SchemeArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Keygen => do_keygen()?,
        Commands::ToPem { private, public } => do_to_pem(private.as_deref(), public.as_deref())?,
        Commands::FromPem { pem } => do_from_pem(&read_arg(&pem)?)?,
        Commands::Canonical {
            method,
            uri,
            query,
            body,
            nonce,
            timestamp,
        } => {
            let message = canonical::build(&method, &uri, &query, &body, &nonce, &timestamp);
            println!("{}", String::from_utf8_lossy(&message));
        }
        Commands::Sign { key, message, scheme } => {
            do_sign(&read_arg(&key)?, &read_arg(&message)?, &scheme.scheme())?
        }
        Commands::Verify {
            key,
            message,
            signature,
            scheme,
        } => do_verify(&read_arg(&key)?, &read_arg(&message)?, &signature, &scheme.scheme())?,
        Commands::Encrypt { sm4, data } => {
            let (key, iv) = sm4.parse()?;
            println!("{}", cipher::encrypt_body(read_arg(&data)?.as_bytes(), &key, &iv)?);
        }
        Commands::Decrypt { sm4, data } => {
            let (key, iv) = sm4.parse()?;
            let plaintext = cipher::decrypt_body(&read_arg(&data)?, &key, &iv)?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
        Commands::Digest { data, base64 } => {
            let digest = signer::sm3_digest(read_arg(&data)?.as_bytes());
            if base64 {
                println!("{}", BASE64.encode(digest));
            } else {
                println!("{}", hex::encode(digest));
            }
        }
        Commands::Send {
            credentials,
            appid,
            gateway,
            method,
            path,
            query,
            body,
            insecure,
            scheme,
        } => {
            let client = build_client(&credentials, &appid, &gateway, insecure, scheme.scheme())?;
            do_send(&client, &method, &path, &query, &read_arg(&body)?).await?;
        }
    }

    Ok(())
}

fn do_keygen() -> anyhow::Result<()> {
    let pair = signer::generate_keypair()?;

    println!("私钥: {}", pair.private_scalar.to_hex());
    println!("公钥: {}", pair.public_point.to_hex());
    println!();
    println!("{}", keys::private_key_to_pem(&pair.private_scalar, Some(&pair.public_point)));
    println!("{}", keys::public_key_to_pem(&pair.public_point));

    Ok(())
}

fn do_to_pem(private: Option<&str>, public: Option<&str>) -> anyhow::Result<()> {
    match (private, public) {
        (Some(private), public) => {
            let scalar = PrivateScalar::from_hex(private.trim())?;
            let point = match public {
                Some(public) => PublicPoint::from_hex(public.trim())?,
                None => signer::derive_public_key(&scalar)?,
            };
            println!("{}", keys::private_key_to_pem(&scalar, Some(&point)));
        }
        (None, Some(public)) => {
            let point = PublicPoint::from_hex(public.trim())?;
            println!("{}", keys::public_key_to_pem(&point));
        }
        (None, None) => anyhow::bail!("需要 --private 或 --public"),
    }
    Ok(())
}

fn do_from_pem(pem: &str) -> anyhow::Result<()> {
    let (_, label) = keys::pem_unwrap(pem)?;
    if label.ends_with("PRIVATE KEY") {
        let decoded = keys::parse_private_key(pem)?;
        println!("私钥: {}", decoded.scalar.to_hex());
        if let Some(public) = decoded.public {
            println!("公钥: {}", public.to_hex());
        }
    } else {
        let point = keys::parse_public_key(pem)?;
        println!("公钥: {}", point.to_hex());
    }
    Ok(())
}

fn do_sign(key: &str, message: &str, scheme: &SignatureScheme) -> anyhow::Result<()> {
    let decoded = keys::parse_private_key(key)?;
    debug!("Signing {} bytes", message.len());
    let signature = signer::sign_to_wire(message.as_bytes(), &decoded.scalar, scheme)?;
    println!("{}", signature);
    Ok(())
}

fn do_verify(key: &str, message: &str, signature: &str, scheme: &SignatureScheme) -> anyhow::Result<()> {
    let public_key = keys::parse_public_key(key)?;
    if signer::verify_wire(message.as_bytes(), signature, &public_key, scheme)? {
        println!("验签结果: 通过");
        Ok(())
    } else {
        anyhow::bail!("验签结果: 失败")
    }
}

fn build_client(
    credentials: &Path,
    appid: &str,
    gateway: &str,
    insecure: bool,
    scheme: SignatureScheme,
) -> anyhow::Result<GatewayClient> {
    let store = MemoryCredentialStore::from_json_file(credentials)?;
    let record = store
        .get(appid)?
        .ok_or_else(|| anyhow::anyhow!("凭据文件中没有应用 {}", appid))?;
    let resolved = record.resolve()?;
    let private_key = resolved
        .client_private_key
        .ok_or_else(|| anyhow::anyhow!("应用 {} 缺少客户端 SM2 私钥", appid))?;

    let mut config = ClientConfig::new(appid, private_key, resolved.sm4_key, resolved.sm4_iv);
    config.gateway_url = gateway.to_string();
    config.verify_tls = !insecure;
    config.gateway_public_key = resolved.gateway_public_key;
    config.scheme = scheme;

    Ok(GatewayClient::new(config)?)
}

async fn do_send(client: &GatewayClient, method: &str, path: &str, query: &str, body: &str) -> anyhow::Result<()> {
    let response = client.send(method, path, query, body).await?;

    println!("状态码: {}", response.status);
    println!(
        "响应签名: {}",
        if response.signature_verified { "已验证" } else { "未验证" }
    );
    println!("{}", response.text());

    Ok(())
}
