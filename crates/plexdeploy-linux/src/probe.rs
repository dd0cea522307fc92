//! 网络探测（TCP 端口、HTTP、TLS 握手、DNS 解析）。
//!
//! 说明：
//! - 全部为只读探测，带显式超时
//! - HTTP/TLS 使用 reqwest 的阻塞客户端（rustls）
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// 本地端口是否可以建立 TCP 连接。
pub fn tcp_reachable(port: u16, timeout: Duration) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, timeout).is_ok()
}

/// 发起一次 HTTP GET，返回状态码。
///
/// 异常处理：
/// - 连接失败/超时返回错误；任何 HTTP 状态码（含 4xx/5xx）都视为“有响应”
pub fn http_status(url: &str, timeout: Duration) -> Result<u16> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("创建 HTTP 客户端失败")?;
    let resp = client
        .get(url)
        .send()
        .with_context(|| format!("HTTP 请求失败: {url}"))?;
    Ok(resp.status().as_u16())
}

/// 对域名执行一次 HTTPS 请求以验证 TLS 握手（证书需有效）。
pub fn tls_handshake(domain: &str, timeout: Duration) -> Result<()> {
    http_status(&format!("https://{domain}/"), timeout)
        .map(|_| ())
        .with_context(|| format!("TLS 握手失败: {domain}"))
}

/// 解析域名的全部地址。
///
/// 异常处理：
/// - 解析失败或结果为空返回错误
pub fn resolve(domain: &str) -> Result<BTreeSet<IpAddr>> {
    let addrs: BTreeSet<IpAddr> = (domain, 80)
        .to_socket_addrs()
        .with_context(|| format!("域名解析失败: {domain}"))?
        .map(|a| a.ip())
        .collect();
    if addrs.is_empty() {
        return Err(anyhow!("域名没有解析记录: {domain}"));
    }
    Ok(addrs)
}

/// 获取本机公网地址（依次尝试多个公共回显服务）。
pub fn public_ip(timeout: Duration) -> Option<IpAddr> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .ok()?;
    ["https://api.ipify.org", "https://ifconfig.me/ip", "https://icanhazip.com"]
        .iter()
        .find_map(|url| {
            let text = client.get(*url).send().ok()?.text().ok()?;
            text.trim().parse().ok()
        })
}
