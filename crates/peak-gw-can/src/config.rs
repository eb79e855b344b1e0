//! 网关配置
//!
//! `GatewayConfig` 可以直接构造，也可以从 TOML 表反序列化：
//!
//! ```toml
//! send_host = "192.168.1.10"
//! send_port = 40001
//! recv_host = "0.0.0.0"
//! recv_port = 40000
//! receive_timeout_ms = 500
//! ```

use crate::CanError;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

pub const DEFAULT_SEND_PORT: u16 = 40001;
pub const DEFAULT_RECV_HOST: &str = "0.0.0.0";
pub const DEFAULT_RECV_PORT: u16 = 40000;
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 100;

/// 网关适配器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// 网关接收地址（本机发往网关），必填
    pub send_host: String,

    /// 网关接收端口
    #[serde(default = "default_send_port")]
    pub send_port: u16,

    /// 本机接收地址（网关发往本机）
    #[serde(default = "default_recv_host")]
    pub recv_host: String,

    /// 本机接收端口
    #[serde(default = "default_recv_port")]
    pub recv_port: u16,

    /// `recv` 未指定超时时使用的默认超时（毫秒）
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// 发送缓冲区满时等待可写的最长时间（毫秒）
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_send_port() -> u16 {
    DEFAULT_SEND_PORT
}

fn default_recv_host() -> String {
    DEFAULT_RECV_HOST.to_string()
}

fn default_recv_port() -> u16 {
    DEFAULT_RECV_PORT
}

fn default_receive_timeout_ms() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}

fn default_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT_MS
}

impl GatewayConfig {
    /// 使用默认端口和超时创建配置
    pub fn new(send_host: impl Into<String>) -> Self {
        Self {
            send_host: send_host.into(),
            send_port: DEFAULT_SEND_PORT,
            recv_host: default_recv_host(),
            recv_port: DEFAULT_RECV_PORT,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
        }
    }

    /// 从 TOML 表解析配置
    ///
    /// # 错误
    /// 缺少 `send_host`、字段类型错误或出现未知字段时返回 `CanError::Configuration`
    pub fn from_table(table: &toml::Table) -> Result<Self, CanError> {
        toml::Value::Table(table.clone())
            .try_into()
            .map_err(|e: toml::de::Error| CanError::Configuration(e.to_string()))
    }

    /// 从 TOML 文本解析配置
    pub fn from_toml_str(text: &str) -> Result<Self, CanError> {
        toml::from_str(text).map_err(|e: toml::de::Error| CanError::Configuration(e.to_string()))
    }

    /// 解析网关接收地址
    pub fn send_addr(&self) -> Result<SocketAddr, CanError> {
        resolve(&self.send_host, self.send_port)
    }

    /// 解析本机接收地址
    pub fn recv_addr(&self) -> Result<SocketAddr, CanError> {
        resolve(&self.recv_host, self.recv_port)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// 解析 host:port，取第一个结果
fn resolve(host: &str, port: u16) -> Result<SocketAddr, CanError> {
    if host.is_empty() {
        return Err(CanError::Configuration("Host must not be empty".to_string()));
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|e| CanError::Configuration(format!("Cannot resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| CanError::Configuration(format!("No address found for {}:{}", host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::new("192.168.1.10");
        assert_eq!(config.send_port, 40001);
        assert_eq!(config.recv_host, "0.0.0.0");
        assert_eq!(config.recv_port, 40000);
        assert_eq!(config.receive_timeout(), Duration::from_millis(500));
        assert_eq!(config.send_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_toml_defaults() {
        let config = GatewayConfig::from_toml_str(r#"send_host = "10.0.0.2""#).unwrap();
        assert_eq!(config, GatewayConfig::new("10.0.0.2"));
    }

    #[test]
    fn test_from_toml_overrides() {
        let text = r#"
            send_host = "127.0.0.1"
            send_port = 5000
            recv_host = "127.0.0.1"
            recv_port = 5001
            receive_timeout_ms = 20
        "#;
        let config = GatewayConfig::from_toml_str(text).unwrap();
        assert_eq!(config.send_port, 5000);
        assert_eq!(config.recv_port, 5001);
        assert_eq!(config.receive_timeout_ms, 20);
        assert_eq!(config.send_timeout_ms, DEFAULT_SEND_TIMEOUT_MS);
    }

    #[test]
    fn test_missing_send_host_rejected() {
        let result = GatewayConfig::from_toml_str("send_port = 1");
        assert!(matches!(result, Err(CanError::Configuration(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut table = toml::Table::new();
        table.insert("send_host".into(), "127.0.0.1".into());
        table.insert("bitrate".into(), toml::Value::Integer(500_000));
        assert!(matches!(
            GatewayConfig::from_table(&table),
            Err(CanError::Configuration(_))
        ));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let mut table = toml::Table::new();
        table.insert("send_host".into(), "127.0.0.1".into());
        table.insert("send_port".into(), "not-a-port".into());
        assert!(matches!(
            GatewayConfig::from_table(&table),
            Err(CanError::Configuration(_))
        ));
    }

    #[test]
    fn test_resolve_addresses() {
        let mut config = GatewayConfig::new("127.0.0.1");
        config.recv_host = "127.0.0.1".into();
        config.recv_port = 0;
        assert_eq!(config.send_addr().unwrap(), "127.0.0.1:40001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.recv_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_resolve_invalid_host() {
        let config = GatewayConfig::new("");
        assert!(matches!(config.send_addr(), Err(CanError::Configuration(_))));

        let config = GatewayConfig::new("not a host name");
        assert!(matches!(config.send_addr(), Err(CanError::Configuration(_))));
    }
}
