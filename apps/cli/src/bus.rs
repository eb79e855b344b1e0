//! 总线参数与配置文件加载
//!
//! 配置来源按优先级从低到高：
//! 1. 配置文件中的 `[bus]` 表（`--config`）
//! 2. 命令行参数（`--send-host` 等）
//!
//! ```toml
//! [bus]
//! interface = "peak-gateway"
//! send_host = "192.168.10.110"
//! send_port = 40001
//! recv_host = "0.0.0.0"
//! recv_port = 40000
//! ```

use anyhow::{Context, Result, bail};
use clap::Args;
use peak_gw_can::registry::INTERFACE_KEY;
use peak_gw_can::{AdapterRegistry, BoxedAdapter, CanAdapter, PeakGatewayBus};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// 配置文件中总线配置所在的表
const BUS_TABLE: &str = "bus";

/// 总线参数（所有子命令共用）
#[derive(Args, Debug, Default)]
pub struct BusArgs {
    /// 配置文件路径（TOML，读取其中的 [bus] 表）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 适配器接口名
    #[arg(long, global = true)]
    pub interface: Option<String>,

    /// 网关地址（本机发往网关）
    #[arg(long, global = true)]
    pub send_host: Option<String>,

    /// 网关接收端口
    #[arg(long, global = true)]
    pub send_port: Option<u16>,

    /// 本机接收地址
    #[arg(long, global = true)]
    pub recv_host: Option<String>,

    /// 本机接收端口
    #[arg(long, global = true)]
    pub recv_port: Option<u16>,
}

impl BusArgs {
    /// 合并配置文件与命令行参数，得到传给注册表的配置表
    pub fn bus_table(&self) -> Result<toml::Table> {
        let mut table = match &self.config {
            Some(path) => load_bus_table(path)?,
            None => toml::Table::new(),
        };

        if let Some(interface) = &self.interface {
            table.insert(INTERFACE_KEY.into(), interface.clone().into());
        }
        if let Some(host) = &self.send_host {
            table.insert("send_host".into(), host.clone().into());
        }
        if let Some(port) = self.send_port {
            table.insert("send_port".into(), toml::Value::Integer(port.into()));
        }
        if let Some(host) = &self.recv_host {
            table.insert("recv_host".into(), host.clone().into());
        }
        if let Some(port) = self.recv_port {
            table.insert("recv_port".into(), toml::Value::Integer(port.into()));
        }

        Ok(table)
    }

    /// 通过注册表打开总线
    pub fn open(&self, registry: &AdapterRegistry) -> Result<BoxedAdapter> {
        let table = self.bus_table()?;
        let adapter = registry
            .open_from_table(&table, PeakGatewayBus::INTERFACE_NAME)
            .context("Failed to open CAN bus")?;
        info!("Connected to {}", adapter.channel_info());
        Ok(adapter)
    }
}

/// 读取配置文件中的 `[bus]` 表（不存在时返回空表）
fn load_bus_table(path: &Path) -> Result<toml::Table> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let mut document: toml::Table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    match document.remove(BUS_TABLE) {
        Some(toml::Value::Table(table)) => Ok(table),
        Some(_) => bail!("[{}] in {} must be a table", BUS_TABLE, path.display()),
        None => Ok(toml::Table::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_flags_only() {
        let args = BusArgs {
            send_host: Some("10.0.0.5".into()),
            recv_port: Some(41000),
            ..Default::default()
        };
        let table = args.bus_table().unwrap();
        assert_eq!(table["send_host"].as_str(), Some("10.0.0.5"));
        assert_eq!(table["recv_port"].as_integer(), Some(41000));
        assert!(!table.contains_key("send_port"));
    }

    #[test]
    fn test_flags_override_file() {
        let file = write_config(
            r#"
            [bus]
            interface = "peak-gateway"
            send_host = "192.168.10.110"
            send_port = 40001
            "#,
        );
        let args = BusArgs {
            config: Some(file.path().to_path_buf()),
            send_port: Some(5000),
            ..Default::default()
        };

        let table = args.bus_table().unwrap();
        assert_eq!(table["interface"].as_str(), Some("peak-gateway"));
        assert_eq!(table["send_host"].as_str(), Some("192.168.10.110"));
        assert_eq!(table["send_port"].as_integer(), Some(5000));
    }

    #[test]
    fn test_missing_bus_table() {
        let file = write_config("[logging]\nlevel = \"debug\"\n");
        let args = BusArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(args.bus_table().unwrap().is_empty());
    }

    #[test]
    fn test_bus_not_a_table() {
        let file = write_config("bus = 1\n");
        let args = BusArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(args.bus_table().is_err());
    }

    #[test]
    fn test_missing_file() {
        let args = BusArgs {
            config: Some(PathBuf::from("/nonexistent/gateway.toml")),
            ..Default::default()
        };
        assert!(args.bus_table().is_err());
    }

    #[test]
    fn test_open_without_send_host_fails() {
        let args = BusArgs::default();
        let err = args.open(&AdapterRegistry::with_builtin()).err().unwrap();
        assert!(format!("{:#}", err).contains("Configuration error"));
    }
}
