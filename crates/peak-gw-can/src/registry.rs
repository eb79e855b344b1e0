//! 适配器注册表
//!
//! 接口名到工厂函数的显式映射。注册表是普通的值，启动时构造并传给需要打开总线的代码，
//! 不存在全局可变状态。

use crate::config::GatewayConfig;
use crate::gateway::PeakGatewayBus;
use crate::{CanAdapter, CanError};
use std::collections::BTreeMap;
use tracing::debug;

/// 已打开的适配器
pub type BoxedAdapter = Box<dyn CanAdapter + Send + Sync>;

/// 工厂函数：从配置表打开适配器
pub type AdapterFactory = fn(&toml::Table) -> Result<BoxedAdapter, CanError>;

/// 配置表中选择接口的键
pub const INTERFACE_KEY: &str = "interface";

/// 适配器注册表
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含内置适配器（`peak-gateway`）的注册表
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(PeakGatewayBus::INTERFACE_NAME, open_peak_gateway);
        registry
    }

    /// 注册适配器，同名时覆盖旧的工厂函数
    pub fn register(&mut self, name: impl Into<String>, factory: AdapterFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 已注册的接口名（按字典序）
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// 按名称打开适配器
    ///
    /// # 错误
    /// - `CanError::Configuration`: 未知接口名或配置表非法
    /// - 工厂函数返回的其它错误（如端点绑定失败）
    pub fn open(&self, name: &str, table: &toml::Table) -> Result<BoxedAdapter, CanError> {
        let factory = self.factories.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.names().collect();
            CanError::Configuration(format!(
                "Unknown interface '{}' (available: {})",
                name,
                known.join(", ")
            ))
        })?;

        debug!("Opening '{}' adapter", name);
        factory(table)
    }

    /// 根据配置表中的 `interface` 键打开适配器
    ///
    /// 缺少 `interface` 时使用 `default_name`；其余键原样交给工厂函数。
    pub fn open_from_table(
        &self,
        table: &toml::Table,
        default_name: &str,
    ) -> Result<BoxedAdapter, CanError> {
        let mut rest = table.clone();
        let name = match rest.remove(INTERFACE_KEY) {
            Some(toml::Value::String(name)) => name,
            Some(other) => {
                return Err(CanError::Configuration(format!(
                    "'{}' must be a string, got {}",
                    INTERFACE_KEY,
                    other.type_str()
                )));
            },
            None => default_name.to_string(),
        };

        self.open(&name, &rest)
    }
}

fn open_peak_gateway(table: &toml::Table) -> Result<BoxedAdapter, CanError> {
    let config = GatewayConfig::from_table(table)?;
    Ok(Box::new(PeakGatewayBus::connect(config)?))
}
