//! # PEAK Gateway CAN Adapter Layer
//!
//! PEAK 以太网 CAN 网关的适配层：通过两个独立的 UDP 端点收发网关记录。
//!
//! ## 模块
//!
//! - `endpoint`: 单个 UDP 端点（阻塞发送、带超时接收、可取消）
//! - `gateway`: `PeakGatewayBus`，组合收发端点与编解码
//! - `config`: `GatewayConfig`（可从 TOML 加载）
//! - `registry`: 按名称打开适配器

use std::time::Duration;
use thiserror::Error;

// 重新导出 peak-gw-protocol 中的帧类型与错误
pub use peak_gw_protocol::{CanFrame, DecodeError, EncodeError};

pub mod config;
pub mod endpoint;
pub mod gateway;
pub mod registry;

pub use config::GatewayConfig;
pub use endpoint::UdpEndpoint;
pub use gateway::{BusState, GatewayBuilder, PeakGatewayBus};
pub use registry::{AdapterFactory, AdapterRegistry, BoxedAdapter};

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    /// 地址无法解析/绑定、未知接口、配置表非法
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodeError),
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Bus not open")]
    NotOpen,
}

impl CanError {
    /// 是否为致命错误（需要关闭并重新打开总线）
    pub fn is_fatal(&self) -> bool {
        matches!(self, CanError::Configuration(_) | CanError::Transport(_))
    }
}

/// CAN 适配器接口
///
/// 所有方法都只需要 `&self`，同一个适配器可以通过 `Arc` 在发送线程和接收线程之间共享。
pub trait CanAdapter {
    /// 发送一帧
    fn send(&self, frame: &CanFrame) -> Result<(), CanError>;

    /// 接收一帧
    ///
    /// # 参数
    /// - `timeout`: 等待时间，`None` 使用适配器配置的默认超时
    ///
    /// # 返回
    /// - `Ok(Some(frame))`: 收到数据帧
    /// - `Ok(None)`: 超时内没有数据帧
    /// - `Err(e)`: 传输失败、被取消或总线未打开
    fn recv(&self, timeout: Option<Duration>) -> Result<Option<CanFrame>, CanError>;

    /// 非阻塞接收
    fn try_recv(&self) -> Result<Option<CanFrame>, CanError> {
        self.recv(Some(Duration::ZERO))
    }

    /// 关闭适配器（幂等，任意状态下可调用）
    fn shutdown(&self);

    /// 通道描述（用于日志与展示）
    fn channel_info(&self) -> String;
}

impl<T: CanAdapter + ?Sized> CanAdapter for Box<T> {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }

    fn recv(&self, timeout: Option<Duration>) -> Result<Option<CanFrame>, CanError> {
        (**self).recv(timeout)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }

    fn channel_info(&self) -> String {
        (**self).channel_info()
    }
}
