//! PEAK 以太网网关总线
//!
//! `PeakGatewayBus` 组合两个独立寻址的 UDP 端点：
//! - 发送端点：连接到网关的 `send_host:send_port`
//! - 接收端点：绑定本机的 `recv_host:recv_port`
//!
//! 状态机：`Unopened -> Open -> Closed`，`Closed` 可以通过 `open` 重新打开。
//! 状态保存在原子变量中，发送、接收、关闭线程无需加锁即可观察。

use crate::config::GatewayConfig;
use crate::endpoint::UdpEndpoint;
use crate::{CanAdapter, CanError};
use bytes::BytesMut;
use parking_lot::Mutex;
use peak_gw_protocol::{CanFrame, MAX_DATAGRAM_SIZE, Record, encode, records};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// 总线生命周期状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Unopened = 0,
    Open = 1,
    Closed = 2,
}

impl BusState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BusState::Open,
            2 => BusState::Closed,
            _ => BusState::Unopened,
        }
    }
}

/// 一对收发端点
struct Endpoints {
    tx: UdpEndpoint,
    rx: UdpEndpoint,
}

impl Endpoints {
    fn shutdown(&self) {
        self.tx.shutdown();
        self.rx.shutdown();
    }
}

/// PEAK 以太网网关 CAN 总线
///
/// `Send + Sync`，可以通过 `Arc` 在接收线程与发送线程之间共享。
///
/// # 示例
///
/// ```no_run
/// use peak_gw_can::{GatewayConfig, PeakGatewayBus};
/// use peak_gw_protocol::CanFrame;
/// use std::time::Duration;
///
/// let bus = PeakGatewayBus::connect(GatewayConfig::new("192.168.1.10")).unwrap();
/// bus.send_frame(&CanFrame::new_standard(0x123, &[1, 2])).unwrap();
/// let frame = bus.recv_frame(Duration::from_millis(500)).unwrap();
/// println!("{}", frame);
/// bus.close();
/// ```
pub struct PeakGatewayBus {
    config: GatewayConfig,
    state: AtomicU8,
    endpoints: Option<Endpoints>,
    /// 多记录数据报中尚未交付的帧
    pending: Mutex<VecDeque<CanFrame>>,
}

impl PeakGatewayBus {
    /// 注册表中使用的接口名
    pub const INTERFACE_NAME: &'static str = "peak-gateway";

    /// 创建未打开的总线
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(BusState::Unopened as u8),
            endpoints: None,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// 创建并打开总线
    pub fn connect(config: GatewayConfig) -> Result<Self, CanError> {
        let mut bus = Self::new(config);
        bus.open()?;
        Ok(bus)
    }

    /// 解析地址并绑定收发端点
    ///
    /// 已打开的总线会先关闭再重新打开；已关闭的总线使用新的端点重新打开。
    ///
    /// # 错误
    /// - `CanError::Configuration`: 地址无法解析，或端点无法绑定/连接。
    ///   失败时不会留下任何半打开的端点。
    pub fn open(&mut self) -> Result<(), CanError> {
        if self.state() == BusState::Open {
            self.close();
        }

        let send_addr = self.config.send_addr()?;
        let recv_addr = self.config.recv_addr()?;

        let tx = UdpEndpoint::sender(send_addr, self.config.send_timeout()).map_err(|e| {
            CanError::Configuration(format!("Cannot open send endpoint to {}: {}", send_addr, e))
        })?;
        let rx = UdpEndpoint::receiver(recv_addr).map_err(|e| {
            tx.shutdown();
            CanError::Configuration(format!("Cannot bind receive endpoint {}: {}", recv_addr, e))
        })?;

        info!(
            "PEAK gateway bus open: sending to {}, receiving on {}",
            send_addr,
            rx.local_addr()
        );

        self.endpoints = Some(Endpoints { tx, rx });
        self.pending.lock().clear();
        self.state.store(BusState::Open as u8, Ordering::Release);
        Ok(())
    }

    /// 关闭总线
    ///
    /// 幂等，任意状态下都可以调用；正在等待的 `recv_frame` 会返回 `CanError::Cancelled`。
    pub fn close(&self) {
        let previous = self.state.swap(BusState::Closed as u8, Ordering::AcqRel);
        if let Some(endpoints) = &self.endpoints {
            endpoints.shutdown();
        }
        if BusState::from_u8(previous) == BusState::Open {
            info!("PEAK gateway bus closed ({})", self.channel_info());
        }
    }

    pub fn state(&self) -> BusState {
        BusState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// 接收端点实际绑定的地址（端口为 0 时由系统分配）
    pub fn local_recv_addr(&self) -> Option<SocketAddr> {
        self.endpoints.as_ref().map(|e| e.rx.local_addr())
    }

    fn open_endpoints(&self) -> Result<&Endpoints, CanError> {
        if self.state() != BusState::Open {
            return Err(CanError::NotOpen);
        }
        self.endpoints.as_ref().ok_or(CanError::NotOpen)
    }

    /// 编码并发送一帧
    ///
    /// # 错误
    /// - `CanError::NotOpen`: 总线未打开
    /// - `CanError::Encoding`: 帧未通过校验，不会发送任何数据
    /// - `CanError::Transport`: socket 错误
    pub fn send_frame(&self, frame: &CanFrame) -> Result<(), CanError> {
        let endpoints = self.open_endpoints()?;
        let record = encode(frame)?;
        endpoints.tx.send(&record)?;
        trace!("TX {}", frame);
        Ok(())
    }

    /// 接收一帧
    ///
    /// 整个调用共享一个绝对截止时间：非数据帧记录与格式错误的数据报会被跳过（`debug` 日志），
    /// 但不会延长等待。
    ///
    /// # 错误
    /// - `CanError::NotOpen`: 总线未打开
    /// - `CanError::Timeout`: 截止时间内没有数据帧
    /// - `CanError::Cancelled`: 等待期间总线被关闭
    /// - `CanError::Transport`: socket 错误
    pub fn recv_frame(&self, timeout: Duration) -> Result<CanFrame, CanError> {
        let endpoints = self.open_endpoints()?;

        if let Some(frame) = self.pending.lock().pop_front() {
            trace!("RX {} (queued)", frame);
            return Ok(frame);
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut buf = BytesMut::zeroed(MAX_DATAGRAM_SIZE);

        loop {
            // Timeout / Cancelled / Transport 原样返回
            let len = endpoints.rx.receive_until(&mut buf, deadline)?;

            let mut frames: SmallVec<[CanFrame; 4]> = SmallVec::new();
            for record in records(&buf[..len]) {
                match record {
                    Ok(Record::Data(frame)) => frames.push(frame),
                    Ok(Record::NotADataFrame { kind }) => {
                        debug!("Skipping non-classic record: {:?}", kind);
                    },
                    Err(e) => {
                        debug!("Discarding malformed datagram ({} bytes): {}", len, e);
                    },
                }
            }

            let mut frames = frames.into_iter();
            let Some(first) = frames.next() else {
                continue;
            };
            self.pending.lock().extend(frames);
            trace!("RX {}", first);
            return Ok(first);
        }
    }
}

impl CanAdapter for PeakGatewayBus {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
        self.send_frame(frame)
    }

    fn recv(&self, timeout: Option<Duration>) -> Result<Option<CanFrame>, CanError> {
        let timeout = timeout.unwrap_or_else(|| self.config.receive_timeout());
        match self.recv_frame(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn shutdown(&self) {
        self.close();
    }

    fn channel_info(&self) -> String {
        format!("{}:{}", self.config.send_host, self.config.send_port)
    }
}

impl Drop for PeakGatewayBus {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PeakGatewayBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeakGatewayBus")
            .field("channel", &self.channel_info())
            .field("state", &self.state())
            .finish()
    }
}

/// 网关总线 Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use peak_gw_can::GatewayBuilder;
/// use std::time::Duration;
///
/// let bus = GatewayBuilder::new("192.168.1.10")
///     .send_port(40001)
///     .recv_port(40000)
///     .receive_timeout(Duration::from_millis(200))
///     .connect()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct GatewayBuilder {
    config: GatewayConfig,
}

impl GatewayBuilder {
    /// 创建新的 Builder，`send_host` 为网关地址
    pub fn new(send_host: impl Into<String>) -> Self {
        Self {
            config: GatewayConfig::new(send_host),
        }
    }

    /// 从已有配置开始
    pub fn from_config(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// 网关接收端口（默认 40001）
    pub fn send_port(mut self, port: u16) -> Self {
        self.config.send_port = port;
        self
    }

    /// 本机接收地址（默认 0.0.0.0）
    pub fn recv_host(mut self, host: impl Into<String>) -> Self {
        self.config.recv_host = host.into();
        self
    }

    /// 本机接收端口（默认 40000，0 表示由系统分配）
    pub fn recv_port(mut self, port: u16) -> Self {
        self.config.recv_port = port;
        self
    }

    /// `CanAdapter::recv` 的默认超时
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// 发送缓冲区满时的最长等待时间
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// 构造未打开的总线
    pub fn build(self) -> PeakGatewayBus {
        PeakGatewayBus::new(self.config)
    }

    /// 构造并打开总线
    pub fn connect(self) -> Result<PeakGatewayBus, CanError> {
        PeakGatewayBus::connect(self.config)
    }
}
