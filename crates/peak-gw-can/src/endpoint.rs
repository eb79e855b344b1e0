//! UDP 传输端点
//!
//! 每个端点持有一个非阻塞 `mio` UDP socket 以及一对 `Poll`/`Waker`：
//! - 发送端点绑定临时端口并 `connect` 到网关的接收地址
//! - 接收端点绑定网关发送的目标地址
//!
//! 阻塞语义由 `Poll::poll` 的超时实现，`shutdown` 通过 `Waker` 唤醒正在等待的接收者。

use crate::CanError;
use bytes::{Bytes, BytesMut};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use peak_gw_protocol::MAX_DATAGRAM_SIZE;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

const SOCKET: Token = Token(0);
const WAKER: Token = Token(1);

/// 发送缓冲区满时默认等待可写的时长
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// socket 与 poll 实例（shutdown 后释放）
struct EndpointIo {
    socket: UdpSocket,
    poll: Poll,
    events: Events,
}

/// UDP 传输端点
///
/// `Send + Sync`：同一个端点上的并发调用由内部互斥锁串行化，
/// `shutdown` 不需要持锁即可唤醒等待者。
pub struct UdpEndpoint {
    io: Mutex<Option<EndpointIo>>,
    waker: Waker,
    closed: AtomicBool,
    local_addr: SocketAddr,
    peer_addr: Option<SocketAddr>,
    send_timeout: Duration,
}

impl UdpEndpoint {
    /// 创建发送端点
    ///
    /// 绑定同协议族的临时端口，并把 socket 连接到 `remote`。
    ///
    /// # 错误
    /// socket 创建、绑定或连接失败时返回 `io::Error`
    pub fn sender(remote: SocketAddr, send_timeout: Duration) -> io::Result<Self> {
        let unspecified = match remote {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0))?;
        socket.connect(remote)?;

        let endpoint = Self::with_socket(socket, Interest::WRITABLE, Some(remote), send_timeout)?;
        trace!("UDP sender endpoint {} -> {}", endpoint.local_addr, remote);
        Ok(endpoint)
    }

    /// 创建接收端点，绑定到 `local`
    ///
    /// `local` 的端口为 0 时由系统分配，可通过 [`local_addr`](Self::local_addr) 查询。
    pub fn receiver(local: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        let endpoint = Self::with_socket(socket, Interest::READABLE, None, DEFAULT_SEND_TIMEOUT)?;
        trace!("UDP receiver endpoint bound to {}", endpoint.local_addr);
        Ok(endpoint)
    }

    fn with_socket(
        mut socket: UdpSocket,
        interest: Interest,
        peer_addr: Option<SocketAddr>,
        send_timeout: Duration,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry().register(&mut socket, SOCKET, interest)?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            io: Mutex::new(Some(EndpointIo {
                socket,
                poll,
                events: Events::with_capacity(4),
            })),
            waker,
            closed: AtomicBool::new(false),
            local_addr,
            peer_addr,
            send_timeout,
        })
    }

    /// 本地绑定地址
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 远端地址（仅发送端点）
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 发送一个数据报到已连接的远端地址
    ///
    /// 发送缓冲区满时最多等待 `send_timeout`，不做任何重发。
    ///
    /// # 错误
    /// - `CanError::Transport`: socket 错误、短写、等待可写超时、端点已关闭
    pub fn send(&self, datagram: &[u8]) -> Result<(), CanError> {
        if self.is_closed() {
            return Err(shut_down_error().into());
        }

        let mut guard = self.io.lock();
        let io = guard.as_mut().ok_or_else(shut_down_error)?;
        let deadline = Instant::now().checked_add(self.send_timeout);

        loop {
            match io.socket.send(datagram) {
                Ok(written) if written == datagram.len() => return Ok(()),
                Ok(written) => {
                    return Err(CanError::Transport(io::Error::new(
                        ErrorKind::WriteZero,
                        format!("short write: {} of {} bytes", written, datagram.len()),
                    )));
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {},
                Err(e) => return Err(CanError::Transport(e)),
            }

            let remaining = remaining_until(deadline);
            if remaining == Some(Duration::ZERO) {
                return Err(CanError::Transport(io::Error::new(
                    ErrorKind::TimedOut,
                    "socket not writable within send timeout",
                )));
            }

            match io.poll.poll(&mut io.events, remaining) {
                Ok(()) => {},
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(CanError::Transport(e)),
            }

            if self.is_closed() {
                return Err(shut_down_error().into());
            }
        }
    }

    /// 接收一个数据报到 `buf`，返回数据报长度
    ///
    /// # 参数
    /// - `deadline`: 绝对截止时间，`None` 表示无限等待（直到数据到达或 `shutdown`）
    ///
    /// # 错误
    /// - `CanError::Timeout`: 截止时间前没有数据报
    /// - `CanError::Cancelled`: 端点已关闭或在等待期间被关闭
    /// - `CanError::Transport`: socket 错误
    pub fn receive_until(
        &self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<usize, CanError> {
        if self.is_closed() {
            return Err(CanError::Cancelled);
        }

        let mut guard = match deadline {
            Some(deadline) => self.io.try_lock_until(deadline).ok_or(CanError::Timeout)?,
            None => self.io.lock(),
        };
        let io = guard.as_mut().ok_or(CanError::Cancelled)?;

        loop {
            if self.is_closed() {
                return Err(CanError::Cancelled);
            }

            // mio 是边沿触发，先尝试读，读空后再等待
            match io.socket.recv_from(buf) {
                Ok((len, from)) => {
                    trace!("Received {} bytes from {}", len, from);
                    return Ok(len);
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => {},
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CanError::Transport(e)),
            }

            let remaining = remaining_until(deadline);
            if remaining == Some(Duration::ZERO) {
                return Err(CanError::Timeout);
            }

            match io.poll.poll(&mut io.events, remaining) {
                Ok(()) => {},
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(CanError::Transport(e)),
            }
        }
    }

    /// 接收一个数据报
    ///
    /// `timeout` 为 `None` 时无限等待。
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Bytes, CanError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut buf = BytesMut::zeroed(MAX_DATAGRAM_SIZE);
        let len = self.receive_until(&mut buf, deadline)?;
        buf.truncate(len);
        Ok(buf.freeze())
    }

    /// 关闭端点
    ///
    /// 标记关闭、唤醒正在等待的调用，然后释放 socket。幂等。
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake endpoint {}: {}", self.local_addr, e);
        }

        // 等待者被唤醒后会释放锁
        drop(self.io.lock().take());
        trace!("UDP endpoint {} shut down", self.local_addr);
    }
}

impl std::fmt::Debug for UdpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpEndpoint")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 距离截止时间的剩余时长（已过期时为零）
fn remaining_until(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

fn shut_down_error() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "endpoint is shut down")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_send_and_receive() {
        let rx = UdpEndpoint::receiver(loopback()).unwrap();
        let tx = UdpEndpoint::sender(rx.local_addr(), DEFAULT_SEND_TIMEOUT).unwrap();
        assert_eq!(tx.peer_addr(), Some(rx.local_addr()));

        tx.send(&[1, 2, 3]).unwrap();
        let data = rx.receive(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(&data[..], &[1, 2, 3]);
    }

    #[test]
    fn test_datagram_boundaries_preserved() {
        let rx = UdpEndpoint::receiver(loopback()).unwrap();
        let tx = UdpEndpoint::sender(rx.local_addr(), DEFAULT_SEND_TIMEOUT).unwrap();

        tx.send(&[0xAA; 36]).unwrap();
        tx.send(&[0xBB; 72]).unwrap();

        let first = rx.receive(Some(Duration::from_secs(2))).unwrap();
        let second = rx.receive(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(first.len(), 36);
        assert_eq!(second.len(), 72);
        assert!(second.iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn test_receive_timeout() {
        let rx = UdpEndpoint::receiver(loopback()).unwrap();

        let start = Instant::now();
        let result = rx.receive(Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(CanError::Timeout)));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_zero_timeout_returns_immediately() {
        let rx = UdpEndpoint::receiver(loopback()).unwrap();
        assert!(matches!(
            rx.receive(Some(Duration::ZERO)),
            Err(CanError::Timeout)
        ));
    }

    #[test]
    fn test_shutdown_cancels_blocked_receive() {
        let rx = Arc::new(UdpEndpoint::receiver(loopback()).unwrap());

        let waiter = {
            let rx = Arc::clone(&rx);
            thread::spawn(move || {
                let start = Instant::now();
                let result = rx.receive(None);
                (result, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        rx.shutdown();

        let (result, elapsed) = waiter.join().unwrap();
        assert!(matches!(result, Err(CanError::Cancelled)));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_shutdown_idempotent() {
        let rx = UdpEndpoint::receiver(loopback()).unwrap();
        rx.shutdown();
        rx.shutdown();
        assert!(rx.is_closed());
        assert!(matches!(
            rx.receive(Some(Duration::from_millis(10))),
            Err(CanError::Cancelled)
        ));
    }

    #[test]
    fn test_send_after_shutdown_fails() {
        let rx = UdpEndpoint::receiver(loopback()).unwrap();
        let tx = UdpEndpoint::sender(rx.local_addr(), DEFAULT_SEND_TIMEOUT).unwrap();
        tx.shutdown();

        match tx.send(&[0u8; 4]) {
            Err(CanError::Transport(e)) => assert_eq!(e.kind(), ErrorKind::NotConnected),
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_conflict_fails() {
        let first = UdpEndpoint::receiver(loopback()).unwrap();
        assert!(UdpEndpoint::receiver(first.local_addr()).is_err());
    }
}
