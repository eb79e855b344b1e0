//! # PEAK Gateway Protocol
//!
//! PEAK 以太网 CAN 网关的 UDP 记录格式编码/解码（无 IO 依赖）
//!
//! ## 模块
//!
//! - `constants`: 记录布局、标志位、ID 掩码
//! - `codec`: `CanFrame` 与网关记录之间的转换
//!
//! ## 字节序
//!
//! 网关协议所有多字节字段均为大端字节序（Motorola / network order）。

use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;

pub mod codec;
pub mod constants;

// 重新导出常用类型
pub use codec::{
    Record, RecordHeader, RecordKind, Records, decode, decode_record, encode, encode_into, records,
};
pub use constants::*;

/// 经典 CAN 帧（应用层表示）
///
/// # 设计目的
///
/// `CanFrame` 是应用层与网关记录格式之间的中间抽象：
/// - 发送方向：由应用构造，经 [`encode`] 转为 36 字节记录
/// - 接收方向：由 [`decode`] 从数据报中解析得到
///
/// 字段全部公开，因此可以构造出不满足不变量的帧（例如 `dlc > 8`），
/// 这类帧会在编码时被 [`EncodeError`] 拒绝，而不是静默截断。
///
/// # 不变量
///
/// - `data.len() == dlc`
/// - `dlc <= 8`
/// - `id` 不超出 `is_extended` 对应的位宽（11-bit / 29-bit）
///
/// # 示例
///
/// ```rust
/// use peak_gw_protocol::CanFrame;
///
/// let frame = CanFrame::new_standard(0x123, &[1, 2, 3, 4]);
/// assert_eq!(frame.id(), 0x123);
/// assert_eq!(frame.data_slice(), &[1, 2, 3, 4]);
///
/// let frame_ext = CanFrame::new_extended(0x1ABCDEF, &[]);
/// assert!(frame_ext.is_extended);
/// assert_eq!(frame_ext.dlc, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanFrame {
    /// CAN ID（标准帧 11-bit 或扩展帧 29-bit）
    pub id: u32,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 是否为远程帧
    pub is_remote: bool,

    /// 是否为错误帧（此时数据无意义）
    pub is_error: bool,

    /// 数据长度 (0-8)
    pub dlc: u8,

    /// 帧数据（长度必须等于 `dlc`）
    pub data: SmallVec<[u8; 8]>,

    /// 设备时间戳（微秒），仅接收方向有效，发送时忽略
    pub timestamp_us: Option<u64>,
}

impl CanFrame {
    /// 创建标准帧
    ///
    /// 超过 8 字节的数据会被截断为前 8 字节，`id` 不做位宽检查，发送前由 [`validate`](Self::validate) 校验。
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        Self::new(id as u32, data, false)
    }

    /// 创建扩展帧
    ///
    /// 超过 8 字节的数据会被截断为前 8 字节。
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id, data, true)
    }

    /// 创建远程帧（不携带数据）
    pub fn new_remote(id: u32, is_extended: bool) -> Self {
        Self {
            is_remote: true,
            ..Self::new(id, &[], is_extended)
        }
    }

    /// 创建错误帧
    pub fn new_error(id: u32, is_extended: bool) -> Self {
        Self::new(id, &[], is_extended).with_error_flag()
    }

    /// 通用构造器
    ///
    /// 超过 8 字节的数据会被截断为前 8 字节，因此构造出的帧 `dlc` 总是等于数据长度。
    /// ID 位宽不在这里检查，由 [`validate`](Self::validate) 负责。
    pub fn new(id: u32, data: &[u8], is_extended: bool) -> Self {
        let len = data.len().min(MAX_CLASSIC_DLC as usize);

        Self {
            id,
            is_extended,
            is_remote: false,
            is_error: false,
            dlc: len as u8,
            data: SmallVec::from_slice(&data[..len]),
            timestamp_us: None,
        }
    }

    /// 标记为错误帧
    pub fn with_error_flag(mut self) -> Self {
        self.is_error = true;
        self
    }

    /// 附加设备时间戳（微秒）
    pub fn with_timestamp_us(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = Some(timestamp_us);
        self
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 获取数据切片
    pub fn data_slice(&self) -> &[u8] {
        &self.data
    }

    /// 设备时间戳（秒）
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp_us.map(|us| us as f64 / 1_000_000.0)
    }

    /// 校验帧不变量
    ///
    /// # 错误
    /// - `EncodeError::DlcTooLarge`: `dlc > 8`
    /// - `EncodeError::LengthMismatch`: `data.len() != dlc`
    /// - `EncodeError::InvalidCanId`: ID 超出位宽
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.dlc > MAX_CLASSIC_DLC {
            return Err(EncodeError::DlcTooLarge { dlc: self.dlc });
        }

        if self.data.len() != self.dlc as usize {
            return Err(EncodeError::LengthMismatch {
                dlc: self.dlc,
                actual: self.data.len(),
            });
        }

        let (mask, width) = if self.is_extended {
            (CAN_EFF_MASK, 29)
        } else {
            (CAN_SFF_MASK, 11)
        };
        if self.id & !mask != 0 {
            return Err(EncodeError::InvalidCanId { id: self.id, width });
        }

        Ok(())
    }

    /// 比较除时间戳以外的所有字段
    pub fn content_eq(&self, other: &CanFrame) -> bool {
        self.id == other.id
            && self.is_extended == other.is_extended
            && self.is_remote == other.is_remote
            && self.is_error == other.is_error
            && self.dlc == other.dlc
            && self.data == other.data
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "ID=0x{:08X}", self.id)?;
        } else {
            write!(f, "ID=0x{:03X}", self.id)?;
        }
        write!(f, " DLC={}", self.dlc)?;

        if self.is_extended {
            f.write_str(" EXTENDED")?;
        }
        if self.is_remote {
            f.write_str(" REMOTE")?;
        }
        if self.is_error {
            f.write_str(" ERROR")?;
        }

        f.write_str(" [")?;
        for (i, byte) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        f.write_str("]")?;

        if let Some(ts) = self.timestamp() {
            write!(f, " @{:.6}", ts)?;
        }
        Ok(())
    }
}

/// 编码错误（帧未通过校验）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("DLC {dlc} exceeds classic CAN maximum of 8")]
    DlcTooLarge { dlc: u8 },

    #[error("Data length mismatch: dlc is {dlc}, data holds {actual} bytes")]
    LengthMismatch { dlc: u8, actual: usize },

    #[error("Invalid CAN ID 0x{id:X} for {width}-bit identifier")]
    InvalidCanId { id: u32, width: u8 },
}

/// 解码错误（入站记录格式错误）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Record too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Declared packet size {declared} exceeds remaining {available} bytes")]
    LengthOverrun { declared: usize, available: usize },

    #[error("Invalid packet size: {0}")]
    InvalidPacketSize(usize),

    #[error("Unknown record kind: 0x{0:04X}")]
    UnknownKind(u16),

    #[error("DLC {dlc} exceeds classic CAN maximum of 8")]
    DlcTooLarge { dlc: u8 },

    #[error("Standard frame carries out-of-range CAN ID: 0x{0:X}")]
    InvalidCanId(u32),
}
