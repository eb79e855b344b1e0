//! 网关协议常量定义
//!
//! 记录布局、标志位与 CAN ID 掩码。所有多字节字段均为大端字节序。

// ============================================================================
// 记录尺寸
// ============================================================================

/// 记录头长度（packet_size 到 can_id，共 28 字节）
pub const HEADER_SIZE: usize = 28;

/// 经典 CAN 记录的数据区长度（固定 8 字节，未使用部分补 0）
pub const CLASSIC_PAYLOAD_SIZE: usize = 8;

/// CRC 尾部长度（仅 CRC 类型的记录携带）
pub const CRC_SIZE: usize = 4;

/// 经典 CAN 记录总长度（36 字节）
pub const CLASSIC_RECORD_SIZE: usize = HEADER_SIZE + CLASSIC_PAYLOAD_SIZE;

/// 经典 CAN 最大数据长度
pub const MAX_CLASSIC_DLC: u8 = 8;

/// 单个 UDP 数据报的接收缓冲区大小
///
/// 取 UDP 负载上限，超长数据报不会被 `recv_from` 截断。
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// ============================================================================
// 记录头字段偏移
// ============================================================================

pub const OFFSET_PACKET_SIZE: usize = 0;
pub const OFFSET_KIND: usize = 2;
pub const OFFSET_TAG: usize = 4;
pub const OFFSET_TIMESTAMP_LOW: usize = 12;
pub const OFFSET_TIMESTAMP_HIGH: usize = 16;
pub const OFFSET_CHANNEL: usize = 20;
pub const OFFSET_DLC: usize = 21;
pub const OFFSET_FLAGS: usize = 22;
pub const OFFSET_CAN_ID: usize = 24;

// ============================================================================
// flags 字段（u16）
// ============================================================================

/// 远程帧请求
pub const FLAG_REMOTE_REQUEST: u16 = 0x01;
/// 扩展标识符（29-bit）
pub const FLAG_EXTENDED_ID: u16 = 0x02;
/// CAN FD 扩展数据长度
pub const FLAG_EXTENDED_DATA_LENGTH: u16 = 0x10;
/// CAN FD 波特率切换
pub const FLAG_BITRATE_SWITCH: u16 = 0x20;
/// 错误状态指示
pub const FLAG_ERROR_STATE: u16 = 0x40;

// ============================================================================
// can_id 字段（u32）
// ============================================================================

/// 标准帧 ID 掩码（11-bit）
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// 扩展帧 ID 掩码（29-bit）
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// can_id 中的 RTR 位
pub const CAN_ID_RTR_BIT: u32 = 1 << 30;
/// can_id 中的扩展帧位
pub const CAN_ID_EXTENDED_BIT: u32 = 1 << 31;
