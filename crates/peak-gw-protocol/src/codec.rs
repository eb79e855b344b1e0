//! 网关记录编码/解码
//!
//! 记录布局（大端，共 28 字节头 + 数据区）：
//!
//! ```text
//! 0        2        4                12       16       20   21   22     24       28
//! +--------+--------+----------------+--------+--------+----+----+------+--------+---------+-----+
//! | size   | kind   | tag (unused)   | ts_lo  | ts_hi  | ch | dlc| flags| can_id | payload | CRC |
//! +--------+--------+----------------+--------+--------+----+----+------+--------+---------+-----+
//! ```
//!
//! 经典 CAN 记录的数据区固定 8 字节；CRC 类型记录在数据区后追加 4 字节 CRC。
//! 一个数据报可能连续携带多条记录，每条记录由自身的 `size` 字段定界。

use crate::constants::*;
use crate::{CanFrame, DecodeError, EncodeError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

// ============================================================================
// Record Kind
// ============================================================================

/// 记录类型
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Classic = 0x80,    // CAN 2.0A/B 帧
    ClassicCrc = 0x81, // CAN 2.0A/B 帧 + CRC
    Fd = 0x90,         // CAN FD 帧
    FdCrc = 0x91,      // CAN FD 帧 + CRC
}

impl RecordKind {
    /// 是否为经典 CAN 数据帧
    pub fn is_classic(self) -> bool {
        matches!(self, RecordKind::Classic | RecordKind::ClassicCrc)
    }

    /// 是否携带 CRC 尾部
    pub fn has_crc(self) -> bool {
        matches!(self, RecordKind::ClassicCrc | RecordKind::FdCrc)
    }
}

impl TryFrom<u16> for RecordKind {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(RecordKind::Classic),
            0x81 => Ok(RecordKind::ClassicCrc),
            0x90 => Ok(RecordKind::Fd),
            0x91 => Ok(RecordKind::FdCrc),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}

// ============================================================================
// Record Header
// ============================================================================

/// 记录头（28 字节）
///
/// 使用 `bytes` 手动打包/解包，不依赖结构体内存布局。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub packet_size: u16,
    pub kind: u16,
    pub tag: u64,
    /// 设备时间戳（微秒），线上拆分为低/高两个 u32
    pub timestamp_us: u64,
    pub channel: u8,
    pub dlc: u8,
    pub flags: u16,
    /// 原始 can_id 字段（含 RTR / 扩展帧位）
    pub can_id: u32,
}

impl RecordHeader {
    /// Pack header into BytesMut
    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE);
        buf.put_u16(self.packet_size);
        buf.put_u16(self.kind);
        buf.put_u64(self.tag);
        buf.put_u32(self.timestamp_us as u32);
        buf.put_u32((self.timestamp_us >> 32) as u32);
        buf.put_u8(self.channel);
        buf.put_u8(self.dlc);
        buf.put_u16(self.flags);
        buf.put_u32(self.can_id);
    }

    /// 从缓冲区解包记录头
    ///
    /// # 错误
    /// - `DecodeError::TooShort`: 缓冲区不足 28 字节
    pub fn unpack(mut data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let packet_size = data.get_u16();
        let kind = data.get_u16();
        let tag = data.get_u64();
        let timestamp_low = data.get_u32() as u64;
        let timestamp_high = data.get_u32() as u64;
        let channel = data.get_u8();
        let dlc = data.get_u8();
        let flags = data.get_u16();
        let can_id = data.get_u32();

        Ok(Self {
            packet_size,
            kind,
            tag,
            timestamp_us: (timestamp_high << 32) | timestamp_low,
            channel,
            dlc,
            flags,
            can_id,
        })
    }

    /// 扩展帧：can_id 第 31 位或 flags 扩展位任一置位
    pub fn is_extended(&self) -> bool {
        self.can_id & CAN_ID_EXTENDED_BIT != 0 || self.flags & FLAG_EXTENDED_ID != 0
    }

    /// 远程帧：flags RTR 位或 can_id 第 30 位任一置位
    pub fn is_remote(&self) -> bool {
        self.flags & FLAG_REMOTE_REQUEST != 0 || self.can_id & CAN_ID_RTR_BIT != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & FLAG_ERROR_STATE != 0
    }

    /// 去掉标志位后的 29-bit 标识符
    pub fn frame_id(&self) -> u32 {
        self.can_id & CAN_EFF_MASK
    }
}

// ============================================================================
// Record
// ============================================================================

/// 单条记录的解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// 经典 CAN 数据帧
    Data(CanFrame),
    /// 已识别但不是经典数据帧的记录（如 CAN FD），调用方应跳过
    NotADataFrame { kind: RecordKind },
}

// ============================================================================
// Encoding
// ============================================================================

/// 编码 CAN 帧为 36 字节经典记录
///
/// 时间戳、通道与 tag 字段全部填 0，由设备在发送侧自行打时间戳。
///
/// # 错误
/// 帧未通过 [`CanFrame::validate`] 时返回对应的 `EncodeError`。
pub fn encode(frame: &CanFrame) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(CLASSIC_RECORD_SIZE);
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// 编码 CAN 帧并追加到 `buf`
///
/// 校验失败时 `buf` 保持不变。
pub fn encode_into(frame: &CanFrame, buf: &mut BytesMut) -> Result<(), EncodeError> {
    frame.validate()?;

    let mut flags = 0u16;
    let mut can_id = frame.id;

    if frame.is_remote {
        flags |= FLAG_REMOTE_REQUEST;
        can_id |= CAN_ID_RTR_BIT;
    }
    if frame.is_extended {
        flags |= FLAG_EXTENDED_ID;
        can_id |= CAN_ID_EXTENDED_BIT;
    }
    if frame.is_error {
        flags |= FLAG_ERROR_STATE;
    }

    let header = RecordHeader {
        packet_size: CLASSIC_RECORD_SIZE as u16,
        kind: RecordKind::Classic as u16,
        tag: 0,
        timestamp_us: 0,
        channel: 0,
        dlc: frame.dlc,
        flags,
        can_id,
    };

    buf.reserve(CLASSIC_RECORD_SIZE);
    header.pack_to(buf);

    // 数据区固定 8 字节，尾部补 0
    let mut payload = [0u8; CLASSIC_PAYLOAD_SIZE];
    payload[..frame.data.len()].copy_from_slice(&frame.data);
    buf.put_slice(&payload);

    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// 解码缓冲区中的第一条记录
///
/// 多记录数据报请使用 [`records`]。
pub fn decode(buf: &[u8]) -> Result<Record, DecodeError> {
    decode_record(buf).map(|(record, _)| record)
}

/// 解码缓冲区中的第一条记录，并返回该记录占用的字节数
///
/// 所有长度检查都在提取字段之前完成，任意输入都不会 panic。
///
/// # 错误
/// - `DecodeError::TooShort`: 不足一个记录头，或记录短于其类型要求的长度
/// - `DecodeError::InvalidPacketSize`: 声明长度小于记录头
/// - `DecodeError::LengthOverrun`: 声明长度超出剩余缓冲区
/// - `DecodeError::UnknownKind`: 未知记录类型
/// - `DecodeError::DlcTooLarge`: 经典帧 DLC 大于 8
/// - `DecodeError::InvalidCanId`: 标准帧 ID 超出 11-bit
pub fn decode_record(buf: &[u8]) -> Result<(Record, usize), DecodeError> {
    let header = RecordHeader::unpack(buf)?;

    let declared = header.packet_size as usize;
    if declared < HEADER_SIZE {
        return Err(DecodeError::InvalidPacketSize(declared));
    }
    if declared > buf.len() {
        return Err(DecodeError::LengthOverrun {
            declared,
            available: buf.len(),
        });
    }

    let kind = RecordKind::try_from(header.kind)?;
    if !kind.is_classic() {
        return Ok((Record::NotADataFrame { kind }, declared));
    }

    let required = CLASSIC_RECORD_SIZE + if kind.has_crc() { CRC_SIZE } else { 0 };
    if declared < required {
        return Err(DecodeError::TooShort {
            expected: required,
            actual: declared,
        });
    }

    if header.dlc > MAX_CLASSIC_DLC {
        return Err(DecodeError::DlcTooLarge { dlc: header.dlc });
    }

    let is_extended = header.is_extended();
    let id = header.frame_id();
    if !is_extended && id > CAN_SFF_MASK {
        return Err(DecodeError::InvalidCanId(id));
    }

    // TODO: 校验 CRC 记录的尾部（需要确认网关固件使用的 CRC 多项式）
    let payload = &buf[HEADER_SIZE..HEADER_SIZE + CLASSIC_PAYLOAD_SIZE];
    let frame = CanFrame {
        id,
        is_extended,
        is_remote: header.is_remote(),
        is_error: header.is_error(),
        dlc: header.dlc,
        data: SmallVec::from_slice(&payload[..header.dlc as usize]),
        timestamp_us: Some(header.timestamp_us),
    };

    Ok((Record::Data(frame), declared))
}

/// 遍历数据报中的所有记录
pub fn records(buf: &[u8]) -> Records<'_> {
    Records { buf, failed: false }
}

/// 数据报记录迭代器
///
/// 遇到第一条格式错误的记录后返回该错误并终止：
/// 之后的字节已无法定界，整体丢弃。
#[derive(Debug, Clone)]
pub struct Records<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }

        match decode_record(self.buf) {
            Ok((record, consumed)) => {
                // consumed >= HEADER_SIZE，保证前进
                self.buf = &self.buf[consumed..];
                Some(Ok(record))
            },
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            },
        }
    }
}
