//! 编解码属性测试
//!
//! 使用 proptest 验证往返一致性、非法帧拒绝与解码鲁棒性。

use peak_gw_protocol::{
    CAN_EFF_MASK, CAN_SFF_MASK, CanFrame, EncodeError, Record, decode, encode, records,
};
use proptest::prelude::*;
use smallvec::SmallVec;

/// 生成满足不变量的任意帧
fn valid_frame() -> impl Strategy<Value = CanFrame> {
    (
        any::<bool>(),
        any::<u32>(),
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec(any::<u8>(), 0..=8),
    )
        .prop_map(|(is_extended, raw_id, is_remote, is_error, data)| {
            let id = if is_extended {
                raw_id & CAN_EFF_MASK
            } else {
                raw_id & CAN_SFF_MASK
            };
            CanFrame {
                id,
                is_extended,
                is_remote,
                is_error,
                dlc: data.len() as u8,
                data: SmallVec::from_vec(data),
                timestamp_us: None,
            }
        })
}

proptest! {
    /// decode(encode(frame)) 保留除时间戳外的全部字段
    #[test]
    fn roundtrip_preserves_frame(frame in valid_frame()) {
        let encoded = encode(&frame).unwrap();
        prop_assert_eq!(encoded.len(), 36);

        match decode(&encoded).unwrap() {
            Record::Data(decoded) => {
                prop_assert!(frame.content_eq(&decoded), "{:?} != {:?}", frame, decoded);
                // 发送侧时间戳填 0
                prop_assert_eq!(decoded.timestamp_us, Some(0));
            },
            other => prop_assert!(false, "Expected data frame, got {:?}", other),
        }
    }

    /// dlc > 8 一律拒绝
    #[test]
    fn encode_rejects_oversized_dlc(dlc in 9u8..=255) {
        let frame = CanFrame {
            dlc,
            data: SmallVec::from_vec(vec![0u8; dlc as usize]),
            ..Default::default()
        };
        prop_assert_eq!(encode(&frame), Err(EncodeError::DlcTooLarge { dlc }));
    }

    /// data 长度与 dlc 不一致一律拒绝
    #[test]
    fn encode_rejects_length_mismatch(dlc in 0u8..=8, len in 0usize..=8) {
        prop_assume!(dlc as usize != len);
        let frame = CanFrame {
            dlc,
            data: SmallVec::from_vec(vec![0xA5; len]),
            ..Default::default()
        };
        prop_assert_eq!(
            encode(&frame),
            Err(EncodeError::LengthMismatch { dlc, actual: len })
        );
    }

    /// 超出位宽的标准帧 ID 被拒绝
    #[test]
    fn encode_rejects_wide_standard_id(id in 0x800u32..=u32::MAX) {
        let frame = CanFrame { id, ..Default::default() };
        let rejected = matches!(encode(&frame), Err(EncodeError::InvalidCanId { width: 11, .. }));
        prop_assert!(rejected);
    }

    /// 超出位宽的扩展帧 ID 被拒绝
    #[test]
    fn encode_rejects_wide_extended_id(id in 0x2000_0000u32..=u32::MAX) {
        let frame = CanFrame { id, is_extended: true, ..Default::default() };
        let rejected = matches!(encode(&frame), Err(EncodeError::InvalidCanId { width: 29, .. }));
        prop_assert!(rejected);
    }

    /// 任意字节输入都不会 panic
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode(&bytes);
        let _ = records(&bytes).count();
    }

    /// 截断的合法记录只会得到错误
    #[test]
    fn decode_truncated_record_fails(frame in valid_frame(), cut in 0usize..36) {
        let encoded = encode(&frame).unwrap();
        prop_assert!(decode(&encoded[..cut]).is_err());
    }

    /// 拼接的多条记录按顺序全部解出
    #[test]
    fn records_decode_concatenated_frames(frames in prop::collection::vec(valid_frame(), 1..8)) {
        let mut datagram = Vec::new();
        for frame in &frames {
            datagram.extend_from_slice(&encode(frame).unwrap());
        }

        let decoded: Vec<CanFrame> = records(&datagram)
            .map(|r| match r {
                Ok(Record::Data(frame)) => frame,
                other => panic!("Unexpected record: {:?}", other),
            })
            .collect();

        prop_assert_eq!(decoded.len(), frames.len());
        for (a, b) in frames.iter().zip(decoded.iter()) {
            prop_assert!(a.content_eq(b));
        }
    }
}
