//! 发送命令
//!
//! 发送一帧或按固定间隔重复发送。`--counter` 时数据的字节 1 和字节 3 携带一个回绕计数器。

use crate::bus::BusArgs;
use anyhow::{Context, Result, bail};
use clap::Args;
use peak_gw_can::{AdapterRegistry, CanAdapter, CanFrame};
use peak_gw_protocol::MAX_CLASSIC_DLC;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::info;

/// 计数器写入的数据字节位置
const COUNTER_POSITIONS: [usize; 2] = [1, 3];

/// 发送命令参数
#[derive(Args, Debug)]
pub struct SendCommand {
    /// CAN ID（十六进制 0x45 或十进制 69）
    #[arg(long, default_value = "0x45", value_parser = parse_id)]
    pub id: u32,

    /// 数据字节（十六进制，逗号分隔，如 00,11,22）
    #[arg(short, long, default_value = "00,00,11,00,22", value_parser = parse_data)]
    pub data: ::std::vec::Vec<u8>,

    /// 扩展帧（29-bit ID）
    #[arg(long)]
    pub extended: bool,

    /// 远程帧（不携带数据）
    #[arg(long)]
    pub remote: bool,

    /// 发送次数
    #[arg(short, long, default_value_t = 1)]
    pub repeat: u64,

    /// 两次发送之间的间隔（毫秒）
    #[arg(long, default_value_t = 200)]
    pub interval_ms: u64,

    /// 在字节 1 和 3 写入回绕计数器
    #[arg(long)]
    pub counter: bool,
}

impl SendCommand {
    pub fn execute(&self, bus_args: &BusArgs) -> Result<()> {
        // 先校验参数，避免打开总线后才失败
        self.build_frame(0)?;

        let registry = AdapterRegistry::with_builtin();
        let adapter = bus_args.open(&registry)?;

        let running = Arc::new(AtomicBool::new(true));
        {
            let running = Arc::clone(&running);
            ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
                .context("Failed to install Ctrl-C handler")?;
        }

        let interval = Duration::from_millis(self.interval_ms);
        let mut sent = 0u64;

        for i in 0..self.repeat {
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let frame = self.build_frame(i.wrapping_add(1) as u8)?;
            adapter
                .send(&frame)
                .with_context(|| format!("Failed to send {}", frame))?;
            sent += 1;
            info!("Sent {}", frame);

            if i + 1 < self.repeat {
                thread::sleep(interval);
            }
        }

        adapter.shutdown();
        info!("Sent {} frame(s)", sent);
        Ok(())
    }

    /// 构造第 n 次发送的帧
    fn build_frame(&self, counter: u8) -> Result<CanFrame> {
        let frame = if self.remote {
            CanFrame::new_remote(self.id, self.extended)
        } else {
            if self.data.len() > MAX_CLASSIC_DLC as usize {
                bail!("At most 8 data bytes allowed, got {}", self.data.len());
            }

            let mut data = self.data.clone();
            if self.counter {
                for &pos in &COUNTER_POSITIONS {
                    if let Some(byte) = data.get_mut(pos) {
                        *byte = counter;
                    }
                }
            }
            CanFrame::new(self.id, &data, self.extended)
        };

        frame
            .validate()
            .with_context(|| format!("Invalid frame for CAN ID 0x{:X}", self.id))?;
        Ok(frame)
    }
}

/// 解析 CAN ID（支持 0x 前缀的十六进制和十进制）
fn parse_id(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("Invalid CAN ID '{}': {}", s, e))
}

/// 解析逗号分隔的十六进制字节
fn parse_data(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }

    s.split(',')
        .map(|part| {
            let part = part.trim();
            let part = part.strip_prefix("0x").unwrap_or(part);
            u8::from_str_radix(part, 16).map_err(|e| format!("Invalid data byte '{}': {}", part, e))
        })
        .collect()
}
