//! 抓包命令
//!
//! 打印总线上接收到的每一帧，直到 Ctrl-C 或达到指定帧数。

use crate::bus::BusArgs;
use anyhow::{Context, Result};
use clap::Args;
use peak_gw_can::{AdapterRegistry, CanAdapter, CanError, CanFrame};
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// 抓包命令参数
#[derive(Args, Debug)]
pub struct DumpCommand {
    /// 收到指定帧数后退出（默认一直运行）
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// 以 JSON Lines 格式输出
    #[arg(long)]
    pub json: bool,
}

impl DumpCommand {
    pub fn execute(&self, bus_args: &BusArgs) -> Result<()> {
        let registry = AdapterRegistry::with_builtin();
        let adapter = Arc::new(bus_args.open(&registry)?);

        // Ctrl-C 关闭总线，阻塞中的接收返回 Cancelled
        let running = Arc::new(AtomicBool::new(true));
        {
            let running = Arc::clone(&running);
            let adapter = Arc::clone(&adapter);
            ctrlc::set_handler(move || {
                running.store(false, Ordering::SeqCst);
                adapter.shutdown();
            })
            .context("Failed to install Ctrl-C handler")?;
        }

        let stdout = io::stdout();
        let mut out = stdout.lock();
        let mut received = 0u64;

        while running.load(Ordering::SeqCst) {
            if self.count.is_some_and(|limit| received >= limit) {
                break;
            }

            match adapter.recv(None) {
                Ok(Some(frame)) => {
                    received += 1;
                    self.print_frame(&mut out, &frame)?;
                },
                Ok(None) => continue,
                Err(CanError::Cancelled | CanError::NotOpen) => break,
                Err(e) => return Err(e).context("Receive failed"),
            }
        }

        adapter.shutdown();
        info!("Received {} frame(s)", received);
        Ok(())
    }

    fn print_frame(&self, out: &mut impl Write, frame: &CanFrame) -> Result<()> {
        if self.json {
            serde_json::to_writer(&mut *out, frame)?;
            writeln!(out)?;
        } else {
            writeln!(out, "{}", frame)?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_frame_text() {
        let cmd = DumpCommand { count: None, json: false };
        let mut out = Vec::new();
        cmd.print_frame(&mut out, &CanFrame::new_standard(0x45, &[0x00, 0x11]))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ID=0x045 DLC=2 [00 11]\n");
    }

    #[test]
    fn test_print_frame_json() {
        let cmd = DumpCommand { count: None, json: true };
        let mut out = Vec::new();
        let frame = CanFrame::new_extended(0x1ABCDEF, &[1]).with_timestamp_us(7);
        cmd.print_frame(&mut out, &frame).unwrap();

        let line = String::from_utf8(out).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["id"], 0x1ABCDEF);
        assert_eq!(value["is_extended"], true);
        assert_eq!(value["timestamp_us"], 7);
    }
}
