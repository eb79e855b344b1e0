//! # PEAK Gateway CLI
//!
//! PEAK 以太网 CAN 网关的命令行工具。
//!
//! ```bash
//! # 打印总线上的所有帧（Ctrl-C 退出）
//! peak-gw-cli --send-host 192.168.10.110 dump
//!
//! # 每 200ms 发送一帧，字节 1 和 3 携带计数器
//! peak-gw-cli --send-host 192.168.10.110 send --id 0x45 --data 00,00,11,00,22 \
//!     --repeat 10 --interval-ms 200 --counter
//!
//! # 从配置文件读取 [bus] 表
//! peak-gw-cli --config gateway.toml dump --json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod bus;
mod commands;

use bus::BusArgs;
use commands::{DumpCommand, SendCommand};

/// PEAK Gateway CLI
#[derive(Parser, Debug)]
#[command(name = "peak-gw-cli")]
#[command(about = "Command-line tools for the PEAK Ethernet CAN gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    bus: BusArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 打印接收到的帧
    Dump {
        #[command(flatten)]
        args: DumpCommand,
    },

    /// 发送帧
    Send {
        #[command(flatten)]
        args: SendCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("peak_gw_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Dump { args } => args.execute(&cli.bus),
        Commands::Send { args } => args.execute(&cli.bus),
    }
}
