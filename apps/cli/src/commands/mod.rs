//! 命令定义和实现

pub mod dump;
pub mod send;

pub use dump::DumpCommand;
pub use send::SendCommand;
