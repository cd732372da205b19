// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod buffer;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod ring;
pub mod serial;
pub mod source;
// 公开导出常用类型，方便外部调用
pub use buffer::{ChannelSnapshot, ChannelStore, SharedStore};
pub use error::ScopeError;
pub use parser::{parse_field, validate_batch, FrameParser, ParserState};
pub use pipeline::SerialPipeline;
pub use ring::RingBuffer;
pub use serial::{list_ports, ParityMode, SerialSettings, SerialSource, StopBitsMode};
pub use source::{ByteSource, ManualSource, SimulatedSource};
