// 傳輸層模組
// 連接外部 webhook 投遞通道，將入站訊息解碼為事件

pub mod adapter;
pub mod error;
pub mod memory;
pub mod pubsub;
pub mod socket;

// 重新導出常用類型
pub use adapter::{create_adapter, ConnectionInfo, EventSink, TransportAdapter, TransportKind};
pub use error::TransportError;
pub use memory::{MemoryPublisher, MemoryTransport};
pub use pubsub::PubSubTransport;
pub use socket::SocketTransport;
