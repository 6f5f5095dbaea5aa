// 数据库模块
// 包含实体定义、存储接口以及 Postgres 与内存两种实现

pub mod memory; // 进程内实现
pub mod models; // 数据库实体定义
pub mod operations; // Postgres 操作实现
pub mod store; // 存储接口

// 重新导出常用类型，方便其他模块使用
pub use memory::InMemoryStore;
pub use operations::{ConversationOperation, MessageOperation};
pub use store::{ConversationDirectory, MessageStore};
