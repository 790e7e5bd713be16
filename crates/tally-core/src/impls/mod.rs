//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports のインメモリ実装を含めます。
//! 障害注入（fault injection）ができるので、ワーカーの ack/reject 方針を
//! 実インフラなしでテストできます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: JobStore + TallyStore
//! - **InMemoryDeliveryQueue**: 配送キュー（redelivery / recover 付き）
//!
//! # 本番用実装
//! - `tally-pg`: PostgresStore
//! - `tally-amqp`: AmqpDeliveryQueue

pub mod inmem_delivery;
pub mod inmem_store;

// 主要な型を再エクスポート
pub use self::inmem_delivery::{InMemoryDeliveryQueue, Settlement};
pub use self::inmem_store::InMemoryStore;
