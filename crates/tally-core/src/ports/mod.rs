//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（PostgreSQL, RabbitMQ）へのインターフェースで、
//! ワーカーはコンストラクタ経由で受け取ります（グローバルな接続は持たない）。
//!
//! # 設計原則
//! - PostgreSQL が source of truth（正本）: jobs と votes
//! - RabbitMQ は配送キュー（at-least-once, 手動 ack）
//! - 各呼び出しは単一のアトミックな操作

pub mod store;
pub mod delivery_queue;
pub mod work;

// 主要な trait を再エクスポート
pub use self::store::{JobStore, TallyStore};
pub use self::delivery_queue::{DeliveryQueue, MessageLease, Subscription};
pub use self::work::{FixedDelay, NoDelay, WorkSimulator};
