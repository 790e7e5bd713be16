//! tally-pg
//!
//! PostgreSQL implementation of the `JobStore` and `TallyStore` ports.
//!
//! # テーブル
//! - `jobs(id, choice, status, created_at)`: 外部の producer が `queued` で作成する
//! - `votes(choice, count)`: 選択肢ごとの集計（upsert で 1 行ずつ増える）

mod config;
mod store;

pub use self::config::DbConfig;
pub use self::store::PostgresStore;
