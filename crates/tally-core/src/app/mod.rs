//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **VoteProcessor**: 1 配送分のストア更新（mark_processing → work → tally → mark_completed）
//! - **WorkerLoop**: 配送ループ（receive→process→settle）
//! - **WorkerGroup**: 独立した WorkerLoop を N 本起動・停止する
//! - **WorkerStats**: ループごとの処理カウンタ

pub mod processor;
pub mod status;
pub mod worker_group;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::processor::VoteProcessor;
pub use self::status::WorkerStats;
pub use self::worker_group::{ShutdownHandle, WorkerGroup};
pub use self::worker_loop::WorkerLoop;
