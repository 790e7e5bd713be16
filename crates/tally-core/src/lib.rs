//! tally-core
//!
//! Core building blocks for the vote tally worker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, tally, message, outcome, errors）
//! - **ports**: 抽象化レイヤー（JobStore, TallyStore, DeliveryQueue, WorkSimulator）
//! - **app**: アプリケーションロジック（processor, worker_loop, worker_group, status）
//! - **impls**: 実装（InMemoryStore, InMemoryDeliveryQueue など開発・テスト用）
//!
//! Production adapters live in their own crates:
//! - `tally-pg`: PostgreSQL store
//! - `tally-amqp`: RabbitMQ delivery queue

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;
