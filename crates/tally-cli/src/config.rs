//! Command line and environment configuration.
//!
//! Every flag falls back to an environment variable, then to a default, so the
//! worker starts with no arguments at all against a local stack.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tally_amqp::AmqpConfig;
use tally_pg::DbConfig;

#[derive(Parser, Debug)]
#[command(name = "tally", version, about = "Vote tally queue worker")]
pub struct Cli {
    #[command(flatten)]
    pub db: DbArgs,

    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Number of independent consumption loops.
    #[arg(long, env = "WORKER_INSTANCES", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub instances: u32,

    /// Simulated work per vote, in milliseconds (0 disables it).
    #[arg(long, env = "WORK_DELAY_MS", default_value_t = 500)]
    pub work_delay_ms: u64,

    /// Create the `jobs` and `votes` tables if they do not exist.
    #[arg(long)]
    pub init_schema: bool,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Consume votes until SIGINT/SIGTERM (default)
    Run,
    /// Queue one vote: insert a `queued` job and publish its message
    Publish {
        #[arg(long)]
        choice: String,
    },
    /// Print per-choice tallies and the most recent jobs as JSON
    Results {
        #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(i64).range(1..))]
        limit: i64,

        /// Also report the status of this job id.
        #[arg(long)]
        job: Option<String>,
    },
}

/// Parameters used to connect to PostgreSQL.
#[derive(Debug, Clone, Args)]
pub struct DbArgs {
    #[arg(long = "db-host", env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long = "db-port", env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long = "db-name", env = "DB_NAME", default_value = "voting")]
    pub db_name: String,

    #[arg(long = "db-user", env = "DB_USER", default_value = "postgres")]
    pub db_user: String,

    #[arg(long = "db-password", env = "DB_PASSWORD", default_value = "postgres", hide_env_values = true)]
    pub db_password: String,
}

/// Parameters used to connect to RabbitMQ.
#[derive(Debug, Clone, Args)]
pub struct BrokerArgs {
    #[arg(long = "rabbitmq-host", env = "RABBITMQ_HOST", default_value = "localhost")]
    pub rabbitmq_host: String,

    #[arg(long = "rabbitmq-port", env = "RABBITMQ_PORT", default_value_t = 5672)]
    pub rabbitmq_port: u16,

    #[arg(long = "rabbitmq-user", env = "RABBITMQ_USER", default_value = "guest")]
    pub rabbitmq_user: String,

    #[arg(long = "rabbitmq-password", env = "RABBITMQ_PASSWORD", default_value = "guest", hide_env_values = true)]
    pub rabbitmq_password: String,

    #[arg(long = "queue", env = "QUEUE_NAME", default_value = "votes")]
    pub queue_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Pool sized to one connection per loop.
    pub fn db_config(&self) -> DbConfig {
        DbConfig {
            host: self.db.db_host.clone(),
            port: self.db.db_port,
            name: self.db.db_name.clone(),
            user: self.db.db_user.clone(),
            password: self.db.db_password.clone(),
            max_connections: self.instances,
            ..DbConfig::default()
        }
    }

    pub fn amqp_config(&self) -> AmqpConfig {
        AmqpConfig {
            host: self.broker.rabbitmq_host.clone(),
            port: self.broker.rabbitmq_port,
            user: self.broker.rabbitmq_user.clone(),
            password: self.broker.rabbitmq_password.clone(),
            queue: self.broker.queue_name.clone(),
        }
    }

    pub fn work_delay(&self) -> Option<Duration> {
        (self.work_delay_ms > 0).then(|| Duration::from_millis(self.work_delay_ms))
    }
}
