// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Command-line flags with environment-variable fallbacks, validated once at
//! startup into an immutable [`Config`]. Each component receives only its
//! own section.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ESERVICE_IDENTITY` | Service identity name | Required |
//! | `ESERVICE_HOST` | Bind host | `localhost` |
//! | `ESERVICE_HTTP_PORT` | Bind port | `7101` |
//! | `ESERVICE_WORKER_THREADS` | Worker pool size | `8` |
//! | `ESERVICE_QUEUE_DEPTH` | Units of work queued before submitters wait | `64` |
//! | `ESERVICE_REACTOR_THREADS` | Blocking-thread cap of the event loop runtime | `8` |
//! | `ESERVICE_MAX_BODY_BYTES` | Request body limit | `1048576` |
//! | `ESERVICE_DRAIN_TIMEOUT_SECS` | Shutdown drain deadline | `30` |
//! | `ESERVICE_STORAGE_URL` | Storage service URL | `http://{host}:{port}` |
//! | `ESERVICE_STORAGE_HOST` / `ESERVICE_STORAGE_PORT` | Used when no URL is set | `localhost` / `7201` |
//! | `ESERVICE_LEDGER_URL` | Ledger (registry) URL | `http://localhost:6600` |
//! | `ESERVICE_LEDGER_KEY_FILE` | Submitter key PEM used to sign registrations | Optional |
//! | `ESERVICE_KEY_PATH` | Directories searched for the submitter key | `.`, `./keys` |
//! | `ESERVICE_ENCLAVE_DATA` | Identity file name | `enclave.data` |
//! | `ESERVICE_ENCLAVE_SAVE` | Directory the identity is saved to | `./data` |
//! | `ESERVICE_ENCLAVE_PATH` | Directories searched for the identity | `.`, `./data` |
//! | `ESERVICE_KEY_ROOT` | Directory holding the module's `sealing.key` | `.` |
//! | `ESERVICE_ENCLAVE_COUNT` | Secure contexts in the module | `7` |
//! | `ESERVICE_MAX_CONTEXTS` | Execution contexts kept before the oldest is evicted | `1024` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::logging::LogFormat;

/// Default request timeout for the ledger client.
pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration for {0}")]
    Missing(&'static str),

    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Enclave service: exposes the enclave identity over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "eservice")]
#[command(about = "Enclave service front end")]
pub struct Args {
    /// Identity to use for the process
    #[arg(long, env = "ESERVICE_IDENTITY")]
    pub identity: String,

    /// Host to bind the HTTP server to
    #[arg(long, env = "ESERVICE_HOST", default_value = "localhost")]
    pub host: String,

    /// Port on which to run the HTTP server
    #[arg(long = "http", env = "ESERVICE_HTTP_PORT", default_value_t = 7101)]
    pub http_port: u16,

    /// Number of worker threads executing endpoint bodies
    #[arg(long, env = "ESERVICE_WORKER_THREADS", default_value_t = 8)]
    pub worker_threads: usize,

    /// Units of work that may wait for a worker before submitters block
    #[arg(long, env = "ESERVICE_QUEUE_DEPTH", default_value_t = 64)]
    pub queue_depth: usize,

    /// Blocking-thread cap of the event loop runtime
    #[arg(long, env = "ESERVICE_REACTOR_THREADS", default_value_t = 8)]
    pub reactor_threads: usize,

    /// Maximum accepted request body, in bytes
    #[arg(long, env = "ESERVICE_MAX_BODY_BYTES", default_value_t = 1024 * 1024)]
    pub max_body_bytes: usize,

    /// Seconds to wait for in-flight work after a shutdown signal
    #[arg(long, env = "ESERVICE_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// URL of the associated storage service
    #[arg(long = "sservice-url", env = "ESERVICE_STORAGE_URL")]
    pub storage_url: Option<String>,

    #[arg(long, env = "ESERVICE_STORAGE_HOST", default_value = "localhost")]
    pub storage_host: String,

    #[arg(long, env = "ESERVICE_STORAGE_PORT", default_value_t = 7201)]
    pub storage_port: u16,

    /// URL of the ledger the enclave registers with
    #[arg(long = "ledger", env = "ESERVICE_LEDGER_URL", default_value = "http://localhost:6600")]
    pub ledger_url: String,

    /// PEM file holding the key that signs registration requests
    #[arg(long, env = "ESERVICE_LEDGER_KEY_FILE")]
    pub ledger_key_file: Option<String>,

    /// Directories to search for the ledger key file
    #[arg(
        long = "key-path",
        env = "ESERVICE_KEY_PATH",
        value_delimiter = ',',
        num_args = 1..,
        default_values_t = [".".to_string(), "./keys".to_string()]
    )]
    pub key_search_path: Vec<String>,

    /// Name of the file containing enclave sealed storage
    #[arg(long = "enclave-data", env = "ESERVICE_ENCLAVE_DATA", default_value = "enclave.data")]
    pub enclave_data: String,

    /// Directory where enclave data will be saved
    #[arg(long = "enclave-save", env = "ESERVICE_ENCLAVE_SAVE", default_value = "./data")]
    pub enclave_save: String,

    /// Directories to search for the enclave data file
    #[arg(
        long = "enclave-path",
        env = "ESERVICE_ENCLAVE_PATH",
        value_delimiter = ',',
        num_args = 1..,
        default_values_t = [".".to_string(), "./data".to_string()]
    )]
    pub enclave_path: Vec<String>,

    /// Path to the secure module key root
    #[arg(long = "key-root", env = "ESERVICE_KEY_ROOT", default_value = ".")]
    pub key_root: String,

    /// Number of secure contexts the module may run concurrently
    #[arg(long, env = "ESERVICE_ENCLAVE_COUNT", default_value_t = 7)]
    pub enclave_count: usize,

    /// Execution contexts kept before the least recently used is evicted
    #[arg(long, env = "ESERVICE_MAX_CONTEXTS", default_value_t = 1024)]
    pub max_contexts: usize,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Validated, immutable service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub identity: String,
    pub service: ServiceConfig,
    pub storage_service: StorageServiceConfig,
    pub ledger: LedgerConfig,
    pub enclave_data: EnclaveDataConfig,
    pub enclave_module: EnclaveModuleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub worker_threads: usize,
    pub queue_depth: usize,
    pub reactor_threads: usize,
    pub max_body_bytes: usize,
    pub drain_timeout: Duration,
}

impl ServiceConfig {
    /// Resolve the bind address. Host names are looked up; the first result wins.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ConfigError::Invalid {
                field: "host",
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ConfigError::Invalid {
                field: "host",
                reason: format!("{} resolves to no address", self.host),
            })
    }
}

#[derive(Debug, Clone)]
pub struct StorageServiceConfig {
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub url: Url,
    pub key_file: Option<String>,
    pub key_search_path: Vec<PathBuf>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EnclaveDataConfig {
    pub file_name: String,
    pub save_path: PathBuf,
    pub search_path: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EnclaveModuleConfig {
    pub key_root: PathBuf,
    pub enclave_count: usize,
    pub max_contexts: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let identity = required("identity", args.identity)?;

        let service = ServiceConfig {
            host: required("host", args.host)?,
            port: args.http_port,
            worker_threads: at_least_one("worker_threads", args.worker_threads)?,
            queue_depth: at_least_one("queue_depth", args.queue_depth)?,
            reactor_threads: at_least_one("reactor_threads", args.reactor_threads)?,
            max_body_bytes: at_least_one("max_body_bytes", args.max_body_bytes)?,
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
        };

        let storage_url = match args.storage_url {
            Some(url) => url,
            None => format!("http://{}:{}", args.storage_host, args.storage_port),
        };
        let storage_service = StorageServiceConfig {
            url: parse_url("storage_service.url", &storage_url)?,
        };

        let ledger = LedgerConfig {
            url: parse_url("ledger.url", &args.ledger_url)?,
            key_file: args.ledger_key_file.filter(|f| !f.trim().is_empty()),
            key_search_path: paths("ledger.key_search_path", args.key_search_path)?,
            request_timeout: DEFAULT_LEDGER_TIMEOUT,
        };

        let enclave_data = EnclaveDataConfig {
            file_name: required("enclave_data.file_name", args.enclave_data)?,
            save_path: PathBuf::from(required("enclave_data.save_path", args.enclave_save)?),
            search_path: paths("enclave_data.search_path", args.enclave_path)?,
        };

        let enclave_module = EnclaveModuleConfig {
            key_root: PathBuf::from(required("enclave_module.key_root", args.key_root)?),
            enclave_count: at_least_one("enclave_module.enclave_count", args.enclave_count)?,
            max_contexts: at_least_one("enclave_module.max_contexts", args.max_contexts)?,
        };

        Ok(Self {
            identity,
            service,
            storage_service,
            ledger,
            enclave_data,
            enclave_module,
            logging: LoggingConfig {
                format: args.log_format,
            },
        })
    }
}

fn required(field: &'static str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(value)
    }
}

fn at_least_one(field: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::Invalid {
            field,
            reason: "must be at least 1".to_string(),
        })
    } else {
        Ok(value)
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("{value}: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid {
            field,
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn paths(field: &'static str, values: Vec<String>) -> Result<Vec<PathBuf>, ConfigError> {
    let paths: Vec<PathBuf> = values
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .collect();
    if paths.is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(paths)
    }
}
