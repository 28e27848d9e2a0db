// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::{ConfigError, ConfigFile};
use std::time::Duration;

// defaults applied when a key is absent
const MIN_THREADS: usize = 5;
const MAX_THREADS: usize = 100;
const THREAD_START_DELAY_US: u64 = 10;
const QUEUE_SIZE: usize = 1000;
const MAX_REQUEST_TIME_S: u64 = 600;
const SESSION_TIMEOUT_S: u64 = 300;
const LISTEN_BACKLOG: i32 = 64;
const LISTEN_RETRY: usize = 5;
const SOCKET_READ_TIMEOUT_MS: u64 = 10_000;
const SOCKET_WRITE_TIMEOUT_MS: u64 = 10_000;
const KEEP_ALIVE_MAX: usize = 1000;
const KEEP_ALIVE_TIMEOUT_MS: u64 = 15_000;
const BUFFER_SIZE: usize = 16 * 1024;
const MIN_COMPRESS_SIZE: usize = 1024;
const MAX_URL_MAP_CACHE: usize = 8192;
const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// One listening endpoint. `tls` carries certificate material for
/// `SslListen` entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenSpec {
    pub ip: String,
    pub port: u16,
    pub tls: Option<TlsSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsSpec {
    pub certificate: String,
    pub key: String,
}

/// The typed view of the configuration surface the serving core consumes.
/// Unknown keys in the file are left for other components to interpret.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub min_threads: usize,
    pub max_threads: usize,
    pub thread_start_delay: Duration,
    pub queue_size: usize,
    pub max_request_time: Duration,
    pub session_timeout: Duration,
    pub listen_backlog: i32,
    pub listen_retry: usize,
    pub socket_read_timeout: Duration,
    pub socket_write_timeout: Duration,
    pub keep_alive_max: usize,
    pub keep_alive_timeout: Duration,
    pub buffer_size: usize,
    /// Upper bound on an inbound request in bytes; zero means unbounded.
    pub max_request_size: usize,
    pub min_compress_size: usize,
    pub enable_compression: bool,
    pub default_content_type: String,
    pub max_url_map_cache: usize,
    pub listen: Vec<ListenSpec>,
    pub set_env: Vec<(String, String)>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            min_threads: MIN_THREADS,
            max_threads: MAX_THREADS,
            thread_start_delay: Duration::from_micros(THREAD_START_DELAY_US),
            queue_size: QUEUE_SIZE,
            max_request_time: Duration::from_secs(MAX_REQUEST_TIME_S),
            session_timeout: Duration::from_secs(SESSION_TIMEOUT_S),
            listen_backlog: LISTEN_BACKLOG,
            listen_retry: LISTEN_RETRY,
            socket_read_timeout: Duration::from_millis(SOCKET_READ_TIMEOUT_MS),
            socket_write_timeout: Duration::from_millis(SOCKET_WRITE_TIMEOUT_MS),
            keep_alive_max: KEEP_ALIVE_MAX,
            keep_alive_timeout: Duration::from_millis(KEEP_ALIVE_TIMEOUT_MS),
            buffer_size: BUFFER_SIZE,
            max_request_size: 0,
            min_compress_size: MIN_COMPRESS_SIZE,
            enable_compression: true,
            default_content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            max_url_map_cache: MAX_URL_MAP_CACHE,
            listen: vec![default_listener()],
            set_env: Vec::new(),
        }
    }
}

fn default_listener() -> ListenSpec {
    // bind the conventional port when running as root, a high port otherwise
    let port = if unsafe { libc::getuid() } == 0 {
        80
    } else {
        8000
    };

    ListenSpec {
        ip: "0.0.0.0".to_owned(),
        port,
        tls: None,
    }
}

impl ServerOptions {
    pub fn resolve(config: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut options = Self {
            min_threads: config.parsed_or("MinThreads", defaults.min_threads)?,
            max_threads: config.parsed_or("MaxThreads", defaults.max_threads)?,
            thread_start_delay: Duration::from_micros(
                config.parsed_or("ThreadStartDelay", THREAD_START_DELAY_US)?,
            ),
            queue_size: config.parsed_or("QueueSize", defaults.queue_size)?,
            max_request_time: Duration::from_secs(
                config.parsed_or("MaxRequestTime", MAX_REQUEST_TIME_S)?,
            ),
            session_timeout: Duration::from_secs(
                config.parsed_or("SessionTimeout", SESSION_TIMEOUT_S)?,
            ),
            listen_backlog: config.parsed_or("ListenBacklog", defaults.listen_backlog)?,
            listen_retry: config.parsed_or("ListenRetry", defaults.listen_retry)?,
            socket_read_timeout: Duration::from_millis(
                config.parsed_or("SocketReadTimeout", SOCKET_READ_TIMEOUT_MS)?,
            ),
            socket_write_timeout: Duration::from_millis(
                config.parsed_or("SocketWriteTimeout", SOCKET_WRITE_TIMEOUT_MS)?,
            ),
            keep_alive_max: config.parsed_or("KeepAliveMax", defaults.keep_alive_max)?,
            keep_alive_timeout: Duration::from_millis(
                config.parsed_or("KeepAliveTimeout", KEEP_ALIVE_TIMEOUT_MS)?,
            ),
            buffer_size: config.parsed_or("BufferSize", defaults.buffer_size)?,
            max_request_size: config.parsed_or("MaxRequestSize", defaults.max_request_size)?,
            min_compress_size: config.parsed_or("MinCompressSize", defaults.min_compress_size)?,
            enable_compression: config.bool_or("EnableCompression", defaults.enable_compression)?,
            default_content_type: config
                .value("DefaultContentType")
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_owned(),
            max_url_map_cache: config.parsed_or("MaxUrlMapCache", defaults.max_url_map_cache)?,
            listen: Vec::new(),
            set_env: Vec::new(),
        };

        if options.min_threads == 0 || options.max_threads < options.min_threads {
            return Err(ConfigError::Invalid(format!(
                "thread bounds are inconsistent: MinThreads {} MaxThreads {}",
                options.min_threads, options.max_threads
            )));
        }

        if options.queue_size == 0 {
            return Err(ConfigError::Invalid("QueueSize must be positive".into()));
        }

        for entry in config.entries_for("SetEnv") {
            if entry.params.len() < 2 {
                return Err(ConfigError::BadArity {
                    key: "SetEnv".into(),
                    got: entry.params.len(),
                });
            }
            options
                .set_env
                .push((entry.params[0].clone(), entry.params[1].clone()));
        }

        for entry in config.entries_for("Listen") {
            options.listen.push(plain_listener(entry)?);
        }

        let default_certificate = config.value("SslCertificate");
        let default_key = config.value("SslKey");
        for entry in config.entries_for("SslListen") {
            options
                .listen
                .push(ssl_listener(entry, default_certificate, default_key)?);
        }

        if options.listen.is_empty() {
            let listener = default_listener();
            info!(
                "no listeners defined - using ip {} port {}",
                listener.ip, listener.port
            );
            options.listen.push(listener);
        }

        Ok(options)
    }
}

fn listen_port(entry: &crate::ConfigEntry, default: u16) -> Result<u16, ConfigError> {
    match entry.params.get(1) {
        Some(p) => p.parse().map_err(|_| ConfigError::BadValue {
            key: entry.key.clone(),
            value: p.clone(),
        }),
        None => Ok(default),
    }
}

fn plain_listener(entry: &crate::ConfigEntry) -> Result<ListenSpec, ConfigError> {
    if entry.params.is_empty() {
        return Err(ConfigError::BadArity {
            key: "Listen".into(),
            got: 0,
        });
    }

    Ok(ListenSpec {
        ip: entry.params[0].clone(),
        port: listen_port(entry, 80)?,
        tls: None,
    })
}

fn ssl_listener(
    entry: &crate::ConfigEntry,
    default_certificate: Option<&str>,
    default_key: Option<&str>,
) -> Result<ListenSpec, ConfigError> {
    if entry.params.is_empty() {
        return Err(ConfigError::BadArity {
            key: "SslListen".into(),
            got: 0,
        });
    }

    let certificate = entry
        .params
        .get(2)
        .map(String::as_str)
        .or(default_certificate)
        .ok_or_else(|| ConfigError::Invalid("Ssl-certificate not configured".into()))?
        .to_owned();

    // with no explicit key the certificate file is expected to carry it
    let key = entry
        .params
        .get(3)
        .map(String::as_str)
        .or(entry.params.get(2).map(String::as_str))
        .or(default_key)
        .unwrap_or(&certificate)
        .to_owned();

    Ok(ListenSpec {
        ip: entry.params[0].clone(),
        port: listen_port(entry, 443)?,
        tls: Some(TlsSpec { certificate, key }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_is_empty() {
        let config = ConfigFile::parse("").unwrap();
        let options = ServerOptions::resolve(&config).unwrap();

        assert_eq!(options.min_threads, 5);
        assert_eq!(options.max_threads, 100);
        assert_eq!(options.queue_size, 1000);
        assert_eq!(options.listen.len(), 1);
        assert_eq!(options.listen[0].ip, "0.0.0.0");
    }

    #[test]
    fn listeners_resolve_ports_and_tls_defaults() {
        let config = ConfigFile::parse(
            "Listen 127.0.0.1 9101\n\
             Listen 10.0.0.1\n\
             SslCertificate /etc/tern/tern.crt\n\
             SslKey /etc/tern/tern.key\n\
             SslListen 127.0.0.1 8443\n\
             SslListen 127.0.0.1 9443 /other.crt /other.key\n",
        )
        .unwrap();
        let options = ServerOptions::resolve(&config).unwrap();

        assert_eq!(options.listen.len(), 4);
        assert_eq!(options.listen[0].port, 9101);
        assert_eq!(options.listen[1].port, 80);

        let tls = options.listen[2].tls.as_ref().unwrap();
        assert_eq!(tls.certificate, "/etc/tern/tern.crt");
        assert_eq!(tls.key, "/etc/tern/tern.key");

        let tls = options.listen[3].tls.as_ref().unwrap();
        assert_eq!(tls.certificate, "/other.crt");
        assert_eq!(tls.key, "/other.key");
    }

    #[test]
    fn ssl_listener_without_certificate_fails() {
        let config = ConfigFile::parse("SslListen 127.0.0.1 8443\n").unwrap();
        assert!(matches!(
            ServerOptions::resolve(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn certificate_only_entry_doubles_as_key() {
        let config = ConfigFile::parse("SslListen 127.0.0.1 8443 /combined.pem\n").unwrap();
        let options = ServerOptions::resolve(&config).unwrap();

        let tls = options.listen[0].tls.as_ref().unwrap();
        assert_eq!(tls.certificate, "/combined.pem");
        assert_eq!(tls.key, "/combined.pem");
    }

    #[test]
    fn inconsistent_thread_bounds_fail() {
        let config = ConfigFile::parse("MinThreads 8\nMaxThreads 2\n").unwrap();
        assert!(ServerOptions::resolve(&config).is_err());
    }

    #[test]
    fn set_env_requires_two_params() {
        let config = ConfigFile::parse("SetEnv ONLY_NAME\n").unwrap();
        assert!(matches!(
            ServerOptions::resolve(&config),
            Err(ConfigError::BadArity { .. })
        ));

        let config = ConfigFile::parse("SetEnv NAME value\n").unwrap();
        let options = ServerOptions::resolve(&config).unwrap();
        assert_eq!(options.set_env, vec![("NAME".into(), "value".into())]);
    }

    #[test]
    fn durations_use_documented_units() {
        let config = ConfigFile::parse(
            "ThreadStartDelay 250\n\
             MaxRequestTime 30\n\
             SocketReadTimeout 1500\n\
             KeepAliveTimeout 500\n",
        )
        .unwrap();
        let options = ServerOptions::resolve(&config).unwrap();

        assert_eq!(options.thread_start_delay, Duration::from_micros(250));
        assert_eq!(options.max_request_time, Duration::from_secs(30));
        assert_eq!(options.socket_read_timeout, Duration::from_millis(1500));
        assert_eq!(options.keep_alive_timeout, Duration::from_millis(500));
    }
}
