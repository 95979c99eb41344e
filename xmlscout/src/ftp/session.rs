use std::io::Read;
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::errors::{SearchError, SearchResult};
use crate::ftp::pool::{PooledSession, SessionFactory};

/// One authenticated FTP session.
///
/// Owned exclusively by the pool while idle and by exactly one task while
/// checked out. A session that sees a transport failure marks itself
/// unhealthy; the pool discards it on release and makes room for a
/// replacement.
pub struct FtpSession {
    stream: FtpStream,
    last_used: Instant,
    healthy: bool,
}

impl FtpSession {
    /// Connect, authenticate and switch to binary transfers.
    pub fn connect(config: &ConnectionConfig) -> SearchResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(SearchError::IoError)?
            .next()
            .ok_or_else(|| {
                SearchError::connection_failed(format!(
                    "could not resolve {}:{}",
                    config.host, config.port
                ))
            })?;

        let mut stream = FtpStream::connect_timeout(addr, timeout)?;
        let _ = stream.get_ref().set_read_timeout(Some(timeout));
        let _ = stream.get_ref().set_write_timeout(Some(timeout));

        stream.login(&config.username, &config.password)?;
        stream.transfer_type(FileType::Binary)?;

        // Start every session from the server root; some servers drop new
        // logins into a home directory instead.
        if let Err(e) = stream.cwd("/") {
            warn!("Could not navigate to server root after login: {}", e);
        }

        debug!("FTP session established to {}:{}", config.host, config.port);
        Ok(Self {
            stream,
            last_used: Instant::now(),
            healthy: true,
        })
    }

    pub fn cwd(&mut self, path: &str) -> SearchResult<()> {
        self.last_used = Instant::now();
        self.stream.cwd(path).map_err(|e| self.fail(e))
    }

    /// Raw LIST lines for the current directory.
    pub fn list(&mut self) -> SearchResult<Vec<String>> {
        self.last_used = Instant::now();
        self.stream.list(None).map_err(|e| self.fail(e))
    }

    /// Stream a remote file through `consume`. The reader yields the file's
    /// bytes in order; the data connection is closed when `consume` returns.
    pub fn retrieve<F>(&mut self, name: &str, mut consume: F) -> SearchResult<()>
    where
        F: FnMut(&mut dyn Read) -> std::io::Result<()>,
    {
        self.last_used = Instant::now();
        self.stream
            .retr(name, |reader| {
                consume(reader).map_err(FtpError::ConnectionError)
            })
            .map_err(|e| self.fail(e))
    }

    fn fail(&mut self, err: FtpError) -> SearchError {
        // A failed command (e.g. 550 on a missing path) leaves the control
        // connection usable; only transport-level failures poison it.
        if matches!(err, FtpError::ConnectionError(_) | FtpError::BadResponse) {
            self.healthy = false;
        }
        SearchError::Ftp(err)
    }
}

/// Sessions idle for less than this skip the wire probe on checkout.
const PROBE_AFTER_IDLE: Duration = Duration::from_secs(10);

impl PooledSession for FtpSession {
    fn check(&mut self) -> bool {
        if !self.healthy {
            return false;
        }
        // A recently used session is almost certainly still up; only probe
        // ones that have sat idle long enough for the server to drop them.
        if self.last_used.elapsed() < PROBE_AFTER_IDLE {
            return true;
        }
        match self.stream.noop() {
            Ok(()) => {
                self.last_used = Instant::now();
                true
            }
            Err(e) => {
                debug!("Session health check failed: {}", e);
                self.healthy = false;
                false
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.quit() {
            debug!("Error closing FTP session: {}", e);
        }
    }
}

/// Opens new [`FtpSession`]s for the pool.
#[derive(Clone)]
pub struct FtpConnector {
    config: ConnectionConfig,
}

impl FtpConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

impl SessionFactory for FtpConnector {
    type Session = FtpSession;

    fn open(&self) -> SearchResult<FtpSession> {
        FtpSession::connect(&self.config)
    }
}
