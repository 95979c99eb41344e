pub mod catalog;
pub mod listing;
pub mod pool;
pub mod session;

pub use catalog::RemoteCatalog;
pub use pool::{ConnectionPool, PooledConn, PooledSession, SessionFactory};
pub use session::{FtpConnector, FtpSession};
