//! TCP connect with optional timeout, `TCP_NODELAY` and `SO_LINGER`.
//!
//! # Example
//!
//! ```ignore
//! use framelink::transport::connect;
//! use std::time::Duration;
//!
//! let stream = connect("127.0.0.1:7777", Some(Duration::from_secs(5)), true, None).await?;
//! ```

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{FramelinkError, Result};

/// Open a TCP stream to `addr`.
///
/// # Errors
///
/// `ConnectTimeout` when `timeout` elapses first, `ConnectFailed` for any
/// resolver or socket error. Neither leaves anything to clean up.
pub async fn connect(
    addr: &str,
    timeout: Option<Duration>,
    nodelay: bool,
    linger: Option<Duration>,
) -> Result<TcpStream> {
    debug!(peer = %addr, ?timeout, "Connecting");

    let attempt = TcpStream::connect(addr);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| FramelinkError::ConnectTimeout {
                addr: addr.to_string(),
                timeout: limit,
            })?,
        None => attempt.await,
    }
    .map_err(|source| FramelinkError::ConnectFailed {
        addr: addr.to_string(),
        source,
    })?;

    stream
        .set_nodelay(nodelay)
        .map_err(|source| FramelinkError::ConnectFailed {
            addr: addr.to_string(),
            source,
        })?;

    if linger.is_some() {
        #[allow(deprecated)]
        let applied = stream.set_linger(linger);
        applied.map_err(|source| FramelinkError::ConnectFailed {
            addr: addr.to_string(),
            source,
        })?;
    }

    Ok(stream)
}
