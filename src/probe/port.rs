// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Loopback port probing.
//!
//! `find_available_port` walks a range and returns the first port where a
//! loopback listener can be bound and immediately released; `is_reachable`
//! checks whether something is accepting connections on a port.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::trace;

use crate::error::ProbeError;

/// Build the loopback address for a port.
pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Find the first available port in `[start, end]` (inclusive).
///
/// A port counts as available when a loopback listener can be bound to it;
/// the listener is released before returning, so the caller must bind it
/// again promptly.
pub async fn find_available_port(start: u16, end: u16) -> Result<u16, ProbeError> {
    for port in start..=end {
        match TcpListener::bind(loopback(port)).await {
            Ok(listener) => {
                drop(listener);
                trace!(port, "found available port");
                return Ok(port);
            }
            Err(_) => continue,
        }
    }
    Err(ProbeError::NoAvailablePort { start, end })
}

/// Check whether a loopback port is accepting connections.
pub async fn is_reachable(port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(loopback(port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_available_port_skips_bound() {
        // Hold a listener on the first port of the range.
        let first = TcpListener::bind(loopback(0)).await.unwrap();
        let held = first.local_addr().unwrap().port();

        let found = find_available_port(held, held.saturating_add(5))
            .await
            .unwrap();
        assert_ne!(found, held);
        assert!(found > held);
    }

    #[tokio::test]
    async fn test_find_available_port_exhausted() {
        let a = TcpListener::bind(loopback(0)).await.unwrap();
        let port = a.local_addr().unwrap().port();

        let result = find_available_port(port, port).await;
        assert!(matches!(
            result,
            Err(ProbeError::NoAvailablePort { .. })
        ));
    }

    #[tokio::test]
    async fn test_is_reachable() {
        let listener = TcpListener::bind(loopback(0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(is_reachable(port, Duration::from_secs(1)).await);

        drop(listener);
        // A freshly released port refuses connections.
        assert!(!is_reachable(port, Duration::from_secs(1)).await);
    }
}
