//! TCP port negotiation.
//!
//! Probes with short-lived listeners to find a port the preview server can
//! bind. Probes default to the IPv4 loopback; use the `_on` variants when the
//! server binds another address.

use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

/// Number of consecutive ports probed by [`find_available_port`].
pub const MAX_PORT_ATTEMPTS: u16 = 10;

/// Port negotiation error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PortError {
    /// Port 0 cannot be negotiated.
    #[error("Invalid port: {0}")]
    InvalidPort(u16),
    /// Every probed port is taken.
    #[error("No available port found (tried {start}-{end})")]
    Exhausted {
        /// First probed port.
        start: u16,
        /// Last probed port.
        end: u16,
    },
}

/// Check whether `port` can be bound on `127.0.0.1`.
///
/// The probe listener is dropped immediately, so nothing stays bound.
pub fn is_port_available(port: u16) -> bool {
    is_port_available_on(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Check whether `port` can be bound on `ip`.
pub fn is_port_available_on(ip: IpAddr, port: u16) -> bool {
    TcpListener::bind((ip, port)).is_ok()
}

/// Ports probed when searching from `start`: at most [`MAX_PORT_ATTEMPTS`],
/// cut short at 65535 instead of wrapping around.
///
/// # Errors
///
/// Returns [`PortError::InvalidPort`] for port 0.
pub fn candidate_ports(start: u16) -> Result<RangeInclusive<u16>, PortError> {
    if start == 0 {
        return Err(PortError::InvalidPort(start));
    }
    Ok(start..=start.saturating_add(MAX_PORT_ATTEMPTS - 1))
}

/// Find the first available port in `start..start + MAX_PORT_ATTEMPTS`.
///
/// The range is cut short at 65535 instead of wrapping around.
///
/// # Errors
///
/// Returns [`PortError::InvalidPort`] for port 0 and [`PortError::Exhausted`]
/// if none of the probed ports is free.
pub fn find_available_port(start: u16) -> Result<u16, PortError> {
    find_available_port_with(start, is_port_available)
}

/// [`find_available_port`] probing `ip` instead of the IPv4 loopback.
///
/// # Errors
///
/// Same as [`find_available_port`].
pub fn find_available_port_on(ip: IpAddr, start: u16) -> Result<u16, PortError> {
    find_available_port_with(start, |port| is_port_available_on(ip, port))
}

/// Port search with an injectable availability probe.
fn find_available_port_with(
    start: u16,
    mut probe: impl FnMut(u16) -> bool,
) -> Result<u16, PortError> {
    let ports = candidate_ports(start)?;
    let end = *ports.end();
    for port in ports {
        if probe(port) {
            return Ok(port);
        }
        tracing::debug!(port, "Port unavailable");
    }

    Err(PortError::Exhausted { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bind an ephemeral loopback port and keep it held.
    fn hold_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_free_port_is_available() {
        let (listener, port) = hold_port();
        drop(listener);

        assert!(is_port_available(port));
    }

    #[test]
    fn test_bound_port_is_unavailable() {
        let (_listener, port) = hold_port();

        assert!(!is_port_available(port));
    }

    #[test]
    fn test_availability_check_does_not_hold_port() {
        let (listener, port) = hold_port();
        drop(listener);

        assert!(is_port_available(port));
        assert!(is_port_available(port));
    }

    #[test]
    fn test_find_returns_port_at_or_after_start() {
        let (listener, start) = hold_port();

        let port = find_available_port(start).unwrap();
        drop(listener);

        assert!(port > start);
    }

    #[test]
    fn test_find_returns_first_free_port() {
        let result = find_available_port_with(4000, |port| port == 4003);
        assert_eq!(result, Ok(4003));
    }

    #[test]
    fn test_find_exhausted_after_exactly_ten_probes() {
        let mut probes = Vec::new();

        let result = find_available_port_with(5000, |port| {
            probes.push(port);
            false
        });

        assert_eq!(
            result,
            Err(PortError::Exhausted {
                start: 5000,
                end: 5009
            })
        );
        assert_eq!(probes, (5000..5010).collect::<Vec<_>>());
    }

    #[test]
    fn test_find_does_not_wrap_past_max_port() {
        let mut probes = Vec::new();

        let result = find_available_port_with(65530, |port| {
            probes.push(port);
            false
        });

        assert_eq!(probes.last(), Some(&65535));
        assert_eq!(
            result,
            Err(PortError::Exhausted {
                start: 65530,
                end: 65535
            })
        );
    }

    #[test]
    fn test_candidate_ports_range() {
        assert_eq!(candidate_ports(38080), Ok(38080..=38089));
        assert_eq!(candidate_ports(65534), Ok(65534..=65535));
        assert_eq!(candidate_ports(0), Err(PortError::InvalidPort(0)));
    }

    #[test]
    fn test_port_held_on_ipv6_loopback_is_unavailable_there() {
        use std::net::Ipv6Addr;

        // Hosts without IPv6 loopback have nothing to check.
        let Ok(listener) = TcpListener::bind((Ipv6Addr::LOCALHOST, 0)) else {
            return;
        };
        let port = listener.local_addr().unwrap().port();

        assert!(!is_port_available_on(IpAddr::V6(Ipv6Addr::LOCALHOST), port));
        let found = find_available_port_on(IpAddr::V6(Ipv6Addr::LOCALHOST), port).unwrap();
        assert_ne!(found, port);
    }

    #[test]
    fn test_find_rejects_port_zero() {
        assert_eq!(find_available_port(0), Err(PortError::InvalidPort(0)));
    }

    #[test]
    fn test_exhausted_message_lists_range() {
        let err = PortError::Exhausted {
            start: 38080,
            end: 38089,
        };
        assert_eq!(
            err.to_string(),
            "No available port found (tried 38080-38089)"
        );
    }
}
