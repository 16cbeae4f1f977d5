// SPDX-License-Identifier: Apache-2.0

//! Single-target network I/O primitives: TCP connect, banner grab, HTTP GET,
//! ICMP echo (with a TCP fallback when raw sockets aren't available).
//!
//! All network errors here are non-fatal by contract: a probe always
//! returns a structured "closed"/"empty" result rather than propagating an
//! I/O error, so callers (plugins) never need to distinguish "target is
//! down" from "we couldn't check".

use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const BANNER_BUF_CAP: usize = 1024;
const HTTP_BUF_CAP: usize = 2048;
const CANONICAL_ALIVE_PORTS: [u16; 2] = [443, 80];

/// Result of a TCP connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResult {
    pub open: bool,
    pub error: Option<String>,
}

/// Result of an ICMP echo (or its TCP-connect fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoResult {
    pub alive: bool,
    pub rtt: Duration,
}

/// Reject loopback targets unless the caller has explicitly allowed them.
/// Returns `Ok(())` when the target is permitted to be probed.
fn check_loopback_allowed(ip: IpAddr, allow_loopback: bool) -> Result<()> {
    if ip.is_loopback() && !allow_loopback {
        return Err(Error::Invocation(format!(
            "refusing to probe loopback target {ip} (allow_loopback is not set)"
        )));
    }
    Ok(())
}

/// Attempt a full TCP three-way handshake to `ip:port`, bounded by
/// `timeout`. Open iff the handshake completes within the timeout.
pub fn tcp_connect(
    ip: IpAddr,
    port: u16,
    timeout: Duration,
    allow_loopback: bool,
) -> Result<ConnectResult> {
    check_loopback_allowed(ip, allow_loopback)?;
    let addr = SocketAddr::new(ip, port);
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(_stream) => Ok(ConnectResult {
            open: true,
            error: None,
        }),
        Err(e) => Ok(ConnectResult {
            open: false,
            error: Some(e.to_string()),
        }),
    }
}

/// Connect, then passively read up to 1 KiB or until `timeout/2` elapses.
/// Control bytes are trimmed from the result. Returns an empty string on
/// any failure or if nothing was read.
pub fn grab_banner(
    ip: IpAddr,
    port: u16,
    timeout: Duration,
    allow_loopback: bool,
) -> Result<String> {
    check_loopback_allowed(ip, allow_loopback)?;
    let addr = SocketAddr::new(ip, port);
    let read_timeout = timeout / 2;

    let mut stream = match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => stream,
        Err(_) => return Ok(String::new()),
    };
    let _ = stream.set_read_timeout(Some(read_timeout));

    let mut buf = [0u8; BANNER_BUF_CAP];
    let deadline = Instant::now() + read_timeout;
    let mut read_total = 0usize;
    while read_total < buf.len() && Instant::now() < deadline {
        match stream.read(&mut buf[read_total..]) {
            Ok(0) => break,
            Ok(n) => read_total += n,
            Err(_) => break,
        }
    }

    Ok(trim_control_bytes(&buf[..read_total]))
}

/// Send a minimal `GET / HTTP/1.0` request and return the raw response
/// bytes (headers + up to 2 KiB of body), or empty on any failure.
pub fn http_probe(
    ip: IpAddr,
    port: u16,
    timeout: Duration,
    allow_loopback: bool,
) -> Result<String> {
    check_loopback_allowed(ip, allow_loopback)?;
    let addr = SocketAddr::new(ip, port);

    let mut stream = match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => stream,
        Err(_) => return Ok(String::new()),
    };
    let _ = stream.set_write_timeout(Some(timeout));
    let _ = stream.set_read_timeout(Some(timeout));

    let request = format!("GET / HTTP/1.0\r\nHost: {ip}\r\n\r\n");
    if stream.write_all(request.as_bytes()).is_err() {
        return Ok(String::new());
    }

    let mut buf = [0u8; HTTP_BUF_CAP];
    let mut read_total = 0usize;
    let deadline = Instant::now() + timeout;
    while read_total < buf.len() && Instant::now() < deadline {
        match stream.read(&mut buf[read_total..]) {
            Ok(0) => break,
            Ok(n) => read_total += n,
            Err(_) => break,
        }
    }

    Ok(String::from_utf8_lossy(&buf[..read_total]).into_owned())
}

/// ICMP echo. Raw sockets require a capability this crate does not assume
/// (and does not implement, per the scope boundary on specific probe
/// implementations); this always takes the documented fallback: a TCP
/// connect to one of the canonical ports (443, then 80), treating success
/// as "alive".
pub fn icmp_echo(
    ip: IpAddr,
    _count: u32,
    timeout: Duration,
    allow_loopback: bool,
) -> Result<EchoResult> {
    check_loopback_allowed(ip, allow_loopback)?;
    let start = Instant::now();
    for port in CANONICAL_ALIVE_PORTS {
        let addr = SocketAddr::new(ip, port);
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return Ok(EchoResult {
                alive: true,
                rtt: start.elapsed(),
            });
        }
    }
    Ok(EchoResult {
        alive: false,
        rtt: start.elapsed(),
    })
}

/// Trim ASCII control bytes (other than whitespace already handled by
/// `trim`) from a raw byte buffer and return it as a `String`.
fn trim_control_bytes(bytes: &[u8]) -> String {
    let cleaned: String = String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[test]
    fn loopback_is_refused_by_default() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let err = tcp_connect(ip, 80, Duration::from_millis(50), false).unwrap_err();
        assert!(matches!(err, Error::Invocation(_)));
    }

    #[test]
    fn loopback_is_allowed_when_flagged() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let result = tcp_connect(ip, port, Duration::from_millis(200), true).unwrap();
        assert!(result.open);
    }

    #[test]
    fn connect_to_closed_port_reports_closed() {
        // Port 1 is reserved and essentially never listening in test envs.
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let result = tcp_connect(ip, 1, Duration::from_millis(100), true).unwrap();
        assert!(!result.open);
    }

    #[test]
    fn trim_control_bytes_strips_nuls_but_keeps_text() {
        let raw = b"hello\0\0\0world\r\n";
        assert_eq!(trim_control_bytes(raw), "helloworld");
    }

    #[test]
    fn icmp_echo_falls_back_to_tcp_connect() {
        let listener = TcpListener::bind("127.0.0.1:443");
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let result = icmp_echo(ip, 1, Duration::from_millis(150), true).unwrap();
        // We can't guarantee 443 is free in CI, so just assert the call
        // completes and reports a duration; aliveness depends on the
        // environment.
        let _ = listener;
        assert!(result.rtt >= Duration::ZERO);
    }
}
