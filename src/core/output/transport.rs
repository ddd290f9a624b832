//! Network transports carrying line-protocol payloads to InfluxDB.
//!
//! Both transports use blocking sockets driven inline from the sampling loop.
//! The HTTP transport keeps one connection open across ticks and never waits
//! for the server's reply: whatever answers have arrived are discarded before
//! the next request goes out.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{backoff::Backoff, error::OutputError};

/// Carries one tick worth of line protocol to the database.
pub trait LineTransport: Send {
    /// Sends a payload made of newline separated points.
    fn send(&mut self, payload: &str) -> Result<(), OutputError>;

    /// Human readable destination, used in logs.
    fn endpoint(&self) -> &str;

    /// Drops the underlying connection, if any.
    fn close(&mut self) {}
}

/// Resolves `host` once, preferring IPv4 addresses.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, OutputError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| OutputError::Resolve {
            host: host.to_owned(),
            reason: e.to_string(),
        })?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| OutputError::Resolve {
            host: host.to_owned(),
            reason: "no address returned".to_owned(),
        })
}

/// HTTP/1.1 transport posting to `/write` over a persistent connection.
pub struct HttpLineTransport {
    addr: SocketAddr,
    host_header: String,
    database: String,
    endpoint: String,
    timeout: Duration,
    stream: Option<TcpStream>,
    backoff: Backoff,
    request: Vec<u8>,
}

impl HttpLineTransport {
    /// Creates the transport. No connection is made until the first send.
    pub fn new(addr: SocketAddr, host: &str, database: &str, timeout: Duration, backoff: Backoff) -> Self {
        Self {
            addr,
            host_header: format!("{}:{}", host, addr.port()),
            database: database.to_owned(),
            endpoint: format!("http://{}/write?db={}", addr, database),
            timeout,
            stream: None,
            backoff,
            request: Vec::with_capacity(8192),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self, now: Instant) -> Result<TcpStream, OutputError> {
        if !self.backoff.ready(now) {
            return Err(OutputError::TransportUnavailable {
                endpoint: self.endpoint.clone(),
                retry_in: self.backoff.remaining(now),
            });
        }

        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)
            .and_then(|s| {
                s.set_write_timeout(Some(self.timeout))?;
                s.set_nodelay(true)?;
                Ok(s)
            })
            .map_err(|source| {
                let holdoff = self.backoff.record_failure(now);
                warn!(
                    "Connection to InfluxDB at {} failed (attempt {}), holding off for {:?}",
                    self.addr,
                    self.backoff.attempt(),
                    holdoff
                );
                OutputError::Io {
                    sink: "influxdb",
                    source,
                }
            })?;

        info!("Connected to InfluxDB at {}", self.addr);
        Ok(stream)
    }

    fn build_request(&mut self, payload: &str) {
        self.request.clear();
        // Writing into a Vec cannot fail.
        let _ = write!(
            self.request,
            "POST /write?db={}&precision=ns HTTP/1.1\r\n\
             Host: {}\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: keep-alive\r\n\r\n",
            self.database,
            self.host_header,
            payload.len()
        );
        self.request.extend_from_slice(payload.as_bytes());
    }
}

impl LineTransport for HttpLineTransport {
    fn send(&mut self, payload: &str) -> Result<(), OutputError> {
        let now = Instant::now();

        if let Some(stream) = self.stream.as_mut() {
            if !drain_responses(stream) {
                debug!("InfluxDB closed the connection, reconnecting");
                self.stream = None;
            }
        }

        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect(now)?,
        };

        self.build_request(payload);
        match stream.write_all(&self.request) {
            Ok(()) => {
                self.stream = Some(stream);
                self.backoff.reset();
                Ok(())
            }
            Err(source) => {
                let holdoff = self.backoff.record_failure(now);
                warn!(
                    "Write to InfluxDB at {} failed: {}, holding off for {:?}",
                    self.addr, source, holdoff
                );
                Err(OutputError::Io {
                    sink: "influxdb",
                    source,
                })
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!("Closed InfluxDB connection to {}", self.addr);
        }
    }
}

/// Reads and discards whatever the server sent back so far.
///
/// Returns false when the peer closed the connection or the socket failed.
fn drain_responses(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1024];
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let alive = loop {
        match stream.read(&mut buf) {
            Ok(0) => break false,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break false,
        }
    };
    alive && stream.set_nonblocking(false).is_ok()
}

/// UDP transport: one datagram per tick.
pub struct UdpLineTransport {
    addr: SocketAddr,
    endpoint: String,
    socket: Option<UdpSocket>,
    backoff: Backoff,
}

impl UdpLineTransport {
    pub fn new(addr: SocketAddr, backoff: Backoff) -> Self {
        Self {
            addr,
            endpoint: format!("udp://{}", addr),
            socket: None,
            backoff,
        }
    }

    fn bind(&self) -> io::Result<UdpSocket> {
        let local: SocketAddr = if self.addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(self.addr)?;
        Ok(socket)
    }
}

impl LineTransport for UdpLineTransport {
    fn send(&mut self, payload: &str) -> Result<(), OutputError> {
        let now = Instant::now();
        if self.socket.is_none() {
            if !self.backoff.ready(now) {
                return Err(OutputError::TransportUnavailable {
                    endpoint: self.endpoint.clone(),
                    retry_in: self.backoff.remaining(now),
                });
            }
            match self.bind() {
                Ok(socket) => self.socket = Some(socket),
                Err(source) => {
                    self.backoff.record_failure(now);
                    return Err(OutputError::Io {
                        sink: "influxdb",
                        source,
                    });
                }
            }
        }

        let Some(socket) = self.socket.as_ref() else {
            return Ok(());
        };
        match socket.send(payload.as_bytes()) {
            Ok(_) => {
                self.backoff.reset();
                Ok(())
            }
            Err(source) => {
                let holdoff = self.backoff.record_failure(now);
                warn!(
                    "Datagram to InfluxDB at {} failed: {}, holding off for {:?}",
                    self.addr, source, holdoff
                );
                self.socket = None;
                Err(OutputError::Io {
                    sink: "influxdb",
                    source,
                })
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&mut self) {
        self.socket = None;
    }
}
