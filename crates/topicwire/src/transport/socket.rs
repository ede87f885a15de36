// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket setup shared by the client and the server.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::config::WireConfig;

/// Apply [`WireConfig`] options to a connected stream.
///
/// The read timeout doubles as the read-idle detector: a blocking read that
/// sees no bytes for that long returns `WouldBlock`/`TimedOut`.
pub fn configure_stream(stream: &TcpStream, config: &WireConfig) -> io::Result<()> {
    stream.set_nodelay(config.nodelay)?;
    stream.set_read_timeout(config.read_timeout())?;

    let sock = SockRef::from(stream);
    if config.socket_send_buffer > 0 {
        sock.set_send_buffer_size(config.socket_send_buffer)?;
    }
    if config.socket_recv_buffer > 0 {
        sock.set_recv_buffer_size(config.socket_recv_buffer)?;
    }
    Ok(())
}

/// Connect with a bounded timeout.
pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&addr.into(), timeout)?;
    Ok(socket.into())
}

/// Bind a non-blocking listener with address reuse.
pub fn listen(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}
