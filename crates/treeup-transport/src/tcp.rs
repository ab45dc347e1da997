//! TCP connection establishment with the socket options the transfer
//! needs: keepalive, 1 MiB buffers, 300 second timeouts.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::TransportError;

const BUFFER_SIZE: usize = 1 << 20;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(300);

/// Resolve `host:port` and connect, trying each resolved address in turn.
pub fn connect(host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let addrs: Vec<SocketAddr> =
        (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Dns {
                host: host.to_string(),
                source,
            })?
            .collect();

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(match last_err {
        Some(TransportError::Io(source)) => TransportError::Connect {
            host: host.to_string(),
            port,
            source,
        },
        Some(other) => other,
        None => TransportError::Dns {
            host: host.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        },
    })
}

fn connect_addr(addr: SocketAddr) -> Result<TcpStream, TransportError> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket
        .set_keepalive(true)
        .map_err(TransportError::SocketOption)?;
    socket
        .set_send_buffer_size(BUFFER_SIZE)
        .map_err(TransportError::SocketOption)?;
    socket
        .set_recv_buffer_size(BUFFER_SIZE)
        .map_err(TransportError::SocketOption)?;
    socket
        .set_read_timeout(Some(SOCKET_TIMEOUT))
        .map_err(TransportError::SocketOption)?;
    socket
        .set_write_timeout(Some(SOCKET_TIMEOUT))
        .map_err(TransportError::SocketOption)?;

    socket.connect(&addr.into())?;
    Ok(socket.into())
}
