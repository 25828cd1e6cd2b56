use anyhow::Result;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Create a DGRAM UDP socket bound to a specific source port.
///
/// The source port carries the flow identity, so every flow gets its own
/// short-lived socket. DGRAM keeps this unprivileged; only the ICMP
/// receive side needs a raw socket.
pub fn create_flow_socket(src_port: u16) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), src_port);
    socket.bind(&SockAddr::from(bind_addr))?;

    Ok(socket)
}

/// Create a raw ICMP socket for receiving Time Exceeded / Destination
/// Unreachable responses. Requires root/CAP_NET_RAW.
///
/// The short read timeout turns the blocking socket into a poll loop so a
/// bounded drain can observe its deadline.
pub fn create_icmp_recv_socket(read_timeout: Duration) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    let _ = socket.set_recv_buffer_size(1024 * 1024);
    socket.set_read_timeout(Some(read_timeout))?;
    Ok(socket)
}

/// Set TTL on a socket
pub fn set_ttl(socket: &Socket, ttl: u8) -> Result<()> {
    socket.set_ttl(ttl as u32)?;
    Ok(())
}

/// Send a UDP probe to the target
pub fn send_udp_probe(socket: &Socket, payload: &[u8], target: IpAddr, port: u16) -> Result<usize> {
    let addr = SocketAddr::new(target, port);
    let sent = socket.send_to(payload, &SockAddr::from(addr))?;
    Ok(sent)
}
