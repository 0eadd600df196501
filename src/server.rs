//! UDP server that answers DNS queries through a pluggable resolver
//!
//! The server listens on a unicast socket and, optionally, on the mDNS
//! multicast group. Each datagram is parsed, handed to the resolver, and the
//! response is sent back unicast to the sender. Malformed datagrams are
//! dropped without a reply.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use derive_more::{Display, Error, From};
use log::{debug, error, info};
use serde_derive::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::buffer::{BufferError, BytePacketBuffer, PacketBuffer, VectorPacketBuffer};
use crate::protocol::{DnsPacket, DnsQuestion, DnsRecord, ProtocolError, ResultCode};

/// The well known mDNS IPv4 group.
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
    Protocol(ProtocolError),
}

impl From<BufferError> for ServerError {
    fn from(err: BufferError) -> ServerError {
        ServerError::Protocol(ProtocolError::Buffer(err))
    }
}

type Result<T> = std::result::Result<T, ServerError>;

/// Supplies the records for a question. Implemented for plain closures, so an
/// embedding application can pass `|q| lookup(q)` without ceremony.
pub trait QueryResolver: Send + Sync {
    fn resolve(&self, question: &DnsQuestion) -> Vec<DnsRecord>;
}

impl<F> QueryResolver for F
where
    F: Fn(&DnsQuestion) -> Vec<DnsRecord> + Send + Sync,
{
    fn resolve(&self, question: &DnsQuestion) -> Vec<DnsRecord> {
        (self)(question)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: Ipv4Addr,
    pub port: u16,
    /// When set, additionally join the mDNS group on this port.
    pub multicast_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind_address: Ipv4Addr::UNSPECIFIED,
            port: 5353,
            multicast_port: None,
        }
    }
}

/// Build the response for a single request.
///
/// A request without questions is answered with `FORMERR`, a question the
/// resolver has no records for with `NXDOMAIN`. Answers are always marked
/// authoritative, as the resolver is the source of truth for its names.
pub fn execute_query(resolver: &dyn QueryResolver, request: &DnsPacket) -> DnsPacket {
    if request.questions.is_empty() {
        return request.create_response(
            false,
            false,
            ResultCode::FORMERR,
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
    }

    // Only the first question is resolved, per the usual single-question
    // convention; any extra questions are still echoed in the response.
    let answers = resolver.resolve(&request.questions[0]);

    let rescode = if answers.is_empty() {
        ResultCode::NXDOMAIN
    } else {
        ResultCode::NOERROR
    };

    request.create_response(true, false, rescode, answers, Vec::new(), Vec::new())
}

/// Handle to a running server. Dropping it does not stop the listen tasks;
/// call [`DnsUdpServer::stop`] for an orderly shutdown.
pub struct DnsUdpServer {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    unicast_addr: SocketAddr,
}

impl DnsUdpServer {
    /// Bind the sockets and spawn the receive loops.
    pub async fn start(config: ServerConfig, resolver: Arc<dyn QueryResolver>) -> Result<DnsUdpServer> {
        let socket = UdpSocket::bind((config.bind_address, config.port)).await?;
        let unicast_addr = socket.local_addr()?;
        info!("listening on {}", unicast_addr);

        let (shutdown, _) = broadcast::channel(1);
        let mut handles = Vec::new();

        handles.push(tokio::spawn(receive_loop(
            socket,
            resolver.clone(),
            shutdown.subscribe(),
            None,
        )));

        if let Some(mcast_port) = config.multicast_port {
            let mcast_socket = bind_multicast(config.bind_address, mcast_port)?;
            info!("joined {} on port {}", MDNS_GROUP, mcast_port);

            handles.push(tokio::spawn(receive_loop(
                mcast_socket,
                resolver,
                shutdown.subscribe(),
                Some(config.bind_address),
            )));
        }

        Ok(DnsUdpServer {
            shutdown,
            handles,
            unicast_addr,
        })
    }

    /// Address of the unicast socket. Useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.unicast_addr
    }

    /// Signal all receive loops to exit and wait for them to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(());
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("server stopped");
    }
}

/// Multicast membership requires options a plain tokio bind cannot set, so
/// the socket is built through socket2 and converted afterwards.
fn bind_multicast(interface: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&MDNS_GROUP, &interface)?;

    let socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(socket)?)
}

async fn receive_loop(
    socket: UdpSocket,
    resolver: Arc<dyn QueryResolver>,
    mut shutdown: broadcast::Receiver<()>,
    multicast_interface: Option<Ipv4Addr>,
) {
    loop {
        let mut req_buffer = BytePacketBuffer::new();

        let (len, src) = tokio::select! {
            _ = shutdown.recv() => break,
            res = socket.recv_from(&mut req_buffer.buf) => match res {
                Ok(x) => x,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::Interrupted | ErrorKind::WouldBlock
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("failed to receive datagram: {:?}", e);
                    break;
                }
            },
        };

        req_buffer.len = len;

        let request = match DnsPacket::from_buffer(&mut req_buffer) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping undecodable datagram from {}: {:?}", src, e);
                continue;
            }
        };

        // On the multicast group our own answers come back to us; never
        // answer a message with QR set.
        if request.header.response {
            continue;
        }

        let mut response = execute_query(resolver.as_ref(), &request);
        if let Err(e) = send_response(&socket, &mut response, src).await {
            debug!("failed to respond to {}: {:?}", src, e);
        }
    }

    if let Some(interface) = multicast_interface {
        if let Err(e) = socket.leave_multicast_v4(MDNS_GROUP, interface) {
            debug!("failed to leave multicast group: {:?}", e);
        }
    }
}

async fn send_response(
    socket: &UdpSocket,
    response: &mut DnsPacket,
    dest: SocketAddr,
) -> Result<()> {
    let mut res_buffer = VectorPacketBuffer::new();
    response.write(&mut res_buffer, 512)?;

    let len = res_buffer.pos();
    let data = res_buffer.get_range(0, len)?;

    // Responses go unicast to the sender, also for queries that arrived via
    // the multicast group.
    socket.send_to(data, dest).await?;

    Ok(())
}
