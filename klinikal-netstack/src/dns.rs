//! Host lookup over the tunnel.
//!
//! Queries go straight to the configured DNS servers through the stack's own
//! UDP path, so they ride the tunnel like any other datagram and never touch
//! the host resolver.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use tracing::debug;

use crate::error::{NetError, Result};
use crate::stack::Stack;

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_RESPONSE: usize = 4096;

/// Resolve `name` via the tunnel DNS servers. Servers are tried in order;
/// the first one that produces any address wins.
pub(crate) fn lookup_host(stack: &Stack, name: &str) -> Result<Vec<IpAddr>> {
    let servers = stack.dns_servers();
    if servers.is_empty() {
        return Err(NetError::LookupFailed("no DNS servers configured".into()));
    }
    let fqdn = if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    };
    let qname = Name::from_utf8(&fqdn)
        .map_err(|e| NetError::LookupFailed(format!("bad name {name}: {e}")))?;

    for server in servers {
        let mut found = Vec::new();
        for rtype in [RecordType::A, RecordType::AAAA] {
            match query_server(stack, server, &qname, rtype) {
                Ok(ips) => found.extend(ips),
                Err(err) => debug!(%server, ?rtype, %err, "dns query failed"),
            }
        }
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Err(NetError::LookupFailed(name.to_string()))
}

fn query_server(
    stack: &Stack,
    server: IpAddr,
    qname: &Name,
    rtype: RecordType,
) -> Result<Vec<IpAddr>> {
    let wire = build_query(qname, rtype)?;
    let sock = stack.dial_udp(None, &SocketAddr::new(server, 53).to_string())?;
    sock.send(&wire)?;

    let deadline = Some(Instant::now() + QUERY_TIMEOUT);
    let mut buf = vec![0u8; MAX_RESPONSE];
    let n = sock.recv_deadline(&mut buf, deadline)?;
    sock.close();

    let resp = Message::from_vec(&buf[..n])
        .map_err(|e| NetError::LookupFailed(format!("bad response: {e}")))?;
    if resp.response_code() != ResponseCode::NoError {
        return Err(NetError::LookupFailed(format!(
            "server {server} answered {}",
            resp.response_code()
        )));
    }
    let mut ips = Vec::new();
    for record in resp.answers() {
        match record.data() {
            Some(RData::A(a)) => ips.push(IpAddr::V4(a.0)),
            Some(RData::AAAA(aaaa)) => ips.push(IpAddr::V6(aaaa.0)),
            _ => {}
        }
    }
    Ok(ips)
}

fn build_query(qname: &Name, rtype: RecordType) -> Result<Vec<u8>> {
    let mut msg = Message::new();
    msg.set_id(rand::random::<u16>())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(qname.clone(), rtype));
    msg.to_vec()
        .map_err(|e| NetError::LookupFailed(format!("encode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{self, Ingress};
    use crate::stack::Link;
    use hickory_proto::rr::rdata;
    use hickory_proto::rr::Record;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    /// A link that answers every A query with a fixed address.
    struct FakeDnsLink {
        stack: Mutex<Option<Stack>>,
        answer: Ipv4Addr,
    }

    impl Link for FakeDnsLink {
        fn transmit(&self, frame: &[u8]) {
            let Ok(Ingress::Udp { src, dst, payload }) = packet::parse_frame(frame) else {
                return;
            };
            if dst.port() != 53 {
                return;
            }
            let Ok(query) = Message::from_vec(&payload) else {
                return;
            };
            let Some(q) = query.queries().first().cloned() else {
                return;
            };
            let mut resp = Message::new();
            resp.set_id(query.id())
                .set_message_type(MessageType::Response)
                .set_op_code(OpCode::Query)
                .set_response_code(ResponseCode::NoError)
                .add_query(q.clone());
            if q.query_type() == RecordType::A {
                resp.add_answer(Record::from_rdata(
                    q.name().clone(),
                    60,
                    RData::A(rdata::A(self.answer)),
                ));
            }
            let wire = resp.to_vec().unwrap();
            let reply = packet::build_ipv4_udp(dst, src, &wire);
            if let Some(stack) = self.stack.lock().clone() {
                stack.inject(&reply);
            }
        }
    }

    #[test]
    fn lookup_host_uses_tunnel_dns() {
        let stack = Stack::builder()
            .address("10.7.0.2".parse().unwrap())
            .dns_server("10.7.0.1".parse().unwrap())
            .build();
        let link = Arc::new(FakeDnsLink {
            stack: Mutex::new(None),
            answer: Ipv4Addr::new(93, 184, 216, 34),
        });
        *link.stack.lock() = Some(stack.clone());
        stack.attach_link(link);

        let ips = stack.lookup_host("example.com").unwrap();
        assert!(ips.contains(&IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
    }

    #[test]
    fn lookup_without_servers_fails() {
        let stack = Stack::builder().build();
        assert!(stack.lookup_host("example.com").is_err());
    }
}
