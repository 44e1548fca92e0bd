//! In-process memcached stand-in speaking the binary protocol.
//!
//! Each server keeps its own item table with CAS tokens and answers the
//! commands the client sends. Shutting a server down drops its listener and
//! every open connection, which the client sees as a dead endpoint.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use flashmc::client::MemcachedClient;
use flashmc::cluster::Endpoint;
use flashmc::protocol::{opcode, read_u32, read_u64, status, Packet, PacketParser};
use flashmc::{ClientConfig, SocketPoolConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// Mutations with this expiration never create a missing counter.
const NO_AUTO_CREATE: u32 = 0xffff_ffff;

#[derive(Debug, Clone)]
struct Item {
    flags: u32,
    data: Vec<u8>,
    cas: u64,
}

#[derive(Debug, Default)]
struct Store {
    items: HashMap<Bytes, Item>,
    last_cas: u64,
    flush_delays: Vec<u32>,
}

impl Store {
    fn next_cas(&mut self) -> u64 {
        self.last_cas += 1;
        self.last_cas
    }

    /// KEY_EXISTS when a non-zero `cas` does not match the stored item.
    fn cas_conflict(&self, key: &Bytes, cas: u64) -> bool {
        cas != 0 && self.items.get(key).is_some_and(|item| item.cas != cas)
    }
}

pub struct MockServer {
    endpoint: Endpoint,
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    store: Arc<Mutex<Store>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::bind("127.0.0.1:0".parse().unwrap()).await
    }

    /// Starts a server on an address used before, e.g. to bring a killed
    /// server back.
    pub async fn bind(addr: SocketAddr) -> Self {
        Self::bind_with_delay(addr, Duration::ZERO).await
    }

    /// Starts a server that waits `delay` before sending each batch of
    /// replies.
    pub async fn start_with_delay(delay: Duration) -> Self {
        Self::bind_with_delay("127.0.0.1:0".parse().unwrap(), delay).await
    }

    async fn bind_with_delay(addr: SocketAddr, delay: Duration) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(Mutex::new(Store::default()));

        let counter = requests.clone();
        let shared = store.clone();
        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                connections.spawn(serve(socket, shared.clone(), counter.clone(), delay));
            }
        });

        Self {
            endpoint: Endpoint::from(addr),
            addr,
            requests,
            store,
            task,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of request packets received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Delay arguments of every flush received, as sent on the wire.
    pub fn flush_delays(&self) -> Vec<u32> {
        self.store.lock().unwrap().flush_delays.clone()
    }

    /// Closes the listener and every connection.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
        // Aborted connection tasks drop their sockets on the next poll.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve(
    mut socket: TcpStream,
    store: Arc<Mutex<Store>>,
    requests: Arc<AtomicUsize>,
    delay: Duration,
) {
    let parser = PacketParser::requests();
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        match socket.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let mut out = BytesMut::new();
        loop {
            let (request, consumed) = match parser.parse(&buffer) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(_) => return,
            };
            let _ = buffer.split_to(consumed);
            requests.fetch_add(1, Ordering::SeqCst);

            let replies = {
                let mut store = store.lock().unwrap();
                respond(&mut store, request)
            };
            for reply in replies {
                reply.serialize_into(&mut out);
            }
        }

        if out.is_empty() {
            continue;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if socket.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn reply(request: &Packet, status: u16) -> Packet {
    Packet::response(request.opcode, status).with_opaque(request.opaque)
}

fn error(request: &Packet, status: u16, message: &str) -> Vec<Packet> {
    vec![reply(request, status).with_value(Bytes::copy_from_slice(message.as_bytes()))]
}

fn respond(store: &mut Store, request: Packet) -> Vec<Packet> {
    match request.opcode {
        opcode::GET | opcode::GETQ | opcode::GETK | opcode::GETKQ => {
            let quiet = matches!(request.opcode, opcode::GETQ | opcode::GETKQ);
            let with_key = matches!(request.opcode, opcode::GETK | opcode::GETKQ);
            match store.items.get(&request.key) {
                Some(item) => {
                    let mut packet = reply(&request, status::NO_ERROR)
                        .with_extras(item.flags.to_be_bytes().to_vec())
                        .with_value(item.data.clone())
                        .with_cas(item.cas);
                    if with_key {
                        packet = packet.with_key(request.key.clone());
                    }
                    vec![packet]
                }
                None if quiet => Vec::new(),
                None => error(&request, status::KEY_NOT_FOUND, "Not found"),
            }
        }

        opcode::SET | opcode::ADD | opcode::REPLACE => {
            let exists = store.items.contains_key(&request.key);
            let refused = match request.opcode {
                opcode::ADD if exists => Some(status::KEY_EXISTS),
                opcode::REPLACE if !exists => Some(status::KEY_NOT_FOUND),
                _ if request.cas != 0 && !exists => Some(status::KEY_NOT_FOUND),
                _ if store.cas_conflict(&request.key, request.cas) => Some(status::KEY_EXISTS),
                _ => None,
            };
            if let Some(code) = refused {
                return error(&request, code, "Not stored");
            }

            let cas = store.next_cas();
            store.items.insert(
                request.key.clone(),
                Item {
                    flags: read_u32(&request.extras).unwrap_or(0),
                    data: request.value.to_vec(),
                    cas,
                },
            );
            vec![reply(&request, status::NO_ERROR).with_cas(cas)]
        }

        opcode::APPEND | opcode::PREPEND => {
            if !store.items.contains_key(&request.key) {
                return error(&request, status::ITEM_NOT_STORED, "Not stored");
            }
            if store.cas_conflict(&request.key, request.cas) {
                return error(&request, status::KEY_EXISTS, "Data exists for key");
            }
            let cas = store.next_cas();
            let item = store.items.get_mut(&request.key).unwrap();
            if request.opcode == opcode::APPEND {
                item.data.extend_from_slice(&request.value);
            } else {
                let mut data = request.value.to_vec();
                data.extend_from_slice(&item.data);
                item.data = data;
            }
            item.cas = cas;
            vec![reply(&request, status::NO_ERROR).with_cas(cas)]
        }

        opcode::INCREMENT | opcode::DECREMENT => {
            let extras = &request.extras;
            let delta = read_u64(extras).unwrap_or(0);
            let initial = extras.get(8..).map(|e| read_u64(e).unwrap_or(0)).unwrap_or(0);
            let expiration = extras.get(16..).map(|e| read_u32(e).unwrap_or(0)).unwrap_or(0);

            let value = match store.items.get(&request.key) {
                None if expiration == NO_AUTO_CREATE => {
                    return error(&request, status::KEY_NOT_FOUND, "Not found")
                }
                None => initial,
                Some(_) if store.cas_conflict(&request.key, request.cas) => {
                    return error(&request, status::KEY_EXISTS, "Data exists for key")
                }
                Some(item) => {
                    let current = match std::str::from_utf8(&item.data)
                        .ok()
                        .and_then(|text| text.trim().parse::<u64>().ok())
                    {
                        Some(current) => current,
                        None => {
                            return error(&request, status::NON_NUMERIC, "Non-numeric value")
                        }
                    };
                    if request.opcode == opcode::INCREMENT {
                        current.wrapping_add(delta)
                    } else {
                        current.saturating_sub(delta)
                    }
                }
            };

            let cas = store.next_cas();
            let flags = store.items.get(&request.key).map_or(0, |item| item.flags);
            store.items.insert(
                request.key.clone(),
                Item {
                    flags,
                    data: value.to_string().into_bytes(),
                    cas,
                },
            );
            vec![reply(&request, status::NO_ERROR)
                .with_value(value.to_be_bytes().to_vec())
                .with_cas(cas)]
        }

        opcode::DELETE => {
            if !store.items.contains_key(&request.key) {
                return error(&request, status::KEY_NOT_FOUND, "Not found");
            }
            if store.cas_conflict(&request.key, request.cas) {
                return error(&request, status::KEY_EXISTS, "Data exists for key");
            }
            store.items.remove(&request.key);
            vec![reply(&request, status::NO_ERROR)]
        }

        opcode::FLUSH => {
            store.flush_delays.push(read_u32(&request.extras).unwrap_or(0));
            store.items.clear();
            vec![reply(&request, status::NO_ERROR)]
        }

        opcode::NOOP => vec![reply(&request, status::NO_ERROR)],

        opcode::VERSION => vec![reply(&request, status::NO_ERROR).with_value("1.6.0-mock")],

        opcode::STAT => {
            let stats: Vec<(String, String)> = if request.key.is_empty() {
                vec![
                    ("pid".to_string(), std::process::id().to_string()),
                    ("version".to_string(), "1.6.0-mock".to_string()),
                    ("curr_items".to_string(), store.items.len().to_string()),
                ]
            } else {
                let group = String::from_utf8_lossy(&request.key).into_owned();
                vec![(format!("{}:count", group), store.items.len().to_string())]
            };
            let mut packets: Vec<Packet> = stats
                .into_iter()
                .map(|(name, value)| {
                    reply(&request, status::NO_ERROR)
                        .with_key(name)
                        .with_value(value)
                })
                .collect();
            packets.push(reply(&request, status::NO_ERROR));
            packets
        }

        _ => error(&request, status::UNKNOWN_COMMAND, "Unknown command"),
    }
}

/// Pool settings that fail fast and keep dead nodes dead for the length of
/// a test.
pub fn test_pool_config() -> SocketPoolConfig {
    SocketPoolConfig::default()
        .with_pool_size(1, 4)
        .with_connection_timeout(Duration::from_secs(1))
        .with_receive_timeout(Duration::from_secs(1))
        .with_queue_timeout(Duration::from_secs(1))
        .with_dead_timeout(Duration::from_secs(60))
}

pub fn config_for(servers: &[&MockServer]) -> ClientConfig {
    ClientConfig::new()
        .with_servers(servers.iter().map(|server| server.endpoint()))
        .with_socket_pool(test_pool_config())
}

pub async fn client_for(servers: &[&MockServer]) -> MemcachedClient {
    MemcachedClient::connect(config_for(servers)).await.unwrap()
}

/// An address nothing listens on.
pub async fn unreachable_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Endpoint::from(addr)
}
