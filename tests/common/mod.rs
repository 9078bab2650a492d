//! Shared helpers for integration tests

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use limbo_gate::config::ListenerConfig;
use limbo_gate::connection::ConnectionServices;
use limbo_gate::events::Events;
use limbo_gate::protocol::codec::{read_varint, write_varint};
use limbo_gate::protocol::SUPPORTED_PROTOCOL;
use limbo_gate::TrafficRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

pub fn services() -> ConnectionServices {
    ConnectionServices::new(Arc::new(TrafficRegistry::new()), Arc::new(Events::new()))
}

/// Listener on 127.0.0.1 with an OS-assigned port
pub fn local_listener(name: &str) -> ListenerConfig {
    ListenerConfig {
        name: name.to_string(),
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        ..ListenerConfig::default()
    }
}

pub async fn wait_for(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Minimal protocol 47 client
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self { stream }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.stream.local_addr().unwrap()
    }

    async fn send(&mut self, body: impl FnOnce(&mut BytesMut)) {
        let mut payload = BytesMut::new();
        body(&mut payload);
        let mut frame = BytesMut::new();
        write_varint(&mut frame, payload.len() as i32);
        frame.extend_from_slice(&payload);
        self.stream.write_all(&frame).await.expect("write frame");
    }

    pub async fn handshake(&mut self, host: &str, next_state: i32) {
        self.send(|b| {
            write_varint(b, 0x00);
            write_varint(b, SUPPORTED_PROTOCOL);
            write_varint(b, host.len() as i32);
            b.put_slice(host.as_bytes());
            b.put_u16(25565);
            write_varint(b, next_state);
        })
        .await;
    }

    pub async fn login_start(&mut self, name: &str) {
        self.send(|b| {
            write_varint(b, 0x00);
            write_varint(b, name.len() as i32);
            b.put_slice(name.as_bytes());
        })
        .await;
    }

    pub async fn status_request(&mut self) {
        self.send(|b| write_varint(b, 0x00)).await;
    }

    pub async fn login(&mut self, host: &str, name: &str) {
        self.handshake(host, 2).await;
        self.login_start(name).await;
    }

    /// Next frame as `(id, payload)`; `None` once the server closed
    pub async fn read_frame(&mut self) -> Option<(i32, Bytes)> {
        timeout(Duration::from_secs(5), async {
            let mut header = Vec::new();
            loop {
                let byte = self.stream.read_u8().await.ok()?;
                header.push(byte);
                if byte & 0x80 == 0 {
                    break;
                }
            }
            let len = read_varint(&mut &header[..]).ok()? as usize;
            let mut body = vec![0u8; len];
            self.stream.read_exact(&mut body).await.ok()?;
            let mut body = Bytes::from(body);
            let id = read_varint(&mut body).ok()?;
            Some((id, body))
        })
        .await
        .expect("no frame or close in time")
    }

    /// Text of a disconnect frame, which must be the next frame
    pub async fn read_disconnect(&mut self) -> String {
        let (id, payload) = self.read_frame().await.expect("disconnect frame");
        assert_eq!(id, 0x00, "expected a login disconnect");
        String::from_utf8_lossy(&payload).into_owned()
    }

    /// Read frames until one with `id` shows up
    pub async fn read_until(&mut self, id: i32) -> Bytes {
        loop {
            let (frame_id, payload) = self.read_frame().await.expect("frame");
            if frame_id == id {
                return payload;
            }
        }
    }

    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 256];
        loop {
            match timeout(Duration::from_secs(5), self.stream.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}

/// Wait until `count` open connections have had their handshake processed
pub async fn wait_for_handshakes(registry: &TrafficRegistry, count: usize) {
    wait_for(|| {
        registry
            .snapshot()
            .iter()
            .filter(|connection| connection.protocol_version() == SUPPORTED_PROTOCOL)
            .count()
            >= count
    })
    .await;
}
