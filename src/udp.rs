//! UDP 전송 구현
//!
//! - 컨트롤 채널: 수신측이 알려진 주소에 바인드, 송신측이 그 주소로 전송
//! - 데이터 채널: 송신측 주소를 설정 블롭으로 내보내고, 수신측이
//!   Hello를 보내 청크/ACK 경로를 연결한다 (상대 주소 학습)

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ControlChannel, DataChannel, EventSender};
use crate::chunk::{ChannelId, Chunk, ChunkId};
use crate::message::{AckMessage, ControlMessage, HelloMessage};
use crate::{Error, Result};

/// 수신 버퍼 크기
const RECV_BUF_SIZE: usize = 65535;

/// UDP 데이터 채널 설정 블롭 (송신측 → 수신측)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UdpChannelConfig {
    /// 송신측 데이터 소켓 주소
    sender_addr: String,
}

/// UDP 데이터 채널
pub struct UdpDataChannel {
    id: ChannelId,

    /// 로컬 바인드 주소
    bind_addr: SocketAddr,

    /// 소켓 (open 시 바인드)
    socket: Mutex<Option<Arc<UdpSocket>>>,

    /// 상대 주소 (송신측은 Hello/ACK로 학습, 수신측은 블롭에서)
    peer: Arc<RwLock<Option<SocketAddr>>>,

    /// 상대 주소 확정 신호
    peer_ready: Arc<Notify>,
}

impl UdpDataChannel {
    /// 새 UDP 데이터 채널 생성
    pub fn new(id: impl Into<ChannelId>, bind_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            bind_addr,
            socket: Mutex::new(None),
            peer: Arc::new(RwLock::new(None)),
            peer_ready: Arc::new(Notify::new()),
        })
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.socket.lock().clone().ok_or(Error::ChannelClosed)
    }

    /// 상대 주소가 확정될 때까지 대기
    async fn wait_peer(&self) -> SocketAddr {
        loop {
            if let Some(addr) = *self.peer.read() {
                return addr;
            }
            self.peer_ready.notified().await;
        }
    }
}

#[async_trait]
impl DataChannel for UdpDataChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn open_sender(&self, events: EventSender) -> Result<Vec<u8>> {
        let socket = Arc::new(UdpSocket::bind(self.bind_addr).await?);
        let local_addr = socket.local_addr()?;
        *self.socket.lock() = Some(socket.clone());

        // ACK/Hello 수신 루프. 첫 패킷의 출발지를 상대 주소로 기억한다.
        let id = self.id.clone();
        let peer = self.peer.clone();
        let peer_ready = self.peer_ready.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUF_SIZE];

            loop {
                let (len, addr) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("채널 {} 수신 에러: {}", id, e);
                        continue;
                    }
                };

                if peer.read().is_none() {
                    *peer.write() = Some(addr);
                    peer_ready.notify_one();
                    info!("채널 {} 상대 주소 학습: {}", id, addr);
                }

                if let Some(ack) = AckMessage::from_bytes(&buf[..len]) {
                    if events
                        .send((id.clone(), ChannelEvent::Ack(ack.chunk_id)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                } else if let Some(hello) = HelloMessage::from_bytes(&buf[..len]) {
                    debug!("채널 {} hello 수신 (상대 채널 {})", id, hello.channel_id);
                }
            }
        });

        let config = UdpChannelConfig {
            sender_addr: local_addr.to_string(),
        };
        Ok(bincode::serialize(&config)?)
    }

    async fn open_receiver(&self, config: &[u8], events: EventSender) -> Result<()> {
        let config: UdpChannelConfig = bincode::deserialize(config)?;
        let sender_addr: SocketAddr = config
            .sender_addr
            .parse()
            .map_err(|_| Error::Unknown(format!("유효하지 않은 주소: {}", config.sender_addr)))?;

        let socket = Arc::new(UdpSocket::bind(self.bind_addr).await?);
        *self.socket.lock() = Some(socket.clone());
        *self.peer.write() = Some(sender_addr);
        self.peer_ready.notify_one();

        // 송신측이 이쪽 주소를 알 수 있게 hello를 보낸다
        let hello = HelloMessage::new(self.id.clone());
        socket.send_to(&hello.to_bytes(), sender_addr).await?;

        let id = self.id.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUF_SIZE];

            loop {
                let (len, _addr) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("채널 {} 수신 에러: {}", id, e);
                        continue;
                    }
                };

                if let Some(chunk) = Chunk::from_bytes(&buf[..len]) {
                    if events
                        .send((id.clone(), ChannelEvent::Chunk(chunk)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn send_chunk(&self, chunk: &Chunk) -> Result<()> {
        let socket = self.socket()?;
        let addr = self.wait_peer().await;

        socket.send_to(&chunk.to_bytes(), addr).await?;
        Ok(())
    }

    async fn send_ack(&self, chunk_id: ChunkId) -> Result<()> {
        let socket = self.socket()?;
        let addr = self.wait_peer().await;

        socket
            .send_to(&AckMessage::new(chunk_id).to_bytes(), addr)
            .await?;
        Ok(())
    }
}

/// UDP 컨트롤 채널
pub struct UdpControlChannel {
    /// 로컬 바인드 주소
    bind_addr: SocketAddr,

    /// 상대 주소 (송신측만, 수신측은 None)
    remote_addr: Option<SocketAddr>,

    /// 소켓 (open 시 바인드)
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpControlChannel {
    /// 송신측 컨트롤 채널 생성
    pub fn sender(bind_addr: SocketAddr, remote_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            bind_addr,
            remote_addr: Some(remote_addr),
            socket: Mutex::new(None),
        })
    }

    /// 수신측 컨트롤 채널 생성
    pub fn receiver(bind_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            bind_addr,
            remote_addr: None,
            socket: Mutex::new(None),
        })
    }

    /// 바인드된 로컬 주소 (open 이후)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .lock()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }
}

#[async_trait]
impl ControlChannel for UdpControlChannel {
    async fn open_sender(&self) -> Result<()> {
        let socket = UdpSocket::bind(self.bind_addr).await?;
        *self.socket.lock() = Some(Arc::new(socket));
        Ok(())
    }

    async fn open_receiver(&self, events: mpsc::Sender<ControlMessage>) -> Result<()> {
        let socket = Arc::new(UdpSocket::bind(self.bind_addr).await?);
        *self.socket.lock() = Some(socket.clone());

        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUF_SIZE];

            loop {
                let (len, addr) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("컨트롤 채널 수신 에러: {}", e);
                        continue;
                    }
                };

                match ControlMessage::from_bytes(&buf[..len]) {
                    Some(msg) => {
                        if events.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!("컨트롤 채널: 해석 불가 패킷 무시 ({} bytes, {})", len, addr);
                    }
                }
            }
        });

        Ok(())
    }

    async fn send(&self, msg: &ControlMessage) -> Result<()> {
        let socket = self.socket.lock().clone().ok_or(Error::ChannelClosed)?;
        let remote = self.remote_addr.ok_or(Error::ChannelClosed)?;

        socket.send_to(&msg.to_bytes(), remote).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TransferMetadata;

    #[tokio::test]
    async fn test_send_chunk_before_open_fails() {
        let channel = UdpDataChannel::new("udp0", "127.0.0.1:0".parse().unwrap());

        let err = channel
            .send_chunk(&Chunk::new(0, bytes::Bytes::from_static(b"x")))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ChannelClosed));
    }

    #[tokio::test]
    async fn test_control_send_before_open_fails() {
        let control = UdpControlChannel::sender(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        );

        let msg = ControlMessage::Metadata(TransferMetadata::new("x", 4, 1));
        let err = control.send(&msg).await.unwrap_err();

        assert!(matches!(err, Error::ChannelClosed));
    }

    #[test]
    fn test_channel_config_blob_roundtrip() {
        let config = UdpChannelConfig {
            sender_addr: "127.0.0.1:4242".to_string(),
        };

        let blob = bincode::serialize(&config).unwrap();
        let restored: UdpChannelConfig = bincode::deserialize(&blob).unwrap();

        assert_eq!(restored.sender_addr, "127.0.0.1:4242");
    }
}
