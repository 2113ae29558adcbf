//! 인프로세스 루프백 채널
//!
//! 같은 프로세스의 송신/수신 엔진을 tokio mpsc로 직결한다.
//! 손실, 중복 같은 전송 시나리오를 주입할 수 있어 엔진 검증과
//! 데모에 쓰인다.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::{ChannelEvent, ControlChannel, DataChannel, EventSender};
use crate::chunk::{ChannelId, Chunk, ChunkId};
use crate::message::ControlMessage;
use crate::{Error, Result};

/// 와이어 큐 깊이
const WIRE_DEPTH: usize = 1024;

/// 메모리 데이터 채널 (쌍의 한쪽 끝)
///
/// `data_pair`가 만든 송신 끝은 청크를 내보내고 ACK를 받으며,
/// 수신 끝은 그 반대다. 반대 방향 핸들은 비어 있다.
pub struct MemoryDataChannel {
    id: ChannelId,

    /// 청크 방향 송신 핸들 (송신 끝)
    chunk_tx: Option<mpsc::Sender<Chunk>>,

    /// 청크 방향 수신 핸들 (수신 끝, open 시 소비)
    chunk_rx: Mutex<Option<mpsc::Receiver<Chunk>>>,

    /// ACK 방향 송신 핸들 (수신 끝)
    ack_tx: Option<mpsc::Sender<ChunkId>>,

    /// ACK 방향 수신 핸들 (송신 끝, open 시 소비)
    ack_rx: Mutex<Option<mpsc::Receiver<ChunkId>>>,

    /// 첫 전송을 버릴 청크 ID (손실 시뮬레이션)
    drop_once: Mutex<HashSet<ChunkId>>,

    /// 한 번 두 벌로 배달할 청크 ID (중복 시뮬레이션)
    duplicate_once: Mutex<HashSet<ChunkId>>,
}

/// 메모리 데이터 채널 쌍 생성: (송신 끝, 수신 끝)
pub fn data_pair(id: &str) -> (Arc<MemoryDataChannel>, Arc<MemoryDataChannel>) {
    let (chunk_tx, chunk_rx) = mpsc::channel(WIRE_DEPTH);
    let (ack_tx, ack_rx) = mpsc::channel(WIRE_DEPTH);

    let sender_end = Arc::new(MemoryDataChannel {
        id: id.to_string(),
        chunk_tx: Some(chunk_tx),
        chunk_rx: Mutex::new(None),
        ack_tx: None,
        ack_rx: Mutex::new(Some(ack_rx)),
        drop_once: Mutex::new(HashSet::new()),
        duplicate_once: Mutex::new(HashSet::new()),
    });

    let receiver_end = Arc::new(MemoryDataChannel {
        id: id.to_string(),
        chunk_tx: None,
        chunk_rx: Mutex::new(Some(chunk_rx)),
        ack_tx: Some(ack_tx),
        ack_rx: Mutex::new(None),
        drop_once: Mutex::new(HashSet::new()),
        duplicate_once: Mutex::new(HashSet::new()),
    });

    (sender_end, receiver_end)
}

impl MemoryDataChannel {
    /// 해당 청크의 첫 전송을 버린다 (재전송은 통과)
    pub fn drop_chunk_once(&self, chunk_id: ChunkId) {
        self.drop_once.lock().insert(chunk_id);
    }

    /// 해당 청크를 한 번 두 벌로 배달한다
    pub fn duplicate_chunk_once(&self, chunk_id: ChunkId) {
        self.duplicate_once.lock().insert(chunk_id);
    }
}

#[async_trait]
impl DataChannel for MemoryDataChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn open_sender(&self, events: EventSender) -> Result<Vec<u8>> {
        let mut ack_rx = self
            .ack_rx
            .lock()
            .take()
            .ok_or(Error::ChannelClosed)?;

        let id = self.id.clone();
        tokio::spawn(async move {
            while let Some(chunk_id) = ack_rx.recv().await {
                if events.send((id.clone(), ChannelEvent::Ack(chunk_id))).await.is_err() {
                    break;
                }
            }
        });

        // 수신 끝에 전달할 설정이 따로 없다
        Ok(Vec::new())
    }

    async fn open_receiver(&self, _config: &[u8], events: EventSender) -> Result<()> {
        let mut chunk_rx = self
            .chunk_rx
            .lock()
            .take()
            .ok_or(Error::ChannelClosed)?;

        let id = self.id.clone();
        tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if events.send((id.clone(), ChannelEvent::Chunk(chunk))).await.is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    async fn send_chunk(&self, chunk: &Chunk) -> Result<()> {
        if self.drop_once.lock().remove(&chunk.id) {
            debug!("채널 {}: 청크 {} 손실 시뮬레이션", self.id, chunk.id);
            return Ok(());
        }

        let tx = self.chunk_tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(chunk.clone())
            .await
            .map_err(|_| Error::ChannelClosed)?;

        if self.duplicate_once.lock().remove(&chunk.id) {
            debug!("채널 {}: 청크 {} 중복 시뮬레이션", self.id, chunk.id);
            tx.send(chunk.clone())
                .await
                .map_err(|_| Error::ChannelClosed)?;
        }

        Ok(())
    }

    async fn send_ack(&self, chunk_id: ChunkId) -> Result<()> {
        let tx = self.ack_tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(chunk_id).await.map_err(|_| Error::ChannelClosed)
    }
}

/// 메모리 컨트롤 채널 (쌍의 한쪽 끝)
pub struct MemoryControlChannel {
    /// 송신 핸들 (송신 끝)
    tx: Option<mpsc::Sender<ControlMessage>>,

    /// 수신 핸들 (수신 끝, open 시 소비)
    rx: Mutex<Option<mpsc::Receiver<ControlMessage>>>,

    /// 보낸 메시지 수
    sent: AtomicU64,
}

/// 메모리 컨트롤 채널 쌍 생성: (송신 끝, 수신 끝)
pub fn control_pair() -> (Arc<MemoryControlChannel>, Arc<MemoryControlChannel>) {
    let (tx, rx) = mpsc::channel(WIRE_DEPTH);

    let sender_end = Arc::new(MemoryControlChannel {
        tx: Some(tx),
        rx: Mutex::new(None),
        sent: AtomicU64::new(0),
    });

    let receiver_end = Arc::new(MemoryControlChannel {
        tx: None,
        rx: Mutex::new(Some(rx)),
        sent: AtomicU64::new(0),
    });

    (sender_end, receiver_end)
}

impl MemoryControlChannel {
    /// 이 끝에서 보낸 컨트롤 메시지 수
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ControlChannel for MemoryControlChannel {
    async fn open_sender(&self) -> Result<()> {
        if self.tx.is_none() {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    async fn open_receiver(&self, events: mpsc::Sender<ControlMessage>) -> Result<()> {
        let mut rx = self.rx.lock().take().ok_or(Error::ChannelClosed)?;

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if events.send(msg).await.is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    async fn send(&self, msg: &ControlMessage) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(msg.clone())
            .await
            .map_err(|_| Error::ChannelClosed)?;

        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_chunk_and_ack_forwarding() {
        let (sender_end, receiver_end) = data_pair("mem");

        let (sender_events_tx, mut sender_events) = mpsc::channel(16);
        let (receiver_events_tx, mut receiver_events) = mpsc::channel(16);

        sender_end.open_sender(sender_events_tx).await.unwrap();
        receiver_end
            .open_receiver(&[], receiver_events_tx)
            .await
            .unwrap();

        sender_end
            .send_chunk(&Chunk::new(3, Bytes::from_static(b"data")))
            .await
            .unwrap();

        let (id, event) = receiver_events.recv().await.unwrap();
        assert_eq!(id, "mem");
        match event {
            ChannelEvent::Chunk(chunk) => assert_eq!(chunk.id, 3),
            ChannelEvent::Ack(_) => panic!("expected chunk"),
        }

        receiver_end.send_ack(3).await.unwrap();

        let (_, event) = sender_events.recv().await.unwrap();
        assert!(matches!(event, ChannelEvent::Ack(3)));
    }

    #[tokio::test]
    async fn test_drop_once_loses_only_first_send() {
        let (sender_end, receiver_end) = data_pair("mem");
        sender_end.drop_chunk_once(1);

        let (receiver_events_tx, mut receiver_events) = mpsc::channel(16);
        receiver_end
            .open_receiver(&[], receiver_events_tx)
            .await
            .unwrap();

        let chunk = Chunk::new(1, Bytes::from_static(b"x"));
        sender_end.send_chunk(&chunk).await.unwrap(); // 버려진다
        sender_end.send_chunk(&chunk).await.unwrap(); // 통과한다

        let (_, event) = receiver_events.recv().await.unwrap();
        assert!(matches!(event, ChannelEvent::Chunk(c) if c.id == 1));
        assert!(receiver_events.try_recv().is_err());
    }
}
