//! 수신 엔진
//!
//! - 컨트롤 핸드쉐이크와 전 채널 준비 배리어
//! - 채널 무관 청크 수집 (ID 기준 write-once 중복 제거)
//! - ID 오름차순 재조립 후 파일 기록

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelSet, ControlChannel, DataChannel};
use crate::chunk::{ChannelId, Chunk, ChunkId};
use crate::message::{ControlMessage, TransferMetadata};
use crate::stats::{TransferPhase, TransferStats};
use crate::{Config, Error, Result};

/// 수신 엔진
pub struct Receiver {
    config: Config,

    /// 컨트롤 채널
    control: Arc<dyn ControlChannel>,

    /// 등록된 데이터 채널
    channels: ChannelSet,

    /// 전송 통계
    stats: RwLock<TransferStats>,

    /// 전송 단계
    phase: RwLock<TransferPhase>,
}

impl Receiver {
    /// 새 수신 엔진 생성
    pub fn new(control: Arc<dyn ControlChannel>, config: Config) -> Self {
        let stats = RwLock::new(TransferStats::new(config.stats_window_size));

        Self {
            config,
            control,
            channels: ChannelSet::new(),
            stats,
            phase: RwLock::new(TransferPhase::Idle),
        }
    }

    /// 데이터 채널 등록
    pub fn register_channel(&self, channel: Arc<dyn DataChannel>) -> Result<()> {
        self.channels.register(channel)
    }

    /// 현재 전송 단계
    pub fn phase(&self) -> TransferPhase {
        *self.phase.read()
    }

    /// 통계 반환
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    fn set_phase(&self, phase: TransferPhase) {
        *self.phase.write() = phase;
    }

    /// 전송 수신. 모든 청크가 도착하면 재조립해 기록한 파일 경로를 반환한다.
    ///
    /// `dest_dir`는 존재하는 디렉터리여야 한다. 같은 이름의 파일이
    /// 이미 있으면 덮어쓴다.
    pub async fn receive(&self, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dest_dir = dest_dir.as_ref();

        if self.channels.is_empty() {
            return Err(Error::NoChannelsRegistered);
        }
        if !dest_dir.is_dir() {
            return Err(Error::InvalidDestination {
                path: dest_dir.to_path_buf(),
            });
        }

        self.set_phase(TransferPhase::HandshakePending);

        let (ctrl_tx, mut ctrl_rx) = mpsc::channel(self.config.control_queue_depth);
        self.control.open_receiver(ctrl_tx).await?;

        let (event_tx, mut event_rx) = mpsc::channel(self.config.event_queue_depth);

        // 핸드쉐이크 배리어: 메타데이터 도착 + 모든 채널 초기화까지 대기.
        // 이벤트 큐를 기다리는 구조라 바쁜 대기가 없다.
        let mut metadata: Option<TransferMetadata> = None;
        let mut initialized: HashSet<ChannelId> = HashSet::new();
        let total = self.channels.len();

        while metadata.is_none() || initialized.len() < total {
            let msg = ctrl_rx.recv().await.ok_or(Error::ChannelClosed)?;

            match msg {
                ControlMessage::Metadata(meta) => {
                    info!(
                        "메타데이터 수신: {} ({} chunks, 청크 {} bytes)",
                        meta.name, meta.chunk_count, meta.chunk_size
                    );
                    metadata = Some(meta);
                }
                ControlMessage::ChannelConfig(cfg) => {
                    // 등록되지 않은 채널을 가리키는 설정은 복구 불가능하다.
                    // 배리어가 영원히 안 풀리므로 조용히 멈추는 대신 바로 실패시킨다.
                    let channel =
                        self.channels
                            .get(&cfg.channel_id)
                            .ok_or_else(|| Error::UnknownChannelId {
                                channel_id: cfg.channel_id.clone(),
                            })?;

                    if initialized.contains(&cfg.channel_id) {
                        debug!("채널 {} 중복 설정 무시", cfg.channel_id);
                        continue;
                    }

                    channel.open_receiver(&cfg.config, event_tx.clone()).await?;
                    initialized.insert(cfg.channel_id.clone());
                    debug!(
                        "채널 {} 초기화 ({}/{})",
                        cfg.channel_id,
                        initialized.len(),
                        total
                    );
                }
            }
        }
        drop(event_tx);

        let Some(metadata) = metadata else {
            return Err(Error::ChannelClosed);
        };

        self.set_phase(TransferPhase::ChannelsReady);

        let expected = metadata.chunk_count as usize;
        info!("수신 시작: {} ({} chunks)", metadata.name, expected);

        self.set_phase(TransferPhase::Transferring);

        // 청크 수집: ID 기준 write-once, 도착 순서와 채널은 무관
        let mut received: HashMap<ChunkId, Chunk> = HashMap::with_capacity(expected);

        while received.len() < expected {
            let (channel_id, event) = event_rx.recv().await.ok_or(Error::ChannelClosed)?;

            let chunk = match event {
                ChannelEvent::Chunk(chunk) => chunk,
                ChannelEvent::Ack(chunk_id) => {
                    warn!("수신측에 도착한 ACK 무시: 채널 {}, 청크 {}", channel_id, chunk_id);
                    continue;
                }
            };

            // 중복 도착에도 ACK를 다시 보낸다.
            // ACK가 유실되면 송신측이 같은 청크를 계속 재전송하게 된다.
            if let Some(channel) = self.channels.get(&channel_id) {
                if let Err(e) = channel.send_ack(chunk.id).await {
                    warn!("ACK 전송 실패: 채널 {}, 청크 {}: {}", channel_id, chunk.id, e);
                }
            }

            let size = chunk.data.len();
            let inserted = insert_chunk(&mut received, chunk, expected);

            let mut stats = self.stats.write();
            if inserted {
                stats.total_chunks += 1;
                stats.total_bytes += size as u64;
                stats.record_channel_chunk(&channel_id, size);
            } else {
                stats.duplicate_chunks += 1;
            }
        }

        // 재조립: 도착 순서가 아니라 항상 ID 오름차순.
        // 여러 채널의 지연 차이로 순서가 섞여 도착하기 때문이다.
        let total_len: usize = received.values().map(|c| c.data.len()).sum();
        let mut output = Vec::with_capacity(total_len);
        for id in 0..metadata.chunk_count {
            if let Some(chunk) = received.remove(&id) {
                output.extend_from_slice(&chunk.data);
            }
        }

        let dest_path = dest_dir.join(&metadata.name);
        std::fs::write(&dest_path, &output)?;

        self.set_phase(TransferPhase::Complete);
        info!("수신 완료: {} ({} bytes)", dest_path.display(), output.len());

        Ok(dest_path)
    }
}

/// 청크 삽입. 이미 있는 ID나 기대 범위 밖 ID는 무시한다.
fn insert_chunk(received: &mut HashMap<ChunkId, Chunk>, chunk: Chunk, expected: usize) -> bool {
    if (chunk.id as usize) >= expected || received.contains_key(&chunk.id) {
        return false;
    }

    received.insert(chunk.id, chunk);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;
    use crate::sender::Sender;
    use bytes::Bytes;

    fn fast_config() -> Config {
        Config {
            retry_timeout_ms: 150,
            ..Config::default()
        }
    }

    #[test]
    fn test_insert_chunk_write_once() {
        let mut received = HashMap::new();

        assert!(insert_chunk(&mut received, Chunk::new(1, Bytes::from_static(b"aa")), 4));
        assert!(!insert_chunk(&mut received, Chunk::new(1, Bytes::from_static(b"bb")), 4));

        assert_eq!(received.len(), 1);
        assert_eq!(received[&1].data.as_ref(), b"aa");
    }

    #[test]
    fn test_insert_chunk_ignores_out_of_range() {
        let mut received = HashMap::new();

        assert!(!insert_chunk(&mut received, Chunk::new(9, Bytes::from_static(b"xx")), 4));
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_receive_without_channels_fails() {
        let (_ctrl_sender, ctrl_receiver) = memory::control_pair();
        let receiver = Receiver::new(ctrl_receiver, Config::default());

        let dir = tempfile::tempdir().unwrap();
        let err = receiver.receive(dir.path()).await.unwrap_err();

        assert!(matches!(err, Error::NoChannelsRegistered));
    }

    #[tokio::test]
    async fn test_receive_invalid_destination() {
        let (_ctrl_sender, ctrl_receiver) = memory::control_pair();
        let (_data_sender, data_receiver) = memory::data_pair("ch0");

        let receiver = Receiver::new(ctrl_receiver, Config::default());
        receiver.register_channel(data_receiver).unwrap();

        let err = receiver
            .receive("/nonexistent/mft-output")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidDestination { .. }));
    }

    #[tokio::test]
    async fn test_single_channel_transfer() {
        let (ctrl_sender, ctrl_receiver) = memory::control_pair();
        let (data_sender, data_receiver) = memory::data_pair("ch0");

        let sender = Sender::new(ctrl_sender, fast_config());
        sender.register_channel(data_sender).unwrap();

        let receiver = Arc::new(Receiver::new(ctrl_receiver, fast_config()));
        receiver.register_channel(data_receiver).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();

        let recv_task = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.receive(dest).await }
        });

        sender.send("hello.txt", b"Hello, world!", 4).await.unwrap();

        let path = recv_task.await.unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "hello.txt");
        assert_eq!(std::fs::read(&path).unwrap(), b"Hello, world!");

        assert_eq!(sender.phase(), TransferPhase::Complete);
        assert_eq!(receiver.phase(), TransferPhase::Complete);
        assert_eq!(receiver.stats().total_chunks, 4);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_delivery_is_idempotent() {
        let (ctrl_sender, ctrl_receiver) = memory::control_pair();
        let (data_sender, data_receiver) = memory::data_pair("ch0");

        // 2번 청크가 두 번 배달된다
        data_sender.duplicate_chunk_once(2);

        // 긴 타임아웃: 손실이 없으니 재전송이 일어나면 안 된다
        let slow_retry = Config {
            retry_timeout_ms: 5000,
            ..Config::default()
        };

        let sender = Sender::new(ctrl_sender, slow_retry.clone());
        sender.register_channel(data_sender).unwrap();

        let receiver = Arc::new(Receiver::new(ctrl_receiver, slow_retry));
        receiver.register_channel(data_receiver).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();

        let recv_task = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.receive(dest).await }
        });

        let payload: Vec<u8> = (0u8..32).collect();
        sender.send("dup.bin", &payload, 8).await.unwrap();

        let path = recv_task.await.unwrap().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), payload);

        // 중복은 수신 수를 바꾸지 않고 재조립도 깨지 않는다
        let stats = receiver.stats();
        assert_eq!(stats.total_chunks, 4);
        assert_eq!(stats.duplicate_chunks, 1);

        // 중복 도착에 대한 재ACK는 송신측에서 no-op
        assert_eq!(sender.stats().retransmitted_chunks, 0);
        assert_eq!(sender.stats().duplicate_acks, 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_id_fails_fast() {
        let (ctrl_sender, ctrl_receiver) = memory::control_pair();
        let (data_sender_b, _data_receiver_b) = memory::data_pair("B");
        let (_data_sender_a, data_receiver_a) = memory::data_pair("A");

        let sender = Arc::new(Sender::new(ctrl_sender, fast_config()));
        sender.register_channel(data_sender_b).unwrap();

        // 수신측은 "A"만 등록했는데 핸드쉐이크는 "B"를 가리킨다
        let receiver = Receiver::new(ctrl_receiver, fast_config());
        receiver.register_channel(data_receiver_a).unwrap();

        let send_task = tokio::spawn({
            let sender = sender.clone();
            async move {
                let _ = sender.send("x.bin", &[7u8; 64], 16).await;
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let err = receiver.receive(dir.path()).await.unwrap_err();

        assert!(matches!(err, Error::UnknownChannelId { channel_id } if channel_id == "B"));

        send_task.abort();
    }
}
