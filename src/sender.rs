//! 송신 엔진 (스케줄러)
//!
//! - 청크 큐를 소유하고 배분 정책에 따라 채널에 배분
//! - 청크별 재전송 타이머로 ACK 추적
//! - 타임아웃 청크는 큐 앞으로 재삽입 (head-of-line 우선)
//! - 모든 청크가 ACK되고 큐가 비면 전송 완료

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelSet, ControlChannel, DataChannel};
use crate::chunk::{split_chunks, Chunk, ChunkId};
use crate::message::{ChannelConfigMessage, ControlMessage, TransferMetadata};
use crate::stats::{TransferPhase, TransferStats};
use crate::{Config, Error, Result};

/// 전송 대기 큐 + 미확인 집합
///
/// 배분 정책과 ACK/타임아웃 콜백이 동시에 건드리므로 단일 뮤텍스
/// 아래에서만 접근한다. "ACK됨"과 "타임아웃됨"이 같은 청크를 두고
/// 경합해도 엔트리 제거는 한쪽에서만 일어난다.
struct FlightState {
    /// 전송 대기 큐 (재전송 청크는 앞에 삽입)
    pending: VecDeque<Chunk>,

    /// 전송됨-미확인 청크 → 타이머 핸들
    outstanding: HashMap<ChunkId, AbortHandle>,
}

struct LinkInner {
    state: Mutex<FlightState>,

    /// 큐 변화 신호 (대기자는 배분 정책 하나)
    notify: Notify,

    /// 배분 대상 채널 (ID 오름차순)
    channels: Vec<Arc<dyn DataChannel>>,

    /// 재전송 타임아웃
    retry_timeout: Duration,

    /// 전송 통계 (송신 엔진과 공유)
    stats: Arc<RwLock<TransferStats>>,
}

/// 배분 정책과 송신 엔진을 잇는 핸들
///
/// 정책은 next_chunk / dispatch 만으로 전송을 진행한다.
#[derive(Clone)]
pub struct DispatchLink {
    inner: Arc<LinkInner>,
}

impl DispatchLink {
    /// 배분 대상 채널 목록 (ID 오름차순)
    pub fn channels(&self) -> &[Arc<dyn DataChannel>] {
        &self.inner.channels
    }

    /// 다음 배분할 청크를 기다린다.
    ///
    /// 대기 큐와 미확인 집합이 모두 비어 전송이 끝나면 None.
    pub async fn next_chunk(&self) -> Option<Chunk> {
        loop {
            {
                let mut state = self.inner.state.lock();
                if let Some(chunk) = state.pending.pop_front() {
                    return Some(chunk);
                }
                if state.outstanding.is_empty() {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// 청크 전송 프리미티브
    ///
    /// 재전송 타이머를 미확인 집합에 먼저 등록한 뒤 전송한다.
    /// (전송 직후 도착한 ACK가 타이머 등록보다 앞서는 경합 방지)
    pub async fn dispatch(&self, chunk: Chunk, channel: &Arc<dyn DataChannel>) -> Result<()> {
        let chunk_id = chunk.id;
        let size = chunk.data.len();

        let timer = tokio::spawn({
            let link = self.clone();
            let chunk = chunk.clone();
            async move {
                tokio::time::sleep(link.inner.retry_timeout).await;
                link.on_timeout(chunk);
            }
        });

        {
            let mut state = self.inner.state.lock();
            state.outstanding.insert(chunk_id, timer.abort_handle());
        }

        {
            let mut stats = self.inner.stats.write();
            stats.total_chunks += 1;
            stats.total_bytes += size as u64;
            stats.record_channel_chunk(channel.id(), size);
        }

        if let Err(e) = channel.send_chunk(&chunk).await {
            // 전송 실패한 청크의 타이머는 살려둘 이유가 없다
            if let Some(handle) = self.inner.state.lock().outstanding.remove(&chunk_id) {
                handle.abort();
            }
            return Err(e);
        }

        Ok(())
    }

    /// ACK 처리. 살아있는 타이머가 없으면 no-op.
    pub(crate) fn on_ack(&self, chunk_id: ChunkId) {
        let removed = {
            let mut state = self.inner.state.lock();
            state.outstanding.remove(&chunk_id)
        };

        match removed {
            Some(handle) => {
                handle.abort();
                self.inner.stats.write().acked_chunks += 1;
                self.inner.notify.notify_one();
            }
            None => {
                // 이미 확인됐거나 보낸 적 없는 청크의 ACK
                self.inner.stats.write().duplicate_acks += 1;
            }
        }
    }

    /// 타임아웃 처리. 엔트리를 제거한 뒤 큐 **앞**으로 재삽입한다.
    ///
    /// 막힌 청크가 새 청크보다 먼저 재시도되도록 한다. 재시도
    /// 횟수 제한은 없다.
    pub(crate) fn on_timeout(&self, chunk: Chunk) {
        let requeued = {
            let mut state = self.inner.state.lock();
            if state.outstanding.remove(&chunk.id).is_some() {
                debug!("청크 {} 타임아웃, 재전송 큐 앞으로", chunk.id);
                state.pending.push_front(chunk);
                true
            } else {
                false
            }
        };

        if requeued {
            self.inner.stats.write().retransmitted_chunks += 1;
            self.inner.notify.notify_one();
        }
    }
}

/// 배분 정책 — 어떤 청크를 어떤 채널로 보낼지 결정한다.
///
/// 계약: 큐의 모든 청크를 dispatch로 제출하고, 대기 큐와 미확인
/// 집합이 모두 빌 때까지(next_chunk가 None) 반환하지 않는다.
/// 재전송 큐로 돌아온 청크도 일반 청크와 똑같이 배분한다.
#[async_trait]
pub trait DispatchPolicy: Send + Sync {
    async fn run(&self, link: &DispatchLink) -> Result<()>;
}

/// 라운드로빈 배분 정책
pub struct RoundRobinPolicy;

#[async_trait]
impl DispatchPolicy for RoundRobinPolicy {
    async fn run(&self, link: &DispatchLink) -> Result<()> {
        let channels = link.channels();
        let mut next = 0usize;

        while let Some(chunk) = link.next_chunk().await {
            let channel = &channels[next % channels.len()];
            debug!("청크 {} → 채널 {}", chunk.id, channel.id());
            link.dispatch(chunk, channel).await?;
            next += 1;
        }

        Ok(())
    }
}

/// 송신 엔진
pub struct Sender {
    config: Config,

    /// 컨트롤 채널
    control: Arc<dyn ControlChannel>,

    /// 등록된 데이터 채널
    channels: ChannelSet,

    /// 배분 정책
    policy: Box<dyn DispatchPolicy>,

    /// 전송 통계
    stats: Arc<RwLock<TransferStats>>,

    /// 전송 단계
    phase: RwLock<TransferPhase>,
}

impl Sender {
    /// 새 송신 엔진 생성 (라운드로빈 정책)
    pub fn new(control: Arc<dyn ControlChannel>, config: Config) -> Self {
        Self::with_policy(control, config, Box::new(RoundRobinPolicy))
    }

    /// 배분 정책을 지정해 생성
    pub fn with_policy(
        control: Arc<dyn ControlChannel>,
        config: Config,
        policy: Box<dyn DispatchPolicy>,
    ) -> Self {
        let stats = Arc::new(RwLock::new(TransferStats::new(config.stats_window_size)));

        Self {
            config,
            control,
            channels: ChannelSet::new(),
            policy,
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

    /// 페이로드 전송. 모든 청크가 ACK되면 반환한다.
    pub async fn send(&self, name: &str, payload: &[u8], chunk_size: usize) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::NoChannelsRegistered);
        }

        // 채널 I/O 전에 분할한다. 잘못된 청크 크기는 여기서 끝.
        let chunks = split_chunks(payload, chunk_size)?;
        let chunk_count = chunks.len();

        self.set_phase(TransferPhase::HandshakePending);

        // 컨트롤 핸드쉐이크: 메타데이터 먼저
        self.control.open_sender().await?;
        let metadata = TransferMetadata::new(name, chunk_size as u32, chunk_count as u32);
        self.control.send(&ControlMessage::Metadata(metadata)).await?;

        info!(
            "전송 시작: {} ({} bytes, {} chunks)",
            name,
            payload.len(),
            chunk_count
        );

        // 데이터 채널 초기화.
        // 모든 채널이 준비를 확인하기 전에는 어떤 청크도 내보내지 않는다.
        let (event_tx, mut event_rx) = mpsc::channel(self.config.event_queue_depth);

        let channels = self.channels.all();
        for channel in &channels {
            let blob = channel.open_sender(event_tx.clone()).await?;
            let msg = ChannelConfigMessage::new(channel.id().clone(), blob);
            self.control
                .send(&ControlMessage::ChannelConfig(msg))
                .await?;
            debug!("채널 {} 준비 완료", channel.id());
        }
        drop(event_tx);

        self.set_phase(TransferPhase::ChannelsReady);

        let link = DispatchLink {
            inner: Arc::new(LinkInner {
                state: Mutex::new(FlightState {
                    pending: VecDeque::from(chunks),
                    outstanding: HashMap::new(),
                }),
                notify: Notify::new(),
                channels,
                retry_timeout: self.config.retry_timeout(),
                stats: self.stats.clone(),
            }),
        };

        // ACK 펌프: 채널 이벤트를 배분 상태에 반영
        let pump = tokio::spawn({
            let link = link.clone();
            async move {
                while let Some((channel_id, event)) = event_rx.recv().await {
                    match event {
                        ChannelEvent::Ack(chunk_id) => link.on_ack(chunk_id),
                        ChannelEvent::Chunk(chunk) => {
                            warn!("송신측에 도착한 청크 무시: 채널 {}, 청크 {}", channel_id, chunk.id);
                        }
                    }
                }
            }
        });

        self.set_phase(TransferPhase::Transferring);

        let result = self.policy.run(&link).await;
        pump.abort();
        result?;

        self.set_phase(TransferPhase::Complete);
        info!("전송 완료: {} ({} chunks)", name, chunk_count);

        Ok(())
    }

    /// 파일 전송 편의 함수. 파일명이 전송 이름이 된다.
    pub async fn send_file(&self, path: &Path, chunk_size: usize) -> Result<()> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");

        self.send(name, &data, chunk_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;
    use bytes::Bytes;

    fn test_link(channels: Vec<Arc<dyn DataChannel>>, retry: Duration) -> DispatchLink {
        DispatchLink {
            inner: Arc::new(LinkInner {
                state: Mutex::new(FlightState {
                    pending: VecDeque::new(),
                    outstanding: HashMap::new(),
                }),
                notify: Notify::new(),
                channels,
                retry_timeout: retry,
                stats: Arc::new(RwLock::new(TransferStats::default())),
            }),
        }
    }

    #[tokio::test]
    async fn test_duplicate_ack_is_noop() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (sender_end, _receiver_end) = memory::data_pair("m0");
        sender_end.open_sender(events_tx).await.unwrap();

        let link = test_link(vec![sender_end], Duration::from_secs(5));
        let channel = link.channels()[0].clone();

        link.dispatch(Chunk::new(0, Bytes::from_static(b"abcd")), &channel)
            .await
            .unwrap();

        link.on_ack(0);
        link.on_ack(0); // 중복 ACK
        link.on_ack(99); // 보낸 적 없는 청크의 ACK

        let stats = link.inner.stats.read().clone();
        assert_eq!(stats.acked_chunks, 1);
        assert_eq!(stats.duplicate_acks, 2);
        assert_eq!(stats.retransmitted_chunks, 0);

        // 전송 완료: 추가 배분 없음
        assert!(link.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_timeout_requeues_at_front() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (sender_end, _receiver_end) = memory::data_pair("m0");
        sender_end.open_sender(events_tx).await.unwrap();

        let link = test_link(vec![sender_end], Duration::from_millis(50));
        let channel = link.channels()[0].clone();

        link.dispatch(Chunk::new(0, Bytes::from_static(b"old")), &channel)
            .await
            .unwrap();
        link.inner
            .state
            .lock()
            .pending
            .push_back(Chunk::new(5, Bytes::from_static(b"new")));

        tokio::time::sleep(Duration::from_millis(150)).await;

        // 타임아웃된 0번이 5번보다 앞에 선다
        let first = link.next_chunk().await.unwrap();
        assert_eq!(first.id, 0);
        let second = link.next_chunk().await.unwrap();
        assert_eq!(second.id, 5);

        assert_eq!(link.inner.stats.read().retransmitted_chunks, 1);
    }

    #[tokio::test]
    async fn test_lossy_channel_retransmits_after_timeout() {
        let (ctrl_sender, ctrl_receiver) = memory::control_pair();
        let (data_sender_a, data_receiver_a) = memory::data_pair("a");
        let (data_sender_b, data_receiver_b) = memory::data_pair("b");

        // 라운드로빈에서 1번 청크는 채널 b로 나간다. 첫 전송을 버려
        // ACK가 오지 않게 하면 타임아웃 뒤 재전송되어야 한다.
        data_sender_b.drop_chunk_once(1);

        let config = Config {
            retry_timeout_ms: 150,
            ..Config::default()
        };

        let sender = Sender::new(ctrl_sender, config.clone());
        sender.register_channel(data_sender_a).unwrap();
        sender.register_channel(data_sender_b).unwrap();

        let receiver = Arc::new(crate::receiver::Receiver::new(ctrl_receiver, config));
        receiver.register_channel(data_receiver_a).unwrap();
        receiver.register_channel(data_receiver_b).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();

        let recv_task = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.receive(dest).await }
        });

        sender.send("hello.txt", b"Hello, world!", 4).await.unwrap();

        let path = recv_task.await.unwrap().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"Hello, world!");

        // 버려진 1번 청크가 적어도 한 번 재전송됐다
        assert!(sender.stats().retransmitted_chunks >= 1);
        assert_eq!(receiver.stats().total_chunks, 4);
    }

    #[tokio::test]
    async fn test_send_without_channels_fails() {
        let (ctrl_sender, _ctrl_receiver) = memory::control_pair();
        let sender = Sender::new(ctrl_sender, Config::default());

        let err = sender.send("x.bin", b"data", 2).await.unwrap_err();
        assert!(matches!(err, Error::NoChannelsRegistered));
    }

    #[tokio::test]
    async fn test_invalid_chunk_size_before_any_io() {
        let (ctrl_sender, _ctrl_receiver) = memory::control_pair();
        let (data_sender, _data_receiver) = memory::data_pair("ch0");

        let sender = Sender::new(ctrl_sender.clone(), Config::default());
        sender.register_channel(data_sender).unwrap();

        let err = sender.send("x.bin", &[0u8; 100], 0).await.unwrap_err();

        assert!(matches!(err, Error::InvalidChunkSize { size: 0 }));
        // 채널 I/O는 전혀 일어나지 않는다
        assert_eq!(ctrl_sender.sent_count(), 0);
        assert_eq!(sender.phase(), TransferPhase::Idle);
    }
}
