//! 채널 추상화
//!
//! 코어는 구체 전송을 알지 못하고 여기 정의된 능력 집합만 사용한다.
//! 서로 다른 구현(UDP, 인프로세스 등)이 한 전송 안에 공존할 수 있다.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::chunk::{ChannelId, Chunk, ChunkId};
use crate::message::ControlMessage;
use crate::{Error, Result};

/// 채널이 코어로 올려보내는 이벤트
#[derive(Debug)]
pub enum ChannelEvent {
    /// 청크 도착 (수신측)
    Chunk(Chunk),

    /// ACK 도착 (송신측)
    Ack(ChunkId),
}

/// 데이터 채널 이벤트 송신 핸들 (채널 ID 태깅)
pub type EventSender = mpsc::Sender<(ChannelId, ChannelEvent)>;

/// 데이터 채널 능력 집합
///
/// 한 채널은 한 전송에서 송신측 아니면 수신측으로만 열린다.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// 엔드포인트 내 유일 식별자
    fn id(&self) -> &ChannelId;

    /// 송신측 초기화. 수신측에 전달할 설정 블롭을 반환한다.
    ///
    /// 반환 이후 send_chunk가 가능해야 하고, ACK는 `events`로 올라온다.
    async fn open_sender(&self, events: EventSender) -> Result<Vec<u8>>;

    /// 수신측 초기화. 송신측이 만든 설정 블롭을 적용한다.
    ///
    /// 반환 이후 도착 청크가 `events`로 올라온다.
    async fn open_receiver(&self, config: &[u8], events: EventSender) -> Result<()>;

    /// 청크 전송 (송신측)
    async fn send_chunk(&self, chunk: &Chunk) -> Result<()>;

    /// ACK 전송 (수신측)
    async fn send_ack(&self, chunk_id: ChunkId) -> Result<()>;
}

/// 컨트롤 채널 능력 집합
///
/// 데이터 채널이 열리기 전 메타데이터 교환에만 쓰이는 단일 채널.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// 송신측 초기화
    async fn open_sender(&self) -> Result<()>;

    /// 수신측 초기화. 도착 메시지가 `events`로 올라온다.
    async fn open_receiver(&self, events: mpsc::Sender<ControlMessage>) -> Result<()>;

    /// 컨트롤 메시지 전송 (송신측)
    async fn send(&self, msg: &ControlMessage) -> Result<()>;
}

/// 채널 등록 집합 (ID → 채널)
///
/// 같은 ID의 이중 등록은 설정 버그이므로 즉시 실패시킨다.
pub struct ChannelSet {
    channels: DashMap<ChannelId, Arc<dyn DataChannel>>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// 채널 등록. 같은 ID가 이미 있으면 실패하고 기존 등록은 유지된다.
    pub fn register(&self, channel: Arc<dyn DataChannel>) -> Result<()> {
        match self.channels.entry(channel.id().clone()) {
            Entry::Occupied(entry) => Err(Error::DuplicateChannelId {
                channel_id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(channel);
                Ok(())
            }
        }
    }

    /// ID로 채널 조회
    pub fn get(&self, id: &str) -> Option<Arc<dyn DataChannel>> {
        self.channels.get(id).map(|entry| entry.value().clone())
    }

    /// 등록된 채널 목록 (ID 오름차순)
    pub fn all(&self) -> Vec<Arc<dyn DataChannel>> {
        let mut list: Vec<_> = self
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        list.sort_by(|a, b| a.id().cmp(b.id()));
        list
    }

    /// 등록된 채널 수
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::new()
    }
}
