//! 전송 상태와 통계

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::chunk::ChannelId;

/// 전송 단계 (엔드포인트별 상태 머신)
///
/// Complete는 종단 상태다. 취소 상태는 없으며, 전송 중단은
/// 등록된 채널들을 외부에서 내리는 방식으로만 가능하다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// 시작 전
    Idle,

    /// 핸드쉐이크 진행 중
    HandshakePending,

    /// 모든 채널 준비 완료
    ChannelsReady,

    /// 데이터 교환 중
    Transferring,

    /// 전송 완료 (종단)
    Complete,
}

/// 청크 처리 기록
#[derive(Debug, Clone, Copy)]
struct ChunkRecord {
    timestamp: Instant,
    size: usize,
}

/// 채널별 통계
#[derive(Debug, Clone)]
pub struct ChannelStats {
    /// 채널 ID
    pub channel_id: ChannelId,

    /// 최근 청크 기록
    records: VecDeque<ChunkRecord>,

    /// 윈도우 크기
    window_size: usize,

    /// 총 청크 수
    pub total_chunks: u64,

    /// 총 바이트
    pub total_bytes: u64,
}

impl ChannelStats {
    pub fn new(channel_id: ChannelId, window_size: usize) -> Self {
        Self {
            channel_id,
            records: VecDeque::with_capacity(window_size),
            window_size,
            total_chunks: 0,
            total_bytes: 0,
        }
    }

    /// 청크 처리 기록
    pub fn record_chunk(&mut self, size: usize) {
        if self.records.len() >= self.window_size {
            self.records.pop_front();
        }

        self.records.push_back(ChunkRecord {
            timestamp: Instant::now(),
            size,
        });

        self.total_chunks += 1;
        self.total_bytes += size as u64;
    }

    /// 윈도우 기준 바이트 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        if self.records.len() < 2 {
            return 0.0;
        }

        let first = self.records.front().map(|r| r.timestamp);
        let last = self.records.back().map(|r| r.timestamp);
        let (Some(first), Some(last)) = (first, last) else {
            return 0.0;
        };

        let duration = last.duration_since(first);
        if duration.is_zero() {
            return 0.0;
        }

        let total_size: usize = self.records.iter().map(|r| r.size).sum();
        total_size as f64 / duration.as_secs_f64()
    }
}

/// 전체 전송 통계
///
/// 송신측은 배분/ACK/재전송 카운터를, 수신측은 도착/중복 카운터를 채운다.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 총 바이트 (재전송 포함)
    pub total_bytes: u64,

    /// 총 청크 수 (재전송 포함)
    pub total_chunks: u64,

    /// ACK된 청크 수
    pub acked_chunks: u64,

    /// 재전송 청크 수
    pub retransmitted_chunks: u64,

    /// 중복 ACK 수 (이미 확인됐거나 보낸 적 없는 청크)
    pub duplicate_acks: u64,

    /// 중복 수신 청크 수
    pub duplicate_chunks: u64,

    /// 채널별 통계
    pub channel_stats: HashMap<ChannelId, ChannelStats>,

    /// 윈도우 크기
    window_size: usize,
}

impl TransferStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes: 0,
            total_chunks: 0,
            acked_chunks: 0,
            retransmitted_chunks: 0,
            duplicate_acks: 0,
            duplicate_chunks: 0,
            channel_stats: HashMap::new(),
            window_size,
        }
    }

    /// 채널별 청크 처리 기록
    pub fn record_channel_chunk(&mut self, channel_id: &str, size: usize) {
        let window_size = self.window_size;
        self.channel_stats
            .entry(channel_id.to_string())
            .or_insert_with(|| ChannelStats::new(channel_id.to_string(), window_size))
            .record_chunk(size);
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Chunks: {} (retx {}) | Bytes: {} | Throughput: {:.2} MB/s | Dup acks: {} | Dup chunks: {}",
            self.elapsed().as_secs_f64(),
            self.total_chunks,
            self.retransmitted_chunks,
            self.total_bytes,
            self.overall_throughput() / 1_000_000.0,
            self.duplicate_acks,
            self.duplicate_chunks,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(100)
    }
}
