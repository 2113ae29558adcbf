//! 프로토콜 설정

use std::time::Duration;

use crate::DEFAULT_RETRY_TIMEOUT_MS;

/// MFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 재전송 타임아웃 (밀리초)
    ///
    /// 이 시간 안에 ACK가 없으면 청크를 큐 앞으로 재삽입한다.
    pub retry_timeout_ms: u64,

    /// 데이터 채널 이벤트 큐 깊이
    pub event_queue_depth: usize,

    /// 컨트롤 채널 이벤트 큐 깊이
    pub control_queue_depth: usize,

    /// 채널별 속도 측정 윈도우 (청크 수)
    pub stats_window_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_timeout_ms: DEFAULT_RETRY_TIMEOUT_MS,
            event_queue_depth: 1024,
            control_queue_depth: 64,
            stats_window_size: 100,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 재전송 타임아웃
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// 저지연 링크용 설정 (LAN, 인프로세스)
    pub fn low_latency() -> Self {
        Self {
            retry_timeout_ms: 50,
            event_queue_depth: 4096,
            control_queue_depth: 64,
            stats_window_size: 200,
        }
    }

    /// 불안정한 링크용 설정
    pub fn lossy_network() -> Self {
        Self {
            retry_timeout_ms: 2000,
            event_queue_depth: 512,
            control_queue_depth: 32,
            stats_window_size: 30,
        }
    }
}
