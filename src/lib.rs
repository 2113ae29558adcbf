//! # MFT (Multiplexed File Transfer)
//!
//! 다중 채널 기반 신뢰성 청크 전송 프로토콜
//!
//! ## 핵심 특징
//! - **청크 분할**: 페이로드를 고정 크기 청크로 분할, ID 오름차순 재조립
//! - **멀티채널**: 이종 채널 동시 전송, 채널별 지연과 무관하게 순서 복원
//! - **ACK 기반 신뢰성**: 청크별 재전송 타이머, 타임아웃 시 큐 앞 재삽입
//! - **핸드쉐이크 배리어**: 모든 채널 준비 전에는 데이터 전송 금지
//! - **플러그형 배분 정책**: 라운드로빈 기본, 전략 교체 가능
//! - **추상 채널**: 구체 전송(UDP, 인프로세스)은 트레이트 뒤에 격리

pub mod channel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod udp;

pub use channel::{ChannelEvent, ChannelSet, ControlChannel, DataChannel, EventSender};
pub use chunk::{split_chunks, ChannelId, Chunk, ChunkId};
pub use config::Config;
pub use error::{Error, Result};
pub use message::{AckMessage, ChannelConfigMessage, ControlMessage, TransferMetadata};
pub use receiver::Receiver;
pub use sender::{DispatchLink, DispatchPolicy, RoundRobinPolicy, Sender};
pub use stats::{TransferPhase, TransferStats};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 1200;

/// 기본 재전송 타임아웃 (밀리초)
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 1000;

/// 매직 넘버 (패킷 식별용)
pub const MAGIC_NUMBER: u32 = 0x4D465450; // "MFTP"
