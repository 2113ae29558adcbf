//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

use crate::chunk::ChannelId;

/// MFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 청크 크기: {size}")]
    InvalidChunkSize { size: usize },

    #[error("중복된 채널 ID: {channel_id}")]
    DuplicateChannelId { channel_id: ChannelId },

    #[error("등록된 채널 없음")]
    NoChannelsRegistered,

    #[error("알 수 없는 채널 ID: {channel_id}")]
    UnknownChannelId { channel_id: ChannelId },

    #[error("유효하지 않은 대상 경로: {}", .path.display())]
    InvalidDestination { path: PathBuf },

    #[error("채널 닫힘")]
    ChannelClosed,

    #[error("알 수 없는 에러: {0}")]
    Unknown(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
