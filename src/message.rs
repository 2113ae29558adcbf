//! 프로토콜 메시지 정의
//!
//! 컨트롤 채널: Metadata, ChannelConfig (데이터 채널이 열리기 전 1회성)
//! 데이터 채널: 청크(원시 프레임, chunk.rs 참고) + Ack / Hello

use serde::{Deserialize, Serialize};

use crate::{ChannelId, ChunkId, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// 전송 메타데이터 (송신 → 수신, 1회)
    Metadata = 1,

    /// 채널별 설정 (송신 → 수신, 채널당 1회, 순서 무관)
    ChannelConfig = 2,

    /// 청크 수신 확인 (수신 → 송신)
    Ack = 3,

    /// 데이터 채널 인사 (수신 → 송신, 주소 학습용)
    Hello = 4,
}

/// 메시지 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프로토콜 버전
    pub version: u8,

    /// 메시지 타입
    pub msg_type: MessageType,

    /// 메시지 길이 (헤더 제외)
    pub payload_len: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, payload_len: u32) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            msg_type,
            payload_len,
        }
    }
}

/// 헤더 + 페이로드 직렬화 공통 루틴
fn encode(msg_type: MessageType, payload: Vec<u8>) -> Vec<u8> {
    let header = MessageHeader::new(msg_type, payload.len() as u32);
    let header_bytes = bincode::serialize(&header).unwrap_or_default();

    let mut buf = Vec::with_capacity(header_bytes.len() + payload.len());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(&payload);
    buf
}

/// 헤더를 파싱해 타입이 맞으면 페이로드 슬라이스를 돌려준다
fn decode(bytes: &[u8], msg_type: MessageType) -> Option<&[u8]> {
    if bytes.len() < 10 {
        return None;
    }

    let header: MessageHeader = bincode::deserialize(bytes).ok()?;
    if header.magic != MAGIC_NUMBER || header.msg_type != msg_type {
        return None;
    }

    // bincode는 가변 길이이므로 헤더를 다시 직렬화해 실제 크기 확인
    let header_bytes = bincode::serialize(&header).ok()?;
    let header_size = header_bytes.len();

    if bytes.len() < header_size {
        return None;
    }

    Some(&bytes[header_size..])
}

/// 전송 메타데이터 (송신 → 수신, 1회)
///
/// 수신측은 이 메시지로 기대 청크 수와 출력 파일명을 확정한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMetadata {
    /// 페이로드 이름 (출력 파일명)
    pub name: String,

    /// 청크 크기 (바이트)
    pub chunk_size: u32,

    /// 총 청크 수
    pub chunk_count: u32,
}

impl TransferMetadata {
    pub fn new(name: impl Into<String>, chunk_size: u32, chunk_count: u32) -> Self {
        Self {
            name: name.into(),
            chunk_size,
            chunk_count,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(
            MessageType::Metadata,
            bincode::serialize(self).unwrap_or_default(),
        )
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(decode(bytes, MessageType::Metadata)?).ok()
    }
}

/// 채널 설정 메시지 (송신 → 수신, 채널당 1회)
///
/// 블롭 내용은 코어에 불투명하고, 같은 ID로 등록된 채널만 해석한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfigMessage {
    /// 대상 채널 ID
    pub channel_id: ChannelId,

    /// 채널별 불투명 설정 블롭
    pub config: Vec<u8>,
}

impl ChannelConfigMessage {
    pub fn new(channel_id: ChannelId, config: Vec<u8>) -> Self {
        Self { channel_id, config }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(
            MessageType::ChannelConfig,
            bincode::serialize(self).unwrap_or_default(),
        )
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(decode(bytes, MessageType::ChannelConfig)?).ok()
    }
}

/// ACK 메시지 (수신 → 송신)
///
/// 같은 청크에 대한 중복 ACK는 해가 없다 (송신측에서 no-op).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMessage {
    /// 확인하는 청크 ID
    pub chunk_id: ChunkId,
}

impl AckMessage {
    pub fn new(chunk_id: ChunkId) -> Self {
        Self { chunk_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(
            MessageType::Ack,
            bincode::serialize(self).unwrap_or_default(),
        )
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(decode(bytes, MessageType::Ack)?).ok()
    }
}

/// Hello 메시지 (수신 → 송신)
///
/// UDP 데이터 채널에서 수신측 주소를 송신측에 알리는 용도
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    /// 보내는 쪽이 알고 있는 채널 ID
    pub channel_id: ChannelId,
}

impl HelloMessage {
    pub fn new(channel_id: ChannelId) -> Self {
        Self { channel_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(
            MessageType::Hello,
            bincode::serialize(self).unwrap_or_default(),
        )
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(decode(bytes, MessageType::Hello)?).ok()
    }
}

/// 컨트롤 메시지 enum
#[derive(Debug, Clone)]
pub enum ControlMessage {
    Metadata(TransferMetadata),
    ChannelConfig(ChannelConfigMessage),
}

impl ControlMessage {
    /// 메시지 타입 반환
    pub fn msg_type(&self) -> MessageType {
        match self {
            ControlMessage::Metadata(_) => MessageType::Metadata,
            ControlMessage::ChannelConfig(_) => MessageType::ChannelConfig,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ControlMessage::Metadata(msg) => msg.to_bytes(),
            ControlMessage::ChannelConfig(msg) => msg.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }

        let header: MessageHeader = bincode::deserialize(bytes).ok()?;
        match header.msg_type {
            MessageType::Metadata => TransferMetadata::from_bytes(bytes).map(Self::Metadata),
            MessageType::ChannelConfig => {
                ChannelConfigMessage::from_bytes(bytes).map(Self::ChannelConfig)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_roundtrip() {
        let meta = TransferMetadata::new("data.bin", 1200, 55);

        let bytes = meta.to_bytes();
        let restored = TransferMetadata::from_bytes(&bytes).unwrap();

        assert_eq!(restored.name, "data.bin");
        assert_eq!(restored.chunk_size, 1200);
        assert_eq!(restored.chunk_count, 55);
    }

    #[test]
    fn test_ack_roundtrip() {
        let ack = AckMessage::new(42);
        let restored = AckMessage::from_bytes(&ack.to_bytes()).unwrap();

        assert_eq!(restored.chunk_id, 42);
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let ack = AckMessage::new(1).to_bytes();

        assert!(TransferMetadata::from_bytes(&ack).is_none());
        assert!(ControlMessage::from_bytes(&ack).is_none());
    }

    #[test]
    fn test_control_message_roundtrip() {
        let msg = ControlMessage::ChannelConfig(ChannelConfigMessage::new(
            "lan0".to_string(),
            vec![1, 2, 3],
        ));

        match ControlMessage::from_bytes(&msg.to_bytes()).unwrap() {
            ControlMessage::ChannelConfig(cfg) => {
                assert_eq!(cfg.channel_id, "lan0");
                assert_eq!(cfg.config, vec![1, 2, 3]);
            }
            other => panic!("unexpected message: {:?}", other.msg_type()),
        }
    }
}
