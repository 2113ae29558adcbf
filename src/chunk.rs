//! 청크 정의와 분할
//!
//! - Chunk: 페이로드의 연속 조각, 분할 순서대로 ID 부여
//! - split_chunks: 상태 없는 순수 분할 함수

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// 청크 ID (32비트, 전송 내 전역 인덱스)
pub type ChunkId = u32;

/// 채널 ID (엔드포인트 내 유일)
pub type ChannelId = String;

/// 청크 와이어 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// 청크 ID
    pub id: ChunkId,

    /// 이 청크의 데이터 길이
    pub data_len: u32,
}

/// 청크 (전송 단위)
///
/// 생성 이후 불변. 마지막 청크를 제외하면 모두 같은 크기다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 청크 ID (분할 순서, 0부터)
    pub id: ChunkId,

    /// 실제 데이터
    pub data: Bytes,
}

impl Chunk {
    /// 새 청크 생성
    pub fn new(id: ChunkId, data: Bytes) -> Self {
        Self { id, data }
    }

    /// 청크를 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = ChunkHeader {
            id: self.id,
            data_len: self.data.len() as u32,
        };
        let header_bytes = bincode::serialize(&header).unwrap_or_default();
        let header_len = header_bytes.len() as u16;

        let mut buf = Vec::with_capacity(2 + header_bytes.len() + self.data.len());
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// 바이트에서 청크 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }

        let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() < 2 + header_len {
            return None;
        }

        let header: ChunkHeader = bincode::deserialize(&bytes[2..2 + header_len]).ok()?;
        let data = Bytes::copy_from_slice(&bytes[2 + header_len..]);

        Some(Self {
            id: header.id,
            data,
        })
    }
}

/// 페이로드를 청크들로 분할
///
/// `ceil(len / chunk_size)`개의 청크를 ID 0..n-1 순서로 만든다.
/// 마지막 청크만 `chunk_size`보다 짧을 수 있다 (빈 청크는 없음).
///
/// `chunk_size`가 0이거나 페이로드 길이보다 크면 `InvalidChunkSize`.
pub fn split_chunks(payload: &[u8], chunk_size: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 || chunk_size > payload.len() {
        return Err(Error::InvalidChunkSize { size: chunk_size });
    }

    Ok(payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(idx, data)| Chunk::new(idx as ChunkId, Bytes::copy_from_slice(data)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_basic() {
        let chunks = split_chunks(b"Hello, world!", 4).unwrap();

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].data.as_ref(), b"Hell");
        assert_eq!(chunks[1].data.as_ref(), b"o, w");
        assert_eq!(chunks[2].data.as_ref(), b"orld");
        assert_eq!(chunks[3].data.as_ref(), b"!");

        for (idx, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, idx as ChunkId);
        }
    }

    #[test]
    fn test_split_exact_multiple() {
        let chunks = split_chunks(&[0u8; 12], 4).unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.data.len() == 4));
    }

    #[test]
    fn test_split_whole_payload() {
        let chunks = split_chunks(b"abc", 3).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data.as_ref(), b"abc");
    }

    #[test]
    fn test_split_invalid_size() {
        let err = split_chunks(&[0u8; 100], 0).unwrap_err();
        assert!(matches!(err, Error::InvalidChunkSize { size: 0 }));

        let err = split_chunks(&[0u8; 100], 101).unwrap_err();
        assert!(matches!(err, Error::InvalidChunkSize { size: 101 }));
    }

    #[test]
    fn test_split_counts_and_last_size() {
        let payload: Vec<u8> = (0u8..=39).collect();

        for size in 1..=payload.len() {
            let chunks = split_chunks(&payload, size).unwrap();
            let expected = (payload.len() + size - 1) / size;

            assert_eq!(chunks.len(), expected);
            assert!(chunks[..expected - 1].iter().all(|c| c.data.len() == size));

            let last = &chunks[expected - 1];
            assert_eq!(last.data.len(), payload.len() - size * (expected - 1));
            assert!(!last.data.is_empty());
        }
    }

    #[test]
    fn test_reassembly_order_independent() {
        let payload: Vec<u8> = (0..250).map(|i| (i % 251) as u8).collect();
        let mut chunks = split_chunks(&payload, 32).unwrap();

        // 도착 순서를 흐트러뜨린 뒤 ID 기준으로 재조립
        chunks.reverse();
        chunks.swap(0, 3);
        chunks.sort_by_key(|c| c.id);

        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.data.to_vec()).collect();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_chunk_wire_roundtrip() {
        let chunk = Chunk::new(7, Bytes::from(vec![1, 2, 3, 4, 5]));

        let bytes = chunk.to_bytes();
        let restored = Chunk::from_bytes(&bytes).unwrap();

        assert_eq!(restored.id, chunk.id);
        assert_eq!(restored.data, chunk.data);
    }
}
