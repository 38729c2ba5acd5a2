//! The stable gossip wire format (spec.md §4.G, §6): a 4-byte big-endian
//! length prefix followed by a MessagePack array of `PeerDescriptor`
//! entries, each encoded as a map so the `nodeId`/`version`/`state` keys
//! stay self-describing across versions.

use tka_types::PeerDescriptor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("gossip frame io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gossip frame encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("gossip frame decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("gossip frame exceeds maximum size ({0} bytes)")]
    TooLarge(usize),
}

/// Frames larger than this are rejected rather than allocated, guarding
/// against a malformed or hostile peer sending an oversized length prefix.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    entries: &[PeerDescriptor],
) -> Result<(), WireError> {
    let payload = rmp_serde::to_vec_named(entries)?;
    let len = u32::try_from(payload.len()).map_err(|_| WireError::TooLarge(payload.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<PeerDescriptor>, WireError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let entries = rmp_serde::from_slice(&payload)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tka_types::PeerState;

    #[tokio::test]
    async fn frame_round_trips_through_messagepack() {
        let mut labels = BTreeMap::new();
        labels.insert("region".to_string(), "eu-central".to_string());
        let entries = vec![
            PeerDescriptor::new(
                "node-a:7946",
                3,
                PeerState {
                    api_endpoint: "https://cluster-a.example.com:6443".to_string(),
                    api_port: 6443,
                    labels,
                },
            ),
            PeerDescriptor::new(
                "node-b:7946",
                1,
                PeerState {
                    api_endpoint: "https://cluster-b.example.com:6443".to_string(),
                    api_port: 6443,
                    labels: BTreeMap::new(),
                },
            ),
        ];

        let mut buf = Vec::new();
        write_frame(&mut buf, &entries).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap();

        assert_eq!(decoded.len(), entries.len());
        assert_eq!(decoded[0].node_id, "node-a:7946");
        assert_eq!(decoded[0].version, 3);
        assert_eq!(decoded[0].state.labels.get("region").unwrap(), "eu-central");
        // lastSeen is local-only, never carried over the wire.
        assert_eq!(decoded[0].last_seen, 0);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_without_allocating() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, WireError::TooLarge(_)));
    }
}
