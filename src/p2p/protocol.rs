//! P2P protocol messages
//!
//! Defines the messages the masternode payment protocol exchanges and the
//! frame that carries them: network magic, little-endian payload length,
//! bincode payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::consensus::BlockHeader;
use crate::crypto::Hash;
use crate::masternode::PaymentWinner;

/// Maximum payload size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Frame header: 4 magic bytes + 4 length bytes
pub const HEADER_SIZE: usize = 8;

/// Most block headers a single `headers` message may carry
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Message too short")]
    TooShort,
    #[error("Invalid network magic")]
    BadMagic,
    #[error("Message too large: {0} bytes")]
    TooLarge(usize),
    #[error("Incomplete message")]
    Incomplete,
    #[error("Serialization error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Misbehavior points for a peer that sent this frame
    pub fn penalty(&self) -> u32 {
        match self {
            ProtocolError::Io(_) => 0,
            ProtocolError::BadMagic | ProtocolError::TooLarge(_) => 100,
            _ => 10,
        }
    }
}

/// P2P message types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    /// Version handshake
    Version(VersionMessage),
    /// Version acknowledgement
    VerAck,
    /// Announce inventory
    Inv(Vec<InvItem>),
    /// Request announced inventory
    GetData(Vec<InvItem>),
    /// Request every retained payment winner (`mnget`)
    MasternodeGet,
    /// Payment winner announcement (`mnw`)
    MasternodeWinner(PaymentWinner),
    /// Block headers extending the sender's best chain
    Headers(Vec<BlockHeader>),
}

/// Inventory item type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvType {
    MasternodeWinner,
}

/// Inventory item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvItem {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl InvItem {
    pub fn winner(hash: Hash) -> Self {
        Self {
            inv_type: InvType::MasternodeWinner,
            hash,
        }
    }
}

/// Version handshake message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionMessage {
    /// Protocol version
    pub version: u32,
    /// Best block height
    pub best_height: u64,
    /// Random nonce to detect self-connections
    pub nonce: u64,
    /// User agent string
    pub user_agent: String,
}

impl Message {
    /// Serialize the message into a frame
    pub fn to_bytes(&self, magic: [u8; 4]) -> Result<Vec<u8>, ProtocolError> {
        let payload = bincode::serialize(self)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(payload.len()));
        }

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&magic);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Deserialize a message from a complete frame
    pub fn from_bytes(magic: [u8; 4], bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::TooShort);
        }
        let length = parse_header(magic, &bytes[..HEADER_SIZE])?;
        if bytes.len() < HEADER_SIZE + length {
            return Err(ProtocolError::Incomplete);
        }
        Ok(bincode::deserialize(&bytes[HEADER_SIZE..HEADER_SIZE + length])?)
    }

    /// Get the command name for this message
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::VerAck => "verack",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::MasternodeGet => "mnget",
            Message::MasternodeWinner(_) => "mnw",
            Message::Headers(_) => "headers",
        }
    }
}

/// Validate magic and return the payload length
fn parse_header(magic: [u8; 4], header: &[u8]) -> Result<usize, ProtocolError> {
    if header[0..4] != magic {
        return Err(ProtocolError::BadMagic);
    }
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(length));
    }
    Ok(length)
}

/// Read one framed message from a stream
pub async fn read_message<R>(reader: &mut R, magic: [u8; 4]) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let length = parse_header(magic, &header)?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

/// Write one framed message to a stream
pub async fn write_message<W>(writer: &mut W, magic: [u8; 4], message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.to_bytes(magic)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
