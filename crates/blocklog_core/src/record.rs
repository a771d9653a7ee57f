//! Records stored in a block log.
//!
//! The log is generic over [`StoredRecord`]: it only needs a record's block
//! number, identity, header and byte encoding. Two record kinds exist, full
//! signed blocks and the lighter block header states, each stored in its own
//! pair of files.

use crate::codec::{read_array, read_bytes, read_u16, read_u32, read_u64, write_bytes, MAX_FIELD_LEN};
use crate::error::{CoreError, CoreResult};
use crate::types::{sha256, BlockId, BlockNum};
use std::fmt::Debug;
use std::io::Read;

/// Which family of log files a record type lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Full signed blocks.
    Blocks,
    /// Block header states.
    BlockState,
}

impl RecordKind {
    /// File name prefix, also used for archived and quarantine files.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::BlockState => "block_state",
        }
    }

    /// Name of the live log file.
    #[must_use]
    pub fn log_file_name(self) -> String {
        format!("{}.log", self.prefix())
    }

    /// Name of the live index file.
    #[must_use]
    pub fn index_file_name(self) -> String {
        format!("{}.index", self.prefix())
    }

    /// Base name (without extension) of a file pair holding `[first, last]`.
    #[must_use]
    pub fn range_file_stem(self, first: BlockNum, last: BlockNum) -> String {
        format!("{}-{first}-{last}", self.prefix())
    }

    /// Parses `<prefix>-<first>-<last>.log` into its block range.
    #[must_use]
    pub fn parse_range_file_name(self, file_name: &str) -> Option<(BlockNum, BlockNum)> {
        let rest = file_name
            .strip_prefix(self.prefix())?
            .strip_prefix('-')?
            .strip_suffix(".log")?;
        let (first, last) = rest.split_once('-')?;
        if first.is_empty() || !first.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if last.is_empty() || !last.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((first.parse().ok()?, last.parse().ok()?))
    }
}

/// A record the block log can store.
pub trait StoredRecord: Sized + Send + Sync + Debug + 'static {
    /// File family of this record type.
    const KIND: RecordKind;

    /// Whether the chain must be replayable from this log.
    ///
    /// Logs of such records may not start at block 1 without a genesis state.
    const NEEDED_FOR_REPLAY: bool;

    /// Block number of the record.
    fn block_num(&self) -> BlockNum;

    /// Identity of the record.
    fn id(&self) -> BlockId;

    /// Header of the block the record describes.
    fn header(&self) -> &BlockHeader;

    /// Serializes the record.
    fn encode(&self) -> Vec<u8>;

    /// Deserializes a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream ends early or holds malformed data.
    fn decode<Rd: Read>(r: &mut Rd) -> CoreResult<Self>;

    /// Deserializes only as much as needed to recover the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream ends early or holds malformed data.
    fn decode_header<Rd: Read>(r: &mut Rd) -> CoreResult<BlockHeader> {
        Ok(Self::decode(r)?.header().clone())
    }
}

/// Header of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    /// Block timestamp slot.
    pub timestamp: u32,
    /// Producer account name.
    pub producer: u64,
    /// Number of prior blocks this producer confirms.
    pub confirmed: u16,
    /// Id of the previous block.
    pub previous: BlockId,
    /// Merkle root of the transactions.
    pub transaction_mroot: [u8; 32],
    /// Merkle root of the actions.
    pub action_mroot: [u8; 32],
    /// Version of the producer schedule in effect.
    pub schedule_version: u32,
}

impl BlockHeader {
    /// Encoded size in bytes.
    pub const ENCODED_SIZE: usize = 4 + 8 + 2 + 32 + 32 + 32 + 4;

    /// Offset of the `previous` field inside the encoding.
    pub const PREVIOUS_OFFSET: u64 = 14;

    /// Block number, derived from the previous block's id.
    #[must_use]
    pub fn block_num(&self) -> BlockNum {
        self.previous.block_num().wrapping_add(1)
    }

    /// Computes the id of the block this header belongs to.
    #[must_use]
    pub fn calculate_id(&self) -> BlockId {
        BlockId::from_digest(self.block_num(), sha256(&self.encode()))
    }

    /// Appends the encoding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.producer.to_le_bytes());
        buf.extend_from_slice(&self.confirmed.to_le_bytes());
        buf.extend_from_slice(self.previous.as_bytes());
        buf.extend_from_slice(&self.transaction_mroot);
        buf.extend_from_slice(&self.action_mroot);
        buf.extend_from_slice(&self.schedule_version.to_le_bytes());
    }

    /// Encodes the header to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream ends early.
    pub fn decode<R: Read>(r: &mut R) -> CoreResult<Self> {
        Ok(Self {
            timestamp: read_u32(r)?,
            producer: read_u64(r)?,
            confirmed: read_u16(r)?,
            previous: BlockId::new(read_array(r)?),
            transaction_mroot: read_array(r)?,
            action_mroot: read_array(r)?,
            schedule_version: read_u32(r)?,
        })
    }
}

/// A full block: header, producer signature and packed transactions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignedBlock {
    /// Block header.
    pub header: BlockHeader,
    /// Producer signature over the header.
    pub producer_signature: Vec<u8>,
    /// Packed transactions, opaque to the log.
    pub transactions: Vec<Vec<u8>>,
}

impl StoredRecord for SignedBlock {
    const KIND: RecordKind = RecordKind::Blocks;
    const NEEDED_FOR_REPLAY: bool = true;

    fn block_num(&self) -> BlockNum {
        self.header.block_num()
    }

    fn id(&self) -> BlockId {
        self.header.calculate_id()
    }

    fn header(&self) -> &BlockHeader {
        &self.header
    }

    fn encode(&self) -> Vec<u8> {
        let payload: usize = self.transactions.iter().map(|t| t.len() + 4).sum();
        let mut buf =
            Vec::with_capacity(BlockHeader::ENCODED_SIZE + 8 + self.producer_signature.len() + payload);
        self.header.encode_into(&mut buf);
        write_bytes(&mut buf, &self.producer_signature);
        let count = u32::try_from(self.transactions.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for trx in &self.transactions {
            write_bytes(&mut buf, trx);
        }
        buf
    }

    fn decode<Rd: Read>(r: &mut Rd) -> CoreResult<Self> {
        let header = BlockHeader::decode(r)?;
        let producer_signature = read_bytes(r)?;
        let count = read_u32(r)?;
        if count > MAX_FIELD_LEN {
            return Err(CoreError::decode(format!(
                "transaction count {count} exceeds limit"
            )));
        }
        let mut transactions = Vec::new();
        for _ in 0..count {
            transactions.push(read_bytes(r)?);
        }
        Ok(Self {
            header,
            producer_signature,
            transactions,
        })
    }

    fn decode_header<Rd: Read>(r: &mut Rd) -> CoreResult<BlockHeader> {
        BlockHeader::decode(r)
    }
}

/// Header-only state kept for each block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeaderState {
    /// Header of the block.
    pub header: BlockHeader,
    /// Block number.
    pub block_num: BlockNum,
    /// Block id.
    pub id: BlockId,
    /// Version of the active producer schedule.
    pub active_schedule_version: u32,
    /// Opaque extension data.
    pub extension: Vec<u8>,
}

impl BlockHeaderState {
    /// Derives the state of the block `header` describes.
    #[must_use]
    pub fn from_header(header: BlockHeader, extension: Vec<u8>) -> Self {
        Self {
            block_num: header.block_num(),
            id: header.calculate_id(),
            active_schedule_version: header.schedule_version,
            header,
            extension,
        }
    }
}

impl StoredRecord for BlockHeaderState {
    const KIND: RecordKind = RecordKind::BlockState;
    const NEEDED_FOR_REPLAY: bool = false;

    fn block_num(&self) -> BlockNum {
        self.block_num
    }

    fn id(&self) -> BlockId {
        self.id
    }

    fn header(&self) -> &BlockHeader {
        &self.header
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BlockHeader::ENCODED_SIZE + 44 + self.extension.len());
        self.header.encode_into(&mut buf);
        buf.extend_from_slice(&self.block_num.to_le_bytes());
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&self.active_schedule_version.to_le_bytes());
        write_bytes(&mut buf, &self.extension);
        buf
    }

    fn decode<Rd: Read>(r: &mut Rd) -> CoreResult<Self> {
        Ok(Self {
            header: BlockHeader::decode(r)?,
            block_num: read_u32(r)?,
            id: BlockId::new(read_array(r)?),
            active_schedule_version: read_u32(r)?,
            extension: read_bytes(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_after(previous: BlockNum) -> BlockHeader {
        BlockHeader {
            timestamp: 100 + previous,
            producer: 0xAA,
            previous: BlockId::from_digest(previous, [3u8; 32]),
            ..BlockHeader::default()
        }
    }

    #[test]
    fn header_encoding_has_fixed_size() {
        assert_eq!(header_after(1).encode().len(), BlockHeader::ENCODED_SIZE);
    }

    #[test]
    fn previous_block_num_sits_at_fixed_offset() {
        let bytes = header_after(41).encode();
        let off = BlockHeader::PREVIOUS_OFFSET as usize;
        let prev = u32::from_be_bytes(bytes[off..off + 4].try_into().unwrap());
        assert_eq!(prev + 1, 42);
    }

    #[test]
    fn id_encodes_block_num() {
        let header = header_after(9);
        assert_eq!(header.block_num(), 10);
        assert_eq!(header.calculate_id().block_num(), 10);
    }

    #[test]
    fn signed_block_roundtrip() {
        let block = SignedBlock {
            header: header_after(5),
            producer_signature: vec![1, 2, 3],
            transactions: vec![vec![9; 10], vec![], vec![8; 3]],
        };
        let bytes = block.encode();
        assert_eq!(SignedBlock::decode(&mut bytes.as_slice()).unwrap(), block);
        assert_eq!(
            SignedBlock::decode_header(&mut bytes.as_slice()).unwrap(),
            block.header
        );
    }

    #[test]
    fn header_state_roundtrip() {
        let state = BlockHeaderState::from_header(header_after(7), vec![4; 6]);
        assert_eq!(state.block_num, 8);
        let bytes = state.encode();
        assert_eq!(BlockHeaderState::decode(&mut bytes.as_slice()).unwrap(), state);
    }

    #[test]
    fn truncated_block_fails_to_decode() {
        let block = SignedBlock {
            header: header_after(1),
            producer_signature: vec![1; 8],
            transactions: vec![vec![2; 64]],
        };
        let bytes = block.encode();
        assert!(SignedBlock::decode(&mut &bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn range_file_names() {
        let kind = RecordKind::Blocks;
        assert_eq!(kind.range_file_stem(1, 1000), "blocks-1-1000");
        assert_eq!(kind.parse_range_file_name("blocks-1-1000.log"), Some((1, 1000)));
        assert_eq!(kind.parse_range_file_name("blocks-1-1000.index"), None);
        assert_eq!(kind.parse_range_file_name("blocks-x-1.log"), None);
        assert_eq!(kind.parse_range_file_name("blocks.log"), None);
        assert_eq!(
            RecordKind::BlockState.parse_range_file_name("block_state-5-9.log"),
            Some((5, 9))
        );
        assert_eq!(RecordKind::Blocks.parse_range_file_name("block_state-5-9.log"), None);
    }
}
