//! # Multi-Stream File Container
//!
//! Read-only access to the MSF 7.00 ("big MSF") container that debug
//! databases are stored in.
//!
//! An MSF file is a sequence of fixed-size blocks. Block 0 holds the
//! superblock; a directory (itself scattered over blocks listed in the block
//! map) records the size of every stream and which blocks hold its bytes.
//! Streams are addressed by index; the PDB layer gives meaning to them.
//!
//! ```text
//! superblock: magic[32] block_size u32 free_block_map u32 num_blocks u32
//!             num_directory_bytes u32 unknown u32 block_map_addr u32
//! directory:  num_streams u32, stream_sizes[num_streams] u32,
//!             block indices for stream 0, stream 1, ...
//! ```
//!
//! ## References
//!
//! - [The MSF File Format](https://llvm.org/docs/PDB/MsfFile.html)

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{LiveLinkError, Result};
use crate::stream::read_at;

/// Magic bytes at the start of every MSF 7.00 file
pub const MSF_MAGIC: &[u8; 32] = b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0";

const SUPERBLOCK_SIZE: usize = 56;
const NIL_STREAM_SIZE: u32 = u32::MAX;
const VALID_BLOCK_SIZES: [u32; 4] = [512, 1024, 2048, 4096];

#[derive(Debug, Clone)]
struct StreamLayout
{
    size: u32,
    blocks: Vec<u32>,
}

/// Parsed MSF container holding the whole file in memory.
pub struct MsfReader
{
    data: Vec<u8>,
    block_size: u32,
    num_blocks: u32,
    streams: Vec<StreamLayout>,
}

impl MsfReader
{
    /// Read and parse the container at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let data = fs::read(path)?;
        debug!("Read {} bytes of debug database {}", data.len(), path.display());
        Self::parse(data)
    }

    /// Parse a container already in memory.
    ///
    /// ## Errors
    ///
    /// - `InvalidContainer`: bad magic, unsupported block size, or a directory
    ///   that references blocks outside the file
    pub fn parse(data: Vec<u8>) -> Result<Self>
    {
        if data.len() < SUPERBLOCK_SIZE || &data[..MSF_MAGIC.len()] != MSF_MAGIC {
            return Err(LiveLinkError::InvalidContainer("missing MSF 7.00 signature".to_string()));
        }

        let block_size = read_at::<u32>(&data, 32)?;
        let num_blocks = read_at::<u32>(&data, 40)?;
        let num_directory_bytes = read_at::<u32>(&data, 44)?;
        let block_map_addr = read_at::<u32>(&data, 52)?;

        if !VALID_BLOCK_SIZES.contains(&block_size) {
            return Err(LiveLinkError::InvalidContainer(format!("unsupported block size {block_size}")));
        }

        let mut reader = Self {
            data,
            block_size,
            num_blocks,
            streams: Vec::new(),
        };

        let directory_blocks = reader.block_count(num_directory_bytes);
        let map_offset = reader.block_offset(block_map_addr, num_blocks)?;
        let mut directory_block_list = Vec::with_capacity(directory_blocks);
        for i in 0..directory_blocks {
            directory_block_list.push(read_at::<u32>(&reader.data, map_offset + i * 4)?);
        }

        let directory = reader.assemble(
            &StreamLayout {
                size: num_directory_bytes,
                blocks: directory_block_list,
            },
            num_blocks,
        )?;
        reader.streams = reader.parse_directory(&directory, num_blocks)?;
        debug!(
            "MSF container: block size {}, {} blocks, {} streams",
            block_size,
            num_blocks,
            reader.streams.len()
        );
        Ok(reader)
    }

    fn block_count(&self, size: u32) -> usize
    {
        if size == NIL_STREAM_SIZE {
            return 0;
        }
        size.div_ceil(self.block_size) as usize
    }

    fn block_offset(&self, block: u32, num_blocks: u32) -> Result<usize>
    {
        let offset = block as usize * self.block_size as usize;
        if block >= num_blocks || offset >= self.data.len() {
            return Err(LiveLinkError::InvalidContainer(format!(
                "block {block} lies outside the file ({num_blocks} blocks)"
            )));
        }
        Ok(offset)
    }

    fn parse_directory(&self, directory: &[u8], num_blocks: u32) -> Result<Vec<StreamLayout>>
    {
        let num_streams = read_at::<u32>(directory, 0)? as usize;
        // Every stream needs at least a size entry
        if num_streams > directory.len() / 4 {
            return Err(LiveLinkError::InvalidContainer(format!(
                "directory claims {num_streams} streams in {} bytes",
                directory.len()
            )));
        }

        let mut sizes = Vec::with_capacity(num_streams);
        for i in 0..num_streams {
            sizes.push(read_at::<u32>(directory, 4 + i * 4)?);
        }

        let mut cursor = 4 + num_streams * 4;
        let mut streams = Vec::with_capacity(num_streams);
        for size in sizes {
            let count = self.block_count(size);
            let mut blocks = Vec::with_capacity(count);
            for _ in 0..count {
                let block = read_at::<u32>(directory, cursor)?;
                if block >= num_blocks {
                    return Err(LiveLinkError::InvalidContainer(format!(
                        "stream references block {block} of {num_blocks}"
                    )));
                }
                blocks.push(block);
                cursor += 4;
            }
            streams.push(StreamLayout { size, blocks });
        }

        Ok(streams)
    }

    fn assemble(&self, layout: &StreamLayout, num_blocks: u32) -> Result<Vec<u8>>
    {
        if layout.size == NIL_STREAM_SIZE {
            return Ok(Vec::new());
        }

        let size = layout.size as usize;
        let block_size = self.block_size as usize;
        let mut out = Vec::with_capacity(size);
        for &block in &layout.blocks {
            let offset = self.block_offset(block, num_blocks)?;
            let wanted = block_size.min(size - out.len());
            let available = self.data.len() - offset;
            if available < wanted {
                return Err(LiveLinkError::InvalidContainer(format!(
                    "block {block} is truncated ({available} of {wanted} bytes)"
                )));
            }
            out.extend_from_slice(&self.data[offset..offset + wanted]);
        }
        Ok(out)
    }

    /// Number of streams in the directory
    #[must_use]
    pub fn stream_count(&self) -> usize
    {
        self.streams.len()
    }

    #[must_use]
    pub fn block_size(&self) -> u32
    {
        self.block_size
    }

    /// Assemble the contents of stream `index`.
    ///
    /// Nil and out-of-range streams read as empty, matching how debug
    /// databases use `0xffff` for "no stream".
    pub fn stream(&self, index: usize) -> Result<Vec<u8>>
    {
        let Some(layout) = self.streams.get(index) else {
            return Ok(Vec::new());
        };
        self.assemble(layout, self.num_blocks)
    }
}

#[cfg(test)]
pub(crate) mod tests
{
    use super::*;

    /// Lay out `streams` in a minimal MSF container with 512-byte blocks.
    ///
    /// Stream data is written in reverse block order so tests notice a reader
    /// that assumes contiguous blocks.
    pub(crate) fn build_msf(streams: &[Vec<u8>]) -> Vec<u8>
    {
        const BLOCK: usize = 512;
        let blocks_for = |len: usize| len.div_ceil(BLOCK);

        // block 0 superblock, 1 block map, 2.. directory, then stream data
        let mut stream_blocks: Vec<Vec<u32>> = Vec::new();
        let data_blocks: usize = streams.iter().map(|s| blocks_for(s.len())).sum();

        let mut directory = Vec::new();
        directory.extend_from_slice(&(streams.len() as u32).to_le_bytes());
        for stream in streams {
            directory.extend_from_slice(&(stream.len() as u32).to_le_bytes());
        }
        // Reserve block indices for stream contents; directory size is known up front
        let directory_len = directory.len() + data_blocks * 4;
        let directory_blocks = blocks_for(directory_len).max(1);
        let first_data = 2 + directory_blocks;
        let mut next = first_data + data_blocks;
        for stream in streams {
            let mut list = Vec::new();
            for _ in 0..blocks_for(stream.len()) {
                next -= 1;
                list.push(next as u32);
                directory.extend_from_slice(&(next as u32).to_le_bytes());
            }
            stream_blocks.push(list);
        }

        let total_blocks = first_data + data_blocks;
        let mut file = vec![0u8; total_blocks * BLOCK];
        file[..32].copy_from_slice(MSF_MAGIC);
        file[32..36].copy_from_slice(&(BLOCK as u32).to_le_bytes());
        file[36..40].copy_from_slice(&1u32.to_le_bytes());
        file[40..44].copy_from_slice(&(total_blocks as u32).to_le_bytes());
        file[44..48].copy_from_slice(&(directory.len() as u32).to_le_bytes());
        file[52..56].copy_from_slice(&1u32.to_le_bytes());

        for i in 0..directory_blocks {
            let at = BLOCK + i * 4;
            file[at..at + 4].copy_from_slice(&((2 + i) as u32).to_le_bytes());
        }
        file[2 * BLOCK..2 * BLOCK + directory.len()].copy_from_slice(&directory);

        for (stream, blocks) in streams.iter().zip(&stream_blocks) {
            for (chunk, block) in stream.chunks(BLOCK).zip(blocks) {
                let at = *block as usize * BLOCK;
                file[at..at + chunk.len()].copy_from_slice(chunk);
            }
        }
        file
    }

    #[test]
    fn test_streams_round_trip_through_blocks()
    {
        let big: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        let file = build_msf(&[vec![], b"hello".to_vec(), big.clone()]);
        let msf = MsfReader::parse(file).unwrap();
        assert_eq!(msf.stream_count(), 3);
        assert_eq!(msf.block_size(), 512);
        assert!(msf.stream(0).unwrap().is_empty());
        assert_eq!(msf.stream(1).unwrap(), b"hello");
        assert_eq!(msf.stream(2).unwrap(), big);
        assert!(msf.stream(99).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_magic()
    {
        let mut file = build_msf(&[b"x".to_vec()]);
        file[0] = b'X';
        assert!(matches!(MsfReader::parse(file), Err(LiveLinkError::InvalidContainer(_))));
    }

    #[test]
    fn test_rejects_odd_block_size()
    {
        let mut file = build_msf(&[b"x".to_vec()]);
        file[32..36].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(MsfReader::parse(file), Err(LiveLinkError::InvalidContainer(_))));
    }

    #[test]
    fn test_rejects_block_outside_file()
    {
        let mut file = build_msf(&[b"x".to_vec()]);
        // Point the block map at a block past the end
        file[52..56].copy_from_slice(&500u32.to_le_bytes());
        assert!(matches!(MsfReader::parse(file), Err(LiveLinkError::InvalidContainer(_))));
    }
}
