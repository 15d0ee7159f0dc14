//! RocksDB-backed block store.
//!
//! One column family holds `hash -> bincode(Block)` pairs plus the
//! distinguished key `"l"` pointing at the chain tip. An append writes the
//! block entry and the tip pointer in a single [`WriteBatch`], so a torn
//! append is never observable; the store is append-only and rejects a hash
//! that is already present.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use beck_core::error::{BeckError, BlockError};
use beck_core::types::{Block, Hash256};

const CF_BLOCKS: &str = "blocks";

/// Key of the tip pointer inside the blocks column family.
const TIP_KEY: &[u8] = b"l";

fn storage_err(e: impl ToString) -> BeckError {
    BeckError::Storage(e.to_string())
}

/// Durable mapping from block hash to serialized block, plus the tip.
pub struct BlockStore {
    db: DB,
}

impl BlockStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BeckError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf = ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default());
        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), vec![cf])
            .map_err(storage_err)?;
        Ok(Self { db })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, BeckError> {
        self.db
            .cf_handle(CF_BLOCKS)
            .ok_or_else(|| BeckError::Storage("missing column family: blocks".into()))
    }

    /// The current tip hash, or `None` for a fresh store.
    pub fn tip_hash(&self) -> Result<Option<Hash256>, BeckError> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, TIP_KEY).map_err(storage_err)? {
            Some(bytes) if bytes.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Some(Hash256(arr)))
            }
            Some(_) => Err(BeckError::Storage("invalid tip pointer length".into())),
            None => Ok(None),
        }
    }

    /// Whether the store holds no blocks yet.
    pub fn is_empty(&self) -> Result<bool, BeckError> {
        Ok(self.tip_hash()?.is_none())
    }

    pub fn contains(&self, hash: &Hash256) -> Result<bool, BeckError> {
        let cf = self.cf()?;
        Ok(self
            .db
            .get_cf(cf, hash.as_bytes())
            .map_err(storage_err)?
            .is_some())
    }

    /// Fetch and decode a block by hash.
    pub fn get(&self, hash: &Hash256) -> Result<Option<Block>, BeckError> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, hash.as_bytes()).map_err(storage_err)? {
            Some(data) => {
                let (block, _): (Block, usize) =
                    bincode::decode_from_slice(&data, bincode::config::standard())
                        .map_err(storage_err)?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Append a block and advance the tip in one atomic write.
    pub fn append(&self, block: &Block) -> Result<(), BeckError> {
        if self.contains(&block.hash)? {
            return Err(BlockError::BlockExists.into());
        }
        let bytes = bincode::encode_to_vec(block, bincode::config::standard())
            .map_err(storage_err)?;

        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, block.hash.as_bytes(), &bytes);
        batch.put_cf(cf, TIP_KEY, block.hash.as_bytes());
        self.db.write(batch).map_err(storage_err)
    }
}
