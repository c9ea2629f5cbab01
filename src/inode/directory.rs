//! Directory contents: a single data block holding a fixed array of
//! fixed-width entries, each a name and an i-node number, with `-1` as the
//! free-slot sentinel.

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::ids::Inumber;

use super::InodeType;
use super::content::{self, InodeProof};
use super::table::{InodeTable, InodeWriteGuard};
use crate::block::BlockPool;

const INUMBER_BYTES: usize = 4;
const FREE_SENTINEL: i32 = -1;

fn entry_offset(config: &FsConfig, slot: usize) -> usize {
    slot * config.dir_entry_size()
}

fn read_entry_inumber(bytes: &[u8]) -> Option<Inumber> {
    let raw = i32::from_le_bytes(bytes[..INUMBER_BYTES].try_into().expect("4-byte slice"));
    if raw == FREE_SENTINEL {
        None
    } else {
        Some(Inumber::new(
            u32::try_from(raw).expect("stored inumber is non-negative"),
        ))
    }
}

fn write_entry_inumber(bytes: &mut [u8], inumber: Option<Inumber>) {
    let raw = inumber.map_or(FREE_SENTINEL, |n| {
        i32::try_from(n.get()).expect("inumber fits i32")
    });
    bytes[..INUMBER_BYTES].copy_from_slice(&raw.to_le_bytes());
}

fn entry_name<'a>(bytes: &'a [u8], config: &FsConfig) -> &'a [u8] {
    let name = &bytes[INUMBER_BYTES..INUMBER_BYTES + config.max_file_name];
    let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    &name[..len]
}

fn write_entry_name(bytes: &mut [u8], config: &FsConfig, name: &[u8]) {
    let field = &mut bytes[INUMBER_BYTES..INUMBER_BYTES + config.max_file_name];
    field.fill(0);
    field[..name.len()].copy_from_slice(name);
}

/// Formats a freshly allocated directory block with every entry marked free.
pub(super) fn format_empty_block(bytes: &mut [u8], config: &FsConfig) {
    for slot in 0..config.max_dir_entries() {
        let off = entry_offset(config, slot);
        write_entry_inumber(&mut bytes[off..off + config.dir_entry_size()], None);
    }
}

fn validate_name(name: &str, config: &FsConfig) -> FsResult<()> {
    if name.is_empty() {
        return Err(FsError::EmptyName);
    }
    if name.len() > config.max_file_name {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// Scans a directory i-node's single data block for an entry named `name`.
pub(crate) fn find_in_dir<P: InodeProof>(
    proof: &P,
    pool: &BlockPool,
    config: &FsConfig,
    name: &str,
) -> FsResult<Inumber> {
    validate_name(name, config)?;
    if !proof.slot().ty.is_directory() {
        return Err(FsError::NotADirectory);
    }
    let block = content::get_block(proof, pool, config, 0)?;
    let bytes = pool.read(proof, block)?;
    for slot in 0..config.max_dir_entries() {
        let off = entry_offset(config, slot);
        let entry = &bytes[off..off + config.dir_entry_size()];
        if let Some(inumber) = read_entry_inumber(entry)
            && entry_name(entry, config) == name.as_bytes()
        {
            return Ok(inumber);
        }
    }
    Err(FsError::NotFound)
}

/// Adds `name -> inumber` to a directory's entry block. Idempotent: if the
/// name is already bound to `inumber`, succeeds without modifying the block.
/// Fails if the name is bound to a different i-node, or if the directory is
/// full.
pub(crate) fn create_in_dir(
    dir: &mut InodeWriteGuard<'_>,
    pool: &BlockPool,
    config: &FsConfig,
    name: &str,
    inumber: Inumber,
) -> FsResult<()> {
    validate_name(name, config)?;
    if !dir.ty.is_directory() {
        return Err(FsError::NotADirectory);
    }
    let block = content::get_block(&*dir, pool, config, 0)?;

    let mut free_slot = None;
    {
        let bytes = pool.read(&*dir, block)?;
        for slot in 0..config.max_dir_entries() {
            let off = entry_offset(config, slot);
            let entry = &bytes[off..off + config.dir_entry_size()];
            match read_entry_inumber(entry) {
                Some(existing) if entry_name(entry, config) == name.as_bytes() => {
                    return if existing == inumber {
                        Ok(())
                    } else {
                        Err(FsError::DirectoryFull)
                    };
                }
                Some(_) => {}
                None => {
                    free_slot.get_or_insert(slot);
                }
            };
        }
    }

    let slot = free_slot.ok_or(FsError::DirectoryFull)?;
    let bytes = pool.write(dir, block)?;
    let off = entry_offset(config, slot);
    let entry = &mut bytes[off..off + config.dir_entry_size()];
    write_entry_inumber(entry, Some(inumber));
    write_entry_name(entry, config, name.as_bytes());
    Ok(())
}

/// Looks up `name` in `parent`, creating a new i-node of type `ty` and
/// binding it if no entry exists yet. Rolls the freshly allocated i-node
/// back if publishing the directory entry fails (directory full, or a
/// concurrent creator won the race for the same name).
pub(crate) fn lookup_or_create(
    table: &InodeTable,
    parent: Inumber,
    pool: &BlockPool,
    config: &FsConfig,
    name: &str,
    ty: InodeType,
) -> FsResult<(Inumber, bool)> {
    let table_guard = table.lock_table();
    let mut dir = table.lock_write(parent)?;
    match find_in_dir(&dir, pool, config, name) {
        Ok(existing) => Ok((existing, false)),
        Err(FsError::NotFound) => {
            let child = table.allocate_locked(ty, pool)?;
            if let Err(err) = create_in_dir(&mut dir, pool, config, name, child) {
                let _ = table.delete_locked(child, pool);
                drop(table_guard);
                return Err(err);
            }
            Ok((child, true))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockPool;

    fn small_config() -> FsConfig {
        FsConfig {
            block_size: 64,
            data_blocks: 16,
            inode_table_size: 8,
            inode_direct_refs: 2,
            max_file_name: 8,
            ..FsConfig::DEFAULT
        }
    }

    #[test]
    fn create_then_find_round_trips() {
        let config = small_config();
        let pool = BlockPool::new(config);
        let table = InodeTable::new(config);
        let root = table.create(InodeType::Directory, &pool).unwrap();
        let (child, created) =
            lookup_or_create(&table, root, &pool, &config, "a", InodeType::File).unwrap();
        assert!(created);

        let dir = table.lock_read(root).unwrap();
        assert_eq!(find_in_dir(&dir, &pool, &config, "a").unwrap(), child);
        assert_eq!(
            find_in_dir(&dir, &pool, &config, "missing"),
            Err(FsError::NotFound)
        );
    }

    #[test]
    fn lookup_or_create_is_idempotent_for_same_name() {
        let config = small_config();
        let pool = BlockPool::new(config);
        let table = InodeTable::new(config);
        let root = table.create(InodeType::Directory, &pool).unwrap();
        let (first, _) =
            lookup_or_create(&table, root, &pool, &config, "a", InodeType::File).unwrap();
        let (second, created) =
            lookup_or_create(&table, root, &pool, &config, "a", InodeType::File).unwrap();
        assert_eq!(first, second);
        assert!(!created);
    }

    #[test]
    fn directory_full_rolls_back_allocated_inode() {
        let mut config = FsConfig {
            max_file_name: 4,
            data_blocks: 32,
            inode_table_size: 32,
            inode_direct_refs: 1,
            ..FsConfig::DEFAULT
        };
        config.block_size = config.dir_entry_size() * 4;
        let pool = BlockPool::new(config);
        let table = InodeTable::new(config);
        let root = table.create(InodeType::Directory, &pool).unwrap();
        let max_entries = config.max_dir_entries();
        for i in 0..max_entries {
            let name = format!("{i}");
            lookup_or_create(&table, root, &pool, &config, &name, InodeType::File).unwrap();
        }
        let before = table.create(InodeType::File, &pool).unwrap();
        {
            let _table_guard = table.lock_table();
            table.delete_locked(before, &pool).unwrap();
        }
        let result = lookup_or_create(&table, root, &pool, &config, "over", InodeType::File);
        assert_eq!(result, Err(FsError::DirectoryFull));
        let reused = table.create(InodeType::File, &pool).unwrap();
        assert_eq!(reused, before, "the rolled-back slot must be reusable");
    }
}
