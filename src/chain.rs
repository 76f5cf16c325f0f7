use crate::block::Block;
use crate::error::StoreError;
use crate::store::ObjectStore;

/// Computes the height of a block given its parent, consulting the
/// store for the parent's height (§3, §4.7).
pub fn height_of(block: &Block, store: &ObjectStore) -> Result<u64, StoreError> {
    match &block.previd {
        None => Ok(0),
        Some(previd) => Ok(store.get_height(previd)? + 1),
    }
}

/// Decides whether `height` makes its block the new chaintip: strictly
/// greater height than the current tip, or no tip at all yet. Ties are
/// broken by first-seen — the existing chaintip is kept (§3, §4.7).
pub fn is_new_chaintip(height: u64, store: &ObjectStore) -> Result<bool, StoreError> {
    match store.get_chaintip()? {
        None => Ok(true),
        Some(current_tip) => {
            let current_height = store.get_height(&current_tip)?;
            Ok(current_height < height)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_height_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let genesis = Block::genesis();
        assert_eq!(height_of(&genesis, &store).unwrap(), 0);
    }

    #[test]
    fn strictly_greater_height_replaces_tip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        assert!(!is_new_chaintip(0, &store).unwrap());
        assert!(is_new_chaintip(1, &store).unwrap());
    }
}
