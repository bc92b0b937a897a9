use core::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};

/// Seed shared by every registry, so snapshots iterate in a stable order
/// from one run to the next.
const FIXED_HASH_STATE: FixedState = FixedState::with_seed(0x95EE04C4F326B271);

/// Hash state for stat name maps, based on `foldhash` with a fixed seed.
#[derive(Copy, Clone, Default, Debug)]
pub struct FixedHashState;

impl BuildHasher for FixedHashState {
    type Hasher = FoldHasher<'static>;

    #[inline(always)]
    fn build_hasher(&self) -> Self::Hasher {
        FIXED_HASH_STATE.build_hasher()
    }
}

#[cfg(test)]
mod tests {
    use super::FixedHashState;
    use core::hash::BuildHasher;

    #[test]
    fn hashes_are_stable() {
        let a = FixedHashState.hash_one("fuse.read_us");
        let b = FixedHashState.hash_one("fuse.read_us");
        assert_eq!(a, b);
        assert_ne!(a, FixedHashState.hash_one("fuse.write_us"));
    }
}
