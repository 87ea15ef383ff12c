//! ### Sector store
//!
//! The whole directory is memory resident.  Sectors are staged from the cache by address,
//! never from the device.  Staging for update puts the address in the pending set, and a
//! commit later writes every block that holds a pending sector, whole, from the cache.

use std::collections::{BTreeMap,BTreeSet,HashMap};
use log::{debug,trace};
use crate::device::DeviceId;
use crate::word::Word;
use super::types::*;
use super::sector::{Sector,DirRecord,EMPTY_SECTOR};

/// Where a directory track lives on the device
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct TrackMapping {
    pub device: DeviceId,
    pub device_track: u64,
    /// words per block
    pub prep_factor: usize
}

impl TrackMapping {
    pub fn sectors_per_block(&self) -> usize {
        self.prep_factor / WORDS_PER_SECTOR
    }
    pub fn blocks_per_track(&self) -> u64 {
        (WORDS_PER_TRACK / self.prep_factor) as u64
    }
    /// Device block holding a given sector of this track
    pub fn block_of(&self,sector: usize) -> u64 {
        self.device_track * self.blocks_per_track() + (sector / self.sectors_per_block()) as u64
    }
}

/// One block write produced by a commit
#[derive(Clone,Debug)]
pub struct BlockWrite {
    pub device: DeviceId,
    pub block_id: u64,
    /// first sector in the block
    pub first: DirSectorAddr,
    pub words: Vec<Word>
}

/// Cache of directory sectors keyed by address, with the pending-commit set
pub struct SectorStore {
    sectors: BTreeMap<DirSectorAddr,Sector>,
    pending: BTreeSet<DirSectorAddr>,
    tracks: HashMap<(PackIndex,usize),TrackMapping>
}

impl SectorStore {
    pub fn new() -> Self {
        Self {
            sectors: BTreeMap::new(),
            pending: BTreeSet::new(),
            tracks: HashMap::new()
        }
    }
    /// Bring a directory track into the cache as 64 zero sectors.
    /// If `pending` the whole track will be written at the next commit.
    pub fn establish_track(&mut self,pack: PackIndex,track: usize,mapping: TrackMapping,pending: bool) {
        debug!("establish directory track {} of pack {} at device track {}",track,pack,mapping.device_track);
        self.tracks.insert((pack,track),mapping);
        for s in 0..SECTORS_PER_TRACK {
            let addr = DirSectorAddr::new(pack,track,s);
            self.sectors.insert(addr,EMPTY_SECTOR);
            if pending {
                self.pending.insert(addr);
            }
        }
    }
    /// Forget every sector of a pack, used when a pack is taken down during bring-up
    pub fn discard_pack(&mut self,pack: PackIndex) {
        self.sectors.retain(|a,_| a.pack_index()!=pack);
        self.pending.retain(|a| a.pack_index()!=pack);
        self.tracks.retain(|k,_| k.0!=pack);
    }
    pub fn mapping(&self,addr: DirSectorAddr) -> Option<TrackMapping> {
        self.tracks.get(&(addr.pack_index(),addr.track_index())).copied()
    }
    pub fn contains(&self,addr: DirSectorAddr) -> bool {
        self.sectors.contains_key(&addr)
    }
    /// Stage a sector for reading
    pub fn stage(&self,addr: DirSectorAddr) -> Result<&Sector> {
        match self.sectors.get(&addr) {
            Some(sec) => Ok(sec),
            None => Err(Error::NotInCache(addr))
        }
    }
    /// Stage a sector for update, the address joins the pending set
    pub fn stage_mut(&mut self,addr: DirSectorAddr) -> Result<&mut Sector> {
        match self.sectors.get_mut(&addr) {
            Some(sec) => {
                self.pending.insert(addr);
                Ok(sec)
            },
            None => Err(Error::NotInCache(addr))
        }
    }
    pub fn read<T: DirRecord>(&self,addr: DirSectorAddr) -> Result<T> {
        Ok(T::from_sector(self.stage(addr)?))
    }
    /// Encode a record into a sector.  The sector is only marked pending if its content changes.
    pub fn write<T: DirRecord>(&mut self,addr: DirSectorAddr,rec: &T) -> Result<()> {
        let new_sec = rec.to_sector();
        if self.stage(addr)? == &new_sec {
            trace!("sector {} unchanged",addr);
            return Ok(());
        }
        *self.stage_mut(addr)? = new_sec;
        Ok(())
    }
    /// Zero a sector and mark it
    pub fn clear(&mut self,addr: DirSectorAddr) -> Result<()> {
        *self.stage_mut(addr)? = EMPTY_SECTOR;
        Ok(())
    }
    pub fn is_pending(&self,addr: DirSectorAddr) -> bool {
        self.pending.contains(&addr)
    }
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
    /// Group the pending sectors by device block.  Each block is rebuilt from the cache,
    /// siblings included.  Blocks come out in ascending address order.
    pub fn pending_blocks(&self) -> Result<Vec<BlockWrite>> {
        let mut ans: Vec<BlockWrite> = Vec::new();
        let mut seen: BTreeSet<(PackIndex,usize,u64)> = BTreeSet::new();
        for addr in &self.pending {
            let mapping = match self.mapping(*addr) {
                Some(m) => m,
                None => return Err(Error::NotInCache(*addr))
            };
            let spb = mapping.sectors_per_block();
            let block_id = mapping.block_of(addr.sector_index());
            if !seen.insert((addr.pack_index(),addr.track_index(),block_id)) {
                continue;
            }
            let first = addr.with_sector(addr.sector_index() - addr.sector_index() % spb);
            let mut words = Vec::with_capacity(mapping.prep_factor);
            for s in first.sector_index()..first.sector_index()+spb {
                words.extend_from_slice(self.stage(addr.with_sector(s))?);
            }
            ans.push(BlockWrite {
                device: mapping.device,
                block_id,
                first,
                words
            });
        }
        Ok(ans)
    }
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
    pub fn clear_pending_for(&mut self,pack: PackIndex) {
        self.pending.retain(|a| a.pack_index()!=pack);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mfd::sector::Das;

    fn mapping(prep: usize) -> TrackMapping {
        TrackMapping { device: 1, device_track: 3, prep_factor: prep }
    }

    #[test]
    fn staging() {
        let mut store = SectorStore::new();
        let addr = DirSectorAddr::new(1,0,4);
        assert_eq!(store.stage(addr),Err(Error::NotInCache(addr)));
        store.establish_track(1,0,mapping(112),false);
        assert_eq!(store.pending_count(),0);
        let das = Das::new();
        store.write(addr,&das).expect("write failed");
        assert!(store.is_pending(addr));
        store.clear_pending();
        store.write(addr,&das).expect("write failed");
        assert_eq!(store.pending_count(),0);
    }

    #[test]
    fn block_grouping() {
        let mut store = SectorStore::new();
        store.establish_track(1,0,mapping(112),false);
        store.stage_mut(DirSectorAddr::new(1,0,6)).expect("stage failed")[0] = 0o77;
        store.stage_mut(DirSectorAddr::new(1,0,5)).expect("stage failed");
        store.stage_mut(DirSectorAddr::new(1,0,63)).expect("stage failed");
        let blocks = store.pending_blocks().expect("grouping failed");
        assert_eq!(blocks.len(),2);
        // 4 sectors per block, 16 blocks per track, device track 3
        assert_eq!(blocks[0].block_id,3*16+1);
        assert_eq!(blocks[0].first,DirSectorAddr::new(1,0,4));
        assert_eq!(blocks[0].words.len(),112);
        assert_eq!(blocks[0].words[56],0o77);
        assert_eq!(blocks[1].block_id,3*16+15);
    }
}
