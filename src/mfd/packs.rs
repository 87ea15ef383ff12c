//! ### Pack space allocator
//!
//! Each fixed pack keeps its track bitmap in memory (`PackInfo::bitmap`, set means allocated).
//! Permanent allocations are mirrored into the software bitmap (SMBT) sectors and the
//! available-track counter of pack sector 1.  Temporary allocations only touch memory, so they
//! are gone after a restart.

use bit_vec::BitVec;
use log::{debug,error,warn};
use crate::device::DeviceId;
use super::types::*;
use super::sector::{self,PackSector1};
use super::MfdState;

/// Everything the engine knows about a pack in the fixed pool
#[derive(Clone,Debug)]
pub struct PackInfo {
    pub name: String,
    pub index: PackIndex,
    pub device: DeviceId,
    pub fixed: bool,
    pub small_disk: bool,
    pub total_tracks: u64,
    pub prep_factor: usize,
    /// device track of directory track 0
    pub first_dir_track: u64,
    /// directory tracks in use
    pub dir_tracks: usize,
    /// set bit means allocated
    pub bitmap: BitVec,
    /// set bit means bad, present when the pack keeps a hardware bitmap
    pub bad: Option<BitVec>,
    pub available: u64
}

impl PackInfo {
    /// Free runs as (start,length), ascending
    pub fn free_runs(&self) -> Vec<(u64,u64)> {
        let mut ans = Vec::new();
        let mut start: Option<u64> = None;
        for t in 0..self.total_tracks {
            match (self.bitmap.get(t as usize),start) {
                (Some(false),None) => start = Some(t),
                (Some(true),Some(s)) => {
                    ans.push((s,t-s));
                    start = None;
                },
                _ => {}
            }
        }
        if let Some(s) = start {
            ans.push((s,self.total_tracks-s));
        }
        ans
    }
    pub fn is_allocated(&self,track: u64) -> bool {
        self.bitmap.get(track as usize).unwrap_or(true)
    }
    /// Directory sector address of pack sector 1
    pub fn sector1(&self) -> DirSectorAddr {
        DirSectorAddr::new(self.index,0,1)
    }
    pub fn smbt_first(&self) -> DirSectorAddr {
        DirSectorAddr::new(self.index,0,2)
    }
    pub fn hmbt_first(&self) -> Option<DirSectorAddr> {
        match self.bad {
            Some(_) => Some(DirSectorAddr::new(self.index,0,2+sector::bitmap_sectors(self.total_tracks))),
            None => None
        }
    }
}

/// Result of a track allocation
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct TrackGrant {
    pub pack: PackIndex,
    pub start: u64,
    pub count: u64
}

impl MfdState {
    pub(super) fn pack(&self,index: PackIndex) -> Result<&PackInfo> {
        match self.packs.get(&index) {
            Some(p) => Ok(p),
            None => Err(Error::NotFound)
        }
    }
    pub(super) fn pack_mut(&mut self,index: PackIndex) -> Result<&mut PackInfo> {
        match self.packs.get_mut(&index) {
            Some(p) => Ok(p),
            None => Err(Error::NotFound)
        }
    }
    /// Fixed packs in allocation order.  The preferred pack goes first, the rest are rotated
    /// on every call so that allocations spread across the pool.
    pub(super) fn candidate_packs(&mut self,preferred: Option<PackIndex>) -> Vec<PackIndex> {
        let mut pool: Vec<PackIndex> = self.packs.values().filter(|p| p.fixed).map(|p| p.index).collect();
        if pool.is_empty() {
            return pool;
        }
        let n = self.rotor % pool.len();
        self.rotor = self.rotor.wrapping_add(1);
        pool.rotate_left(n);
        if let Some(pref) = preferred {
            if let Some(pos) = pool.iter().position(|p| *p==pref) {
                let p = pool.remove(pos);
                pool.insert(0,p);
            }
        }
        pool
    }
    /// Three passes over the candidate packs, in order: a free run of exactly the requested size,
    /// then the first larger run, then the largest run anywhere (partial grant).
    pub(super) fn allocate_tracks(&mut self,requested: u64,candidates: &[PackIndex],temporary: bool) -> Result<TrackGrant> {
        if requested==0 {
            return inconsistent("allocation of zero tracks");
        }
        let mut runs: Vec<(PackIndex,Vec<(u64,u64)>)> = Vec::new();
        for idx in candidates {
            runs.push((*idx,self.pack(*idx)?.free_runs()));
        }
        let mut grant: Option<TrackGrant> = None;
        'exact: for (pack,list) in &runs {
            for (start,len) in list {
                if *len==requested {
                    grant = Some(TrackGrant { pack: *pack, start: *start, count: requested });
                    break 'exact;
                }
            }
        }
        if grant.is_none() {
            'larger: for (pack,list) in &runs {
                for (start,len) in list {
                    if *len > requested {
                        grant = Some(TrackGrant { pack: *pack, start: *start, count: requested });
                        break 'larger;
                    }
                }
            }
        }
        if grant.is_none() {
            for (pack,list) in &runs {
                for (start,len) in list {
                    let best = grant.map(|g| g.count).unwrap_or(0);
                    if *len > best {
                        grant = Some(TrackGrant { pack: *pack, start: *start, count: *len });
                    }
                }
            }
        }
        let g = match grant {
            Some(g) => g,
            None => {
                warn!("no free tracks on packs {:?}",candidates);
                return Err(Error::OutOfSpace);
            }
        };
        debug!("allocate {} tracks: pack {} track {} count {}",requested,g.pack,g.start,g.count);
        let pack = self.pack_mut(g.pack)?;
        for t in g.start..g.start+g.count {
            pack.bitmap.set(t as usize,true);
        }
        pack.available -= g.count;
        if !temporary {
            self.persist_run(g.pack,g.start,g.count,true)?;
        }
        Ok(g)
    }
    /// Free a run of tracks.  Tracks marked bad are left allocated.  This never fails, problems are logged.
    pub(super) fn deallocate_tracks(&mut self,pack_index: PackIndex,start: u64,count: u64,temporary: bool) {
        debug!("deallocate pack {} track {} count {}",pack_index,start,count);
        let pack = match self.packs.get_mut(&pack_index) {
            Some(p) => p,
            None => {
                error!("deallocate on unknown pack {}",pack_index);
                return;
            }
        };
        let end = u64::min(start.saturating_add(count),pack.total_tracks);
        if end < start.saturating_add(count) {
            error!("tracks beyond {} are past the end of pack {}",end,pack_index);
        }
        let mut freed: Vec<u64> = Vec::new();
        for t in start..end {
            let bad = match &pack.bad {
                Some(b) => b.get(t as usize).unwrap_or(false),
                None => false
            };
            if bad {
                // bad tracks stay allocated
                warn!("bad track {} of pack {} is not freed",t,pack_index);
                continue;
            }
            match pack.bitmap.get(t as usize) {
                Some(true) => {
                    pack.bitmap.set(t as usize,false);
                    freed.push(t);
                },
                _ => error!("track {} of pack {} is already free",t,pack_index)
            }
        }
        pack.available += freed.len() as u64;
        if !temporary {
            for t in freed {
                if let Err(e) = self.persist_run(pack_index,t,1,false) {
                    error!("could not update bitmap of pack {}: {}",pack_index,e);
                }
            }
        }
    }
    /// Mirror a run into the SMBT sectors and adjust the sector 1 counter
    fn persist_run(&mut self,pack_index: PackIndex,start: u64,count: u64,allocated: bool) -> Result<()> {
        let smbt = self.pack(pack_index)?.smbt_first();
        self.persist_bits(smbt,start,count,allocated)?;
        let s1_addr = DirSectorAddr::new(pack_index,0,1);
        let mut s1: PackSector1 = self.store.read(s1_addr)?;
        match allocated {
            true => s1.tracks_available = s1.tracks_available.saturating_sub(count),
            false => s1.tracks_available += count
        }
        self.store.write(s1_addr,&s1)
    }
    fn persist_bits(&mut self,first: DirSectorAddr,start: u64,count: u64,val: bool) -> Result<()> {
        for t in start..start+count {
            let (sec_off,w,bit) = sector::bitmap_position(t);
            let sec = self.store.stage_mut(first.with_sector(first.sector_index()+sec_off))?;
            sec[w] = crate::word::set_bit(sec[w],bit,val);
        }
        Ok(())
    }
    /// Record a bad track in the hardware bitmap.  The track is also taken out of the
    /// software bitmap so it is never granted.
    pub(super) fn mark_bad_track(&mut self,pack_index: PackIndex,track: u64) -> Result<()> {
        let pack = self.pack(pack_index)?;
        if track >= pack.total_tracks {
            return Err(Error::NotFound);
        }
        let hmbt = match pack.hmbt_first() {
            Some(a) => a,
            None => {
                warn!("pack {} keeps no hardware bitmap",pack_index);
                return Err(Error::NotFound);
            }
        };
        let was_allocated = pack.is_allocated(track);
        let pack = self.pack_mut(pack_index)?;
        if let Some(bad) = pack.bad.as_mut() {
            bad.set(track as usize,true);
        }
        self.persist_bits(hmbt,track,1,true)?;
        if !was_allocated {
            let pack = self.pack_mut(pack_index)?;
            pack.bitmap.set(track as usize,true);
            pack.available -= 1;
            self.persist_run(pack_index,track,1,true)?;
        }
        warn!("track {} of pack {} marked bad",track,pack_index);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn runs() {
        let mut bitmap = BitVec::from_elem(20,false);
        for t in [0,1,2,7,8,19] {
            bitmap.set(t,true);
        }
        let info = PackInfo {
            name: "T".to_string(),
            index: 1,
            device: 1,
            fixed: true,
            small_disk: true,
            total_tracks: 20,
            prep_factor: 28,
            first_dir_track: 1,
            dir_tracks: 1,
            bitmap,
            bad: None,
            available: 14
        };
        assert_eq!(info.free_runs(),vec![(3,4),(9,10)]);
        assert!(info.is_allocated(20));
    }
}
