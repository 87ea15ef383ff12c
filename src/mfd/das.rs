//! ### Directory sector allocator
//!
//! Directory sectors are handed out from the DAS chain of each fixed pack.  A DAS is sector 0 of
//! every 9th directory track and carries the device track and allocation mask of the 9 tracks in
//! its group.  When every track in the pool is full a new directory track is taken from the pack
//! space allocator; on a large disk the first track of a new group becomes the group's DAS.

use log::{debug,error,info};
use super::types::*;
use super::sector::{Das,DasEntry,PackSector1};
use super::store::TrackMapping;
use super::MfdState;

impl MfdState {
    /// Walk the DAS chain of a pack, returning the DAS addresses in order
    pub(super) fn das_chain(&self,pack: PackIndex) -> Result<Vec<DirSectorAddr>> {
        let mut ans = Vec::new();
        let mut curr = Some(DirSectorAddr::new(pack,0,0));
        while let Some(addr) = curr {
            if ans.contains(&addr) {
                return inconsistent(&format!("DAS chain of pack {} loops at {}",pack,addr));
            }
            ans.push(addr);
            let das: Das = self.store.read(addr)?;
            curr = das.next;
        }
        Ok(ans)
    }
    /// Take the lowest free sector of the first directory track with space on this pack
    fn take_free_sector(&mut self,pack: PackIndex) -> Result<Option<DirSectorAddr>> {
        for das_addr in self.das_chain(pack)? {
            let mut das: Das = self.store.read(das_addr)?;
            for i in 0..TRACKS_PER_DAS {
                if let Some(s) = das.entries[i].first_free() {
                    das.entries[i].set_allocated(s,true);
                    self.store.write(das_addr,&das)?;
                    let addr = DirSectorAddr::new(pack,das_addr.track_index()+i,s);
                    debug!("directory sector {} allocated",addr);
                    return Ok(Some(addr));
                }
            }
        }
        Ok(None)
    }
    /// Add a directory track to a pack.  Returns false if the pack cannot take another track.
    fn add_directory_track(&mut self,pack_index: PackIndex) -> Result<bool> {
        let (small,dir_tracks,device,prep) = {
            let p = self.pack(pack_index)?;
            (p.small_disk,p.dir_tracks,p.device,p.prep_factor)
        };
        if small && dir_tracks >= TRACKS_PER_DAS {
            return Ok(false);
        }
        let grant = match self.allocate_tracks(1,&[pack_index],false) {
            Ok(g) => g,
            Err(Error::OutOfSpace) => return Ok(false),
            Err(e) => return Err(e)
        };
        let track = dir_tracks;
        let mapping = TrackMapping { device, device_track: grant.start, prep_factor: prep };
        self.store.establish_track(pack_index,track,mapping,true);
        let slot = track % TRACKS_PER_DAS;
        let das_addr = DirSectorAddr::new(pack_index,track-slot,0);
        if slot==0 {
            // new group, sector 0 of the new track is its DAS
            let mut das = Das::new();
            das.entries[0] = DasEntry { device_track: Some(grant.start), mask: 0 };
            das.entries[0].set_allocated(0,true);
            self.store.write(das_addr,&das)?;
            let chain = self.das_chain(pack_index)?;
            let tail = chain[chain.len()-1];
            if tail==das_addr {
                return inconsistent("new DAS is already on the chain");
            }
            let mut tail_das: Das = self.store.read(tail)?;
            tail_das.next = Some(das_addr);
            self.store.write(tail,&tail_das)?;
            info!("pack {} new DAS at {}",pack_index,das_addr);
        } else {
            let mut das: Das = self.store.read(das_addr)?;
            if das.entries[slot].device_track.is_some() {
                return inconsistent(&format!("DAS {} slot {} is already in use",das_addr,slot));
            }
            das.entries[slot] = DasEntry { device_track: Some(grant.start), mask: 0 };
            self.store.write(das_addr,&das)?;
        }
        let s1_addr = DirSectorAddr::new(pack_index,0,1);
        let mut s1: PackSector1 = self.store.read(s1_addr)?;
        s1.dir_track_count = track + 1;
        self.store.write(s1_addr,&s1)?;
        self.pack_mut(pack_index)?.dir_tracks = track + 1;
        info!("pack {} directory track {} at device track {}",pack_index,track,grant.start);
        Ok(true)
    }
    /// Allocate one directory sector, preferring a pack.  Existing directory tracks on every
    /// fixed pack are tried before a new track is added anywhere.
    pub(super) fn allocate_directory_sector(&mut self,preferred: Option<PackIndex>) -> Result<DirSectorAddr> {
        let candidates = self.candidate_packs(preferred);
        if candidates.is_empty() {
            error!("no fixed packs for directory allocation");
            return Err(Error::OutOfSpace);
        }
        for pack in &candidates {
            if let Some(addr) = self.take_free_sector(*pack)? {
                return Ok(addr);
            }
        }
        for pack in &candidates {
            if self.add_directory_track(*pack)? {
                return match self.take_free_sector(*pack)? {
                    Some(addr) => Ok(addr),
                    None => inconsistent("new directory track has no free sector")
                };
            }
        }
        Err(Error::OutOfSpace)
    }
    /// Return a directory sector to its DAS.  The content is zeroed.
    pub(super) fn deallocate_directory_sector(&mut self,addr: DirSectorAddr) -> Result<()> {
        let das_addr = addr.das();
        if addr==das_addr {
            return inconsistent(&format!("attempt to free DAS {}",addr));
        }
        if addr.track_index()==0 && addr.sector_index() < 2 {
            return inconsistent(&format!("attempt to free pack sector {}",addr));
        }
        let mut das: Das = self.store.read(das_addr)?;
        let slot = addr.track_index() % TRACKS_PER_DAS;
        if !das.entries[slot].is_allocated(addr.sector_index()) {
            return inconsistent(&format!("directory sector {} is already free",addr));
        }
        das.entries[slot].set_allocated(addr.sector_index(),false);
        self.store.write(das_addr,&das)?;
        self.store.clear(addr)?;
        debug!("directory sector {} freed",addr);
        Ok(())
    }
    /// Free directory sectors across the pool
    pub(super) fn free_directory_sectors(&self) -> Result<usize> {
        let mut ans = 0;
        for (idx,p) in &self.packs {
            if !p.fixed {
                continue;
            }
            for das_addr in self.das_chain(*idx)? {
                let das: Das = self.store.read(das_addr)?;
                ans += das.entries.iter().map(|e| e.free_count()).sum::<usize>();
            }
        }
        Ok(ans)
    }
}
