//! # MFD Module
//!
//! The Master File Directory engine.  The directory is a tree of 28-word sectors spread over
//! the fixed packs:
//! * `store` - the sector cache and its pending-commit set
//! * `packs` - per-pack track bitmaps, the pack space allocator
//! * `das` - the directory sector allocator
//! * `catalog` - lookup table, search items, lead items and main items
//! * `extents` - extent tables of assigned files and their DAD chains
//! * `bringup` - label checks and cold-start formatting of fixed packs
//!
//! All state lives in `MfdState` behind a single mutex held by `Mfd`.  Every public operation
//! takes the lock for its whole duration, so operations are serialized.  Changes collect in the
//! cache until `commit` is called; a caller can batch several operations into one commit.
//!
//! ```rs
//! let mfd = Mfd::new(Box::new(channel),Box::new(LogConsole::new(0)),Tunables::default());
//! mfd.bring_up(&[PackSpec { device: 1, fixed: true }])?;
//! let lead = mfd.create_file_set(&FileSetParams::new("SYS$","TESTFILE"))?;
//! let main = mfd.create_file_cycle(lead,&FileCycleParams::new(1))?;
//! mfd.commit()?;
//! ```

pub mod types;
pub mod sector;
pub mod store;
pub mod packs;
pub mod das;
pub mod catalog;
pub mod extents;
pub mod bringup;
pub mod display;
mod io;

use std::collections::{BTreeMap,HashMap};
use std::sync::{Mutex,MutexGuard};
use bit_vec::BitVec;
use log::{error,info,warn};
use crate::device::DeviceId;
use crate::device::channel::{Channel,CancelToken};
use crate::console::Console;

pub use types::{Error,Result,DirSectorAddr,PackIndex,FileType,Tunables};
pub use catalog::{FileSetParams,FileCycleParams,FileSetInfo,FileCycleInfo,DropOutcome};
pub use extents::{Extent,FileId};
pub use packs::TrackGrant;
pub use bringup::{PackSpec,PackUp,BringUpReport};

/// Snapshot of one fixed pack
#[derive(Clone,Debug,PartialEq)]
pub struct PackSummary {
    pub index: PackIndex,
    pub name: String,
    pub device: DeviceId,
    pub small_disk: bool,
    pub total_tracks: u64,
    pub available_tracks: u64,
    pub bad_tracks: u64,
    pub directory_tracks: usize,
    pub prep_factor: usize
}

/// Engine state, only reachable through the lock in `Mfd`
pub struct MfdState {
    store: store::SectorStore,
    packs: BTreeMap<PackIndex,packs::PackInfo>,
    /// (device, pack name) of packs outside the fixed pool
    removable: Vec<(DeviceId,String)>,
    lookup: Vec<Option<DirSectorAddr>>,
    assigned: HashMap<DirSectorAddr,extents::AssignedFile>,
    temporary: HashMap<u32,extents::FileAllocationTable>,
    next_temp: u32,
    rotor: usize,
    channel: Box<dyn Channel>,
    console: Box<dyn Console>,
    cancel: CancelToken,
    tunables: Tunables,
    terminating: bool
}

/// The MFD engine
pub struct Mfd {
    state: Mutex<MfdState>,
    cancel: CancelToken
}

impl Mfd {
    pub fn new(channel: Box<dyn Channel>,console: Box<dyn Console>,tunables: Tunables) -> Self {
        let cancel = CancelToken::new();
        let lookup_size = usize::max(tunables.lookup_table_size,1);
        Self {
            state: Mutex::new(MfdState {
                store: store::SectorStore::new(),
                packs: BTreeMap::new(),
                removable: Vec::new(),
                lookup: vec![None;lookup_size],
                assigned: HashMap::new(),
                temporary: HashMap::new(),
                next_temp: 0,
                rotor: 0,
                channel,
                console,
                cancel: cancel.clone(),
                tunables,
                terminating: false
            }),
            cancel
        }
    }
    fn lock(&self) -> Result<MutexGuard<'_,MfdState>> {
        let guard = match self.state.lock() {
            Ok(g) => g,
            Err(_) => {
                error!("engine lock is poisoned");
                return Err(Error::InternalInconsistency("engine lock is poisoned".to_string()));
            }
        };
        if guard.terminating {
            return Err(Error::Terminating);
        }
        Ok(guard)
    }
    /// Token another thread can use to cancel the device request the engine is blocked on.
    /// The engine clears it once the canceled request has failed.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
    /// Cold-start the given devices.  Devices that fail are reported as down.
    pub fn bring_up(&self,packs: &[PackSpec]) -> Result<BringUpReport> {
        self.lock()?.bring_up(packs)
    }
    /// Write all pending directory sectors, returns the number of blocks written
    pub fn commit(&self) -> Result<usize> {
        self.lock()?.commit_pending(None)
    }
    /// Commit what is pending, after which every operation fails with `Terminating`
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.lock()?;
        let res = state.commit_pending(None);
        state.terminating = true;
        if !state.assigned.is_empty() {
            warn!("{} files still assigned at shutdown",state.assigned.len());
        }
        info!("engine terminating");
        res.map(|_| ())
    }
    /// Take back the channel, e.g. to save the devices
    pub fn into_channel(self) -> Box<dyn Channel> {
        match self.state.into_inner() {
            Ok(state) => state.channel,
            Err(poisoned) => poisoned.into_inner().channel
        }
    }
    pub fn find(&self,qualifier: &str,filename: &str) -> Result<DirSectorAddr> {
        self.lock()?.find(qualifier,filename)
    }
    /// Returns the lead item address
    pub fn create_file_set(&self,params: &FileSetParams) -> Result<DirSectorAddr> {
        self.lock()?.create_file_set(params)
    }
    /// Returns the address of main item sector 0
    pub fn create_file_cycle(&self,lead: DirSectorAddr,params: &FileCycleParams) -> Result<DirSectorAddr> {
        self.lock()?.create_file_cycle(lead,params)
    }
    pub fn drop_file_cycle(&self,main: DirSectorAddr,commit: bool) -> Result<DropOutcome> {
        let mut state = self.lock()?;
        let outcome = state.drop_file_cycle(main)?;
        if commit {
            state.commit_pending(None)?;
        }
        Ok(outcome)
    }
    pub fn drop_file_set(&self,lead: DirSectorAddr) -> Result<DropOutcome> {
        self.lock()?.drop_file_set(lead)
    }
    pub fn set_output_queued(&self,main: DirSectorAddr,queued: bool) -> Result<()> {
        self.lock()?.set_output_queued(main,queued)
    }
    pub fn assign(&self,main: DirSectorAddr) -> Result<FileId> {
        self.lock()?.assign(main)
    }
    /// Returns true if the release carried out a deferred drop
    pub fn release(&self,file: FileId) -> Result<bool> {
        self.lock()?.release(file)
    }
    pub fn create_temporary_file(&self) -> Result<FileId> {
        Ok(self.lock()?.create_temporary_file())
    }
    /// Give storage to file-relative tracks [first,first+count) that have none.
    /// Returns the number of tracks newly allocated.
    pub fn allocate_file_tracks(&self,file: FileId,first: u64,count: u64) -> Result<u64> {
        self.lock()?.allocate_file_tracks(file,first,count)
    }
    /// Release storage of file-relative tracks [first,first+count).
    /// Returns the number of tracks released.
    pub fn release_file_tracks(&self,file: FileId,first: u64,count: u64) -> Result<u64> {
        self.lock()?.release_file_tracks(file,first,count)
    }
    pub fn extents(&self,file: FileId) -> Result<Vec<Extent>> {
        self.lock()?.extents(file)
    }
    /// Allocate a run of tracks from the listed packs, or the whole fixed pool if the list is empty
    pub fn allocate_tracks(&self,requested: u64,packs: &[PackIndex],temporary: bool) -> Result<TrackGrant> {
        let mut state = self.lock()?;
        let candidates = match packs.is_empty() {
            true => state.candidate_packs(None),
            false => packs.to_vec()
        };
        state.allocate_tracks(requested,&candidates,temporary)
    }
    pub fn deallocate_tracks(&self,pack: PackIndex,start: u64,count: u64,temporary: bool) -> Result<()> {
        self.lock()?.deallocate_tracks(pack,start,count,temporary);
        Ok(())
    }
    pub fn allocate_directory_sector(&self,preferred: Option<PackIndex>) -> Result<DirSectorAddr> {
        self.lock()?.allocate_directory_sector(preferred)
    }
    pub fn deallocate_directory_sector(&self,addr: DirSectorAddr) -> Result<()> {
        self.lock()?.deallocate_directory_sector(addr)
    }
    pub fn free_directory_sectors(&self) -> Result<usize> {
        self.lock()?.free_directory_sectors()
    }
    pub fn mark_bad_track(&self,pack: PackIndex,track: u64) -> Result<()> {
        self.lock()?.mark_bad_track(pack,track)
    }
    pub fn pack_index(&self,name: &str) -> Result<PackIndex> {
        let state = self.lock()?;
        match state.packs.values().find(|p| p.name.eq_ignore_ascii_case(name)) {
            Some(p) => Ok(p.index),
            None => Err(Error::NotFound)
        }
    }
    pub fn pack_summaries(&self) -> Result<Vec<PackSummary>> {
        let state = self.lock()?;
        Ok(state.packs.values().map(|p| PackSummary {
            index: p.index,
            name: p.name.clone(),
            device: p.device,
            small_disk: p.small_disk,
            total_tracks: p.total_tracks,
            available_tracks: p.available,
            bad_tracks: match &p.bad {
                Some(b) => b.iter().filter(|x| *x).count() as u64,
                None => 0
            },
            directory_tracks: p.dir_tracks,
            prep_factor: p.prep_factor
        }).collect())
    }
    /// Available-track counter of pack sector 1, as it stands in the cache
    pub fn recorded_available(&self,pack: PackIndex) -> Result<u64> {
        let state = self.lock()?;
        let s1: sector::PackSector1 = state.store.read(state.pack(pack)?.sector1())?;
        Ok(s1.tracks_available)
    }
    /// Track bitmap held in memory, set means allocated
    pub fn track_bitmap(&self,pack: PackIndex) -> Result<BitVec> {
        Ok(self.lock()?.pack(pack)?.bitmap.clone())
    }
    /// Track bitmap read from the device
    pub fn persisted_bitmap(&self,pack: PackIndex) -> Result<BitVec> {
        self.lock()?.persisted_bitmap(pack)
    }
    pub fn file_set_info(&self,lead: DirSectorAddr) -> Result<FileSetInfo> {
        self.lock()?.file_set_info(lead)
    }
    pub fn file_cycle_info(&self,main: DirSectorAddr) -> Result<FileCycleInfo> {
        self.lock()?.file_cycle_info(main)
    }
    pub fn catalog(&self) -> Result<Vec<FileSetInfo>> {
        self.lock()?.catalog()
    }
    /// Sectors waiting for a commit
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.lock()?.store.pending_count())
    }
    /// Raw copy of a cached directory sector
    pub fn sector(&self,addr: DirSectorAddr) -> Result<sector::Sector> {
        Ok(*self.lock()?.store.stage(addr)?)
    }
}
