//! ### Catalog chain
//!
//! A file set is found by hashing its qualifier and filename into the lookup table, which
//! holds the head of a chain of search items.  Each search entry points at the lead item of a
//! file set, and the lead item holds links to the main items of its cycles, slot 0 being the
//! highest absolute cycle and slot `n` the cycle `n` below it.

use log::{debug,error,info,trace};
use crate::word::{self,Word};
use super::types::*;
use super::sector::{SearchItem,SearchEntry,LeadItem,LeadItem1,MainItem,MainItem1,ReelTable,DadSector};
use super::MfdState;

/// Parameters of a new file set
#[derive(Clone,Debug)]
pub struct FileSetParams {
    pub qualifier: String,
    pub filename: String,
    pub project: String,
    pub read_key: String,
    pub write_key: String,
    pub file_type: FileType,
    pub guarded: bool,
    /// None takes the engine default
    pub max_range: Option<usize>
}

impl FileSetParams {
    pub fn new(qualifier: &str,filename: &str) -> Self {
        Self {
            qualifier: qualifier.to_string(),
            filename: filename.to_string(),
            project: String::new(),
            read_key: String::new(),
            write_key: String::new(),
            file_type: FileType::MassStorage,
            guarded: false,
            max_range: None
        }
    }
}

/// Parameters of a new file cycle
#[derive(Clone,Debug)]
pub struct FileCycleParams {
    pub absolute_cycle: u32,
    pub account: String,
    /// tracks
    pub initial_reserve: u64,
    /// tracks, 0 means no limit
    pub max_granules: u64,
    pub guarded: bool,
    pub read_only: bool,
    pub write_only: bool,
    /// tape files only
    pub reels: Vec<String>
}

impl FileCycleParams {
    pub fn new(absolute_cycle: u32) -> Self {
        Self {
            absolute_cycle,
            account: String::new(),
            initial_reserve: 0,
            max_granules: 0,
            guarded: false,
            read_only: false,
            write_only: false,
            reels: Vec::new()
        }
    }
}

/// What `drop_file_cycle` ended up doing
#[derive(Clone,Copy,Debug,PartialEq)]
pub enum DropOutcome {
    /// the cycle is assigned, it was flagged to be dropped at release
    Deferred,
    CycleDropped,
    /// the last cycle went, and the file set with it
    SetDropped
}

/// Summary of a file set
#[derive(Clone,Debug,PartialEq)]
pub struct FileSetInfo {
    pub lead: DirSectorAddr,
    pub qualifier: String,
    pub filename: String,
    pub project: String,
    pub file_type: FileType,
    pub guarded: bool,
    pub highest_cycle: u32,
    pub cycle_count: usize,
    pub current_range: usize,
    pub max_range: usize,
    /// (absolute cycle, main item), highest first
    pub cycles: Vec<(u32,DirSectorAddr)>
}

/// Summary of a file cycle
#[derive(Clone,Debug,PartialEq)]
pub struct FileCycleInfo {
    pub main: DirSectorAddr,
    pub lead: Option<DirSectorAddr>,
    pub qualifier: String,
    pub filename: String,
    pub project: String,
    pub account: String,
    pub absolute_cycle: u32,
    pub file_type: FileType,
    pub assign_count: u32,
    pub guarded: bool,
    pub output_queued: bool,
    pub to_be_dropped: bool,
    pub initial_reserve: u64,
    pub max_granules: u64,
    pub highest_granule: u64,
    pub tracks_allocated: u64,
    pub created: chrono::DateTime<chrono::Utc>,
    pub last_assigned: Option<chrono::DateTime<chrono::Utc>>,
    pub reels: Vec<String>
}

/// Encode a catalog name, upper case, space filled
pub fn encode_name(s: &str,words: usize,allow_empty: bool) -> Result<Vec<Word>> {
    let trimmed = s.trim();
    if trimmed.is_empty() && !allow_empty {
        return Err(Error::InvalidName);
    }
    match word::to_fieldata(trimmed,words) {
        Some(v) => Ok(v),
        None => {
            debug!("name `{}` is not valid",s);
            Err(Error::InvalidName)
        }
    }
}

fn name2(s: &str,allow_empty: bool) -> Result<[Word;2]> {
    let v = encode_name(s,2,allow_empty)?;
    Ok([v[0],v[1]])
}

fn key(s: &str) -> Result<Word> {
    Ok(encode_name(s,1,true)?[0])
}

pub fn now_seconds() -> Word {
    chrono::Utc::now().timestamp().max(0) as Word
}

pub fn from_seconds(w: Word) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(w as i64,0).unwrap_or_default()
}

impl MfdState {
    fn lookup_slot(&self,qualifier: &[Word;2],filename: &[Word;2]) -> usize {
        let folded = qualifier[0] ^ qualifier[1] ^ filename[0] ^ filename[1];
        (folded % self.lookup.len() as Word) as usize
    }
    /// Find the search item and entry index holding a file set
    fn find_entry(&self,qualifier: &[Word;2],filename: &[Word;2]) -> Result<Option<(DirSectorAddr,usize,SearchEntry)>> {
        let mut curr = self.lookup[self.lookup_slot(qualifier,filename)];
        while let Some(addr) = curr {
            let item: SearchItem = self.store.read(addr)?;
            for (i,e) in item.entries.iter().enumerate() {
                if let Some(entry) = e {
                    if &entry.qualifier==qualifier && &entry.filename==filename {
                        return Ok(Some((addr,i,*entry)));
                    }
                }
            }
            curr = item.next;
        }
        Ok(None)
    }
    pub(super) fn find(&self,qualifier: &str,filename: &str) -> Result<DirSectorAddr> {
        let q = name2(qualifier,false)?;
        let f = name2(filename,false)?;
        match self.find_entry(&q,&f)? {
            Some((_,_,entry)) => Ok(entry.lead),
            None => Err(Error::NotFound)
        }
    }
    fn insert_lookup_entry(&mut self,entry: SearchEntry) -> Result<()> {
        let slot = self.lookup_slot(&entry.qualifier,&entry.filename);
        let mut curr = self.lookup[slot];
        while let Some(addr) = curr {
            let mut item: SearchItem = self.store.read(addr)?;
            if let Some(i) = item.entries.iter().position(|e| e.is_none()) {
                item.entries[i] = Some(entry);
                trace!("search item {} entry {}",addr,i);
                return self.store.write(addr,&item);
            }
            curr = item.next;
        }
        let addr = self.allocate_directory_sector(Some(entry.lead.pack_index()))?;
        let mut item = SearchItem::new();
        item.entries[0] = Some(entry);
        item.next = self.lookup[slot];
        self.store.write(addr,&item)?;
        self.lookup[slot] = Some(addr);
        debug!("new search item {} heads lookup slot {}",addr,slot);
        Ok(())
    }
    fn remove_lookup_entry(&mut self,qualifier: &[Word;2],filename: &[Word;2]) -> Result<()> {
        let (addr,idx,_) = match self.find_entry(qualifier,filename)? {
            Some(x) => x,
            None => return inconsistent("file set has no search entry")
        };
        let mut item: SearchItem = self.store.read(addr)?;
        item.entries[idx] = None;
        if !item.is_empty() {
            return self.store.write(addr,&item);
        }
        // unlink the empty search item, then free it
        let slot = self.lookup_slot(qualifier,filename);
        if self.lookup[slot]==Some(addr) {
            self.lookup[slot] = item.next;
        } else {
            let mut curr = self.lookup[slot];
            loop {
                let prev = match curr {
                    Some(a) => a,
                    None => return inconsistent("search item is not on its chain")
                };
                let mut prev_item: SearchItem = self.store.read(prev)?;
                if prev_item.next==Some(addr) {
                    prev_item.next = item.next;
                    self.store.write(prev,&prev_item)?;
                    break;
                }
                curr = prev_item.next;
            }
        }
        self.deallocate_directory_sector(addr)
    }
    pub(super) fn create_file_set(&mut self,params: &FileSetParams) -> Result<DirSectorAddr> {
        let qualifier = name2(&params.qualifier,false)?;
        let filename = name2(&params.filename,false)?;
        let project = name2(&params.project,true)?;
        let read_key = key(&params.read_key)?;
        let write_key = key(&params.write_key)?;
        if self.find_entry(&qualifier,&filename)?.is_some() {
            return Err(Error::NameConflict);
        }
        let max_range = usize::min(params.max_range.unwrap_or(self.tunables.max_cycle_range),MAX_CYCLE_SLOTS);
        if max_range==0 {
            return Err(Error::InvalidCycle);
        }
        let lead_addr = self.allocate_directory_sector(None)?;
        let lead = LeadItem {
            qualifier,
            filename,
            project,
            read_key,
            write_key,
            file_type: params.file_type,
            guarded: params.guarded,
            change_in_progress: false,
            max_range,
            current_range: 0,
            cycle_count: 0,
            highest_cycle: 0,
            sector1: None,
            links: [None;LEAD0_SLOTS]
        };
        self.store.write(lead_addr,&lead)?;
        self.insert_lookup_entry(SearchEntry { qualifier, filename, lead: lead_addr })?;
        info!("file set {}*{} created, lead item {}",params.qualifier.to_uppercase(),params.filename.to_uppercase(),lead_addr);
        Ok(lead_addr)
    }
    /// Lead item with the links of both sectors gathered in slot order
    pub(super) fn read_lead(&self,lead_addr: DirSectorAddr) -> Result<(LeadItem,Vec<Option<DirSectorAddr>>)> {
        let lead: LeadItem = self.store.read(lead_addr)?;
        let mut links = vec![None;MAX_CYCLE_SLOTS];
        links[0..LEAD0_SLOTS].copy_from_slice(&lead.links);
        if let Some(s1) = lead.sector1 {
            let lead1: LeadItem1 = self.store.read(s1)?;
            if lead1.back!=Some(lead_addr) {
                return inconsistent(&format!("lead item sector {} does not point back to {}",s1,lead_addr));
            }
            links[LEAD0_SLOTS..].copy_from_slice(&lead1.links);
        }
        Ok((lead,links))
    }
    /// Write a lead item and its links.  Sector 1 must already exist if any slot past sector 0
    /// is in range; it is freed here when the range no longer needs it.
    fn write_lead(&mut self,lead_addr: DirSectorAddr,mut lead: LeadItem,links: &[Option<DirSectorAddr>]) -> Result<()> {
        lead.links.copy_from_slice(&links[0..LEAD0_SLOTS]);
        match (lead.sector1,lead.current_range > LEAD0_SLOTS) {
            (Some(s1),true) => {
                let mut lead1 = LeadItem1 { back: Some(lead_addr), links: [None;LEAD1_SLOTS] };
                lead1.links.copy_from_slice(&links[LEAD0_SLOTS..MAX_CYCLE_SLOTS]);
                self.store.write(s1,&lead1)?;
            },
            (Some(s1),false) => {
                if links[LEAD0_SLOTS..].iter().any(|l| l.is_some()) {
                    return inconsistent("link beyond the current range");
                }
                self.deallocate_directory_sector(s1)?;
                lead.sector1 = None;
                debug!("lead item sector {} released",s1);
            },
            (None,true) => return inconsistent("lead item needs sector 1"),
            (None,false) => {}
        }
        self.store.write(lead_addr,&lead)
    }
    /// Decide where an absolute cycle goes: (new highest, new range, shift, slot)
    fn place_cycle(&self,lead: &LeadItem,links: &[Option<DirSectorAddr>],cycle: u32) -> Result<(u32,usize,usize,usize)> {
        if lead.cycle_count==0 {
            return Ok((cycle,1,0,0));
        }
        let high = lead.highest_cycle;
        let below = cycles_below(high,cycle);
        if below==0 {
            return Err(Error::NameConflict);
        }
        if below < lead.current_range {
            return match links[below] {
                Some(_) => Err(Error::NameConflict),
                None => Ok((high,lead.current_range,0,below))
            };
        }
        if below < lead.max_range {
            return Ok((high,below+1,0,below));
        }
        let above = cycles_below(cycle,high);
        if above + lead.current_range <= lead.max_range {
            return Ok((cycle,lead.current_range+above,above,0));
        }
        debug!("cycle {} does not fit the range of {} below {}",cycle,lead.max_range,high);
        Err(Error::InvalidCycle)
    }
    fn write_reels(&mut self,main_addr: DirSectorAddr,reels: &[String]) -> Result<Option<DirSectorAddr>> {
        let mut addrs = Vec::new();
        for _chunk in reels.chunks(REELS_PER_SECTOR) {
            addrs.push(self.allocate_directory_sector(Some(main_addr.pack_index()))?);
        }
        for (i,chunk) in reels.chunks(REELS_PER_SECTOR).enumerate() {
            let table = ReelTable {
                next: addrs.get(i+1).copied(),
                back: match i {
                    0 => Some(main_addr),
                    _ => Some(addrs[i-1])
                },
                reels: chunk.to_vec()
            };
            self.store.write(addrs[i],&table)?;
        }
        Ok(addrs.first().copied())
    }
    pub(super) fn create_file_cycle(&mut self,lead_addr: DirSectorAddr,params: &FileCycleParams) -> Result<DirSectorAddr> {
        let cycle = params.absolute_cycle;
        if cycle==0 || cycle > CYCLE_MODULUS {
            return Err(Error::InvalidCycle);
        }
        let account = name2(&params.account,true)?;
        for r in &params.reels {
            encode_name(r,1,false)?;
        }
        let (mut lead,mut links) = self.read_lead(lead_addr)?;
        let (highest,range,shift,slot) = self.place_cycle(&lead,&links,cycle)?;
        let pack = Some(lead_addr.pack_index());
        if range > LEAD0_SLOTS && lead.sector1.is_none() {
            let s1 = self.allocate_directory_sector(pack)?;
            self.store.write(s1,&LeadItem1 { back: Some(lead_addr), links: [None;LEAD1_SLOTS] })?;
            lead.sector1 = Some(s1);
            debug!("lead item {} extended to sector {}",lead_addr,s1);
        }
        let main0 = self.allocate_directory_sector(pack)?;
        let main1 = self.allocate_directory_sector(pack)?;
        let file_type = lead.file_type;
        let reels = match file_type {
            FileType::Tape => self.write_reels(main0,&params.reels)?,
            _ => None
        };
        let main = MainItem {
            qualifier: lead.qualifier,
            filename: lead.filename,
            project: lead.project,
            account,
            sector1: Some(main1),
            output_queued: false,
            to_be_dropped: false,
            guarded: params.guarded,
            read_only: params.read_only,
            write_only: params.write_only,
            disable: 0,
            assign_count: 0,
            absolute_cycle: cycle,
            last_assigned: 0,
            lead: Some(lead_addr),
            extents: reels,
            initial_reserve: params.initial_reserve,
            max_granules: params.max_granules,
            highest_granule: 0,
            highest_track_written: 0,
            created: now_seconds(),
            tracks_allocated: 0
        };
        self.store.write(main0,&main)?;
        self.store.write(main1,&MainItem1 { back: Some(main0), file_type, reel_count: params.reels.len() })?;
        if shift > 0 {
            for i in (0..lead.current_range).rev() {
                links[i+shift] = links[i];
            }
            for i in 0..shift {
                links[i] = None;
            }
        }
        links[slot] = Some(main0);
        lead.highest_cycle = highest;
        lead.current_range = range;
        lead.cycle_count += 1;
        lead.guarded |= params.guarded;
        self.write_lead(lead_addr,lead,&links)?;
        info!("cycle {} created, main item {}",cycle,main0);
        Ok(main0)
    }
    /// Release the extent map or reel table of a main item, and the tracks it describes
    fn free_extent_chain(&mut self,main: &MainItem) -> Result<()> {
        let file_type = match main.sector1 {
            Some(s1) => self.store.read::<MainItem1>(s1)?.file_type,
            None => return inconsistent("main item has no sector 1")
        };
        let mut curr = main.extents;
        while let Some(addr) = curr {
            match file_type {
                FileType::Tape => {
                    let table: ReelTable = self.store.read(addr)?;
                    curr = table.next;
                },
                _ => {
                    let dad: DadSector = self.store.read(addr)?;
                    for e in dad.entries.iter().filter(|e| !e.hole) {
                        self.deallocate_tracks(e.pack,e.device_track,e.length,false);
                    }
                    curr = dad.next;
                }
            }
            self.deallocate_directory_sector(addr)?;
        }
        Ok(())
    }
    fn recompute_guard(&self,links: &[Option<DirSectorAddr>]) -> Result<bool> {
        for l in links.iter().flatten() {
            let main: MainItem = self.store.read(*l)?;
            if main.guarded {
                return Ok(true);
            }
        }
        Ok(false)
    }
    fn remove_file_set(&mut self,lead_addr: DirSectorAddr,lead: &LeadItem) -> Result<()> {
        self.remove_lookup_entry(&lead.qualifier,&lead.filename)?;
        if let Some(s1) = lead.sector1 {
            self.deallocate_directory_sector(s1)?;
        }
        self.deallocate_directory_sector(lead_addr)?;
        info!("file set {}*{} dropped",word::from_fieldata(&lead.qualifier),word::from_fieldata(&lead.filename));
        Ok(())
    }
    pub(super) fn drop_file_cycle(&mut self,main_addr: DirSectorAddr) -> Result<DropOutcome> {
        let mut main: MainItem = self.store.read(main_addr)?;
        if main.output_queued {
            return Err(Error::FileOnOutputQueue);
        }
        if main.assign_count > 0 || self.assigned.contains_key(&main_addr) {
            main.to_be_dropped = true;
            self.store.write(main_addr,&main)?;
            info!("cycle {} is assigned, drop deferred",main.absolute_cycle);
            return Ok(DropOutcome::Deferred);
        }
        let lead_addr = match main.lead {
            Some(a) => a,
            None => return inconsistent(&format!("main item {} has no lead item",main_addr))
        };
        let (mut lead,mut links) = self.read_lead(lead_addr)?;
        let slot = match links.iter().position(|l| *l==Some(main_addr)) {
            Some(s) => s,
            None => return inconsistent(&format!("main item {} is not linked from {}",main_addr,lead_addr))
        };
        if cycle_minus(lead.highest_cycle,slot)!=main.absolute_cycle {
            error!("slot {} below {} holds cycle {}",slot,lead.highest_cycle,main.absolute_cycle);
            return inconsistent("absolute cycle does not match its lead item slot");
        }
        self.free_extent_chain(&main)?;
        if let Some(s1) = main.sector1 {
            self.deallocate_directory_sector(s1)?;
        }
        self.deallocate_directory_sector(main_addr)?;
        links[slot] = None;
        lead.cycle_count -= 1;
        if lead.cycle_count==0 {
            self.remove_file_set(lead_addr,&lead)?;
            return Ok(DropOutcome::SetDropped);
        }
        if slot==0 {
            let k = match links.iter().position(|l| l.is_some()) {
                Some(k) => k,
                None => return inconsistent("cycle count disagrees with links")
            };
            for i in 0..lead.current_range-k {
                links[i] = links[i+k];
            }
            for i in lead.current_range-k..MAX_CYCLE_SLOTS {
                links[i] = None;
            }
            lead.highest_cycle = cycle_minus(lead.highest_cycle,k);
            lead.current_range -= k;
        } else if slot+1==lead.current_range {
            lead.current_range = match links.iter().rposition(|l| l.is_some()) {
                Some(last) => last + 1,
                None => return inconsistent("cycle count disagrees with links")
            };
        }
        lead.guarded = self.recompute_guard(&links)?;
        self.write_lead(lead_addr,lead,&links)?;
        info!("cycle {} dropped",main.absolute_cycle);
        Ok(DropOutcome::CycleDropped)
    }
    pub(super) fn drop_file_set(&mut self,lead_addr: DirSectorAddr) -> Result<DropOutcome> {
        let (lead,links) = self.read_lead(lead_addr)?;
        if lead.cycle_count==0 {
            self.remove_file_set(lead_addr,&lead)?;
            return Ok(DropOutcome::SetDropped);
        }
        let mut outcome = DropOutcome::CycleDropped;
        for main in links.iter().flatten() {
            outcome = match (outcome,self.drop_file_cycle(*main)?) {
                (DropOutcome::Deferred,_) => DropOutcome::Deferred,
                (_,latest) => latest
            };
        }
        Ok(outcome)
    }
    pub(super) fn set_output_queued(&mut self,main_addr: DirSectorAddr,queued: bool) -> Result<()> {
        let mut main: MainItem = self.store.read(main_addr)?;
        main.output_queued = queued;
        self.store.write(main_addr,&main)
    }
    pub(super) fn file_set_info(&self,lead_addr: DirSectorAddr) -> Result<FileSetInfo> {
        let (lead,links) = self.read_lead(lead_addr)?;
        let mut cycles = Vec::new();
        for (slot,l) in links.iter().enumerate() {
            if let Some(main) = l {
                cycles.push((cycle_minus(lead.highest_cycle,slot),*main));
            }
        }
        Ok(FileSetInfo {
            lead: lead_addr,
            qualifier: word::from_fieldata(&lead.qualifier),
            filename: word::from_fieldata(&lead.filename),
            project: word::from_fieldata(&lead.project),
            file_type: lead.file_type,
            guarded: lead.guarded,
            highest_cycle: lead.highest_cycle,
            cycle_count: lead.cycle_count,
            current_range: lead.current_range,
            max_range: lead.max_range,
            cycles
        })
    }
    pub(super) fn file_cycle_info(&self,main_addr: DirSectorAddr) -> Result<FileCycleInfo> {
        let main: MainItem = self.store.read(main_addr)?;
        let main1: MainItem1 = match main.sector1 {
            Some(s1) => self.store.read(s1)?,
            None => return inconsistent("main item has no sector 1")
        };
        let mut reels = Vec::new();
        if main1.file_type==FileType::Tape {
            let mut curr = main.extents;
            while let Some(addr) = curr {
                let table: ReelTable = self.store.read(addr)?;
                reels.extend(table.reels);
                curr = table.next;
            }
        }
        Ok(FileCycleInfo {
            main: main_addr,
            lead: main.lead,
            qualifier: word::from_fieldata(&main.qualifier),
            filename: word::from_fieldata(&main.filename),
            project: word::from_fieldata(&main.project),
            account: word::from_fieldata(&main.account),
            absolute_cycle: main.absolute_cycle,
            file_type: main1.file_type,
            assign_count: main.assign_count,
            guarded: main.guarded,
            output_queued: main.output_queued,
            to_be_dropped: main.to_be_dropped,
            initial_reserve: main.initial_reserve,
            max_granules: main.max_granules,
            highest_granule: main.highest_granule,
            tracks_allocated: main.tracks_allocated,
            created: from_seconds(main.created),
            last_assigned: match main.last_assigned {
                0 => None,
                t => Some(from_seconds(t))
            },
            reels
        })
    }
    /// Every file set reachable from the lookup table, sorted by qualifier and filename
    pub(super) fn catalog(&self) -> Result<Vec<FileSetInfo>> {
        let mut ans = Vec::new();
        for head in self.lookup.iter().flatten() {
            let mut curr = Some(*head);
            while let Some(addr) = curr {
                let item: SearchItem = self.store.read(addr)?;
                for entry in item.entries.iter().flatten() {
                    ans.push(self.file_set_info(entry.lead)?);
                }
                curr = item.next;
            }
        }
        ans.sort_by(|a,b| (&a.qualifier,&a.filename).cmp(&(&b.qualifier,&b.filename)));
        Ok(ans)
    }
}
