//! ### Extent map manager
//!
//! An assigned file keeps its extents in memory as a `FileAllocationTable`.  For cataloged
//! files the table is loaded from the DAD chain at assignment, and the chain is rewritten
//! from the table whenever tracks are allocated or released.  Temporary files have a table only.

use log::{debug,info,trace};
use super::types::*;
use super::sector::{DadEntry,DadSector,MainItem,MainItem1,ReelTable};
use super::catalog::now_seconds;
use super::MfdState;

/// A run of file-relative tracks backed by a run of device tracks
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct Extent {
    pub file_track: u64,
    pub length: u64,
    pub pack: PackIndex,
    pub device_track: u64
}

impl Extent {
    fn end(&self) -> u64 {
        self.file_track + self.length
    }
    /// Portion of this extent inside [first,end), if any
    fn clip(&self,first: u64,end: u64) -> Option<Extent> {
        let lo = u64::max(first,self.file_track);
        let hi = u64::min(end,self.end());
        match lo < hi {
            true => Some(Extent {
                file_track: lo,
                length: hi - lo,
                pack: self.pack,
                device_track: self.device_track + (lo - self.file_track)
            }),
            false => None
        }
    }
}

/// In-memory extent table of one file, sorted and non-overlapping
#[derive(Clone,Debug,Default,PartialEq)]
pub struct FileAllocationTable {
    pub extents: Vec<Extent>,
    /// tape files only
    pub reels: Vec<String>
}

impl FileAllocationTable {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn total_tracks(&self) -> u64 {
        self.extents.iter().map(|e| e.length).sum()
    }
    /// One past the highest allocated file-relative track
    pub fn high_water(&self) -> u64 {
        match self.extents.last() {
            Some(e) => e.end(),
            None => 0
        }
    }
    /// Sub-ranges of [first,first+count) that have no storage, as (start,length)
    pub fn unallocated(&self,first: u64,count: u64) -> Vec<(u64,u64)> {
        let end = first + count;
        let mut ans = Vec::new();
        let mut pos = first;
        for e in &self.extents {
            if e.end() <= pos {
                continue;
            }
            if e.file_track >= end {
                break;
            }
            if e.file_track > pos {
                ans.push((pos,e.file_track-pos));
            }
            pos = e.end();
        }
        if pos < end {
            ans.push((pos,end-pos));
        }
        ans
    }
    /// Pieces of existing extents inside [first,first+count)
    pub fn allocated(&self,first: u64,count: u64) -> Vec<Extent> {
        self.extents.iter().filter_map(|e| e.clip(first,first+count)).collect()
    }
    /// Add an extent that does not overlap anything, merging with neighbors that continue it
    pub fn insert(&mut self,ext: Extent) {
        let pos = self.extents.iter().position(|e| e.file_track > ext.file_track).unwrap_or(self.extents.len());
        self.extents.insert(pos,ext);
        self.coalesce();
    }
    /// Remove storage for [first,first+count), splitting extents as needed
    pub fn remove(&mut self,first: u64,count: u64) {
        let end = first + count;
        let mut ans = Vec::new();
        for e in &self.extents {
            if let Some(lo) = e.clip(e.file_track,first) {
                ans.push(lo);
            }
            if let Some(hi) = e.clip(end,e.end()) {
                ans.push(hi);
            }
        }
        self.extents = ans;
    }
    fn coalesce(&mut self) {
        let mut ans: Vec<Extent> = Vec::new();
        for e in &self.extents {
            if let Some(prev) = ans.last_mut() {
                if prev.end()==e.file_track && prev.pack==e.pack && prev.device_track+prev.length==e.device_track {
                    prev.length += e.length;
                    continue;
                }
            }
            ans.push(*e);
        }
        self.extents = ans;
    }
    /// DAD entries from track 0, with holes for the gaps
    pub fn to_dad_entries(&self) -> Vec<DadEntry> {
        let mut ans = Vec::new();
        let mut pos = 0;
        for e in &self.extents {
            if e.file_track > pos {
                ans.push(DadEntry { device_track: 0, length: e.file_track-pos, pack: 0, hole: true });
            }
            ans.push(DadEntry { device_track: e.device_track, length: e.length, pack: e.pack, hole: false });
            pos = e.end();
        }
        ans
    }
}

/// File-relative range [first,first+count) must end within `MAX_FILE_TRACKS`
fn check_file_range(first: u64,count: u64) -> Result<()> {
    match first.checked_add(count) {
        Some(end) if end <= MAX_FILE_TRACKS => Ok(()),
        _ => {
            debug!("file track range {} + {} is out of bounds",first,count);
            Err(Error::TrackRangeInvalid)
        }
    }
}

/// Names an open file
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash)]
pub enum FileId {
    /// main item of a cataloged file cycle
    Cataloged(DirSectorAddr),
    Temporary(u32)
}

/// An assigned cataloged file
#[derive(Clone,Debug)]
pub struct AssignedFile {
    pub fat: FileAllocationTable,
    pub count: u32
}

impl MfdState {
    fn file_type_of(&self,main: &MainItem) -> Result<FileType> {
        match main.sector1 {
            Some(s1) => Ok(self.store.read::<MainItem1>(s1)?.file_type),
            None => inconsistent("main item has no sector 1")
        }
    }
    /// Build the extent table of a cataloged file from its DAD chain or reel table
    pub(super) fn load_fat(&self,main_addr: DirSectorAddr) -> Result<FileAllocationTable> {
        let main: MainItem = self.store.read(main_addr)?;
        let mut fat = FileAllocationTable::new();
        let mut curr = main.extents;
        let mut back = main_addr;
        let tape = self.file_type_of(&main)?==FileType::Tape;
        while let Some(addr) = curr {
            if tape {
                let table: ReelTable = self.store.read(addr)?;
                fat.reels.extend(table.reels);
                curr = table.next;
                continue;
            }
            let dad: DadSector = self.store.read(addr)?;
            if dad.back!=Some(back) {
                return inconsistent(&format!("DAD sector {} does not point back to {}",addr,back));
            }
            let mut pos = dad.first_word / WORDS_PER_TRACK as u64;
            for e in &dad.entries {
                if !e.hole {
                    fat.insert(Extent { file_track: pos, length: e.length, pack: e.pack, device_track: e.device_track });
                }
                pos += e.length;
            }
            back = addr;
            curr = dad.next;
        }
        trace!("loaded {} extents for {}",fat.extents.len(),main_addr);
        Ok(fat)
    }
    /// Rewrite the DAD chain of a main item from an extent table.  New sectors are spliced in
    /// right after the main item, surplus sectors at the tail are unlinked and then freed.
    /// Only sectors whose content changes are marked for commit.
    pub(super) fn sync_dad(&mut self,main_addr: DirSectorAddr,fat: &FileAllocationTable) -> Result<()> {
        let mut main: MainItem = self.store.read(main_addr)?;
        let mut chain = Vec::new();
        let mut curr = main.extents;
        while let Some(addr) = curr {
            chain.push(addr);
            curr = self.store.read::<DadSector>(addr)?.next;
        }
        let entries = fat.to_dad_entries();
        let chunks: Vec<&[DadEntry]> = entries.chunks(DAD_ENTRIES).collect();
        if chunks.len() > chain.len() {
            let mut fresh = Vec::new();
            for _i in chain.len()..chunks.len() {
                fresh.push(self.allocate_directory_sector(Some(main_addr.pack_index()))?);
            }
            debug!("{} DAD sectors added for {}",fresh.len(),main_addr);
            fresh.append(&mut chain);
            chain = fresh;
        }
        let surplus = chain.split_off(chunks.len());
        let mut pos = 0;
        for (i,chunk) in chunks.iter().enumerate() {
            let len: u64 = chunk.iter().map(|e| e.length).sum();
            let dad = DadSector {
                next: chain.get(i+1).copied(),
                back: match i {
                    0 => Some(main_addr),
                    _ => Some(chain[i-1])
                },
                first_word: pos * WORDS_PER_TRACK as u64,
                limit_word: (pos + len) * WORDS_PER_TRACK as u64,
                entries: chunk.to_vec()
            };
            self.store.write(chain[i],&dad)?;
            pos += len;
        }
        main.extents = chain.first().copied();
        main.tracks_allocated = fat.total_tracks();
        main.highest_granule = fat.high_water();
        self.store.write(main_addr,&main)?;
        for addr in surplus {
            self.deallocate_directory_sector(addr)?;
        }
        Ok(())
    }
    fn fat_of(&self,file: FileId) -> Result<Option<&FileAllocationTable>> {
        match file {
            FileId::Cataloged(main) => Ok(self.assigned.get(&main).map(|a| &a.fat)),
            FileId::Temporary(id) => match self.temporary.get(&id) {
                Some(fat) => Ok(Some(fat)),
                None => Err(Error::NotAssigned)
            }
        }
    }
    /// Take the extent table out of its owner, loading it from disk if the file is not assigned
    fn checkout_fat(&mut self,file: FileId) -> Result<FileAllocationTable> {
        match self.fat_of(file)? {
            Some(fat) => Ok(fat.clone()),
            None => match file {
                FileId::Cataloged(main) => self.load_fat(main),
                FileId::Temporary(_) => Err(Error::NotAssigned)
            }
        }
    }
    fn checkin_fat(&mut self,file: FileId,fat: FileAllocationTable) -> Result<()> {
        match file {
            FileId::Cataloged(main) => {
                self.sync_dad(main,&fat)?;
                if let Some(a) = self.assigned.get_mut(&main) {
                    a.fat = fat;
                }
            },
            FileId::Temporary(id) => {
                self.temporary.insert(id,fat);
            }
        }
        Ok(())
    }
    pub(super) fn allocate_file_tracks(&mut self,file: FileId,first: u64,count: u64) -> Result<u64> {
        check_file_range(first,count)?;
        let mut fat = self.checkout_fat(file)?;
        let (temporary,preferred,limit) = match file {
            FileId::Cataloged(main_addr) => {
                let main: MainItem = self.store.read(main_addr)?;
                if self.file_type_of(&main)?==FileType::Tape {
                    return Err(Error::NotMassStorage);
                }
                (false,Some(main_addr.pack_index()),main.max_granules)
            },
            FileId::Temporary(_) => (true,None,0)
        };
        let gaps = fat.unallocated(first,count);
        let wanted: u64 = gaps.iter().map(|g| g.1).sum();
        if limit > 0 && fat.total_tracks() + wanted > limit {
            debug!("{} + {} tracks exceeds max granules {}",fat.total_tracks(),wanted,limit);
            return Err(Error::MaxGranulesExceeded);
        }
        let mut granted = 0;
        let mut res = Ok(());
        'gaps: for (start,len) in gaps {
            let mut pos = start;
            while pos < start + len {
                let candidates = self.candidate_packs(preferred);
                match self.allocate_tracks(start+len-pos,&candidates,temporary) {
                    Ok(g) => {
                        fat.insert(Extent { file_track: pos, length: g.count, pack: g.pack, device_track: g.start });
                        pos += g.count;
                        granted += g.count;
                    },
                    Err(e) => {
                        res = Err(e);
                        break 'gaps;
                    }
                }
            }
        }
        // whatever was granted stays with the file, even when a later piece failed
        self.checkin_fat(file,fat)?;
        res?;
        debug!("{:?} granted {} tracks at file track {}",file,granted,first);
        Ok(granted)
    }
    pub(super) fn release_file_tracks(&mut self,file: FileId,first: u64,count: u64) -> Result<u64> {
        check_file_range(first,count)?;
        let mut fat = self.checkout_fat(file)?;
        let temporary = matches!(file,FileId::Temporary(_));
        let mut released = 0;
        for piece in fat.allocated(first,count) {
            self.deallocate_tracks(piece.pack,piece.device_track,piece.length,temporary);
            released += piece.length;
        }
        fat.remove(first,count);
        self.checkin_fat(file,fat)?;
        debug!("{:?} released {} tracks at file track {}",file,released,first);
        Ok(released)
    }
    pub(super) fn assign(&mut self,main_addr: DirSectorAddr) -> Result<FileId> {
        let mut main: MainItem = self.store.read(main_addr)?;
        if main.to_be_dropped {
            return Err(Error::NotFound);
        }
        if !self.assigned.contains_key(&main_addr) {
            let fat = self.load_fat(main_addr)?;
            self.assigned.insert(main_addr,AssignedFile { fat, count: 0 });
        }
        if let Some(a) = self.assigned.get_mut(&main_addr) {
            a.count += 1;
        }
        main.assign_count += 1;
        main.last_assigned = now_seconds();
        self.store.write(main_addr,&main)?;
        info!("cycle {} assigned, count {}",main.absolute_cycle,main.assign_count);
        Ok(FileId::Cataloged(main_addr))
    }
    /// Release an assignment.  Returns true if a deferred drop happened.
    pub(super) fn release(&mut self,file: FileId) -> Result<bool> {
        let main_addr = match file {
            FileId::Cataloged(m) => m,
            FileId::Temporary(id) => {
                let fat = match self.temporary.remove(&id) {
                    Some(f) => f,
                    None => return Err(Error::NotAssigned)
                };
                for e in fat.extents {
                    self.deallocate_tracks(e.pack,e.device_track,e.length,true);
                }
                info!("temporary file {} released",id);
                return Ok(false);
            }
        };
        let remaining = match self.assigned.get_mut(&main_addr) {
            Some(a) => {
                a.count -= 1;
                a.count
            },
            None => return Err(Error::NotAssigned)
        };
        let mut main: MainItem = self.store.read(main_addr)?;
        main.assign_count = main.assign_count.saturating_sub(1);
        self.store.write(main_addr,&main)?;
        if remaining > 0 {
            return Ok(false);
        }
        self.assigned.remove(&main_addr);
        debug!("cycle {} fully released",main.absolute_cycle);
        if main.to_be_dropped && main.assign_count==0 {
            self.drop_file_cycle(main_addr)?;
            return Ok(true);
        }
        Ok(false)
    }
    pub(super) fn create_temporary_file(&mut self) -> FileId {
        self.next_temp += 1;
        self.temporary.insert(self.next_temp,FileAllocationTable::new());
        FileId::Temporary(self.next_temp)
    }
    /// Extents of a file, from memory if it is open, otherwise from its DAD chain
    pub(super) fn extents(&self,file: FileId) -> Result<Vec<Extent>> {
        match self.fat_of(file)? {
            Some(fat) => Ok(fat.extents.clone()),
            None => match file {
                FileId::Cataloged(main) => Ok(self.load_fat(main)?.extents),
                FileId::Temporary(_) => Err(Error::NotAssigned)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ext(file_track: u64,length: u64,device_track: u64) -> Extent {
        Extent { file_track, length, pack: 1, device_track }
    }

    #[test]
    fn partition() {
        let mut fat = FileAllocationTable::new();
        fat.insert(ext(2,3,100));
        fat.insert(ext(8,2,200));
        assert_eq!(fat.unallocated(0,12),vec![(0,2),(5,3),(10,2)]);
        assert_eq!(fat.unallocated(3,2),vec![]);
        assert_eq!(fat.allocated(4,5),vec![ext(4,1,102),ext(8,1,200)]);
    }

    #[test]
    fn file_range_bounds() {
        assert_eq!(check_file_range(0,MAX_FILE_TRACKS),Ok(()));
        assert_eq!(check_file_range(1,MAX_FILE_TRACKS),Err(Error::TrackRangeInvalid));
        assert_eq!(check_file_range(u64::MAX-1,5),Err(Error::TrackRangeInvalid));
        assert!(MAX_FILE_TRACKS * WORDS_PER_TRACK as u64 <= crate::word::WORD_MASK);
    }

    #[test]
    fn merge_and_split() {
        let mut fat = FileAllocationTable::new();
        fat.insert(ext(0,2,50));
        fat.insert(ext(2,3,52));
        assert_eq!(fat.extents,vec![ext(0,5,50)]);
        fat.remove(1,2);
        assert_eq!(fat.extents,vec![ext(0,1,50),ext(3,2,53)]);
        assert_eq!(fat.total_tracks(),3);
        assert_eq!(fat.high_water(),5);
        let dad = fat.to_dad_entries();
        assert_eq!(dad.len(),3);
        assert!(dad[1].hole);
        assert_eq!(dad[1].length,2);
    }
}
