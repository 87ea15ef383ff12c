//! ### Directory sector records
//!
//! Every directory sector is 28 words.  The structs here decode a sector into named fields and
//! encode them back, so the bit layout of each record kind is written down in exactly one place.
//! Business logic never shifts bits in a sector directly, except for the bitmap sectors which
//! are accessed through the helpers at the bottom of this module.

use num_traits::FromPrimitive;
use crate::word::{self,Word,Partial};
use super::types::*;

/// Raw contents of a directory sector
pub type Sector = [Word;WORDS_PER_SECTOR];

pub const EMPTY_SECTOR: Sector = [0;WORDS_PER_SECTOR];

/// Conversion between a record struct and a raw sector.
/// Words a record does not use are written as zero.
pub trait DirRecord: Sized {
    fn from_sector(sec: &Sector) -> Self;
    fn to_sector(&self) -> Sector;
}

fn link(addr: Option<DirSectorAddr>) -> Word {
    DirSectorAddr::link(addr)
}

fn unlink(w: Word) -> Option<DirSectorAddr> {
    DirSectorAddr::from_link(w)
}

fn pair(sec: &[Word],idx: usize) -> [Word;2] {
    [sec[idx],sec[idx+1]]
}

/////////////////
// Pack label  //
/////////////////

const LABEL_MAGIC: &str = "VOL1";

/// Label found in block 2 of a prepped pack
#[derive(Clone,Debug,PartialEq)]
pub struct PackLabel {
    pub pack_name: String,
    /// device-relative track holding directory track 0
    pub dir_track: u64,
    pub blocks_per_track: u64,
    pub prep_factor: usize,
    pub hmbt_words: usize,
    pub smbt_words: usize,
    pub total_tracks: u64
}

impl PackLabel {
    /// Label for a blank pack.  The directory starts on the track after the one holding the label.
    pub fn new(pack_name: &str,prep_factor: usize,total_tracks: u64) -> Self {
        let blocks_per_track = (WORDS_PER_TRACK / prep_factor) as u64;
        let bitmap_words = bitmap_words(total_tracks);
        Self {
            pack_name: pack_name.to_uppercase(),
            dir_track: LABEL_BLOCK / blocks_per_track + 1,
            blocks_per_track,
            prep_factor,
            hmbt_words: bitmap_words,
            smbt_words: bitmap_words,
            total_tracks
        }
    }
    /// Decode the first words of block 2, None if the magic is missing
    pub fn from_words(dat: &[Word]) -> Option<Self> {
        if dat.len() < 7 || word::from_ascii_words(&dat[0..1]) != LABEL_MAGIC {
            return None;
        }
        Some(Self {
            pack_name: word::from_ascii_words(&dat[1..3]),
            dir_track: dat[3],
            blocks_per_track: word::get_partial(dat[4],Partial::H1),
            prep_factor: word::get_partial(dat[4],Partial::H2) as usize,
            hmbt_words: word::get_partial(dat[5],Partial::H1) as usize,
            smbt_words: word::get_partial(dat[5],Partial::H2) as usize,
            total_tracks: dat[6]
        })
    }
    pub fn to_words(&self) -> Vec<Word> {
        let mut ans = vec![0;WORDS_PER_SECTOR];
        ans[0] = word::to_ascii_words(LABEL_MAGIC,1)[0];
        ans[1..3].copy_from_slice(&word::to_ascii_words(&self.pack_name,2));
        ans[3] = self.dir_track;
        ans[4] = word::from_halves(self.blocks_per_track,self.prep_factor as Word);
        ans[5] = word::from_halves(self.hmbt_words as Word,self.smbt_words as Word);
        ans[6] = self.total_tracks;
        ans
    }
}

/// Words needed for a bitmap of `tracks` bits
pub fn bitmap_words(tracks: u64) -> usize {
    (tracks as usize + BITMAP_BITS_PER_WORD - 1) / BITMAP_BITS_PER_WORD
}

/// Sectors needed for a bitmap of `tracks` bits
pub fn bitmap_sectors(tracks: u64) -> usize {
    (bitmap_words(tracks) + WORDS_PER_SECTOR - 1) / WORDS_PER_SECTOR
}

////////////////////
// Pack sector 1  //
////////////////////

const SMALL_DISK_BIT: usize = 35;
const FIXED_BIT: usize = 34;

/// Pack sector 1, bitmap bootstrap and counters
#[derive(Clone,Debug,PartialEq)]
pub struct PackSector1 {
    pub smbt_first: Option<DirSectorAddr>,
    pub smbt_sectors: usize,
    pub hmbt_first: Option<DirSectorAddr>,
    pub hmbt_sectors: usize,
    pub tracks_available: u64,
    pub accessible_tracks: u64,
    pub pack_index: PackIndex,
    pub small_disk: bool,
    pub fixed: bool,
    pub version: Word,
    /// in sectors, 0 or a multiple of 576
    pub das_offset: Word,
    pub prep_factor: usize,
    pub total_tracks: u64,
    pub pack_name: String,
    pub dir_track_count: usize
}

impl DirRecord for PackSector1 {
    fn from_sector(sec: &Sector) -> Self {
        Self {
            smbt_first: unlink(sec[0]),
            hmbt_sectors: word::get_partial(sec[1],Partial::H1) as usize,
            smbt_sectors: word::get_partial(sec[1],Partial::H2) as usize,
            hmbt_first: unlink(sec[2]),
            tracks_available: sec[3],
            accessible_tracks: sec[4],
            pack_index: word::get_partial(sec[5],Partial::H2) as PackIndex,
            small_disk: word::get_bit(sec[5],SMALL_DISK_BIT),
            fixed: word::get_bit(sec[5],FIXED_BIT),
            version: word::get_field(sec[6],0,6),
            das_offset: word::get_field(sec[6],6,30),
            prep_factor: sec[7] as usize,
            total_tracks: sec[8],
            pack_name: word::from_ascii_words(&sec[9..11]),
            dir_track_count: sec[11] as usize
        }
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        sec[0] = link(self.smbt_first);
        sec[1] = word::from_halves(self.hmbt_sectors as Word,self.smbt_sectors as Word);
        sec[2] = link(self.hmbt_first);
        sec[3] = self.tracks_available;
        sec[4] = self.accessible_tracks;
        sec[5] = word::set_partial(0,Partial::H2,self.pack_index as Word);
        sec[5] = word::set_bit(sec[5],SMALL_DISK_BIT,self.small_disk);
        sec[5] = word::set_bit(sec[5],FIXED_BIT,self.fixed);
        sec[6] = word::set_field(self.version,6,30,self.das_offset);
        sec[7] = self.prep_factor as Word;
        sec[8] = self.total_tracks;
        sec[9..11].copy_from_slice(&word::to_ascii_words(&self.pack_name,2));
        sec[11] = self.dir_track_count as Word;
        sec
    }
}

//////////
// DAS  //
//////////

/// One directory track governed by a DAS
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct DasEntry {
    /// device-relative track, None if the slot has no track yet
    pub device_track: Option<u64>,
    /// allocation mask, sector `s` at bit `63-s`
    pub mask: u64
}

impl DasEntry {
    pub const EMPTY: DasEntry = DasEntry { device_track: None, mask: 0 };
    fn bit(sector: usize) -> u64 {
        1 << (SECTORS_PER_TRACK - 1 - sector)
    }
    pub fn is_allocated(&self,sector: usize) -> bool {
        self.mask & Self::bit(sector) > 0
    }
    pub fn set_allocated(&mut self,sector: usize,val: bool) {
        match val {
            true => self.mask |= Self::bit(sector),
            false => self.mask &= !Self::bit(sector)
        }
    }
    /// Lowest free sector in the track
    pub fn first_free(&self) -> Option<usize> {
        match self.device_track {
            Some(_) if self.mask != u64::MAX => Some(self.mask.leading_ones() as usize),
            _ => None
        }
    }
    pub fn free_count(&self) -> usize {
        match self.device_track {
            Some(_) => self.mask.count_zeros() as usize,
            None => 0
        }
    }
}

/// Directory allocation sector, governs 9 directory tracks
#[derive(Clone,Debug,PartialEq)]
pub struct Das {
    pub entries: [DasEntry;TRACKS_PER_DAS],
    pub next: Option<DirSectorAddr>
}

impl Das {
    pub fn new() -> Self {
        Self {
            entries: [DasEntry::EMPTY;TRACKS_PER_DAS],
            next: None
        }
    }
}

impl DirRecord for Das {
    fn from_sector(sec: &Sector) -> Self {
        let mut ans = Self::new();
        for i in 0..TRACKS_PER_DAS {
            ans.entries[i] = DasEntry {
                device_track: match word::get_bit(sec[3*i],NO_LINK_BIT) {
                    true => None,
                    false => Some(sec[3*i])
                },
                mask: (word::get_field(sec[3*i+1],0,32) << 32) | word::get_field(sec[3*i+2],0,32)
            };
        }
        ans.next = unlink(sec[27]);
        ans
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        for i in 0..TRACKS_PER_DAS {
            sec[3*i] = match self.entries[i].device_track {
                Some(t) => t,
                None => NO_LINK
            };
            sec[3*i+1] = self.entries[i].mask >> 32;
            sec[3*i+2] = self.entries[i].mask & 0xffffffff;
        }
        sec[27] = link(self.next);
        sec
    }
}

//////////////////
// Search item  //
//////////////////

#[derive(Clone,Copy,Debug,PartialEq)]
pub struct SearchEntry {
    pub qualifier: [Word;2],
    pub filename: [Word;2],
    pub lead: DirSectorAddr
}

/// Hash bucket record, up to 5 file sets
#[derive(Clone,Debug,PartialEq)]
pub struct SearchItem {
    pub entries: [Option<SearchEntry>;SEARCH_ENTRIES],
    pub next: Option<DirSectorAddr>
}

impl SearchItem {
    pub fn new() -> Self {
        Self {
            entries: [None;SEARCH_ENTRIES],
            next: None
        }
    }
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_none())
    }
}

impl DirRecord for SearchItem {
    fn from_sector(sec: &Sector) -> Self {
        let mut ans = Self::new();
        for i in 0..SEARCH_ENTRIES {
            let base = 5*i;
            ans.entries[i] = unlink(sec[base+4]).map(|lead| SearchEntry {
                qualifier: pair(sec,base),
                filename: pair(sec,base+2),
                lead
            });
        }
        ans.next = unlink(sec[27]);
        ans
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        for i in 0..SEARCH_ENTRIES {
            let base = 5*i;
            match &self.entries[i] {
                Some(e) => {
                    sec[base..base+2].copy_from_slice(&e.qualifier);
                    sec[base+2..base+4].copy_from_slice(&e.filename);
                    sec[base+4] = e.lead.to_word();
                },
                None => sec[base+4] = NO_LINK
            }
        }
        sec[25] = search_tag();
        sec[27] = link(self.next);
        sec
    }
}

fn search_tag() -> Word {
    match word::to_fieldata("SEARCH",1) {
        Some(v) => v[0],
        None => 0
    }
}

////////////////
// Lead item  //
////////////////

const GUARDED_BIT: usize = 29;
const CHANGE_IN_PROGRESS_BIT: usize = 28;

/// Lead item sector 0, one per file set
#[derive(Clone,Debug,PartialEq)]
pub struct LeadItem {
    pub qualifier: [Word;2],
    pub filename: [Word;2],
    pub project: [Word;2],
    pub read_key: Word,
    pub write_key: Word,
    pub file_type: FileType,
    pub guarded: bool,
    pub change_in_progress: bool,
    pub max_range: usize,
    /// slots spanned from the highest cycle down to the lowest
    pub current_range: usize,
    /// populated slots
    pub cycle_count: usize,
    pub highest_cycle: u32,
    pub sector1: Option<DirSectorAddr>,
    pub links: [Option<DirSectorAddr>;LEAD0_SLOTS]
}

impl DirRecord for LeadItem {
    fn from_sector(sec: &Sector) -> Self {
        let mut links = [None;LEAD0_SLOTS];
        for i in 0..LEAD0_SLOTS {
            links[i] = unlink(sec[11+i]);
        }
        Self {
            qualifier: pair(sec,0),
            filename: pair(sec,2),
            project: pair(sec,4),
            read_key: sec[6],
            write_key: sec[7],
            file_type: FileType::from_u64(word::get_partial(sec[8],Partial::S1)).unwrap_or(FileType::MassStorage),
            guarded: word::get_bit(sec[8],GUARDED_BIT),
            change_in_progress: word::get_bit(sec[8],CHANGE_IN_PROGRESS_BIT),
            max_range: word::get_field(sec[8],9,9) as usize,
            current_range: word::get_field(sec[8],0,9) as usize,
            cycle_count: word::get_field(sec[9],27,9) as usize,
            highest_cycle: word::get_partial(sec[9],Partial::H2) as u32,
            sector1: unlink(sec[10]),
            links
        }
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        sec[0..2].copy_from_slice(&self.qualifier);
        sec[2..4].copy_from_slice(&self.filename);
        sec[4..6].copy_from_slice(&self.project);
        sec[6] = self.read_key;
        sec[7] = self.write_key;
        let mut w = word::set_partial(0,Partial::S1,self.file_type as Word);
        w = word::set_bit(w,GUARDED_BIT,self.guarded);
        w = word::set_bit(w,CHANGE_IN_PROGRESS_BIT,self.change_in_progress);
        w = word::set_field(w,9,9,self.max_range as Word);
        sec[8] = word::set_field(w,0,9,self.current_range as Word);
        sec[9] = word::set_field(self.highest_cycle as Word,27,9,self.cycle_count as Word);
        sec[10] = link(self.sector1);
        for i in 0..LEAD0_SLOTS {
            sec[11+i] = link(self.links[i]);
        }
        sec
    }
}

/// Lead item sector 1, present when the range exceeds what sector 0 can hold
#[derive(Clone,Debug,PartialEq)]
pub struct LeadItem1 {
    pub back: Option<DirSectorAddr>,
    pub links: [Option<DirSectorAddr>;LEAD1_SLOTS]
}

impl DirRecord for LeadItem1 {
    fn from_sector(sec: &Sector) -> Self {
        let mut links = [None;LEAD1_SLOTS];
        for i in 0..LEAD1_SLOTS {
            links[i] = unlink(sec[1+i]);
        }
        Self {
            back: unlink(sec[0]),
            links
        }
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        sec[0] = link(self.back);
        for i in 0..LEAD1_SLOTS {
            sec[1+i] = link(self.links[i]);
        }
        sec
    }
}

////////////////
// Main item  //
////////////////

const DESC_OUTPUT_QUEUED: usize = 35;
const DESC_TO_BE_DROPPED: usize = 34;
const INHIBIT_GUARDED: usize = 35;
const INHIBIT_READ_ONLY: usize = 34;
const INHIBIT_WRITE_ONLY: usize = 33;

/// Main item sector 0, one per file cycle
#[derive(Clone,Debug,PartialEq)]
pub struct MainItem {
    pub qualifier: [Word;2],
    pub filename: [Word;2],
    pub project: [Word;2],
    pub account: [Word;2],
    pub sector1: Option<DirSectorAddr>,
    pub output_queued: bool,
    pub to_be_dropped: bool,
    pub guarded: bool,
    pub read_only: bool,
    pub write_only: bool,
    pub disable: Word,
    pub assign_count: u32,
    pub absolute_cycle: u32,
    /// seconds since the Unix epoch
    pub last_assigned: Word,
    pub lead: Option<DirSectorAddr>,
    /// first DAD sector, or first reel table sector for tape
    pub extents: Option<DirSectorAddr>,
    pub initial_reserve: u64,
    pub max_granules: u64,
    pub highest_granule: u64,
    pub highest_track_written: u64,
    pub created: Word,
    pub tracks_allocated: u64
}

impl DirRecord for MainItem {
    fn from_sector(sec: &Sector) -> Self {
        Self {
            qualifier: pair(sec,0),
            filename: pair(sec,2),
            project: pair(sec,4),
            account: pair(sec,6),
            sector1: unlink(sec[8]),
            output_queued: word::get_bit(sec[9],DESC_OUTPUT_QUEUED),
            to_be_dropped: word::get_bit(sec[9],DESC_TO_BE_DROPPED),
            guarded: word::get_bit(sec[10],INHIBIT_GUARDED),
            read_only: word::get_bit(sec[10],INHIBIT_READ_ONLY),
            write_only: word::get_bit(sec[10],INHIBIT_WRITE_ONLY),
            disable: sec[11],
            assign_count: word::get_partial(sec[12],Partial::H1) as u32,
            absolute_cycle: word::get_partial(sec[12],Partial::H2) as u32,
            last_assigned: sec[13],
            lead: unlink(sec[14]),
            extents: unlink(sec[15]),
            initial_reserve: sec[16],
            max_granules: sec[17],
            highest_granule: sec[18],
            highest_track_written: sec[19],
            created: sec[20],
            tracks_allocated: sec[21]
        }
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        sec[0..2].copy_from_slice(&self.qualifier);
        sec[2..4].copy_from_slice(&self.filename);
        sec[4..6].copy_from_slice(&self.project);
        sec[6..8].copy_from_slice(&self.account);
        sec[8] = link(self.sector1);
        let desc = word::set_bit(0,DESC_OUTPUT_QUEUED,self.output_queued);
        sec[9] = word::set_bit(desc,DESC_TO_BE_DROPPED,self.to_be_dropped);
        let mut inhibit = word::set_bit(0,INHIBIT_GUARDED,self.guarded);
        inhibit = word::set_bit(inhibit,INHIBIT_READ_ONLY,self.read_only);
        sec[10] = word::set_bit(inhibit,INHIBIT_WRITE_ONLY,self.write_only);
        sec[11] = self.disable;
        sec[12] = word::from_halves(self.assign_count as Word,self.absolute_cycle as Word);
        sec[13] = self.last_assigned;
        sec[14] = link(self.lead);
        sec[15] = link(self.extents);
        sec[16] = self.initial_reserve;
        sec[17] = self.max_granules;
        sec[18] = self.highest_granule;
        sec[19] = self.highest_track_written;
        sec[20] = self.created;
        sec[21] = self.tracks_allocated;
        sec
    }
}

/// Main item sector 1
#[derive(Clone,Debug,PartialEq)]
pub struct MainItem1 {
    pub back: Option<DirSectorAddr>,
    pub file_type: FileType,
    pub reel_count: usize
}

impl DirRecord for MainItem1 {
    fn from_sector(sec: &Sector) -> Self {
        Self {
            back: unlink(sec[0]),
            file_type: FileType::from_u64(word::get_partial(sec[1],Partial::S1)).unwrap_or(FileType::MassStorage),
            reel_count: sec[2] as usize
        }
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        sec[0] = link(self.back);
        sec[1] = word::set_partial(0,Partial::S1,self.file_type as Word);
        sec[2] = self.reel_count as Word;
        sec
    }
}

//////////////////
// DAD sector   //
//////////////////

const DAD_LAST_BIT: usize = 35;
const DAD_HOLE_BIT: usize = 34;

/// One extent in a DAD sector.  A hole covers file-relative tracks with no storage.
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct DadEntry {
    pub device_track: u64,
    pub length: u64,
    pub pack: PackIndex,
    pub hole: bool
}

/// Extent map sector
#[derive(Clone,Debug,PartialEq)]
pub struct DadSector {
    pub next: Option<DirSectorAddr>,
    /// previous DAD sector, or the main item for the first one
    pub back: Option<DirSectorAddr>,
    pub first_word: u64,
    pub limit_word: u64,
    pub entries: Vec<DadEntry>
}

impl DirRecord for DadSector {
    fn from_sector(sec: &Sector) -> Self {
        let mut entries = Vec::new();
        for i in 0..DAD_ENTRIES {
            let base = 4 + 3*i;
            let flags = sec[base+2];
            if sec[base+1] == 0 {
                break;
            }
            entries.push(DadEntry {
                device_track: sec[base],
                length: sec[base+1],
                pack: word::get_partial(flags,Partial::H2) as PackIndex,
                hole: word::get_bit(flags,DAD_HOLE_BIT)
            });
            if word::get_bit(flags,DAD_LAST_BIT) {
                break;
            }
        }
        Self {
            next: unlink(sec[0]),
            back: unlink(sec[1]),
            first_word: sec[2],
            limit_word: sec[3],
            entries
        }
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        sec[0] = link(self.next);
        sec[1] = link(self.back);
        sec[2] = self.first_word;
        sec[3] = self.limit_word;
        let count = usize::min(self.entries.len(),DAD_ENTRIES);
        for (i,e) in self.entries.iter().take(DAD_ENTRIES).enumerate() {
            let base = 4 + 3*i;
            sec[base] = e.device_track;
            sec[base+1] = e.length;
            let mut flags = word::set_partial(0,Partial::H2,e.pack as Word);
            flags = word::set_bit(flags,DAD_HOLE_BIT,e.hole);
            sec[base+2] = word::set_bit(flags,DAD_LAST_BIT,i+1==count);
        }
        sec
    }
}

//////////////////
// Reel table   //
//////////////////

/// Reel numbers of a tape file
#[derive(Clone,Debug,PartialEq)]
pub struct ReelTable {
    pub next: Option<DirSectorAddr>,
    pub back: Option<DirSectorAddr>,
    pub reels: Vec<String>
}

impl DirRecord for ReelTable {
    fn from_sector(sec: &Sector) -> Self {
        let count = usize::min(sec[2] as usize,REELS_PER_SECTOR);
        Self {
            next: unlink(sec[0]),
            back: unlink(sec[1]),
            reels: (0..count).map(|i| word::from_fieldata(&sec[3+i..4+i])).collect()
        }
    }
    fn to_sector(&self) -> Sector {
        let mut sec = EMPTY_SECTOR;
        sec[0] = link(self.next);
        sec[1] = link(self.back);
        let count = usize::min(self.reels.len(),REELS_PER_SECTOR);
        sec[2] = count as Word;
        for i in 0..count {
            sec[3+i] = match word::to_fieldata(&self.reels[i],1) {
                Some(v) => v[0],
                None => 0
            };
        }
        sec
    }
}

//////////////////////
// Bitmap sectors   //
//////////////////////

/// Locate track `t` in a bitmap laid out over consecutive sectors: (sector offset, word, bit)
pub fn bitmap_position(t: u64) -> (usize,usize,usize) {
    let word_idx = t as usize / BITMAP_BITS_PER_WORD;
    let bit = BITMAP_BITS_PER_WORD - 1 - t as usize % BITMAP_BITS_PER_WORD;
    (word_idx / WORDS_PER_SECTOR,word_idx % WORDS_PER_SECTOR,bit)
}
