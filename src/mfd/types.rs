//! ### MFD types and constants
//!
//! Geometry constants, the directory sector address, and the error taxonomy.

use std::fmt;
use num_derive::FromPrimitive;
use crate::word::{self,Word};
use crate::device::{DeviceId,IoFailure,IoStatus};

/// Words in a directory sector
pub const WORDS_PER_SECTOR: usize = 28;
/// Directory sectors in a track
pub const SECTORS_PER_TRACK: usize = 64;
pub const WORDS_PER_TRACK: usize = WORDS_PER_SECTOR * SECTORS_PER_TRACK;
/// File-relative tracks end here, so DAD word offsets fit in one word
pub const MAX_FILE_TRACKS: u64 = word::WORD_MASK / WORDS_PER_TRACK as u64;
/// Directory tracks covered by one DAS
pub const TRACKS_PER_DAS: usize = 9;
pub const SECTORS_PER_DAS_GROUP: usize = TRACKS_PER_DAS * SECTORS_PER_TRACK;
/// Block holding the pack label, on every pack
pub const LABEL_BLOCK: u64 = 2;
/// Link word meaning "no link"
pub const NO_LINK: Word = 0o400000000000;
pub const NO_LINK_BIT: usize = 35;
/// Bitmap bits held in each bitmap word (SMBT, HMBT, DAS masks)
pub const BITMAP_BITS_PER_WORD: usize = 32;
/// Packs with fewer tracks than this keep a single DAS and at most 9 directory tracks.
/// The test is on total pack tracks, not on the count of directory tracks in use.
pub const SMALL_DISK_TRACKS: u64 = 512;
/// Sector format versions that bring-up accepts
pub const ACCEPTED_VERSIONS: [Word;2] = [0,1];
pub const SECTOR_FORMAT_VERSION: Word = 1;
/// Absolute cycles run 1..=999 and wrap
pub const CYCLE_MODULUS: u32 = 999;
/// Main item links held by lead item sector 0 and sector 1
pub const LEAD0_SLOTS: usize = 17;
pub const LEAD1_SLOTS: usize = 27;
pub const MAX_CYCLE_SLOTS: usize = LEAD0_SLOTS + LEAD1_SLOTS;
pub const DEFAULT_MAX_RANGE: usize = 32;
/// Entries in a search item
pub const SEARCH_ENTRIES: usize = 5;
/// Entries in a DAD sector
pub const DAD_ENTRIES: usize = 8;
/// Reel numbers in a reel table sector
pub const REELS_PER_SECTOR: usize = 25;
pub const DEFAULT_LOOKUP_SIZE: usize = 256;
/// Packs are numbered from here
pub const FIRST_PACK_INDEX: PackIndex = 1;
pub const MAX_PACK_INDEX: PackIndex = 0o1777;

/// Index of a pack in the fixed pool, part of every directory sector address
pub type PackIndex = u16;

/// Enumerates MFD errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug,Clone,PartialEq)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("name conflict")]
    NameConflict,
    #[error("out of space")]
    OutOfSpace,
    #[error("i/o error on device {device}: {status}, device status {device_status:o}, code {error_code}")]
    IoError {
        device: DeviceId,
        status: IoStatus,
        device_status: u32,
        error_code: u32
    },
    #[error("no path to device")]
    NoPathToDevice,
    #[error("device not accessible")]
    DeviceNotAccessible,
    #[error("pack not prepped")]
    PackNotPrepped,
    #[error("pack not formatted")]
    PackNotFormatted,
    #[error("sector format conflict: {0}")]
    SectorFormatConflict(String),
    #[error("file is on an output queue")]
    FileOnOutputQueue,
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
    #[error("operation aborted by operator")]
    OperationAborted,
    #[error("engine is terminating")]
    Terminating,
    #[error("directory sector {0} is not in cache")]
    NotInCache(DirSectorAddr),
    #[error("cycle is out of range")]
    InvalidCycle,
    #[error("maximum granules exceeded")]
    MaxGranulesExceeded,
    #[error("file is not assigned")]
    NotAssigned,
    #[error("invalid name")]
    InvalidName,
    #[error("operation needs a mass storage file")]
    NotMassStorage,
    #[error("track range is out of bounds")]
    TrackRangeInvalid
}

impl Error {
    pub fn from_io(device: DeviceId,failure: IoFailure) -> Self {
        match failure.status {
            IoStatus::NoPath => Self::NoPathToDevice,
            status => Self::IoError {
                device,
                status,
                device_status: failure.device_status,
                error_code: failure.error_code
            }
        }
    }
    /// Errors the caller of the engine should escalate to a system stop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InternalInconsistency(_) | Self::IoError{..} => true,
            _ => false
        }
    }
}

pub type Result<T> = std::result::Result<T,Error>;

/// Shorthand used where an invariant has been found broken
pub fn inconsistent<T>(msg: &str) -> Result<T> {
    log::error!("{}",msg);
    Err(Error::InternalInconsistency(msg.to_string()))
}

/// Address of a directory sector: pack index, directory-track index, sector within the track.
/// Ordering is by pack, then track, then sector, which is the order of the packed word.
#[derive(PartialEq,Eq,PartialOrd,Ord,Hash,Clone,Copy,Debug)]
pub struct DirSectorAddr(Word);

impl DirSectorAddr {
    pub fn new(pack: PackIndex,track: usize,sector: usize) -> Self {
        let mut w = word::set_field(0,0,6,sector as Word);
        w = word::set_field(w,6,18,track as Word);
        w = word::set_field(w,24,10,pack as Word);
        Self(w)
    }
    pub fn pack_index(&self) -> PackIndex {
        word::get_field(self.0,24,10) as PackIndex
    }
    /// Index of the directory track within the pack's directory (not a device track)
    pub fn track_index(&self) -> usize {
        word::get_field(self.0,6,18) as usize
    }
    pub fn sector_index(&self) -> usize {
        word::get_field(self.0,0,6) as usize
    }
    /// Address of the DAS that governs this sector
    pub fn das(&self) -> Self {
        let track = self.track_index();
        Self::new(self.pack_index(),track - track % TRACKS_PER_DAS,0)
    }
    /// Sibling sector in the same track
    pub fn with_sector(&self,sector: usize) -> Self {
        Self::new(self.pack_index(),self.track_index(),sector)
    }
    pub fn to_word(&self) -> Word {
        self.0
    }
    /// Decode a link word, None if the no-link bit is set
    pub fn from_link(w: Word) -> Option<Self> {
        match word::get_bit(w,NO_LINK_BIT) {
            true => None,
            false => Some(Self(w & 0o377777777777))
        }
    }
    /// Encode an optional address as a link word
    pub fn link(addr: Option<Self>) -> Word {
        match addr {
            Some(a) => a.0,
            None => NO_LINK
        }
    }
}

impl fmt::Display for DirSectorAddr {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"[{}:{}:{:02}]",self.pack_index(),self.track_index(),self.sector_index())
    }
}

#[derive(PartialEq,Eq,Clone,Copy,Debug,FromPrimitive)]
pub enum FileType {
    MassStorage = 0,
    Tape = 1,
    Removable = 2
}

impl fmt::Display for FileType {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MassStorage => write!(f,"MS"),
            Self::Tape => write!(f,"TAPE"),
            Self::Removable => write!(f,"REM")
        }
    }
}

/// Knobs that are fixed for the life of an engine
#[derive(Clone,Debug)]
pub struct Tunables {
    /// default maximum cycle range for new file sets
    pub max_cycle_range: usize,
    pub lookup_table_size: usize,
    /// keep a hardware (bad track) bitmap on each fixed pack
    pub hardware_bitmap: bool,
    /// ask the operator before initializing a fixed pack
    pub confirm_fixed: bool
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_cycle_range: DEFAULT_MAX_RANGE,
            lookup_table_size: DEFAULT_LOOKUP_SIZE,
            hardware_bitmap: true,
            confirm_fixed: false
        }
    }
}

/// Distance going down from `high` to `low` in the wrapping cycle space
pub fn cycles_below(high: u32,low: u32) -> usize {
    ((high + CYCLE_MODULUS - low) % CYCLE_MODULUS) as usize
}

/// Absolute cycle that is `offset` cycles below `high`
pub fn cycle_minus(high: u32,offset: usize) -> u32 {
    let m = CYCLE_MODULUS as usize;
    let zero_based = (high as usize - 1 + m - offset % m) % m;
    zero_based as u32 + 1
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_fields() {
        let a = DirSectorAddr::new(3,20,63);
        assert_eq!(a.pack_index(),3);
        assert_eq!(a.track_index(),20);
        assert_eq!(a.sector_index(),63);
        assert_eq!(a.das(),DirSectorAddr::new(3,18,0));
        assert_eq!(DirSectorAddr::from_link(a.to_word()),Some(a));
        assert_eq!(DirSectorAddr::from_link(NO_LINK),None);
        assert!(DirSectorAddr::new(1,0,5) < DirSectorAddr::new(1,1,0));
        assert!(DirSectorAddr::new(1,9,0) < DirSectorAddr::new(2,0,0));
    }

    #[test]
    fn fatal_errors() {
        assert!(Error::InternalInconsistency("x".to_string()).is_fatal());
        assert!(Error::from_io(2,IoFailure::new(IoStatus::DeviceError)).is_fatal());
        assert_eq!(Error::from_io(2,IoFailure::new(IoStatus::NoPath)),Error::NoPathToDevice);
        assert!(!Error::NotFound.is_fatal());
    }

    #[test]
    fn cycle_wrap() {
        assert_eq!(cycles_below(5,3),2);
        assert_eq!(cycles_below(2,998),3);
        assert_eq!(cycles_below(7,7),0);
        assert_eq!(cycle_minus(5,2),3);
        assert_eq!(cycle_minus(2,3),998);
        assert_eq!(cycle_minus(1,1),999);
    }
}
