//! ## Pack image
//!
//! A pack image is a sequence of 36-bit words behind a small header.  On the host the words
//! are packed two per nine bytes.  The header is handled with `binrw`.
//!
//! The image is memory resident.  Changes are not permanent until `to_bytes` is written
//! back to the host file system by the caller.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32,Ordering};
use binrw::{BinRead,BinWrite};
use log::{debug,error};
use super::{BlockDevice,Geometry,IoFailure,IoStatus,Error};
use crate::word::{self,Word};

pub const IMAGE_VERSION: u16 = 1;
const HEADER_LEN: usize = 20;
const FLAG_WRITE_PROTECT: u16 = 1;

/// Valid prep factors (words per block)
pub const PREP_FACTORS: [usize;7] = [28,56,112,224,448,896,1792];

#[derive(BinRead,BinWrite,Debug,Clone)]
#[brw(little, magic = b"MFDP")]
struct Header {
    version: u16,
    flags: u16,
    block_size: u32,
    block_count: u64
}

/// Count of upcoming writes that fail with a recoverable device error.
/// Clones share the count, so faults can be armed after the image is handed to a channel.
#[derive(Clone,Default)]
pub struct WriteFaults {
    count: Arc<AtomicU32>
}

impl WriteFaults {
    pub fn arm(&self,count: u32) {
        self.count.store(count,Ordering::SeqCst);
    }
    pub fn remaining(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
    /// Consume one fault if any are armed
    fn take(&self) -> bool {
        self.count.fetch_update(Ordering::SeqCst,Ordering::SeqCst,|n| n.checked_sub(1)).is_ok()
    }
}

/// Memory resident pack
pub struct PackImage {
    block_size: usize,
    block_count: u64,
    data: Vec<Word>,
    mounted: bool,
    ready: bool,
    write_protected: bool,
    write_faults: WriteFaults
}

impl PackImage {
    /// Create a blank pack, all words zero.
    pub fn create(block_size: usize,block_count: u64) -> Result<Self,Error> {
        if !PREP_FACTORS.contains(&block_size) {
            return Err(Error::BadPrepFactor);
        }
        Ok(Self {
            block_size,
            block_count,
            data: vec![0;block_size*block_count as usize],
            mounted: true,
            ready: true,
            write_protected: false,
            write_faults: WriteFaults::default()
        })
    }
    /// Create a blank pack given a track count rather than a block count
    pub fn create_tracks(block_size: usize,tracks: u64) -> Result<Self,Error> {
        if !PREP_FACTORS.contains(&block_size) {
            return Err(Error::BadPrepFactor);
        }
        let blocks_per_track = (crate::mfd::types::WORDS_PER_TRACK / block_size) as u64;
        Self::create(block_size,tracks*blocks_per_track)
    }
    pub fn from_bytes(bytes: &[u8]) -> Result<Self,Error> {
        let header = match Header::read(&mut Cursor::new(bytes)) {
            Ok(h) => h,
            Err(e) => {
                debug!("pack image header: {}",e);
                return Err(Error::ImageFormat);
            }
        };
        if header.version != IMAGE_VERSION {
            error!("pack image version {} is not supported",header.version);
            return Err(Error::ImageFormat);
        }
        let block_size = header.block_size as usize;
        if !PREP_FACTORS.contains(&block_size) {
            return Err(Error::BadPrepFactor);
        }
        let words = block_size * header.block_count as usize;
        let mut data = word::bytes_to_words(&bytes[HEADER_LEN..]);
        if data.len() < words || data.len() > words + 1 {
            error!("pack image holds {} words, header calls for {}",data.len(),words);
            return Err(Error::ImageSizeMismatch);
        }
        data.truncate(words);
        Ok(Self {
            block_size,
            block_count: header.block_count,
            data,
            mounted: true,
            ready: true,
            write_protected: header.flags & FLAG_WRITE_PROTECT > 0,
            write_faults: WriteFaults::default()
        })
    }
    pub fn set_ready(&mut self,ready: bool) {
        self.ready = ready;
    }
    pub fn set_mounted(&mut self,mounted: bool) {
        self.mounted = mounted;
    }
    pub fn set_write_protected(&mut self,protect: bool) {
        self.write_protected = protect;
    }
    /// The next `count` writes fail with a recoverable device error
    pub fn inject_write_faults(&mut self,count: u32) {
        self.write_faults.arm(count);
    }
    /// Handle on the fault count that outlives moving the image into a channel
    pub fn write_faults(&self) -> WriteFaults {
        self.write_faults.clone()
    }
    fn check_access(&self,block_id: u64,word_count: usize) -> Result<usize,IoFailure> {
        if !self.mounted || !self.ready {
            return Err(IoFailure::new(IoStatus::NotReady));
        }
        if block_id >= self.block_count {
            return Err(IoFailure::new(IoStatus::InvalidBlockId));
        }
        if word_count > self.block_size {
            return Err(IoFailure::new(IoStatus::InvalidWordCount));
        }
        Ok(block_id as usize * self.block_size)
    }
}

impl BlockDevice for PackImage {
    fn geometry(&self) -> Geometry {
        Geometry {
            block_count: self.block_count,
            block_size: self.block_size,
            mounted: self.mounted,
            ready: self.ready,
            write_protected: self.write_protected
        }
    }
    fn read_block(&mut self,block_id: u64,word_count: usize) -> Result<Vec<Word>,IoFailure> {
        let offset = self.check_access(block_id,word_count)?;
        Ok(self.data[offset..offset+word_count].to_vec())
    }
    fn write_block(&mut self,block_id: u64,dat: &[Word]) -> Result<(),IoFailure> {
        let offset = self.check_access(block_id,dat.len())?;
        if self.write_protected {
            return Err(IoFailure::new(IoStatus::WriteProtected));
        }
        if self.write_faults.take() {
            return Err(IoFailure::recoverable(IoStatus::DeviceError,0o40));
        }
        for i in 0..self.block_size {
            self.data[offset+i] = match dat.get(i) {
                Some(w) => *w & word::WORD_MASK,
                None => 0
            };
        }
        Ok(())
    }
    fn to_bytes(&self) -> Vec<u8> {
        let header = Header {
            version: IMAGE_VERSION,
            flags: match self.write_protected {
                true => FLAG_WRITE_PROTECT,
                false => 0
            },
            block_size: self.block_size as u32,
            block_count: self.block_count
        };
        let mut cursor = Cursor::new(Vec::new());
        // writing into a Vec cannot fail
        if let Err(e) = header.write(&mut cursor) {
            panic!("pack image header: {}",e);
        }
        let mut ans = cursor.into_inner();
        ans.append(&mut word::words_to_bytes(&self.data));
        ans
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn image_bytes() {
        let mut img = PackImage::create(112,64).expect("create failed");
        img.write_block(5,&vec![0o777777777777,1,2]).expect("write failed");
        let bytes = img.to_bytes();
        assert_eq!(&bytes[0..4],b"MFDP");
        assert_eq!(bytes.len(),HEADER_LEN + 112*64*9/2);
        let mut copy = PackImage::from_bytes(&bytes).expect("reload failed");
        assert_eq!(copy.read_block(5,3).unwrap(),vec![0o777777777777,1,2]);
        assert_eq!(copy.geometry().block_count,64);
    }

    #[test]
    fn access_checks() {
        let mut img = PackImage::create(28,16).expect("create failed");
        assert_eq!(img.read_block(16,28).unwrap_err().status,IoStatus::InvalidBlockId);
        assert_eq!(img.read_block(0,29).unwrap_err().status,IoStatus::InvalidWordCount);
        img.inject_write_faults(1);
        assert!(img.write_block(0,&[1]).unwrap_err().recoverable);
        assert!(img.write_block(0,&[1]).is_ok());
        let faults = img.write_faults();
        faults.arm(2);
        assert!(img.write_block(0,&[1]).is_err());
        assert_eq!(faults.remaining(),1);
        img.set_write_protected(true);
        assert_eq!(img.write_block(0,&[1]).unwrap_err().status,IoStatus::WriteProtected);
        assert!(PackImage::create(100,16).is_err());
    }
}
