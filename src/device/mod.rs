//! # Device Module
//!
//! The MFD engine never touches storage directly.  It issues synchronous block requests through a
//! `channel::Channel`, which routes them to objects implementing the `BlockDevice` trait.
//! This is the narrow contract the engine consumes:
//! * `block_io(device, READ|WRITE, block_id, word_count, buffer)`
//! * `query_geometry(device)`
//!
//! A block is `block_size` words, where the block size is the prep factor of the pack.
//! The only device provided here is `pack_image::PackImage`, a memory resident pack that
//! can be serialized to a host file, in the same way a2-style disk images are held in memory
//! and saved when the work is done.

pub mod pack_image;
pub mod channel;

use std::fmt;
use num_derive::FromPrimitive;
use crate::word::Word;

/// Identifies a device on the channel
pub type DeviceId = u32;

/// Enumerates device layer errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("pack image header is not recognized")]
    ImageFormat,
    #[error("pack image size does not match its header")]
    ImageSizeMismatch,
    #[error("block size is not a valid prep factor")]
    BadPrepFactor,
    #[error("device is already attached")]
    DuplicateDevice
}

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum IoFunction {
    Read,
    Write
}

/// Channel level status of a failed request.
/// The numeric values are what gets reported as the error code.
#[derive(PartialEq,Eq,Clone,Copy,Debug,FromPrimitive)]
pub enum IoStatus {
    Successful = 0,
    NoPath = 1,
    NotReady = 2,
    WriteProtected = 3,
    InvalidBlockId = 4,
    InvalidWordCount = 5,
    DeviceError = 6,
    Canceled = 7,
    SystemError = 8
}

impl fmt::Display for IoStatus {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Successful => write!(f,"successful"),
            Self::NoPath => write!(f,"no path to device"),
            Self::NotReady => write!(f,"device not ready"),
            Self::WriteProtected => write!(f,"device write protected"),
            Self::InvalidBlockId => write!(f,"invalid block id"),
            Self::InvalidWordCount => write!(f,"invalid word count"),
            Self::DeviceError => write!(f,"device error"),
            Self::Canceled => write!(f,"canceled"),
            Self::SystemError => write!(f,"system error")
        }
    }
}

/// Outcome of a failed block request, `{status, device status, error code}`
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct IoFailure {
    pub status: IoStatus,
    /// device specific status, opaque to the engine
    pub device_status: u32,
    /// sub-code, for device errors this is the count of injected faults left
    pub error_code: u32,
    /// whether an operator retry makes sense
    pub recoverable: bool
}

impl IoFailure {
    pub fn new(status: IoStatus) -> Self {
        Self {
            status,
            device_status: 0,
            error_code: status as u32,
            recoverable: false
        }
    }
    pub fn recoverable(status: IoStatus,device_status: u32) -> Self {
        Self {
            status,
            device_status,
            error_code: status as u32,
            recoverable: true
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{} (device status {:o}, code {})",self.status,self.device_status,self.error_code)
    }
}

/// Answer to `query_geometry`
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct Geometry {
    pub block_count: u64,
    /// words per block
    pub block_size: usize,
    pub mounted: bool,
    pub ready: bool,
    pub write_protected: bool
}

/// Block storage as seen from the far side of a channel
pub trait BlockDevice: Send {
    fn geometry(&self) -> Geometry;
    /// Read `word_count` words starting at the beginning of block `block_id`.
    /// The count may be less than the block size but may not exceed it.
    fn read_block(&mut self,block_id: u64,word_count: usize) -> Result<Vec<Word>,IoFailure>;
    /// Write a block, short data is zero filled to the block boundary.
    fn write_block(&mut self,block_id: u64,dat: &[Word]) -> Result<(),IoFailure>;
    /// Serialize the whole device (for saving to the host)
    fn to_bytes(&self) -> Vec<u8>;
}
