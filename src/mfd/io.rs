//! ### Device I/O and commit
//!
//! All block traffic of the engine goes through `device_io`, which turns recoverable device
//! failures into an operator retry prompt.  Canceled requests are never retried, and the
//! cancel token is cleared so that later requests go through.

use log::{debug,error,info,warn};
use crate::device::{DeviceId,IoFunction,IoStatus};
use crate::word::Word;
use super::types::*;
use super::store::TrackMapping;
use super::MfdState;

const RETRY_RESPONSES: [&str;2] = ["Y","N"];

impl MfdState {
    pub(super) fn device_io(&mut self,device: DeviceId,function: IoFunction,block_id: u64,word_count: usize,buf: &mut Vec<Word>) -> Result<()> {
        loop {
            let failure = match self.channel.block_io(device,function,block_id,word_count,buf,&self.cancel) {
                Ok(()) => return Ok(()),
                Err(f) => f
            };
            error!("device {} {:?} block {}: {}",device,function,block_id,failure);
            if failure.status==IoStatus::Canceled {
                // the cancel ends this request only
                self.cancel.reset();
                return Err(Error::from_io(device,failure));
            }
            if failure.recoverable {
                let msg = format!("DEVICE {} {} ERROR BLOCK {} STATUS {:o} RETRY Y/N",
                    device,
                    match function { IoFunction::Read => "READ", IoFunction::Write => "WRITE" },
                    block_id,
                    failure.device_status);
                if self.console.post_prompt(&msg,&RETRY_RESPONSES)==0 {
                    warn!("operator retry on device {}",device);
                    continue;
                }
            }
            return Err(Error::from_io(device,failure));
        }
    }
    /// Write every pending block, optionally restricted to one pack.
    /// The pending set is cleared only when all writes succeed.
    pub(super) fn commit_pending(&mut self,pack: Option<PackIndex>) -> Result<usize> {
        let blocks = self.store.pending_blocks()?;
        let mut count = 0;
        for mut b in blocks {
            if let Some(p) = pack {
                if b.first.pack_index()!=p {
                    continue;
                }
            }
            let n = b.words.len();
            self.device_io(b.device,IoFunction::Write,b.block_id,n,&mut b.words)?;
            count += 1;
        }
        match pack {
            Some(p) => self.store.clear_pending_for(p),
            None => self.store.clear_pending()
        }
        if count > 0 {
            info!("commit wrote {} blocks",count);
        }
        Ok(count)
    }
    /// Read sectors straight from the device, bypassing the cache
    pub(super) fn read_device_sectors(&mut self,mapping: TrackMapping,first: usize,count: usize) -> Result<Vec<Word>> {
        let spb = mapping.sectors_per_block();
        let first_block = first / spb;
        let end_block = (first + count + spb - 1) / spb;
        let mut words = Vec::new();
        for blk in first_block..end_block {
            let mut buf = Vec::new();
            let block_id = mapping.device_track * mapping.blocks_per_track() + blk as u64;
            self.device_io(mapping.device,IoFunction::Read,block_id,mapping.prep_factor,&mut buf)?;
            words.append(&mut buf);
        }
        let skip = (first - first_block * spb) * WORDS_PER_SECTOR;
        debug!("read {} sectors from device {} track {}",count,mapping.device,mapping.device_track);
        Ok(words[skip..skip+count*WORDS_PER_SECTOR].to_vec())
    }
}
