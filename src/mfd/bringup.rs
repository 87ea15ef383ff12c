//! ### Pack bring-up
//!
//! Runs once per device at startup.  Every fixed pack is formatted from scratch (cold start):
//! the label is checked against the device geometry, directory track 0 is laid down with the
//! first DAS, pack sector 1 and the bitmaps, the result is committed and then read back from
//! the device to load the in-memory allocator.  A pack that fails any step is marked down and
//! the engine carries on without it.

use bit_vec::BitVec;
use log::{debug,error,info,warn};
use crate::device::{DeviceId,IoFunction};
use crate::word;
use super::types::*;
use super::sector::{self,Das,DasEntry,PackLabel,PackSector1,DirRecord,Sector,EMPTY_SECTOR};
use super::store::TrackMapping;
use super::packs::PackInfo;
use super::MfdState;

/// A device to bring up
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct PackSpec {
    pub device: DeviceId,
    /// member of the fixed pool
    pub fixed: bool
}

/// A device that came up
#[derive(Clone,Debug,PartialEq)]
pub struct PackUp {
    pub device: DeviceId,
    pub name: String,
    /// pack index, None for a removable pack
    pub index: Option<PackIndex>
}

#[derive(Clone,Debug,Default)]
pub struct BringUpReport {
    pub up: Vec<PackUp>,
    pub down: Vec<(DeviceId,Error)>
}

const CONFIRM_RESPONSES: [&str;2] = ["Y","N"];

impl MfdState {
    pub(super) fn bring_up(&mut self,specs: &[PackSpec]) -> Result<BringUpReport> {
        if !self.packs.is_empty() {
            return inconsistent("packs are already up");
        }
        let mut report = BringUpReport::default();
        let mut next_index = FIRST_PACK_INDEX;
        for spec in specs {
            if next_index > MAX_PACK_INDEX {
                report.down.push((spec.device,Error::OutOfSpace));
                continue;
            }
            match self.bring_up_pack(spec,next_index) {
                Ok(up) => {
                    if up.index.is_some() {
                        next_index += 1;
                    }
                    report.up.push(up);
                },
                Err(e) => {
                    warn!("device {} is down: {}",spec.device,e);
                    self.console.post_message(&format!("DEVICE {} DOWN: {}",spec.device,e));
                    self.store.discard_pack(next_index);
                    self.packs.remove(&next_index);
                    report.down.push((spec.device,e));
                }
            }
        }
        if self.packs.is_empty() {
            warn!("no fixed packs came up");
        }
        info!("bring-up complete, {} up, {} down",report.up.len(),report.down.len());
        Ok(report)
    }
    fn read_label(&mut self,device: DeviceId) -> Result<PackLabel> {
        let geometry = match self.channel.query_geometry(device) {
            Ok(g) => g,
            Err(f) => return Err(Error::from_io(device,f))
        };
        if !geometry.mounted || !geometry.ready || geometry.write_protected {
            debug!("device {} geometry {:?}",device,geometry);
            return Err(Error::DeviceNotAccessible);
        }
        let mut buf = Vec::new();
        self.device_io(device,IoFunction::Read,LABEL_BLOCK,WORDS_PER_SECTOR,&mut buf)?;
        let label = match PackLabel::from_words(&buf) {
            Some(l) => l,
            None => return Err(Error::PackNotPrepped)
        };
        if label.prep_factor!=geometry.block_size {
            return Err(Error::SectorFormatConflict(format!("label prep factor {} but device blocks are {} words",label.prep_factor,geometry.block_size)));
        }
        if label.blocks_per_track * label.prep_factor as u64 != WORDS_PER_TRACK as u64 {
            return Err(Error::SectorFormatConflict(format!("{} blocks per track with prep factor {}",label.blocks_per_track,label.prep_factor)));
        }
        if label.total_tracks * label.blocks_per_track > geometry.block_count {
            return Err(Error::SectorFormatConflict(format!("{} tracks do not fit in {} blocks",label.total_tracks,geometry.block_count)));
        }
        if label.dir_track <= LABEL_BLOCK / label.blocks_per_track || label.dir_track >= label.total_tracks {
            return Err(Error::SectorFormatConflict(format!("directory track {} is out of place",label.dir_track)));
        }
        Ok(label)
    }
    fn bring_up_pack(&mut self,spec: &PackSpec,index: PackIndex) -> Result<PackUp> {
        let label = self.read_label(spec.device)?;
        let name_taken = self.packs.values().any(|p| p.name==label.pack_name) ||
            self.removable.iter().any(|(_,n)| *n==label.pack_name);
        if name_taken {
            self.console.post_prompt(&format!("PACK {} ON DEVICE {} DUPLICATES A PACK NAME, DEVICE DOWNED",label.pack_name,spec.device),&["OK"]);
            return Err(Error::NameConflict);
        }
        if !spec.fixed {
            info!("removable pack {} on device {}",label.pack_name,spec.device);
            self.removable.push((spec.device,label.pack_name.clone()));
            return Ok(PackUp { device: spec.device, name: label.pack_name, index: None });
        }
        if self.tunables.confirm_fixed {
            let msg = format!("INITIALIZE FIXED PACK {} ON DEVICE {} Y/N",label.pack_name,spec.device);
            if self.console.post_prompt(&msg,&CONFIRM_RESPONSES)!=0 {
                return Err(Error::OperationAborted);
            }
        }
        self.format_pack(spec.device,index,&label)?;
        self.commit_pending(Some(index))?;
        self.verify_pack(index,&label)?;
        self.console.post_message(&format!("PACK {} UP ON DEVICE {} AS INDEX {}",label.pack_name,spec.device,index));
        Ok(PackUp { device: spec.device, name: label.pack_name, index: Some(index) })
    }
    /// Lay down directory track 0 in the cache
    fn format_pack(&mut self,device: DeviceId,index: PackIndex,label: &PackLabel) -> Result<()> {
        let total = label.total_tracks;
        let smbt_sectors = sector::bitmap_sectors(total);
        let hmbt_sectors = match self.tunables.hardware_bitmap {
            true => smbt_sectors,
            false => 0
        };
        let reserved_sectors = 2 + smbt_sectors + hmbt_sectors;
        if reserved_sectors > SECTORS_PER_TRACK {
            return Err(Error::SectorFormatConflict(format!("bitmaps for {} tracks do not fit the first directory track",total)));
        }
        let mapping = TrackMapping { device, device_track: label.dir_track, prep_factor: label.prep_factor };
        self.store.establish_track(index,0,mapping,true);
        let reserved_tracks = label.dir_track + 1;
        let small_disk = total < SMALL_DISK_TRACKS;
        self.packs.insert(index,PackInfo {
            name: label.pack_name.clone(),
            index,
            device,
            fixed: true,
            small_disk,
            total_tracks: total,
            prep_factor: label.prep_factor,
            first_dir_track: label.dir_track,
            dir_tracks: 1,
            bitmap: BitVec::from_elem(total as usize,false),
            bad: match hmbt_sectors {
                0 => None,
                _ => Some(BitVec::from_elem(total as usize,false))
            },
            available: total
        });
        let mut das = Das::new();
        das.entries[0] = DasEntry { device_track: Some(label.dir_track), mask: 0 };
        for s in 0..reserved_sectors {
            das.entries[0].set_allocated(s,true);
        }
        self.store.write(DirSectorAddr::new(index,0,0),&das)?;
        let s1 = PackSector1 {
            smbt_first: Some(DirSectorAddr::new(index,0,2)),
            smbt_sectors,
            hmbt_first: match hmbt_sectors {
                0 => None,
                _ => Some(DirSectorAddr::new(index,0,2+smbt_sectors))
            },
            hmbt_sectors,
            tracks_available: total,
            accessible_tracks: total,
            pack_index: index,
            small_disk,
            fixed: true,
            version: SECTOR_FORMAT_VERSION,
            das_offset: 0,
            prep_factor: label.prep_factor,
            total_tracks: total,
            pack_name: label.pack_name.clone(),
            dir_track_count: 1
        };
        self.store.write(DirSectorAddr::new(index,0,1),&s1)?;
        // reserve everything through directory track 0
        let candidates = [index];
        let grant = self.allocate_tracks(reserved_tracks,&candidates,false)?;
        if grant.start!=0 || grant.count!=reserved_tracks {
            return inconsistent("reserved tracks were not granted from track 0");
        }
        info!("pack {} formatted: {} tracks, {} reserved, small disk {}",label.pack_name,total,reserved_tracks,small_disk);
        Ok(())
    }
    /// Read back sector 0, sector 1 and the SMBT, check them, and load the bitmap
    fn verify_pack(&mut self,index: PackIndex,label: &PackLabel) -> Result<()> {
        let mapping = match self.store.mapping(DirSectorAddr::new(index,0,0)) {
            Some(m) => m,
            None => return inconsistent("directory track 0 is not mapped")
        };
        let smbt_sectors = sector::bitmap_sectors(label.total_tracks);
        let words = self.read_device_sectors(mapping,0,2+smbt_sectors)?;
        let mut s1_raw: Sector = EMPTY_SECTOR;
        s1_raw.copy_from_slice(&words[WORDS_PER_SECTOR..2*WORDS_PER_SECTOR]);
        let s1 = PackSector1::from_sector(&s1_raw);
        if s1.smbt_first.is_none() || s1.pack_name!=label.pack_name {
            return Err(Error::PackNotFormatted);
        }
        if !ACCEPTED_VERSIONS.contains(&s1.version) {
            return Err(Error::SectorFormatConflict(format!("sector format version {}",s1.version)));
        }
        if s1.das_offset % SECTORS_PER_DAS_GROUP as word::Word != 0 {
            return Err(Error::SectorFormatConflict(format!("DAS offset {}",s1.das_offset)));
        }
        if s1.pack_index!=index || s1.total_tracks!=label.total_tracks {
            return Err(Error::SectorFormatConflict(format!("pack sector 1 says index {} with {} tracks",s1.pack_index,s1.total_tracks)));
        }
        let smbt = &words[2*WORDS_PER_SECTOR..];
        let mut bitmap = BitVec::from_elem(label.total_tracks as usize,false);
        for t in 0..label.total_tracks {
            let (sec_off,w,bit) = sector::bitmap_position(t);
            bitmap.set(t as usize,word::get_bit(smbt[sec_off*WORDS_PER_SECTOR+w],bit));
        }
        let pack = self.pack_mut(index)?;
        if pack.bitmap!=bitmap {
            error!("bitmap of pack {} did not survive the round trip",pack.name);
            return inconsistent("persisted bitmap differs from memory");
        }
        pack.bitmap = bitmap;
        pack.available = s1.tracks_available;
        debug!("pack {} verified, {} tracks available",pack.name,pack.available);
        Ok(())
    }
    /// Bitmap as persisted on the device, ignoring the cache
    pub(super) fn persisted_bitmap(&mut self,index: PackIndex) -> Result<BitVec> {
        let total = self.pack(index)?.total_tracks;
        let mapping = match self.store.mapping(DirSectorAddr::new(index,0,0)) {
            Some(m) => m,
            None => return inconsistent("directory track 0 is not mapped")
        };
        let words = self.read_device_sectors(mapping,2,sector::bitmap_sectors(total))?;
        let mut ans = BitVec::from_elem(total as usize,false);
        for t in 0..total {
            let (sec_off,w,bit) = sector::bitmap_position(t);
            ans.set(t as usize,word::get_bit(words[sec_off*WORDS_PER_SECTOR+w],bit));
        }
        Ok(ans)
    }
}
