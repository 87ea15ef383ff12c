use clap;
use colored::Colorize;
use crate::device::BlockDevice;
use crate::device::pack_image::PackImage;
use crate::mfd::sector::{PackLabel,PackSector1,DirRecord,Sector,EMPTY_SECTOR};
use crate::mfd::types::{LABEL_BLOCK,WORDS_PER_SECTOR};
use super::CommandError;
use crate::{STDRESULT,DYNERR};

fn read_words(img: &mut PackImage,block: u64,count: usize) -> Result<Vec<crate::word::Word>,DYNERR> {
    match img.read_block(block,count) {
        Ok(words) => Ok(words),
        Err(f) => {
            eprintln!("block {}: {}",block,f);
            Err(Box::new(CommandError::OutOfRange))
        }
    }
}

/// Pack sector 1 as found on the device, None if the pack was never formatted
fn read_sector1(img: &mut PackImage,label: &PackLabel) -> Result<Option<PackSector1>,DYNERR> {
    let block = label.dir_track * label.blocks_per_track + (WORDS_PER_SECTOR / label.prep_factor) as u64;
    let offset = WORDS_PER_SECTOR % label.prep_factor;
    let words = read_words(img,block,offset + WORDS_PER_SECTOR)?;
    let mut raw: Sector = EMPTY_SECTOR;
    raw.copy_from_slice(&words[offset..offset+WORDS_PER_SECTOR]);
    let s1 = PackSector1::from_sector(&raw);
    match s1.smbt_first.is_some() && s1.pack_name==label.pack_name {
        true => Ok(Some(s1)),
        false => Ok(None)
    }
}

fn row(key: &str,val: String) {
    println!("{:16}{}",key.bold(),val);
}

pub fn inspect(cmd: &clap::ArgMatches) -> STDRESULT {
    if !cmd.get_flag("console") && !atty::is(atty::Stream::Stdout) {
        colored::control::set_override(false);
    }
    let mut img = match cmd.get_one::<String>("pack") {
        Some(path) => crate::create_pack_from_file(path)?,
        None => match atty::is(atty::Stream::Stdin) {
            true => {
                eprintln!("pack image must be given with `--pack` or piped");
                return Err(Box::new(CommandError::InvalidCommand));
            },
            false => crate::create_pack_from_stdin()?
        }
    };
    let geometry = img.geometry();
    if let Some(block) = cmd.get_one::<u64>("block") {
        if *block >= geometry.block_count {
            eprintln!("block {} is beyond the end of the pack ({} blocks)",block,geometry.block_count);
            return Err(Box::new(CommandError::OutOfRange));
        }
        let words = read_words(&mut img,*block,geometry.block_size)?;
        match cmd.get_flag("raw") {
            true => crate::display_raw(&words),
            false => crate::display_block(*block * geometry.block_size as u64,&words)
        }
        return Ok(());
    }
    row("blocks",format!("{} of {} words",geometry.block_count,geometry.block_size));
    row("protected",geometry.write_protected.to_string());
    let label = match PackLabel::from_words(&read_words(&mut img,LABEL_BLOCK,WORDS_PER_SECTOR)?) {
        Some(l) => l,
        None => {
            println!("{}","pack is not prepped".red());
            return Ok(());
        }
    };
    row("pack",label.pack_name.clone());
    row("tracks",label.total_tracks.to_string());
    row("prep factor",label.prep_factor.to_string());
    row("directory",format!("starts on track {}",label.dir_track));
    match read_sector1(&mut img,&label)? {
        Some(s1) => {
            row("pack index",s1.pack_index.to_string());
            row("available",s1.tracks_available.to_string());
            row("dir tracks",s1.dir_track_count.to_string());
            row("small disk",s1.small_disk.to_string());
            row("bitmaps",format!("{} SMBT sectors, {} HMBT sectors",s1.smbt_sectors,s1.hmbt_sectors));
            row("version",s1.version.to_string());
        },
        None => println!("{}","pack is not formatted".yellow())
    }
    Ok(())
}
