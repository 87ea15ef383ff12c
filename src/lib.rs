//! # `mfdkit` main library
//!
//! This library implements the Master File Directory (MFD) of an emulated 36-bit mainframe
//! operating system.  The MFD is the catalog and space manager for mass storage: it keeps
//! the track bitmaps of every fixed pack, the directory sectors those bitmaps live in, and
//! the file sets, file cycles and extent tables that make up the catalog.
//!
//! ## Architecture
//!
//! The engine is built around three trait objects:
//! * `device::BlockDevice` stores words in blocks, it knows nothing about directories
//! * `device::channel::Channel` routes synchronous block requests to devices
//! * `console::Console` carries operator messages and prompts
//!
//! When an `mfd::Mfd` is created it takes ownership of a channel and a console.
//! Directory changes are held in the engine's sector cache until committed, and the pack
//! images themselves are memory resident until saved to the host file system.
//!
//! ## Words
//!
//! Everything on a pack is a 36-bit word held in a `u64`.  Helpers for fields, partial words
//! and the Fieldata character set are in `word`.  On the host, words are packed two per nine bytes.
//!
//! ## Pack Images
//!
//! `device::pack_image::PackImage` is the only device kind.  A pack is prepped (given a label in
//! block 2) by `mkpack`, and brought up by the engine using the pack list of a JSON configuration.

pub mod word;
pub mod device;
pub mod console;
pub mod config;
pub mod mfd;
pub mod commands;

use std::io::Read;
use log::{info,warn};
use colored::Colorize;
use device::BlockDevice;
use device::pack_image::PackImage;
use word::Word;

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const KNOWN_FILE_EXTENSIONS: &str = "pack,mfdp,img";

/// Save the pack image (make changes permanent)
pub fn save_pack(dev: &dyn BlockDevice,img_path: &str) -> STDRESULT {
    std::fs::write(img_path,dev.to_bytes())?;
    Ok(())
}

/// Given a bytestream return a pack image, or Err if the bytestream cannot be interpreted.
pub fn create_pack_from_bytestream(pack_data: &[u8]) -> Result<PackImage,DYNERR> {
    match PackImage::from_bytes(pack_data) {
        Ok(img) => {
            info!("identified pack image with {} blocks",img.geometry().block_count);
            Ok(img)
        },
        Err(e) => {
            warn!("cannot interpret pack image");
            Err(Box::new(e))
        }
    }
}

/// Calls `create_pack_from_bytestream` getting the bytes from a file.
pub fn create_pack_from_file(img_path: &str) -> Result<PackImage,DYNERR> {
    if let Some(ext) = img_path.split('.').last() {
        if !KNOWN_FILE_EXTENSIONS.contains(&ext.to_lowercase()) {
            info!("unexpected extension `{}`, trying anyway",ext);
        }
    }
    match std::fs::read(img_path) {
        Ok(pack_data) => create_pack_from_bytestream(&pack_data),
        Err(e) => Err(Box::new(e))
    }
}

/// Calls `create_pack_from_bytestream` getting the bytes from stdin.
pub fn create_pack_from_stdin() -> Result<PackImage,DYNERR> {
    let mut pack_data = Vec::new();
    match std::io::stdin().read_to_end(&mut pack_data) {
        Ok(_n) => create_pack_from_bytestream(&pack_data),
        Err(e) => Err(Box::new(e))
    }
}

/// Format words as rows of octal, with the Fieldata and ASCII readings alongside
pub fn block_lines(start_word: u64,words: &[Word]) -> Vec<String> {
    let mut ans = Vec::new();
    for (row,chunk) in words.chunks(4).enumerate() {
        let mut line = format!("{:06o} : ",start_word as usize + row*4);
        for w in chunk {
            line += &word::octal(*w);
            line += " ";
        }
        for _blank in chunk.len()..4 {
            line += "             ";
        }
        let fd: String = word::from_fieldata(chunk).chars().map(|c| match c {
            ' '..='~' => c,
            _ => '.'
        }).collect();
        let asc: String = word::from_ascii_words(chunk).chars().map(|c| match c {
            ' '..='~' => c,
            _ => '.'
        }).collect();
        line += &format!("|F| {:24} |A| {}",fd,asc);
        ans.push(line);
    }
    ans
}

/// Display words to stdout in columns of octal, Fieldata, and ASCII
pub fn display_block(start_word: u64,words: &[Word]) {
    for line in block_lines(start_word,words) {
        let (addr,rest) = line.split_at(6);
        println!("{}{}",addr.dimmed(),rest);
    }
}

/// Display the host representation of words, two words per nine bytes
pub fn display_raw(words: &[Word]) {
    for (row,chunk) in words.chunks(8).enumerate() {
        println!("{:06o} : {}",row*8,hex::encode_upper(word::words_to_bytes(chunk)));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn octal_rows() {
        let words = word::to_ascii_words("VOL1PACK",2);
        let lines = block_lines(56,&words);
        assert_eq!(lines.len(),1);
        assert!(lines[0].starts_with("000070 : "));
        assert!(lines[0].ends_with("|A| VOL1PACK"));
    }
}
