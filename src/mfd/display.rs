//! ### Catalog display
//!
//! Operator style listings of the catalog and the fixed pool.

use colored::Colorize;
use super::{Mfd,Result,FileType};

/// One line per file set followed by one line per cycle
pub fn catalog_lines(mfd: &Mfd,color: bool) -> Result<Vec<String>> {
    let mut ans = Vec::new();
    for set in mfd.catalog()? {
        let name = format!("{}*{}",set.qualifier,set.filename);
        let guard = match set.guarded {
            true => "G",
            false => " "
        };
        ans.push(match color {
            true => format!("{} {} {} cycles {} range {}/{}",name.bold(),set.file_type.to_string().cyan(),guard.red(),set.cycle_count,set.current_range,set.max_range),
            false => format!("{} {} {} cycles {} range {}/{}",name,set.file_type,guard,set.cycle_count,set.current_range,set.max_range)
        });
        for (cycle,main) in &set.cycles {
            let info = mfd.file_cycle_info(*main)?;
            let mut flags = String::new();
            if info.assign_count > 0 {
                flags += &format!(" assigned({})",info.assign_count);
            }
            if info.to_be_dropped {
                flags += " to-be-dropped";
            }
            if info.output_queued {
                flags += " queued";
            }
            let body = match info.file_type {
                FileType::Tape => format!("reels {}",info.reels.join(",")),
                _ => format!("tracks {} granules {}/{}",info.tracks_allocated,info.highest_granule,info.max_granules)
            };
            let cyc = format!("({})",cycle);
            ans.push(match color {
                true => format!("    {} {} created {}{}",cyc.green(),body,info.created.format("%Y-%m-%d %H:%M:%S"),flags.yellow()),
                false => format!("    {} {} created {}{}",cyc,body,info.created.format("%Y-%m-%d %H:%M:%S"),flags)
            });
        }
    }
    Ok(ans)
}

/// Header line followed by one line per fixed pack
pub fn pack_lines(mfd: &Mfd,color: bool) -> Result<Vec<String>> {
    let mut ans = vec![format!("{:>5} {:8} {:>6} {:>8} {:>8} {:>5} {:>5}","INDEX","PACK","DEVICE","TRACKS","FREE","DIR","BAD")];
    for p in mfd.pack_summaries()? {
        let low = p.available_tracks * 10 < p.total_tracks;
        let (name,free) = match (color,low) {
            (true,true) => (p.name.bold().to_string(),p.available_tracks.to_string().red().to_string()),
            (true,false) => (p.name.bold().to_string(),p.available_tracks.to_string()),
            (false,_) => (p.name.clone(),p.available_tracks.to_string())
        };
        ans.push(format!("{:>5} {:8} {:>6} {:>8} {:>8} {:>5} {:>5}",p.index,name,p.device,p.total_tracks,free,p.directory_tracks,p.bad_tracks));
    }
    Ok(ans)
}
