use clap;
use log::info;
use crate::device::BlockDevice;
use crate::device::pack_image::PackImage;
use crate::mfd::sector::PackLabel;
use crate::mfd::types::LABEL_BLOCK;
use super::CommandError;
use crate::STDRESULT;

const MAX_NAME_LEN: usize = 6;

pub fn mkpack(cmd: &clap::ArgMatches) -> STDRESULT {
    let (name,tracks,prep_str,path) = match (
        cmd.get_one::<String>("name"),
        cmd.get_one::<u64>("tracks"),
        cmd.get_one::<String>("prep"),
        cmd.get_one::<String>("pack")
    ) {
        (Some(n),Some(t),Some(p),Some(d)) => (n,*t,p,d),
        _ => return Err(Box::new(CommandError::InvalidCommand))
    };
    if name.len()==0 || name.len() > MAX_NAME_LEN || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        eprintln!("pack name must be 1 to {} letters or digits",MAX_NAME_LEN);
        return Err(Box::new(CommandError::OutOfRange));
    }
    if std::path::Path::new(path).exists() {
        eprintln!("{} already exists",path);
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let prep = usize::from_str_radix(prep_str,10)?;
    let mut img = PackImage::create_tracks(prep,tracks)?;
    if !cmd.get_flag("unlabeled") {
        let label = PackLabel::new(name,prep,tracks);
        if let Err(f) = img.write_block(LABEL_BLOCK,&label.to_words()) {
            eprintln!("could not write label: {}",f);
            return Err(Box::new(CommandError::OutOfRange));
        }
        info!("pack {} prepped, directory starts on track {}",label.pack_name,label.dir_track);
    }
    crate::save_pack(&img,path)
}
