use clap;
use std::io::Read;
use std::path::Path;
use colored::Colorize;
use log::{error,info};
use crate::config::EngineConfig;
use crate::console::LogConsole;
use crate::device::{BlockDevice,DeviceId};
use crate::device::channel::WorkerChannel;
use crate::mfd::{Mfd,PackSpec};
use super::script::Session;
use super::CommandError;
use crate::STDRESULT;

pub fn run(cmd: &clap::ArgMatches) -> STDRESULT {
    let color = cmd.get_flag("console") || atty::is(atty::Stream::Stdout);
    if !color {
        colored::control::set_override(false);
    }
    let config_path = match cmd.get_one::<String>("config") {
        Some(p) => p,
        None => return Err(Box::new(CommandError::InvalidCommand))
    };
    let config = EngineConfig::from_file(Path::new(config_path))?;
    let script = match cmd.get_one::<String>("script") {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => {
                eprintln!("could not read script {}",path);
                return Err(Box::new(CommandError::FileNotFound));
            }
        },
        None => {
            if atty::is(atty::Stream::Stdin) {
                eprintln!("script must be given with `--script` or piped");
                return Err(Box::new(CommandError::InvalidCommand));
            }
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s)?;
            s
        }
    };
    let answer = match cmd.get_one::<String>("answer") {
        Some(a) if a.eq_ignore_ascii_case("n") => 1,
        _ => 0
    };

    let mut devices: Vec<(DeviceId,Box<dyn BlockDevice>)> = Vec::new();
    let mut specs = Vec::new();
    let mut paths = Vec::new();
    for (i,entry) in config.packs.iter().enumerate() {
        let device = i as DeviceId + 1;
        let path = entry.path.to_string_lossy().to_string();
        let dev: Box<dyn BlockDevice> = Box::new(crate::create_pack_from_file(&path)?);
        devices.push((device,dev));
        specs.push(PackSpec { device, fixed: entry.fixed });
        paths.push((device,path));
    }
    let mfd = Mfd::new(Box::new(WorkerChannel::start(devices)),Box::new(LogConsole::new(answer)),config.tunables.clone());
    let report = mfd.bring_up(&specs)?;
    for (device,e) in &report.down {
        let path = paths.iter().find(|(d,_)| d==device).map(|(_,p)| p.as_str()).unwrap_or("?");
        eprintln!("{} {}: {}","down".red(),path,e);
    }
    for up in &report.up {
        info!("{} is up on device {}",up.name,up.device);
    }

    {
        let mut session = Session::new(&mfd,color);
        session.run(&script,&mut std::io::stdout())?;
    }
    mfd.shutdown()?;
    let mut channel = mfd.into_channel();
    for up in &report.up {
        let path = match paths.iter().find(|(d,_)| *d==up.device) {
            Some((_,p)) => p,
            None => continue
        };
        match channel.detach(up.device) {
            Some(dev) => crate::save_pack(dev.as_ref(),path)?,
            None => error!("device {} is no longer on the channel",up.device)
        }
    }
    Ok(())
}
