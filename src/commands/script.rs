//! ### Catalog scripts
//!
//! The `run` subcommand drives the engine with a small line oriented language.
//! Files are named `QUAL*FILE` for a file set or `QUAL*FILE(N)` for absolute cycle `N`.
//! Each line is parsed into an `Op` and handed to a `Session`, which holds the engine.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use log::debug;
use crate::mfd::{self,Mfd,DirSectorAddr,FileId,FileType,FileSetParams,FileCycleParams,DropOutcome};
use crate::mfd::display;
use super::CommandError;
use crate::{DYNERR,STDRESULT};

/// A file set or file cycle named in a script
#[derive(Clone,Debug,PartialEq)]
pub struct FileRef {
    pub qualifier: String,
    pub filename: String,
    pub cycle: Option<u32>
}

impl FromStr for FileRef {
    type Err = CommandError;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        let (name,cycle) = match s.find('(') {
            Some(i) => {
                if !s.ends_with(')') {
                    return Err(CommandError::InvalidCommand);
                }
                match u32::from_str(&s[i+1..s.len()-1]) {
                    Ok(c) => (&s[0..i],Some(c)),
                    Err(_) => return Err(CommandError::OutOfRange)
                }
            },
            None => (s,None)
        };
        let mut parts = name.split('*');
        match (parts.next(),parts.next(),parts.next()) {
            (Some(q),Some(f),None) if q.len()>0 && f.len()>0 => Ok(Self {
                qualifier: q.to_uppercase(),
                filename: f.to_uppercase(),
                cycle
            }),
            _ => Err(CommandError::InvalidCommand)
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cycle {
            Some(c) => write!(f,"{}*{}({})",self.qualifier,self.filename,c),
            None => write!(f,"{}*{}",self.qualifier,self.filename)
        }
    }
}

/// One script line
#[derive(Clone,Debug)]
pub enum Op {
    Set(FileSetParams),
    Cycle(FileRef,FileCycleParams),
    Alloc(FileRef,u64,u64),
    Free(FileRef,u64,u64),
    Assign(FileRef),
    Release(FileRef),
    Queue(FileRef,bool),
    Drop(FileRef),
    Extents(FileRef),
    Catalog,
    Packs,
    Commit
}

fn key_val(tok: &str) -> Option<(String,&str)> {
    tok.split_once('=').map(|(k,v)| (k.to_lowercase(),v))
}

fn number<T: FromStr>(s: &str) -> Result<T,CommandError> {
    match T::from_str(s) {
        Ok(n) => Ok(n),
        Err(_) => Err(CommandError::OutOfRange)
    }
}

fn cycle_ref(tok: Option<&&str>) -> Result<FileRef,CommandError> {
    let ans = FileRef::from_str(tok.ok_or(CommandError::InvalidCommand)?)?;
    match ans.cycle {
        Some(_) => Ok(ans),
        None => Err(CommandError::InvalidCommand)
    }
}

fn range_args(toks: &[&str]) -> Result<(FileRef,u64,u64),CommandError> {
    if toks.len()!=4 {
        return Err(CommandError::InvalidCommand);
    }
    Ok((cycle_ref(toks.get(1))?,number(toks[2])?,number(toks[3])?))
}

fn parse_set(toks: &[&str]) -> Result<Op,CommandError> {
    let r = FileRef::from_str(toks.get(1).ok_or(CommandError::InvalidCommand)?)?;
    if r.cycle.is_some() {
        return Err(CommandError::InvalidCommand);
    }
    let mut params = FileSetParams::new(&r.qualifier,&r.filename);
    for tok in &toks[2..] {
        match (tok.to_lowercase().as_str(),key_val(tok)) {
            ("guarded",_) => params.guarded = true,
            ("tape",_) => params.file_type = FileType::Tape,
            ("removable",_) => params.file_type = FileType::Removable,
            (_,Some((k,v))) if k=="range" => params.max_range = Some(number(v)?),
            (_,Some((k,v))) if k=="read" => params.read_key = v.to_uppercase(),
            (_,Some((k,v))) if k=="write" => params.write_key = v.to_uppercase(),
            (_,Some((k,v))) if k=="project" => params.project = v.to_uppercase(),
            _ => return Err(CommandError::InvalidCommand)
        }
    }
    Ok(Op::Set(params))
}

fn parse_cycle(toks: &[&str]) -> Result<Op,CommandError> {
    let r = cycle_ref(toks.get(1))?;
    let mut params = FileCycleParams::new(r.cycle.unwrap_or(0));
    for tok in &toks[2..] {
        match (tok.to_lowercase().as_str(),key_val(tok)) {
            ("guarded",_) => params.guarded = true,
            ("read-only",_) => params.read_only = true,
            ("write-only",_) => params.write_only = true,
            (_,Some((k,v))) if k=="reserve" => params.initial_reserve = number(v)?,
            (_,Some((k,v))) if k=="max" => params.max_granules = number(v)?,
            (_,Some((k,v))) if k=="account" => params.account = v.to_uppercase(),
            (_,Some((k,v))) if k=="reels" => params.reels = v.split(',').map(|x| x.to_uppercase()).collect(),
            _ => return Err(CommandError::InvalidCommand)
        }
    }
    Ok(Op::Cycle(r,params))
}

/// Parse one line, blank lines and comments give None
pub fn parse_line(line: &str) -> Result<Option<Op>,CommandError> {
    let trimmed = line.trim();
    if trimmed.len()==0 || trimmed.starts_with('#') {
        return Ok(None);
    }
    let toks: Vec<&str> = trimmed.split_whitespace().collect();
    let single = |op: Op| -> Result<Option<Op>,CommandError> {
        match toks.len() {
            1 => Ok(Some(op)),
            _ => Err(CommandError::InvalidCommand)
        }
    };
    let one_ref = || -> Result<FileRef,CommandError> {
        match toks.len() {
            2 => cycle_ref(toks.get(1)),
            _ => Err(CommandError::InvalidCommand)
        }
    };
    match toks[0].to_lowercase().as_str() {
        "set" => Ok(Some(parse_set(&toks)?)),
        "cycle" => Ok(Some(parse_cycle(&toks)?)),
        "alloc" => {
            let (r,first,count) = range_args(&toks)?;
            Ok(Some(Op::Alloc(r,first,count)))
        },
        "free" => {
            let (r,first,count) = range_args(&toks)?;
            Ok(Some(Op::Free(r,first,count)))
        },
        "assign" => Ok(Some(Op::Assign(one_ref()?))),
        "release" => Ok(Some(Op::Release(one_ref()?))),
        "extents" => Ok(Some(Op::Extents(one_ref()?))),
        "queue" => {
            if toks.len()!=3 {
                return Err(CommandError::InvalidCommand);
            }
            let on = match toks[2].to_lowercase().as_str() {
                "on" => true,
                "off" => false,
                _ => return Err(CommandError::InvalidCommand)
            };
            Ok(Some(Op::Queue(cycle_ref(toks.get(1))?,on)))
        },
        "drop" => match toks.len() {
            2 => Ok(Some(Op::Drop(FileRef::from_str(toks[1])?))),
            _ => Err(CommandError::InvalidCommand)
        },
        "catalog" => single(Op::Catalog),
        "packs" => single(Op::Packs),
        "commit" => single(Op::Commit),
        _ => Err(CommandError::InvalidCommand)
    }
}

/// Runs script operations against an engine
pub struct Session<'a> {
    mfd: &'a Mfd,
    color: bool
}

impl<'a> Session<'a> {
    pub fn new(mfd: &'a Mfd,color: bool) -> Self {
        Self { mfd, color }
    }
    fn main_item(&self,r: &FileRef) -> Result<DirSectorAddr,DYNERR> {
        let cycle = match r.cycle {
            Some(c) => c,
            None => return Err(Box::new(CommandError::InvalidCommand))
        };
        let lead = self.mfd.find(&r.qualifier,&r.filename)?;
        match self.mfd.file_set_info(lead)?.cycles.iter().find(|(c,_)| *c==cycle) {
            Some((_,main)) => Ok(*main),
            None => Err(Box::new(mfd::Error::NotFound))
        }
    }
    fn dropped(r: &FileRef,outcome: DropOutcome) -> String {
        match outcome {
            DropOutcome::Deferred => format!("{} will be dropped at release",r),
            DropOutcome::CycleDropped => format!("{} dropped",r),
            DropOutcome::SetDropped => format!("{} dropped, file set removed",r)
        }
    }
    /// Carry out one operation, returning the lines to show
    pub fn execute(&mut self,op: &Op) -> Result<Vec<String>,DYNERR> {
        debug!("script op {:?}",op);
        match op {
            Op::Set(params) => {
                let lead = self.mfd.create_file_set(params)?;
                Ok(vec![format!("created {}*{} at {}",params.qualifier.to_uppercase(),params.filename.to_uppercase(),lead)])
            },
            Op::Cycle(r,params) => {
                let lead = match self.mfd.find(&r.qualifier,&r.filename) {
                    Ok(l) => l,
                    Err(mfd::Error::NotFound) => self.mfd.create_file_set(&FileSetParams::new(&r.qualifier,&r.filename))?,
                    Err(e) => return Err(Box::new(e))
                };
                let main = self.mfd.create_file_cycle(lead,params)?;
                Ok(vec![format!("created {} at {}",r,main)])
            },
            Op::Alloc(r,first,count) => {
                let n = self.mfd.allocate_file_tracks(FileId::Cataloged(self.main_item(r)?),*first,*count)?;
                Ok(vec![format!("{} allocated {} tracks",r,n)])
            },
            Op::Free(r,first,count) => {
                let n = self.mfd.release_file_tracks(FileId::Cataloged(self.main_item(r)?),*first,*count)?;
                Ok(vec![format!("{} released {} tracks",r,n)])
            },
            Op::Assign(r) => {
                self.mfd.assign(self.main_item(r)?)?;
                Ok(vec![format!("{} assigned",r)])
            },
            Op::Release(r) => {
                match self.mfd.release(FileId::Cataloged(self.main_item(r)?))? {
                    true => Ok(vec![format!("{} released and dropped",r)]),
                    false => Ok(vec![format!("{} released",r)])
                }
            },
            Op::Queue(r,on) => {
                self.mfd.set_output_queued(self.main_item(r)?,*on)?;
                Ok(vec![format!("{} output queue {}",r,match on { true => "on", false => "off" })])
            },
            Op::Drop(r) => {
                let outcome = match r.cycle {
                    Some(_) => self.mfd.drop_file_cycle(self.main_item(r)?,false)?,
                    None => self.mfd.drop_file_set(self.mfd.find(&r.qualifier,&r.filename)?)?
                };
                Ok(vec![Self::dropped(r,outcome)])
            },
            Op::Extents(r) => {
                let extents = self.mfd.extents(FileId::Cataloged(self.main_item(r)?))?;
                let mut ans = vec![format!("{} has {} extents",r,extents.len())];
                for e in extents {
                    ans.push(format!("    tracks {}..{} on pack {} at track {}",e.file_track,e.file_track+e.length,e.pack,e.device_track));
                }
                Ok(ans)
            },
            Op::Catalog => Ok(display::catalog_lines(self.mfd,self.color)?),
            Op::Packs => Ok(display::pack_lines(self.mfd,self.color)?),
            Op::Commit => {
                let n = self.mfd.commit()?;
                Ok(vec![format!("committed {} blocks",n)])
            }
        }
    }
    /// Run every line of a script, stopping at the first failure
    pub fn run(&mut self,script: &str,out: &mut dyn Write) -> STDRESULT {
        for (idx,line) in script.lines().enumerate() {
            let op = match parse_line(line) {
                Ok(Some(op)) => op,
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("line {}: {}: `{}`",idx+1,e,line.trim());
                    return Err(Box::new(CommandError::ScriptFailed(idx+1)));
                }
            };
            match self.execute(&op) {
                Ok(lines) => {
                    for l in lines {
                        writeln!(out,"{}",l)?;
                    }
                },
                Err(e) => {
                    eprintln!("line {}: {}: `{}`",idx+1,e,line.trim());
                    return Err(Box::new(CommandError::ScriptFailed(idx+1)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::console::LogConsole;
    use crate::device::channel::DirectChannel;
    use crate::device::pack_image::PackImage;
    use crate::mfd::{PackSpec,Tunables};
    use crate::mfd::sector::PackLabel;
    use crate::mfd::types::LABEL_BLOCK;
    use crate::device::BlockDevice;

    fn engine() -> Mfd {
        let mut img = PackImage::create_tracks(112,100).expect("create failed");
        img.write_block(LABEL_BLOCK,&PackLabel::new("FIX1",112,100).to_words()).expect("label failed");
        let mut channel = DirectChannel::new();
        channel.attach(1,Box::new(img)).expect("attach failed");
        let mfd = Mfd::new(Box::new(channel),Box::new(LogConsole::new(0)),Tunables::default());
        let report = mfd.bring_up(&[PackSpec { device: 1, fixed: true }]).expect("bring up failed");
        assert_eq!(report.up.len(),1);
        mfd
    }

    #[test]
    fn file_refs() {
        assert_eq!(FileRef::from_str("sys$*testfile(3)").unwrap(),FileRef {
            qualifier: "SYS$".to_string(),
            filename: "TESTFILE".to_string(),
            cycle: Some(3)
        });
        assert_eq!(FileRef::from_str("A*B").unwrap().cycle,None);
        assert!(FileRef::from_str("AB").is_err());
        assert!(FileRef::from_str("A*B(x)").is_err());
        assert!(FileRef::from_str("A*B(1").is_err());
        assert_eq!(FileRef::from_str("A*B(12)").unwrap().to_string(),"A*B(12)");
    }

    #[test]
    fn parsing() {
        assert!(parse_line("  # a comment").unwrap().is_none());
        assert!(parse_line("").unwrap().is_none());
        assert!(matches!(parse_line("set SYS$*F guarded range=5").unwrap(),Some(Op::Set(p)) if p.guarded && p.max_range==Some(5)));
        assert!(matches!(parse_line("cycle SYS$*F(2) max=10").unwrap(),Some(Op::Cycle(_,p)) if p.absolute_cycle==2 && p.max_granules==10));
        assert!(matches!(parse_line("alloc A*B(1) 0 5").unwrap(),Some(Op::Alloc(_,0,5))));
        assert!(matches!(parse_line("drop A*B").unwrap(),Some(Op::Drop(r)) if r.cycle.is_none()));
        assert!(parse_line("alloc A*B 0 5").is_err());
        assert!(parse_line("cycle A*B").is_err());
        assert!(parse_line("catalog now").is_err());
        assert!(parse_line("frobnicate").is_err());
        assert!(parse_line("queue A*B(1) maybe").is_err());
    }

    #[test]
    fn session() {
        let mfd = engine();
        let mut session = Session::new(&mfd,false);
        let script = "cycle SYS$*TESTFILE(1) max=10
alloc SYS$*TESTFILE(1) 0 5
extents SYS$*TESTFILE(1)
catalog
commit
";
        let mut out: Vec<u8> = Vec::new();
        session.run(script,&mut out).expect("script failed");
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("SYS$*TESTFILE(1) allocated 5 tracks"));
        assert!(text.contains("has 1 extents"));
        assert!(text.contains("SYS$*TESTFILE MS"));
        let mut out: Vec<u8> = Vec::new();
        assert!(session.run("alloc SYS$*TESTFILE(2) 0 1",&mut out).is_err());
        assert!(session.run("drop SYS$*NOFILE",&mut out).is_err());
    }
}
