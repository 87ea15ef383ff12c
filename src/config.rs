//! # Engine Configuration
//!
//! A configuration is a JSON document naming the pack images to bring up and the engine knobs:
//! ```json
//! {
//!     "packs": [ {"path": "fix1.pack", "fixed": true}, {"path": "rem1.pack", "fixed": false} ],
//!     "confirm_fixed": false,
//!     "hardware_bitmap": true,
//!     "max_cycle_range": 32
//! }
//! ```
//! Optional keys take their defaults.  Relative pack paths are resolved against the directory
//! holding the configuration file.

use std::path::{Path,PathBuf};
use log::debug;
use crate::mfd::types::{Tunables,MAX_CYCLE_SLOTS};
use crate::DYNERR;

#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("bad configuration: {0}")]
    BadConfig(String)
}

/// A pack image named by the configuration
#[derive(Clone,Debug,PartialEq)]
pub struct PackEntry {
    pub path: PathBuf,
    pub fixed: bool
}

#[derive(Clone,Debug)]
pub struct EngineConfig {
    pub packs: Vec<PackEntry>,
    pub tunables: Tunables
}

fn bad(msg: &str) -> Error {
    Error::BadConfig(msg.to_string())
}

impl EngineConfig {
    pub fn from_json(json_str: &str) -> Result<Self,Error> {
        let parsed = match json::parse(json_str) {
            Ok(p) => p,
            Err(e) => return Err(Error::BadConfig(e.to_string()))
        };
        if !parsed.is_object() {
            return Err(bad("top level must be an object"));
        }
        if !parsed["packs"].is_array() {
            return Err(bad("`packs` must be an array"));
        }
        let mut packs = Vec::new();
        for item in parsed["packs"].members() {
            let path = match item["path"].as_str() {
                Some(p) => PathBuf::from(p),
                None => return Err(bad("every pack needs a `path` string"))
            };
            let fixed = match &item["fixed"] {
                x if x.is_null() => true,
                x => match x.as_bool() {
                    Some(b) => b,
                    None => return Err(bad("`fixed` must be a boolean"))
                }
            };
            packs.push(PackEntry { path, fixed });
        }
        let mut tunables = Tunables::default();
        if !parsed["confirm_fixed"].is_null() {
            tunables.confirm_fixed = parsed["confirm_fixed"].as_bool().ok_or(bad("`confirm_fixed` must be a boolean"))?;
        }
        if !parsed["hardware_bitmap"].is_null() {
            tunables.hardware_bitmap = parsed["hardware_bitmap"].as_bool().ok_or(bad("`hardware_bitmap` must be a boolean"))?;
        }
        if !parsed["max_cycle_range"].is_null() {
            match parsed["max_cycle_range"].as_usize() {
                Some(r) if r>=1 && r<=MAX_CYCLE_SLOTS => tunables.max_cycle_range = r,
                _ => return Err(Error::BadConfig(format!("`max_cycle_range` must be 1 to {}",MAX_CYCLE_SLOTS)))
            }
        }
        if !parsed["lookup_table_size"].is_null() {
            match parsed["lookup_table_size"].as_usize() {
                Some(n) if n>=1 => tunables.lookup_table_size = n,
                _ => return Err(bad("`lookup_table_size` must be a positive integer"))
            }
        }
        debug!("configuration names {} packs",packs.len());
        Ok(Self { packs, tunables })
    }
    /// Load a configuration file, resolving relative pack paths against its directory
    pub fn from_file(path: &Path) -> Result<Self,DYNERR> {
        let json_str = std::fs::read_to_string(path)?;
        let mut ans = Self::from_json(&json_str)?;
        if let Some(dir) = path.parent() {
            for p in ans.packs.iter_mut() {
                if p.path.is_relative() {
                    p.path = dir.join(&p.path);
                }
            }
        }
        Ok(ans)
    }
    pub fn to_json(&self,indent: u16) -> String {
        let mut root = json::JsonValue::new_object();
        root["packs"] = json::JsonValue::new_array();
        for p in &self.packs {
            let mut item = json::JsonValue::new_object();
            item["path"] = json::JsonValue::String(p.path.to_string_lossy().to_string());
            item["fixed"] = json::JsonValue::Boolean(p.fixed);
            // pushing onto an array cannot fail
            let _ = root["packs"].push(item);
        }
        root["confirm_fixed"] = json::JsonValue::Boolean(self.tunables.confirm_fixed);
        root["hardware_bitmap"] = json::JsonValue::Boolean(self.tunables.hardware_bitmap);
        root["max_cycle_range"] = self.tunables.max_cycle_range.into();
        root["lookup_table_size"] = self.tunables.lookup_table_size.into();
        match indent {
            0 => json::stringify(root),
            n => json::stringify_pretty(root,n)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::from_json(r#"{"packs":[{"path":"a.pack"},{"path":"b.pack","fixed":false}]}"#).expect("parse failed");
        assert_eq!(cfg.packs.len(),2);
        assert!(cfg.packs[0].fixed);
        assert!(!cfg.packs[1].fixed);
        assert_eq!(cfg.tunables.max_cycle_range,32);
        assert!(cfg.tunables.hardware_bitmap);
        assert!(!cfg.tunables.confirm_fixed);
    }

    #[test]
    fn rejects() {
        assert!(EngineConfig::from_json("[1,2]").is_err());
        assert!(EngineConfig::from_json(r#"{"packs":[{"fixed":true}]}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"packs":[],"max_cycle_range":45}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"packs":[],"confirm_fixed":"yes"}"#).is_err());
        assert!(EngineConfig::from_json("{packs:").is_err());
    }

    #[test]
    fn round_trip() {
        let cfg = EngineConfig::from_json(r#"{"packs":[{"path":"a.pack"}],"max_cycle_range":5,"confirm_fixed":true}"#).expect("parse failed");
        let again = EngineConfig::from_json(&cfg.to_json(2)).expect("reparse failed");
        assert_eq!(again.packs,cfg.packs);
        assert_eq!(again.tunables.max_cycle_range,5);
        assert!(again.tunables.confirm_fixed);
    }
}
