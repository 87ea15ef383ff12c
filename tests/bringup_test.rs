// Tests of pack bring-up and the engine lifecycle
use mfdkit::device::{BlockDevice,DeviceId,IoStatus};
use mfdkit::device::channel::{Channel,DirectChannel,WorkerChannel};
use mfdkit::device::pack_image::PackImage;
use mfdkit::console::{LogConsole,ScriptedConsole,Transcript};
use mfdkit::mfd::{Mfd,PackSpec,Tunables,Error,FileSetParams};
use mfdkit::mfd::sector::{PackLabel,PackSector1,DirRecord,Sector};
use mfdkit::mfd::types::{LABEL_BLOCK,WORDS_PER_SECTOR};

fn image(name: &str,tracks: u64) -> PackImage {
    let mut img = PackImage::create_tracks(112,tracks).expect("create failed");
    img.write_block(LABEL_BLOCK,&PackLabel::new(name,112,tracks).to_words()).expect("label failed");
    img
}

fn fixed(device: DeviceId) -> PackSpec {
    PackSpec { device, fixed: true }
}

/// Engine over a direct channel, devices numbered from 1, with a scripted console
fn engine(images: Vec<PackImage>,answers: &[&str],tunables: Tunables) -> (Mfd,Transcript) {
    let mut channel = DirectChannel::new();
    for (i,img) in images.into_iter().enumerate() {
        channel.attach(i as DeviceId + 1,Box::new(img)).expect("attach failed");
    }
    let console = ScriptedConsole::new(answers);
    let transcript = console.transcript();
    (Mfd::new(Box::new(channel),Box::new(console),tunables),transcript)
}

#[test]
fn inaccessible_devices() {
    let mut not_ready = image("NR",100);
    not_ready.set_ready(false);
    let mut protected = image("WP",100);
    protected.set_write_protected(true);
    let mut unmounted = image("UM",100);
    unmounted.set_mounted(false);
    let (mfd,transcript) = engine(vec![not_ready,protected,unmounted],&[],Tunables::default());
    let report = mfd.bring_up(&[fixed(1),fixed(2),fixed(3)]).expect("bring up failed");
    assert!(report.up.is_empty());
    assert_eq!(report.down,vec![
        (1,Error::DeviceNotAccessible),
        (2,Error::DeviceNotAccessible),
        (3,Error::DeviceNotAccessible)
    ]);
    assert!(transcript.lines()[0].starts_with("MSG DEVICE 1 DOWN"));
    assert!(transcript.prompts().is_empty());
    assert_eq!(mfd.create_file_set(&FileSetParams::new("Q","F")),Err(Error::OutOfSpace));
}

#[test]
fn unlabeled_pack() {
    let blank = PackImage::create_tracks(112,100).unwrap();
    let (mfd,_) = engine(vec![blank],&[],Tunables::default());
    let report = mfd.bring_up(&[fixed(1)]).unwrap();
    assert_eq!(report.down,vec![(1,Error::PackNotPrepped)]);
}

#[test]
fn label_conflicts() {
    // label written for 28 word blocks on a 112 word device
    let mut wrong_prep = PackImage::create_tracks(112,100).unwrap();
    wrong_prep.write_block(LABEL_BLOCK,&PackLabel::new("PREP",28,100).to_words()).unwrap();
    // label claims more tracks than the device has
    let mut too_big = PackImage::create_tracks(112,100).unwrap();
    too_big.write_block(LABEL_BLOCK,&PackLabel::new("BIG",112,600).to_words()).unwrap();
    let (mfd,_) = engine(vec![wrong_prep,too_big],&[],Tunables::default());
    let report = mfd.bring_up(&[fixed(1),fixed(2)]).unwrap();
    assert_eq!(report.down.len(),2);
    for (_,e) in &report.down {
        assert!(matches!(e,Error::SectorFormatConflict(_)),"unexpected {}",e);
    }
}

#[test]
fn duplicate_pack_name() {
    let (mfd,transcript) = engine(vec![image("DUP",100),image("DUP",100)],&[],Tunables::default());
    let report = mfd.bring_up(&[fixed(1),fixed(2)]).unwrap();
    assert_eq!(report.up.len(),1);
    assert_eq!(report.down,vec![(2,Error::NameConflict)]);
    let prompts = transcript.prompts();
    assert_eq!(prompts.len(),1);
    assert!(prompts[0].contains("DUPLICATES"));
}

#[test]
fn operator_confirms_fixed() {
    let mut tunables = Tunables::default();
    tunables.confirm_fixed = true;
    let (mfd,transcript) = engine(vec![image("NO",100),image("YES",100)],&["N","Y"],tunables);
    let report = mfd.bring_up(&[fixed(1),fixed(2)]).unwrap();
    assert_eq!(report.down,vec![(1,Error::OperationAborted)]);
    assert_eq!(report.up.len(),1);
    assert_eq!(report.up[0].name,"YES");
    assert_eq!(report.up[0].index,Some(1));
    let prompts = transcript.prompts();
    assert_eq!(prompts.len(),2);
    assert!(prompts[0].starts_with("PROMPT INITIALIZE FIXED PACK NO ON DEVICE 1"));
}

#[test]
fn removable_pack() {
    let (mfd,_) = engine(vec![image("REM",100)],&[],Tunables::default());
    let report = mfd.bring_up(&[PackSpec { device: 1, fixed: false }]).unwrap();
    assert_eq!(report.up.len(),1);
    assert_eq!(report.up[0].index,None);
    assert!(mfd.pack_summaries().unwrap().is_empty());
    assert_eq!(mfd.create_file_set(&FileSetParams::new("Q","F")),Err(Error::OutOfSpace));
}

#[test]
fn write_fault_retried() {
    let mut img = image("FIX1",100);
    img.inject_write_faults(1);
    let (mfd,transcript) = engine(vec![img],&["Y"],Tunables::default());
    let report = mfd.bring_up(&[fixed(1)]).unwrap();
    assert!(report.down.is_empty());
    assert_eq!(report.up[0].index,Some(1));
    let prompts = transcript.prompts();
    assert_eq!(prompts.len(),1);
    assert!(prompts[0].starts_with("PROMPT DEVICE 1 WRITE ERROR"));
    assert_eq!(mfd.persisted_bitmap(1).unwrap(),mfd.track_bitmap(1).unwrap());
}

#[test]
fn write_fault_declined() {
    let mut img = image("FIX1",100);
    img.inject_write_faults(1);
    let (mfd,transcript) = engine(vec![img],&["N"],Tunables::default());
    let report = mfd.bring_up(&[fixed(1)]).unwrap();
    assert!(report.up.is_empty());
    assert_eq!(report.down.len(),1);
    match &report.down[0].1 {
        Error::IoError { device, status, device_status, .. } => {
            assert_eq!(*device,1);
            assert_eq!(*status,IoStatus::DeviceError);
            assert_eq!(*device_status,0o40);
        },
        e => panic!("unexpected {}",e)
    }
    assert_eq!(transcript.prompts().len(),1);
    assert_eq!(mfd.pending_count().unwrap(),0);
}

#[test]
fn indices_skip_downed_packs() {
    let mut down = image("DOWN",100);
    down.set_ready(false);
    let (mfd,transcript) = engine(vec![image("A",100),down,image("C",100)],&[],Tunables::default());
    let report = mfd.bring_up(&[fixed(1),fixed(2),fixed(3)]).unwrap();
    let indices: Vec<(DeviceId,Option<u16>)> = report.up.iter().map(|u| (u.device,u.index)).collect();
    assert_eq!(indices,vec![(1,Some(1)),(3,Some(2))]);
    assert_eq!(mfd.pack_index("C").unwrap(),2);
    assert!(transcript.lines().contains(&"MSG PACK C UP ON DEVICE 3 AS INDEX 2".to_string()));
}

#[test]
fn missing_device() {
    let (mfd,_) = engine(vec![image("FIX1",100)],&[],Tunables::default());
    let report = mfd.bring_up(&[fixed(1),fixed(9)]).unwrap();
    assert_eq!(report.up.len(),1);
    assert_eq!(report.down,vec![(9,Error::NoPathToDevice)]);
}

#[test]
fn canceled_request() {
    let (mfd,transcript) = engine(vec![image("FIX1",100)],&[],Tunables::default());
    let token = mfd.cancel_token();
    token.cancel();
    let report = mfd.bring_up(&[fixed(1)]).unwrap();
    match &report.down[0].1 {
        Error::IoError { status, .. } => assert_eq!(*status,IoStatus::Canceled),
        e => panic!("unexpected {}",e)
    }
    assert!(transcript.prompts().is_empty());
    assert!(!token.is_canceled());
    // nothing came up, so bring-up can be tried again
    let report = mfd.bring_up(&[fixed(1)]).unwrap();
    assert_eq!(report.up.len(),1);
}

#[test]
fn cancel_fails_one_operation() {
    let (mfd,_) = engine(vec![image("FIX1",100)],&[],Tunables::default());
    mfd.bring_up(&[fixed(1)]).unwrap();
    mfd.cancel_token().cancel();
    mfd.create_file_set(&FileSetParams::new("Q","F1")).unwrap();
    match mfd.commit() {
        Err(Error::IoError { status, .. }) => assert_eq!(status,IoStatus::Canceled),
        r => panic!("unexpected {:?}",r)
    }
    mfd.create_file_set(&FileSetParams::new("Q","F2")).unwrap();
    assert!(mfd.commit().unwrap() > 0);
    assert_eq!(mfd.pending_count().unwrap(),0);
    assert_eq!(mfd.persisted_bitmap(1).unwrap(),mfd.track_bitmap(1).unwrap());
}

#[test]
fn failed_commit_keeps_pending() {
    let img = image("FIX1",100);
    let faults = img.write_faults();
    let (mfd,transcript) = engine(vec![img],&["N"],Tunables::default());
    mfd.bring_up(&[fixed(1)]).unwrap();
    mfd.create_file_set(&FileSetParams::new("Q","F")).unwrap();
    let pending = mfd.pending_count().unwrap();
    assert!(pending > 0);
    faults.arm(1);
    match mfd.commit() {
        Err(Error::IoError { device, status, device_status, .. }) => {
            assert_eq!(device,1);
            assert_eq!(status,IoStatus::DeviceError);
            assert_eq!(device_status,0o40);
        },
        r => panic!("unexpected {:?}",r)
    }
    assert_eq!(transcript.prompts().len(),1);
    assert_eq!(faults.remaining(),0);
    assert_eq!(mfd.pending_count().unwrap(),pending);
    // nothing is lost, a second commit writes it all
    assert!(mfd.commit().unwrap() > 0);
    assert_eq!(mfd.pending_count().unwrap(),0);
    assert_eq!(transcript.prompts().len(),1);
    assert!(mfd.find("Q","F").is_ok());
}

#[test]
fn shutdown_refuses_work() {
    let mut channel = DirectChannel::new();
    channel.attach(1,Box::new(image("FIX1",100))).unwrap();
    let mfd = Mfd::new(Box::new(channel),Box::new(LogConsole::new(0)),Tunables::default());
    mfd.bring_up(&[fixed(1)]).unwrap();
    mfd.create_file_set(&FileSetParams::new("Q","F")).unwrap();
    mfd.shutdown().expect("shutdown failed");
    assert_eq!(mfd.find("Q","F"),Err(Error::Terminating));
    assert_eq!(mfd.commit(),Err(Error::Terminating));
    assert_eq!(mfd.shutdown(),Err(Error::Terminating));
}

#[test]
fn worker_channel_round_trip() {
    let dev: Box<dyn BlockDevice> = Box::new(image("FIX1",100));
    let channel = WorkerChannel::start(vec![(1,dev)]);
    let mfd = Mfd::new(Box::new(channel),Box::new(LogConsole::new(0)),Tunables::default());
    let report = mfd.bring_up(&[fixed(1)]).unwrap();
    assert_eq!(report.up.len(),1);
    mfd.allocate_tracks(10,&[],false).unwrap();
    mfd.shutdown().unwrap();
    let mut channel = mfd.into_channel();
    assert_eq!(channel.devices(),vec![1]);
    let dev = channel.detach(1).expect("device is gone");
    assert!(channel.devices().is_empty());

    let mut reloaded = PackImage::from_bytes(&dev.to_bytes()).expect("reload failed");
    let label = PackLabel::from_words(&reloaded.read_block(LABEL_BLOCK,112).unwrap()).expect("no label");
    assert_eq!(label.pack_name,"FIX1");
    // sector 1 is in the first block of the directory track
    let blk = reloaded.read_block(label.dir_track*label.blocks_per_track,112).unwrap();
    let mut sec: Sector = [0;WORDS_PER_SECTOR];
    sec.copy_from_slice(&blk[WORDS_PER_SECTOR..2*WORDS_PER_SECTOR]);
    let s1 = PackSector1::from_sector(&sec);
    assert_eq!(s1.pack_name,"FIX1");
    assert_eq!(s1.pack_index,1);
    assert_eq!(s1.tracks_available,88);
}
