// Tests of the pack space allocator and the directory sector allocator
use std::collections::HashSet;
use mfdkit::device::BlockDevice;
use mfdkit::device::channel::DirectChannel;
use mfdkit::device::pack_image::PackImage;
use mfdkit::console::LogConsole;
use mfdkit::mfd::{Mfd,PackSpec,Tunables,Error,DirSectorAddr};
use mfdkit::mfd::sector::PackLabel;
use mfdkit::mfd::types::LABEL_BLOCK;

fn prepped(name: &str,prep: usize,tracks: u64) -> PackImage {
    let mut img = PackImage::create_tracks(prep,tracks).expect("create failed");
    img.write_block(LABEL_BLOCK,&PackLabel::new(name,prep,tracks).to_words()).expect("label failed");
    img
}

fn engine(packs: Vec<PackImage>) -> Mfd {
    let mut channel = DirectChannel::new();
    let mut specs = Vec::new();
    for (i,img) in packs.into_iter().enumerate() {
        let device = i as u32 + 1;
        channel.attach(device,Box::new(img)).expect("attach failed");
        specs.push(PackSpec { device, fixed: true });
    }
    let mfd = Mfd::new(Box::new(channel),Box::new(LogConsole::new(0)),Tunables::default());
    let report = mfd.bring_up(&specs).expect("bring up failed");
    assert!(report.down.is_empty());
    mfd
}

fn available(mfd: &Mfd,pack: u16) -> u64 {
    let summaries = mfd.pack_summaries().expect("no summaries");
    summaries.iter().find(|s| s.index==pack).expect("no such pack").available_tracks
}

#[test]
fn fresh_pack() {
    let mfd = engine(vec![prepped("FIX1",112,600)]);
    // label track and directory track 0 are reserved
    assert_eq!(available(&mfd,1),598);
    assert_eq!(mfd.recorded_available(1).unwrap(),598);
    let bitmap = mfd.track_bitmap(1).unwrap();
    assert!(bitmap.get(0).unwrap());
    assert!(bitmap.get(1).unwrap());
    assert!(!bitmap.get(2).unwrap());
    assert_eq!(mfd.persisted_bitmap(1).unwrap(),bitmap);
    let summary = &mfd.pack_summaries().unwrap()[0];
    assert_eq!(summary.name,"FIX1");
    assert!(!summary.small_disk);
    assert_eq!(summary.directory_tracks,1);
    assert_eq!(mfd.pending_count().unwrap(),0);
}

#[test]
fn allocate_and_free() {
    let mfd = engine(vec![prepped("FIX1",112,600)]);
    let before = mfd.track_bitmap(1).unwrap();
    let g = mfd.allocate_tracks(10,&[],false).expect("allocate failed");
    assert_eq!((g.pack,g.start,g.count),(1,2,10));
    assert_eq!(available(&mfd,1),588);
    assert_eq!(mfd.recorded_available(1).unwrap(),588);
    mfd.deallocate_tracks(1,2,10,false).expect("deallocate failed");
    assert_eq!(available(&mfd,1),598);
    assert_eq!(mfd.recorded_available(1).unwrap(),598);
    assert_eq!(mfd.track_bitmap(1).unwrap(),before);
    mfd.commit().expect("commit failed");
    assert_eq!(mfd.persisted_bitmap(1).unwrap(),before);
}

#[test]
fn exact_fit_first() {
    let mfd = engine(vec![prepped("FIX1",112,600)]);
    mfd.allocate_tracks(10,&[1],false).unwrap();
    let hole = mfd.allocate_tracks(5,&[1],false).unwrap();
    mfd.allocate_tracks(20,&[1],false).unwrap();
    assert_eq!(hole.start,12);
    mfd.deallocate_tracks(1,12,5,false).unwrap();
    // the hole is the first run larger than 3
    let g = mfd.allocate_tracks(3,&[1],false).unwrap();
    assert_eq!(g.start,12);
    // what is left of the hole is an exact fit
    let g = mfd.allocate_tracks(2,&[1],false).unwrap();
    assert_eq!(g.start,15);
    let g = mfd.allocate_tracks(2,&[1],false).unwrap();
    assert_eq!(g.start,37);
}

#[test]
fn no_overlap() {
    let mfd = engine(vec![prepped("FIX1",112,600)]);
    let mut granted: HashSet<u64> = HashSet::new();
    let mut held = Vec::new();
    for i in 1..30 {
        let g = mfd.allocate_tracks(i % 7 + 1,&[],false).expect("allocate failed");
        for t in g.start..g.start+g.count {
            assert!(granted.insert(t),"track {} granted twice",t);
        }
        held.push(g);
        if i % 3 == 0 {
            let old = held.remove(0);
            mfd.deallocate_tracks(old.pack,old.start,old.count,false).unwrap();
            for t in old.start..old.start+old.count {
                granted.remove(&t);
            }
        }
    }
    let bitmap = mfd.track_bitmap(1).unwrap();
    for t in &granted {
        assert!(bitmap.get(*t as usize).unwrap());
    }
    let in_use = bitmap.iter().filter(|b| *b).count() as u64;
    assert_eq!(in_use,granted.len() as u64 + 2);
    assert_eq!(available(&mfd,1),600 - in_use);
    mfd.commit().unwrap();
    assert_eq!(mfd.persisted_bitmap(1).unwrap(),bitmap);
    assert_eq!(mfd.recorded_available(1).unwrap(),600 - in_use);
}

#[test]
fn partial_grant() {
    let mfd = engine(vec![prepped("SMALL",112,100)]);
    let g = mfd.allocate_tracks(200,&[],false).expect("allocate failed");
    assert_eq!((g.start,g.count),(2,98));
    assert_eq!(available(&mfd,1),0);
    assert_eq!(mfd.allocate_tracks(1,&[],false),Err(Error::OutOfSpace));
}

#[test]
fn temporary_tracks() {
    let mfd = engine(vec![prepped("FIX1",112,600)]);
    let g = mfd.allocate_tracks(5,&[],true).unwrap();
    assert_eq!(available(&mfd,1),593);
    // the persistent counter and bitmap do not see temporary tracks
    assert_eq!(mfd.recorded_available(1).unwrap(),598);
    mfd.commit().unwrap();
    let persisted = mfd.persisted_bitmap(1).unwrap();
    assert!(!persisted.get(g.start as usize).unwrap());
    assert!(mfd.track_bitmap(1).unwrap().get(g.start as usize).unwrap());
    mfd.deallocate_tracks(1,g.start,g.count,true).unwrap();
    assert_eq!(available(&mfd,1),598);
}

#[test]
fn spread_over_packs() {
    let mfd = engine(vec![prepped("FIX1",112,600),prepped("FIX2",112,600)]);
    let g1 = mfd.allocate_tracks(4,&[],false).unwrap();
    let g2 = mfd.allocate_tracks(4,&[],false).unwrap();
    assert_ne!(g1.pack,g2.pack);
    assert_eq!(available(&mfd,1),594);
    assert_eq!(available(&mfd,2),594);
    assert_eq!(mfd.pack_index("fix2").unwrap(),2);
    assert_eq!(mfd.pack_index("NOPE"),Err(Error::NotFound));
}

#[test]
fn bad_tracks() {
    let mfd = engine(vec![prepped("FIX1",112,600)]);
    mfd.mark_bad_track(1,3).expect("mark failed");
    assert_eq!(available(&mfd,1),597);
    assert_eq!(mfd.pack_summaries().unwrap()[0].bad_tracks,1);
    let g = mfd.allocate_tracks(1,&[],false).unwrap();
    assert_eq!(g.start,2);
    let g = mfd.allocate_tracks(1,&[],false).unwrap();
    assert_eq!(g.start,4);
    assert_eq!(mfd.mark_bad_track(1,600),Err(Error::NotFound));
}

#[test]
fn bad_track_stays_allocated() {
    let mfd = engine(vec![prepped("FIX1",112,600)]);
    let g = mfd.allocate_tracks(3,&[],false).unwrap();
    assert_eq!((g.start,g.count),(2,3));
    // already allocated, so only the hardware bitmap changes
    mfd.mark_bad_track(1,3).unwrap();
    assert_eq!(available(&mfd,1),595);
    mfd.deallocate_tracks(1,2,3,false).unwrap();
    assert_eq!(available(&mfd,1),597);
    assert_eq!(mfd.recorded_available(1).unwrap(),597);
    let bitmap = mfd.track_bitmap(1).unwrap();
    assert!(!bitmap.get(2).unwrap());
    assert!(bitmap.get(3).unwrap());
    assert!(!bitmap.get(4).unwrap());
    mfd.commit().unwrap();
    assert_eq!(mfd.persisted_bitmap(1).unwrap(),bitmap);

    // a file giving back a bad track does not make it grantable
    let file = mfd.create_temporary_file().unwrap();
    assert_eq!(mfd.allocate_file_tracks(file,0,1).unwrap(),1);
    let track = mfd.extents(file).unwrap()[0].device_track;
    assert_eq!(track,2);
    mfd.mark_bad_track(1,track).unwrap();
    mfd.release_file_tracks(file,0,1).unwrap();
    assert!(mfd.track_bitmap(1).unwrap().get(2).unwrap());
    let g = mfd.allocate_tracks(1,&[],false).unwrap();
    assert_eq!(g.start,4);
    assert_eq!(mfd.pack_summaries().unwrap()[0].bad_tracks,2);
}

#[test]
fn directory_sectors() {
    let mfd = engine(vec![prepped("FIX1",112,600)]);
    // sectors 0-3 of directory track 0 hold the DAS, sector 1, SMBT and HMBT
    assert_eq!(mfd.free_directory_sectors().unwrap(),60);
    let a = mfd.allocate_directory_sector(None).unwrap();
    assert_eq!(a,DirSectorAddr::new(1,0,4));
    let b = mfd.allocate_directory_sector(Some(1)).unwrap();
    assert_eq!(b,DirSectorAddr::new(1,0,5));
    mfd.deallocate_directory_sector(a).unwrap();
    assert_eq!(mfd.free_directory_sectors().unwrap(),59);
    assert!(matches!(mfd.deallocate_directory_sector(a),Err(Error::InternalInconsistency(_))));
    assert!(matches!(mfd.deallocate_directory_sector(DirSectorAddr::new(1,0,0)),Err(Error::InternalInconsistency(_))));
    assert!(matches!(mfd.deallocate_directory_sector(DirSectorAddr::new(1,0,1)),Err(Error::InternalInconsistency(_))));
    assert_eq!(mfd.allocate_directory_sector(None).unwrap(),a);
}

/// Fill the first DAS group, returning the number of sectors handed out
fn fill_group(mfd: &Mfd) -> usize {
    let mut count = 0;
    loop {
        let summary = mfd.pack_summaries().unwrap()[0].clone();
        if summary.directory_tracks==9 && mfd.free_directory_sectors().unwrap()==0 {
            return count;
        }
        let addr = mfd.allocate_directory_sector(None).expect("directory allocation failed");
        assert!(addr.track_index() < 9);
        count += 1;
    }
}

#[test]
fn new_das_on_large_disk() {
    let mfd = engine(vec![prepped("BIG",112,600)]);
    assert_eq!(fill_group(&mfd),60 + 8*64);
    assert_eq!(available(&mfd,1),590);
    let addr = mfd.allocate_directory_sector(None).expect("directory allocation failed");
    // sector 0 of track 9 is the new DAS
    assert_eq!(addr,DirSectorAddr::new(1,9,1));
    assert_eq!(mfd.pack_summaries().unwrap()[0].directory_tracks,10);
    assert_eq!(available(&mfd,1),589);
    let first_das = mfd.sector(DirSectorAddr::new(1,0,0)).unwrap();
    assert_eq!(first_das[27],DirSectorAddr::new(1,9,0).to_word());
    assert_eq!(mfd.free_directory_sectors().unwrap(),62);
    mfd.commit().expect("commit failed");
    assert_eq!(mfd.persisted_bitmap(1).unwrap(),mfd.track_bitmap(1).unwrap());
}

#[test]
fn small_disk_stops_at_nine_tracks() {
    let mfd = engine(vec![prepped("SMALL",112,100)]);
    assert!(mfd.pack_summaries().unwrap()[0].small_disk);
    assert_eq!(fill_group(&mfd),60 + 8*64);
    assert_eq!(mfd.allocate_directory_sector(None),Err(Error::OutOfSpace));
    assert_eq!(mfd.pack_summaries().unwrap()[0].directory_tracks,9);
}
