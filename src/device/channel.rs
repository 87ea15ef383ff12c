//! ## Channels
//!
//! A channel routes block requests to the devices attached to it.  From the engine's point of
//! view every request is synchronous: the caller blocks until completion, or until the request
//! is canceled through a `CancelToken`.
//!
//! * `DirectChannel` services the request on the calling thread
//! * `WorkerChannel` owns its devices on a worker thread; the caller polls for completion

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool,Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use log::{debug,trace,warn};
use super::{BlockDevice,DeviceId,Geometry,IoFailure,IoFunction,IoStatus,Error};
use crate::word::Word;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Shared flag that lets another thread abandon an outstanding request
#[derive(Clone,Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.flag.store(true,Ordering::SeqCst);
    }
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
    pub fn reset(&self) {
        self.flag.store(false,Ordering::SeqCst);
    }
}

/// The block I/O contract consumed by the MFD engine
pub trait Channel: Send {
    /// Perform one block transfer.  For `Read` the buffer is replaced with `word_count` words,
    /// for `Write` the first `word_count` words of the buffer are written.
    fn block_io(&mut self,device: DeviceId,function: IoFunction,block_id: u64,word_count: usize,buffer: &mut Vec<Word>,cancel: &CancelToken) -> Result<(),IoFailure>;
    fn query_geometry(&mut self,device: DeviceId) -> Result<Geometry,IoFailure>;
    /// Devices currently attached
    fn devices(&mut self) -> Vec<DeviceId>;
    /// Take a device off the channel, e.g. to save it
    fn detach(&mut self,device: DeviceId) -> Option<Box<dyn BlockDevice>>;
}

fn service(dev: &mut Box<dyn BlockDevice>,function: IoFunction,block_id: u64,word_count: usize,buffer: &mut Vec<Word>) -> Result<(),IoFailure> {
    match function {
        IoFunction::Read => {
            *buffer = dev.read_block(block_id,word_count)?;
            Ok(())
        },
        IoFunction::Write => {
            if word_count > buffer.len() {
                return Err(IoFailure::new(IoStatus::InvalidWordCount));
            }
            dev.write_block(block_id,&buffer[0..word_count])
        }
    }
}

/// Channel that services requests on the caller's thread
pub struct DirectChannel {
    devices: BTreeMap<DeviceId,Box<dyn BlockDevice>>
}

impl DirectChannel {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new()
        }
    }
    pub fn attach(&mut self,device: DeviceId,dev: Box<dyn BlockDevice>) -> Result<(),Error> {
        if self.devices.contains_key(&device) {
            return Err(Error::DuplicateDevice);
        }
        self.devices.insert(device,dev);
        Ok(())
    }
}

impl Channel for DirectChannel {
    fn block_io(&mut self,device: DeviceId,function: IoFunction,block_id: u64,word_count: usize,buffer: &mut Vec<Word>,cancel: &CancelToken) -> Result<(),IoFailure> {
        if cancel.is_canceled() {
            return Err(IoFailure::new(IoStatus::Canceled));
        }
        trace!("device {} {:?} block {} words {}",device,function,block_id,word_count);
        match self.devices.get_mut(&device) {
            Some(dev) => service(dev,function,block_id,word_count,buffer),
            None => Err(IoFailure::new(IoStatus::NoPath))
        }
    }
    fn query_geometry(&mut self,device: DeviceId) -> Result<Geometry,IoFailure> {
        match self.devices.get(&device) {
            Some(dev) => Ok(dev.geometry()),
            None => Err(IoFailure::new(IoStatus::NoPath))
        }
    }
    fn devices(&mut self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }
    fn detach(&mut self,device: DeviceId) -> Option<Box<dyn BlockDevice>> {
        self.devices.remove(&device)
    }
}

enum Request {
    Io {
        device: DeviceId,
        function: IoFunction,
        block_id: u64,
        word_count: usize,
        buffer: Vec<Word>,
        reply: mpsc::Sender<Result<Vec<Word>,IoFailure>>
    },
    Geometry {
        device: DeviceId,
        reply: mpsc::Sender<Result<Geometry,IoFailure>>
    },
    List {
        reply: mpsc::Sender<Vec<DeviceId>>
    },
    Detach {
        device: DeviceId,
        reply: mpsc::Sender<Option<Box<dyn BlockDevice>>>
    }
}

/// Channel whose devices live on a dedicated worker thread.
/// Dropping the channel stops the worker.
pub struct WorkerChannel {
    sender: Option<mpsc::Sender<Request>>,
    worker: Option<thread::JoinHandle<()>>
}

impl WorkerChannel {
    /// Start the worker thread, which takes ownership of the devices
    pub fn start(devices: Vec<(DeviceId,Box<dyn BlockDevice>)>) -> Self {
        let (sender,receiver) = mpsc::channel::<Request>();
        let mut map: BTreeMap<DeviceId,Box<dyn BlockDevice>> = BTreeMap::new();
        for (id,dev) in devices {
            map.insert(id,dev);
        }
        let worker = thread::spawn(move || {
            // the loop ends when every sender is gone
            for req in receiver {
                match req {
                    Request::Io { device, function, block_id, word_count, mut buffer, reply } => {
                        let res = match map.get_mut(&device) {
                            Some(dev) => service(dev,function,block_id,word_count,&mut buffer).map(|_| buffer),
                            None => Err(IoFailure::new(IoStatus::NoPath))
                        };
                        // the requester may have canceled and gone away
                        let _ = reply.send(res);
                    },
                    Request::Geometry { device, reply } => {
                        let _ = reply.send(match map.get(&device) {
                            Some(dev) => Ok(dev.geometry()),
                            None => Err(IoFailure::new(IoStatus::NoPath))
                        });
                    },
                    Request::List { reply } => {
                        let _ = reply.send(map.keys().copied().collect());
                    },
                    Request::Detach { device, reply } => {
                        let _ = reply.send(map.remove(&device));
                    }
                }
            }
            debug!("channel worker exiting");
        });
        Self {
            sender: Some(sender),
            worker: Some(worker)
        }
    }
    fn send(&self,req: Request) -> bool {
        match &self.sender {
            Some(s) => s.send(req).is_ok(),
            None => false
        }
    }
}

impl Channel for WorkerChannel {
    fn block_io(&mut self,device: DeviceId,function: IoFunction,block_id: u64,word_count: usize,buffer: &mut Vec<Word>,cancel: &CancelToken) -> Result<(),IoFailure> {
        let (reply,completion) = mpsc::channel();
        let req = Request::Io {
            device,
            function,
            block_id,
            word_count,
            buffer: buffer.clone(),
            reply
        };
        if !self.send(req) {
            return Err(IoFailure::new(IoStatus::NoPath));
        }
        loop {
            match completion.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(dat)) => {
                    if function==IoFunction::Read {
                        *buffer = dat;
                    }
                    return Ok(());
                },
                Ok(Err(failure)) => return Err(failure),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if cancel.is_canceled() {
                        warn!("request to device {} canceled while outstanding",device);
                        return Err(IoFailure::new(IoStatus::Canceled));
                    }
                },
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(IoFailure::new(IoStatus::SystemError))
            }
        }
    }
    fn query_geometry(&mut self,device: DeviceId) -> Result<Geometry,IoFailure> {
        let (reply,completion) = mpsc::channel();
        if !self.send(Request::Geometry { device, reply }) {
            return Err(IoFailure::new(IoStatus::NoPath));
        }
        match completion.recv() {
            Ok(res) => res,
            Err(_) => Err(IoFailure::new(IoStatus::SystemError))
        }
    }
    fn devices(&mut self) -> Vec<DeviceId> {
        let (reply,completion) = mpsc::channel();
        if !self.send(Request::List { reply }) {
            return Vec::new();
        }
        completion.recv().unwrap_or_default()
    }
    fn detach(&mut self,device: DeviceId) -> Option<Box<dyn BlockDevice>> {
        let (reply,completion) = mpsc::channel();
        if !self.send(Request::Detach { device, reply }) {
            return None;
        }
        completion.recv().ok().flatten()
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("channel worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::pack_image::PackImage;

    #[test]
    fn worker_round_trip() {
        let img: Box<dyn BlockDevice> = Box::new(PackImage::create(28,32).expect("create failed"));
        let mut chan = WorkerChannel::start(vec![(7,img)]);
        let cancel = CancelToken::new();
        let mut buf = vec![0o1234;28];
        chan.block_io(7,IoFunction::Write,3,28,&mut buf,&cancel).expect("write failed");
        let mut back = Vec::new();
        chan.block_io(7,IoFunction::Read,3,28,&mut back,&cancel).expect("read failed");
        assert_eq!(back,vec![0o1234;28]);
        assert_eq!(chan.devices(),vec![7]);
        let err = chan.block_io(8,IoFunction::Read,0,28,&mut back,&cancel).unwrap_err();
        assert_eq!(err.status,IoStatus::NoPath);
        assert!(chan.detach(7).is_some());
        assert!(chan.devices().is_empty());
    }

    #[test]
    fn canceled_before_start() {
        let mut chan = DirectChannel::new();
        chan.attach(1,Box::new(PackImage::create(28,8).expect("create failed"))).expect("attach failed");
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut buf = Vec::new();
        let err = chan.block_io(1,IoFunction::Read,0,28,&mut buf,&cancel).unwrap_err();
        assert_eq!(err.status,IoStatus::Canceled);
    }
}
