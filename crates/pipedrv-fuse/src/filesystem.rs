//! FUSE adapter for the pipe device.
//!
//! Implements `fuser::Filesystem` over a flat root directory holding two
//! files: the device node, backed by [`PipeDevice`]'s FIFO and control
//! channel, and the status file rendering the counter. Both are opened with
//! direct I/O and ignore file offsets, so every `read(2)`/`write(2)` reaches
//! the device unchanged.
//!
//! Requests are served on the session thread. The one exception is STOP,
//! which waits for the counter task to finish its period and is therefore
//! answered from its own thread.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyIoctl, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use pipedrv_core::ioctl::PIPE_IOC_STOP;
use pipedrv_core::status::{StatusReporter, STATUS_FILE_SIZE};
use pipedrv_core::PipeDevice;
use tracing::{debug, error};

/// Inode of the mount root.
pub const ROOT_INO: u64 = 1;
/// Inode of the device node.
pub const DEVICE_INO: u64 = 2;
/// Inode of the status file.
pub const STATUS_INO: u64 = 3;

const BLOCK_SIZE: u32 = 512;

#[derive(Debug)]
enum OpenNode {
    Device,
    Status(StatusReporter),
}

/// `fuser` filesystem serving one [`PipeDevice`].
pub struct PipeFilesystem {
    device: Arc<PipeDevice>,
    ttl: Duration,
    created: SystemTime,
    handles: HashMap<u64, OpenNode>,
    next_fh: u64,
}

impl PipeFilesystem {
    /// Creates a filesystem whose attributes are cached for `ttl`.
    pub fn new(device: Arc<PipeDevice>, ttl: Duration) -> Self {
        Self {
            device,
            ttl,
            created: SystemTime::now(),
            handles: HashMap::new(),
            next_fh: 1,
        }
    }

    /// The served device.
    pub fn device(&self) -> &Arc<PipeDevice> {
        &self.device
    }

    /// Resolves a name in the root directory.
    pub fn lookup_name(&self, parent: u64, name: &str) -> Result<u64, c_int> {
        if parent != ROOT_INO {
            return Err(libc::ENOTDIR);
        }
        let config = self.device.config();
        if name == config.device_name {
            Ok(DEVICE_INO)
        } else if name == config.status_name {
            Ok(STATUS_INO)
        } else {
            Err(libc::ENOENT)
        }
    }

    /// Attributes of a node; the device size is the number of pending bytes.
    pub fn attr(&self, ino: u64) -> Result<FileAttr, c_int> {
        let config = self.device.config();
        let (kind, perm, size, nlink) = match ino {
            ROOT_INO => (FileType::Directory, 0o755, 0, 2),
            DEVICE_INO => {
                let pending = self.device.pending().map_err(|e| e.to_errno())?;
                (FileType::RegularFile, config.mode as u16, pending as u64, 1)
            }
            STATUS_INO => (
                FileType::RegularFile,
                config.mode as u16,
                STATUS_FILE_SIZE,
                1,
            ),
            _ => return Err(libc::ENOENT),
        };
        Ok(FileAttr {
            ino,
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            atime: self.created,
            mtime: self.created,
            ctime: self.created,
            crtime: self.created,
            kind,
            perm,
            nlink,
            uid: config.uid,
            gid: config.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        })
    }

    /// Opens a node and returns its file handle.
    pub fn open_node(&mut self, ino: u64, flags: i32) -> Result<u64, c_int> {
        let node = match ino {
            DEVICE_INO => {
                self.device.open().map_err(|e| e.to_errno())?;
                OpenNode::Device
            }
            STATUS_INO => {
                if flags & libc::O_ACCMODE != libc::O_RDONLY {
                    return Err(libc::EACCES);
                }
                OpenNode::Status(StatusReporter::new())
            }
            ROOT_INO => return Err(libc::EISDIR),
            _ => return Err(libc::ENOENT),
        };

        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, node);
        Ok(fh)
    }

    /// Reads from an open handle.
    pub fn read_node(&mut self, ino: u64, fh: u64, size: u32) -> Result<Vec<u8>, c_int> {
        match (ino, self.handles.get(&fh)) {
            (DEVICE_INO, Some(OpenNode::Device)) => {
                self.device.read(size as usize).map_err(|e| e.to_errno())
            }
            (STATUS_INO, Some(OpenNode::Status(reporter))) => {
                let mut out = reporter.read(self.device.counter());
                out.truncate(size as usize);
                Ok(out)
            }
            (ROOT_INO, _) => Err(libc::EISDIR),
            (DEVICE_INO | STATUS_INO, _) => Err(libc::EBADF),
            _ => Err(libc::ENOENT),
        }
    }

    /// Writes to an open device handle; returns the accepted length.
    pub fn write_node(&mut self, ino: u64, fh: u64, data: &[u8]) -> Result<u32, c_int> {
        match (ino, self.handles.get(&fh)) {
            (DEVICE_INO, Some(OpenNode::Device)) => self
                .device
                .write(data)
                .map(|n| n as u32)
                .map_err(|e| e.to_errno()),
            (STATUS_INO, _) => Err(libc::EACCES),
            (ROOT_INO, _) => Err(libc::EISDIR),
            (DEVICE_INO, _) => Err(libc::EBADF),
            _ => Err(libc::ENOENT),
        }
    }

    /// Applies a control command through an open device handle.
    pub fn ioctl_node(
        &mut self,
        ino: u64,
        fh: u64,
        cmd: u32,
        in_data: &[u8],
        out_size: u32,
    ) -> Result<Vec<u8>, c_int> {
        match (ino, self.handles.get(&fh)) {
            (DEVICE_INO, Some(OpenNode::Device)) => {
                let out = self.device.ioctl(cmd, in_data).map_err(|e| e.to_errno())?;
                if out.len() > out_size as usize {
                    return Err(libc::EINVAL);
                }
                Ok(out)
            }
            (DEVICE_INO, _) => Err(libc::EBADF),
            (STATUS_INO | ROOT_INO, _) => Err(libc::ENOTTY),
            _ => Err(libc::ENOENT),
        }
    }

    /// Forgets a handle, releasing the device if it held it.
    pub fn release_node(&mut self, fh: u64) {
        match self.handles.remove(&fh) {
            Some(OpenNode::Device) => self.device.close(),
            Some(OpenNode::Status(_)) => {}
            None => debug!("release of unknown fh={}", fh),
        }
    }

    /// Directory listing starting after `offset`.
    pub fn entries(&self, offset: i64) -> Vec<(u64, FileType, String)> {
        let config = self.device.config();
        let all = [
            (ROOT_INO, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
            (DEVICE_INO, FileType::RegularFile, config.device_name.clone()),
            (STATUS_INO, FileType::RegularFile, config.status_name.clone()),
        ];
        all.into_iter().skip(offset.max(0) as usize).collect()
    }

    /// Number of open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Returns the device when `cmd` is a STOP through an open device handle.
    pub fn deferred_stop(&self, ino: u64, fh: u64, cmd: u32) -> Option<Arc<PipeDevice>> {
        match (ino, self.handles.get(&fh)) {
            (DEVICE_INO, Some(OpenNode::Device)) if cmd == PIPE_IOC_STOP => {
                Some(self.device.clone())
            }
            _ => None,
        }
    }
}

fn spawn_stop(device: Arc<PipeDevice>, reply: ReplyIoctl) {
    let spawned = thread::Builder::new()
        .name("pipedrv-stop".into())
        .spawn(move || match device.ioctl(PIPE_IOC_STOP, &[]) {
            Ok(out) => reply.ioctl(0, &out),
            Err(e) => reply.error(e.to_errno()),
        });
    // A reply dropped unanswered is sent back as EIO.
    if let Err(e) = spawned {
        error!("failed to spawn STOP thread: {}", e);
    }
}

impl Filesystem for PipeFilesystem {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        debug!("pipedrv filesystem init");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!("pipedrv filesystem destroy");
        for (_, node) in self.handles.drain() {
            if matches!(node, OpenNode::Device) {
                self.device.close();
            }
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name_str = name.to_string_lossy();
        debug!("lookup parent={} name={}", parent, name_str);

        match self
            .lookup_name(parent, &name_str)
            .and_then(|ino| self.attr(ino))
        {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("getattr ino={}", ino);
        match self.attr(ino) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    /// Accepts and ignores attribute changes so `O_TRUNC` opens from shells
    /// succeed; the stream has no length to truncate.
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr ino={} size={:?} (ignored)", ino, size);
        match self.attr(ino) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open ino={} flags={:#o}", ino, flags);
        match self.open_node(ino, flags) {
            Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_DIRECT_IO),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read ino={} fh={} offset={} size={}", ino, fh, offset, size);
        match self.read_node(ino, fh, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(
            "write ino={} fh={} offset={} size={}",
            ino,
            fh,
            offset,
            data.len()
        );
        match self.write_node(ino, fh, data) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn ioctl(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: u32,
        cmd: u32,
        in_data: &[u8],
        out_size: u32,
        reply: ReplyIoctl,
    ) {
        debug!("ioctl ino={} fh={} cmd={:#010x}", ino, fh, cmd);
        if let Some(device) = self.deferred_stop(ino, fh, cmd) {
            spawn_stop(device, reply);
            return;
        }
        match self.ioctl_node(ino, fh, cmd, in_data, out_size) {
            Ok(out) => reply.ioctl(0, &out),
            Err(errno) => reply.error(errno),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release fh={}", fh);
        self.release_node(fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir ino={}", ino);
        match ino {
            ROOT_INO => reply.opened(0, 0),
            DEVICE_INO | STATUS_INO => reply.error(libc::ENOTDIR),
            _ => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir ino={} offset={}", ino, offset);
        if ino != ROOT_INO {
            reply.error(libc::ENOTDIR);
            return;
        }

        for (i, (entry_ino, kind, name)) in self.entries(offset).into_iter().enumerate() {
            if reply.add(entry_ino, offset + i as i64 + 1, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedrv_core::ioctl::{PIPE_IOC_GET_COUNTER, PIPE_IOC_SET_PERIOD};
    use pipedrv_core::DeviceConfig;

    fn filesystem() -> PipeFilesystem {
        let device = Arc::new(PipeDevice::new(DeviceConfig::default()).unwrap());
        PipeFilesystem::new(device, Duration::from_secs(1))
    }

    #[test]
    fn test_lookup_known_names() {
        let fs = filesystem();
        assert_eq!(fs.lookup_name(ROOT_INO, "pipe-drv"), Ok(DEVICE_INO));
        assert_eq!(fs.lookup_name(ROOT_INO, "pipe-drv-proc"), Ok(STATUS_INO));
        assert_eq!(fs.lookup_name(ROOT_INO, "missing"), Err(libc::ENOENT));
        assert_eq!(fs.lookup_name(DEVICE_INO, "pipe-drv"), Err(libc::ENOTDIR));
    }

    #[test]
    fn test_attr_reflects_config() {
        let fs = filesystem();
        let root = fs.attr(ROOT_INO).unwrap();
        assert_eq!(root.kind, FileType::Directory);

        let dev = fs.attr(DEVICE_INO).unwrap();
        assert_eq!(dev.perm, 0o666);
        assert_eq!(dev.uid, 0);
        assert_eq!(dev.gid, 0);
        assert_eq!(dev.size, 0);

        let status = fs.attr(STATUS_INO).unwrap();
        assert_eq!(status.size, STATUS_FILE_SIZE);
        assert_eq!(fs.attr(99).unwrap_err(), libc::ENOENT);
    }

    #[test]
    fn test_device_size_tracks_pending_bytes() {
        let mut fs = filesystem();
        let fh = fs.open_node(DEVICE_INO, libc::O_RDWR).unwrap();
        fs.write_node(DEVICE_INO, fh, b"12345").unwrap();
        assert_eq!(fs.attr(DEVICE_INO).unwrap().size, 5);
    }

    #[test]
    fn test_device_open_is_exclusive() {
        let mut fs = filesystem();
        let fh = fs.open_node(DEVICE_INO, libc::O_RDWR).unwrap();
        assert_eq!(fs.open_node(DEVICE_INO, libc::O_RDWR), Err(libc::EBUSY));
        fs.release_node(fh);
        assert!(fs.open_node(DEVICE_INO, libc::O_RDWR).is_ok());
    }

    #[test]
    fn test_device_write_read_round_trip() {
        let mut fs = filesystem();
        let fh = fs.open_node(DEVICE_INO, libc::O_RDWR).unwrap();
        assert_eq!(fs.write_node(DEVICE_INO, fh, b"hello").unwrap(), 5);
        assert_eq!(fs.read_node(DEVICE_INO, fh, 3).unwrap(), b"hel");
        assert_eq!(fs.read_node(DEVICE_INO, fh, 4096).unwrap(), b"lo");
        assert!(fs.read_node(DEVICE_INO, fh, 4096).unwrap().is_empty());
    }

    #[test]
    fn test_device_short_write_reported() {
        let mut fs = filesystem();
        let fh = fs.open_node(DEVICE_INO, libc::O_WRONLY).unwrap();
        assert_eq!(fs.write_node(DEVICE_INO, fh, &[0u8; 2000]).unwrap(), 1024);
        assert_eq!(fs.write_node(DEVICE_INO, fh, b"x").unwrap(), 0);
    }

    #[test]
    fn test_status_two_phase_per_handle() {
        let mut fs = filesystem();
        let a = fs.open_node(STATUS_INO, libc::O_RDONLY).unwrap();
        let b = fs.open_node(STATUS_INO, libc::O_RDONLY).unwrap();

        assert_eq!(fs.read_node(STATUS_INO, a, 4096).unwrap(), b"0\n");
        assert_eq!(fs.read_node(STATUS_INO, b, 4096).unwrap(), b"0\n");
        assert!(fs.read_node(STATUS_INO, a, 4096).unwrap().is_empty());
        assert_eq!(fs.read_node(STATUS_INO, a, 4096).unwrap(), b"0\n");
    }

    #[test]
    fn test_status_open_does_not_claim_device() {
        let mut fs = filesystem();
        fs.open_node(STATUS_INO, libc::O_RDONLY).unwrap();
        assert!(fs.open_node(DEVICE_INO, libc::O_RDWR).is_ok());
    }

    #[test]
    fn test_status_is_read_only() {
        let mut fs = filesystem();
        assert_eq!(fs.open_node(STATUS_INO, libc::O_WRONLY), Err(libc::EACCES));
        let fh = fs.open_node(STATUS_INO, libc::O_RDONLY).unwrap();
        assert_eq!(fs.write_node(STATUS_INO, fh, b"1"), Err(libc::EACCES));
    }

    #[test]
    fn test_ioctl_on_device() {
        let mut fs = filesystem();
        let fh = fs.open_node(DEVICE_INO, libc::O_RDWR).unwrap();
        let out = fs
            .ioctl_node(DEVICE_INO, fh, PIPE_IOC_SET_PERIOD, &50i32.to_ne_bytes(), 0)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(fs.device().period_ms(), 50);

        let out = fs
            .ioctl_node(DEVICE_INO, fh, PIPE_IOC_GET_COUNTER, &[], 4)
            .unwrap();
        assert_eq!(out, 0i32.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_ioctl_output_larger_than_buffer_rejected() {
        let mut fs = filesystem();
        let fh = fs.open_node(DEVICE_INO, libc::O_RDWR).unwrap();
        assert_eq!(
            fs.ioctl_node(DEVICE_INO, fh, PIPE_IOC_GET_COUNTER, &[], 2),
            Err(libc::EINVAL)
        );
    }

    #[test]
    fn test_ioctl_unsupported_maps_to_enotty() {
        let mut fs = filesystem();
        let fh = fs.open_node(DEVICE_INO, libc::O_RDWR).unwrap();
        assert_eq!(
            fs.ioctl_node(DEVICE_INO, fh, 0x5401, &[], 0),
            Err(libc::ENOTTY)
        );
        let status_fh = fs.open_node(STATUS_INO, libc::O_RDONLY).unwrap();
        assert_eq!(
            fs.ioctl_node(STATUS_INO, status_fh, PIPE_IOC_GET_COUNTER, &[], 4),
            Err(libc::ENOTTY)
        );
    }

    #[test]
    fn test_io_on_unknown_handle_is_ebadf() {
        let mut fs = filesystem();
        assert_eq!(fs.read_node(DEVICE_INO, 42, 10), Err(libc::EBADF));
        assert_eq!(fs.write_node(DEVICE_INO, 42, b"x"), Err(libc::EBADF));
    }

    #[test]
    fn test_release_forgets_handle() {
        let mut fs = filesystem();
        let fh = fs.open_node(STATUS_INO, libc::O_RDONLY).unwrap();
        assert_eq!(fs.open_handles(), 1);
        fs.release_node(fh);
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_entries_listing_and_offset() {
        let fs = filesystem();
        let names: Vec<String> = fs.entries(0).into_iter().map(|(_, _, n)| n).collect();
        assert_eq!(names, vec![".", "..", "pipe-drv", "pipe-drv-proc"]);

        let rest = fs.entries(3);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, STATUS_INO);
        assert!(fs.entries(10).is_empty());
    }

    #[test]
    fn test_only_stop_on_device_handle_is_deferred() {
        let mut fs = filesystem();
        let dev = fs.open_node(DEVICE_INO, libc::O_RDWR).unwrap();
        let status = fs.open_node(STATUS_INO, libc::O_RDONLY).unwrap();

        assert!(fs.deferred_stop(DEVICE_INO, dev, PIPE_IOC_STOP).is_some());
        assert!(fs.deferred_stop(DEVICE_INO, dev, PIPE_IOC_GET_COUNTER).is_none());
        assert!(fs.deferred_stop(DEVICE_INO, 42, PIPE_IOC_STOP).is_none());
        assert!(fs.deferred_stop(STATUS_INO, status, PIPE_IOC_STOP).is_none());
    }

    #[test]
    fn test_open_root_is_eisdir() {
        let mut fs = filesystem();
        assert_eq!(fs.open_node(ROOT_INO, libc::O_RDONLY), Err(libc::EISDIR));
    }
}
