//! Device lifecycle: attach (`/dev/uio*` open + mmap + handler open),
//! detach, and the `Absent -> Attached -> Closing -> Absent` state machine
//! spec.md §4.5 requires.
//!
//! Grounded on `examples/original_source/main.c`'s `dev_added`/`dev_removed`
//! (sysfs map-size read, `mmap`, handler `open`/`close`) and the
//! RAII-cleanup-on-drop discipline in
//! `examples/N10h0ggr-Gladix/user-agent/src/communications/memory_ring.rs`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use memmap2::MmapOptions;
use shared::constants::{DEV_DIR, SYSFS_UIO_ROOT};
use shared::errors::DeviceError;

use crate::config::ConfigManager;
use crate::handler::registry::HandlerRegistry;
use crate::handler::OpenHandler;
use crate::ring::mailbox::MappedRegion;
use crate::ring::protocol::RingDriver;
use crate::scsi::emulate::DeviceGeometry;
use crate::worker::WorkerPool;

/// Default device capacity when no `device_size` sysfs attribute is
/// present (spec.md §1 leaves exact provisioning semantics to the handler;
/// 1 GiB is a workable default for the file-backed example handler).
const DEFAULT_CAPACITY_BYTES: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Attached,
    Closing,
}

pub struct Device {
    pub name: String,
    pub minor: u32,
    state: Mutex<DeviceState>,
    driver: Arc<RingDriver>,
    handler: Arc<dyn OpenHandler>,
    pool: Mutex<Option<WorkerPool>>,
    uio_file: File,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("minor", &self.minor)
            .field("state", &self.state)
            .finish()
    }
}

impl Device {
    pub fn driver(&self) -> &Arc<RingDriver> {
        &self.driver
    }

    pub fn handler(&self) -> &Arc<dyn OpenHandler> {
        &self.handler
    }

    pub fn pool(&self) -> std::sync::MutexGuard<'_, Option<WorkerPool>> {
        self.pool.lock().unwrap()
    }

    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.uio_file.as_raw_fd()
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    fn begin_closing(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == DeviceState::Closing {
            return false;
        }
        *state = DeviceState::Closing;
        true
    }
}

fn read_sysfs(sysfs_root: &str, minor: u32, attr: &str) -> Result<String, DeviceError> {
    let path = PathBuf::from(format!("{sysfs_root}/uio{minor}/{attr}"));
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|source| DeviceError::Sysfs { path, source })
}

fn parse_sysfs_int(path_hint: &str, value: &str) -> Result<u64, DeviceError> {
    let value = value.trim();
    let parsed = if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        value.parse::<u64>()
    };
    parsed.map_err(|_| DeviceError::BadMapSize {
        path: PathBuf::from(path_hint),
        value: value.to_string(),
    })
}

fn read_map_size(sysfs_root: &str, minor: u32) -> Result<u64, DeviceError> {
    let raw = read_sysfs(sysfs_root, minor, "maps/map0/size")?;
    parse_sysfs_int("maps/map0/size", &raw)
}

/// Read `/sys/class/uio/uio<minor>/name` and strip the `tcm-user+<srv>/`
/// prefix to recover the handler config string (spec.md §4.5, §6).
fn read_cfgstring(sysfs_root: &str, minor: u32, srv_name: &str) -> Result<String, DeviceError> {
    let raw = read_sysfs(sysfs_root, minor, "name")?;
    let prefix = format!("tcm-user+{srv_name}/");
    raw.strip_prefix(prefix.as_str())
        .map(|s| s.to_string())
        .ok_or(DeviceError::MalformedConfigString(raw))
}

fn read_device_capacity(sysfs_root: &str, minor: u32) -> u64 {
    read_sysfs(sysfs_root, minor, "device/device_size")
        .ok()
        .and_then(|raw| parse_sysfs_int("device/device_size", &raw).ok())
        .unwrap_or(DEFAULT_CAPACITY_BYTES)
}

/// Tracks every currently-attached device, keyed by UIO minor number.
pub struct DeviceManager {
    registry: Arc<HandlerRegistry>,
    config: ConfigManager,
    devices: Mutex<HashMap<u32, Arc<Device>>>,
    dev_dir: String,
    sysfs_root: String,
}

impl DeviceManager {
    pub fn new(registry: Arc<HandlerRegistry>, config: ConfigManager) -> Self {
        Self::with_roots(registry, config, DEV_DIR, SYSFS_UIO_ROOT)
    }

    /// Build a manager rooted at arbitrary `/dev`- and sysfs-like
    /// directories, used by tests to fabricate a fake device tree without
    /// touching the real `/dev` or `/sys`.
    pub fn with_roots(
        registry: Arc<HandlerRegistry>,
        config: ConfigManager,
        dev_dir: impl Into<String>,
        sysfs_root: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            config,
            devices: Mutex::new(HashMap::new()),
            dev_dir: dev_dir.into(),
            sysfs_root: sysfs_root.into(),
        }
    }

    pub fn get(&self, minor: u32) -> Option<Arc<Device>> {
        self.devices.lock().unwrap().get(&minor).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Device>> {
        self.devices.lock().unwrap().values().cloned().collect()
    }

    /// Attach a device at the given UIO minor (spec.md §4.5). The device
    /// name is formed as `uio<minor>` and the config string is read from
    /// sysfs (`name`, stripped of its `tcm-user+<srv>/` prefix). Idempotent:
    /// attaching an already-attached minor returns the existing device.
    pub fn attach(&self, minor: u32) -> Result<Arc<Device>, DeviceError> {
        if let Some(existing) = self.get(minor) {
            warn!("device uio{minor} already attached, ignoring duplicate ADDED_DEVICE");
            return Ok(existing);
        }

        let name = format!("uio{minor}");
        let dev_path = PathBuf::from(format!("{}/{name}", self.dev_dir));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&dev_path)
            .map_err(|source| DeviceError::Open {
                path: dev_path.clone(),
                source,
            })?;

        let cfg = self.config.current();
        let cfgstring = read_cfgstring(&self.sysfs_root, minor, &cfg.srv_name)?;

        let map_size = read_map_size(&self.sysfs_root, minor)?;
        let mmap = unsafe {
            MmapOptions::new()
                .len(map_size as usize)
                .map_raw(&file)
                .map_err(|source| DeviceError::Mmap {
                    path: dev_path.clone(),
                    source,
                })?
        };
        let region = MappedRegion::new(mmap)?;
        let driver = Arc::new(RingDriver::new(region)?);

        let (subtype, _) = cfgstring
            .split_once('/')
            .ok_or_else(|| DeviceError::MalformedConfigString(cfgstring.clone()))?;
        let module = self
            .registry
            .lookup(subtype)
            .ok_or_else(|| DeviceError::UnknownSubtype(subtype.to_string()))?;
        module.check_config(&cfgstring)?;
        let geometry = DeviceGeometry {
            block_size: cfg.default_block_size,
            num_lbas: read_device_capacity(&self.sysfs_root, minor) / cfg.default_block_size as u64,
        };
        let handler: Arc<dyn OpenHandler> = Arc::from(module.open(&cfgstring, geometry)?);

        let pool = WorkerPool::spawn(
            &name,
            cfg.workers_per_device,
            cfg.queue_depth,
            Arc::clone(&driver),
            Arc::clone(&handler),
        );

        let device = Arc::new(Device {
            name: name.clone(),
            minor,
            state: Mutex::new(DeviceState::Attached),
            driver,
            handler,
            pool: Mutex::new(Some(pool)),
            uio_file: file,
        });

        self.devices.lock().unwrap().insert(minor, Arc::clone(&device));
        info!("attached device {name} on uio{minor} ({cfgstring})");
        Ok(device)
    }

    /// Detach a device: stop its workers, close the handler, drop the
    /// mapping. Idempotent against repeat `REMOVED_DEVICE` notifications.
    pub fn detach(&self, minor: u32) -> Result<(), DeviceError> {
        let device = match self.devices.lock().unwrap().remove(&minor) {
            Some(device) => device,
            None => {
                warn!("detach requested for unattached uio{minor}, ignoring");
                return Ok(());
            }
        };
        if !device.begin_closing() {
            return Ok(());
        }
        if let Some(pool) = device.pool.lock().unwrap().take() {
            pool.shutdown();
        }
        device.handler.close();
        info!("detached device {} (uio{minor})", device.name);
        Ok(())
    }

    pub fn detach_all(&self) {
        let minors: Vec<u32> = self.devices.lock().unwrap().keys().copied().collect();
        for minor in minors {
            if let Err(err) = self.detach(minor) {
                warn!("error detaching uio{minor}: {err}");
            }
        }
    }

    /// Enumerate `/dev` for `uio*` entries whose sysfs `name` attribute
    /// begins with `tcm-user+<srv>/` and attach each one (spec.md §4.5,
    /// used for the initial bring-up scan before netlink notifications
    /// start arriving).
    pub fn scan(&self) -> Result<(), DeviceError> {
        let srv_name = self.config.current().srv_name;
        let prefix = format!("tcm-user+{srv_name}/");
        let dev_dir = PathBuf::from(&self.dev_dir);
        let entries = std::fs::read_dir(&dev_dir).map_err(|source| DeviceError::Open {
            path: dev_dir,
            source,
        })?;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            let Some(minor) = name.strip_prefix("uio").and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(sysfs_name) = read_sysfs(&self.sysfs_root, minor, "name") else {
                continue;
            };
            if !sysfs_name.starts_with(&prefix) {
                continue;
            }
            if let Err(err) = self.attach(minor) {
                warn!("scan: failed to attach uio{minor}: {err}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::file::FileHandler;
    use shared::constants::mailbox as mb;

    /// Fabricates a `/dev` + `/sys/class/uio` tree for one `uio<minor>`
    /// device backed by the `file` handler, mirroring the layout
    /// `read_sysfs`/`read_map_size`/`read_cfgstring` expect.
    struct FakeTree {
        _dir: tempfile::TempDir,
        dev_dir: PathBuf,
        sysfs_root: PathBuf,
        backing_path: PathBuf,
    }

    const FAKE_CMDR_OFF: u32 = mb::HEADER_LEN as u32;
    const FAKE_CMDR_SIZE: u32 = 4096;

    fn fabricate(minor: u32) -> FakeTree {
        let dir = tempfile::tempdir().unwrap();
        let dev_dir = dir.path().join("dev");
        let sysfs_root = dir.path().join("sysfs");
        let uio_sysfs = sysfs_root.join(format!("uio{minor}"));
        std::fs::create_dir_all(&dev_dir).unwrap();
        std::fs::create_dir_all(uio_sysfs.join("maps/map0")).unwrap();

        let backing_path = dir.path().join("backing.img");
        std::fs::write(&backing_path, []).unwrap();

        let map_size = (FAKE_CMDR_OFF + FAKE_CMDR_SIZE) as u64;
        std::fs::write(uio_sysfs.join("maps/map0/size"), map_size.to_string()).unwrap();
        std::fs::write(
            uio_sysfs.join("name"),
            format!("tcm-user+srv/file/{}", backing_path.display()),
        )
        .unwrap();

        let mut mailbox = vec![0u8; map_size as usize];
        mailbox[mb::CMDR_OFF_OFF..mb::CMDR_OFF_OFF + 4].copy_from_slice(&FAKE_CMDR_OFF.to_le_bytes());
        mailbox[mb::CMDR_SIZE_OFF..mb::CMDR_SIZE_OFF + 4].copy_from_slice(&FAKE_CMDR_SIZE.to_le_bytes());
        std::fs::write(dev_dir.join(format!("uio{minor}")), mailbox).unwrap();

        FakeTree {
            _dir: dir,
            dev_dir,
            sysfs_root,
            backing_path,
        }
    }

    fn manager(tree: &FakeTree) -> DeviceManager {
        let registry = Arc::new(
            HandlerRegistry::builder()
                .register(Arc::new(FileHandler::new()))
                .unwrap()
                .build(),
        );
        DeviceManager::with_roots(
            registry,
            ConfigManager::with_defaults(),
            tree.dev_dir.to_string_lossy().into_owned(),
            tree.sysfs_root.to_string_lossy().into_owned(),
        )
    }

    #[test]
    fn attach_reads_cfgstring_from_sysfs_and_opens_handler() {
        let tree = fabricate(7);
        let manager = manager(&tree);

        let device = manager.attach(7).unwrap();
        assert_eq!(device.name, "uio7");
        assert_eq!(device.state(), DeviceState::Attached);
        assert!(manager.get(7).is_some());

        manager.detach(7).unwrap();
        assert!(manager.get(7).is_none());
        assert!(tree.backing_path.exists());
    }

    #[test]
    fn attach_is_idempotent_for_already_attached_minor() {
        let tree = fabricate(3);
        let manager = manager(&tree);

        let first = manager.attach(3).unwrap();
        let second = manager.attach(3).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.all().len(), 1);
    }

    #[test]
    fn attach_rejects_unknown_subtype() {
        let tree = fabricate(5);
        std::fs::write(
            tree.sysfs_root.join("uio5/name"),
            "tcm-user+srv/nonesuch/whatever",
        )
        .unwrap();
        let manager = manager(&tree);

        let err = manager.attach(5).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownSubtype(_)));
    }

    #[test]
    fn scan_attaches_only_matching_prefix_devices() {
        let tree = fabricate(9);
        // A second uio entry whose sysfs name doesn't carry the expected
        // `tcm-user+srv/` prefix; scan must skip it rather than erroring.
        std::fs::create_dir_all(tree.sysfs_root.join("uio10")).unwrap();
        std::fs::write(tree.sysfs_root.join("uio10/name"), "some-other-driver").unwrap();
        std::fs::write(tree.dev_dir.join("uio10"), []).unwrap();

        let manager = manager(&tree);
        manager.scan().unwrap();

        assert!(manager.get(9).is_some());
        assert!(manager.get(10).is_none());
    }

    #[test]
    fn detach_unattached_minor_is_a_noop() {
        let tree = fabricate(1);
        let manager = manager(&tree);
        assert!(manager.detach(42).is_ok());
    }
}
