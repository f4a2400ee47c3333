use std::collections::HashMap;

use event_api::{Device, Event, Hostname, Interface, Pool};
use tracing::trace;

type Record<'a> = HashMap<&'a str, &'a str>;

/// Split a raw devd line into its `key=value` pairs.
pub fn tokenize(line: &str) -> Record<'_> {
    let mut chars = line.chars();
    chars.next();
    chars
        .as_str()
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .collect()
}

/// Turn one devd line into at most one event.
pub fn parse_line(line: &str) -> Option<Event> {
    let record = tokenize(line);
    let tag = record.get("system")?;
    let Some(system) = System::from_tag(tag) else {
        trace!(system = %tag, "ignoring devd record for unhandled system");
        return None;
    };
    system.handle(&record)
}

/// Value of the `system=` discriminator in a devd record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum System {
    Devfs,
    Ifnet,
    Zfs,
    System,
}

const SYSTEMS: [(&str, System); 4] = [
    ("DEVFS", System::Devfs),
    ("IFNET", System::Ifnet),
    ("ZFS", System::Zfs),
    ("SYSTEM", System::System),
];

impl System {
    pub fn from_tag(tag: &str) -> Option<Self> {
        SYSTEMS
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, system)| *system)
    }

    fn handle(self, record: &Record<'_>) -> Option<Event> {
        match self {
            System::Devfs => devfs(record),
            System::Ifnet => ifnet(record),
            System::Zfs => zfs(record),
            System::System => system(record),
        }
    }
}

fn devfs(record: &Record<'_>) -> Option<Event> {
    if record.get("subsystem") != Some(&"CDEV") {
        return None;
    }
    let cdev = record.get("cdev")?;
    let event = match *record.get("type")? {
        "CREATE" => Event::DeviceAttached(Device::new(cdev, format!("Device {cdev} attached"))),
        "DESTROY" => Event::DeviceDetached(Device::new(cdev, format!("Device {cdev} detached"))),
        "MEDIACHANGE" => {
            Event::DeviceChanged(Device::new(cdev, format!("Device {cdev} media changed")))
        }
        _ => return None,
    };
    Some(event)
}

fn ifnet(record: &Record<'_>) -> Option<Event> {
    let name = *record.get("subsystem")?;
    let interface = |what: &str| Interface {
        interface: name.to_string(),
        description: format!("Network interface {name} {what}"),
    };
    let event = match *record.get("type")? {
        "ATTACH" => Event::InterfaceAttached(interface("attached")),
        "DETACH" => Event::InterfaceDetached(interface("detached")),
        "LINK_UP" => Event::LinkUp(interface("link is up")),
        "LINK_DOWN" => Event::LinkDown(interface("link is down")),
        _ => return None,
    };
    Some(event)
}

type PoolEvent = fn(Pool) -> Event;

const ZFS_EVENTS: [(&str, PoolEvent, &str); 8] = [
    ("misc.fs.zfs.scrub_start", Event::ScrubStarted, "Scrub on volume {} started"),
    ("misc.fs.zfs.scrub_finish", Event::ScrubFinished, "Scrub on volume {} finished"),
    ("misc.fs.zfs.scrub_abort", Event::ScrubAborted, "Scrub on volume {} aborted"),
    ("misc.fs.zfs.pool_create", Event::PoolCreated, "Pool {} created"),
    ("misc.fs.zfs.pool_destroy", Event::PoolDestroyed, "Pool {} destroyed"),
    ("misc.fs.zfs.dataset_create", Event::DatasetCreated, "Dataset on pool {} created"),
    ("misc.fs.zfs.dataset_delete", Event::DatasetDeleted, "Dataset on pool {} deleted"),
    ("misc.fs.zfs.dataset_rename", Event::DatasetRenamed, "Dataset on pool {} renamed"),
];

fn zfs(record: &Record<'_>) -> Option<Event> {
    let kind = record.get("type")?;
    let (_, make, template) = ZFS_EVENTS.iter().find(|(name, _, _)| name == kind)?;
    let pool = *record.get("pool_name")?;
    let owned = |key: &str| record.get(key).map(|v| v.to_string());
    Some(make(Pool {
        pool: pool.to_string(),
        guid: owned("pool_guid"),
        ds: owned("ds"),
        new_ds: owned("new_ds"),
        description: template.replacen("{}", pool, 1),
    }))
}

fn system(record: &Record<'_>) -> Option<Event> {
    if record.get("subsystem") != Some(&"HOSTNAME") || record.get("type") != Some(&"CHANGE") {
        return None;
    }
    let hostname = record.get("hostname")?;
    Some(Event::HostnameChanged(Hostname {
        hostname: hostname.to_string(),
        description: format!("Hostname changed to {hostname}"),
    }))
}
