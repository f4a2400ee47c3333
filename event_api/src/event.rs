use serde::{Deserialize, Serialize};

/// A character device appearing, disappearing or changing media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub path: String,
    pub description: String,
}

impl Device {
    /// Build a device payload, deriving the `/dev` path from the name.
    pub fn new(name: &str, description: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            path: format!("/dev/{name}"),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub interface: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostname {
    pub hostname: String,
    pub description: String,
}

/// ZFS pool or dataset activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub pool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ds: Option<String>,
    #[serde(rename = "new-ds", default, skip_serializing_if = "Option::is_none")]
    pub new_ds: Option<String>,
    pub description: String,
}

/// Every event an event source can publish.
///
/// Serialized as `{"event_type": "...", "fields": {...}}` so clients can
/// switch on the dotted event type without knowing the Rust variant names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "fields")]
pub enum Event {
    #[serde(rename = "system.device.attached")]
    DeviceAttached(Device),
    #[serde(rename = "system.device.detached")]
    DeviceDetached(Device),
    #[serde(rename = "system.device.changed")]
    DeviceChanged(Device),
    #[serde(rename = "system.network.interface.attached")]
    InterfaceAttached(Interface),
    #[serde(rename = "system.network.interface.detached")]
    InterfaceDetached(Interface),
    #[serde(rename = "system.network.interface.link_up")]
    LinkUp(Interface),
    #[serde(rename = "system.network.interface.link_down")]
    LinkDown(Interface),
    #[serde(rename = "system.hostname.changed")]
    HostnameChanged(Hostname),
    #[serde(rename = "fs.zfs.scrub.started")]
    ScrubStarted(Pool),
    #[serde(rename = "fs.zfs.scrub.finished")]
    ScrubFinished(Pool),
    #[serde(rename = "fs.zfs.scrub.aborted")]
    ScrubAborted(Pool),
    #[serde(rename = "fs.zfs.pool.created")]
    PoolCreated(Pool),
    #[serde(rename = "fs.zfs.pool.destroyed")]
    PoolDestroyed(Pool),
    #[serde(rename = "fs.zfs.dataset.created")]
    DatasetCreated(Pool),
    #[serde(rename = "fs.zfs.dataset.deleted")]
    DatasetDeleted(Pool),
    #[serde(rename = "fs.zfs.dataset.renamed")]
    DatasetRenamed(Pool),
}

impl Event {
    /// Dotted event type, identical to the serialized `event_type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::DeviceAttached(_) => "system.device.attached",
            Event::DeviceDetached(_) => "system.device.detached",
            Event::DeviceChanged(_) => "system.device.changed",
            Event::InterfaceAttached(_) => "system.network.interface.attached",
            Event::InterfaceDetached(_) => "system.network.interface.detached",
            Event::LinkUp(_) => "system.network.interface.link_up",
            Event::LinkDown(_) => "system.network.interface.link_down",
            Event::HostnameChanged(_) => "system.hostname.changed",
            Event::ScrubStarted(_) => "fs.zfs.scrub.started",
            Event::ScrubFinished(_) => "fs.zfs.scrub.finished",
            Event::ScrubAborted(_) => "fs.zfs.scrub.aborted",
            Event::PoolCreated(_) => "fs.zfs.pool.created",
            Event::PoolDestroyed(_) => "fs.zfs.pool.destroyed",
            Event::DatasetCreated(_) => "fs.zfs.dataset.created",
            Event::DatasetDeleted(_) => "fs.zfs.dataset.deleted",
            Event::DatasetRenamed(_) => "fs.zfs.dataset.renamed",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Event::DeviceAttached(d) | Event::DeviceDetached(d) | Event::DeviceChanged(d) => {
                &d.description
            }
            Event::InterfaceAttached(i)
            | Event::InterfaceDetached(i)
            | Event::LinkUp(i)
            | Event::LinkDown(i) => &i.description,
            Event::HostnameChanged(h) => &h.description,
            Event::ScrubStarted(p)
            | Event::ScrubFinished(p)
            | Event::ScrubAborted(p)
            | Event::PoolCreated(p)
            | Event::PoolDestroyed(p)
            | Event::DatasetCreated(p)
            | Event::DatasetDeleted(p)
            | Event::DatasetRenamed(p) => &p.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_matches_event_type() {
        let events = [
            Event::DeviceChanged(Device::new("cd0", "Device cd0 media changed")),
            Event::LinkDown(Interface {
                interface: "em0".into(),
                description: "Network interface em0 link is down".into(),
            }),
            Event::DatasetRenamed(Pool {
                pool: "tank".into(),
                guid: None,
                ds: Some("tank/a".into()),
                new_ds: Some("tank/b".into()),
                description: "Dataset on pool tank renamed".into(),
            }),
        ];
        for event in events {
            let v = serde_json::to_value(&event).unwrap();
            assert_eq!(v["event_type"], event.event_type());
        }
    }

    #[test]
    fn pool_fields_skip_missing_and_rename_new_ds() {
        let event = Event::DatasetRenamed(Pool {
            pool: "tank".into(),
            guid: Some("123".into()),
            ds: Some("tank/a".into()),
            new_ds: Some("tank/b".into()),
            description: "Dataset on pool tank renamed".into(),
        });
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(
            v["fields"],
            json!({
                "pool": "tank",
                "guid": "123",
                "ds": "tank/a",
                "new-ds": "tank/b",
                "description": "Dataset on pool tank renamed"
            })
        );

        let event = Event::ScrubStarted(Pool {
            pool: "tank".into(),
            guid: None,
            ds: None,
            new_ds: None,
            description: "Scrub on volume tank started".into(),
        });
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(
            v["fields"],
            json!({"pool": "tank", "description": "Scrub on volume tank started"})
        );
        assert_eq!(event.description(), "Scrub on volume tank started");
    }
}
