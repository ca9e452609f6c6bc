//! In-memory sensor repository
//!
//! The real mapping comes from an external import; this repository holds a
//! fixed set of mappings (typically loaded from the daemon config) and
//! answers lookups by item reference or object id.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::models::MappedSensor;
use crate::traits::SensorRepository;

#[derive(Debug, Default)]
pub struct InMemorySensorRepository {
    sensors: RwLock<Vec<MappedSensor>>,
    /// item reference or object id -> index into `sensors`
    index: RwLock<HashMap<String, usize>>,
}

impl InMemorySensorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sensors(sensors: impl IntoIterator<Item = MappedSensor>) -> Self {
        let repo = Self::new();
        for sensor in sensors {
            repo.register(sensor);
        }
        repo
    }

    /// Add a mapping; a later mapping for the same key replaces the earlier one
    pub fn register(&self, sensor: MappedSensor) {
        let mut sensors = self.sensors.write();
        let mut index = self.index.write();

        let existing = index.get(&sensor.object_id).copied().or_else(|| {
            sensor
                .item_reference
                .as_ref()
                .and_then(|reference| index.get(reference).copied())
        });

        let position = match existing.filter(|&p| p < sensors.len()) {
            Some(position) => {
                let previous = std::mem::replace(&mut sensors[position], sensor.clone());
                index.remove(&previous.object_id);
                if let Some(reference) = &previous.item_reference {
                    index.remove(reference);
                }
                position
            }
            None => {
                sensors.push(sensor.clone());
                sensors.len() - 1
            }
        };

        index.insert(sensor.object_id, position);
        if let Some(reference) = sensor.item_reference {
            index.insert(reference, position);
        }
    }

    pub fn len(&self) -> usize {
        self.sensors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.read().is_empty()
    }
}

impl SensorRepository for InMemorySensorRepository {
    fn lookup(&self, reference: &str) -> Option<MappedSensor> {
        let index = self.index.read();
        let position = *index.get(reference)?;
        self.sensors.read().get(position).cloned()
    }

    fn sensors(&self) -> Vec<MappedSensor> {
        self.sensors.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_reference_and_object_id() {
        let repo = InMemorySensorRepository::from_sensors([MappedSensor::new(
            "zone-temp-1",
            "a1b2c3",
        )
        .with_item_reference("site:NAE-1/VAV-1.ZN-T")]);

        assert_eq!(
            repo.lookup("site:NAE-1/VAV-1.ZN-T").unwrap().sensor_id,
            "zone-temp-1"
        );
        assert_eq!(repo.lookup("a1b2c3").unwrap().sensor_id, "zone-temp-1");
        assert!(repo.lookup("unknown").is_none());
    }

    #[test]
    fn test_sensors_lists_all() {
        let repo = InMemorySensorRepository::new();
        repo.register(MappedSensor::new("a", "1"));
        repo.register(MappedSensor::new("b", "2"));
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.sensors()[1].sensor_id, "b");
    }

    #[test]
    fn test_remapping_replaces_previous_entry() {
        let repo = InMemorySensorRepository::from_sensors([
            MappedSensor::new("zone-1", "a1").with_item_reference("site:NAE-1/VAV-1.ZN-T"),
            MappedSensor::new("zone-2", "a2"),
            MappedSensor::new("zone-1-renamed", "a1").with_item_reference("site:NAE-1/VAV-1.ZN-T2"),
        ]);

        assert_eq!(repo.len(), 2);
        let sensors = repo.sensors();
        assert_eq!(sensors[0].sensor_id, "zone-1-renamed");
        assert_eq!(sensors[1].sensor_id, "zone-2");
        assert_eq!(repo.lookup("a1").unwrap().sensor_id, "zone-1-renamed");
        assert_eq!(
            repo.lookup("site:NAE-1/VAV-1.ZN-T2").unwrap().sensor_id,
            "zone-1-renamed"
        );
        assert!(repo.lookup("site:NAE-1/VAV-1.ZN-T").is_none());
    }

    #[test]
    fn test_remapping_by_item_reference() {
        let repo = InMemorySensorRepository::new();
        repo.register(MappedSensor::new("zone-1", "a1").with_item_reference("site:X"));
        repo.register(MappedSensor::new("zone-1", "b7").with_item_reference("site:X"));

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.lookup("site:X").unwrap().object_id, "b7");
        assert!(repo.lookup("a1").is_none());
    }
}
