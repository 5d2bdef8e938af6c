use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use super::types::PeripheralReading;

/// Latest reading per port, with stale ports dropped on every update.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    entries: BTreeMap<String, (PeripheralReading, Instant)>,
    staleness: Duration,
}

impl TelemetrySnapshot {
    pub fn new(staleness: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            staleness,
        }
    }

    pub fn update(&mut self, reading: PeripheralReading, now: Instant) {
        self.entries.insert(reading.port.clone(), (reading, now));
        self.prune(now);
    }

    pub fn prune(&mut self, now: Instant) {
        let staleness = self.staleness;
        self.entries
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) <= staleness);
    }

    /// Current readings in port order.
    pub fn readings(&self) -> Vec<PeripheralReading> {
        self.entries.values().map(|(reading, _)| reading.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(port: &str, value: f64) -> PeripheralReading {
        PeripheralReading {
            port: port.into(),
            kind: "motor".into(),
            value,
        }
    }

    #[test]
    fn test_latest_reading_per_port() {
        let now = Instant::now();
        let mut snapshot = TelemetrySnapshot::new(Duration::from_secs(3));
        snapshot.update(reading("A", 1.0), now);
        snapshot.update(reading("A", 2.0), now + Duration::from_millis(10));
        assert_eq!(snapshot.readings(), vec![reading("A", 2.0)]);
    }

    #[test]
    fn test_stale_ports_pruned_on_update() {
        let now = Instant::now();
        let mut snapshot = TelemetrySnapshot::new(Duration::from_secs(3));
        snapshot.update(reading("A", 1.0), now);
        snapshot.update(reading("B", 5.0), now + Duration::from_secs(2));
        assert_eq!(snapshot.len(), 2);

        snapshot.update(reading("B", 6.0), now + Duration::from_millis(3500));
        assert_eq!(snapshot.readings(), vec![reading("B", 6.0)]);
    }
}
