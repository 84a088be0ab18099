use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::Engine;
use crate::housekeeping;
use crate::limits::*;
use crate::notify::NotifyHub;

/// One engine per guesthouse location, each with its own WAL file,
/// housekeeping task and compactor. Created on first use.
pub struct LocationManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    housekeeping_interval: Duration,
}

impl LocationManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, housekeeping_interval: Duration) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            housekeeping_interval,
        }
    }

    /// Location names double as WAL file stems, so they are limited to
    /// ASCII letters, digits, `_` and `-`.
    fn file_stem(location: &str) -> std::io::Result<&str> {
        if location.len() > MAX_LOCATION_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "location name too long",
            ));
        }
        if location.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty location name",
            ));
        }
        if let Some(bad) = location
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid character {bad:?} in location name"),
            ));
        }
        Ok(location)
    }

    pub fn get_or_create(&self, location: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(location) {
            return Ok(engine.value().clone());
        }
        let stem = Self::file_stem(location)?;

        if self.engines.len() >= MAX_LOCATIONS {
            return Err(std::io::Error::other("too many locations"));
        }

        // Held across WAL open: two first requests for one location must not open it twice.
        let entry = match self.engines.entry(location.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => e,
        };

        let wal_path = self.data_dir.join(format!("{stem}.wal"));
        let engine = Arc::new(Engine::new(wal_path, Arc::new(NotifyHub::new()))?);

        tokio::spawn(housekeeping::run_housekeeping(
            engine.clone(),
            self.housekeeping_interval,
        ));
        tokio::spawn(housekeeping::run_compactor(
            engine.clone(),
            self.compact_threshold,
        ));

        drop(entry.insert(engine.clone()));
        metrics::gauge!(crate::observability::LOCATIONS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("opened location {location:?}");
        Ok(engine)
    }

    pub fn locations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::*;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomgrid_test_location").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> LocationManager {
        LocationManager::new(dir, 1000, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn locations_are_isolated() {
        let lm = manager(test_data_dir("isolation"));
        let north = lm.get_or_create("north").unwrap();
        let south = lm.get_or_create("south").unwrap();

        // Same room id and number in both locations
        let r = room("1");
        north.create_room(r.clone()).await.unwrap();
        south.create_room(r.clone()).await.unwrap();
        north
            .create_booking(NewBooking::new(r.id, "Tal", june(1), june(4)))
            .await
            .unwrap();

        let stay = Stay::new(june(2), june(3)).unwrap();
        assert!(!north.check_availability(r.id, &stay, None).await.unwrap().available);
        assert!(south.check_availability(r.id, &stay, None).await.unwrap().available);
    }

    #[tokio::test]
    async fn engine_created_lazily_and_reused() {
        let dir = test_data_dir("lazy");
        let lm = manager(dir.clone());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let a = lm.get_or_create("harbor").unwrap();
        let b = lm.get_or_create("harbor").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(dir.join("harbor.wal").exists());
        assert_eq!(lm.locations(), vec!["harbor".to_string()]);
    }

    #[tokio::test]
    async fn names_are_validated() {
        let dir = test_data_dir("validate");
        let lm = manager(dir.clone());

        lm.get_or_create("north_side-2").unwrap();
        assert!(dir.join("north_side-2.wal").exists());

        for bad in ["../evil", "../..", "north.side", "north side", "", "tel-aviv\u{fe0f}"] {
            let err = lm.get_or_create(bad).err().unwrap();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput, "{bad:?}");
        }
        assert!(!dir.join("evil.wal").exists());
        assert_eq!(lm.locations(), vec!["north_side-2".to_string()]);

        let long = "x".repeat(MAX_LOCATION_NAME_LEN + 1);
        let err = lm.get_or_create(&long).err().unwrap();
        assert!(err.to_string().contains("location name too long"));
    }

    #[tokio::test]
    async fn similar_names_do_not_share_a_wal() {
        let dir = test_data_dir("aliasing");
        let lm = manager(dir.clone());
        assert!(lm.get_or_create("north.side").is_err());

        let plain = lm.get_or_create("northside").unwrap();
        plain.create_room(room("1")).await.unwrap();
        let dashed = lm.get_or_create("north-side").unwrap();
        assert!(dashed.rooms().await.is_empty());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn location_count_is_capped() {
        let lm = manager(test_data_dir("count_limit"));
        for i in 0..MAX_LOCATIONS {
            lm.get_or_create(&format!("l{i}")).unwrap();
        }
        let err = lm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many locations"));
    }

    #[tokio::test]
    async fn reopening_replays_the_wal() {
        let dir = test_data_dir("reopen");
        let r = room("12");
        {
            let lm = manager(dir.clone());
            let engine = lm.get_or_create("main").unwrap();
            engine.create_room(r.clone()).await.unwrap();
        }
        let lm = manager(dir);
        let engine = lm.get_or_create("main").unwrap();
        assert_eq!(engine.rooms().await, vec![r]);
    }
}
