use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::model::BusinessHoursConfig;
use crate::notify::NotifyHub;
use crate::provision::{self, MeetingProvisioner};
use crate::reaper;

/// Background work spawned for every calendar.
#[derive(Clone)]
pub struct TenantOptions {
    pub compact_threshold: u64,
    /// Cancel unpaid reservations older than this. `None` disables the reaper.
    pub pending_ttl_ms: Option<i64>,
    /// `None` disables meeting provisioning.
    pub provisioner: Option<Arc<dyn MeetingProvisioner>>,
}

impl Default for TenantOptions {
    fn default() -> Self {
        Self {
            compact_threshold: 1000,
            pending_ttl_ms: None,
            provisioner: None,
        }
    }
}

/// Manages per-calendar engines. Each calendar gets its own Engine + WAL +
/// workers; all share the business hours.
/// Calendar = sanitised database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    hours: Arc<BusinessHoursConfig>,
    options: TenantOptions,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, hours: Arc<BusinessHoursConfig>, options: TenantOptions) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            hours,
            options,
        }
    }

    pub fn hours(&self) -> &BusinessHoursConfig {
        &self.hours
    }

    /// Get or lazily create the engine for the given calendar. Names that
    /// sanitise to the same string share one calendar, as they share one WAL.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "calendar name too long",
            ));
        }

        // Sanitize to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty calendar name",
            ));
        }

        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many calendars"));
        }

        // Two connections may race here; the entry API makes one engine win.
        let entry = self.engines.entry(safe_name.clone());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, self.hours.clone(), notify)?);
        self.spawn_workers(&safe_name, &engine);

        entry.or_insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("calendar {safe_name:?} loaded");
        Ok(engine)
    }

    fn spawn_workers(&self, tenant: &str, engine: &Arc<Engine>) {
        let compactor_engine = engine.clone();
        let threshold = self.options.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        if let Some(ttl) = self.options.pending_ttl_ms {
            let reaper_engine = engine.clone();
            tokio::spawn(async move {
                reaper::run_reaper(reaper_engine, ttl).await;
            });
        }

        if let Some(provisioner) = &self.options.provisioner {
            let provisioner_engine = engine.clone();
            let provisioner = provisioner.clone();
            tokio::spawn(async move {
                provision::run_provisioner(provisioner_engine, provisioner).await;
            });
        } else {
            tracing::debug!("calendar {tenant:?}: meeting provisioning disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, Arc::new(BusinessHoursConfig::default()), TenantOptions::default())
    }

    fn slot(start: &str, end: &str) -> TimeWindow {
        TimeWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            start.parse().unwrap(),
            end.parse().unwrap(),
        )
    }

    fn contact() -> Contact {
        Contact {
            name: "Kiran".into(),
            email: "kiran@example.com".into(),
            phone: String::new(),
            message: None,
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let tm = manager(test_data_dir("isolation"));

        let eng_a = tm.get_or_create("calendar_a").unwrap();
        let eng_b = tm.get_or_create("calendar_b").unwrap();

        let id = Ulid::new();
        let r = eng_a.create_reservation(id, slot("11:00", "11:30"), contact()).await.unwrap();
        eng_a.apply_event(r.id, LifecycleEvent::PaySuccess).await.unwrap();

        // Calendar B still offers the slot and knows nothing of the booking.
        let slots_b = eng_b.available_slots(slot("11:00", "11:30").date).await;
        assert!(slots_b.iter().all(|s| s.is_available));
        assert!(eng_b.get_reservation(&id).await.is_none());

        let slots_a = eng_a.available_slots(slot("11:00", "11:30").date).await;
        assert_eq!(slots_a.iter().filter(|s| !s.is_available).count(), 1);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let tm = manager(test_data_dir("same_eng"));

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn names_sharing_a_wal_share_a_calendar() {
        let dir = test_data_dir("shared_wal");
        let id = Ulid::new();
        {
            let tm = manager(dir.clone());
            let dotted = tm.get_or_create("clinic.a").unwrap();
            let plain = tm.get_or_create("clinica").unwrap();
            assert!(Arc::ptr_eq(&dotted, &plain));

            dotted.create_reservation(id, slot("10:00", "10:30"), contact()).await.unwrap();
            assert!(plain.get_reservation(&id).await.is_some());
            // Distinct on disk means distinct in memory.
            let other = tm.get_or_create("clinic_b").unwrap();
            assert!(other.get_reservation(&id).await.is_none());
        }

        let tm = manager(dir);
        let eng = tm.get_or_create("clinica").unwrap();
        assert!(eng.get_reservation(&id).await.is_some());
        assert!(tm.get_or_create("clinic_b").unwrap().get_reservation(&id).await.is_none());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let tm = manager(test_data_dir("name_too_long"));

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("calendar name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let tm = manager(test_data_dir("count_limit"));

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("c{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many calendars"));
    }

    #[tokio::test]
    async fn calendar_survives_restart() {
        let dir = test_data_dir("restart");
        let id = Ulid::new();
        {
            let tm = manager(dir.clone());
            let eng = tm.get_or_create("clinic").unwrap();
            eng.create_reservation(id, slot("16:00", "16:30"), contact()).await.unwrap();
        }
        let tm = manager(dir);
        let eng = tm.get_or_create("clinic").unwrap();
        let r = eng.get_reservation(&id).await.unwrap();
        assert_eq!(r.window, slot("16:00", "16:30"));
        assert_eq!(r.status, LifecycleStatus::Pending);
    }
}
