//! Notification center: in-memory list persisted through a `KvStore`,
//! with listeners notified on every mutation.
//!
//! All mutations are synchronous and complete under one lock scope, so a
//! listener never sees a half-applied change. Callers must not assume
//! atomicity across an `.await`: a dedup check followed by an SMS send and
//! then `add` can race with another flow doing the same.

use chrono::{DateTime, Duration, Utc};
use irrigo_core::{NewNotification, Notification, NotificationKind};
use std::sync::{Arc, Mutex};

use crate::dispatch::PlatformNotifier;
use crate::kv::{self, KvStore};

/// Shared handle used by the scanner, completion handler and gateway.
pub type SharedNotifications = Arc<Mutex<NotificationCenter>>;

/// Listener callback; receives the full current list.
pub type Listener = Box<dyn Fn(&[Notification]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct NotificationCenter {
    items: Vec<Notification>,
    kv: Arc<dyn KvStore>,
    storage_key: String,
    platform: Arc<dyn PlatformNotifier>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl NotificationCenter {
    /// Load the persisted list. Corrupt or unreadable data starts empty.
    pub fn load(kv: Arc<dyn KvStore>, platform: Arc<dyn PlatformNotifier>, storage_key: &str) -> Self {
        let items: Vec<Notification> = kv::load_list(kv.as_ref(), storage_key);
        tracing::debug!("🔔 Loaded {} notifications from '{}'", items.len(), storage_key);
        Self {
            items,
            kv,
            storage_key: storage_key.to_string(),
            platform,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn shared(self) -> SharedNotifications {
        Arc::new(Mutex::new(self))
    }

    /// Newest first.
    pub fn list(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    /// Assign id + timestamp, prepend, persist, notify listeners.
    pub fn add(&mut self, new: NewNotification, now: DateTime<Utc>) -> Notification {
        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            kind: new.kind,
            title: new.title,
            message: new.message,
            priority: new.priority,
            farm_id: new.farm_id,
            schedule_id: new.schedule_id,
            read: false,
            action_required: new.action_required,
            action_data: new.action_data,
            created_at: now,
        };
        self.items.insert(0, notification.clone());
        self.commit();

        if notification.priority.is_urgent() {
            self.platform.notify(&notification.title, &notification.message);
        }
        notification
    }

    /// Returns false when the id is unknown or already read.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let changed = match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        };
        if changed {
            self.commit();
        }
        changed
    }

    pub fn mark_all_read(&mut self) -> usize {
        self.mark_where(|_| true)
    }

    /// Retire every unread notification that references `schedule_id`.
    pub fn mark_read_for_schedule(&mut self, schedule_id: &str) -> usize {
        self.mark_where(|n| n.schedule_id.as_deref() == Some(schedule_id))
    }

    fn mark_where(&mut self, pred: impl Fn(&Notification) -> bool) -> usize {
        let mut changed = 0;
        for n in self.items.iter_mut().filter(|n| !n.read && pred(n)) {
            n.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.commit();
        }
        changed
    }

    /// Drop notifications created strictly before `now - days`. One created
    /// exactly at the cutoff is kept.
    pub fn prune_older_than(&mut self, days: i64, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(days);
        let before = self.items.len();
        self.items.retain(|n| n.created_at >= cutoff);
        let removed = before - self.items.len();
        if removed > 0 {
            tracing::debug!("🧹 Pruned {removed} notifications older than {days}d");
            self.commit();
        }
        removed
    }

    /// Whether an unread notification of `kind` for `schedule_id` exists,
    /// optionally only counting ones created at or after `since`.
    pub fn has_unread(&self, schedule_id: &str, kind: NotificationKind, since: Option<DateTime<Utc>>) -> bool {
        // Linear scan; the list is bounded by retention pruning.
        self.items.iter().any(|n| {
            !n.read
                && n.kind == kind
                && n.schedule_id.as_deref() == Some(schedule_id)
                && since.is_none_or(|s| n.created_at >= s)
        })
    }

    /// Same as `has_unread`, keyed by farm instead of schedule.
    pub fn has_unread_for_farm(&self, farm_id: &str, kind: NotificationKind, since: Option<DateTime<Utc>>) -> bool {
        self.items.iter().any(|n| {
            !n.read
                && n.kind == kind
                && n.farm_id.as_deref() == Some(farm_id)
                && since.is_none_or(|s| n.created_at >= s)
        })
    }

    /// Register a listener. It is called right away with the current list
    /// and again after every mutation.
    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        listener(&self.items);
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() < before
    }

    /// Persist the full list and notify listeners.
    fn commit(&self) {
        if let Err(e) = kv::save_list(self.kv.as_ref(), &self.storage_key, &self.items) {
            tracing::warn!("⚠️ Failed to save notifications: {e}");
        }
        for (_, listener) in &self.listeners {
            listener(&self.items);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use chrono::TimeZone;
    use irrigo_core::Priority;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Platform notifier that records titles.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub titles: Mutex<Vec<String>>,
    }

    impl PlatformNotifier for RecordingNotifier {
        fn notify(&self, title: &str, _body: &str) {
            self.titles.lock().unwrap().push(title.to_string());
        }
    }

    fn center() -> (NotificationCenter, Arc<MemoryKvStore>, Arc<RecordingNotifier>) {
        let kv = Arc::new(MemoryKvStore::new());
        let platform = Arc::new(RecordingNotifier::default());
        let c = NotificationCenter::load(kv.clone(), platform.clone(), "notifications");
        (c, kv, platform)
    }

    fn due(schedule: &str, priority: Priority) -> NewNotification {
        NewNotification::new(NotificationKind::IrrigationDue, "Irrigation due", "Maize in 40 min", priority)
            .for_schedule("farm-1", schedule)
    }

    #[test]
    fn test_add_prepends_and_persists() {
        let (mut c, kv, _) = center();
        let now = Utc::now();
        let first = c.add(due("s1", Priority::Low), now);
        let second = c.add(due("s2", Priority::Low), now);
        assert_eq!(c.list()[0].id, second.id);
        assert_eq!(c.list()[1].id, first.id);
        assert!(!first.read);

        let reloaded = NotificationCenter::load(kv, Arc::new(RecordingNotifier::default()), "notifications");
        assert_eq!(reloaded.list().len(), 2);
    }

    #[test]
    fn test_platform_notification_only_for_urgent() {
        let (mut c, _, platform) = center();
        c.add(due("s1", Priority::Medium), Utc::now());
        c.add(due("s1", Priority::High), Utc::now());
        c.add(due("s1", Priority::Critical), Utc::now());
        assert_eq!(platform.titles.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let (mut c, _, _) = center();
        let n = c.add(due("s1", Priority::High), Utc::now());
        assert!(c.mark_read(&n.id));
        let snapshot = c.list().to_vec();
        assert!(!c.mark_read(&n.id));
        assert_eq!(c.list(), snapshot.as_slice());
        assert!(!c.mark_read("unknown"));
    }

    #[test]
    fn test_mark_read_for_schedule() {
        let (mut c, _, _) = center();
        c.add(due("s1", Priority::High), Utc::now());
        c.add(due("s1", Priority::High), Utc::now());
        c.add(due("s2", Priority::High), Utc::now());
        assert_eq!(c.mark_read_for_schedule("s1"), 2);
        assert_eq!(c.mark_read_for_schedule("s1"), 0);
        assert_eq!(c.unread_count(), 1);
        assert_eq!(c.mark_all_read(), 1);
        assert_eq!(c.unread_count(), 0);
    }

    #[test]
    fn test_prune_boundary_is_kept() {
        let (mut c, _, _) = center();
        let now = Utc.with_ymd_and_hms(2026, 4, 30, 12, 0, 0).unwrap();
        c.add(due("old", Priority::Low), now - Duration::days(30) - Duration::seconds(1));
        c.add(due("edge", Priority::Low), now - Duration::days(30));
        c.add(due("new", Priority::Low), now - Duration::days(2));
        assert_eq!(c.prune_older_than(30, now), 1);
        let left: Vec<_> = c.list().iter().filter_map(|n| n.schedule_id.clone()).collect();
        assert_eq!(left, vec!["new".to_string(), "edge".to_string()]);
    }

    #[test]
    fn test_has_unread_since() {
        let (mut c, _, _) = center();
        let now = Utc.with_ymd_and_hms(2026, 4, 30, 12, 0, 0).unwrap();
        c.add(due("s1", Priority::High), now - Duration::days(1));
        assert!(c.has_unread("s1", NotificationKind::IrrigationDue, None));
        assert!(!c.has_unread("s1", NotificationKind::IrrigationDue, Some(now - Duration::hours(12))));
        assert!(!c.has_unread("s1", NotificationKind::IrrigationOverdue, None));
    }

    #[test]
    fn test_subscribe_gets_current_state_and_mutations() {
        let (mut c, _, _) = center();
        c.add(due("s1", Priority::Low), Utc::now());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let id = c.subscribe(Box::new(move |items| {
            assert!(!items.is_empty());
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        c.add(due("s2", Priority::Low), Utc::now());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(c.unsubscribe(id));
        c.mark_all_read();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!c.unsubscribe(id));
    }

    #[test]
    fn test_corrupt_storage_starts_empty() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("notifications", "[{\"id\": 5").unwrap();
        let c = NotificationCenter::load(kv, Arc::new(RecordingNotifier::default()), "notifications");
        assert!(c.list().is_empty());
    }
}
