//! Local query-set state owned by the background connection task.
//!
//! Tracks every deduplicated query, the listeners attached to it and the
//! latest result. The socket code turns the modifications returned here into
//! `modify_query_set` frames; nothing in this module does IO.

use crate::models::{
    ClientMessage, QueryFailure, QueryRef, QueryResult, QuerySetModification,
    StateModification, SubscriptionInfo,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) type QueryId = u32;
pub(crate) type ListenerId = u64;

/// Callback invoked with every result for a query.
pub(crate) type Listener = Arc<dyn Fn(&QueryResult) + Send + Sync>;

#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct QueryEntry {
    query: QueryRef,
    // BTreeMap: listeners fire in registration order.
    listeners: BTreeMap<ListenerId, Listener>,
    latest: QueryResult,
    updates: u64,
    created_at_ms: u64,
    last_update_ms: Option<u64>,
}

impl QueryEntry {
    fn publish(&mut self, result: QueryResult) {
        self.latest = result;
        self.updates += 1;
        self.last_update_ms = Some(now_ms());
        for listener in self.listeners.values() {
            listener(&self.latest);
        }
    }

    fn add_modification(&self, query_id: QueryId) -> QuerySetModification {
        QuerySetModification::Add {
            query_id,
            udf_path: self.query.path().to_string(),
            args: self.query.args_value(),
        }
    }
}

#[derive(Default)]
pub(crate) struct QuerySet {
    entries: HashMap<QueryId, QueryEntry>,
    by_key: HashMap<String, QueryId>,
    listener_index: HashMap<ListenerId, QueryId>,
    next_query_id: QueryId,
    version: u32,
}

impl QuerySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Attach a listener to `query`.
    ///
    /// Returns the `add` modification when this is the first listener for the
    /// query. A listener joining an existing query immediately receives the
    /// latest known result, unless nothing has arrived yet.
    pub fn add_listener(
        &mut self,
        listener_id: ListenerId,
        query: QueryRef,
        listener: Listener,
    ) -> Option<QuerySetModification> {
        let key = query.dedup_key();
        if let Some(&query_id) = self.by_key.get(&key) {
            if let Some(entry) = self.entries.get_mut(&query_id) {
                if !entry.latest.is_absent() {
                    listener(&entry.latest);
                }
                entry.listeners.insert(listener_id, listener);
                self.listener_index.insert(listener_id, query_id);
                return None;
            }
        }

        let query_id = self.next_query_id;
        self.next_query_id = self.next_query_id.wrapping_add(1);

        let mut listeners = BTreeMap::new();
        listeners.insert(listener_id, listener);
        let entry = QueryEntry {
            query,
            listeners,
            latest: QueryResult::Absent,
            updates: 0,
            created_at_ms: now_ms(),
            last_update_ms: None,
        };
        let modification = entry.add_modification(query_id);
        self.entries.insert(query_id, entry);
        self.by_key.insert(key, query_id);
        self.listener_index.insert(listener_id, query_id);
        Some(modification)
    }

    /// Detach a listener. Returns the `remove` modification when it was the
    /// last listener of its query. Unknown ids are ignored.
    pub fn remove_listener(&mut self, listener_id: ListenerId) -> Option<QuerySetModification> {
        let query_id = self.listener_index.remove(&listener_id)?;
        let entry = self.entries.get_mut(&query_id)?;
        entry.listeners.remove(&listener_id);
        if !entry.listeners.is_empty() {
            return None;
        }

        if let Some(entry) = self.entries.remove(&query_id) {
            self.by_key.remove(&entry.query.dedup_key());
        }
        Some(QuerySetModification::Remove { query_id })
    }

    /// Wrap modifications into the next versioned frame.
    pub fn next_message(&mut self, modifications: Vec<QuerySetModification>) -> ClientMessage {
        let base_version = self.version;
        self.version = self.version.wrapping_add(1);
        ClientMessage::ModifyQuerySet {
            base_version,
            new_version: self.version,
            modifications,
        }
    }

    /// Start over on a fresh socket: version 0 and one frame re-adding every
    /// active query (in query id order). `None` when nothing is subscribed.
    pub fn restart(&mut self) -> Option<ClientMessage> {
        self.version = 0;
        if self.entries.is_empty() {
            return None;
        }
        let mut ids: Vec<QueryId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        let modifications = ids
            .into_iter()
            .filter_map(|id| self.entries.get(&id).map(|e| e.add_modification(id)))
            .collect();
        Some(self.next_message(modifications))
    }

    /// Apply a server transition, notifying listeners in order.
    ///
    /// Returns how many modifications matched a live query; results for
    /// queries that were removed locally in the meantime are dropped.
    pub fn apply_transition(&mut self, modifications: Vec<StateModification>) -> usize {
        let mut applied = 0;
        for modification in modifications {
            let query_id = modification.query_id();
            let Some(entry) = self.entries.get_mut(&query_id) else {
                log::debug!("[detector-link] Dropping result for unknown query {}", query_id);
                continue;
            };
            match modification {
                StateModification::QueryUpdated { value, .. } => {
                    entry.publish(QueryResult::Ready(value));
                    applied += 1;
                },
                StateModification::QueryFailed { error_message, .. } => {
                    log::warn!(
                        "[detector-link] Query '{}' failed: {}",
                        entry.query,
                        error_message
                    );
                    entry.publish(QueryResult::Failed(QueryFailure::query(error_message)));
                    applied += 1;
                },
                StateModification::QueryRemoved { .. } => {
                    // Server-side ack of a local removal; nothing to publish.
                },
            }
        }
        applied
    }

    /// Publish a connection failure to every listener of every query.
    pub fn fail_all(&mut self, message: &str) {
        for entry in self.entries.values_mut() {
            entry.publish(QueryResult::Failed(QueryFailure::connection(message)));
        }
    }

    /// Publish a connection failure to the query `listener_id` belongs to.
    pub fn fail_listener_query(&mut self, listener_id: ListenerId, message: &str) {
        let Some(query_id) = self.listener_index.get(&listener_id) else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(query_id) {
            entry.publish(QueryResult::Failed(QueryFailure::connection(message)));
        }
    }

    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .entries
            .iter()
            .map(|(id, entry)| SubscriptionInfo {
                query_id: *id,
                udf_path: entry.query.path().to_string(),
                listeners: entry.listeners.len(),
                has_value: entry.latest.is_ready(),
                updates: entry.updates,
                created_at_ms: entry.created_at_ms,
                last_update_ms: entry.last_update_ms,
            })
            .collect();
        infos.sort_by_key(|info| info.query_id);
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Listener, Arc<Mutex<Vec<QueryResult>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Listener = Arc::new(move |result: &QueryResult| {
            sink.lock().unwrap().push(result.clone());
        });
        (listener, seen)
    }

    fn updated(query_id: QueryId, value: serde_json::Value) -> StateModification {
        StateModification::QueryUpdated { query_id, value }
    }

    #[test]
    fn test_first_listener_adds_query() {
        let mut set = QuerySet::new();
        let (listener, _) = recorder();
        let modification = set.add_listener(1, QueryRef::new("tasks:get"), listener);
        assert_eq!(
            modification,
            Some(QuerySetModification::Add {
                query_id: 0,
                udf_path: "tasks:get".into(),
                args: json!({}),
            })
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_same_query_is_deduplicated() {
        let mut set = QuerySet::new();
        let (a, _) = recorder();
        let (b, _) = recorder();
        assert!(set.add_listener(1, QueryRef::new("tasks:get"), a).is_some());
        assert!(set.add_listener(2, QueryRef::new("tasks:get"), b).is_none());
        assert_eq!(set.len(), 1);
        assert_eq!(set.snapshot()[0].listeners, 2);
    }

    #[test]
    fn test_different_args_are_distinct_queries() {
        let mut set = QuerySet::new();
        let (a, _) = recorder();
        let (b, _) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        let second = set.add_listener(2, QueryRef::new("tasks:get").arg("limit", json!(5)), b);
        assert!(matches!(second, Some(QuerySetModification::Add { query_id: 1, .. })));
    }

    #[test]
    fn test_transition_notifies_all_listeners_in_order() {
        let mut set = QuerySet::new();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        set.add_listener(2, QueryRef::new("tasks:get"), b);

        let applied = set.apply_transition(vec![
            updated(0, json!(["first"])),
            updated(0, json!(["second"])),
        ]);
        assert_eq!(applied, 2);

        let expected = vec![
            QueryResult::Ready(json!(["first"])),
            QueryResult::Ready(json!(["second"])),
        ];
        assert_eq!(*seen_a.lock().unwrap(), expected);
        assert_eq!(*seen_b.lock().unwrap(), expected);
    }

    #[test]
    fn test_late_listener_receives_latest_value() {
        let mut set = QuerySet::new();
        let (a, _) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        set.apply_transition(vec![updated(0, json!([1]))]);

        let (b, seen_b) = recorder();
        set.add_listener(2, QueryRef::new("tasks:get"), b);
        assert_eq!(*seen_b.lock().unwrap(), vec![QueryResult::Ready(json!([1]))]);
    }

    #[test]
    fn test_late_listener_on_pending_query_sees_nothing() {
        let mut set = QuerySet::new();
        let (a, _) = recorder();
        let (b, seen_b) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        set.add_listener(2, QueryRef::new("tasks:get"), b);
        assert!(seen_b.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_last_listener_removes_query() {
        let mut set = QuerySet::new();
        let (a, _) = recorder();
        let (b, _) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        set.add_listener(2, QueryRef::new("tasks:get"), b);

        assert_eq!(set.remove_listener(1), None);
        assert_eq!(
            set.remove_listener(2),
            Some(QuerySetModification::Remove { query_id: 0 })
        );
        assert!(set.is_empty());
        assert_eq!(set.remove_listener(2), None);

        // Re-subscribing allocates a fresh query id.
        let (c, _) = recorder();
        assert!(matches!(
            set.add_listener(3, QueryRef::new("tasks:get"), c),
            Some(QuerySetModification::Add { query_id: 1, .. })
        ));
    }

    #[test]
    fn test_results_for_removed_queries_are_dropped() {
        let mut set = QuerySet::new();
        let (a, seen) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        set.remove_listener(1);
        assert_eq!(set.apply_transition(vec![updated(0, json!([]))]), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_query_failed_publishes_failure() {
        let mut set = QuerySet::new();
        let (a, seen) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        set.apply_transition(vec![StateModification::QueryFailed {
            query_id: 0,
            error_message: "Server Error".into(),
        }]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![QueryResult::Failed(QueryFailure::query("Server Error"))]
        );
        assert!(!set.snapshot()[0].has_value);
    }

    #[test]
    fn test_versions_chain() {
        let mut set = QuerySet::new();
        let first = set.next_message(vec![]);
        let second = set.next_message(vec![]);
        assert!(matches!(
            first,
            ClientMessage::ModifyQuerySet { base_version: 0, new_version: 1, .. }
        ));
        assert!(matches!(
            second,
            ClientMessage::ModifyQuerySet { base_version: 1, new_version: 2, .. }
        ));
    }

    #[test]
    fn test_restart_re_adds_everything_from_version_zero() {
        let mut set = QuerySet::new();
        assert!(set.restart().is_none());

        let (a, _) = recorder();
        let (b, _) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        set.add_listener(2, QueryRef::new("users:me"), b);
        set.next_message(vec![]);
        set.next_message(vec![]);

        match set.restart() {
            Some(ClientMessage::ModifyQuerySet {
                base_version,
                new_version,
                modifications,
            }) => {
                assert_eq!((base_version, new_version), (0, 1));
                let ids: Vec<u32> = modifications
                    .iter()
                    .map(|m| match m {
                        QuerySetModification::Add { query_id, .. } => *query_id,
                        QuerySetModification::Remove { query_id } => *query_id,
                    })
                    .collect();
                assert_eq!(ids, vec![0, 1]);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(set.version(), 1);
    }

    #[test]
    fn test_fail_all_reaches_every_listener() {
        let mut set = QuerySet::new();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        set.add_listener(1, QueryRef::new("tasks:get"), a);
        set.add_listener(2, QueryRef::new("users:me"), b);
        set.fail_all("gave up");
        let expected = vec![QueryResult::Failed(QueryFailure::connection("gave up"))];
        assert_eq!(*seen_a.lock().unwrap(), expected);
        assert_eq!(*seen_b.lock().unwrap(), expected);
    }
}
