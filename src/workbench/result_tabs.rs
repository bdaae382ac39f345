use chrono::{DateTime, Local};
use std::fmt;

use crate::db::query::RowSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultTabId(u64);

impl fmt::Display for ResultTabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "result#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Query,
    Update,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultPayload {
    RowSet(RowSet),
    Update {
        affected_rows: u64,
        last_insert_id: Option<u64>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct ResultTab {
    pub id: ResultTabId,
    pub title: String,
    pub payload: ResultPayload,
    pub source_sql: String,
    pub created_at: DateTime<Local>,
}

impl ResultTab {
    pub fn kind(&self) -> ResultKind {
        match self.payload {
            ResultPayload::RowSet(_) => ResultKind::Query,
            ResultPayload::Update { .. } => ResultKind::Update,
            ResultPayload::Error { .. } => ResultKind::Error,
        }
    }

    pub fn row_set(&self) -> Option<&RowSet> {
        match &self.payload {
            ResultPayload::RowSet(rows) => Some(rows),
            _ => None,
        }
    }
}

/// Ordered result tabs of one workbench with a single active pointer.
#[derive(Debug, Default)]
pub struct ResultTabRegistry {
    tabs: Vec<ResultTab>,
    active: Option<ResultTabId>,
    next_id: u64,
    expanded: bool,
}

impl ResultTabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tab at the end and make it active.
    pub fn append(&mut self, title: String, payload: ResultPayload, source_sql: &str) -> ResultTabId {
        self.next_id += 1;
        let id = ResultTabId(self.next_id);
        self.tabs.push(ResultTab {
            id,
            title,
            payload,
            source_sql: source_sql.to_string(),
            created_at: Local::now(),
        });
        self.active = Some(id);
        id
    }

    /// Remove `id`. Closing the active tab activates the new last tab.
    pub fn close(&mut self, id: ResultTabId) -> bool {
        let Some(index) = self.tabs.iter().position(|tab| tab.id == id) else {
            return false;
        };
        self.tabs.remove(index);
        if self.active == Some(id) {
            self.active = self.tabs.last().map(|tab| tab.id);
        }
        true
    }

    pub fn clear_all(&mut self) {
        self.tabs.clear();
        if self.tabs.capacity() > 64 {
            self.tabs.shrink_to_fit();
        }
        self.active = None;
    }

    pub fn activate(&mut self, id: ResultTabId) -> bool {
        if self.tabs.iter().any(|tab| tab.id == id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    pub fn active_id(&self) -> Option<ResultTabId> {
        self.active
    }

    pub fn active(&self) -> Option<&ResultTab> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: ResultTabId) -> Option<&ResultTab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    pub fn tabs(&self) -> &[ResultTab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> ResultPayload {
        ResultPayload::Update {
            affected_rows: 1,
            last_insert_id: None,
        }
    }

    #[test]
    fn append_activates_new_tab() {
        let mut registry = ResultTabRegistry::new();
        let first = registry.append("a".into(), update(), "UPDATE a");
        assert_eq!(registry.active_id(), Some(first));
        let second = registry.append("b".into(), update(), "UPDATE b");
        assert_eq!(registry.active_id(), Some(second));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn closing_active_tab_selects_new_last() {
        let mut registry = ResultTabRegistry::new();
        let a = registry.append("a".into(), update(), "");
        let b = registry.append("b".into(), update(), "");
        let c = registry.append("c".into(), update(), "");

        assert!(registry.activate(a));
        assert!(registry.close(a));
        assert_eq!(registry.active_id(), Some(c));

        assert!(registry.close(b));
        assert_eq!(registry.active_id(), Some(c));

        assert!(registry.close(c));
        assert_eq!(registry.active_id(), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn closing_inactive_tab_keeps_active() {
        let mut registry = ResultTabRegistry::new();
        let a = registry.append("a".into(), update(), "");
        let b = registry.append("b".into(), update(), "");
        assert!(registry.close(a));
        assert_eq!(registry.active_id(), Some(b));
        assert!(!registry.close(a));
    }

    #[test]
    fn clear_all_resets_active_pointer() {
        let mut registry = ResultTabRegistry::new();
        registry.append("a".into(), update(), "");
        registry.clear_all();
        assert!(registry.is_empty());
        assert!(registry.active().is_none());
    }

    #[test]
    fn kind_follows_payload() {
        let mut registry = ResultTabRegistry::new();
        let id = registry.append(
            "Error".into(),
            ResultPayload::Error {
                message: "boom".into(),
            },
            "SELEC 1",
        );
        let tab = registry.get(id).unwrap();
        assert_eq!(tab.kind(), ResultKind::Error);
        assert_eq!(tab.source_sql, "SELEC 1");
    }
}
