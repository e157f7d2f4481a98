//! Registry of counter sets reported in the periodic summary statistics
//! stream (the `xrootd.report` directive's output).

use crate::item::Item;
use crate::tree::Tree;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    AddOn,
    Plugin,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a counter set named {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("counter set {0:?} has a malformed schema: {1}")]
    MalformedSchema(String, #[source] crate::tree::Error),
    #[error("no counter set named {0:?} is registered")]
    NotRegistered(String),
}

struct RegisteredSet {
    kind: SetKind,
    tree: Tree,
}

/// Registers named counter sets and renders them to JSON/XML on demand.
/// Once registered, a set lives for the registry's lifetime -- matching the
/// native `XrdMonRoll`, whose registrations are permanent for the life of
/// the process.
#[derive(Default)]
pub struct MonRoll {
    sets: RwLock<HashMap<String, RegisteredSet>>,
}

impl MonRoll {
    pub fn new() -> Self {
        MonRoll::default()
    }

    /// Registers `items` under `name`. Fails if `name` is already taken or
    /// `items`' schema markers don't nest and pair correctly.
    pub fn register(&self, kind: SetKind, name: &str, items: Vec<Item>) -> Result<(), Error> {
        let mut sets = self.sets.write().unwrap();
        if sets.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }

        let tree = Tree::parse(&items).map_err(|e| Error::MalformedSchema(name.to_string(), e))?;
        sets.insert(name.to_string(), RegisteredSet { kind, tree });
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.sets.read().unwrap().contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<SetKind> {
        self.sets.read().unwrap().get(name).map(|s| s.kind)
    }

    /// `"stats_<name>":{...}` for the named set.
    pub fn format_json(&self, name: &str) -> Result<String, Error> {
        let sets = self.sets.read().unwrap();
        let set = sets.get(name).ok_or_else(|| Error::NotRegistered(name.to_string()))?;
        Ok(format!("\"stats_{name}\":{}", set.tree.to_json()))
    }

    /// `<stats id="<name>">...</stats>` for the named set.
    pub fn format_xml(&self, name: &str) -> Result<String, Error> {
        let sets = self.sets.read().unwrap();
        let set = sets.get(name).ok_or_else(|| Error::NotRegistered(name.to_string()))?;
        Ok(format!("<stats id=\"{name}\">{}</stats>", set.tree.to_xml()))
    }

    /// Every registered set, rendered as a single JSON object fragment
    /// joined by commas -- suitable for splicing into a larger report.
    pub fn format_all_json(&self) -> String {
        let sets = self.sets.read().unwrap();
        sets.keys()
            .map(|name| self.format_json(name).unwrap())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.sets.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Counter;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[test]
    fn register_rejects_duplicate_names() {
        let roll = MonRoll::new();
        let counter = Item::counter("reads", Counter::U64(Arc::new(AtomicU64::new(0))));
        roll.register(SetKind::AddOn, "oss", vec![counter.clone()]).unwrap();

        let err = roll.register(SetKind::AddOn, "oss", vec![counter]).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(_)));
    }

    #[test]
    fn format_json_and_xml_round_trip_a_simple_set() {
        let roll = MonRoll::new();
        let reads = Arc::new(AtomicU64::new(42));
        roll.register(SetKind::AddOn, "oss", vec![Item::counter("reads", Counter::U64(reads))])
            .unwrap();

        assert_eq!(roll.format_json("oss").unwrap(), "\"stats_oss\":{\"reads\":42}");
        assert_eq!(roll.format_xml("oss").unwrap(), "<stats id=\"oss\"><reads>42</reads></stats>");
    }

    #[test]
    fn unknown_set_name_is_not_registered() {
        let roll = MonRoll::new();
        assert!(!roll.is_registered("missing"));
        assert!(matches!(roll.format_json("missing"), Err(Error::NotRegistered(_))));
    }
}
