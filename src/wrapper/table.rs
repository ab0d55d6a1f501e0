// src/wrapper/table.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dag::{JobGraph, Status};
use crate::types::JobName;
use crate::wrapper::{StatusQuery, WrapperJob};

/// Live wrappers keyed by package name, plus a member -> wrapper index.
///
/// This is the package-membership table persisted next to the job graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageTable {
    wrappers: BTreeMap<String, WrapperJob>,
    member_index: BTreeMap<JobName, String>,
}

impl PackageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, wrapper: WrapperJob) {
        for member in wrapper.members.iter() {
            self.member_index.insert(member.clone(), wrapper.name.clone());
        }
        self.wrappers.insert(wrapper.name.clone(), wrapper);
    }

    pub fn remove(&mut self, name: &str) -> Option<WrapperJob> {
        let wrapper = self.wrappers.remove(name)?;
        for member in wrapper.members.iter() {
            if self.member_index.get(member).map(String::as_str) == Some(name) {
                self.member_index.remove(member);
            }
        }
        Some(wrapper)
    }

    pub fn get(&self, name: &str) -> Option<&WrapperJob> {
        self.wrappers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut WrapperJob> {
        self.wrappers.get_mut(name)
    }

    pub fn wrapper_of(&self, job: &str) -> Option<&WrapperJob> {
        self.member_index
            .get(job)
            .and_then(|name| self.wrappers.get(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &WrapperJob> {
        self.wrappers.values()
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    /// Drop wrappers whose members all finished; returns their names.
    pub fn retire_finished(&mut self, graph: &JobGraph) -> Vec<(String, Status)> {
        let finished: Vec<(String, Status)> = self
            .wrappers
            .values()
            .filter(|w| w.is_finished(graph))
            .map(|w| (w.name.clone(), w.status(graph)))
            .collect();
        for (name, _) in finished.iter() {
            self.remove(name);
        }
        finished
    }
}

impl Serialize for PackageTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<&WrapperJob> = self.wrappers.values().collect();
        rows.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows: Vec<WrapperJob> = Vec::deserialize(deserializer)?;
        let mut table = PackageTable::new();
        for wrapper in rows {
            table.insert(wrapper);
        }
        Ok(table)
    }
}
