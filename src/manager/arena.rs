//! Endpoint records of one resolve run, addressed by id.

use std::ops::Index;

use crate::endpoint::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(usize);

impl EndpointId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Append-only store of endpoints. Ids stay valid for the arena's lifetime.
#[derive(Debug, Default, Clone)]
pub struct Arena {
    records: Vec<Endpoint>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, endpoint: Endpoint) -> EndpointId {
        self.records.push(endpoint);
        EndpointId(self.records.len() - 1)
    }

    pub fn get(&self, id: EndpointId) -> &Endpoint {
        &self.records[id.0]
    }

    pub fn get_mut(&mut self, id: EndpointId) -> &mut Endpoint {
        &mut self.records[id.0]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Index<EndpointId> for Arena {
    type Output = Endpoint;

    fn index(&self, id: EndpointId) -> &Endpoint {
        self.get(id)
    }
}
