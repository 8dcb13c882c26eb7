/// Index into a [`Registry`], valid until its slot is vacated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Growable per-session table of live objects.
///
/// Removing an entry leaves a tombstone whose generation is bumped, so a stale [`SlotId`] never
/// reaches the slot's next occupant.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Registry<T> {
    pub(crate) fn insert(&mut self, value: T) -> SlotId {
        self.len += 1;
        if let Some(index) = self.free.pop()
            && let Some(slot) = self.slots.get_mut(index as usize)
        {
            let generation = match slot {
                Slot::Vacant { generation } | Slot::Occupied { generation, .. } => *generation,
            };
            *slot = Slot::Occupied { generation, value };
            return SlotId { index, generation };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        SlotId {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, id: SlotId) -> Option<&T> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match &*slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {}
            _ => return None,
        }
        let tombstone = Slot::Vacant {
            generation: id.generation.wrapping_add(1),
        };
        match std::mem::replace(slot, tombstone) {
            Slot::Occupied { value, .. } => {
                self.len -= 1;
                self.free.push(id.index);
                Some(value)
            }
            Slot::Vacant { .. } => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        })
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| match slot {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        })
    }

    /// Tombstone every slot and hand back the values.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Occupied { generation, .. } = slot {
                let tombstone = Slot::Vacant {
                    generation: generation.wrapping_add(1),
                };
                if let Slot::Occupied { value, .. } = std::mem::replace(slot, tombstone) {
                    out.push(value);
                    self.free.push(u32::try_from(index).unwrap_or(u32::MAX));
                }
            }
        }
        self.len = 0;
        out
    }
}

/// Handle to a statement allocated on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(pub(crate) SlotId);

/// Handle to a descriptor allocated on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle(pub(crate) SlotId);

/// Handle to a server cursor registered on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(pub(crate) SlotId);

impl CursorHandle {
    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        CursorHandle(SlotId {
            index: u32::MAX,
            generation: 0,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatementEntry {
    pub descriptors: Vec<DescriptorHandle>,
}

#[derive(Debug, Default)]
pub(crate) struct DescriptorEntry {
    pub owner: Option<StatementHandle>,
}

#[derive(Debug)]
pub(crate) struct CursorEntry {
    pub name: String,
    pub holdable: bool,
    /// A rollback or commit may have destroyed the cursor; probe before the next use.
    pub must_verify: bool,
    /// The server cursor is known to be gone.
    pub abandoned: bool,
}
