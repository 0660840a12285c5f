//! A slot arena handing out typed, generation checked ids. Freed
//! slots are reused, but ids pointing to the old occupant never
//! resolve again.

use std::{fmt::Debug, hash::{Hash, Hasher}, marker::PhantomData, sync::Mutex};

use lazy_static::lazy_static;

lazy_static!{
    static ref NEXT_ARENA_ID: Mutex<u32> = Mutex::new(0);
}
fn next_arena_id() -> u32 {
    let mut guard = NEXT_ARENA_ID.lock().expect("die too if poisoned");
    let id = *guard;
    *guard = id.wrapping_add(1);
    id
}

/// Identifies the arena an `Id` was issued by, so that ids can't be
/// silently used with the wrong arena.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RegionId(u32);

pub struct Id<T> {
    t: PhantomData<fn() -> T>,
    regionid: RegionId,
    index: u32,
    generation: u32,
}

impl<T> Id<T> {
    /// Position in the arena; only unique together with the
    /// generation.
    pub fn index(&self) -> u32 {
        self.index
    }
}

// derive is broken when using PhantomData, so do it manually:
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self {
            t: PhantomData,
            regionid: self.regionid,
            index: self.index,
            generation: self.generation
        }
    }
}
impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.regionid == other.regionid
            && self.index == other.index
            && self.generation == other.generation
    }
}
impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.regionid.hash(state);
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id({}g{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    regionid: RegionId,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            regionid: RegionId(next_arena_id()),
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn regionid(&self) -> RegionId {
        self.regionid
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Id<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            Id {
                t: PhantomData,
                regionid: self.regionid,
                index,
                generation: slot.generation
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, value: Some(value) });
            Id { t: PhantomData, regionid: self.regionid, index, generation: 0 }
        }
    }

    fn slot(&self, id: Id<T>) -> Option<&Slot<T>> {
        if id.regionid != self.regionid {
            panic!("Id with incompatible RegionId used: expected {:?}, got {:?}",
                   self.regionid, id.regionid);
        }
        self.slots.get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.slot(id)?.value.as_ref()
    }

    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        // check region and generation first
        self.slot(id)?;
        self.slots[id.index as usize].value.as_mut()
    }

    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    /// Take the value out; the slot will be reused with a new
    /// generation.
    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        self.slot(id)?;
        let slot = &mut self.slots[id.index as usize];
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> + '_ {
        let regionid = self.regionid;
        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            slot.value.as_ref().map(|v| (
                Id {
                    t: PhantomData,
                    regionid,
                    index: i as u32,
                    generation: slot.generation
                },
                v))
        })
    }
}
