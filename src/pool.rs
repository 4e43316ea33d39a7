//! Bounded arenas with generation-checked handles.
//!
//! The original engine draws `SeqEv`/`State`/`Chunk`/`SysEx`/`SeqPtr` nodes
//! from fixed-size free-lists of raw pointers. That design doesn't survive
//! the translation to Rust: a raw pointer into a free-list can outlive the
//! track it pointed into. This crate replaces the free-list with an arena
//! of fixed capacity addressed by index, and pairs every index with a
//! generation counter so a stale `Handle` (one whose slot has since been
//! recycled) is detected instead of silently aliasing a new object.
//!
//! Pool exhaustion is a fatal programming error in the original design
//! ("allocation failure is a program fault in this design") and stays that
//! way here: `Arena::alloc` panics rather than returning `Result`, since
//! recovering from it would require the caller to unwind through code that
//! assumed the slot existed.

use std::fmt;

/// A reference to a slot in an [`Arena<T>`].
///
/// Equality and hashing include the generation, so a handle obtained
/// before a slot was freed and reused compares unequal to a handle
/// obtained after, even though the index is the same.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Handle {
            index,
            generation,
            _marker: std::marker::PhantomData,
        }
    }

    /// The slot index this handle addresses, stripped of its generation.
    /// Used where a stable small integer identity is needed across a
    /// handle's lifetime (e.g. tagging mixout output by producing track)
    /// rather than the full generation-checked handle.
    pub fn raw_index(&self) -> u32 {
        self.index
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}#{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Free { generation: u32, next_free: Option<u32> },
}

/// A fixed-capacity arena of `T`, addressed by generation-checked [`Handle`].
///
/// Mirrors the free-list pool allocators in `midish` (`seqev_pool`,
/// `state_pool`, `chunk_pool`, `sysex_pool`, `seqptr_pool`): a bounded
/// capacity fixed at construction, O(1) alloc/free, and a hard failure
/// (here, a panic) when the capacity is exceeded.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    capacity: usize,
    len: usize,
}

impl<T> Arena<T> {
    /// Creates an arena that can hold at most `capacity` live values.
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            capacity,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocates a new slot holding `value`, returning a handle to it.
    ///
    /// # Panics
    ///
    /// Panics if the arena is already at capacity. This is a fatal
    /// programming error, not a recoverable one: size pools for the
    /// workload up front.
    pub fn alloc(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let generation = match *slot {
                Slot::Free {
                    generation,
                    next_free,
                } => {
                    self.free_head = next_free;
                    generation
                }
                Slot::Occupied { .. } => unreachable!("free list pointed at occupied slot"),
            };
            *slot = Slot::Occupied { generation, value };
            self.len += 1;
            return Handle::new(index, generation);
        }
        assert!(
            self.slots.len() < self.capacity,
            "seqcore: pool exhausted (capacity {})",
            self.capacity
        );
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        self.len += 1;
        Handle::new(index, 0)
    }

    /// Frees the slot referenced by `handle`, returning its value.
    ///
    /// Returns `None` if `handle` is stale (already freed, or from a
    /// different arena that happens to share index/generation).
    pub fn free(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {
                let next_generation = generation.wrapping_add(1);
                let old = std::mem::replace(
                    slot,
                    Slot::Free {
                        generation: next_generation,
                        next_free: self.free_head,
                    },
                );
                self.free_head = Some(handle.index);
                self.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Free { .. } => unreachable!(),
                }
            }
            _ => None,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_and_stale_handle_detection() {
        let mut arena: Arena<u32> = Arena::with_capacity(4);
        let a = arena.alloc(10);
        let b = arena.alloc(20);
        assert_eq!(*arena.get(a).unwrap(), 10);
        assert_eq!(*arena.get(b).unwrap(), 20);

        arena.free(a);
        assert!(arena.get(a).is_none());

        // reuse a's slot
        let c = arena.alloc(30);
        assert_eq!(*arena.get(c).unwrap(), 30);
        // old handle `a` must not alias the new value even though the
        // underlying index was recycled.
        assert!(arena.get(a).is_none());
    }

    #[test]
    #[should_panic(expected = "pool exhausted")]
    fn alloc_past_capacity_panics() {
        let mut arena: Arena<u32> = Arena::with_capacity(1);
        arena.alloc(1);
        arena.alloc(2);
    }
}
