//! The managed heap: a two-generation arena.
//!
//! The new generation is a pair of equally-sized semispaces collected with
//! a Cheney-style copy; objects that survive enough minor collections are
//! promoted to the old generation, a linearly-allocated region collected by
//! mark-and-sweep. Objects are addressed by [`HeapId`] (arena + index, per
//! the "arena + index" strategy for cyclic graphs); a collection rewrites
//! every id it moves, so ids are only stable between allocation points.
//!
//! With the `system-heap` feature the zones collapse into one growable
//! arena and collections are no-ops, so the rest of the runtime can be
//! exercised without the custom collector.

use crate::scope::ScopeArena;
use crate::types::{ClassKind, HeapData, Trace};
use crate::value::Value;

/// Logical size of the object header preceding every allocation.
pub const HEADER_SIZE: usize = 16;

/// Allocation granule; sizes are rounded up to this.
const ALIGNMENT: usize = 16;

/// Minor collections an object must survive before promotion.
const PROMOTION_AGE: u8 = 3;

/// Sentinel returned by [`Semispace::try_allocate`] when the space is full.
pub const UNALLOCATED: usize = usize::MAX;

const DEFAULT_NEW_CAPACITY: usize = 1 << 20;
const DEFAULT_OLD_CAPACITY: usize = 16 << 20;

const TAG_NEW: u8 = 1;
const TAG_MARK: u8 = 1 << 1;
const TAG_FORWARDED: u8 = 1 << 2;

fn aligned_size(data: &HeapData) -> usize {
    let raw = HEADER_SIZE + data.estimate_size();
    raw.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// The header preceding every allocation: size, tag bits, class id,
/// survival count and the forwarding slot used during collection.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    size: u32,
    tag: u8,
    class: ClassKind,
    survivals: u8,
    forward: u32,
}

impl Header {
    fn new(size: usize, class: ClassKind, in_new_space: bool) -> Self {
        Self {
            size: u32::try_from(size).expect("allocation exceeds u32 size range"),
            tag: if in_new_space { TAG_NEW } else { 0 },
            class,
            survivals: 0,
            forward: 0,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    #[must_use]
    pub fn class(&self) -> ClassKind {
        self.class
    }

    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.tag & TAG_MARK != 0
    }

    #[must_use]
    pub fn is_forwarded(&self) -> bool {
        self.tag & TAG_FORWARDED != 0
    }

    #[must_use]
    pub fn is_new_space(&self) -> bool {
        self.tag & TAG_NEW != 0
    }

    fn set_mark(&mut self, on: bool) {
        if on {
            self.tag |= TAG_MARK;
        } else {
            self.tag &= !TAG_MARK;
        }
    }

    fn set_forwarded(&mut self, target: HeapId) {
        self.tag |= TAG_FORWARDED;
        self.forward = target.bits();
    }

    fn forwarding_target(&self) -> HeapId {
        debug_assert!(self.is_forwarded());
        HeapId::from_bits(self.forward)
    }
}

/// One allocation: header plus payload. The payload slot is empty only
/// while the object has been moved out during a collection, or after an
/// old-zone sweep.
#[derive(Debug)]
struct Cell {
    header: Header,
    data: Option<HeapData>,
}

/// Identifies a heap object: one bit for the generation, the rest an index
/// into that generation's cell vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

const OLD_BIT: u32 = 1 << 31;

impl HeapId {
    fn new_space(index: usize) -> Self {
        Self(u32::try_from(index).expect("new-space index exceeds u31 range"))
    }

    fn old_space(index: usize) -> Self {
        Self(u32::try_from(index).expect("old-space index exceeds u31 range") | OLD_BIT)
    }

    #[must_use]
    pub fn is_new_space(self) -> bool {
        self.0 & OLD_BIT == 0
    }

    fn index(self) -> usize {
        (self.0 & !OLD_BIT) as usize
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

/// A bump-allocated half of the new generation.
#[derive(Debug, Default)]
pub struct Semispace {
    cells: Vec<Cell>,
    current: usize,
    capacity: usize,
}

impl Semispace {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: Vec::new(),
            current: 0,
            capacity,
        }
    }

    /// Bumps the allocation pointer by `size` bytes, returning the pre-bump
    /// offset, or [`UNALLOCATED`] (with no state change) when the space
    /// cannot fit the request.
    pub fn try_allocate(&mut self, size: usize) -> usize {
        if self.current + size > self.capacity {
            return UNALLOCATED;
        }
        let offset = self.current;
        self.current += size;
        offset
    }

    fn push_cell(&mut self, header: Header, data: HeapData) -> usize {
        let index = self.cells.len();
        self.cells.push(Cell {
            header,
            data: Some(data),
        });
        index
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn reset(&mut self) {
        self.cells.clear();
        self.current = 0;
    }
}

/// The new generation: from- and to-space.
#[derive(Debug)]
struct NewZone {
    spaces: [Semispace; 2],
    active: usize,
}

impl NewZone {
    fn new(capacity: usize) -> Self {
        Self {
            spaces: [Semispace::new(capacity), Semispace::new(capacity)],
            active: 0,
        }
    }

    fn active(&self) -> &Semispace {
        &self.spaces[self.active]
    }

    fn active_mut(&mut self) -> &mut Semispace {
        &mut self.spaces[self.active]
    }
}

/// The old generation: promoted and oversized objects, swept in place.
#[derive(Debug)]
struct OldZone {
    cells: Vec<Cell>,
    free: Vec<usize>,
    used: usize,
    capacity: usize,
}

impl OldZone {
    fn new(capacity: usize) -> Self {
        Self {
            cells: Vec::new(),
            free: Vec::new(),
            used: 0,
            capacity,
        }
    }

    fn insert(&mut self, mut header: Header, data: HeapData) -> usize {
        header.tag &= !TAG_NEW;
        self.used += header.size();
        if let Some(index) = self.free.pop() {
            self.cells[index] = Cell {
                header,
                data: Some(data),
            };
            index
        } else {
            let index = self.cells.len();
            self.cells.push(Cell {
                header,
                data: Some(data),
            });
            index
        }
    }

    /// Append-only insertion used while a minor collection is scanning the
    /// old generation: reusing a free slot behind the scan pointer would
    /// let a promoted object escape the scan.
    fn insert_append(&mut self, mut header: Header, data: HeapData) -> usize {
        header.tag &= !TAG_NEW;
        self.used += header.size();
        let index = self.cells.len();
        self.cells.push(Cell {
            header,
            data: Some(data),
        });
        index
    }
}

/// Point-in-time heap counters, used by the debug natives and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub new_used: usize,
    pub new_capacity: usize,
    pub old_used: usize,
    pub old_capacity: usize,
    pub live_new: usize,
    pub live_old: usize,
    pub minor_collections: usize,
    pub major_collections: usize,
}

/// The collector's view of every value slot outside the heap.
///
/// The operand stack and the scope arena carry every live reference the
/// mutator can reach (frame locals and the init/global scopes all live in
/// the arena), so together they are the root set.
pub struct RootSet<'a> {
    pub stack: &'a mut Vec<Value>,
    pub scopes: &'a mut ScopeArena,
}

impl RootSet<'_> {
    fn visit(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for value in self.stack.iter_mut() {
            visitor(value);
        }
        self.scopes.visit_values(visitor);
    }
}

/// The process heap. Paired init/teardown is owned by the runtime: one
/// `Heap` per runtime, dropped on runtime teardown.
#[derive(Debug)]
pub struct Heap {
    new_zone: NewZone,
    old_zone: OldZone,
    minor_collections: usize,
    major_collections: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_NEW_CAPACITY, DEFAULT_OLD_CAPACITY)
    }

    #[must_use]
    pub fn with_capacities(new_capacity: usize, old_capacity: usize) -> Self {
        Self {
            new_zone: NewZone::new(new_capacity),
            old_zone: OldZone::new(old_capacity),
            minor_collections: 0,
            major_collections: 0,
        }
    }

    /// Immutable access to a payload.
    ///
    /// # Panics
    /// Panics if the id is stale (points at a moved or swept cell).
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.cell(id)
            .data
            .as_ref()
            .expect("Heap::get: object moved or swept")
    }

    /// Mutable access to a payload.
    ///
    /// # Panics
    /// Panics if the id is stale.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.cell_mut(id)
            .data
            .as_mut()
            .expect("Heap::get_mut: object moved or swept")
    }

    #[must_use]
    pub fn header(&self, id: HeapId) -> &Header {
        &self.cell(id).header
    }

    fn cell(&self, id: HeapId) -> &Cell {
        if id.is_new_space() {
            &self.new_zone.active().cells[id.index()]
        } else {
            &self.old_zone.cells[id.index()]
        }
    }

    fn cell_mut(&mut self, id: HeapId) -> &mut Cell {
        if id.is_new_space() {
            &mut self.new_zone.active_mut().cells[id.index()]
        } else {
            &mut self.old_zone.cells[id.index()]
        }
    }

    /// Allocates in the new generation.
    ///
    /// Fails by handing the payload back when the active semispace is full;
    /// the caller (the VM) runs a minor collection and retries. With the
    /// `system-heap` feature every allocation is tenured and never fails.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, HeapData> {
        #[cfg(feature = "system-heap")]
        {
            return Ok(self.allocate_tenured(data));
        }
        #[cfg(not(feature = "system-heap"))]
        {
            let size = aligned_size(&data);
            let space = self.new_zone.active_mut();
            if space.try_allocate(size) == UNALLOCATED {
                return Err(data);
            }
            let header = Header::new(size, data.kind(), true);
            let index = space.push_cell(header, data);
            Ok(HeapId::new_space(index))
        }
    }

    /// Allocates directly in the old generation, used for oversized objects
    /// and for compile-time objects created outside an execution context.
    pub fn allocate_tenured(&mut self, data: HeapData) -> HeapId {
        let size = aligned_size(&data);
        let header = Header::new(size, data.kind(), false);
        let index = self.old_zone.insert(header, data);
        HeapId::old_space(index)
    }

    /// True when the nursery is running out of room and a minor collection
    /// should run at the next safe point.
    #[must_use]
    pub fn new_zone_pressure(&self) -> bool {
        #[cfg(feature = "system-heap")]
        {
            false
        }
        #[cfg(not(feature = "system-heap"))]
        {
            let space = self.new_zone.active();
            space.used() * 4 > space.capacity() * 3
        }
    }

    /// True when a major collection is worth running before the next
    /// allocation burst.
    #[must_use]
    pub fn old_zone_pressure(&self) -> bool {
        #[cfg(feature = "system-heap")]
        {
            false
        }
        #[cfg(not(feature = "system-heap"))]
        {
            self.old_zone.used > self.old_zone.capacity
        }
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            new_used: self.new_zone.active().used(),
            new_capacity: self.new_zone.active().capacity(),
            old_used: self.old_zone.used,
            old_capacity: self.old_zone.capacity,
            live_new: self
                .new_zone
                .active()
                .cells
                .iter()
                .filter(|c| c.data.is_some())
                .count(),
            live_old: self.old_zone.cells.iter().filter(|c| c.data.is_some()).count(),
            minor_collections: self.minor_collections,
            major_collections: self.major_collections,
        }
    }

    /// Minor collection: copies live new-space objects into the idle
    /// semispace (promoting long-lived ones), rewriting every reference in
    /// the root set and in old-generation objects. The vacated semispace is
    /// reset wholesale, so no live object survives in a collected
    /// from-space.
    pub fn collect_minor(&mut self, mut roots: RootSet<'_>) {
        #[cfg(feature = "system-heap")]
        {
            let _ = &mut roots;
        }
        #[cfg(not(feature = "system-heap"))]
        {
            let target = 1 - self.new_zone.active;

            // Evacuate the roots.
            roots.visit(&mut |value| self.forward_value(value, target));

            // Two scan frontiers run to a joint fixpoint: the old
            // generation stands in for a remembered set (any old object may
            // point into new space), and the Cheney scan over to-space may
            // promote objects behind it, which the old frontier then picks
            // up again.
            let mut old_scan = 0;
            let mut new_scan = 0;
            loop {
                let mut progress = false;
                while old_scan < self.old_zone.cells.len() {
                    if let Some(mut data) = self.old_zone.cells[old_scan].data.take() {
                        data.trace(&mut |value| self.forward_value(value, target));
                        self.old_zone.cells[old_scan].data = Some(data);
                    }
                    old_scan += 1;
                    progress = true;
                }
                while new_scan < self.new_zone.spaces[target].cells.len() {
                    let mut data = self.new_zone.spaces[target].cells[new_scan]
                        .data
                        .take()
                        .expect("to-space cell vacated during scan");
                    data.trace(&mut |value| self.forward_value(value, target));
                    self.new_zone.spaces[target].cells[new_scan].data = Some(data);
                    new_scan += 1;
                    progress = true;
                }
                if !progress {
                    break;
                }
            }

            self.new_zone.spaces[self.new_zone.active].reset();
            self.new_zone.active = target;
            self.minor_collections += 1;
        }
    }

    /// Copies one referenced new-space object into the target semispace (or
    /// the old generation), leaving a forwarding address behind. Forwarding
    /// addresses are only meaningful for the duration of the collection.
    #[cfg(not(feature = "system-heap"))]
    fn forward_value(&mut self, value: &mut Value, target: usize) {
        let Value::Ref(id) = value else { return };
        if !id.is_new_space() {
            return;
        }
        *value = Value::Ref(self.evacuate(id.index(), target));
    }

    #[cfg(not(feature = "system-heap"))]
    fn evacuate(&mut self, index: usize, target: usize) -> HeapId {
        let source = self.new_zone.active;
        debug_assert_ne!(source, target);

        if self.new_zone.spaces[source].cells[index].header.is_forwarded() {
            return self.new_zone.spaces[source].cells[index].header.forwarding_target();
        }

        let mut header = self.new_zone.spaces[source].cells[index].header;
        let data = self.new_zone.spaces[source].cells[index]
            .data
            .take()
            .expect("live object vacated before evacuation");
        header.survivals = header.survivals.saturating_add(1);

        let new_id = if header.survivals >= PROMOTION_AGE
            || self.new_zone.spaces[target].try_allocate(header.size()) == UNALLOCATED
        {
            HeapId::old_space(self.old_zone.insert_append(header, data))
        } else {
            HeapId::new_space(self.new_zone.spaces[target].push_cell(header, data))
        };

        self.new_zone.spaces[source].cells[index]
            .header
            .set_forwarded(new_id);
        new_id
    }

    /// Major collection: mark from the roots across both generations, then
    /// sweep the old generation. Mark bits are cleared up front.
    pub fn collect_major(&mut self, mut roots: RootSet<'_>) {
        #[cfg(feature = "system-heap")]
        {
            let _ = &mut roots;
        }
        #[cfg(not(feature = "system-heap"))]
        {
            for cell in &mut self.old_zone.cells {
                cell.header.set_mark(false);
            }
            for cell in &mut self.new_zone.active_mut().cells {
                cell.header.set_mark(false);
            }

            let mut pending: Vec<HeapId> = Vec::new();
            roots.visit(&mut |value| {
                if let Value::Ref(id) = value {
                    pending.push(*id);
                }
            });

            while let Some(id) = pending.pop() {
                let cell = self.cell_mut(id);
                if cell.header.is_marked() {
                    continue;
                }
                cell.header.set_mark(true);
                if let Some(mut data) = cell.data.take() {
                    data.trace(&mut |value| {
                        if let Value::Ref(child) = value {
                            pending.push(*child);
                        }
                    });
                    self.cell_mut(id).data = Some(data);
                }
            }

            // Sweep the old generation.
            for index in 0..self.old_zone.cells.len() {
                let cell = &mut self.old_zone.cells[index];
                if cell.data.is_some() && !cell.header.is_marked() {
                    self.old_zone.used = self.old_zone.used.saturating_sub(cell.header.size());
                    cell.data = None;
                    self.old_zone.free.push(index);
                }
            }
            // a live set larger than the region grows it, so the pressure
            // signal settles instead of re-triggering every safe point
            if self.old_zone.used > self.old_zone.capacity {
                self.old_zone.capacity = self.old_zone.used * 2;
            }
            self.major_collections += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pair;

    fn empty_roots<'a>(stack: &'a mut Vec<Value>, scopes: &'a mut ScopeArena) -> RootSet<'a> {
        RootSet { stack, scopes }
    }

    #[test]
    fn try_allocate_bumps_or_leaves_state_unchanged() {
        let mut space = Semispace::new(64);
        let first = space.try_allocate(32);
        assert_eq!(first, 0);
        let second = space.try_allocate(32);
        assert_eq!(second, 32);
        assert_eq!(space.used(), 64);
        let third = space.try_allocate(1);
        assert_eq!(third, UNALLOCATED);
        assert_eq!(space.used(), 64);
    }

    #[test]
    fn allocate_and_read_back() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::String("hello".to_owned())).unwrap();
        match heap.get(id) {
            HeapData::String(s) => assert_eq!(s, "hello"),
            other => panic!("unexpected payload: {other:?}"),
        }
        assert_eq!(heap.header(id).class(), ClassKind::String);
    }

    #[cfg(not(feature = "system-heap"))]
    #[test]
    fn minor_collection_moves_live_objects_and_rewrites_roots() {
        let mut heap = Heap::with_capacities(4096, 1 << 20);
        let live = heap.allocate(HeapData::String("live".to_owned())).unwrap();
        let _garbage = heap.allocate(HeapData::String("garbage".to_owned())).unwrap();

        let mut stack = vec![Value::Ref(live)];
        let mut scopes = ScopeArena::new();
        heap.collect_minor(empty_roots(&mut stack, &mut scopes));

        let moved = stack[0].ref_id().unwrap();
        match heap.get(moved) {
            HeapData::String(s) => assert_eq!(s, "live"),
            other => panic!("unexpected payload: {other:?}"),
        }
        let stats = heap.stats();
        assert_eq!(stats.minor_collections, 1);
        assert_eq!(stats.live_new + stats.live_old, 1);
    }

    #[cfg(not(feature = "system-heap"))]
    #[test]
    fn minor_collection_follows_interior_references() {
        let mut heap = Heap::with_capacities(4096, 1 << 20);
        let s = heap.allocate(HeapData::String("car".to_owned())).unwrap();
        let pair = heap
            .allocate(HeapData::Pair(Pair::new(Value::Ref(s), Value::Null)))
            .unwrap();

        let mut stack = vec![Value::Ref(pair)];
        let mut scopes = ScopeArena::new();
        heap.collect_minor(empty_roots(&mut stack, &mut scopes));

        let moved = stack[0].ref_id().unwrap();
        let HeapData::Pair(p) = heap.get(moved) else {
            panic!("pair expected");
        };
        let car = p.car.ref_id().unwrap();
        match heap.get(car) {
            HeapData::String(s) => assert_eq!(s, "car"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[cfg(not(feature = "system-heap"))]
    #[test]
    fn survivors_are_promoted_to_the_old_zone() {
        let mut heap = Heap::with_capacities(4096, 1 << 20);
        let id = heap.allocate(HeapData::String("old-timer".to_owned())).unwrap();
        let mut stack = vec![Value::Ref(id)];
        let mut scopes = ScopeArena::new();
        for _ in 0..PROMOTION_AGE {
            heap.collect_minor(RootSet {
                stack: &mut stack,
                scopes: &mut scopes,
            });
        }
        let promoted = stack[0].ref_id().unwrap();
        assert!(!promoted.is_new_space());
        match heap.get(promoted) {
            HeapData::String(s) => assert_eq!(s, "old-timer"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[cfg(not(feature = "system-heap"))]
    #[test]
    fn major_collection_sweeps_unreachable_old_objects() {
        let mut heap = Heap::new();
        let keep = heap.allocate_tenured(HeapData::String("keep".to_owned()));
        let _drop = heap.allocate_tenured(HeapData::String("drop".to_owned()));

        let mut stack = vec![Value::Ref(keep)];
        let mut scopes = ScopeArena::new();
        heap.collect_major(empty_roots(&mut stack, &mut scopes));

        let stats = heap.stats();
        assert_eq!(stats.live_old, 1);
        match heap.get(keep) {
            HeapData::String(s) => assert_eq!(s, "keep"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[cfg(not(feature = "system-heap"))]
    #[test]
    fn full_semispace_reports_failure_and_collection_recovers() {
        let mut heap = Heap::with_capacities(256, 1 << 20);
        let mut stack = vec![];
        let mut scopes = ScopeArena::new();
        let mut data = HeapData::String("x".repeat(64));
        loop {
            match heap.allocate(data) {
                Ok(_) => data = HeapData::String("x".repeat(64)),
                Err(returned) => {
                    // nothing is live, so a collection frees the space
                    heap.collect_minor(empty_roots(&mut stack, &mut scopes));
                    assert!(heap.allocate(returned).is_ok());
                    break;
                }
            }
        }
    }
}
