//! The struct layout engine.
//!
//! Decides the offset of every data field and the index of every pointer
//! field in a struct. Fields are presented in ordinal order; the engine
//! packs them into the data section front-to-back, tracking the sub-word
//! gaps left by alignment so later (smaller) fields can reclaim them.
//!
//! Three kinds of scope cooperate:
//!
//! - [`Top`] is the struct's root: a word count, a pointer count, and the
//!   holes left in the data section so far.
//! - A `Union` owns a set of *data locations* (slots in the parent scope)
//!   and pointer slots which its groups share, plus the discriminant.
//! - A `Group` is one union variant. It tracks how much of each union data
//!   location it has consumed; sibling groups overlap freely because only
//!   one variant is live at a time.
//!
//! Unions and groups form an arbitrarily deep alternating tree, so they are
//! stored in flat vectors inside [`StructLayout`] and referenced by index
//! handles ([`UnionId`], [`GroupId`], [`ScopeId`]). The whole structure is
//! scratch state: it lives for one struct translation and is dropped.

/// Sizes are powers of two, expressed as the exponent: a size class of `n`
/// means `2^n` bits. Data fields range over classes 0 (bool) to 6 (word).
pub const WORD_LG_BITS: u32 = 6;

/// The free sub-word ranges within a segment of allocated space: up to one
/// hole of each power-of-two size between 1 and 32 bits.
///
/// One hole per class suffices: every data field has a power-of-two size,
/// is aligned to that size, and is at most a word wide. Allocating `N` bits
/// from the smallest adequate hole of size `M` leaves exactly one new hole
/// of each size `N, 2N, .., M/2`, none of which existed before (else `M`
/// was not the smallest). Extending the section by a word and carving `N`
/// bits from it behaves the same way with `M = 64`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoleSet {
    /// The offset of each hole as a multiple of its size; zero means no
    /// hole. A real hole can never sit at offset zero, because the first
    /// allocation in any segment is placed at its very beginning.
    holes: [u32; WORD_LG_BITS as usize],
}

impl HoleSet {
    pub fn new() -> HoleSet {
        HoleSet::default()
    }

    /// Find space for a field of size `2^lg_size` among the holes. If
    /// found, remove the hole and return its offset in units of the size.
    /// A larger hole is split, re-recording the unused half.
    pub fn try_allocate(&mut self, lg_size: u32) -> Option<u32> {
        if lg_size >= WORD_LG_BITS {
            None
        } else if self.holes[lg_size as usize] != 0 {
            let result = self.holes[lg_size as usize];
            self.holes[lg_size as usize] = 0;
            Some(result)
        } else {
            let next = self.try_allocate(lg_size + 1)?;
            let result = next * 2;
            self.holes[lg_size as usize] = result + 1;
            Some(result)
        }
    }

    /// Record holes of progressively larger sizes in `[lg_size,
    /// limit_lg_size)`, starting at `offset`. This is the aftermath of
    /// allocating an `lg_size`-sized field from the front of a
    /// `limit_lg_size`-sized space.
    pub fn add_holes_at_end(&mut self, lg_size: u32, offset: u32, limit_lg_size: u32) {
        debug_assert!(limit_lg_size <= WORD_LG_BITS);

        let (mut lg_size, mut offset) = (lg_size, offset);
        while lg_size < limit_lg_size {
            debug_assert!(self.holes[lg_size as usize] == 0);
            debug_assert!(offset % 2 == 1);
            self.holes[lg_size as usize] = offset;
            lg_size += 1;
            offset = (offset + 1) / 2;
        }
    }

    /// Grow the allocation at `(old_lg_size, old_offset)` to `2 ^
    /// expansion_factor` times its size by absorbing its sibling hole and,
    /// recursively, the siblings of each successively doubled region. Never
    /// consumes a non-adjacent hole.
    pub fn try_expand(&mut self, old_lg_size: u32, old_offset: u32, expansion_factor: u32) -> bool {
        if expansion_factor == 0 {
            return true;
        }
        if old_lg_size >= WORD_LG_BITS || self.holes[old_lg_size as usize] != old_offset + 1 {
            // The space immediately after the region is not a hole.
            return false;
        }

        if self.try_expand(old_lg_size + 1, old_offset >> 1, expansion_factor - 1) {
            self.holes[old_lg_size as usize] = 0;
            true
        } else {
            false
        }
    }

    /// The size class of the smallest hole at least `lg_size` big.
    pub fn smallest_at_least(&self, lg_size: u32) -> Option<u32> {
        (lg_size..WORD_LG_BITS).find(|&i| self.holes[i as usize] != 0)
    }

    /// The lg of the amount of space used in the first word of the segment.
    ///
    /// A 32-bit hole at sub-word offset 1 means at most the first 32 bits
    /// are used; given that, a 16-bit hole at offset 1 narrows it to 16
    /// bits, and so on down.
    pub fn first_word_used(&self) -> u32 {
        for i in (1..=WORD_LG_BITS).rev() {
            if self.holes[i as usize - 1] != 1 {
                return i;
            }
        }
        0
    }

    #[cfg(test)]
    fn hole(&self, lg_size: u32) -> u32 {
        self.holes[lg_size as usize]
    }
}

/// The root scope of a struct under layout.
#[derive(Debug, Default)]
pub struct Top {
    /// Size of the data section so far, in words.
    pub data_word_count: u32,
    /// Size of the pointer section so far.
    pub pointer_count: u32,
    pub holes: HoleSet,
}

/// Handle to a union layout within a [`StructLayout`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnionId(u32);

/// Handle to a group layout within a [`StructLayout`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GroupId(u32);

/// Handle to a scope fields can be added to: the struct root or a group.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScopeId {
    Top,
    Group(GroupId),
}

/// A slot in a union's parent scope, shared by all the union's groups. The
/// address is fixed, but `lg_size` may grow when a group demands more room
/// than the slot currently has; growth rescales `offset`.
#[derive(Debug, Copy, Clone)]
struct DataLocation {
    lg_size: u32,
    offset: u32,
}

#[derive(Debug)]
struct Union {
    parent: ScopeId,
    group_count: u32,
    discriminant_offset: Option<u32>,
    data_locations: Vec<DataLocation>,
    pointer_locations: Vec<u32>,
}

/// How much of one union data location a particular group has consumed.
#[derive(Debug, Default)]
struct DataLocationUsage {
    is_used: bool,
    /// The smallest power-of-two prefix of the location covering all of
    /// this group's allocations in it. Meaningful only if `is_used`.
    lg_size_used: u32,
    /// Holes within the `lg_size_used` prefix, with offsets relative to
    /// the start of the location.
    holes: HoleSet,
}

impl DataLocationUsage {
    fn used(lg_size: u32) -> DataLocationUsage {
        DataLocationUsage {
            is_used: true,
            lg_size_used: lg_size,
            holes: HoleSet::new(),
        }
    }

    /// The size class of the smallest single hole within this location that
    /// could hold a field of `lg_size` bits. Picking the smallest adequate
    /// hole across all locations keeps fragmentation down.
    fn smallest_hole_at_least(&self, location: DataLocation, lg_size: u32) -> Option<u32> {
        if !self.is_used {
            // The whole location is one big hole.
            (lg_size <= location.lg_size).then(|| location.lg_size)
        } else if lg_size >= self.lg_size_used {
            // Too big for any internal hole, but if the location is bigger
            // than our current prefix we can double the prefix.
            (lg_size < location.lg_size).then(|| lg_size)
        } else if let Some(hole) = self.holes.smallest_at_least(lg_size) {
            Some(hole)
        } else if self.lg_size_used < location.lg_size {
            // Doubling the prefix effectively creates a hole the size of
            // the current usage.
            Some(self.lg_size_used)
        } else {
            None
        }
    }

    /// Allocate `lg_size` bits from a hole [`smallest_hole_at_least`] has
    /// already confirmed to exist. Returns the absolute offset, in units of
    /// the size, from the start of the struct's data section.
    fn allocate_from_hole(&mut self, location: DataLocation, lg_size: u32) -> u32 {
        let result;
        if !self.is_used {
            debug_assert!(lg_size <= location.lg_size);
            result = 0;
            self.is_used = true;
            self.lg_size_used = lg_size;
        } else if lg_size >= self.lg_size_used {
            // Double the prefix to twice the requested size and take the
            // second half, leaving holes of every intermediate size.
            debug_assert!(lg_size < location.lg_size);
            self.holes.add_holes_at_end(self.lg_size_used, 1, lg_size);
            self.lg_size_used = lg_size + 1;
            result = 1;
        } else if let Some(hole) = self.holes.try_allocate(lg_size) {
            result = hole;
        } else {
            // Smaller than the prefix but no hole fits; double the prefix
            // and allocate from the fresh half.
            debug_assert!(self.lg_size_used < location.lg_size);
            result = 1 << (self.lg_size_used - lg_size);
            self.holes.add_holes_at_end(lg_size, result + 1, self.lg_size_used);
            self.lg_size_used += 1;
        }

        (location.offset << (location.lg_size - lg_size)) + result
    }
}

#[derive(Debug)]
struct Group {
    parent: UnionId,
    /// One entry per parent data location, lazily extended as sibling
    /// groups mint new locations.
    usages: Vec<DataLocationUsage>,
    /// How many of the parent union's pointer slots this group has taken.
    pointer_usage: u32,
    has_members: bool,
}

/// All layout state for one struct translation.
#[derive(Debug, Default)]
pub struct StructLayout {
    top: Top,
    unions: Vec<Union>,
    groups: Vec<Group>,
}

impl StructLayout {
    pub fn new() -> StructLayout {
        StructLayout::default()
    }

    pub fn top(&self) -> &Top {
        &self.top
    }

    pub fn add_union(&mut self, parent: ScopeId) -> UnionId {
        self.unions.push(Union {
            parent,
            group_count: 0,
            discriminant_offset: None,
            data_locations: Vec::new(),
            pointer_locations: Vec::new(),
        });
        UnionId(self.unions.len() as u32 - 1)
    }

    pub fn add_group(&mut self, parent: UnionId) -> GroupId {
        self.groups.push(Group {
            parent,
            usages: Vec::new(),
            pointer_usage: 0,
            has_members: false,
        });
        GroupId(self.groups.len() as u32 - 1)
    }

    pub fn discriminant_offset(&self, union: UnionId) -> Option<u32> {
        self.union_ref(union).discriminant_offset
    }

    /// Register that the scope has a member, without allocating space. A
    /// group's first member (even a void one) counts it as a union variant,
    /// which is what forces the discriminant into existence once a second
    /// variant appears.
    pub fn add_void(&mut self, scope: ScopeId) {
        match scope {
            ScopeId::Top => {}
            ScopeId::Group(group) => self.group_add_void(group),
        }
    }

    /// Allocate `2^lg_size` bits in the scope, returning the offset in
    /// units of the size.
    pub fn add_data(&mut self, scope: ScopeId, lg_size: u32) -> u32 {
        match scope {
            ScopeId::Top => self.top_add_data(lg_size),
            ScopeId::Group(group) => self.group_add_data(group, lg_size),
        }
    }

    /// Allocate the next pointer slot in the scope.
    pub fn add_pointer(&mut self, scope: ScopeId) -> u32 {
        match scope {
            ScopeId::Top => {
                let result = self.top.pointer_count;
                self.top.pointer_count += 1;
                result
            }
            ScopeId::Group(group) => self.group_add_pointer(group),
        }
    }

    /// Try to grow a previously-allocated region by `2^expansion_factor`.
    /// Succeeds only if the space after the region happens to be free.
    pub fn try_expand_data(
        &mut self,
        scope: ScopeId,
        old_lg_size: u32,
        old_offset: u32,
        expansion_factor: u32,
    ) -> bool {
        match scope {
            ScopeId::Top => self.top.holes.try_expand(old_lg_size, old_offset, expansion_factor),
            ScopeId::Group(group) => {
                self.group_try_expand_data(group, old_lg_size, old_offset, expansion_factor)
            }
        }
    }

    /// Allocate the union's 16-bit discriminant in its parent scope.
    /// Returns false if it had already been allocated.
    pub fn add_discriminant(&mut self, union: UnionId) -> bool {
        if self.union_ref(union).discriminant_offset.is_some() {
            return false;
        }
        let parent = self.union_ref(union).parent;
        let offset = self.add_data(parent, 4); // 2^4 = 16 bits
        self.union_mut(union).discriminant_offset = Some(offset);
        true
    }

    fn union_ref(&self, UnionId(index): UnionId) -> &Union {
        &self.unions[index as usize]
    }

    fn union_mut(&mut self, UnionId(index): UnionId) -> &mut Union {
        &mut self.unions[index as usize]
    }

    fn group_ref(&self, GroupId(index): GroupId) -> &Group {
        &self.groups[index as usize]
    }

    fn group_mut(&mut self, GroupId(index): GroupId) -> &mut Group {
        &mut self.groups[index as usize]
    }

    fn top_add_data(&mut self, lg_size: u32) -> u32 {
        match self.top.holes.try_allocate(lg_size) {
            Some(hole) => hole,
            None => {
                // No hole fits; extend the section by a word, place the
                // field at the word's start, and record the remainder.
                let offset = self.top.data_word_count << (WORD_LG_BITS - lg_size);
                self.top.data_word_count += 1;
                self.top.holes.add_holes_at_end(lg_size, offset + 1, WORD_LG_BITS);
                offset
            }
        }
    }

    fn new_group_adding_first_member(&mut self, union: UnionId) {
        self.union_mut(union).group_count += 1;
        if self.union_ref(union).group_count == 2 {
            self.add_discriminant(union);
        }
    }

    /// Mint a brand-new data location for the union in its parent scope.
    fn union_add_new_data_location(&mut self, union: UnionId, lg_size: u32) -> u32 {
        let parent = self.union_ref(union).parent;
        let offset = self.add_data(parent, lg_size);
        self.union_mut(union)
            .data_locations
            .push(DataLocation { lg_size, offset });
        offset
    }

    fn union_add_new_pointer_location(&mut self, union: UnionId) -> u32 {
        let parent = self.union_ref(union).parent;
        let index = self.add_pointer(parent);
        self.union_mut(union).pointer_locations.push(index);
        index
    }

    /// Grow a union data location to `2^new_lg_size` bits in place, if the
    /// parent scope has free space behind it. Growth widens every group's
    /// view of the location at once.
    fn try_expand_location(&mut self, union: UnionId, index: usize, new_lg_size: u32) -> bool {
        let location = self.union_ref(union).data_locations[index];
        if new_lg_size <= location.lg_size {
            return true;
        }
        let parent = self.union_ref(union).parent;
        if self.try_expand_data(
            parent,
            location.lg_size,
            location.offset,
            new_lg_size - location.lg_size,
        ) {
            let location = &mut self.union_mut(union).data_locations[index];
            location.offset >>= new_lg_size - location.lg_size;
            location.lg_size = new_lg_size;
            true
        } else {
            false
        }
    }

    fn group_add_void(&mut self, group: GroupId) {
        if !self.group_ref(group).has_members {
            self.group_mut(group).has_members = true;
            let union = self.group_ref(group).parent;
            self.new_group_adding_first_member(union);
        }
    }

    /// Best fit among the union's existing data locations; expand one if
    /// nothing fits; mint a new location as a last resort.
    fn group_add_data(&mut self, group: GroupId, lg_size: u32) -> u32 {
        self.group_add_void(group);

        let union = self.group_ref(group).parent;
        let location_count = self.union_ref(union).data_locations.len();
        while self.group_ref(group).usages.len() < location_count {
            self.group_mut(group).usages.push(DataLocationUsage::default());
        }

        let mut best: Option<(u32, usize)> = None;
        for index in 0..location_count {
            let location = self.union_ref(union).data_locations[index];
            let usage = &self.group_ref(group).usages[index];
            if let Some(hole) = usage.smallest_hole_at_least(location, lg_size) {
                if best.map_or(true, |(best_size, _)| hole < best_size) {
                    best = Some((hole, index));
                }
            }
        }
        if let Some((_, index)) = best {
            let location = self.union_ref(union).data_locations[index];
            return self.group_mut(group).usages[index].allocate_from_hole(location, lg_size);
        }

        // No hole anywhere in the union is big enough. Try expanding each
        // location to fit.
        for index in 0..location_count {
            if let Some(offset) = self.try_allocate_by_expanding(group, index, lg_size) {
                return offset;
            }
        }

        let offset = self.union_add_new_data_location(union, lg_size);
        self.group_mut(group).usages.push(DataLocationUsage::used(lg_size));
        offset
    }

    fn group_add_pointer(&mut self, group: GroupId) -> u32 {
        self.group_add_void(group);

        let union = self.group_ref(group).parent;
        let used = self.group_ref(group).pointer_usage as usize;
        self.group_mut(group).pointer_usage += 1;
        if used < self.union_ref(union).pointer_locations.len() {
            self.union_ref(union).pointer_locations[used]
        } else {
            self.union_add_new_pointer_location(union)
        }
    }

    /// Allocate by growing either the group's used prefix of a location or
    /// the location itself. Called only after `smallest_hole_at_least`
    /// failed for every location.
    fn try_allocate_by_expanding(
        &mut self,
        group: GroupId,
        index: usize,
        lg_size: u32,
    ) -> Option<u32> {
        let union = self.group_ref(group).parent;

        if !self.group_ref(group).usages[index].is_used {
            if !self.try_expand_location(union, index, lg_size) {
                return None;
            }
            let location = self.union_ref(union).data_locations[index];
            let usage = &mut self.group_mut(group).usages[index];
            usage.is_used = true;
            usage.lg_size_used = lg_size;
            Some(location.offset << (location.lg_size - lg_size))
        } else {
            let new_size = self.group_ref(group).usages[index].lg_size_used.max(lg_size) + 1;
            if !self.try_expand_usage(group, index, new_size) {
                return None;
            }
            let location = self.union_ref(union).data_locations[index];
            let result = self.group_mut(group).usages[index]
                .holes
                .try_allocate(lg_size)
                .expect("expansion must leave a hole big enough for the request");
            Some((location.offset << (location.lg_size - lg_size)) + result)
        }
    }

    /// Grow a group's used prefix of a location to `2^desired_usage` bits,
    /// growing the underlying location first if it is too small.
    fn try_expand_usage(&mut self, group: GroupId, index: usize, desired_usage: u32) -> bool {
        let union = self.group_ref(group).parent;
        if desired_usage > self.union_ref(union).data_locations[index].lg_size
            && !self.try_expand_location(union, index, desired_usage)
        {
            return false;
        }

        let usage = &mut self.group_mut(group).usages[index];
        usage.holes.add_holes_at_end(usage.lg_size_used, 1, desired_usage);
        usage.lg_size_used = desired_usage;
        true
    }

    fn group_try_expand_data(
        &mut self,
        group: GroupId,
        old_lg_size: u32,
        old_offset: u32,
        expansion_factor: u32,
    ) -> bool {
        if old_lg_size + expansion_factor > WORD_LG_BITS
            || old_offset & ((1 << expansion_factor) - 1) != 0
        {
            // The new size would exceed a word, or the offset is not
            // aligned for it.
            return false;
        }

        let union = self.group_ref(group).parent;
        for index in 0..self.group_ref(group).usages.len() {
            let location = self.union_ref(union).data_locations[index];
            if location.lg_size >= old_lg_size
                && old_offset >> (location.lg_size - old_lg_size) == location.offset
            {
                // The region is a subset of this location; retranslate the
                // offset to be location-relative.
                let local_offset =
                    old_offset - (location.offset << (location.lg_size - old_lg_size));

                let lg_size_used = self.group_ref(group).usages[index].lg_size_used;
                return if local_offset == 0 && lg_size_used == old_lg_size {
                    // The region is exactly the used prefix; grow the whole
                    // prefix.
                    self.try_expand_usage(group, index, old_lg_size + expansion_factor)
                } else {
                    // The prefix holds other data too, so the region can
                    // only grow into recorded holes.
                    self.group_mut(group).usages[index].holes.try_expand(
                        old_lg_size,
                        local_offset,
                        expansion_factor,
                    )
                };
            }
        }

        panic!("tried to expand a field that was never allocated");
    }
}
