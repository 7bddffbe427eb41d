//! Resolution state and the steps shared by containers and telecommands.
//!
//! The running start bit cursor is passed explicitly through every step; it is scoped
//! to one top level call and never stored on the resolver.
use std::cmp::Reverse;

use tracing::{debug, trace};

use super::{ContentEntry, ContentKind, ContentModel, EntryItem, ResolverOptions, StartBit};
use crate::bits::{self, strip_hex_prefix, RawBits};
use crate::codec::ItemCodec;
use crate::entry_value::{EntryValue, Operator};
use crate::model::{
    Comparison, Container, Database, EntryRef, Item, Location, ReferenceLocation, Repeat,
    SequenceEntry, Telecommand,
};
use crate::{Error, Result};

/// Definition whose entry list is being walked; supplies the context for relative
/// references.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Scope<'a> {
    Container(&'a Container),
    Telecommand(&'a Telecommand),
}

impl<'a> Scope<'a> {
    fn space_system(self) -> &'a str {
        match self {
            Self::Container(c) => c.space_system(),
            Self::Telecommand(t) => t.space_system(),
        }
    }
}

/// Conditions and repeat label handed down to nested content.
#[derive(Clone, Debug, Default)]
pub(crate) struct Inherited<'a> {
    pub conditions: Vec<EntryValue<'a>>,
    pub repeat_label: String,
}

pub(crate) struct Resolver<'a, 'v> {
    pub db: &'a Database,
    pub options: &'v ResolverOptions,
    pub user_values: &'v [EntryValue<'a>],
    pub binary: Option<&'v [u8]>,
    pub entries: Vec<ContentEntry<'a>>,
    pub warnings: Vec<String>,
    pub valid: bool,
    /// Paths of containers or telecommands on the current inheritance/inclusion path.
    pub visiting: Vec<&'a str>,
    /// Restrictions on `containerEnd` entries, checked once those entries are placed.
    pub deferred: Vec<(usize, EntryValue<'a>)>,
}

impl<'a, 'v> Resolver<'a, 'v> {
    pub fn new(
        db: &'a Database,
        options: &'v ResolverOptions,
        user_values: &'v [EntryValue<'a>],
        binary: Option<&'v [u8]>,
    ) -> Self {
        Self {
            db,
            options,
            user_values,
            binary,
            entries: Vec::default(),
            warnings: Vec::default(),
            valid: true,
            visiting: Vec::default(),
            deferred: Vec::default(),
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        trace!(%warning, "content warning");
        self.warnings.push(warning);
    }

    /// Mark `path` as being processed.
    ///
    /// # Errors
    /// [Error::InvalidDefinition] if it already is, i.e., a definition inherits from or
    /// includes itself.
    pub fn enter(&mut self, path: &'a str) -> Result<()> {
        if self.visiting.contains(&path) {
            return Err(Error::InvalidDefinition(format!(
                "{path} inherits from or includes itself ({})",
                self.visiting.join(" -> ")
            )));
        }
        self.visiting.push(path);
        Ok(())
    }

    pub fn leave(&mut self) {
        self.visiting.pop();
    }

    /// Turn a comparison made from space system `context` into a value.
    pub fn comparison_value(&self, context: &str, c: &Comparison) -> Result<EntryValue<'a>> {
        let item = self.db.resolve_parameter(context, &c.parameter_ref)?;
        Ok(EntryValue::new(item, c.operator, c.value.clone(), c.form))
    }

    fn is_satisfied(&self, conditions: &[EntryValue<'a>]) -> bool {
        let handlers = self.db.time_handlers();
        conditions.iter().all(|condition| {
            self.entries
                .iter()
                .filter_map(|e| e.value.as_ref())
                .chain(self.user_values.iter())
                .any(|bound| bound.is_compatible_with(condition, handlers))
        })
    }

    /// Bind `restriction` onto every in use entry placing its item.
    ///
    /// An entry already holding a contradicting value makes the model invalid. Entries
    /// still waiting on the container end are checked when they are placed.
    pub fn apply_restriction(&mut self, restriction: &EntryValue<'a>) {
        let path = restriction.item().path();
        let (pending, placed): (Vec<usize>, Vec<usize>) = (0..self.entries.len())
            .filter(|idx| {
                let entry = &self.entries[*idx];
                entry.in_use && entry.item().map(Item::path) == Some(path)
            })
            .partition(|idx| matches!(self.entries[*idx].start, Some(StartBit::FromEnd(_))));
        if pending.is_empty() && placed.is_empty() {
            trace!(%restriction, "restriction matches no entry");
            return;
        }
        self.deferred
            .extend(pending.into_iter().map(|idx| (idx, restriction.clone())));
        self.bind_restriction(restriction, &placed);
    }

    fn bind_restriction(&mut self, restriction: &EntryValue<'a>, targets: &[usize]) {
        let handlers = self.db.time_handlers();
        let mut conflicts = Vec::new();
        for &idx in targets {
            let entry = &mut self.entries[idx];
            match &entry.value {
                Some(existing) if !existing.is_compatible_with(restriction, handlers) => {
                    conflicts.push(format!(
                        "restriction {restriction} conflicts with {existing} on {}",
                        entry.label()
                    ));
                }
                Some(_) => {}
                None => entry.value = Some(restriction.clone()),
            }
        }
        if !conflicts.is_empty() {
            self.valid = false;
        }
        for conflict in conflicts {
            self.warn(conflict);
        }
    }

    /// Compute the start bit for an entry of `size` bits at `location`.
    ///
    /// Locations relative to the container end are returned as a placeholder and leave
    /// the cursor alone.
    pub fn add_start_bit(
        &mut self,
        name: &str,
        location: &Location,
        size: u64,
        cursor: &mut u64,
        container_start: u64,
    ) -> Option<StartBit> {
        let start = match location.reference {
            ReferenceLocation::PreviousEntry => *cursor as i64 + location.offset,
            ReferenceLocation::ContainerStart => container_start as i64 + location.offset,
            ReferenceLocation::ContainerEnd => return Some(StartBit::FromEnd(location.offset)),
            ReferenceLocation::NextEntry => {
                self.warn(format!("{name}: nextEntry locations are not supported"));
                return None;
            }
        };
        if start < 0 {
            self.warn(format!("{name}: computed start bit {start} is negative"));
            return None;
        }
        let start = start as u64;
        *cursor = start + size;
        Some(StartBit::Absolute(start))
    }

    /// Position of a structural entry (aggregate or nested container), which moves the
    /// cursor without occupying bits.
    fn anchor(&mut self, name: &str, location: &Location, cursor: &mut u64, container_start: u64) {
        match self.add_start_bit(name, location, 0, cursor, container_start) {
            Some(StartBit::FromEnd(_)) => self.warn(format!(
                "{name}: containerEnd locations are only supported for data entries"
            )),
            Some(StartBit::Absolute(_)) | None => {}
        }
    }

    /// Resolve `containerEnd` placeholders among the entries added since `first`.
    ///
    /// The end of the container is the highest end bit placed so far. Entries placed
    /// later relative to the previous entry follow the cursor, which is moved past any
    /// entry placed here. Restrictions deferred onto these entries are then applied.
    pub fn end_of_container(&mut self, first: usize, cursor: &mut u64) -> Result<()> {
        let pending: Vec<usize> = (first..self.entries.len())
            .filter(|idx| matches!(self.entries[*idx].start, Some(StartBit::FromEnd(_))))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let end = self
            .entries
            .iter()
            .filter_map(ContentEntry::end_bit)
            .max()
            .unwrap_or(0)
            .max(*cursor);
        for &idx in &pending {
            let mut entry = self.entries[idx].clone();
            let Some(StartBit::FromEnd(offset)) = entry.start else {
                continue;
            };
            let start = end as i64 - offset;
            if start < 0 {
                self.warn(format!(
                    "{}: start bit {start} from the container end is negative",
                    entry.label()
                ));
                entry.start = None;
            } else {
                let start = start as u64;
                entry.start = Some(StartBit::Absolute(start));
                *cursor = (*cursor).max(start + entry.size.unwrap_or(0));
                self.extract(&mut entry)?;
            }
            self.entries[idx] = entry;
        }

        let (deferred, outer): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(idx, _)| *idx >= first);
        self.deferred = outer;
        for (idx, restriction) in deferred {
            self.bind_restriction(&restriction, &[idx]);
        }
        Ok(())
    }

    /// Number of instances for `repeat`, `None` when the entry does not repeat.
    fn repeat_count(
        &mut self,
        name: &str,
        repeat: Option<&Repeat>,
        context: &str,
    ) -> Result<Option<u64>> {
        let (parameter_ref, slope, intercept) = match repeat {
            None => return Ok(None),
            Some(Repeat::Fixed(count)) => return Ok(Some(*count)),
            Some(Repeat::Dynamic {
                parameter_ref,
                slope,
                intercept,
            }) => (parameter_ref, *slope, *intercept),
        };
        let item = self.db.resolve_parameter(context, parameter_ref)?;
        let handlers = self.db.time_handlers();
        let value = self
            .entries
            .iter()
            .filter(|e| e.item().map(Item::path) == Some(item.path()))
            .filter_map(|e| e.value.as_ref())
            .filter(|v| v.operator() == Operator::Eq)
            .find_map(|v| v.calibrated_with(handlers))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.fract() == 0.0);
        let Some(value) = value else {
            self.warn(format!(
                "{name}: repeat count from {} is not available, using 1",
                item.name()
            ));
            return Ok(Some(1));
        };
        let count = slope as i128 * value as i128 + intercept as i128;
        if count < 0 {
            self.warn(format!("{name}: repeat count {count} is negative, using 0"));
            return Ok(Some(0));
        }
        Ok(Some(u64::try_from(count).unwrap_or(u64::MAX)))
    }

    /// Walk `entries` of the definition in `scope`.
    pub fn process_entries(
        &mut self,
        scope: Scope<'a>,
        entries: &'a [SequenceEntry],
        inherited: &Inherited<'a>,
        cursor: &mut u64,
        container_start: u64,
    ) -> Result<()> {
        let context = scope.space_system();
        for entry in entries {
            let mut conditions = inherited.conditions.clone();
            for c in &entry.include_conditions {
                conditions.push(self.comparison_value(context, c)?);
            }
            let in_use = self.is_satisfied(&conditions);

            match &entry.reference {
                EntryRef::Parameter(reference) => {
                    let item = self.db.resolve_parameter(context, reference)?;
                    self.repeated(item.name(), entry, context, inherited, in_use, |r, label| {
                        r.add_item(
                            EntryItem::Parameter(item),
                            &entry.location,
                            conditions.clone(),
                            label,
                            in_use,
                            cursor,
                            container_start,
                        )
                    })?;
                }
                EntryRef::Argument(reference) => {
                    let Scope::Telecommand(command) = scope else {
                        self.warn(format!(
                            "argument reference {reference} outside of a telecommand is ignored"
                        ));
                        continue;
                    };
                    let item = self.db.resolve_argument(command, reference)?;
                    self.repeated(item.name(), entry, context, inherited, in_use, |r, label| {
                        r.add_item(
                            EntryItem::Argument(item),
                            &entry.location,
                            conditions.clone(),
                            label,
                            in_use,
                            cursor,
                            container_start,
                        )
                    })?;
                }
                EntryRef::Container(reference) => {
                    let Scope::Container(_) = scope else {
                        self.warn(format!(
                            "container reference {reference} in a telecommand is not implemented"
                        ));
                        continue;
                    };
                    let nested = self.db.resolve_container(context, reference)?;
                    self.repeated(nested.name(), entry, context, inherited, in_use, |r, label| {
                        r.add_nested(
                            nested,
                            &entry.location,
                            conditions.clone(),
                            label,
                            in_use,
                            cursor,
                            container_start,
                        )
                    })?;
                }
                EntryRef::FixedValue {
                    name,
                    size_in_bits,
                    value,
                } => {
                    let bits = self.constant_bits(name, *size_in_bits, value);
                    self.repeated(name, entry, context, inherited, in_use, |r, label| {
                        let item = EntryItem::Constant {
                            name: name.clone(),
                            value: bits.clone(),
                        };
                        let entry_row = ContentEntry::new(item, conditions.clone(), label, in_use);
                        r.add_item_entry(entry_row, &entry.location, cursor, container_start)
                    })?;
                }
                EntryRef::Array(reference)
                | EntryRef::Stream(reference)
                | EntryRef::Indirect(reference) => {
                    self.warn(format!(
                        "entry {reference}: array, stream, and indirect entries are not supported"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Call `add` once per repeat instance with that instance's label.
    ///
    /// Entries not in use are added once and never expanded.
    fn repeated(
        &mut self,
        name: &str,
        entry: &SequenceEntry,
        context: &str,
        inherited: &Inherited<'a>,
        in_use: bool,
        mut add: impl FnMut(&mut Self, String) -> Result<()>,
    ) -> Result<()> {
        let count = if in_use {
            self.repeat_count(name, entry.repeat.as_ref(), context)?
        } else {
            None
        };
        let Some(count) = count else {
            return add(self, inherited.repeat_label.clone());
        };
        for idx in 1..=count {
            let label = if inherited.repeat_label.is_empty() {
                format!("Repeat {idx} of {count}")
            } else {
                format!("{}, Repeat {idx} of {count}", inherited.repeat_label)
            };
            add(self, label)?;
        }
        Ok(())
    }

    /// Add a parameter or argument, followed by its aggregate members.
    #[allow(clippy::too_many_arguments)]
    fn add_item(
        &mut self,
        item: EntryItem<'a>,
        location: &Location,
        conditions: Vec<EntryValue<'a>>,
        repeat_label: String,
        in_use: bool,
        cursor: &mut u64,
        container_start: u64,
    ) -> Result<()> {
        let (EntryItem::Parameter(typed) | EntryItem::Argument(typed)) = item else {
            return Ok(());
        };
        if !typed.item_type().is_aggregate() {
            let mut entry = ContentEntry::new(item, conditions, repeat_label, in_use);
            if in_use {
                let initial = typed.initial_value();
                if let (EntryItem::Argument(_), Some(initial)) = (&entry.item, initial) {
                    entry.value = Some(EntryValue::calibrated(typed, initial));
                }
                self.bind_user_value(&mut entry);
            }
            return self.add_item_entry(entry, location, cursor, container_start);
        }

        let is_argument = matches!(item, EntryItem::Argument(_));
        let parent = ContentEntry::new(item, conditions.clone(), repeat_label.clone(), in_use);
        if in_use {
            self.anchor(typed.name(), location, cursor, container_start);
        }
        trace!(name = typed.name(), in_use, "aggregate");
        self.entries.push(parent);
        if !in_use && !self.options.show_all_conditions {
            return Ok(());
        }
        for member in typed.members() {
            let member_item = if is_argument {
                EntryItem::Argument(member)
            } else {
                EntryItem::Parameter(member)
            };
            self.add_item(
                member_item,
                &Location::default(),
                conditions.clone(),
                repeat_label.clone(),
                in_use,
                cursor,
                container_start,
            )?;
        }
        Ok(())
    }

    /// Position `entry`, decode its bits, and append it.
    fn add_item_entry(
        &mut self,
        mut entry: ContentEntry<'a>,
        location: &Location,
        cursor: &mut u64,
        container_start: u64,
    ) -> Result<()> {
        if entry.in_use {
            match entry.size {
                Some(size) => {
                    let name = entry.label();
                    entry.start =
                        self.add_start_bit(&name, location, size, cursor, container_start);
                }
                None => self.warn(format!(
                    "{}: dynamically sized entries are not supported",
                    entry.label()
                )),
            }
            self.extract(&mut entry)?;
        }
        trace!(
            name = entry.name(),
            kind = %entry.kind(),
            start = ?entry.start,
            size = ?entry.size,
            in_use = entry.in_use,
            "entry"
        );
        self.entries.push(entry);
        Ok(())
    }

    /// Add a nested container row and, unless short-circuited, its content.
    #[allow(clippy::too_many_arguments)]
    fn add_nested(
        &mut self,
        nested: &'a Container,
        location: &Location,
        conditions: Vec<EntryValue<'a>>,
        repeat_label: String,
        in_use: bool,
        cursor: &mut u64,
        container_start: u64,
    ) -> Result<()> {
        let row = ContentEntry::new(
            EntryItem::Container(nested),
            conditions.clone(),
            repeat_label.clone(),
            in_use,
        );
        self.entries.push(row);
        if in_use {
            self.anchor(nested.name(), location, cursor, container_start);
        } else if !self.options.show_all_conditions {
            return Ok(());
        }
        let inherited = Inherited {
            conditions,
            repeat_label,
        };
        let start = *cursor;
        self.container(nested, false, &inherited, cursor, start)
    }

    fn bind_user_value(&self, entry: &mut ContentEntry<'a>) {
        let Some(path) = entry.item().map(Item::path) else {
            return;
        };
        if let Some(value) = self.user_values.iter().find(|v| v.item().path() == path) {
            entry.value = Some(value.clone());
        }
    }

    /// Decode the entry's bits out of the binary buffer, if there is one.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if the entry extends past the buffer.
    pub fn extract(&mut self, entry: &mut ContentEntry<'a>) -> Result<()> {
        let (Some(buf), Some(StartBit::Absolute(start)), Some(size)) =
            (self.binary, entry.start, entry.size)
        else {
            return Ok(());
        };
        let raw = bits::extract(buf, start, size, entry.bit_order()).ok_or_else(|| {
            Error::NotEnoughData {
                item: entry.label(),
                start_bit: start,
                size,
                available: buf.len() as u64 * 8,
            }
        })?;
        match &entry.item {
            EntryItem::Parameter(item) | EntryItem::Argument(item) => {
                let codec = ItemCodec::new(item, self.db.time_handlers());
                let decoded = EntryValue::from_raw(&codec, raw);
                for warning in decoded.warnings {
                    self.warn(warning);
                }
                entry.value = Some(decoded.value);
            }
            EntryItem::Constant { name, value } => {
                if raw != *value {
                    let warning = format!("constant {name} expected {value} but found {raw}");
                    self.valid = false;
                    self.warn(warning);
                }
            }
            EntryItem::Container(_) | EntryItem::Telecommand(_) => {}
        }
        Ok(())
    }

    /// Bits of a fixed value, zero with a warning if `value` does not fit.
    fn constant_bits(&mut self, name: &str, size: u64, value: &str) -> RawBits {
        let value = value.trim();
        let bits = match strip_hex_prefix(value) {
            Some(_) => RawBits::from_hex(value, size as usize),
            None => value
                .parse::<u128>()
                .ok()
                .filter(|v| size >= 128 || v >> size == 0)
                .map(|v| RawBits::from_u128(v, size as usize)),
        };
        bits.unwrap_or_else(|| {
            self.warn(format!("constant {name}: '{value}' does not fit in {size} bits"));
            RawBits::zeros(size as usize)
        })
    }

    /// Order entries by start bit, report overlaps, and build the model.
    pub fn finish(mut self, name: &str, kind: ContentKind) -> ContentModel<'a> {
        for entry in &mut self.entries {
            if matches!(entry.start, Some(StartBit::FromEnd(_))) {
                entry.start = None;
            }
        }
        self.sort_by_start_bit();
        self.detect_overlaps();
        let total_size = self
            .entries
            .iter()
            .filter_map(ContentEntry::end_bit)
            .max()
            .unwrap_or(0);
        debug!(
            definition = name,
            %kind,
            entries = self.entries.len(),
            total_size,
            valid = self.valid,
            warnings = self.warnings.len(),
            "resolved content"
        );
        ContentModel {
            name: name.to_string(),
            entries: self.entries,
            warnings: self.warnings,
            total_size,
            valid: self.valid,
            handlers: self.db.time_handlers(),
        }
    }

    /// Stable sort by start bit. Entries without a start bit stay immediately before
    /// the next entry that has one, or at the end if none follows.
    fn sort_by_start_bit(&mut self) {
        let mut anchor = (u64::MAX, usize::MAX);
        let mut keys = vec![(0u64, 0usize, false, 0usize); self.entries.len()];
        for idx in (0..self.entries.len()).rev() {
            match self.entries[idx].start_bit() {
                Some(start) => {
                    anchor = (start, idx);
                    keys[idx] = (start, idx, true, idx);
                }
                None => keys[idx] = (anchor.0, anchor.1, false, idx),
            }
        }
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|idx| keys[*idx]);
        let mut entries: Vec<Option<ContentEntry<'a>>> =
            std::mem::take(&mut self.entries).into_iter().map(Some).collect();
        self.entries = order
            .into_iter()
            .filter_map(|idx| entries[idx].take())
            .collect();
    }

    /// Warn about every pair of in use entries claiming a common bit.
    fn detect_overlaps(&mut self) {
        let mut spans: Vec<(u64, u64, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| match (e.start_bit(), e.end_bit()) {
                (Some(start), Some(end)) if end > start => Some((start, end, idx)),
                _ => None,
            })
            .collect();
        spans.sort_by_key(|(start, end, idx)| (*start, Reverse(*end), *idx));

        let mut overlaps = Vec::new();
        let mut active: Vec<(u64, u64, usize)> = Vec::new();
        for (start, end, idx) in spans {
            active.retain(|(_, active_end, _)| *active_end > start);
            for (other_start, other_end, other) in &active {
                let first = start.max(*other_start);
                let last = end.min(*other_end) - 1;
                overlaps.push(format!(
                    "{} overlaps {} at bits {first}-{last}",
                    self.entries[idx].label(),
                    self.entries[*other].label()
                ));
            }
            active.push((start, end, idx));
        }
        for overlap in overlaps {
            self.warn(overlap);
        }
    }
}
