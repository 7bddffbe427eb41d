//! Container and telecommand content models.
//!
//! A content model is the flattened, bit-positioned layout of one container or
//! telecommand: base chains are inlined, include conditions evaluated, repeats expanded,
//! and aggregate members listed after their parent. Values bound from restrictions,
//! caller supplied assignments, or a decoded buffer travel with each entry.
//!
//! Models are computed fresh for every call, see [ContainerProcessor] and
//! [TelecommandProcessor].
mod container;
mod resolver;
mod telecommand;

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

pub use container::ContainerProcessor;
pub use telecommand::TelecommandProcessor;

use crate::bits::{self, RawBits};
use crate::codec::{Converted, ItemCodec};
use crate::entry_value::{EntryValue, Operator, ValueForm};
use crate::model::{BitOrder, Container, Item, Telecommand};
use crate::time::TimeHandlers;
use crate::Result;

/// Resolution switches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ResolverOptions {
    /// Also expand members and nested content of entries whose include conditions are
    /// not satisfied. Such entries are listed but never positioned.
    #[builder(default)]
    #[serde(default)]
    pub show_all_conditions: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Parameter,
    Argument,
    Container,
    Constant,
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parameter => "parameter",
            Self::Argument => "argument",
            Self::Container => "container",
            Self::Constant => "constant",
        };
        write!(f, "{s}")
    }
}

/// What a [ContentEntry] stands for.
#[derive(Clone, Debug)]
pub(crate) enum EntryItem<'a> {
    Parameter(&'a Item),
    Argument(&'a Item),
    Container(&'a Container),
    Telecommand(&'a Telecommand),
    Constant { name: String, value: RawBits },
}

/// Start bit of an entry while its container is being resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StartBit {
    Absolute(u64),
    /// Offset back from the end of the declaring container, not known until the
    /// container is complete.
    FromEnd(i64),
}

/// One row of a resolved layout.
///
/// Cloning is cheap: items and definitions are shared references into the
/// [Database](crate::model::Database).
#[derive(Clone, Debug)]
pub struct ContentEntry<'a> {
    pub(crate) item: EntryItem<'a>,
    pub(crate) start: Option<StartBit>,
    pub(crate) size: Option<u64>,
    pub(crate) value: Option<EntryValue<'a>>,
    pub(crate) conditions: Vec<EntryValue<'a>>,
    pub(crate) repeat_label: String,
    pub(crate) in_use: bool,
}

impl<'a> ContentEntry<'a> {
    pub(crate) fn new(
        item: EntryItem<'a>,
        conditions: Vec<EntryValue<'a>>,
        repeat_label: String,
        in_use: bool,
    ) -> Self {
        let size = match &item {
            EntryItem::Parameter(i) | EntryItem::Argument(i) => i.item_type().size_in_bits,
            EntryItem::Constant { value, .. } => Some(value.len() as u64),
            EntryItem::Container(_) | EntryItem::Telecommand(_) => None,
        };
        Self {
            item,
            start: None,
            size,
            value: None,
            conditions,
            repeat_label,
            in_use,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ContentKind {
        match self.item {
            EntryItem::Parameter(_) => ContentKind::Parameter,
            EntryItem::Argument(_) => ContentKind::Argument,
            EntryItem::Container(_) | EntryItem::Telecommand(_) => ContentKind::Container,
            EntryItem::Constant { .. } => ContentKind::Constant,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match &self.item {
            EntryItem::Parameter(i) | EntryItem::Argument(i) => i.name(),
            EntryItem::Container(c) => c.name(),
            EntryItem::Telecommand(t) => t.name(),
            EntryItem::Constant { name, .. } => name,
        }
    }

    /// Full path of the referenced definition; constants have none.
    #[must_use]
    pub fn path(&self) -> Option<&'a str> {
        match self.item {
            EntryItem::Parameter(i) | EntryItem::Argument(i) => Some(i.path()),
            EntryItem::Container(c) => Some(c.path()),
            EntryItem::Telecommand(t) => Some(t.path()),
            EntryItem::Constant { .. } => None,
        }
    }

    /// The parameter or argument this entry places.
    #[must_use]
    pub fn item(&self) -> Option<&'a Item> {
        match self.item {
            EntryItem::Parameter(i) | EntryItem::Argument(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn container(&self) -> Option<&'a Container> {
        match self.item {
            EntryItem::Container(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn telecommand(&self) -> Option<&'a Telecommand> {
        match self.item {
            EntryItem::Telecommand(t) => Some(t),
            _ => None,
        }
    }

    /// Bits of a constant entry.
    #[must_use]
    pub fn constant_value(&self) -> Option<&RawBits> {
        match &self.item {
            EntryItem::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Resolved start bit, `None` for structural rows, entries not in use, and entries
    /// that could not be placed.
    #[must_use]
    pub fn start_bit(&self) -> Option<u64> {
        match self.start {
            Some(StartBit::Absolute(bit)) => Some(bit),
            _ => None,
        }
    }

    /// Size of data bearing entries; `None` for containers and aggregates.
    #[must_use]
    pub fn size_in_bits(&self) -> Option<u64> {
        self.size
    }

    #[must_use]
    pub fn value(&self) -> Option<&EntryValue<'a>> {
        self.value.as_ref()
    }

    /// Include conditions, inherited ones first.
    #[must_use]
    pub fn conditions(&self) -> &[EntryValue<'a>] {
        &self.conditions
    }

    /// `Repeat i of N` for repeated entries, otherwise empty.
    #[must_use]
    pub fn repeat_label(&self) -> &str {
        &self.repeat_label
    }

    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// First bit after this entry, if it occupies any.
    pub(crate) fn end_bit(&self) -> Option<u64> {
        match (self.start_bit(), self.size) {
            (Some(start), Some(size)) if self.in_use => Some(start + size),
            _ => None,
        }
    }

    pub(crate) fn bit_order(&self) -> BitOrder {
        match self.item {
            EntryItem::Parameter(i) | EntryItem::Argument(i) => i.item_type().bit_order,
            _ => BitOrder::default(),
        }
    }

    /// Name qualified with the repeat label, for diagnostics.
    pub(crate) fn label(&self) -> String {
        if self.repeat_label.is_empty() {
            self.name().to_string()
        } else {
            format!("{} ({})", self.name(), self.repeat_label)
        }
    }
}

/// Serializable view of one [ContentEntry].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRow {
    pub name: String,
    pub path: Option<String>,
    pub kind: ContentKind,
    pub start_bit: Option<u64>,
    pub size_in_bits: Option<u64>,
    /// Calibrated value, or the hex bits of a constant.
    pub value: Option<String>,
    pub uncalibrated_value: Option<String>,
    pub raw_value: Option<String>,
    pub repeat_label: String,
    pub in_use: bool,
    pub conditions: Vec<String>,
}

impl From<&ContentEntry<'_>> for ContentRow {
    fn from(entry: &ContentEntry<'_>) -> Self {
        let value = match (&entry.value, entry.constant_value()) {
            (Some(v), _) => Some(v.value().to_string()),
            (None, Some(bits)) => Some(bits.to_hex()),
            (None, None) => None,
        };
        Self {
            name: entry.name().to_string(),
            path: entry.path().map(str::to_string),
            kind: entry.kind(),
            start_bit: entry.start_bit(),
            size_in_bits: entry.size_in_bits(),
            value,
            uncalibrated_value: entry
                .value
                .as_ref()
                .and_then(|v| v.uncalibrated_value())
                .map(str::to_string),
            raw_value: entry
                .value
                .as_ref()
                .and_then(|v| v.raw_value())
                .map(RawBits::to_hex),
            repeat_label: entry.repeat_label.clone(),
            in_use: entry.in_use,
            conditions: entry.conditions.iter().map(ToString::to_string).collect(),
        }
    }
}

/// The resolved layout of one container or telecommand.
#[derive(Clone, Debug)]
pub struct ContentModel<'a> {
    pub(crate) name: String,
    pub(crate) entries: Vec<ContentEntry<'a>>,
    pub(crate) warnings: Vec<String>,
    pub(crate) total_size: u64,
    pub(crate) valid: bool,
    pub(crate) handlers: &'a TimeHandlers,
}

impl<'a> ContentModel<'a> {
    /// Name of the container or telecommand that was processed.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entries ordered by start bit; entries without one sit just before the next
    /// positioned entry.
    #[must_use]
    pub fn entries(&self) -> &[ContentEntry<'a>] {
        &self.entries
    }

    /// Entries placing the item, container, or constant called `name`, in order.
    pub fn find<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s ContentEntry<'a>> + 's {
        self.entries.iter().filter(move |e| e.name() == name)
    }

    /// Values bound to entries, in entry order.
    pub fn values(&self) -> impl Iterator<Item = &EntryValue<'a>> {
        self.entries.iter().filter_map(|e| e.value.as_ref())
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Bits covered by positioned entries, i.e., the highest end bit.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// False if a bound value contradicted a restriction or constant.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Pack every positioned entry into a buffer of [Self::total_size] bits.
    ///
    /// Decoded entries contribute their raw bits, other values are encoded through the
    /// item codec. Entries without a usable value are left zero and reported.
    #[must_use]
    pub fn encode(&self) -> Converted<Vec<u8>> {
        let mut buf = vec![0u8; self.total_size.div_ceil(8) as usize];
        let mut warnings = Vec::new();
        for entry in &self.entries {
            let (Some(start), Some(_)) = (entry.start_bit(), entry.size) else {
                continue;
            };
            if !entry.in_use {
                continue;
            }
            let bits = match (&entry.item, &entry.value) {
                (EntryItem::Constant { value, .. }, _) => value.clone(),
                (EntryItem::Parameter(item) | EntryItem::Argument(item), Some(value)) => {
                    if value.operator() != Operator::Eq {
                        warnings.push(format!("{}: cannot encode {value}", entry.label()));
                        continue;
                    }
                    match value.raw_value() {
                        Some(raw) => raw.clone(),
                        None => {
                            let codec = ItemCodec::new(item, self.handlers);
                            let bits = match value.form() {
                                ValueForm::Uncalibrated => {
                                    codec.raw_from_uncalibrated(value.value())
                                }
                                _ => codec.encode(value.value()),
                            };
                            bits.collect_into(&mut warnings)
                        }
                    }
                }
                (EntryItem::Parameter(_) | EntryItem::Argument(_), None) => {
                    warnings.push(format!("{} has no value, encoded as zero", entry.label()));
                    continue;
                }
                _ => continue,
            };
            if !bits::insert(&mut buf, start, &bits, entry.bit_order()) {
                warnings.push(format!(
                    "{} does not fit at bit {start} of a {} bit buffer",
                    entry.label(),
                    self.total_size
                ));
            }
        }
        Converted {
            value: buf,
            warnings,
        }
    }

    #[must_use]
    pub fn rows(&self) -> Vec<ContentRow> {
        self.entries.iter().map(ContentRow::from).collect()
    }

    /// Rows as pretty printed JSON.
    ///
    /// # Errors
    /// [crate::Error::Json] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rows())?)
    }
}

impl Display for ContentModel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({} bits{})",
            self.name,
            self.total_size,
            if self.valid { "" } else { ", invalid" }
        )?;
        writeln!(
            f,
            "{:>6} {:>5} {:<10} {:<32} {:<24} {}",
            "start", "size", "kind", "name", "value", "repeat"
        )?;
        for row in self.rows() {
            let opt = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
            let name = if row.in_use {
                row.name
            } else {
                format!("({})", row.name)
            };
            writeln!(
                f,
                "{:>6} {:>5} {:<10} {:<32} {:<24} {}",
                opt(row.start_bit),
                opt(row.size_in_bits),
                row.kind.to_string(),
                name,
                row.value.unwrap_or_default(),
                row.repeat_label
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}
