//! Values bound to items: restrictions, include conditions, user assignments, and
//! values decoded from binary.
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bits::RawBits;
use crate::codec::{Converted, ItemCodec};
use crate::model::Item;
use crate::time::TimeHandlers;

/// Comparison operator. Only [Operator::Eq] and [Operator::Ne] take part in
/// compatibility checks, anything else is never compatible.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[default]
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Operator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" | "=" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

/// Which representation an [EntryValue]'s value is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueForm {
    Calibrated,
    Uncalibrated,
    /// Decoded from binary; all three representations are available.
    Raw,
}

impl ValueForm {
    fn tag(self) -> &'static str {
        match self {
            Self::Calibrated => "cal",
            Self::Uncalibrated => "uncal",
            Self::Raw => "raw",
        }
    }
}

/// A value bound to a specific item with a comparison operator.
///
/// Values are immutable once built. Values decoded from binary carry the raw bits along
/// with the uncalibrated and calibrated values derived from them.
#[derive(Clone, Debug)]
pub struct EntryValue<'a> {
    item: &'a Item,
    operator: Operator,
    form: ValueForm,
    value: String,
    raw: Option<RawBits>,
    uncalibrated: Option<String>,
}

impl<'a> EntryValue<'a> {
    pub fn new(
        item: &'a Item,
        operator: Operator,
        value: impl Into<String>,
        form: ValueForm,
    ) -> Self {
        let value = value.into();
        let uncalibrated = match form {
            ValueForm::Uncalibrated => Some(value.clone()),
            _ => None,
        };
        Self {
            item,
            operator,
            form,
            value,
            raw: None,
            uncalibrated,
        }
    }

    /// `item == value` in calibrated form.
    pub fn calibrated(item: &'a Item, value: impl Into<String>) -> Self {
        Self::new(item, Operator::Eq, value, ValueForm::Calibrated)
    }

    /// `item == value` in uncalibrated form.
    pub fn uncalibrated(item: &'a Item, value: impl Into<String>) -> Self {
        Self::new(item, Operator::Eq, value, ValueForm::Uncalibrated)
    }

    /// Bind bits decoded from binary, deriving the uncalibrated and calibrated values.
    ///
    /// Warnings from either conversion are passed along; a value derived with warnings
    /// is empty and should not be trusted.
    #[must_use]
    pub fn from_raw(codec: &ItemCodec<'a>, raw: RawBits) -> Converted<Self> {
        let uncal = codec.uncalibrated_from_raw(&raw);
        let (uncal, mut warnings) = (uncal.value, uncal.warnings);
        let cal = if warnings.is_empty() {
            let cal = codec.calibrated_from_uncalibrated(&uncal);
            warnings.extend(cal.warnings);
            cal.value
        } else {
            String::new()
        };
        Converted {
            value: Self {
                item: codec.item(),
                operator: Operator::Eq,
                form: ValueForm::Raw,
                value: cal,
                raw: Some(raw),
                uncalibrated: Some(uncal),
            },
            warnings,
        }
    }

    #[must_use]
    pub fn item(&self) -> &'a Item {
        self.item
    }

    #[must_use]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    #[must_use]
    pub fn form(&self) -> ValueForm {
        self.form
    }

    /// The value in this value's [ValueForm]. Raw values report their calibrated value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn raw_value(&self) -> Option<&RawBits> {
        self.raw.as_ref()
    }

    #[must_use]
    pub fn calibrated_value(&self) -> Option<&str> {
        match self.form {
            ValueForm::Calibrated | ValueForm::Raw => Some(&self.value),
            ValueForm::Uncalibrated => None,
        }
    }

    #[must_use]
    pub fn uncalibrated_value(&self) -> Option<&str> {
        self.uncalibrated.as_deref()
    }

    /// True if both values refer to the same item and do not contradict each other.
    ///
    /// When the forms differ the uncalibrated side is calibrated first. Only `==` and `!=`
    /// are understood; any other operator is reported as incompatible.
    #[must_use]
    pub fn is_compatible_with(&self, other: &EntryValue, handlers: &TimeHandlers) -> bool {
        if self.item.path() != other.item.path() {
            return false;
        }
        let (a, b) = if self.form == other.form {
            (Some(self.value.clone()), Some(other.value.clone()))
        } else {
            (self.calibrated_with(handlers), other.calibrated_with(handlers))
        };
        let (Some(a), Some(b)) = (a, b) else {
            return false;
        };
        match (self.operator, other.operator) {
            (Operator::Eq, Operator::Eq) => values_equal(&a, &b),
            (Operator::Eq, Operator::Ne) | (Operator::Ne, Operator::Eq) => !values_equal(&a, &b),
            (Operator::Ne, Operator::Ne) => true,
            _ => false,
        }
    }

    /// The calibrated value, calibrating an uncalibrated value through the item codec.
    /// `None` if calibration produces warnings.
    #[must_use]
    pub fn calibrated_with(&self, handlers: &TimeHandlers) -> Option<String> {
        match self.form {
            ValueForm::Calibrated | ValueForm::Raw => Some(self.value.clone()),
            ValueForm::Uncalibrated => {
                let cal =
                    ItemCodec::new(self.item, handlers).calibrated_from_uncalibrated(&self.value);
                cal.is_clean().then_some(cal.value)
            }
        }
    }
}

fn values_equal(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

impl PartialEq for EntryValue<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.item.path() == other.item.path()
            && self.operator == other.operator
            && self.form == other.form
            && self.value == other.value
    }
}

impl Eq for EntryValue<'_> {}

impl Hash for EntryValue<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.item.path().hash(state);
        self.operator.hash(state);
        self.form.hash(state);
        self.value.hash(state);
    }
}

impl Display for EntryValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{{{}}}",
            self.item.name(),
            self.operator,
            self.value,
            self.form.tag()
        )
    }
}
