//! The contract every value flowing between nodes satisfies.

use std::collections::BTreeMap;

/// A data item exchanged between nodes.
///
/// Items are plain values. The adapter calls [`Item::freeze`] exactly once when
/// the producer emits the item, and [`Item::copy_to`] when the same item has to
/// reach more than one consumer: the first consumer gets the original, every
/// other consumer gets a pooled instance filled by `copy_to`.
///
/// `Default` is required so the object pool can pre-allocate instances.
pub trait Item: Default + Send + 'static {
    /// Mark the item read-only. Irreversible.
    fn freeze(&mut self);

    /// Whether [`Item::freeze`] has been called
    fn is_frozen(&self) -> bool;

    /// Overwrite `target` with this item's field values
    fn copy_to(&self, target: &mut Self);

    /// Return to the freshly allocated, unfrozen state before going back to a pool
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A general purpose record of named string columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: BTreeMap<String, String>,
    frozen: bool,
}

impl Row {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column setter
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column value. Panics if the row has been frozen.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        assert!(!self.frozen, "attempted to mutate a frozen row");
        self.columns.insert(column.into(), value.into());
    }

    /// Replace all columns from parallel header/field slices
    pub fn load<S: AsRef<str>>(&mut self, headers: &[S], fields: &[S]) {
        assert!(!self.frozen, "attempted to mutate a frozen row");
        self.columns.clear();
        for (header, field) in headers.iter().zip(fields) {
            self.columns
                .insert(header.as_ref().to_owned(), field.as_ref().to_owned());
        }
    }

    /// Value of `column`, if set
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column name/value pairs in name order
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Item for Row {
    fn freeze(&mut self) {
        self.frozen = true;
    }

    fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn copy_to(&self, target: &mut Self) {
        target.columns.clone_from(&self.columns);
        target.frozen = self.frozen;
    }

    fn reset(&mut self) {
        self.columns.clear();
        self.frozen = false;
    }
}
