//! Interned field layouts
//!
//! A layout is the sorted, de-duplicated list of fields making up a key or
//! a counter, with each field's offset in the packed row. Layouts are
//! interned process-wide so two bags built from the same fields share one
//! [`Arc<Layout>`] and compatibility is a pointer comparison.

use super::fields::{AggBagFieldType, FieldClass};
use crate::{Result, SilkError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::trace;

/// One field of a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutField {
    pub field_type: AggBagFieldType,
    pub offset: usize,
    pub octets: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Layout {
    class: FieldClass,
    fields: Vec<LayoutField>,
    octets: usize,
}

impl Layout {
    pub fn class(&self) -> FieldClass {
        self.class
    }

    /// Fields in ascending id order
    pub fn fields(&self) -> &[LayoutField] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Width of a packed row of this layout
    pub fn octets(&self) -> usize {
        self.octets
    }

    /// Position of `field_type` in [`Layout::fields`]
    pub fn position(&self, field_type: AggBagFieldType) -> Option<usize> {
        self.fields.iter().position(|f| f.field_type == field_type)
    }

    pub(crate) fn field(&self, pos: usize) -> Result<&LayoutField> {
        self.fields.get(pos).ok_or(SilkError::BadIndex(pos))
    }
}

static LAYOUTS: Mutex<Option<HashMap<Vec<u16>, Weak<Layout>>>> = parking_lot::const_mutex(None);

impl Drop for Layout {
    /// Drop the intern table's entry, and the table once it is empty
    fn drop(&mut self) {
        let ids: Vec<u16> = self.fields.iter().map(|f| f.field_type.0).collect();
        let mut guard = LAYOUTS.lock();
        let Some(table) = guard.as_mut() else { return };
        // the same fields may have been interned again since the last Arc went
        if table.get(&ids).is_some_and(|weak| weak.strong_count() == 0) {
            table.remove(&ids);
        }
        if table.is_empty() {
            *guard = None;
        }
    }
}

/// Shared layout for `fields`, which must all belong to `class`.
///
/// Order and repeats in `fields` do not matter.
pub fn intern(class: FieldClass, fields: &[AggBagFieldType]) -> Result<Arc<Layout>> {
    if fields.is_empty() {
        return Err(SilkError::InvalidInput("layout has no fields".into()));
    }
    for f in fields {
        if f.class() != Some(class) {
            return Err(SilkError::FieldClass(f.0));
        }
    }
    let mut ids: Vec<u16> = fields.iter().map(|f| f.0).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut guard = LAYOUTS.lock();
    let table = guard.get_or_insert_with(HashMap::new);
    if let Some(found) = table.get(&ids).and_then(Weak::upgrade) {
        return Ok(found);
    }

    let mut offset = 0;
    let mut layout_fields = Vec::with_capacity(ids.len());
    for &id in &ids {
        let field_type = AggBagFieldType(id);
        let octets = field_type.octets().ok_or(SilkError::FieldClass(id))?;
        layout_fields.push(LayoutField {
            field_type,
            offset,
            octets,
        });
        offset += octets;
    }
    let layout = Arc::new(Layout {
        class,
        fields: layout_fields,
        octets: offset,
    });

    table.retain(|_, weak| weak.strong_count() > 0);
    table.insert(ids, Arc::downgrade(&layout));
    trace!("Interned layout of {} fields, {} octets", layout.field_count(), offset);
    Ok(layout)
}

/// Forget every interned layout; layouts still in use stay valid but are
/// no longer shared with layouts created afterwards.
///
/// Entries are otherwise released as their last bag drops them.
pub fn teardown() {
    *LAYOUTS.lock() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use AggBagFieldType as F;

    #[test]
    fn test_layout_is_sorted_and_deduplicated() {
        let layout = intern(FieldClass::Key, &[F::DPORT, F::SIPV4, F::DPORT]).unwrap();
        let shown: Vec<_> = layout
            .fields()
            .iter()
            .map(|f| (f.field_type, f.offset, f.octets))
            .collect();
        assert_eq!(shown, vec![(F::SIPV4, 0, 4), (F::DPORT, 4, 2)]);
        assert_eq!(layout.octets(), 6);
        assert_eq!(layout.position(F::DPORT), Some(1));
    }

    #[test]
    fn test_same_fields_share_one_layout() {
        let a = intern(FieldClass::Key, &[F::PROTO, F::SIPV6]).unwrap();
        let b = intern(FieldClass::Key, &[F::SIPV6, F::PROTO]).unwrap();
        let c = intern(FieldClass::Key, &[F::SIPV6]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    fn is_interned(fields: &[AggBagFieldType]) -> bool {
        let ids: Vec<u16> = fields.iter().map(|f| f.0).collect();
        LAYOUTS
            .lock()
            .as_ref()
            .is_some_and(|table| table.contains_key(&ids))
    }

    #[test]
    fn test_last_drop_releases_entry() {
        let fields = [F::ICMP_TYPE, F::ICMP_CODE, F::NHIPV6];
        let a = intern(FieldClass::Key, &fields).unwrap();
        let b = intern(FieldClass::Key, &fields).unwrap();
        assert!(is_interned(&fields));

        drop(a);
        assert!(is_interned(&fields));
        drop(b);
        assert!(!is_interned(&fields));

        let again = intern(FieldClass::Key, &fields).unwrap();
        assert_eq!(again.octets(), 18);
        assert!(is_interned(&fields));
    }

    #[test]
    fn test_class_is_enforced() {
        assert!(matches!(
            intern(FieldClass::Counter, &[F::RECORDS, F::SPORT]),
            Err(SilkError::FieldClass(2))
        ));
        assert!(matches!(
            intern(FieldClass::Key, &[F(22)]),
            Err(SilkError::FieldClass(22))
        ));
        assert!(intern(FieldClass::Key, &[]).is_err());
    }
}
