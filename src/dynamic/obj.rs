use indexmap::IndexMap;

use super::Evidence;

#[derive(Clone, Debug, Default)]
pub struct ObjE {
    /// First-seen key order.
    pub fields: IndexMap<String, FieldE>,
    pub seen: u64,
}

#[derive(Clone, Debug, Default)]
pub struct FieldE {
    pub ev: Evidence,
    pub present_in: u64,
}

impl ObjE {
    /// A field absent from some objects is optional.
    pub fn is_optional(&self, field: &FieldE) -> bool {
        field.present_in < self.seen || field.ev.nullable
    }

    pub(super) fn join(a: &Self, b: &Self) -> Self {
        let mut out = ObjE { fields: IndexMap::with_capacity(a.fields.len()), seen: a.seen + b.seen };

        // keys from a, merged with b where shared
        for (k, fa) in &a.fields {
            let merged = match b.fields.get(k) {
                None => fa.clone(),
                Some(fb) => FieldE {
                    ev: Evidence::join(&fa.ev, &fb.ev),
                    present_in: fa.present_in + fb.present_in,
                },
            };
            out.fields.insert(k.clone(), merged);
        }
        // keys only in b
        for (k, fb) in &b.fields {
            if !out.fields.contains_key(k) {
                out.fields.insert(k.clone(), fb.clone());
            }
        }

        out
    }
}
