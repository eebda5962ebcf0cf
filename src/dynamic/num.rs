use serde_json::Number;

/// What the numbers seen in one slot looked like.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumE {
    pub saw_int: bool,
    pub saw_float: bool,
    /// An unsigned integer beyond `i64::MAX`; no Avro primitive holds it.
    pub saw_overflow: bool,
}

impl NumE {
    pub(super) fn observe(n: &Number) -> Self {
        if n.is_i64() {
            NumE { saw_int: true, ..NumE::default() }
        } else if n.is_u64() {
            NumE { saw_overflow: true, ..NumE::default() }
        } else {
            NumE { saw_float: true, ..NumE::default() }
        }
    }

    pub(super) fn join(a: &Self, b: &Self) -> Self {
        NumE {
            saw_int: a.saw_int || b.saw_int,
            saw_float: a.saw_float || b.saw_float,
            saw_overflow: a.saw_overflow || b.saw_overflow,
        }
    }
}
