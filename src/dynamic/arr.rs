use super::Evidence;

#[derive(Clone, Debug, Default)]
pub struct ArrE {
    /// Join of every element ever observed in this slot.
    pub item: Box<Evidence>,
    pub samples: u64,
}

impl ArrE {
    pub(super) fn join(a: &Self, b: &Self) -> Self {
        ArrE {
            item: Box::new(Evidence::join(&a.item, &b.item)),
            samples: a.samples + b.samples,
        }
    }
}
