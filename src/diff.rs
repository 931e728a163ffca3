/// Result of comparing a previous list against a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    /// In `next` but not in `previous`, in the order of `next`.
    pub added: Vec<T>,
    /// In `previous` but not in `next`, in the order of `previous`.
    pub removed: Vec<T>,
    /// In both, in the order of `previous`.
    pub same: Vec<T>,
}

/// Computes which elements were added, removed or kept between `previous` and `next`. Elements are compared by value.
pub fn diff<T: PartialEq + Clone>(previous: &[T], next: &[T]) -> Diff<T> {
    Diff {
        added: next.iter().filter(|it| !previous.contains(it)).cloned().collect(),
        removed: previous.iter().filter(|it| !next.contains(it)).cloned().collect(),
        same: previous.iter().filter(|it| next.contains(it)).cloned().collect(),
    }
}
