//! K-way merge of ascending sources.

use crate::errors::GeIndexResult;

/// A cursor over an ascending sequence.
///
/// `current` is the value the cursor points at; `None` once exhausted.
pub trait MergeSource {
    type Item: Ord;

    fn current(&self) -> Option<&Self::Item>;

    fn advance(&mut self) -> GeIndexResult<()>;
}

impl<S: MergeSource + ?Sized> MergeSource for Box<S> {
    type Item = S::Item;

    fn current(&self) -> Option<&Self::Item> {
        (**self).current()
    }

    fn advance(&mut self) -> GeIndexResult<()> {
        (**self).advance()
    }
}

/// Merges several ascending sources into one ascending sequence.
///
/// The current value is the smallest current value over all sources; on
/// ties the source added first wins, and only that source advances, so
/// equal values from different sources are all yielded in source order.
pub struct Merge<T: Ord> {
    sources: Vec<Box<dyn MergeSource<Item = T> + Send>>,
    current: Option<usize>,
}

impl<T: Ord> Merge<T> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            current: None,
        }
    }

    /// Adds a source. Exhausted sources are dropped right away.
    pub fn add_source(&mut self, source: Box<dyn MergeSource<Item = T> + Send>) {
        if source.current().is_some() {
            self.sources.push(source);
            self.select();
        }
    }

    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    fn select(&mut self) {
        self.current = self
            .sources
            .iter()
            .enumerate()
            .filter_map(|(i, source)| source.current().map(|value| (i, value)))
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i);
    }
}

impl<T: Ord> Default for Merge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> MergeSource for Merge<T> {
    type Item = T;

    fn current(&self) -> Option<&T> {
        self.current
            .and_then(|i| self.sources.get(i))
            .and_then(|source| source.current())
    }

    fn advance(&mut self) -> GeIndexResult<()> {
        let Some(i) = self.current else {
            return Ok(());
        };
        self.sources[i].advance()?;
        if self.sources[i].current().is_none() {
            self.sources.remove(i);
        }
        self.select();
        Ok(())
    }
}

/// Cursor over an in-memory ascending vector.
pub struct VecSource<T> {
    items: std::vec::IntoIter<T>,
    current: Option<T>,
}

impl<T: Ord> VecSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        debug_assert!(items.windows(2).all(|w| w[0] <= w[1]));
        let mut items = items.into_iter();
        let current = items.next();
        Self { items, current }
    }
}

impl<T: Ord> MergeSource for VecSource<T> {
    type Item = T;

    fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> GeIndexResult<()> {
        self.current = self.items.next();
        Ok(())
    }
}

/// Drains `source` into a vector.
pub fn collect<S: MergeSource>(source: &mut S) -> GeIndexResult<Vec<S::Item>>
where
    S::Item: Clone,
{
    let mut out = Vec::new();
    while let Some(value) = source.current() {
        out.push(value.clone());
        source.advance()?;
    }
    Ok(out)
}
