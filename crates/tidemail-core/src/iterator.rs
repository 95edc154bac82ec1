//! Display-order iteration over uid lists
//!
//! Uid lists are kept in backend order, oldest first. The default policy
//! displays them newest first, so iteration starts at the end of the list;
//! the reverse policy iterates from the front.

/// Bounds policy applied after moving an index
pub type BoundsCheck = fn(i64, i64, i64) -> i64;

/// Clamp the index to the list
pub fn fix_bounds(i: i64, lower: i64, upper: i64) -> i64 {
    i.clamp(lower, upper)
}

/// Wrap the index around the list
pub fn wrap_bounds(i: i64, lower: i64, upper: i64) -> i64 {
    let span = upper - lower + 1;
    if i > upper {
        lower + (i - upper - 1) % span
    } else if i < lower {
        upper - (lower - i - 1) % span
    } else {
        i
    }
}

/// Creates iterators with a fixed direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterFactory {
    reverse: bool,
}

impl IterFactory {
    pub fn new(reverse: bool) -> Self {
        Self { reverse }
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn iter<'a, T>(&self, data: &'a [T]) -> DisplayIter<'a, T> {
        DisplayIter {
            data,
            reverse: self.reverse,
            front: 0,
            back: data.len(),
        }
    }

    /// Storage indices of display rows `offset..offset + len`
    pub fn visible_range(&self, total: usize, offset: usize, len: usize) -> std::ops::Range<usize> {
        let start = offset.min(total);
        let end = offset.saturating_add(len).min(total);
        if self.reverse {
            start..end
        } else {
            (total - end)..(total - start)
        }
    }
}

/// Iterator yielding items in display order
#[derive(Debug, Clone)]
pub struct DisplayIter<'a, T> {
    data: &'a [T],
    reverse: bool,
    front: usize,
    back: usize,
}

impl<'a, T> DisplayIter<'a, T> {
    /// Storage index of the first displayed item
    pub fn start_index(&self) -> usize {
        if self.reverse {
            0
        } else {
            self.data.len().saturating_sub(1)
        }
    }

    /// Storage index of the last displayed item
    pub fn end_index(&self) -> usize {
        if self.reverse {
            self.data.len().saturating_sub(1)
        } else {
            0
        }
    }
}

impl<'a, T> Iterator for DisplayIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.front >= self.back {
            return None;
        }
        if self.reverse {
            self.front += 1;
            self.data.get(self.front - 1)
        } else {
            self.back -= 1;
            self.data.get(self.back)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl<T> ExactSizeIterator for DisplayIter<'_, T> {}

/// Move a storage index by `delta` display rows.
///
/// A positive delta moves toward the end of the display order.
pub fn move_index<T>(idx: usize, delta: i64, iter: &DisplayIter<'_, T>, bounds: BoundsCheck) -> usize {
    let (mut lower, mut upper) = (iter.start_index() as i64, iter.end_index() as i64);
    let mut sign = 1;
    if upper < lower {
        std::mem::swap(&mut lower, &mut upper);
        sign = -1;
    }
    bounds(idx as i64 + sign * delta, lower, upper).max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order_is_newest_first() {
        let uids = [1u32, 2, 3, 4];
        let factory = IterFactory::new(false);
        let shown: Vec<u32> = factory.iter(&uids).copied().collect();
        assert_eq!(shown, vec![4, 3, 2, 1]);

        let iter = factory.iter(&uids);
        assert_eq!(iter.start_index(), 3);
        assert_eq!(iter.end_index(), 0);

        let reversed: Vec<u32> = IterFactory::new(true).iter(&uids).copied().collect();
        assert_eq!(reversed, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_move_index_clamps() {
        let uids = [10u32, 20, 30, 40, 50];
        let iter = IterFactory::new(false).iter(&uids);
        // Next row in display order is one storage slot down
        assert_eq!(move_index(4, 1, &iter, fix_bounds), 3);
        assert_eq!(move_index(1, 3, &iter, fix_bounds), 0);
        assert_eq!(move_index(3, -5, &iter, fix_bounds), 4);

        let iter = IterFactory::new(true).iter(&uids);
        assert_eq!(move_index(0, 2, &iter, fix_bounds), 2);
        assert_eq!(move_index(4, 1, &iter, fix_bounds), 4);
    }

    #[test]
    fn test_move_index_wraps() {
        let results = [7u32, 8, 9];
        let iter = IterFactory::new(true).iter(&results);
        assert_eq!(move_index(2, 1, &iter, wrap_bounds), 0);
        assert_eq!(move_index(0, -1, &iter, wrap_bounds), 2);
        assert_eq!(move_index(1, 4, &iter, wrap_bounds), 2);
    }

    #[test]
    fn test_visible_range() {
        let factory = IterFactory::new(false);
        // Top two rows of a ten item list are its last two entries
        assert_eq!(factory.visible_range(10, 0, 2), 8..10);
        assert_eq!(factory.visible_range(3, 0, 25), 0..3);
        assert_eq!(IterFactory::new(true).visible_range(10, 2, 3), 2..5);
    }
}
