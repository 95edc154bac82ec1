//! Marked messages for bulk commands

use std::collections::HashSet;

/// Set of marked uids, with a visual (range) marking mode.
///
/// The marker does not own the listing; callers pass the current display
/// uids and selection where a range is involved.
#[derive(Debug, Clone, Default)]
pub struct Marker {
    marked: HashSet<u32>,
    last_marked: HashSet<u32>,
    visual: Option<VisualMark>,
}

#[derive(Debug, Clone)]
struct VisualMark {
    start: u32,
    base: HashSet<u32>,
}

impl Marker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, uid: u32) {
        self.marked.insert(uid);
    }

    pub fn unmark(&mut self, uid: u32) {
        self.marked.remove(&uid);
    }

    pub fn toggle_mark(&mut self, uid: u32) {
        if !self.marked.remove(&uid) {
            self.marked.insert(uid);
        }
    }

    /// Mark every given uid
    pub fn mark_all(&mut self, uids: &[u32]) {
        self.marked.extend(uids.iter().copied());
    }

    pub fn is_marked(&self, uid: u32) -> bool {
        self.marked.contains(&uid)
    }

    pub fn has_marks(&self) -> bool {
        !self.marked.is_empty()
    }

    /// Marked uids in the order of `uids`
    pub fn marked(&self, uids: &[u32]) -> Vec<u32> {
        uids.iter()
            .copied()
            .filter(|uid| self.marked.contains(uid))
            .collect()
    }

    /// Drop all marks, keeping them for [`Marker::remark`]
    pub fn clear(&mut self) {
        self.last_marked = std::mem::take(&mut self.marked);
        self.visual = None;
    }

    /// Restore the marks dropped by the last clear
    pub fn remark(&mut self) {
        self.marked = self.last_marked.clone();
    }

    /// Forget uids that left the folder
    pub fn prune(&mut self, uids: &[u32]) {
        for uid in uids {
            self.marked.remove(uid);
            self.last_marked.remove(uid);
        }
    }

    pub fn is_visual(&self) -> bool {
        self.visual.is_some()
    }

    /// Enter or leave visual mode anchored at `selected`.
    ///
    /// With `clear`, marks made before entering are dropped.
    pub fn toggle_visual_mark(&mut self, clear: bool, selected: Option<u32>) {
        if self.visual.take().is_some() {
            return;
        }
        let Some(start) = selected else {
            return;
        };
        let base = if clear {
            self.clear();
            HashSet::new()
        } else {
            self.marked.clone()
        };
        self.marked.insert(start);
        self.visual = Some(VisualMark { start, base });
    }

    /// Re-mark the range between the visual anchor and the selection
    pub fn update_visual_mark(&mut self, uids: &[u32], selected: Option<u32>) {
        let Some(visual) = &self.visual else {
            return;
        };
        let Some(start) = uids.iter().position(|&u| u == visual.start) else {
            return;
        };
        let Some(current) = selected.and_then(|s| uids.iter().position(|&u| u == s)) else {
            return;
        };
        let range = if current > start {
            &uids[start..=current]
        } else {
            &uids[current..=start]
        };
        let mut marked = visual.base.clone();
        marked.extend(range.iter().copied());
        self.marked = marked;
    }

    /// Leave visual mode and drop all marks
    pub fn clear_visual_mark(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_remark() {
        let mut marker = Marker::new();
        marker.mark(1);
        marker.toggle_mark(2);
        marker.toggle_mark(1);
        assert_eq!(marker.marked(&[1, 2, 3]), vec![2]);

        marker.clear();
        assert!(!marker.has_marks());
        marker.remark();
        assert!(marker.is_marked(2));
    }

    #[test]
    fn test_visual_range_follows_selection() {
        let uids = [10, 11, 12, 13, 14];
        let mut marker = Marker::new();
        marker.mark(10);

        marker.toggle_visual_mark(false, Some(12));
        marker.update_visual_mark(&uids, Some(14));
        assert_eq!(marker.marked(&uids), vec![10, 12, 13, 14]);

        // Moving back shrinks the range past the anchor
        marker.update_visual_mark(&uids, Some(11));
        assert_eq!(marker.marked(&uids), vec![10, 11, 12]);

        marker.toggle_visual_mark(false, Some(11));
        assert!(!marker.is_visual());
        marker.update_visual_mark(&uids, Some(14));
        assert_eq!(marker.marked(&uids), vec![10, 11, 12]);
    }

    #[test]
    fn test_visual_clear_drops_previous_marks() {
        let uids = [1, 2, 3];
        let mut marker = Marker::new();
        marker.mark(1);
        marker.toggle_visual_mark(true, Some(2));
        marker.update_visual_mark(&uids, Some(3));
        assert_eq!(marker.marked(&uids), vec![2, 3]);
    }

    #[test]
    fn test_prune() {
        let mut marker = Marker::new();
        marker.mark_all(&[1, 2, 3]);
        marker.prune(&[2]);
        assert_eq!(marker.marked(&[1, 2, 3]), vec![1, 3]);
    }
}
