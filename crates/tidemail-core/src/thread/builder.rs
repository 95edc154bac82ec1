//! Client-side threading from reference headers

use super::{NodeId, ThreadForest};
use std::collections::{HashMap, HashSet};
use tidemail_worker::MessageInfo;
use tracing::debug;

/// Reference data the builder keeps per message
#[derive(Debug, Clone)]
struct Threadable {
    message_id: String,
    /// Ancestor ids, oldest first
    parents: Vec<String>,
}

/// Builds reply forests from message-id, In-Reply-To and References.
///
/// Messages are fed in one at a time as their headers arrive; building a
/// forest only considers the uids it is asked for.
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    messages: HashMap<u32, Threadable>,
    folded: HashSet<u32>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the reference chain of one message.
    ///
    /// Records without an envelope carry no threading data and are ignored.
    pub fn update(&mut self, info: &MessageInfo) {
        if info.envelope.is_none() {
            return;
        }
        let threadable = Threadable {
            message_id: info.message_id().unwrap_or_default().to_string(),
            parents: info.parent_ids().into_iter().map(str::to_string).collect(),
        };
        self.messages.insert(info.uid, threadable);
    }

    /// Number of messages with known references
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Build the forest for `uids`.
    ///
    /// A message hangs below the nearest ancestor that is part of `uids`; a
    /// message whose ancestors are all outside the set becomes a root. Roots
    /// follow the position of their newest member in `uids`. Siblings follow
    /// arrival order, or their position in `uids` with `sort_siblings`.
    pub fn threads(&self, uids: &[u32], sort_siblings: bool) -> ThreadForest {
        let mut position: HashMap<u32, usize> = HashMap::with_capacity(uids.len());
        let mut ordered: Vec<u32> = Vec::with_capacity(uids.len());
        for (i, &uid) in uids.iter().enumerate() {
            if !position.contains_key(&uid) {
                position.insert(uid, i);
                ordered.push(uid);
            }
        }

        let mut by_id: HashMap<&str, u32> = HashMap::new();
        for &uid in &ordered {
            if let Some(t) = self.messages.get(&uid) {
                if !t.message_id.is_empty() {
                    by_id.entry(t.message_id.as_str()).or_insert(uid);
                }
            }
        }

        let mut parent_of: HashMap<u32, u32> = HashMap::new();
        for &uid in &ordered {
            let Some(t) = self.messages.get(&uid) else {
                continue;
            };
            for pid in t.parents.iter().rev() {
                let Some(&parent) = by_id.get(pid.as_str()) else {
                    continue;
                };
                if parent != uid && !creates_cycle(&parent_of, parent, uid) {
                    parent_of.insert(uid, parent);
                    break;
                }
            }
        }

        let mut forest = ThreadForest::new();
        for &uid in &ordered {
            forest.push(uid);
        }

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut roots: Vec<u32> = Vec::new();
        for &uid in &ordered {
            match parent_of.get(&uid) {
                Some(&parent) => children.entry(parent).or_default().push(uid),
                None => roots.push(uid),
            }
        }

        for (parent, mut kids) in children {
            if sort_siblings {
                kids.sort_by_key(|uid| position[uid]);
            } else {
                kids.sort_unstable();
            }
            let ids: Vec<NodeId> = kids.iter().filter_map(|&uid| forest.id_of(uid)).collect();
            let parent_id = forest.id_of(parent);
            forest.link(parent_id, &ids);
        }

        let mut keyed: Vec<(usize, NodeId)> = roots
            .iter()
            .filter_map(|&uid| forest.id_of(uid))
            .map(|id| {
                let newest = forest
                    .walk(id)
                    .into_iter()
                    .filter_map(|(node, _)| forest.get(node))
                    .filter(|n| !n.deleted)
                    .map(|n| position[&n.uid])
                    .max()
                    .unwrap_or(0);
                (newest, id)
            })
            .collect();
        keyed.sort_by_key(|&(newest, _)| newest);
        let root_ids: Vec<NodeId> = keyed.into_iter().map(|(_, id)| id).collect();
        forest.link(None, &root_ids);

        self.apply_folds(&mut forest);

        debug!(
            "{} threads from {} uids",
            forest.root_ids().len(),
            ordered.len()
        );
        forest
    }

    /// Remember whether the replies below `uid` are folded.
    ///
    /// Unfolding also forgets folds nested below `uid`.
    pub fn set_folded(&mut self, uid: u32, folded: bool, forest: &ThreadForest) {
        if folded {
            self.folded.insert(uid);
        } else {
            self.folded.remove(&uid);
            for descendant in forest.descendants(uid) {
                self.folded.remove(&descendant);
            }
        }
    }

    pub fn is_folded(&self, uid: u32) -> bool {
        self.folded.contains(&uid)
    }

    /// Re-apply remembered folds to a freshly built forest
    pub fn apply_folds(&self, forest: &mut ThreadForest) {
        for &uid in &self.folded {
            // Folds of messages outside this forest are kept for later
            let _ = forest.set_descendants_hidden(uid, true);
        }
    }
}

fn creates_cycle(parent_of: &HashMap<u32, u32>, parent: u32, child: u32) -> bool {
    let mut current = parent;
    let mut steps = 0;
    while let Some(&next) = parent_of.get(&current) {
        if next == child {
            return true;
        }
        current = next;
        steps += 1;
        if steps > parent_of.len() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::IterFactory;
    use tidemail_worker::Envelope;

    fn msg(uid: u32, id: &str, refs: &[&str]) -> MessageInfo {
        MessageInfo {
            uid,
            envelope: Some(Envelope {
                message_id: id.to_string(),
                ..Default::default()
            }),
            references: refs.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    fn builder(messages: &[MessageInfo]) -> ThreadBuilder {
        let mut builder = ThreadBuilder::new();
        for m in messages {
            builder.update(m);
        }
        builder
    }

    #[test]
    fn test_replies_attach_to_parents() {
        let b = builder(&[
            msg(1, "a", &[]),
            msg(2, "b", &["a"]),
            msg(3, "c", &["a", "b"]),
            msg(4, "d", &[]),
        ]);
        let forest = b.threads(&[1, 2, 3, 4], false);

        assert_eq!(forest.roots(), vec![1, 4]);
        assert_eq!(forest.root_of(3).unwrap(), 1);
        assert_eq!(forest.depth(3), Some(2));
    }

    #[test]
    fn test_missing_parent_promotes_to_root() {
        // 3 replies to 2, which is not part of the listing
        let b = builder(&[msg(1, "a", &[]), msg(2, "b", &["a"]), msg(3, "c", &["a", "b"])]);
        let forest = b.threads(&[3, 2], false);
        assert_eq!(forest.root_of(3).unwrap(), 2);

        let forest = b.threads(&[1, 3], false);
        // Falls back to the nearest ancestor present
        assert_eq!(forest.root_of(3).unwrap(), 1);

        let forest = b.threads(&[3], false);
        assert_eq!(forest.roots(), vec![3]);
    }

    #[test]
    fn test_unknown_messages_are_roots() {
        let b = builder(&[msg(1, "a", &[])]);
        let forest = b.threads(&[1, 7, 8], false);
        assert_eq!(forest.roots(), vec![1, 7, 8]);
        assert_eq!(forest.flatten(false, IterFactory::new(true)), vec![1, 7, 8]);
    }

    #[test]
    fn test_reference_loops_are_broken() {
        let b = builder(&[msg(1, "a", &["b"]), msg(2, "b", &["a"])]);
        let forest = b.threads(&[1, 2], false);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.roots().len(), 1);
    }

    #[test]
    fn test_root_order_follows_newest_member() {
        // Thread of 1 got a late reply (4), so it sorts after thread 2
        let b = builder(&[
            msg(1, "a", &[]),
            msg(2, "b", &[]),
            msg(3, "c", &[]),
            msg(4, "d", &["a"]),
        ]);
        let forest = b.threads(&[1, 2, 3, 4], false);
        assert_eq!(forest.roots(), vec![2, 3, 1]);
    }

    #[test]
    fn test_sibling_order() {
        let b = builder(&[msg(1, "a", &[]), msg(2, "b", &["a"]), msg(3, "c", &["a"])]);

        let forest = b.threads(&[1, 3, 2], false);
        assert_eq!(forest.descendants(1), vec![2, 3]);

        let forest = b.threads(&[1, 3, 2], true);
        assert_eq!(forest.descendants(1), vec![3, 2]);
    }

    #[test]
    fn test_folds_survive_rebuild() {
        let mut b = builder(&[msg(1, "a", &[]), msg(2, "b", &["a"]), msg(3, "c", &["b"])]);
        let forest = b.threads(&[1, 2, 3], false);
        b.set_folded(1, true, &forest);

        let factory = IterFactory::new(true);
        let rebuilt = b.threads(&[1, 2, 3], false);
        assert_eq!(rebuilt.flatten(false, factory), vec![1]);

        b.set_folded(1, false, &rebuilt);
        assert!(!b.is_folded(1));
        assert_eq!(b.threads(&[1, 2, 3], false).flatten(false, factory), vec![1, 2, 3]);
    }

    #[test]
    fn test_flatten_round_trips_unthreaded_input() {
        let b = builder(&[msg(5, "e", &[]), msg(9, "f", &[])]);
        let uids = [9, 2, 5, 11];
        let factory = IterFactory::new(false);
        let mut forest = b.threads(&uids, false);
        let flat = forest.flatten(false, factory);
        assert_eq!(flat, uids);

        for uid in uids {
            forest.set_descendants_hidden(uid, true).unwrap();
            forest.set_descendants_hidden(uid, false).unwrap();
        }
        assert_eq!(forest.flatten(false, factory), flat);
    }
}
