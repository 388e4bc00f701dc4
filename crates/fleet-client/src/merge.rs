//! Streaming k-way merge of per-node result lists by score.
//!
//! Each node ranks its own files by descending score. The merge keeps one
//! cursor per node and, on every pull, scans the heads of all unexhausted
//! lists for the highest score. Node counts are small (at most the fan-out
//! limit), so a linear scan per item is fine and keeps the tie-breaking
//! rule obvious: the first node in key order wins.

use std::cmp::Ordering;
use std::iter::FusedIterator;

use tracing::warn;

use fleet_types::NodeId;

use crate::wire::FileMatch;

struct Cursor<'a> {
    node: &'a NodeId,
    files: &'a [FileMatch],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn head(&self) -> Option<&'a FileMatch> {
        self.files.get(self.position)
    }

    fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.position)
    }
}

/// One-shot iterator over `(node, file)` pairs in merged score order.
///
/// Files from the same node keep their relative order, including runs of
/// equal scores.
pub struct ScoreMerge<'a> {
    cursors: Vec<Cursor<'a>>,
}

impl<'a> ScoreMerge<'a> {
    /// Build a merge over per-node lists. Lists are consulted in the order
    /// given; empty lists are dropped up front.
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = (&'a NodeId, &'a [FileMatch])>,
    {
        let cursors = sources
            .into_iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(node, files)| {
                if !is_descending(files) {
                    warn!(
                        node = %node,
                        files = files.len(),
                        "Node results are not sorted by descending score; merged order follows node order"
                    );
                }
                Cursor {
                    node,
                    files,
                    position: 0,
                }
            })
            .collect();

        Self { cursors }
    }

    /// Nodes that still contribute at least one file.
    pub fn source_count(&self) -> usize {
        self.cursors.iter().filter(|c| c.remaining() > 0).count()
    }
}

fn is_descending(files: &[FileMatch]) -> bool {
    files
        .windows(2)
        .all(|pair| pair[0].score.total_cmp(&pair[1].score) != Ordering::Less)
}

impl<'a> Iterator for ScoreMerge<'a> {
    type Item = (&'a NodeId, &'a FileMatch);

    fn next(&mut self) -> Option<Self::Item> {
        let mut best: Option<(usize, f64)> = None;

        for (index, cursor) in self.cursors.iter().enumerate() {
            let Some(head) = cursor.head() else {
                continue;
            };
            let wins = match best {
                None => true,
                Some((_, score)) => head.score.total_cmp(&score) == Ordering::Greater,
            };
            if wins {
                best = Some((index, head.score));
            }
        }

        let (index, _) = best?;
        let cursor = &mut self.cursors[index];
        let file = cursor.head()?;
        cursor.position += 1;
        Some((cursor.node, file))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cursors.iter().map(Cursor::remaining).sum();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ScoreMerge<'_> {}

impl FusedIterator for ScoreMerge<'_> {}
