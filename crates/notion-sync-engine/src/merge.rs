//! Block-level diff between the blocks a page has and the blocks it should have.
//!
//! The merge never writes. It returns an [`EditScript`]: appends in the order
//! they must be issued (each anchored after an existing block) and the ids to
//! delete once every append has landed. Anchors may point at blocks that are
//! themselves scheduled for deletion, which is why deletions come last.

use notion_sync_core::Block;
use tracing::debug;

/// Insert `blocks` under `parent_id`, after the child `after` (or at the end).
#[derive(Debug, Clone, PartialEq)]
pub struct Append {
    pub parent_id: String,
    pub after: Option<String>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditScript {
    pub appends: Vec<Append>,
    /// Block ids to delete, each at most once.
    pub deletions: Vec<String>,
}

impl EditScript {
    pub fn is_empty(&self) -> bool {
        self.appends.is_empty() && self.deletions.is_empty()
    }

    fn delete(&mut self, id: &str) {
        if !self.deletions.iter().any(|d| d == id) {
            self.deletions.push(id.to_string());
        }
    }
}

/// Compute the edits turning `existing` (children of `parent_id`) into `desired`.
///
/// Equal content yields an empty script. Page blocks among `existing` are
/// left alone; page lifecycle belongs to the reconciler.
pub fn merge(parent_id: &str, existing: &[Block], desired: &[Block]) -> EditScript {
    let mut script = EditScript::default();
    merge_level(&mut script, parent_id, existing, desired);
    script
}

fn merge_level(script: &mut EditScript, parent_id: &str, existing: &[Block], desired: &[Block]) {
    let existing: Vec<&Block> = existing.iter().filter(|b| !b.is_page()).collect();
    let mut pairs = align(&existing, desired);

    // Appends can only go after a block. When new content must precede the
    // first existing block, that block is re-inserted after the new content
    // and the original deleted.
    if let Some(&(0, first_desired)) = pairs.first() {
        if first_desired > 0 {
            pairs.remove(0);
        }
    }

    let mut retained = vec![false; existing.len()];
    for &(e, _) in &pairs {
        retained[e] = true;
    }

    let mut next_desired = 0;
    for k in 0..=pairs.len() {
        let (bound_existing, bound_desired) = pairs
            .get(k)
            .copied()
            .unwrap_or((existing.len(), desired.len()));

        if bound_desired > next_desired {
            // Last existing block before the next retained one, retained or not.
            let after = bound_existing
                .checked_sub(1)
                .and_then(|i| existing[i].id.clone());
            script.appends.push(Append {
                parent_id: parent_id.to_string(),
                after,
                blocks: desired[next_desired..bound_desired]
                    .iter()
                    .map(Block::without_identity)
                    .collect(),
            });
        }

        if let Some(&(e, d)) = pairs.get(k) {
            merge_children(script, existing[e], &desired[d]);
            next_desired = d + 1;
        }
    }

    for (block, kept) in existing.iter().zip(&retained) {
        if !kept {
            if let Some(id) = &block.id {
                script.delete(id);
            }
        }
    }
}

fn merge_children(script: &mut EditScript, existing: &Block, desired: &Block) {
    let Some(id) = existing.id.as_deref() else {
        return;
    };
    if existing.children.is_empty() && desired.children.is_empty() {
        return;
    }
    if existing.children_unknown() {
        debug!(
            "Children of block {} were not fetched (depth limit), leaving them as-is",
            id
        );
        return;
    }
    merge_level(script, id, &existing.children, &desired.children);
}

/// Matched `(existing, desired)` index pairs, strictly increasing in both.
///
/// Common prefix and suffix are matched directly; the differing middle is
/// aligned by longest common subsequence.
fn align(existing: &[&Block], desired: &[Block]) -> Vec<(usize, usize)> {
    let prefix = existing
        .iter()
        .zip(desired)
        .take_while(|(e, d)| e.content_eq(d))
        .count();
    let suffix = existing[prefix..]
        .iter()
        .rev()
        .zip(desired[prefix..].iter().rev())
        .take_while(|(e, d)| e.content_eq(d))
        .count();

    let existing_mid = &existing[prefix..existing.len() - suffix];
    let desired_mid = &desired[prefix..desired.len() - suffix];

    let mut pairs: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();
    pairs.extend(
        lcs(existing_mid, desired_mid)
            .into_iter()
            .map(|(e, d)| (e + prefix, d + prefix)),
    );
    pairs.extend((0..suffix).map(|k| {
        (
            existing.len() - suffix + k,
            desired.len() - suffix + k,
        )
    }));
    pairs
}

fn lcs(existing: &[&Block], desired: &[Block]) -> Vec<(usize, usize)> {
    let (n, m) = (existing.len(), desired.len());
    if n == 0 || m == 0 {
        return Vec::new();
    }

    // table[i][j] = LCS length of existing[i..] and desired[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if existing[i].content_eq(&desired[j]) {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if existing[i].content_eq(&desired[j]) && table[i][j] == table[i + 1][j + 1] + 1 {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}
