//! Three-way merge over arbitrary sequences.
//!
//! Alignment uses the Myers diff from `similar` between the base and each
//! side; regions between elements that are stable on all three sequences are
//! then resolved diff3-style.

use std::hash::Hash;

use similar::{capture_diff_slices, Algorithm, DiffOp};

/// A region of a merged sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk<T> {
    /// Unchanged, changed on one side only, or changed identically.
    Resolved(Vec<T>),
    /// Changed differently on both sides.
    Conflict {
        base: Vec<T>,
        ours: Vec<T>,
        theirs: Vec<T>,
    },
}

/// For every base element, the index of the equal element in `other`.
fn align<T: Hash + Eq + Ord>(base: &[T], other: &[T]) -> Vec<Option<usize>> {
    let mut map = vec![None; base.len()];
    for op in capture_diff_slices(Algorithm::Myers, base, other) {
        if let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        {
            for offset in 0..len {
                map[old_index + offset] = Some(new_index + offset);
            }
        }
    }
    map
}

/// Merge `ours` and `theirs` against their common ancestor `base`.
pub fn merge3<T: Hash + Eq + Ord + Clone>(base: &[T], ours: &[T], theirs: &[T]) -> Vec<Chunk<T>> {
    let to_ours = align(base, ours);
    let to_theirs = align(base, theirs);

    let mut chunks = Vec::new();
    let (mut i, mut j, mut k) = (0, 0, 0);

    loop {
        if i < base.len() && to_ours[i] == Some(j) && to_theirs[i] == Some(k) {
            push_resolved(&mut chunks, std::slice::from_ref(&base[i]));
            i += 1;
            j += 1;
            k += 1;
            continue;
        }

        // Next base element that survives on both sides.
        let sync = (i..base.len()).find_map(|x| Some((x, to_ours[x]?, to_theirs[x]?)));
        let (bi, oj, tk) = sync.unwrap_or((base.len(), ours.len(), theirs.len()));

        resolve(&mut chunks, &base[i..bi], &ours[j..oj], &theirs[k..tk]);

        if sync.is_none() {
            break;
        }
        i = bi;
        j = oj;
        k = tk;
    }

    chunks
}

fn resolve<T: Eq + Clone>(chunks: &mut Vec<Chunk<T>>, base: &[T], ours: &[T], theirs: &[T]) {
    if ours == base {
        push_resolved(chunks, theirs);
    } else if theirs == base || ours == theirs {
        push_resolved(chunks, ours);
    } else {
        chunks.push(Chunk::Conflict {
            base: base.to_vec(),
            ours: ours.to_vec(),
            theirs: theirs.to_vec(),
        });
    }
}

fn push_resolved<T: Clone>(chunks: &mut Vec<Chunk<T>>, items: &[T]) {
    if items.is_empty() {
        return;
    }
    if let Some(Chunk::Resolved(last)) = chunks.last_mut() {
        last.extend_from_slice(items);
    } else {
        chunks.push(Chunk::Resolved(items.to_vec()));
    }
}
