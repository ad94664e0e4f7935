//! Box decomposition of the global cubic index space.
//!
//! A [`BoxPartition`] lists equally sized cubic boxes, each owned by one
//! rank, that tile `[0, global_dim)^3` without gaps or overlaps. Boxes are
//! kept in lexicographic order of their box coordinates (i fastest) so that
//! every rank derives the same global numbering from the same partition.

use itertools::iproduct;
use serde::{Deserialize, Serialize};

use crate::debug_invariants::DebugInvariants;
use crate::mg_error::MgError;

/// One box of a partition: low corner (global cell index), edge length, owner rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxSpec {
    pub low: [usize; 3],
    pub dim: usize,
    pub owner: usize,
}

/// A validated tiling of the global domain by cubic boxes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxPartition {
    global_dim: usize,
    box_dim: usize,
    ranks: usize,
    boxes: Vec<BoxSpec>,
}

impl BoxPartition {
    /// `boxes_per_dim^3` boxes of edge `box_dim`, dealt to `ranks` ranks in
    /// contiguous lexicographic blocks.
    pub fn uniform(boxes_per_dim: usize, box_dim: usize, ranks: usize) -> Result<Self, MgError> {
        if boxes_per_dim == 0 {
            return Err(MgError::PartitionMismatch(
                "at least one box per dimension is required".into(),
            ));
        }
        if ranks == 0 {
            return Err(MgError::PartitionMismatch("rank count must be positive".into()));
        }
        let total = boxes_per_dim.pow(3);
        let boxes = iproduct!(0..boxes_per_dim, 0..boxes_per_dim, 0..boxes_per_dim)
            .enumerate()
            .map(|(index, (bk, bj, bi))| BoxSpec {
                low: [bi * box_dim, bj * box_dim, bk * box_dim],
                dim: box_dim,
                owner: index * ranks / total,
            })
            .collect();
        Self::from_boxes(boxes_per_dim * box_dim, boxes, ranks)
    }

    /// Validate an explicit box list against a `global_dim^3` domain.
    pub fn from_boxes(
        global_dim: usize,
        mut boxes: Vec<BoxSpec>,
        ranks: usize,
    ) -> Result<Self, MgError> {
        let first = boxes
            .first()
            .ok_or_else(|| MgError::PartitionMismatch("empty box list".into()))?;
        let box_dim = first.dim;
        if box_dim == 0 || !box_dim.is_power_of_two() {
            return Err(MgError::InvalidBoxDim(box_dim));
        }
        if global_dim == 0 || global_dim % box_dim != 0 {
            return Err(MgError::PartitionMismatch(format!(
                "global dimension {global_dim} is not a multiple of box dimension {box_dim}"
            )));
        }
        let per_dim = global_dim / box_dim;
        let mut seen = vec![false; per_dim.pow(3)];
        for (n, b) in boxes.iter().enumerate() {
            if b.dim != box_dim {
                return Err(MgError::PartitionMismatch(format!(
                    "box {n} has dimension {} but box 0 has {box_dim}",
                    b.dim
                )));
            }
            if b.owner >= ranks {
                return Err(MgError::OwnerOutOfRange {
                    box_index: n,
                    owner: b.owner,
                    ranks,
                });
            }
            if b.low.iter().any(|&c| c % box_dim != 0 || c >= global_dim) {
                return Err(MgError::PartitionMismatch(format!(
                    "box {n} at {:?} is misaligned or outside the domain",
                    b.low
                )));
            }
            let slot = lex_index(
                [b.low[0] / box_dim, b.low[1] / box_dim, b.low[2] / box_dim],
                per_dim,
            );
            if std::mem::replace(&mut seen[slot], true) {
                return Err(MgError::PartitionMismatch(format!(
                    "box {n} at {:?} overlaps another box",
                    b.low
                )));
            }
        }
        if let Some(gap) = seen.iter().position(|covered| !covered) {
            return Err(MgError::PartitionMismatch(format!(
                "box slot {gap} is not covered ({} of {} boxes given)",
                boxes.len(),
                per_dim.pow(3)
            )));
        }
        boxes.sort_by_key(|b| lex_index(b.low.map(|c| c / box_dim), per_dim));
        Ok(Self {
            global_dim,
            box_dim,
            ranks,
            boxes,
        })
    }

    pub fn global_dim(&self) -> usize {
        self.global_dim
    }

    pub fn box_dim(&self) -> usize {
        self.box_dim
    }

    pub fn ranks(&self) -> usize {
        self.ranks
    }

    pub fn boxes_per_dim(&self) -> usize {
        self.global_dim / self.box_dim
    }

    pub fn boxes(&self) -> &[BoxSpec] {
        &self.boxes
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Global index of the box containing an in-domain global cell.
    #[inline]
    pub fn box_containing(&self, cell: [usize; 3]) -> usize {
        lex_index(cell.map(|c| c / self.box_dim), self.boxes_per_dim())
    }

    /// Global indices of the boxes owned by `rank`, ascending.
    pub fn owned_by(&self, rank: usize) -> Vec<usize> {
        self.boxes
            .iter()
            .enumerate()
            .filter_map(|(n, b)| (b.owner == rank).then_some(n))
            .collect()
    }

    /// The next-coarser decomposition, or `None` when the domain cannot be
    /// halved any further.
    ///
    /// Boxes halve in place while the result stays at or above
    /// `agglomerate_below`; below that, 2x2x2 groups of boxes merge into one
    /// box of the current edge length, owned by the rank of the group's
    /// lowest-corner child. Merging always wins over halving into single-cell
    /// boxes, since a fine box of one cell covers no whole coarse cell and
    /// the decomposition ends there. Without an even number of boxes per
    /// axis to merge, boxes halve regardless.
    pub fn coarsen(&self, agglomerate_below: usize) -> Option<Self> {
        if self.global_dim % 2 != 0 || self.box_dim < 2 {
            return None;
        }
        let per_dim = self.boxes_per_dim();
        let can_merge = per_dim % 2 == 0;
        if self.box_dim / 2 >= agglomerate_below.max(2) || !can_merge {
            let boxes = self
                .boxes
                .iter()
                .map(|b| BoxSpec {
                    low: b.low.map(|c| c / 2),
                    dim: b.dim / 2,
                    owner: b.owner,
                })
                .collect();
            return Some(Self {
                global_dim: self.global_dim / 2,
                box_dim: self.box_dim / 2,
                ranks: self.ranks,
                boxes,
            });
        }
        let coarse_per_dim = per_dim / 2;
        let boxes = iproduct!(0..coarse_per_dim, 0..coarse_per_dim, 0..coarse_per_dim)
            .map(|(bk, bj, bi)| {
                let child = lex_index([2 * bi, 2 * bj, 2 * bk], per_dim);
                BoxSpec {
                    low: [bi * self.box_dim, bj * self.box_dim, bk * self.box_dim],
                    dim: self.box_dim,
                    owner: self.boxes[child].owner,
                }
            })
            .collect();
        Some(Self {
            global_dim: self.global_dim / 2,
            box_dim: self.box_dim,
            ranks: self.ranks,
            boxes,
        })
    }
}

impl DebugInvariants for BoxPartition {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "partition");
    }

    fn validate_invariants(&self) -> Result<(), MgError> {
        Self::from_boxes(self.global_dim, self.boxes.clone(), self.ranks).map(|_| ())
    }
}

/// Lexicographic index with the first coordinate fastest.
#[inline]
pub(crate) fn lex_index(c: [usize; 3], n: usize) -> usize {
    c[0] + n * (c[1] + n * c[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_partition_deals_contiguous_blocks() {
        let p = BoxPartition::uniform(2, 8, 2).unwrap();
        assert_eq!(p.global_dim(), 16);
        assert_eq!(p.len(), 8);
        assert_eq!(p.owned_by(0), vec![0, 1, 2, 3]);
        assert_eq!(p.owned_by(1), vec![4, 5, 6, 7]);
        assert_eq!(p.boxes()[5].low, [8, 0, 8]);
    }

    #[test]
    fn overlapping_boxes_are_rejected() {
        let b = |low| BoxSpec { low, dim: 4, owner: 0 };
        let boxes = vec![b([0, 0, 0]), b([0, 0, 0])];
        let err = BoxPartition::from_boxes(4, boxes, 1).unwrap_err();
        assert!(matches!(err, MgError::PartitionMismatch(_)));
    }

    #[test]
    fn gaps_are_rejected() {
        let boxes = vec![BoxSpec { low: [0, 0, 0], dim: 4, owner: 0 }];
        let err = BoxPartition::from_boxes(8, boxes, 1).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn non_power_of_two_box_is_rejected() {
        let boxes = vec![BoxSpec { low: [0, 0, 0], dim: 6, owner: 0 }];
        assert_eq!(
            BoxPartition::from_boxes(6, boxes, 1).unwrap_err(),
            MgError::InvalidBoxDim(6)
        );
    }

    #[test]
    fn coarsening_halves_then_agglomerates() {
        let p = BoxPartition::uniform(2, 8, 8).unwrap();
        let c1 = p.coarsen(4).unwrap();
        assert_eq!((c1.global_dim(), c1.box_dim(), c1.len()), (8, 4, 8));
        let c2 = c1.coarsen(4).unwrap();
        assert_eq!((c2.global_dim(), c2.box_dim(), c2.len()), (4, 4, 1));
        assert_eq!(c2.boxes()[0].owner, 0);
        let c3 = c2.coarsen(4).unwrap();
        assert_eq!((c3.global_dim(), c3.box_dim()), (2, 2));
    }

    #[test]
    fn merging_beats_single_cell_boxes() {
        let p = BoxPartition::uniform(4, 2, 1).unwrap();
        let c1 = p.coarsen(1).unwrap();
        assert_eq!((c1.global_dim(), c1.box_dim(), c1.len()), (4, 2, 8));
        let c2 = c1.coarsen(0).unwrap();
        assert_eq!((c2.global_dim(), c2.box_dim(), c2.len()), (2, 2, 1));
        // a lone box can only halve
        let c3 = c2.coarsen(1).unwrap();
        assert_eq!((c3.global_dim(), c3.box_dim(), c3.len()), (1, 1, 1));
        assert!(c3.coarsen(1).is_none());
    }

    #[test]
    fn odd_global_dimension_stops_coarsening() {
        let p = BoxPartition::uniform(3, 1, 1).unwrap();
        assert!(p.coarsen(1).is_none());
    }
}
