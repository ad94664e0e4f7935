//! Precomputed communication pattern between a level and the next-finer one.
//!
//! Every fine box maps onto a block of coarse cells inside a single coarse
//! box. A [`TransferPlan`] records, for this rank, which of those pairs are
//! local and which cross to a peer, together with message buffers sized for
//! the largest block either direction ever moves. Restriction and
//! interpolation then run without touching the allocator.
//!
//! Both ends walk the global fine-box list in the same order, so a message is
//! a concatenation of fixed-size blocks with no headers.

use hashbrown::HashMap;

use crate::data::level::Level;
use crate::mg_error::MgError;

/// Widest coarse halo an interpolation stencil reads.
pub(crate) const MAX_INTERPOLATION_HALO: usize = 2;

/// Blocks exchanged with one peer, in global fine-box order.
#[derive(Clone, Debug)]
pub(crate) struct Transfer<T> {
    pub peer: usize,
    pub items: Vec<T>,
    pub buffer: Vec<f64>,
}

/// Where a fine box lands on this rank's coarse boxes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CoarseBlock {
    pub slot: usize,
    /// First coarse cell of the block, in the coarse box's local coordinates.
    pub offset: [usize; 3],
}

#[derive(Clone, Debug)]
pub struct TransferPlan {
    /// Index of the finer level this plan pairs with.
    pub(crate) fine_level: usize,
    /// Per coarse slot: local fine slots restricting into it.
    pub(crate) restrict_local: Vec<Vec<(usize, [usize; 3])>>,
    /// Fine slots whose blocks go to a peer's coarse box.
    pub(crate) restrict_sends: Vec<Transfer<usize>>,
    pub(crate) restrict_recvs: Vec<Transfer<CoarseBlock>>,
    /// Per fine slot: the local coarse block it interpolates from.
    pub(crate) interp_local: Vec<Option<CoarseBlock>>,
    pub(crate) interp_sends: Vec<Transfer<CoarseBlock>>,
    /// Fine slots whose coarse block arrives from a peer.
    pub(crate) interp_recvs: Vec<Transfer<usize>>,
    /// One halo-padded coarse block per fine slot.
    pub(crate) blocks: Vec<f64>,
    pub(crate) block_stride: usize,
    /// Coarse cells per axis under one fine box.
    pub(crate) coarse_cells: usize,
}

impl TransferPlan {
    /// Largest restricted block for fine boxes of edge `fine_dim`: a face
    /// block carries one extra layer along its normal.
    pub(crate) fn restrict_block_len(fine_dim: usize) -> usize {
        let d = fine_dim / 2;
        d * d * (d + 1)
    }

    /// Halo-padded coarse block for fine boxes of edge `fine_dim`.
    pub(crate) fn interp_block_len(fine_dim: usize, halo: usize) -> usize {
        (fine_dim / 2 + 2 * halo).pow(3)
    }

    pub(crate) fn build(fine: &Level, coarse: &Level) -> Result<Self, MgError> {
        if coarse.index != fine.index + 1 || coarse.rank != fine.rank {
            return Err(MgError::Unsupported(format!(
                "level {} cannot pair with level {} for transfers",
                coarse.index, fine.index
            )));
        }
        let me = coarse.rank;
        let missing = |level: &Level, g: usize, cell: [usize; 3]| MgError::MissingNeighbor {
            level: level.index,
            box_index: g,
            cell: cell.map(|c| c as i64),
        };

        let mut restrict_local = vec![Vec::new(); coarse.boxes.len()];
        let mut interp_local = vec![None; fine.boxes.len()];
        let mut restrict_sends: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut restrict_recvs: HashMap<usize, Vec<CoarseBlock>> = HashMap::new();
        let mut interp_sends: HashMap<usize, Vec<CoarseBlock>> = HashMap::new();
        let mut interp_recvs: HashMap<usize, Vec<usize>> = HashMap::new();

        for (g, spec) in fine.partition.boxes().iter().enumerate() {
            let low = spec.low.map(|c| c / 2);
            let cg = coarse.partition.box_containing(low);
            let cspec = &coarse.partition.boxes()[cg];
            let offset = [0, 1, 2].map(|a| low[a] - cspec.low[a]);
            match (spec.owner == me, cspec.owner == me) {
                (true, true) => {
                    let fslot = fine.slot_of(g).ok_or_else(|| missing(fine, g, spec.low))?;
                    let cslot = coarse.slot_of(cg).ok_or_else(|| missing(coarse, cg, low))?;
                    restrict_local[cslot].push((fslot, offset));
                    interp_local[fslot] = Some(CoarseBlock { slot: cslot, offset });
                }
                (true, false) => {
                    let fslot = fine.slot_of(g).ok_or_else(|| missing(fine, g, spec.low))?;
                    restrict_sends.entry(cspec.owner).or_default().push(fslot);
                    interp_recvs.entry(cspec.owner).or_default().push(fslot);
                }
                (false, true) => {
                    let cslot = coarse.slot_of(cg).ok_or_else(|| missing(coarse, cg, low))?;
                    let block = CoarseBlock { slot: cslot, offset };
                    restrict_recvs.entry(spec.owner).or_default().push(block);
                    interp_sends.entry(spec.owner).or_default().push(block);
                }
                (false, false) => {}
            }
        }

        let fine_dim = fine.box_dim();
        let restrict_len = Self::restrict_block_len(fine_dim);
        let block_stride = Self::interp_block_len(fine_dim, MAX_INTERPOLATION_HALO);
        Ok(Self {
            fine_level: fine.index,
            restrict_local,
            restrict_sends: finish(restrict_sends, restrict_len),
            restrict_recvs: finish(restrict_recvs, restrict_len),
            interp_local,
            interp_sends: finish(interp_sends, block_stride),
            interp_recvs: finish(interp_recvs, block_stride),
            blocks: vec![0.0; fine.boxes.len() * block_stride],
            block_stride,
            coarse_cells: fine_dim / 2,
        })
    }

    /// Values this rank sends per cell restriction.
    pub fn restrict_send_volume(&self, fine_dim: usize) -> usize {
        let d = fine_dim / 2;
        self.restrict_sends.iter().map(|t| t.items.len()).sum::<usize>() * d * d * d
    }

    /// Peers this rank ships interpolation blocks to.
    pub fn interpolation_peers(&self) -> impl Iterator<Item = usize> + '_ {
        self.interp_sends.iter().map(|t| t.peer)
    }
}

fn finish<T>(map: HashMap<usize, Vec<T>>, block_len: usize) -> Vec<Transfer<T>> {
    let mut out: Vec<Transfer<T>> = map
        .into_iter()
        .map(|(peer, items)| Transfer {
            peer,
            buffer: vec![0.0; items.len() * block_len],
            items,
        })
        .collect();
    out.sort_by_key(|t| t.peer);
    out
}
