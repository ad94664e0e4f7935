//! Fine-to-coarse restriction of cell and face quantities.
//!
//! Every fine box restricts onto the coarse cells it covers, which always
//! lie inside a single coarse box. The block is written directly when that
//! coarse box is local, otherwise it is packed into the message for the
//! coarse owner. Routing and buffers come from the coarse level's
//! [`TransferPlan`](crate::algs::transfer::TransferPlan).

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algs::communicator::{Communicator, Wait, copy_f64s, tags};
use crate::algs::transfer::Transfer;
use crate::data::grid_box::GridBox;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;

/// What a restricted value represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RestrictionMode {
    /// Cell average over the 2x2x2 fine children.
    Cell,
    /// Average of the 2x2 fine faces normal to i.
    FaceI,
    FaceJ,
    FaceK,
}

impl RestrictionMode {
    pub fn face_axis(self) -> Option<usize> {
        match self {
            RestrictionMode::Cell => None,
            RestrictionMode::FaceI => Some(0),
            RestrictionMode::FaceJ => Some(1),
            RestrictionMode::FaceK => Some(2),
        }
    }

    pub fn face(axis: usize) -> Self {
        match axis {
            0 => RestrictionMode::FaceI,
            1 => RestrictionMode::FaceJ,
            _ => RestrictionMode::FaceK,
        }
    }

    /// Coarse extent written for a fine box of edge `fine_dim`.
    fn extent(self, fine_dim: usize) -> [usize; 3] {
        let mut ext = [fine_dim / 2; 3];
        if let Some(a) = self.face_axis() {
            ext[a] += 1;
        }
        ext
    }
}

/// Visit every restricted value of box `b` with its coarse offset inside the
/// block, in message order (i fastest).
fn restrict_each(b: &GridBox, id: VectorId, mode: RestrictionMode, mut put: impl FnMut([usize; 3], f64)) {
    let ext = mode.extent(b.dim);
    let x = b.vector(id);
    let layout = b.layout();
    for kc in 0..ext[2] {
        for jc in 0..ext[1] {
            for ic in 0..ext[0] {
                let (i, j, k) = (2 * ic as isize, 2 * jc as isize, 2 * kc as isize);
                let at = |di, dj, dk| x[layout.index(i + di, j + dj, k + dk)];
                let v = match mode {
                    RestrictionMode::Cell => {
                        0.125
                            * (at(0, 0, 0)
                                + at(1, 0, 0)
                                + at(0, 1, 0)
                                + at(1, 1, 0)
                                + at(0, 0, 1)
                                + at(1, 0, 1)
                                + at(0, 1, 1)
                                + at(1, 1, 1))
                    }
                    RestrictionMode::FaceI => 0.25 * (at(0, 0, 0) + at(0, 1, 0) + at(0, 0, 1) + at(0, 1, 1)),
                    RestrictionMode::FaceJ => 0.25 * (at(0, 0, 0) + at(1, 0, 0) + at(0, 0, 1) + at(1, 0, 1)),
                    RestrictionMode::FaceK => 0.25 * (at(0, 0, 0) + at(1, 0, 0) + at(0, 1, 0) + at(1, 1, 0)),
                };
                put([ic, jc, kc], v);
            }
        }
    }
}

fn write_block(b: &mut GridBox, id: VectorId, offset: [usize; 3], ext: [usize; 3], block: &[f64]) {
    let layout = b.layout();
    let x = b.vector_mut(id);
    let mut n = 0;
    for k in 0..ext[2] {
        for j in 0..ext[1] {
            let row = layout.index(offset[0] as isize, (offset[1] + j) as isize, (offset[2] + k) as isize);
            x[row..row + ext[0]].copy_from_slice(&block[n..n + ext[0]]);
            n += ext[0];
        }
    }
}

/// Restrict `fine_id` on `fine` into the interior of `coarse_id` on `coarse`.
///
/// `coarse` must carry a transfer plan for `fine`. Face modes also write the
/// high face of the last coarse cell. Coarse ghosts are stale afterwards.
pub fn restrict<C: Communicator>(
    fine: &Level,
    fine_id: VectorId,
    coarse: &mut Level,
    coarse_id: VectorId,
    mode: RestrictionMode,
    comm: &C,
) -> Result<(), MgError> {
    let ext = mode.extent(fine.box_dim());
    let block_len: usize = ext.iter().product();
    let Level {
        boxes: coarse_boxes,
        transfer,
        index,
        ..
    } = coarse;
    let plan = transfer
        .as_mut()
        .filter(|p| p.fine_level == fine.index)
        .ok_or_else(|| no_plan(*index, fine.index))?;

    let mut pending = Vec::with_capacity(plan.restrict_sends.len());
    for Transfer { peer, items, buffer } in plan.restrict_sends.iter_mut() {
        let mut at = 0;
        for &slot in items.iter() {
            restrict_each(&fine.boxes[slot], fine_id, mode, |_, v| {
                buffer[at] = v;
                at += 1;
            });
        }
        pending.push(comm.isend(*peer, tags::RESTRICT, bytemuck::cast_slice(&buffer[..at])));
    }

    coarse_boxes
        .par_iter_mut()
        .zip(plan.restrict_local.par_iter())
        .for_each(|(cb, sources)| {
            let layout = cb.layout();
            let x = cb.vector_mut(coarse_id);
            for &(slot, offset) in sources {
                restrict_each(&fine.boxes[slot], fine_id, mode, |c, v| {
                    let idx = layout.index(
                        (offset[0] + c[0]) as isize,
                        (offset[1] + c[1]) as isize,
                        (offset[2] + c[2]) as isize,
                    );
                    x[idx] = v;
                });
            }
        });

    for Transfer { peer, items, buffer } in plan.restrict_recvs.iter_mut() {
        let peer = *peer;
        let buf = &mut buffer[..items.len() * block_len];
        let raw = comm
            .irecv(peer, tags::RESTRICT, bytemuck::cast_slice_mut(buf))
            .wait()
            .ok_or_else(|| MgError::Communication {
                peer,
                detail: "no restriction message".into(),
            })?;
        copy_f64s(peer, &raw, buf)?;
        for (t, block) in items.iter().zip(buf.chunks_exact(block_len)) {
            write_block(&mut coarse_boxes[t.slot], coarse_id, t.offset, ext, block);
        }
    }
    for h in pending {
        h.wait();
    }
    Ok(())
}

pub(crate) fn no_plan(coarse: usize, fine: usize) -> MgError {
    MgError::Unsupported(format!("level {coarse} has no transfer plan for level {fine}"))
}
