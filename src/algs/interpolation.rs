//! Coarse-to-fine interpolation: `fine = prescale * fine + I(coarse)`.
//!
//! The coarse level first fills its ghosts (exchange plus boundary closure of
//! matching order). The owner of the coarse cells under each fine box then
//! ships a halo-padded block to the fine box's owner, which evaluates all
//! eight children of every coarse cell with a tensor-product contraction.
//! Blocks are staged in the coarse level's transfer plan.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algs::boundary::apply_boundary;
use crate::algs::communicator::{Communicator, Wait, copy_f64s, tags};
use crate::algs::exchange::exchange;
use crate::algs::restriction::no_plan;
use crate::algs::transfer::Transfer;
use crate::data::grid_box::GridBox;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::tensor::{TensorKernel, TensorMode};
use crate::topology::{ClosureOrder, StencilShape};

/// Interpolation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterpolationOrder {
    /// Piecewise linear, used inside V-cycles.
    Linear,
    /// Fourth order, used when F-cycles move to a finer level.
    Quartic,
}

impl InterpolationOrder {
    /// Coarse halo each child stencil reaches.
    pub fn halo(self) -> usize {
        match self {
            InterpolationOrder::Linear => 1,
            InterpolationOrder::Quartic => 2,
        }
    }

    pub fn closure(self) -> ClosureOrder {
        match self {
            InterpolationOrder::Linear => ClosureOrder::Linear,
            InterpolationOrder::Quartic => ClosureOrder::Quartic,
        }
    }
}

/// Copy the `edge^3` block of `id` starting `halo` cells below `offset`.
fn pack_block(b: &GridBox, id: VectorId, offset: [usize; 3], halo: usize, edge: usize, out: &mut [f64]) {
    let x = b.vector(id);
    let layout = b.layout();
    let origin = offset.map(|c| c as isize - halo as isize);
    let mut at = 0;
    for k in 0..edge as isize {
        for j in 0..edge as isize {
            let row = layout.index(origin[0], origin[1] + j, origin[2] + k);
            out[at..at + edge].copy_from_slice(&x[row..row + edge]);
            at += edge;
        }
    }
}

/// Apply the kernel to every coarse cell of `block` and add the children into `id`.
fn prolong_box(
    b: &mut GridBox,
    id: VectorId,
    prescale: f64,
    kernel: &TensorKernel,
    halo: usize,
    block: &[f64],
) {
    let layout = b.layout();
    let GridBox { vectors, batch, .. } = b;
    let fine = &mut vectors[id.get()];
    let dc = layout.dim / 2;
    let edge = dc + 2 * halo;
    let p = kernel.basis().p();
    let q = kernel.basis().q();
    let ne = kernel.batch();
    let elements = dc * dc * dc;
    let (len_in, len_out) = kernel.basis().sizes(TensorMode::Eval);
    let x = &mut batch.x;
    let y = &mut batch.y;
    if x.len() < len_in * ne {
        x.resize(len_in * ne, 0.0);
    }
    if y.len() < len_out * ne {
        y.resize(len_out * ne, 0.0);
    }

    let coarse_cell = |n: usize| [n % dc, (n / dc) % dc, n / (dc * dc)];
    for first in (0..elements).step_by(ne) {
        let count = ne.min(elements - first);
        for e in 0..ne {
            // pad a short tail batch by repeating the last element
            let c = coarse_cell(first + e.min(count - 1));
            for pk in 0..p {
                for pj in 0..p {
                    let src = (c[2] + pk) * edge * edge + (c[1] + pj) * edge + c[0];
                    for pi in 0..p {
                        x[((pk * p + pj) * p + pi) * ne + e] = block[src + pi];
                    }
                }
            }
        }
        y[..len_out * ne].fill(0.0);
        kernel.apply(TensorMode::Eval, &x[..len_in * ne], &mut y[..len_out * ne], &mut batch.scratch);
        for e in 0..count {
            let c = coarse_cell(first + e);
            for qk in 0..q {
                for qj in 0..q {
                    for qi in 0..q {
                        let idx = layout.index(
                            (2 * c[0] + qi) as isize,
                            (2 * c[1] + qj) as isize,
                            (2 * c[2] + qk) as isize,
                        );
                        let child = y[((qk * q + qj) * q + qi) * ne + e];
                        fine[idx] = prescale * fine[idx] + child;
                    }
                }
            }
        }
    }
}

/// `fine_id = prescale * fine_id + I(coarse_id)` on every fine box.
///
/// `fine` must have prolongation kernels selected and `coarse` a transfer
/// plan for `fine`; the coarse ghosts of `coarse_id` are overwritten.
pub fn interpolate<C: Communicator>(
    coarse: &mut Level,
    coarse_id: VectorId,
    fine: &mut Level,
    fine_id: VectorId,
    prescale: f64,
    order: InterpolationOrder,
    comm: &C,
) -> Result<(), MgError> {
    let Level {
        boxes: fine_boxes,
        prolongation,
        index: fine_index,
        ..
    } = fine;
    let kernel = match (prolongation.as_ref(), order) {
        (Some(p), InterpolationOrder::Linear) => &p.linear,
        (Some(p), InterpolationOrder::Quartic) => &p.quartic,
        (None, _) => {
            return Err(MgError::Unsupported(format!(
                "level {fine_index} has no prolongation kernels"
            )));
        }
    };
    if coarse.transfer.as_ref().map(|p| p.fine_level) != Some(*fine_index) {
        return Err(no_plan(coarse.index, *fine_index));
    }
    exchange(coarse, comm, coarse_id, StencilShape::Box)?;
    apply_boundary(coarse, coarse_id, order.closure());

    let halo = order.halo();
    let Level {
        boxes: coarse_boxes,
        transfer,
        index,
        ..
    } = coarse;
    let plan = transfer.as_mut().ok_or_else(|| no_plan(*index, *fine_index))?;
    let coarse_boxes: &[GridBox] = coarse_boxes;
    let edge = plan.coarse_cells + 2 * halo;
    let block_len = edge.pow(3);
    let stride = plan.block_stride;

    let mut pending = Vec::with_capacity(plan.interp_sends.len());
    for Transfer { peer, items, buffer } in plan.interp_sends.iter_mut() {
        let mut at = 0;
        for t in items.iter() {
            pack_block(&coarse_boxes[t.slot], coarse_id, t.offset, halo, edge, &mut buffer[at..at + block_len]);
            at += block_len;
        }
        pending.push(comm.isend(*peer, tags::INTERPOLATE, bytemuck::cast_slice(&buffer[..at])));
    }

    plan.blocks
        .par_chunks_mut(stride)
        .zip(plan.interp_local.par_iter())
        .for_each(|(block, source)| {
            if let Some(t) = source {
                pack_block(&coarse_boxes[t.slot], coarse_id, t.offset, halo, edge, &mut block[..block_len]);
            }
        });

    for Transfer { peer, items, buffer } in plan.interp_recvs.iter_mut() {
        let peer = *peer;
        let buf = &mut buffer[..items.len() * block_len];
        let raw = comm
            .irecv(peer, tags::INTERPOLATE, bytemuck::cast_slice_mut(buf))
            .wait()
            .ok_or_else(|| MgError::Communication {
                peer,
                detail: "no interpolation message".into(),
            })?;
        copy_f64s(peer, &raw, buf)?;
        for (&slot, chunk) in items.iter().zip(buf.chunks_exact(block_len)) {
            plan.blocks[slot * stride..slot * stride + block_len].copy_from_slice(chunk);
        }
    }

    fine_boxes
        .par_iter_mut()
        .zip(plan.blocks.par_chunks(stride))
        .for_each(|(b, block)| prolong_box(b, fine_id, prescale, kernel, halo, &block[..block_len]));

    for h in pending {
        h.wait();
    }
    Ok(())
}
