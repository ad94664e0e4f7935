//! Ghost-cell (halo) exchange between the boxes of one level.
//!
//! An [`ExchangePlan`] is built once per level and shape. It lists, for every
//! ghost cell inside the shape, where the value comes from: another box on
//! this rank (copied directly) or a box on a peer rank (packed into one
//! message per peer). Ghost cells outside a Dirichlet domain are left to the
//! boundary closure.
//!
//! Both ends of a message walk the global box list in the same order, so a
//! message is a plain concatenation of values with no per-cell headers.

use hashbrown::HashMap;
use rayon::prelude::*;

use crate::algs::communicator::{Communicator, Wait, copy_f64s, tags};
use crate::data::grid_box::GridBox;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::topology::{BoundaryKind, BoxPartition, StencilShape};

/// Contiguous cells copied between two boxes of this rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CopyRun {
    pub src_box: usize,
    pub src: usize,
    pub dst: usize,
    pub len: usize,
}

/// Contiguous cells of one local box that belong to a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Run {
    pub slot: usize,
    pub offset: usize,
    pub len: usize,
}

/// All runs exchanged with one peer, in message order.
#[derive(Clone, Debug, Default)]
pub(crate) struct PeerMessage {
    pub peer: usize,
    pub runs: Vec<Run>,
    pub len: usize,
    pub buffer: Vec<f64>,
}

impl PeerMessage {
    fn push(&mut self, slot: usize, offset: usize) {
        self.len += 1;
        if let Some(last) = self.runs.last_mut() {
            if last.slot == slot && last.offset + last.len == offset {
                last.len += 1;
                return;
            }
        }
        self.runs.push(Run { slot, offset, len: 1 });
    }
}

/// Precomputed communication pattern for one `(level, shape)`.
#[derive(Clone, Debug, Default)]
pub struct ExchangePlan {
    /// Same-rank runs, grouped by destination box slot.
    pub(crate) local: Vec<Vec<CopyRun>>,
    staging: Vec<Vec<f64>>,
    pub(crate) sends: Vec<PeerMessage>,
    pub(crate) recvs: Vec<PeerMessage>,
}

impl ExchangePlan {
    pub(crate) fn build(
        level: usize,
        partition: &BoxPartition,
        rank: usize,
        ghosts: usize,
        boundary: BoundaryKind,
        shape: StencilShape,
        slots: &HashMap<usize, usize>,
    ) -> Result<Self, MgError> {
        let n = partition.global_dim() as i64;
        let d = partition.box_dim() as i64;
        let g = ghosts as i64;
        let stride = (d + 2 * g) as usize;
        let offset = |c: [i64; 3]| {
            (c[0] + g) as usize + (c[1] + g) as usize * stride + (c[2] + g) as usize * stride * stride
        };
        let slot_of = |global: usize, cell: [i64; 3]| {
            slots.get(&global).copied().ok_or(MgError::MissingNeighbor {
                level,
                box_index: global,
                cell,
            })
        };

        let mut local = vec![Vec::new(); slots.len()];
        let mut sends: HashMap<usize, PeerMessage> = HashMap::new();
        let mut recvs: HashMap<usize, PeerMessage> = HashMap::new();

        for (dst_global, dst) in partition.boxes().iter().enumerate() {
            let low = dst.low.map(|c| c as i64);
            for k in -g..d + g {
                for j in -g..d + g {
                    'cell: for i in -g..d + g {
                        let c = [i, j, k];
                        let outside = c.iter().filter(|&&x| x < 0 || x >= d).count();
                        if outside == 0 || !shape.includes(outside) {
                            continue;
                        }
                        let mut global = [0usize; 3];
                        for a in 0..3 {
                            let x = low[a] + c[a];
                            global[a] = if (0..n).contains(&x) {
                                x as usize
                            } else if boundary.is_periodic() {
                                x.rem_euclid(n) as usize
                            } else {
                                continue 'cell;
                            };
                        }
                        let src_global = partition.box_containing(global);
                        let src = &partition.boxes()[src_global];
                        let src_cell = [0, 1, 2].map(|a| (global[a] - src.low[a]) as i64);
                        match (src.owner == rank, dst.owner == rank) {
                            (true, true) => {
                                let d_slot = slot_of(dst_global, c)?;
                                let s_slot = slot_of(src_global, src_cell)?;
                                push_copy(&mut local[d_slot], s_slot, offset(src_cell), offset(c));
                            }
                            (false, true) => {
                                let d_slot = slot_of(dst_global, c)?;
                                recvs
                                    .entry(src.owner)
                                    .or_insert_with(|| PeerMessage { peer: src.owner, ..Default::default() })
                                    .push(d_slot, offset(c));
                            }
                            (true, false) => {
                                let s_slot = slot_of(src_global, src_cell)?;
                                sends
                                    .entry(dst.owner)
                                    .or_insert_with(|| PeerMessage { peer: dst.owner, ..Default::default() })
                                    .push(s_slot, offset(src_cell));
                            }
                            (false, false) => {}
                        }
                    }
                }
            }
        }

        let finish = |map: HashMap<usize, PeerMessage>| {
            let mut v: Vec<PeerMessage> = map
                .into_values()
                .map(|mut m| {
                    m.buffer = vec![0.0; m.len];
                    m
                })
                .collect();
            v.sort_by_key(|m| m.peer);
            v
        };
        let staging = local
            .iter()
            .map(|runs: &Vec<CopyRun>| vec![0.0; runs.iter().map(|r| r.len).sum()])
            .collect();
        Ok(Self {
            local,
            staging,
            sends: finish(sends),
            recvs: finish(recvs),
        })
    }

    /// Number of values this rank sends per exchange.
    pub fn send_volume(&self) -> usize {
        self.sends.iter().map(|m| m.len).sum()
    }

    /// Number of values copied between boxes of this rank per exchange.
    pub fn local_volume(&self) -> usize {
        self.local.iter().flatten().map(|r| r.len).sum()
    }

    pub fn peers(&self) -> impl Iterator<Item = usize> + '_ {
        self.sends.iter().map(|m| m.peer)
    }
}

fn push_copy(runs: &mut Vec<CopyRun>, src_box: usize, src: usize, dst: usize) {
    if let Some(last) = runs.last_mut() {
        if last.src_box == src_box && last.src + last.len == src && last.dst + last.len == dst {
            last.len += 1;
            return;
        }
    }
    runs.push(CopyRun { src_box, src, dst, len: 1 });
}

/// Fill the ghost cells of `id` selected by `shape` on every box of the level.
///
/// Sends to every peer first, then performs same-rank copies, then blocks on
/// each peer's message. Dirichlet ghosts are not touched.
pub fn exchange<C: Communicator>(
    level: &mut Level,
    comm: &C,
    id: VectorId,
    shape: StencilShape,
) -> Result<(), MgError> {
    let v = id.get();
    let Level { boxes, plans, .. } = level;
    let plan = &mut plans[shape.slot()];

    let mut pending = Vec::with_capacity(plan.sends.len());
    for msg in plan.sends.iter_mut() {
        let mut at = 0;
        for run in &msg.runs {
            msg.buffer[at..at + run.len]
                .copy_from_slice(&boxes[run.slot].vectors[v][run.offset..run.offset + run.len]);
            at += run.len;
        }
        pending.push(comm.isend(msg.peer, tags::EXCHANGE, bytemuck::cast_slice(&msg.buffer)));
    }

    {
        let shared: &[GridBox] = &boxes[..];
        plan.staging
            .par_iter_mut()
            .zip(plan.local.par_iter())
            .for_each(|(stage, runs)| {
                let mut at = 0;
                for r in runs {
                    stage[at..at + r.len]
                        .copy_from_slice(&shared[r.src_box].vectors[v][r.src..r.src + r.len]);
                    at += r.len;
                }
            });
    }
    boxes
        .par_iter_mut()
        .zip(plan.staging.par_iter().zip(plan.local.par_iter()))
        .for_each(|(b, (stage, runs))| {
            let dst = &mut b.vectors[v];
            let mut at = 0;
            for r in runs {
                dst[r.dst..r.dst + r.len].copy_from_slice(&stage[at..at + r.len]);
                at += r.len;
            }
        });

    for msg in plan.recvs.iter_mut() {
        let peer = msg.peer;
        let raw = comm
            .irecv(peer, tags::EXCHANGE, bytemuck::cast_slice_mut(&mut msg.buffer))
            .wait()
            .ok_or_else(|| MgError::Communication {
                peer,
                detail: format!("no halo message for {id}"),
            })?;
        copy_f64s(peer, &raw, &mut msg.buffer)?;
        let mut at = 0;
        for run in &msg.runs {
            boxes[run.slot].vectors[v][run.offset..run.offset + run.len]
                .copy_from_slice(&msg.buffer[at..at + run.len]);
            at += run.len;
        }
    }
    for h in pending {
        h.wait();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::level::Level;
    use crate::topology::BoxPartition;

    fn level(boundary: BoundaryKind) -> Level {
        let p = BoxPartition::uniform(2, 4, 1).unwrap();
        Level::new(0, p, 2, boundary, 0, VectorId::COUNT).unwrap()
    }

    fn stamp(level: &mut Level) {
        level.fill_cells_indexed(VectorId::U, |g| (g[0] + 10 * g[1] + 100 * g[2]) as f64);
    }

    #[test]
    fn periodic_ghosts_wrap() {
        let mut lvl = level(BoundaryKind::Periodic);
        stamp(&mut lvl);
        exchange(&mut lvl, &NoComm, VectorId::U, StencilShape::Box).unwrap();
        let b = &lvl.boxes()[0];
        // ghost (-1, 0, 0) of box 0 is global (7, 0, 0)
        assert_eq!(b.get(VectorId::U, -1, 0, 0), 7.0);
        // corner (-1, -1, -1) wraps to (7, 7, 7)
        assert_eq!(b.get(VectorId::U, -1, -1, -1), 777.0);
        // face ghost inside the domain comes from the neighbor box
        assert_eq!(b.get(VectorId::U, 4, 1, 2), 4.0 + 10.0 + 200.0);
    }

    #[test]
    fn faces_shape_leaves_edges_alone() {
        let mut lvl = level(BoundaryKind::Periodic);
        stamp(&mut lvl);
        exchange(&mut lvl, &NoComm, VectorId::U, StencilShape::Faces).unwrap();
        let b = &lvl.boxes()[0];
        assert_eq!(b.get(VectorId::U, 4, 4, 0), 0.0);
        assert_eq!(b.get(VectorId::U, 0, 4, 0), 40.0);
    }

    #[test]
    fn dirichlet_ghosts_outside_domain_are_untouched() {
        let mut lvl = level(BoundaryKind::Dirichlet);
        stamp(&mut lvl);
        exchange(&mut lvl, &NoComm, VectorId::U, StencilShape::NoCorners).unwrap();
        let b = &lvl.boxes()[0];
        assert_eq!(b.get(VectorId::U, -1, 0, 0), 0.0);
        assert_eq!(b.get(VectorId::U, 4, 4, 0), 44.0);
        let plan = &lvl.plans[StencilShape::NoCorners.slot()];
        assert_eq!(plan.send_volume(), 0);
        assert!(plan.local_volume() > 0);
    }

    #[test]
    fn unmapped_boxes_are_reported() {
        let p = BoxPartition::uniform(2, 4, 1).unwrap();
        let err = ExchangePlan::build(0, &p, 0, 2, BoundaryKind::Periodic, StencilShape::Box, &HashMap::new())
            .unwrap_err();
        assert!(err.is_communication());
        assert!(matches!(err, MgError::MissingNeighbor { level: 0, .. }));

        // the neighbours of box 0 are still missing
        let slots: HashMap<usize, usize> = [(0, 0)].into_iter().collect();
        let err = ExchangePlan::build(3, &p, 0, 2, BoundaryKind::Dirichlet, StencilShape::Faces, &slots).unwrap_err();
        match err {
            MgError::MissingNeighbor { level, box_index, .. } => {
                assert_eq!(level, 3);
                assert_ne!(box_index, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
