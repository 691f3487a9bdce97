//! Packets and packet headers (ISO/IEC 15444-1 B.9, B.10).
//!
//! A packet carries the new coding passes of every code-block of one precinct
//! for one layer. Its header codes, per code-block, the inclusion (tag tree on
//! the first inclusion, a single bit afterwards), the number of missing
//! bit-planes on the first inclusion, the number of new passes and the length
//! of every codeword segment piece.

use crate::constants::{EPH_MARKER_SIZE, SOP_MARKER_SIZE};
use crate::error::{J2kError, Result};
use crate::jpeg2000::bit_io::{J2kBitReader, J2kBitWriter};
use crate::jpeg2000::bit_plane_coder::{CodingOptions, EncodedCodeBlock, num_passes};
use crate::jpeg2000::codeblock::Precinct;
use crate::jpeg2000::tag_tree::TagTree;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Packet progression order (Table A.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    /// Layer-resolution-component-position
    #[default]
    Lrcp = 0,
    /// Resolution-layer-component-position
    Rlcp = 1,
    /// Resolution-position-component-layer
    Rpcl = 2,
    /// Position-component-resolution-layer
    Pcrl = 3,
    /// Component-position-resolution-layer
    Cprl = 4,
}

/// SOP/EPH markers the codestream writer adds around packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarkerFlags {
    pub sop: bool,
    pub eph: bool,
}

impl MarkerFlags {
    /// Bytes the markers add to every packet.
    pub fn overhead(&self) -> usize {
        usize::from(self.sop) * SOP_MARKER_SIZE + usize::from(self.eph) * EPH_MARKER_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId {
    pub layer: u16,
    pub resolution: u8,
    pub component: u16,
    pub precinct: u32,
}

/// What one packet says about one code-block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Contribution {
    /// Subband node of the block.
    pub band: usize,
    /// Raster index of the block within the precinct band.
    pub block: usize,
    pub included: bool,
    /// Missing bit-planes, signaled with the first inclusion.
    pub zero_bitplanes: Option<u8>,
    pub new_passes: usize,
    /// Length of each codeword segment piece, in body order.
    pub segment_lengths: Vec<usize>,
}

impl Contribution {
    pub fn data_len(&self) -> usize {
        self.segment_lengths.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub id: Option<PacketId>,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
    pub contributions: Vec<Contribution>,
}

impl Packet {
    /// Size in the codestream, markers included.
    pub fn len(&self, markers: MarkerFlags) -> usize {
        self.header.len() + self.body.len() + markers.overhead()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.iter().all(|c| !c.included)
    }
}

#[derive(Debug, Clone)]
struct BandTrees {
    band: usize,
    grid_w: usize,
    offset: usize,
    count: usize,
    inclusion: TagTree,
    zero_bitplanes: TagTree,
}

#[derive(Debug, Clone, Copy)]
struct BlockHeaderState {
    included: bool,
    lblock: u32,
    passes: usize,
}

/// Header coding state of one precinct, carried from layer to layer.
#[derive(Debug, Clone)]
pub struct PrecinctState {
    bands: Vec<BandTrees>,
    blocks: Vec<BlockHeaderState>,
}

fn floor_log2(n: usize) -> u32 {
    usize::BITS - 1 - n.leading_zeros()
}

fn bit_length(v: usize) -> u32 {
    usize::BITS - v.leading_zeros()
}

// Number of new passes, Table B.4.
fn write_pass_count(writer: &mut J2kBitWriter, n: usize) {
    let n = n as u32;
    match n {
        1 => writer.write_bit(0),
        2 => writer.write_bits(0b10, 2),
        3..=5 => writer.write_bits(0b1100 | (n - 3), 4),
        6..=36 => {
            writer.write_bits(0b1111, 4);
            writer.write_bits(n - 6, 5);
        }
        _ => {
            writer.write_bits(0x1FF, 9);
            writer.write_bits(n - 37, 7);
        }
    }
}

fn read_pass_count(reader: &mut J2kBitReader) -> Result<usize> {
    if reader.read_bit()? == 0 {
        return Ok(1);
    }
    if reader.read_bit()? == 0 {
        return Ok(2);
    }
    let two = reader.read_bits(2)?;
    if two < 3 {
        return Ok(3 + two as usize);
    }
    let five = reader.read_bits(5)?;
    if five < 31 {
        return Ok(6 + five as usize);
    }
    Ok(37 + reader.read_bits(7)? as usize)
}

// Splits passes [from, to) into codeword segment pieces: (passes, end pass).
fn pieces(from: usize, to: usize, terminated: impl Fn(usize) -> bool) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = from;
    for k in from..to {
        if terminated(k) || k + 1 == to {
            out.push((k + 1 - start, k + 1));
            start = k + 1;
        }
    }
    out
}

impl PrecinctState {
    pub fn new(precinct: &Precinct) -> Self {
        let mut bands = Vec::with_capacity(precinct.bands.len());
        let mut offset = 0;
        for pb in &precinct.bands {
            let (w, h) = (pb.grid_w as usize, pb.grid_h as usize);
            bands.push(BandTrees {
                band: pb.band,
                grid_w: w,
                offset,
                count: pb.blocks.len(),
                inclusion: TagTree::new(w, h),
                zero_bitplanes: TagTree::new(w, h),
            });
            offset += pb.blocks.len();
        }
        Self {
            bands,
            blocks: vec![
                BlockHeaderState {
                    included: false,
                    lblock: crate::constants::INITIAL_LBLOCK,
                    passes: 0,
                };
                offset
            ],
        }
    }

    /// Encoder state; `blocks` are the precinct's coded blocks in band order.
    pub fn for_encoder(precinct: &Precinct, blocks: &[&EncodedCodeBlock]) -> Self {
        let mut state = Self::new(precinct);
        for band in &mut state.bands {
            for k in 0..band.count {
                let value = i32::from(blocks[band.offset + k].zero_bitplanes);
                band.zero_bitplanes.set_value(k % band.grid_w, k / band.grid_w, value);
            }
        }
        state
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Passes of block `i` sent in the packets coded so far.
    pub fn passes_sent(&self, i: usize) -> usize {
        self.blocks[i].passes
    }

    /// Codes the packet of `layer` bringing every block `i` up to `targets[i]`
    /// passes. Returns the header, the body and the contributions.
    pub fn encode_packet(
        &mut self,
        layer: u16,
        blocks: &[&EncodedCodeBlock],
        targets: &[usize],
    ) -> (Vec<u8>, Vec<u8>, Vec<Contribution>) {
        let mut writer = J2kBitWriter::new();
        let mut body = Vec::new();
        let mut contributions = Vec::with_capacity(self.blocks.len());
        let layer = i32::from(layer);

        let any = self
            .blocks
            .iter()
            .zip(targets)
            .any(|(state, &target)| target > state.passes);
        if !any {
            writer.write_bit(0);
            for band in &self.bands {
                for k in 0..band.count {
                    contributions.push(Contribution {
                        band: band.band,
                        block: k,
                        ..Default::default()
                    });
                }
            }
            return (writer.finish(), body, contributions);
        }
        writer.write_bit(1);

        for band in &mut self.bands {
            // Inclusion values of this layer must be in the tree before any
            // sibling is coded.
            for k in 0..band.count {
                let state = &self.blocks[band.offset + k];
                if !state.included && targets[band.offset + k] > state.passes {
                    band.inclusion.set_value(k % band.grid_w, k / band.grid_w, layer);
                }
            }
            for k in 0..band.count {
                let i = band.offset + k;
                let (x, y) = (k % band.grid_w, k / band.grid_w);
                let block = blocks[i];
                let state = &mut self.blocks[i];
                let target = targets[i].max(state.passes);
                let new = target - state.passes;
                let first = !state.included;
                if first {
                    band.inclusion.encode(&mut writer, x, y, layer + 1);
                } else {
                    writer.write_bit(u8::from(new > 0));
                }
                let mut contribution = Contribution {
                    band: band.band,
                    block: k,
                    ..Default::default()
                };
                if new == 0 {
                    contributions.push(contribution);
                    continue;
                }
                if first {
                    band.zero_bitplanes.encode(&mut writer, x, y, i32::MAX);
                    contribution.zero_bitplanes = Some(block.zero_bitplanes);
                    state.included = true;
                }
                write_pass_count(&mut writer, new);

                let length_at = |n: usize| if n == 0 { 0 } else { block.passes[n - 1].length };
                let segments: Vec<(usize, usize)> = pieces(state.passes, target, |k| block.passes[k].terminated)
                    .into_iter()
                    .scan(state.passes, |start, (n, end)| {
                        let len = length_at(end) - length_at(*start);
                        *start = end;
                        Some((n, len))
                    })
                    .collect();
                let increment = segments
                    .iter()
                    .map(|&(n, len)| bit_length(len).saturating_sub(state.lblock + floor_log2(n)))
                    .max()
                    .unwrap_or(0);
                for _ in 0..increment {
                    writer.write_bit(1);
                }
                writer.write_bit(0);
                state.lblock += increment;
                for &(n, len) in &segments {
                    writer.write_bits(len as u32, (state.lblock + floor_log2(n)) as u8);
                }

                body.extend_from_slice(&block.data[length_at(state.passes)..length_at(target)]);
                state.passes = target;
                contribution.included = true;
                contribution.new_passes = new;
                contribution.segment_lengths = segments.into_iter().map(|(_, len)| len).collect();
                contributions.push(contribution);
            }
        }
        (writer.finish(), body, contributions)
    }

    /// Decodes the header of the packet of `layer`. `magnitude_bits` holds `M_b`
    /// for every band of the precinct, in band order.
    pub fn decode_packet(
        &mut self,
        layer: u16,
        header: &[u8],
        magnitude_bits: &[u8],
        options: &CodingOptions,
    ) -> Result<Vec<Contribution>> {
        let mut reader = J2kBitReader::new(header);
        let layer = i32::from(layer);
        let mut contributions = Vec::with_capacity(self.blocks.len());

        let present = reader.read_bit()? == 1;
        for (j, band) in self.bands.iter_mut().enumerate() {
            let m_b = *magnitude_bits.get(j).ok_or(J2kError::InvalidPacketHeader)?;
            for k in 0..band.count {
                let (x, y) = (k % band.grid_w, k / band.grid_w);
                let state = &mut self.blocks[band.offset + k];
                let mut contribution = Contribution {
                    band: band.band,
                    block: k,
                    ..Default::default()
                };
                let included = present
                    && if state.included {
                        reader.read_bit()? == 1
                    } else {
                        band.inclusion.decode(&mut reader, x, y, layer + 1)?
                    };
                if !included {
                    contributions.push(contribution);
                    continue;
                }
                if !state.included {
                    let zbp = band.zero_bitplanes.decode_value(&mut reader, x, y)?;
                    if zbp < 0 || zbp > i32::from(m_b) {
                        return Err(J2kError::InvalidPacketHeader);
                    }
                    contribution.zero_bitplanes = Some(zbp as u8);
                    state.included = true;
                }
                let zbp = band.zero_bitplanes.value(x, y) as u8;
                let total = num_passes(m_b - zbp);
                let new = read_pass_count(&mut reader)?;
                let target = state.passes + new;
                if target > total {
                    return Err(J2kError::InvalidPacketHeader);
                }
                while reader.read_bit()? == 1 {
                    state.lblock += 1;
                    if state.lblock > 32 {
                        return Err(J2kError::InvalidPacketHeader);
                    }
                }
                let terminated = |k: usize| k + 1 == total || options.terminates_after(k);
                for (n, _) in pieces(state.passes, target, terminated) {
                    let bits = state.lblock + floor_log2(n);
                    if bits > 32 {
                        return Err(J2kError::InvalidPacketHeader);
                    }
                    contribution.segment_lengths.push(reader.read_bits(bits as u8)? as usize);
                }
                state.passes = target;
                contribution.included = true;
                contribution.new_passes = new;
                contributions.push(contribution);
            }
        }
        let used = reader.finish()?;
        if used != header.len() {
            return Err(J2kError::InvalidPacketHeader);
        }
        Ok(contributions)
    }
}

/// Packet sequence of a tile. `precincts[c][r]` is the number of precincts of
/// resolution `r` of component `c`.
///
/// RPCL, PCRL and CPRL step through precinct indices, not canvas positions:
/// precinct `p` of every resolution and component is visited together, in
/// raster index order. This differs from the position walk of B.12 whenever
/// precinct grids of different resolutions or components are not aligned,
/// so these sequences must be produced and consumed by this function alone.
pub fn packet_order(order: ProgressionOrder, layers: u16, precincts: &[Vec<u32>]) -> Vec<PacketId> {
    let max_res = precincts.iter().map(|c| c.len()).max().unwrap_or(0) as u8;
    let max_prec = precincts
        .iter()
        .flat_map(|c| c.iter().copied())
        .max()
        .unwrap_or(0);
    let components = precincts.len() as u16;
    let exists = |c: u16, r: u8, p: u32| {
        precincts[c as usize]
            .get(r as usize)
            .is_some_and(|&n| p < n)
    };
    let mut ids = Vec::new();
    let mut push = |layer: u16, resolution: u8, component: u16, precinct: u32| {
        if exists(component, resolution, precinct) {
            ids.push(PacketId {
                layer,
                resolution,
                component,
                precinct,
            });
        }
    };
    match order {
        ProgressionOrder::Lrcp => {
            for l in 0..layers {
                for r in 0..max_res {
                    for c in 0..components {
                        for p in 0..max_prec {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
        ProgressionOrder::Rlcp => {
            for r in 0..max_res {
                for l in 0..layers {
                    for c in 0..components {
                        for p in 0..max_prec {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
        ProgressionOrder::Rpcl => {
            for r in 0..max_res {
                for p in 0..max_prec {
                    for c in 0..components {
                        for l in 0..layers {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
        ProgressionOrder::Pcrl => {
            for p in 0..max_prec {
                for c in 0..components {
                    for r in 0..max_res {
                        for l in 0..layers {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
        ProgressionOrder::Cprl => {
            for c in 0..components {
                for p in 0..max_prec {
                    for r in 0..max_res {
                        for l in 0..layers {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_block::DataBlock;
    use crate::jpeg2000::bit_plane_coder::{BlockParams, DistortionModel, encode_code_block};
    use crate::jpeg2000::codeblock::{CodeBlockGeometry, PrecinctBand};
    use crate::jpeg2000::mq_coder::Termination;
    use crate::jpeg2000::subband::Orientation;
    use std::collections::HashSet;

    fn precinct(grid_w: u32, grid_h: u32) -> Precinct {
        let blocks = (0..grid_w * grid_h)
            .map(|i| CodeBlockGeometry {
                band: 1,
                x: (i % grid_w) * 4,
                y: (i / grid_w) * 4,
                w: 4,
                h: 4,
            })
            .collect();
        Precinct {
            resolution: 1,
            index: 0,
            bands: vec![PrecinctBand {
                band: 1,
                grid_w,
                grid_h,
                blocks,
            }],
        }
    }

    fn coded_blocks(n: usize, options: CodingOptions) -> Vec<EncodedCodeBlock> {
        (0..n)
            .map(|i| {
                let data: Vec<i32> = (0..16).map(|k| ((k * 7 + i * 13) % 41) as i32 - 20).collect();
                let block = DataBlock::from_vec(0, 0, 4, 4, data).unwrap();
                let params = BlockParams {
                    orientation: Orientation::HL,
                    magnitude_bits: 6,
                    options,
                };
                let model = DistortionModel {
                    weight: 1.0,
                    reversible: true,
                };
                encode_code_block(&block.view(0, 0, 4, 4), &params, model).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_packet_read_empty() {
        let data = vec![0x00]; // 0 bit -> empty
        let mut state = PrecinctState::new(&precinct(2, 2));
        let contributions = state
            .decode_packet(0, &data, &[6], &CodingOptions::default())
            .unwrap();
        assert_eq!(contributions.len(), 4);
        assert!(contributions.iter().all(|c| !c.included));
    }

    #[test]
    fn test_pass_count_codes() {
        for n in [1usize, 2, 3, 5, 6, 36, 37, 100, 164] {
            let mut w = J2kBitWriter::new();
            write_pass_count(&mut w, n);
            let buf = w.finish();
            let mut r = J2kBitReader::new(&buf);
            assert_eq!(read_pass_count(&mut r).unwrap(), n);
        }
    }

    #[test]
    fn test_header_roundtrip_over_layers() {
        for options in [
            CodingOptions::default(),
            CodingOptions {
                terminate_each_pass: true,
                termination: Termination::Easy,
                ..Default::default()
            },
            CodingOptions {
                bypass: true,
                ..Default::default()
            },
        ] {
            let prec = precinct(3, 2);
            let blocks = coded_blocks(6, options);
            let refs: Vec<&EncodedCodeBlock> = blocks.iter().collect();
            let mut enc = PrecinctState::for_encoder(&prec, &refs);
            let mut dec = PrecinctState::new(&prec);
            // Blocks join in different layers and grow unevenly.
            let plan = |layer: usize, i: usize| -> usize {
                let total = blocks[i].passes.len();
                if layer < i % 3 {
                    0
                } else {
                    (total * (layer + 1 - i % 3) / 3).min(total)
                }
            };
            let mut data: Vec<Vec<u8>> = vec![Vec::new(); 6];
            let mut segments: Vec<Vec<usize>> = vec![Vec::new(); 6];
            for layer in 0..5u16 {
                let targets: Vec<usize> = (0..6).map(|i| plan(layer as usize, i)).collect();
                let (header, body, sent) = enc.encode_packet(layer, &refs, &targets);
                let got = dec.decode_packet(layer, &header, &[6], &options).unwrap();
                assert_eq!(got, sent);
                let mut pos = 0;
                for c in &got {
                    data[c.block].extend_from_slice(&body[pos..pos + c.data_len()]);
                    segments[c.block].extend_from_slice(&c.segment_lengths);
                    pos += c.data_len();
                }
                assert_eq!(pos, body.len());
            }
            for (i, block) in blocks.iter().enumerate() {
                assert_eq!(dec.passes_sent(i), block.passes.len());
                assert_eq!(data[i], block.data);
                assert_eq!(segments[i].iter().sum::<usize>(), block.data.len());
            }
        }
    }

    #[test]
    fn test_packet_order_covers_everything_once() {
        let precincts = vec![vec![1, 2, 4], vec![1, 1]];
        for order in [
            ProgressionOrder::Lrcp,
            ProgressionOrder::Rlcp,
            ProgressionOrder::Rpcl,
            ProgressionOrder::Pcrl,
            ProgressionOrder::Cprl,
        ] {
            let ids = packet_order(order, 3, &precincts);
            assert_eq!(ids.len(), 3 * (7 + 2));
            let set: HashSet<PacketId> = ids.iter().copied().collect();
            assert_eq!(set.len(), ids.len());
            // Layers of a precinct always come in order.
            for (k, a) in ids.iter().enumerate() {
                for b in &ids[k + 1..] {
                    if (a.component, a.resolution, a.precinct) == (b.component, b.resolution, b.precinct) {
                        assert!(a.layer < b.layer);
                    }
                }
            }
        }
        let lrcp = packet_order(ProgressionOrder::Lrcp, 2, &precincts);
        assert_eq!(lrcp[0], PacketId { layer: 0, resolution: 0, component: 0, precinct: 0 });
        assert_eq!(lrcp[1], PacketId { layer: 0, resolution: 0, component: 1, precinct: 0 });
        assert_eq!(ProgressionOrder::try_from(4u8).ok(), Some(ProgressionOrder::Cprl));
    }

    #[test]
    fn test_position_orders_follow_precinct_index() {
        let precincts = vec![vec![1, 2, 4], vec![1, 1]];
        let keys = |order| -> Vec<(u8, u16, u32)> {
            packet_order(order, 1, &precincts)
                .iter()
                .map(|id| (id.resolution, id.component, id.precinct))
                .collect()
        };
        assert_eq!(
            keys(ProgressionOrder::Rpcl),
            vec![(0, 0, 0), (0, 1, 0), (1, 0, 0), (1, 1, 0), (1, 0, 1), (2, 0, 0), (2, 0, 1), (2, 0, 2), (2, 0, 3)]
        );
        assert_eq!(
            keys(ProgressionOrder::Pcrl),
            vec![(0, 0, 0), (1, 0, 0), (2, 0, 0), (0, 1, 0), (1, 1, 0), (1, 0, 1), (2, 0, 1), (2, 0, 2), (2, 0, 3)]
        );
        assert_eq!(
            keys(ProgressionOrder::Cprl),
            vec![(0, 0, 0), (1, 0, 0), (2, 0, 0), (1, 0, 1), (2, 0, 1), (2, 0, 2), (2, 0, 3), (0, 1, 0), (1, 1, 0)]
        );
    }
}
