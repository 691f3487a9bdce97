//! JPEG 2000 tile decoder
//!
//! Reads the packets of a tile in progression order, gathers the codeword
//! segments of every code-block, decodes the blocks and runs dequantization,
//! wavelet synthesis, the inverse component transform and the inverse level
//! shift.

use super::bit_plane_coder::{BlockParams, CodedBlock, decode_code_block, num_passes};
use super::component_transform::{ComponentTransform, inverse_ict, inverse_rct, level_shift_inverse, split3};
use super::packet::{Packet, PrecinctState, packet_order};
use super::quantization::{BandQuantization, dequantize_reversible, dequantize_scalar};
use super::tile::{ComponentLayout, TileGeometry, check_same_geometry};
use super::wavelet::{self, Coefficients};
use crate::context::CodecContext;
use crate::data_block::DataBlock;
use crate::error::{J2kError, Result};
use crate::specs::DecoderSpecs;
use std::collections::HashMap;

/// Codeword segments of one code-block received so far.
#[derive(Debug, Clone, Default)]
struct BlockAccumulator {
    data: Vec<u8>,
    segments: Vec<usize>,
    /// The last segment continues in a later packet.
    open: bool,
    passes: usize,
    zero_bitplanes: u8,
}

struct PrecinctDecoder {
    state: PrecinctState,
    magnitude_bits: Vec<u8>,
    blocks: Vec<BlockAccumulator>,
}

struct ComponentDecoder {
    layout: ComponentLayout,
    bands: HashMap<usize, BandQuantization>,
    /// `[resolution][precinct]`
    precincts: Vec<Vec<PrecinctDecoder>>,
}

/// Decodes one tile from its packets. Missing trailing packets leave the
/// affected code-blocks at the quality of the packets received.
pub fn decode_tile(
    specs: &DecoderSpecs,
    geometry: &TileGeometry,
    packets: &[Packet],
    ctx: &CodecContext,
) -> Result<Vec<DataBlock<i32>>> {
    let t = geometry.index;
    if geometry.components.len() != specs.components.len() {
        return Err(J2kError::InconsistentGeometry(format!(
            "tile {} has {} components, expected {}",
            t,
            geometry.components.len(),
            specs.components.len()
        )));
    }
    for c in 0..geometry.components.len() {
        specs.check_index(t, c)?;
    }
    let mct = *specs.component_transform.get_tile(t);
    if mct != ComponentTransform::None {
        check_same_geometry(&geometry.components)?;
    }

    let mut components = Vec::with_capacity(geometry.components.len());
    for (c, &geom) in geometry.components.iter().enumerate() {
        let layout = ComponentLayout::new(
            geom,
            *specs.filter.get(t, c),
            *specs.levels.get(t, c),
            *specs.code_block_size.get(t, c),
            specs.precinct_sizes.get(t, c),
        )?;
        let params = specs.quantization.get(t, c);
        let levels = layout.tree.num_levels();
        let bit_depth = specs.transform_bit_depth(t, c);
        let mut bands = HashMap::new();
        for b in layout.tree.leaves() {
            bands.insert(b, params.band(layout.tree.node(b), levels, bit_depth)?);
        }
        let precincts = layout
            .resolutions
            .iter()
            .map(|r| {
                r.precincts
                    .iter()
                    .map(|p| PrecinctDecoder {
                        state: PrecinctState::new(p),
                        magnitude_bits: p.bands.iter().map(|pb| bands[&pb.band].magnitude_bits).collect(),
                        blocks: vec![BlockAccumulator::default(); p.num_blocks()],
                    })
                    .collect()
            })
            .collect();
        components.push(ComponentDecoder {
            layout,
            bands,
            precincts,
        });
    }

    let counts: Vec<Vec<u32>> = components.iter().map(|c| c.layout.precinct_counts()).collect();
    let order = packet_order(*specs.progression.get_tile(t), *specs.num_layers.get_tile(t), &counts);
    ctx.start("packets", packets.len());
    for (k, packet) in packets.iter().enumerate() {
        let expected = match (order.get(k), packet.id) {
            (Some(&expected), Some(id)) if id == expected => expected,
            (Some(&expected), None) => expected,
            (_, Some(id)) => {
                return Err(J2kError::PacketOutOfOrder {
                    layer: id.layer,
                    resolution: id.resolution,
                    component: id.component,
                    precinct: id.precinct,
                });
            }
            (None, None) => {
                return Err(J2kError::InvalidArgument(
                    "more packets than the tile's progression holds",
                ));
            }
        };
        let c = expected.component as usize;
        let options = *specs.coding_options.get(t, c);
        let component = &mut components[c];
        let precinct = &mut component.precincts[expected.resolution as usize][expected.precinct as usize];
        let contributions =
            precinct
                .state
                .decode_packet(expected.layer, &packet.header, &precinct.magnitude_bits, &options)?;

        let mut pos = 0;
        for (contribution, acc) in contributions.iter().zip(precinct.blocks.iter_mut()) {
            if !contribution.included {
                continue;
            }
            if let Some(zbp) = contribution.zero_bitplanes {
                acc.zero_bitplanes = zbp;
            }
            let len = contribution.data_len();
            let bytes = packet.body.get(pos..pos + len).ok_or(J2kError::NeedMoreData)?;
            acc.data.extend_from_slice(bytes);
            pos += len;

            let mut lengths = contribution.segment_lengths.iter().copied();
            if acc.open {
                if let (Some(first), Some(last)) = (lengths.next(), acc.segments.last_mut()) {
                    *last += first;
                }
            }
            acc.segments.extend(lengths);
            acc.passes += contribution.new_passes;
            let m_b = component.bands[&contribution.band].magnitude_bits;
            let total = num_passes(m_b.saturating_sub(acc.zero_bitplanes));
            acc.open = acc.passes < total && !options.terminates_after(acc.passes - 1);
        }
        if pos != packet.body.len() {
            return Err(J2kError::InvalidPacketHeader);
        }
        ctx.update("packets", k + 1);
    }
    ctx.finish("packets");

    let mut coefficients = Vec::with_capacity(components.len());
    for (c, component) in components.iter().enumerate() {
        let geom = geometry.components[c];
        let options = *specs.coding_options.get(t, c);
        let mut coeffs = Coefficients::zeroed(component.layout.tree.filter(), 0, 0, geom.w, geom.h);
        for (resolution, decoders) in component.layout.resolutions.iter().zip(&component.precincts) {
            for (precinct, decoder) in resolution.precincts.iter().zip(decoders) {
                let blocks = precinct.bands.iter().flat_map(|pb| &pb.blocks);
                for (geom, acc) in blocks.zip(&decoder.blocks) {
                    if acc.passes == 0 {
                        continue;
                    }
                    let band = component.layout.tree.node(geom.band);
                    let bq = &component.bands[&geom.band];
                    let coded = CodedBlock {
                        w: geom.w,
                        h: geom.h,
                        zero_bitplanes: acc.zero_bitplanes,
                        num_passes: acc.passes,
                        data: &acc.data,
                        segment_lengths: &acc.segments,
                    };
                    let params = BlockParams {
                        orientation: band.orientation,
                        magnitude_bits: bq.magnitude_bits,
                        options,
                    };
                    let decoded = decode_code_block(&coded, &params)?;
                    for y in 0..geom.h {
                        for x in 0..geom.w {
                            let k = (y * geom.w + x) as usize;
                            let (q, undecoded) = (decoded.coefficients[k], decoded.undecoded[k]);
                            let (bx, by) = (geom.x + x, geom.y + y);
                            match &mut coeffs {
                                Coefficients::Int(b) if bq.reversible => b.set(bx, by, dequantize_reversible(q, undecoded)),
                                Coefficients::Int(b) => {
                                    b.set(bx, by, dequantize_scalar(q, bq.delta, undecoded).round() as i32)
                                }
                                Coefficients::Float(b) => b.set(bx, by, dequantize_scalar(q, bq.delta, undecoded)),
                            }
                        }
                    }
                }
            }
        }
        wavelet::inverse(&mut coeffs, &component.layout.tree);
        coefficients.push(coeffs);
    }

    match (mct, split3(&mut coefficients)) {
        (ComponentTransform::Reversible, Some((Coefficients::Int(y), Coefficients::Int(cb), Coefficients::Int(cr)))) => {
            inverse_rct(&mut y.data, &mut cb.data, &mut cr.data)
        }
        (
            ComponentTransform::Irreversible,
            Some((Coefficients::Float(y), Coefficients::Float(cb), Coefficients::Float(cr))),
        ) => inverse_ict(&mut y.data, &mut cb.data, &mut cr.data),
        _ => {}
    }

    let samples = coefficients
        .into_iter()
        .zip(&geometry.components)
        .zip(&specs.components)
        .map(|((coeffs, geom), info)| {
            let mut block = match coeffs {
                Coefficients::Int(b) => b,
                Coefficients::Float(b) => b.map(|v| v.round() as i32),
            };
            block.ulx = geom.ulx;
            block.uly = geom.uly;
            level_shift_inverse(&mut block.data, info.bit_depth, info.signed);
            block
        })
        .collect();
    log::debug!("{}tile {}: decoded {} packets", ctx.prefix(), t, packets.len());
    Ok(samples)
}

/// Decodes independent tiles, in parallel with the `rayon` feature. A failure
/// only affects its own tile.
pub fn decode_tiles(
    specs: &DecoderSpecs,
    tiles: &[(TileGeometry, Vec<Packet>)],
    ctx: &CodecContext,
) -> Vec<Result<Vec<DataBlock<i32>>>> {
    let decode = |(geometry, packets): &(TileGeometry, Vec<Packet>)| {
        let result = decode_tile(&specs.clone(), geometry, packets, ctx);
        if let Err(e) = &result {
            log::warn!("{}tile {}: {}", ctx.prefix(), geometry.index, e);
        }
        result
    };
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        tiles.par_iter().map(decode).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        tiles.iter().map(decode).collect()
    }
}
