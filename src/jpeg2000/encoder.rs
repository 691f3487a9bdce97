//! JPEG 2000 tile encoder
//!
//! Runs the tier-1 pipeline on one tile: DC level shift, component transform,
//! wavelet analysis, quantization, code-block coding, then layer allocation and
//! packet assembly in the tile's progression order.

use super::bit_plane_coder::{BlockParams, DistortionModel, EncodedCodeBlock, encode_code_block};
use super::component_transform::{
    ComponentTransform, forward_ict, forward_rct, level_shift_forward, sample_range, split3,
};
use super::packet::{PacketId, PrecinctState, packet_order};
use super::quantization::{BandQuantization, clamp_magnitude, quantize_scalar};
use super::rate_allocator::{PrecinctBlocks, RateAllocator, SlopeSummary};
use super::subband::Subband;
use super::tile::{ComponentGeometry, ComponentLayout, EncodedTile, TileGeometry, TileInput, check_same_geometry};
use super::wavelet::{self, Coefficients};
use crate::context::CodecContext;
use crate::data_block::DataBlock;
use crate::error::{J2kError, Result};
use crate::specs::EncoderSpecs;
use std::collections::HashMap;

// Coded blocks of one precinct, in band order.
struct CodedPrecinct {
    component: u16,
    resolution: u8,
    index: u32,
    state: PrecinctState,
    blocks: Vec<EncodedCodeBlock>,
}

/// Encodes one tile.
pub fn encode_tile(input: &TileInput, specs: &EncoderSpecs, ctx: &CodecContext) -> Result<EncodedTile> {
    let t = input.index;
    specs.validate()?;
    if input.components.len() != specs.num_components() {
        return Err(J2kError::InconsistentGeometry(format!(
            "tile {} has {} components, expected {}",
            t,
            input.components.len(),
            specs.num_components()
        )));
    }
    for c in 0..input.components.len() {
        specs.check_index(t, c)?;
    }
    check_range(input, specs)?;

    let geometry = TileGeometry {
        index: t,
        components: input.components.iter().map(ComponentGeometry::from).collect(),
    };
    let mct = *specs.component_transform.get_tile(t);
    if mct != ComponentTransform::None {
        check_same_geometry(&geometry.components)?;
    }
    let coefficients = transform_components(input, specs, mct);

    let mut precincts = Vec::new();
    let mut quantization = Vec::with_capacity(coefficients.len());
    let mut precinct_counts = Vec::with_capacity(coefficients.len());
    let mut summary = SlopeSummary::default();
    for (c, mut coeffs) in coefficients.into_iter().enumerate() {
        let layout = ComponentLayout::new(
            geometry.components[c],
            *specs.filter.get(t, c),
            *specs.levels.get(t, c),
            *specs.code_block_size.get(t, c),
            specs.precinct_sizes.get(t, c),
        )?;
        wavelet::forward(&mut coeffs, &layout.tree);

        let params = specs.quantization(t, c, &layout.tree)?;
        let levels = layout.tree.num_levels();
        let bit_depth = specs.transform_bit_depth(t, c);
        let options = *specs.coding_options.get(t, c);
        let mut indices = DataBlock::<i32>::new(0, 0, coeffs.width(), coeffs.height());
        let mut bands = HashMap::new();
        let mut clamped = 0;
        for b in layout.tree.leaves() {
            let band = layout.tree.node(b);
            let bq = params.band(band, levels, bit_depth)?;
            clamped += quantize_band(&coeffs, band, &bq, &mut indices);
            bands.insert(b, bq);
        }
        if clamped > 0 {
            log::warn!(
                "{}tile {} component {}: {} quantization indices clamped to the band's magnitude bit-planes",
                ctx.prefix(),
                t,
                c,
                clamped
            );
        }

        let total_blocks: usize = layout
            .resolutions
            .iter()
            .flat_map(|r| &r.precincts)
            .map(|p| p.num_blocks())
            .sum();
        ctx.start("code-blocks", total_blocks);
        let mut done = 0;
        let mut component_summary = SlopeSummary::default();
        for resolution in &layout.resolutions {
            for precinct in &resolution.precincts {
                let mut blocks = Vec::with_capacity(precinct.num_blocks());
                for geom in precinct.bands.iter().flat_map(|pb| &pb.blocks) {
                    let band = layout.tree.node(geom.band);
                    let bq = &bands[&geom.band];
                    let block_params = BlockParams {
                        orientation: band.orientation,
                        magnitude_bits: bq.magnitude_bits,
                        options,
                    };
                    let scale = f64::from(bq.delta) * band.l2_norm;
                    let model = DistortionModel {
                        weight: scale * scale,
                        reversible: bq.reversible,
                    };
                    let view = indices.view(geom.x, geom.y, geom.w, geom.h);
                    let coded = encode_code_block(&view, &block_params, model)?;
                    component_summary.add(&coded.hull());
                    blocks.push(coded);
                    done += 1;
                    ctx.update("code-blocks", done);
                }
                let refs: Vec<&EncodedCodeBlock> = blocks.iter().collect();
                let state = PrecinctState::for_encoder(precinct, &refs);
                precincts.push(CodedPrecinct {
                    component: c as u16,
                    resolution: precinct.resolution,
                    index: precinct.index,
                    state,
                    blocks,
                });
            }
        }
        ctx.finish("code-blocks");
        log::debug!(
            "{}tile {} component {}: {} code-blocks, {} coded bytes",
            ctx.prefix(),
            t,
            c,
            total_blocks,
            component_summary.total_bytes()
        );
        summary.merge(&component_summary);
        quantization.push(params);
        precinct_counts.push(layout.precinct_counts());
    }

    let layers = specs.layers.get_tile(t);
    let markers = *specs.markers.get_tile(t);
    let allocator = RateAllocator::new(
        precincts
            .iter()
            .map(|p| PrecinctBlocks {
                component: p.component,
                resolution: p.resolution,
                precinct: p.index,
                state: p.state.clone(),
                blocks: p.blocks.iter().collect(),
            })
            .collect(),
        markers,
    );
    let (outcomes, mut packets) = allocator.run(layers, &summary, ctx);

    let order = packet_order(*specs.progression.get_tile(t), layers.len() as u16, &precinct_counts);
    let position: HashMap<PacketId, usize> = order.iter().enumerate().map(|(k, id)| (*id, k)).collect();
    packets.sort_by_key(|p| p.id.and_then(|id| position.get(&id).copied()).unwrap_or(usize::MAX));

    log::debug!(
        "{}tile {}: {} packets, {} bytes",
        ctx.prefix(),
        t,
        packets.len(),
        outcomes.iter().map(|l| l.bytes).sum::<usize>()
    );
    Ok(EncodedTile {
        geometry,
        layers: outcomes,
        packets,
        quantization,
    })
}

/// Encodes independent tiles, in parallel with the `rayon` feature. Every tile
/// works on its own copy of `specs`.
pub fn encode_tiles(inputs: &[TileInput], specs: &EncoderSpecs, ctx: &CodecContext) -> Result<Vec<EncodedTile>> {
    specs.validate()?;
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        inputs
            .par_iter()
            .map(|input| encode_tile(input, &specs.clone(), ctx))
            .collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        inputs
            .iter()
            .map(|input| encode_tile(input, &specs.clone(), ctx))
            .collect()
    }
}

fn check_range(input: &TileInput, specs: &EncoderSpecs) -> Result<()> {
    for (c, block) in input.components.iter().enumerate() {
        let info = specs.components[c];
        let (min, max) = sample_range(info.bit_depth, info.signed);
        for y in 0..block.h {
            if let Some(&value) = block.row(y).iter().find(|&&v| v < min || v > max) {
                return Err(J2kError::SampleOutOfRange {
                    component: c,
                    value,
                    bit_depth: info.bit_depth,
                });
            }
        }
    }
    Ok(())
}

// Level shift and component transform, in the representation each
// component's filter works on.
fn transform_components(input: &TileInput, specs: &EncoderSpecs, mct: ComponentTransform) -> Vec<Coefficients> {
    let t = input.index;
    let mut coefficients: Vec<Coefficients> = input
        .components
        .iter()
        .enumerate()
        .map(|(c, block)| {
            let mut packed = block.to_packed();
            let info = specs.components[c];
            level_shift_forward(&mut packed.data, info.bit_depth, info.signed);
            if specs.filter.get(t, c).is_reversible() {
                Coefficients::Int(packed)
            } else {
                Coefficients::Float(packed.map(|v| v as f32))
            }
        })
        .collect();

    match (mct, split3(&mut coefficients)) {
        (
            ComponentTransform::Reversible,
            Some((Coefficients::Int(r), Coefficients::Int(g), Coefficients::Int(b))),
        ) => forward_rct(&mut r.data, &mut g.data, &mut b.data),
        (
            ComponentTransform::Irreversible,
            Some((Coefficients::Float(r), Coefficients::Float(g), Coefficients::Float(b))),
        ) => forward_ict(&mut r.data, &mut g.data, &mut b.data),
        _ => {}
    }
    coefficients
}

// Quantizes the coefficients of `band` into `out`. Returns how many indices
// had to be clamped.
fn quantize_band(coeffs: &Coefficients, band: &Subband, bq: &BandQuantization, out: &mut DataBlock<i32>) -> usize {
    let mut clamped = 0;
    for y in band.uly..band.uly + band.h {
        for x in band.ulx..band.ulx + band.w {
            let q = match coeffs {
                Coefficients::Int(block) if bq.reversible => block.get(x, y),
                Coefficients::Int(block) => quantize_scalar(block.get(x, y) as f32, bq.delta),
                Coefficients::Float(block) => quantize_scalar(block.get(x, y), bq.delta),
            };
            let (q, changed) = clamp_magnitude(q, bq.magnitude_bits);
            clamped += usize::from(changed);
            out.set(x, y, q);
        }
    }
    clamped
}
