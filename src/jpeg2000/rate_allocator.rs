//! Post-compression rate-distortion optimization: picks one slope threshold per
//! layer for all code-blocks of a tile and builds the layer's packets.

use crate::context::CodecContext;
use crate::jpeg2000::bit_plane_coder::{EncodedCodeBlock, HullPoint};
use crate::jpeg2000::packet::{MarkerFlags, Packet, PacketId, PrecinctState};
use std::collections::BTreeMap;

const BINS_PER_OCTAVE: f64 = 8.0;

/// Target of one quality layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayerSpec {
    /// Cumulative byte budget of this layer and all below it. `None` includes
    /// every remaining pass.
    pub max_bytes: Option<usize>,
    /// Search the threshold against simulated packets instead of estimating it
    /// from the slope summary.
    pub optimize: bool,
}

impl LayerSpec {
    pub fn unbounded() -> Self {
        Self {
            max_bytes: None,
            optimize: false,
        }
    }

    pub fn bytes(max_bytes: usize, optimize: bool) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            optimize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerOutcome {
    /// Lowest RD slope included in the layer.
    pub threshold: f64,
    /// Bytes of the layer's packets, markers included.
    pub bytes: usize,
    /// No code-block received new passes.
    pub empty: bool,
}

fn bin_of(slope: f64) -> i32 {
    if slope.is_infinite() {
        i32::MAX
    } else {
        (slope.log2() * BINS_PER_OCTAVE).floor().max(f64::from(i32::MIN + 1)) as i32
    }
}

fn bin_floor(bin: i32) -> f64 {
    if bin == i32::MAX {
        f64::INFINITY
    } else {
        (f64::from(bin) / BINS_PER_OCTAVE).exp2() * (1.0 - 1e-9)
    }
}

/// Bytes of coded data per slope bin, gathered while blocks are coded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlopeSummary {
    bins: BTreeMap<i32, usize>,
}

impl SlopeSummary {
    pub fn add(&mut self, hull: &[HullPoint]) {
        let mut last = 0;
        for point in hull {
            *self.bins.entry(bin_of(point.slope)).or_default() += point.length - last;
            last = point.length;
        }
    }

    pub fn merge(&mut self, other: &SlopeSummary) {
        for (&bin, &bytes) in &other.bins {
            *self.bins.entry(bin).or_default() += bytes;
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.bins.values().sum()
    }

    /// Lowest threshold whose included data fits in `budget`; infinite when not
    /// even the steepest bin fits.
    pub fn threshold_for(&self, budget: usize) -> f64 {
        let mut included = 0;
        let mut threshold = f64::INFINITY;
        for (&bin, &bytes) in self.bins.iter().rev() {
            included += bytes;
            if included > budget {
                break;
            }
            threshold = bin_floor(bin);
        }
        threshold
    }
}

/// The coded blocks of one precinct, in band order.
#[derive(Debug, Clone)]
pub struct PrecinctBlocks<'a> {
    pub component: u16,
    pub resolution: u8,
    pub precinct: u32,
    pub state: PrecinctState,
    pub blocks: Vec<&'a EncodedCodeBlock>,
}

pub struct RateAllocator<'a> {
    precincts: Vec<PrecinctBlocks<'a>>,
    hulls: Vec<Vec<Vec<HullPoint>>>,
    sent: Vec<Vec<usize>>,
    markers: MarkerFlags,
    bytes: usize,
    header_bytes: usize,
}

impl<'a> RateAllocator<'a> {
    pub fn new(precincts: Vec<PrecinctBlocks<'a>>, markers: MarkerFlags) -> Self {
        let hulls = precincts
            .iter()
            .map(|p| p.blocks.iter().map(|b| b.hull()).collect())
            .collect();
        let sent = precincts.iter().map(|p| vec![0; p.blocks.len()]).collect();
        Self {
            precincts,
            hulls,
            sent,
            markers,
            bytes: 0,
            header_bytes: 0,
        }
    }

    // Pass counts reaching every hull point with a slope of at least `threshold`.
    fn targets(&self, threshold: f64) -> Vec<Vec<usize>> {
        self.hulls
            .iter()
            .zip(&self.sent)
            .map(|(hulls, sent)| {
                hulls
                    .iter()
                    .zip(sent)
                    .map(|(hull, &prev)| {
                        let reach = hull
                            .iter()
                            .take_while(|p| p.slope >= threshold)
                            .last()
                            .map_or(0, |p| p.passes);
                        reach.max(prev)
                    })
                    .collect()
            })
            .collect()
    }

    fn all_passes(&self) -> Vec<Vec<usize>> {
        self.precincts
            .iter()
            .map(|p| p.blocks.iter().map(|b| b.passes.len()).collect())
            .collect()
    }

    fn empty_layer_cost(&self) -> usize {
        self.precincts.len() * (1 + self.markers.overhead())
    }

    // Bytes the layer's packets would take, from scratch copies of the header state.
    fn layer_cost(&self, layer: u16, targets: &[Vec<usize>]) -> usize {
        self.precincts
            .iter()
            .zip(targets)
            .map(|(p, t)| {
                let mut state = p.state.clone();
                let (header, body, _) = state.encode_packet(layer, &p.blocks, t);
                header.len() + body.len() + self.markers.overhead()
            })
            .sum()
    }

    fn commit(&mut self, layer: u16, targets: &[Vec<usize>]) -> (Vec<Packet>, usize) {
        let mut packets = Vec::with_capacity(self.precincts.len());
        let mut bytes = 0;
        for ((p, t), sent) in self.precincts.iter_mut().zip(targets).zip(&mut self.sent) {
            let (header, body, contributions) = p.state.encode_packet(layer, &p.blocks, t);
            sent.copy_from_slice(t);
            self.header_bytes += header.len() + self.markers.overhead();
            let packet = Packet {
                id: Some(PacketId {
                    layer,
                    resolution: p.resolution,
                    component: p.component,
                    precinct: p.precinct,
                }),
                header,
                body,
                contributions,
            };
            bytes += packet.len(self.markers);
            packets.push(packet);
        }
        self.bytes += bytes;
        (packets, bytes)
    }

    fn candidate_slopes(&self) -> Vec<f64> {
        let mut slopes: Vec<f64> = self
            .hulls
            .iter()
            .flatten()
            .flatten()
            .map(|p| p.slope)
            .collect();
        slopes.sort_by(|a, b| b.total_cmp(a));
        slopes.dedup();
        slopes
    }

    // Lowest candidate slope whose layer fits in `budget`.
    fn search(&self, layer: u16, budget: usize) -> Option<f64> {
        let slopes = self.candidate_slopes();
        let fits = |k: usize| self.layer_cost(layer, &self.targets(slopes[k])) <= budget;
        if slopes.is_empty() || !fits(0) {
            return None;
        }
        let (mut lo, mut hi) = (0, slopes.len());
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if fits(mid) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Some(slopes[lo])
    }

    /// Allocates every layer in turn and returns the outcomes with the packets
    /// of all layers, layer by layer.
    pub fn run(
        mut self,
        layers: &[LayerSpec],
        summary: &SlopeSummary,
        ctx: &CodecContext,
    ) -> (Vec<LayerOutcome>, Vec<Packet>) {
        let mut outcomes = Vec::with_capacity(layers.len());
        let mut packets = Vec::new();
        for (l, spec) in layers.iter().enumerate() {
            let layer = l as u16;
            let (threshold, targets) = match spec.max_bytes {
                None => (0.0, self.all_passes()),
                Some(max) if max < self.bytes + self.empty_layer_cost() => {
                    log::debug!(
                        "{}layer {} budget {} below packet overhead",
                        ctx.prefix(),
                        l,
                        max
                    );
                    (f64::INFINITY, self.sent.clone())
                }
                Some(max) if spec.optimize => {
                    let budget = max - self.bytes;
                    match self.search(layer, budget) {
                        Some(threshold) => (threshold, self.targets(threshold)),
                        None => (f64::INFINITY, self.sent.clone()),
                    }
                }
                Some(max) => {
                    let overhead = self.header_bytes + self.empty_layer_cost();
                    let threshold = summary.threshold_for(max.saturating_sub(overhead));
                    (threshold, self.targets(threshold))
                }
            };
            let empty = targets.iter().flatten().eq(self.sent.iter().flatten());
            let (layer_packets, bytes) = self.commit(layer, &targets);
            log::debug!(
                "{}layer {}: threshold {:e}, {} bytes{}",
                ctx.prefix(),
                l,
                threshold,
                bytes,
                if empty { " (empty)" } else { "" }
            );
            outcomes.push(LayerOutcome {
                threshold,
                bytes,
                empty,
            });
            packets.extend(layer_packets);
        }
        (outcomes, packets)
    }
}
