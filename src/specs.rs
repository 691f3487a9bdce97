//! Coding parameters indexed by tile and component.
//!
//! Every parameter lives in a [`ModuleSpec`], which resolves a value for a
//! `(tile, component)` pair from, in increasing precedence, the default, the
//! component default, the tile default and the tile-component override. All
//! tables are owned: cloning a spec set gives a fully independent copy that
//! can be handed to another thread or a trial encode.

use crate::constants::{
    DEFAULT_BASE_STEP, DEFAULT_DECOMPOSITION_LEVELS, DEFAULT_GUARD_BITS, MAX_BIT_DEPTH,
    MAX_DECOMPOSITION_LEVELS, MIN_BIT_DEPTH,
};
use crate::error::{J2kError, Result};
use crate::jpeg2000::bit_plane_coder::CodingOptions;
use crate::jpeg2000::codeblock::{CodeBlockSize, PrecinctSizes};
use crate::jpeg2000::component_transform::ComponentTransform;
use crate::jpeg2000::dwt::FilterKind;
use crate::jpeg2000::packet::{MarkerFlags, ProgressionOrder};
use crate::jpeg2000::quantization::{QuantizationParams, QuantizationType};
use crate::jpeg2000::rate_allocator::LayerSpec;
use crate::jpeg2000::subband::SubbandTree;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSpec<T> {
    default: T,
    component_defaults: BTreeMap<usize, T>,
    tile_defaults: BTreeMap<usize, T>,
    tile_components: BTreeMap<(usize, usize), T>,
}

impl<T: Clone> ModuleSpec<T> {
    pub fn new(default: T) -> Self {
        Self {
            default,
            component_defaults: BTreeMap::new(),
            tile_defaults: BTreeMap::new(),
            tile_components: BTreeMap::new(),
        }
    }

    pub fn set_default(&mut self, value: T) {
        self.default = value;
    }

    pub fn set_component_default(&mut self, component: usize, value: T) {
        self.component_defaults.insert(component, value);
    }

    pub fn set_tile_default(&mut self, tile: usize, value: T) {
        self.tile_defaults.insert(tile, value);
    }

    pub fn set_tile_component(&mut self, tile: usize, component: usize, value: T) {
        self.tile_components.insert((tile, component), value);
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    pub fn get(&self, tile: usize, component: usize) -> &T {
        self.tile_components
            .get(&(tile, component))
            .or_else(|| self.tile_defaults.get(&tile))
            .or_else(|| self.component_defaults.get(&component))
            .unwrap_or(&self.default)
    }

    /// Value for a tile-wide parameter.
    pub fn get_tile(&self, tile: usize) -> &T {
        self.tile_defaults.get(&tile).unwrap_or(&self.default)
    }

    /// Every value that can be resolved, default first.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        std::iter::once(&self.default)
            .chain(self.component_defaults.values())
            .chain(self.tile_defaults.values())
            .chain(self.tile_components.values())
    }
}

/// Sample format of one image component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub bit_depth: u8,
    pub signed: bool,
}

impl ComponentInfo {
    pub fn new(bit_depth: u8, signed: bool) -> Result<Self> {
        if !(MIN_BIT_DEPTH..=MAX_BIT_DEPTH).contains(&bit_depth) {
            return Err(J2kError::UnsupportedBitDepth(bit_depth));
        }
        Ok(Self { bit_depth, signed })
    }
}

/// Everything the encoder needs, per tile and component.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSpecs {
    pub num_tiles: usize,
    pub components: Vec<ComponentInfo>,
    pub quant_type: ModuleSpec<QuantizationType>,
    pub base_step: ModuleSpec<f32>,
    pub guard_bits: ModuleSpec<u8>,
    pub filter: ModuleSpec<FilterKind>,
    pub levels: ModuleSpec<u8>,
    pub code_block_size: ModuleSpec<CodeBlockSize>,
    pub precinct_sizes: ModuleSpec<PrecinctSizes>,
    pub coding_options: ModuleSpec<CodingOptions>,
    /// Tile-wide.
    pub component_transform: ModuleSpec<ComponentTransform>,
    /// Tile-wide.
    pub layers: ModuleSpec<Vec<LayerSpec>>,
    /// Tile-wide.
    pub progression: ModuleSpec<ProgressionOrder>,
    /// Tile-wide.
    pub markers: ModuleSpec<MarkerFlags>,
}

impl EncoderSpecs {
    /// Lossless defaults: 5/3 filter, reversible quantization, one unbounded layer.
    pub fn new(num_tiles: usize, components: Vec<ComponentInfo>) -> Result<Self> {
        if num_tiles == 0 {
            return Err(J2kError::InvalidArgument("at least one tile is required"));
        }
        if components.is_empty() {
            return Err(J2kError::InvalidArgument("at least one component is required"));
        }
        for c in &components {
            ComponentInfo::new(c.bit_depth, c.signed)?;
        }
        Ok(Self {
            num_tiles,
            components,
            quant_type: ModuleSpec::new(QuantizationType::Reversible),
            base_step: ModuleSpec::new(DEFAULT_BASE_STEP),
            guard_bits: ModuleSpec::new(DEFAULT_GUARD_BITS),
            filter: ModuleSpec::new(FilterKind::Reversible53),
            levels: ModuleSpec::new(DEFAULT_DECOMPOSITION_LEVELS),
            code_block_size: ModuleSpec::new(CodeBlockSize::default()),
            precinct_sizes: ModuleSpec::new(PrecinctSizes::default()),
            coding_options: ModuleSpec::new(CodingOptions::default()),
            component_transform: ModuleSpec::new(ComponentTransform::None),
            layers: ModuleSpec::new(vec![LayerSpec::unbounded()]),
            progression: ModuleSpec::new(ProgressionOrder::Lrcp),
            markers: ModuleSpec::new(MarkerFlags::default()),
        })
    }

    /// Lossy defaults: 9/7 filter with expounded quantization.
    pub fn lossy(num_tiles: usize, components: Vec<ComponentInfo>) -> Result<Self> {
        let mut specs = Self::new(num_tiles, components)?;
        specs.filter.set_default(FilterKind::Irreversible97);
        specs.quant_type.set_default(QuantizationType::Expounded);
        Ok(specs)
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn check_index(&self, tile: usize, component: usize) -> Result<()> {
        if tile >= self.num_tiles {
            return Err(J2kError::InvalidTileIndex(tile));
        }
        if component >= self.components.len() {
            return Err(J2kError::InvalidComponentIndex(component));
        }
        Ok(())
    }

    /// Rejects inconsistent parameter combinations before any pixel work.
    pub fn validate(&self) -> Result<()> {
        for &levels in self.levels.values() {
            if levels > MAX_DECOMPOSITION_LEVELS {
                return Err(J2kError::InvalidDecompositionLevels(levels));
            }
        }
        for &step in self.base_step.values() {
            if !(step.is_finite() && step > 0.0) {
                return Err(J2kError::InvalidBaseStep(step));
            }
        }
        for &guard in self.guard_bits.values() {
            if guard > 7 {
                return Err(J2kError::InvalidArgument("guard bits must be in 0..=7"));
            }
        }
        for layers in self.layers.values() {
            if layers.is_empty() || layers.len() > usize::from(u16::MAX) {
                return Err(J2kError::InvalidLayers("layer count must be in 1..=65535"));
            }
            let budgets: Vec<usize> = layers.iter().map_while(|l| l.max_bytes).collect();
            if layers[budgets.len()..].iter().any(|l| l.max_bytes.is_some()) {
                return Err(J2kError::InvalidLayers("a bounded layer follows an unbounded one"));
            }
            if budgets.windows(2).any(|w| w[1] < w[0]) {
                return Err(J2kError::InvalidLayers("layer budgets must not decrease"));
            }
        }
        for t in 0..self.num_tiles {
            for c in 0..self.components.len() {
                let filter = *self.filter.get(t, c);
                let quant = *self.quant_type.get(t, c);
                if quant == QuantizationType::Reversible && !filter.is_reversible() {
                    return Err(J2kError::InvalidArgument(
                        "reversible quantization requires the 5/3 filter",
                    ));
                }
                let tree = SubbandTree::new(0, 0, 0, 0, *self.levels.get(t, c), filter);
                self.quantization(t, c, &tree)?;
            }
            match self.component_transform.get_tile(t) {
                ComponentTransform::None => {}
                mct => {
                    if self.components.len() < 3 {
                        return Err(J2kError::InvalidArgument(
                            "component transform needs three components",
                        ));
                    }
                    let first = self.components[0];
                    let reversible = *mct == ComponentTransform::Reversible;
                    for c in 0..3 {
                        if self.components[c] != first {
                            return Err(J2kError::InvalidArgument(
                                "component transform needs identical component formats",
                            ));
                        }
                        if self.filter.get(t, c).is_reversible() != reversible {
                            return Err(J2kError::InvalidArgument(
                                "component transform does not match the wavelet filter",
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Nominal range of component `c`'s samples entering the wavelet transform.
    pub fn transform_bit_depth(&self, tile: usize, component: usize) -> u8 {
        self.components[component].bit_depth
            + self.component_transform.get_tile(tile).extra_bits(component)
    }

    /// Quantization table of one tile-component for a `tree` built with the
    /// tile-component's filter and levels.
    pub fn quantization(&self, tile: usize, component: usize, tree: &SubbandTree) -> Result<QuantizationParams> {
        QuantizationParams::for_encoder(
            *self.quant_type.get(tile, component),
            *self.base_step.get(tile, component),
            *self.guard_bits.get(tile, component),
            self.transform_bit_depth(tile, component),
            tree,
        )
    }

    /// The parameters a decoder learns from the codestream headers.
    pub fn decoder_specs(&self) -> Result<DecoderSpecs> {
        self.validate()?;
        let mut quantization = ModuleSpec::new(QuantizationParams::default());
        for t in 0..self.num_tiles {
            for c in 0..self.components.len() {
                // Step sizes only depend on the decomposition structure.
                let tree = SubbandTree::new(0, 0, 0, 0, *self.levels.get(t, c), *self.filter.get(t, c));
                quantization.set_tile_component(t, c, self.quantization(t, c, &tree)?);
            }
        }
        let mut num_layers = ModuleSpec::new(self.layers.default_value().len() as u16);
        for t in 0..self.num_tiles {
            num_layers.set_tile_default(t, self.layers.get_tile(t).len() as u16);
        }
        Ok(DecoderSpecs {
            num_tiles: self.num_tiles,
            components: self.components.clone(),
            quantization,
            filter: self.filter.clone(),
            levels: self.levels.clone(),
            code_block_size: self.code_block_size.clone(),
            precinct_sizes: self.precinct_sizes.clone(),
            coding_options: self.coding_options.clone(),
            component_transform: self.component_transform.clone(),
            num_layers,
            progression: self.progression.clone(),
            markers: self.markers.clone(),
        })
    }
}

/// Everything the decoder needs, per tile and component.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderSpecs {
    pub num_tiles: usize,
    pub components: Vec<ComponentInfo>,
    pub quantization: ModuleSpec<QuantizationParams>,
    pub filter: ModuleSpec<FilterKind>,
    pub levels: ModuleSpec<u8>,
    pub code_block_size: ModuleSpec<CodeBlockSize>,
    pub precinct_sizes: ModuleSpec<PrecinctSizes>,
    pub coding_options: ModuleSpec<CodingOptions>,
    pub component_transform: ModuleSpec<ComponentTransform>,
    pub num_layers: ModuleSpec<u16>,
    pub progression: ModuleSpec<ProgressionOrder>,
    pub markers: ModuleSpec<MarkerFlags>,
}

impl DecoderSpecs {
    pub fn check_index(&self, tile: usize, component: usize) -> Result<()> {
        if tile >= self.num_tiles {
            return Err(J2kError::InvalidTileIndex(tile));
        }
        if component >= self.components.len() {
            return Err(J2kError::InvalidComponentIndex(component));
        }
        Ok(())
    }

    pub fn transform_bit_depth(&self, tile: usize, component: usize) -> u8 {
        self.components[component].bit_depth
            + self.component_transform.get_tile(tile).extra_bits(component)
    }
}
