//! Tile encode/decode round trips

use j2k_core::jpeg2000::bit_plane_coder::CodingOptions;
use j2k_core::jpeg2000::codeblock::{CodeBlockSize, PrecinctSizes};
use j2k_core::jpeg2000::component_transform::ComponentTransform;
use j2k_core::jpeg2000::mq_coder::Termination;
use j2k_core::jpeg2000::packet::ProgressionOrder;
use j2k_core::{
    CodecContext, ComponentInfo, DataBlock, EncoderSpecs, J2kError, TileInput, decode_tile, decode_tiles,
    encode_tile, encode_tiles,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn gray(bit_depth: u8) -> Vec<ComponentInfo> {
    vec![ComponentInfo::new(bit_depth, false).unwrap()]
}

fn noise(rng: &mut StdRng, ulx: u32, uly: u32, w: u32, h: u32, bit_depth: u8) -> DataBlock<i32> {
    let max = (1i32 << bit_depth) - 1;
    let data = (0..w * h).map(|_| rng.random_range(0..=max)).collect();
    DataBlock::from_vec(ulx, uly, w, h, data).unwrap()
}

fn gradient(ulx: u32, uly: u32, w: u32, h: u32) -> DataBlock<i32> {
    let data = (0..h)
        .flat_map(|y| (0..w).map(move |x| ((x * 3 + y * 2) % 256) as i32))
        .collect();
    DataBlock::from_vec(ulx, uly, w, h, data).unwrap()
}

fn roundtrip(specs: &EncoderSpecs, input: &TileInput) -> Vec<DataBlock<i32>> {
    let ctx = CodecContext::new("roundtrip");
    let encoded = encode_tile(input, specs, &ctx).unwrap();
    let dec = specs.decoder_specs().unwrap();
    decode_tile(&dec, &encoded.geometry, &encoded.packets, &ctx).unwrap()
}

fn assert_same(a: &DataBlock<i32>, b: &DataBlock<i32>) {
    assert_eq!((a.ulx, a.uly, a.w, a.h), (b.ulx, b.uly, b.w, b.h));
    for y in 0..a.h {
        assert_eq!(a.row(y), b.row(y), "row {}", y);
    }
}

#[test]
fn test_lossless_sizes_and_phases() {
    let mut rng = StdRng::seed_from_u64(7);
    for &(ulx, uly, w, h) in &[
        (0u32, 0u32, 1u32, 1u32),
        (1, 1, 1, 1),
        (0, 0, 1, 9),
        (3, 0, 7, 1),
        (0, 0, 5, 3),
        (1, 2, 16, 16),
        (5, 7, 33, 17),
        (0, 0, 64, 64),
    ] {
        let mut specs = EncoderSpecs::new(1, gray(8)).unwrap();
        specs.levels.set_default(3);
        specs.code_block_size.set_default(CodeBlockSize::new(16, 16).unwrap());
        let input = TileInput {
            index: 0,
            components: vec![noise(&mut rng, ulx, uly, w, h, 8)],
        };
        let out = roundtrip(&specs, &input);
        assert_same(&out[0], &input.components[0]);
    }
}

#[test]
fn test_lossless_every_coding_option() {
    let mut rng = StdRng::seed_from_u64(11);
    let input = TileInput {
        index: 0,
        components: vec![noise(&mut rng, 2, 1, 24, 20, 10)],
    };
    for bits in 0..32u32 {
        for termination in [
            Termination::NearOptimal,
            Termination::Easy,
            Termination::Predict,
            Termination::Full,
        ] {
            let options = CodingOptions {
                bypass: bits & 1 != 0,
                reset_contexts: bits & 2 != 0,
                terminate_each_pass: bits & 4 != 0,
                causal: bits & 8 != 0,
                segmentation_symbols: bits & 16 != 0,
                termination,
            };
            let mut specs = EncoderSpecs::new(1, gray(10)).unwrap();
            specs.levels.set_default(2);
            specs.code_block_size.set_default(CodeBlockSize::new(8, 8).unwrap());
            specs.coding_options.set_default(options);
            let out = roundtrip(&specs, &input);
            assert_same(&out[0], &input.components[0]);
        }
    }
}

#[test]
fn test_lossless_signed_and_deep_samples() {
    let mut rng = StdRng::seed_from_u64(3);
    let components = vec![
        ComponentInfo::new(12, true).unwrap(),
        ComponentInfo::new(16, false).unwrap(),
        ComponentInfo::new(1, false).unwrap(),
    ];
    let signed: Vec<i32> = (0..20 * 12).map(|_| rng.random_range(-2048..2048)).collect();
    let input = TileInput {
        index: 0,
        components: vec![
            DataBlock::from_vec(0, 0, 20, 12, signed).unwrap(),
            noise(&mut rng, 0, 0, 20, 12, 16),
            noise(&mut rng, 0, 0, 20, 12, 1),
        ],
    };
    let specs = EncoderSpecs::new(1, components).unwrap();
    let out = roundtrip(&specs, &input);
    for (a, b) in out.iter().zip(&input.components) {
        assert_same(a, b);
    }
}

#[test]
fn test_lossless_rct() {
    let mut rng = StdRng::seed_from_u64(5);
    let components: Vec<ComponentInfo> = (0..3).map(|_| ComponentInfo::new(8, false).unwrap()).collect();
    let input = TileInput {
        index: 0,
        components: (0..3).map(|_| noise(&mut rng, 4, 4, 30, 22, 8)).collect(),
    };
    let mut specs = EncoderSpecs::new(1, components).unwrap();
    specs.component_transform.set_default(ComponentTransform::Reversible);
    specs.levels.set_default(4);
    let out = roundtrip(&specs, &input);
    for (a, b) in out.iter().zip(&input.components) {
        assert_same(a, b);
    }
}

fn psnr(a: &DataBlock<i32>, b: &DataBlock<i32>, peak: f64) -> f64 {
    let mut sum = 0f64;
    for y in 0..a.h {
        for (x, y2) in a.row(y).iter().zip(b.row(y)) {
            let d = f64::from(x - y2);
            sum += d * d;
        }
    }
    let mse = sum / f64::from(a.w * a.h);
    if mse == 0.0 {
        f64::INFINITY
    } else {
        10.0 * (peak * peak / mse).log10()
    }
}

#[test]
fn test_lossy_within_bounds() {
    let input = TileInput {
        index: 0,
        components: vec![gradient(0, 0, 48, 40)],
    };
    let mut specs = EncoderSpecs::lossy(1, gray(8)).unwrap();
    specs.levels.set_default(3);
    let out = roundtrip(&specs, &input);
    let quality = psnr(&out[0], &input.components[0], 255.0);
    assert!(quality > 35.0, "PSNR {}", quality);
    let (min, max) = out[0].data.iter().fold((i32::MAX, i32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    assert!(min >= 0 && max <= 255);
}

#[test]
fn test_lossy_ict_and_derived_quantization() {
    let components: Vec<ComponentInfo> = (0..3).map(|_| ComponentInfo::new(8, false).unwrap()).collect();
    let input = TileInput {
        index: 0,
        components: (0..3u32)
            .map(|k| gradient(0, 0, 32, 32).map(|v| (v + 40 * k as i32) % 256))
            .collect(),
    };
    let mut specs = EncoderSpecs::lossy(1, components).unwrap();
    specs.component_transform.set_default(ComponentTransform::Irreversible);
    specs.quant_type.set_default(j2k_core::jpeg2000::quantization::QuantizationType::Derived);
    specs.levels.set_default(2);
    let out = roundtrip(&specs, &input);
    for (a, b) in out.iter().zip(&input.components) {
        let quality = psnr(a, b, 255.0);
        assert!(quality > 30.0, "PSNR {}", quality);
    }
}

#[test]
fn test_every_progression_order() {
    let mut rng = StdRng::seed_from_u64(13);
    let components: Vec<ComponentInfo> = (0..2).map(|_| ComponentInfo::new(8, false).unwrap()).collect();
    let input = TileInput {
        index: 0,
        components: (0..2).map(|_| noise(&mut rng, 0, 0, 40, 36, 8)).collect(),
    };
    let mut sequences = Vec::new();
    for order in [
        ProgressionOrder::Lrcp,
        ProgressionOrder::Rlcp,
        ProgressionOrder::Rpcl,
        ProgressionOrder::Pcrl,
        ProgressionOrder::Cprl,
    ] {
        let mut specs = EncoderSpecs::new(1, components.clone()).unwrap();
        specs.levels.set_default(2);
        specs.precinct_sizes.set_default(PrecinctSizes::new(vec![(4, 4), (5, 5)]).unwrap());
        specs.code_block_size.set_default(CodeBlockSize::new(8, 8).unwrap());
        specs.progression.set_default(order);
        specs.layers.set_default(vec![
            j2k_core::jpeg2000::rate_allocator::LayerSpec::bytes(600, true),
            j2k_core::jpeg2000::rate_allocator::LayerSpec::unbounded(),
        ]);
        let ctx = CodecContext::default();
        let encoded = encode_tile(&input, &specs, &ctx).unwrap();
        let out = decode_tile(&specs.decoder_specs().unwrap(), &encoded.geometry, &encoded.packets, &ctx).unwrap();
        for (a, b) in out.iter().zip(&input.components) {
            assert_same(a, b);
        }
        sequences.push(encoded.packets.iter().map(|p| p.id).collect::<Vec<_>>());
    }
    for k in 1..sequences.len() {
        assert_eq!(sequences[k].len(), sequences[0].len());
        assert_ne!(sequences[k], sequences[0]);
    }
}

#[test]
fn test_tiles_are_independent() {
    let mut rng = StdRng::seed_from_u64(17);
    let inputs: Vec<TileInput> = (0..4)
        .map(|t| TileInput {
            index: t,
            components: vec![noise(&mut rng, (t as u32 % 2) * 16, (t as u32 / 2) * 16, 16, 16, 8)],
        })
        .collect();
    let specs = EncoderSpecs::new(4, gray(8)).unwrap();
    let ctx = CodecContext::new("tiles");
    let encoded = encode_tiles(&inputs, &specs, &ctx).unwrap();
    assert_eq!(encoded.len(), 4);

    let mut streams: Vec<_> = encoded.iter().map(|e| (e.geometry.clone(), e.packets.clone())).collect();
    streams[2].1[0].header.clear();
    let results = decode_tiles(&specs.decoder_specs().unwrap(), &streams, &ctx);
    for (t, result) in results.iter().enumerate() {
        if t == 2 {
            assert_eq!(result.as_ref().unwrap_err(), &J2kError::NeedMoreData);
        } else {
            assert_same(&result.as_ref().unwrap()[0], &inputs[t].components[0]);
        }
    }
}

#[test]
fn test_packets_out_of_order_are_rejected() {
    let mut rng = StdRng::seed_from_u64(19);
    let input = TileInput {
        index: 0,
        components: vec![noise(&mut rng, 0, 0, 32, 32, 8)],
    };
    let mut specs = EncoderSpecs::new(1, gray(8)).unwrap();
    specs.levels.set_default(2);
    let ctx = CodecContext::default();
    let encoded = encode_tile(&input, &specs, &ctx).unwrap();
    let mut packets = encoded.packets.clone();
    packets.swap(0, 1);
    let err = decode_tile(&specs.decoder_specs().unwrap(), &encoded.geometry, &packets, &ctx).unwrap_err();
    assert!(matches!(err, J2kError::PacketOutOfOrder { .. }));
}

#[test]
fn test_truncated_packet_sequence_still_decodes() {
    let input = TileInput {
        index: 0,
        components: vec![gradient(0, 0, 32, 32)],
    };
    let mut specs = EncoderSpecs::new(1, gray(8)).unwrap();
    specs.levels.set_default(2);
    specs.layers.set_default(vec![
        j2k_core::jpeg2000::rate_allocator::LayerSpec::bytes(200, true),
        j2k_core::jpeg2000::rate_allocator::LayerSpec::unbounded(),
    ]);
    let ctx = CodecContext::default();
    let encoded = encode_tile(&input, &specs, &ctx).unwrap();
    let first_layer: Vec<_> = encoded
        .packets
        .iter()
        .take_while(|p| p.id.is_some_and(|id| id.layer == 0))
        .cloned()
        .collect();
    let out = decode_tile(&specs.decoder_specs().unwrap(), &encoded.geometry, &first_layer, &ctx).unwrap();
    assert_eq!((out[0].w, out[0].h), (32, 32));
    assert!(out[0].data.iter().all(|&v| (0..=255).contains(&v)));
}

#[test]
fn test_configuration_errors_before_pixel_work() {
    let input = TileInput {
        index: 0,
        components: vec![DataBlock::from_vec(0, 0, 2, 1, vec![0, 256]).unwrap()],
    };
    let specs = EncoderSpecs::new(1, gray(8)).unwrap();
    let ctx = CodecContext::default();
    assert_eq!(
        encode_tile(&input, &specs, &ctx).unwrap_err(),
        J2kError::SampleOutOfRange {
            component: 0,
            value: 256,
            bit_depth: 8
        }
    );

    let wrong_tile = TileInput {
        index: 1,
        components: vec![gradient(0, 0, 4, 4)],
    };
    assert_eq!(encode_tile(&wrong_tile, &specs, &ctx).unwrap_err(), J2kError::InvalidTileIndex(1));

    let mut deep = EncoderSpecs::new(1, gray(8)).unwrap();
    deep.levels.set_default(40);
    assert!(encode_tiles(&[input], &deep, &ctx).is_err());

    let mut tiny = EncoderSpecs::lossy(1, gray(8)).unwrap();
    tiny.base_step.set_default(1e-12);
    assert!(matches!(tiny.validate(), Err(J2kError::InvalidBaseStep(_))));
    let smooth = TileInput {
        index: 0,
        components: vec![gradient(0, 0, 16, 16)],
    };
    assert!(matches!(encode_tile(&smooth, &tiny, &ctx), Err(J2kError::InvalidBaseStep(_))));
}

#[test]
fn test_random_configurations() {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..12 {
        let w = rng.random_range(1..40);
        let h = rng.random_range(1..40);
        let bit_depth = rng.random_range(2..=12);
        let mut specs = EncoderSpecs::new(1, gray(bit_depth)).unwrap();
        specs.levels.set_default(rng.random_range(0..=4));
        let cb = 1u32 << rng.random_range(2..=5);
        specs.code_block_size.set_default(CodeBlockSize::new(cb, cb).unwrap());
        specs.coding_options.set_default(CodingOptions {
            bypass: rng.random_bool(0.5),
            reset_contexts: rng.random_bool(0.5),
            terminate_each_pass: rng.random_bool(0.3),
            causal: rng.random_bool(0.5),
            segmentation_symbols: rng.random_bool(0.5),
            termination: [Termination::NearOptimal, Termination::Easy, Termination::Predict, Termination::Full]
                [rng.random_range(0..4)],
        });
        let ulx = rng.random_range(0..5);
        let uly = rng.random_range(0..5);
        let input = TileInput {
            index: 0,
            components: vec![noise(&mut rng, ulx, uly, w, h, bit_depth)],
        };
        let out = roundtrip(&specs, &input);
        assert_same(&out[0], &input.components[0]);
    }
}
