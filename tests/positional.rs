use rust_enformer::enformer::{
    get_positional_embed, get_positional_features_central_mask,
    get_positional_features_exponential, get_positional_features_gamma,
    get_relative_distances, PositionalBasisEncoder, DEFAULT_MIN_HALF_LIFE, GAMMA_EPS,
};
use rust_enformer::EnformerError;
use tch::{Device, Kind, Tensor};

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f64 {
    (a - b).abs().max().double_value(&[])
}

#[test]
fn positional_embed_shape() -> anyhow::Result<()> {
    for (seq_len, features) in [(1, 6), (2, 6), (4, 6), (7, 12), (16, 48), (33, 192)] {
        let basis = get_positional_embed(seq_len, features, Device::Cpu)?;
        assert_eq!(basis.size(), vec![2 * seq_len - 1, features]);
        assert_eq!(basis.kind(), Kind::Float);
        assert_eq!(basis.isnan().sum(Kind::Int64).int64_value(&[]), 0);
    }
    Ok(())
}

#[test]
fn positional_embed_signed_half_vanishes_at_zero_distance() -> anyhow::Result<()> {
    for (seq_len, features) in [(1, 6), (4, 6), (9, 18)] {
        let basis = get_positional_embed(seq_len, features, Device::Cpu)?;
        let zero_row = basis.get(seq_len - 1);
        let unsigned = zero_row.narrow(0, 0, features / 2);
        let signed = zero_row.narrow(0, features / 2, features / 2);
        assert_eq!(signed.abs().max().double_value(&[]), 0.0);
        assert!(unsigned.abs().max().double_value(&[]) > 0.0);
    }
    Ok(())
}

#[test]
fn positional_embed_symmetries() -> anyhow::Result<()> {
    let (seq_len, features) = (6, 12);
    let basis = get_positional_embed(seq_len, features, Device::Cpu)?;
    let flipped = basis.flip([0]);
    let unsigned = |t: &Tensor| t.narrow(1, 0, features / 2);
    let signed = |t: &Tensor| t.narrow(1, features / 2, features / 2);

    assert!(max_abs_diff(&unsigned(&basis), &unsigned(&flipped)) < 1e-6);
    assert!(max_abs_diff(&signed(&basis), &(-signed(&flipped))) < 1e-6);
    // right of the center, the signed copy equals the unsigned block
    let right = basis.narrow(0, seq_len, seq_len - 1);
    assert!(max_abs_diff(&unsigned(&right), &signed(&right)) < 1e-6);
    Ok(())
}

#[test]
fn positional_embed_rejects_invalid_feature_size() {
    for features in [0, 4, 8, 13, 20] {
        let result = get_positional_embed(4, features, Device::Cpu);
        assert!(matches!(
            result,
            Err(EnformerError::InvalidConfigurationError(_))
        ));
    }
    assert!(matches!(
        PositionalBasisEncoder::new(10),
        Err(EnformerError::InvalidConfigurationError(_))
    ));
}

#[test]
fn positional_encoder_matches_free_function() -> anyhow::Result<()> {
    let encoder = PositionalBasisEncoder::new(18)?;
    assert_eq!(encoder.num_features(), 18);
    let encoded = encoder.encode(5, Device::Cpu)?;
    let expected = get_positional_embed(5, 18, Device::Cpu)?;
    assert!(encoded.equal(&expected));
    Ok(())
}

#[test]
fn relative_distances_are_antisymmetric() {
    for seq_len in [1, 2, 5, 10] {
        let distances = get_relative_distances(seq_len, Device::Cpu);
        assert_eq!(distances.size(), vec![2 * seq_len - 1]);
        assert_eq!(distances.kind(), Kind::Int64);
        assert_eq!(distances.int64_value(&[0]), -(seq_len - 1));
        assert_eq!(distances.int64_value(&[seq_len - 1]), 0);
        for i in 0..(2 * seq_len - 1) {
            assert_eq!(
                distances.int64_value(&[i]),
                -distances.int64_value(&[2 * seq_len - 2 - i])
            );
        }
        if seq_len > 1 {
            let steps = distances.narrow(0, 1, 2 * seq_len - 2) - distances.narrow(0, 0, 2 * seq_len - 2);
            assert_eq!(steps.min().int64_value(&[]), 1);
        }
    }
}

#[test]
fn exponential_features_decay_with_distance() {
    let seq_len = 64;
    let distances = get_relative_distances(seq_len, Device::Cpu);
    let features =
        get_positional_features_exponential(&distances, 4, seq_len, DEFAULT_MIN_HALF_LIFE);
    assert_eq!(features.size(), vec![2 * seq_len - 1, 4]);

    let center = features.get(seq_len - 1);
    assert!(max_abs_diff(&center, &Tensor::ones([4], (Kind::Float, Device::Cpu))) < 1e-6);

    let right = features.narrow(0, seq_len - 1, seq_len);
    let decrements = right.narrow(0, 0, seq_len - 1) - right.narrow(0, 1, seq_len - 1);
    assert!(decrements.min().double_value(&[]) > 0.0);

    // first column has a half life of 2^3 positions
    assert!((features.double_value(&[seq_len - 1 + 8, 0]) - 0.5).abs() < 1e-5);
}

#[test]
fn central_mask_features_literal() {
    let distances = get_relative_distances(4, Device::Cpu);
    let mask = get_positional_features_central_mask(&distances, 3);
    let expected = Tensor::from_slice(&[
        0f32, 0., 1., // d = -3
        0., 1., 1., // d = -2
        0., 1., 1., // d = -1
        1., 1., 1., // d = 0
        0., 1., 1., // d = 1
        0., 1., 1., // d = 2
        0., 0., 1., // d = 3
    ])
    .view([7, 3]);
    assert!(mask.equal(&expected));
}

#[test]
fn gamma_features_rows_peak_at_one() {
    let seq_len = 32;
    let distances = get_relative_distances(seq_len, Device::Cpu);
    let features =
        get_positional_features_gamma(&distances, 4, seq_len, None, None, GAMMA_EPS);
    assert_eq!(features.size(), vec![2 * seq_len - 1, 4]);

    let row_peaks = features.amax([-1].as_slice(), false);
    assert!(max_abs_diff(&row_peaks, &row_peaks.ones_like()) < 1e-6);
    assert!(features.min().double_value(&[]) > 0.0);
    assert!(features.max().double_value(&[]) <= 1.0 + 1e-6);

    // every density vanishes at d = 0, the floor alone is left and the row is all ones
    let zero_row = features.get(seq_len - 1);
    assert!(zero_row.equal(&zero_row.ones_like()));
}

#[test]
fn gamma_features_select_the_closest_mean() {
    let seq_len = 60;
    let distances = get_relative_distances(seq_len, Device::Cpu);
    let features =
        get_positional_features_gamma(&distances, 3, seq_len, Some(4.0), Some(20.0), GAMMA_EPS);
    // means are 20, 40 and 60
    let dominant = features.argmax(-1, false);
    for (distance, column) in [(20i64, 0i64), (-20, 0), (40, 1), (59, 2), (-59, 2)] {
        assert_eq!(
            dominant.int64_value(&[seq_len - 1 + distance]),
            column,
            "distance {distance}"
        );
    }
}
