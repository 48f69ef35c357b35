use rust_enformer::enformer::{
    get_positional_embed, relative_shift, AbsolutePositionAttention, AttentionType,
    AttentionVariant, EnformerConfig, MultiHeadRelativeAttention,
};
use rust_enformer::EnformerError;
use tch::{nn, Device, Kind, Tensor};

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f64 {
    (a - b).abs().max().double_value(&[])
}

fn small_config() -> EnformerConfig {
    EnformerConfig {
        dim: 16,
        heads: 2,
        dim_key: 4,
        dim_value: Some(6),
        num_rel_pos_features: Some(12),
        output_attentions: Some(true),
        ..Default::default()
    }
}

/// `out[.., i, j] = x[.., i, j - i + L - 1]`, built with an explicit gather.
fn shift_by_gather(x: &Tensor, seq_len: i64) -> Tensor {
    let positions = Tensor::arange(seq_len, (Kind::Int64, Device::Cpu));
    let index = positions.unsqueeze(0) - positions.unsqueeze(1) + (seq_len - 1);
    let mut target_size = x.size();
    let last = target_size.len() - 1;
    target_size[last] = seq_len;
    x.gather(-1, &index.expand(target_size.as_slice(), false), false)
}

#[test]
fn relative_shift_literal_two_positions() -> anyhow::Result<()> {
    // x[0, h, q, j] = 100 h + 10 q + j, offsets j = 0, 1, 2 stand for d = -1, 0, 1
    let values: Vec<f32> = (0..2)
        .flat_map(|h| (0..2).flat_map(move |q| (0..3).map(move |j| (100 * h + 10 * q + j) as f32)))
        .collect();
    let rel_logits = Tensor::from_slice(&values).view([1, 2, 2, 3]);

    let shifted = relative_shift(&rel_logits)?;

    let expected = Tensor::from_slice(&[
        1f32, 2., //   head 0, query 0: d = 0, 1
        10., 11., //   head 0, query 1: d = -1, 0
        101., 102., // head 1, query 0
        110., 111., // head 1, query 1
    ])
    .view([1, 2, 2, 2]);
    assert_eq!(shifted.size(), vec![1, 2, 2, 2]);
    assert!(shifted.equal(&expected));
    Ok(())
}

#[test]
fn relative_shift_output_shape() -> anyhow::Result<()> {
    for seq_len in [1, 2, 3, 4, 7, 16] {
        let rel_logits = Tensor::rand([2, 3, seq_len, 2 * seq_len - 1], (Kind::Float, Device::Cpu));
        let shifted = relative_shift(&rel_logits)?;
        assert_eq!(shifted.size(), vec![2, 3, seq_len, seq_len]);
    }
    Ok(())
}

#[test]
fn relative_shift_selects_offsets_by_key_minus_query() -> anyhow::Result<()> {
    let seq_len = 5;
    let rel_logits = Tensor::randn([2, 3, seq_len, 2 * seq_len - 1], (Kind::Float, Device::Cpu));
    let shifted = relative_shift(&rel_logits)?;
    assert!(shifted.equal(&shift_by_gather(&rel_logits, seq_len)));
    Ok(())
}

#[test]
fn relative_shift_even_padded_input() -> anyhow::Result<()> {
    let seq_len = 6;
    let rel_logits = Tensor::randn([1, 2, seq_len, 2 * seq_len - 1], (Kind::Float, Device::Cpu));
    let padded = Tensor::cat(
        &[
            Tensor::zeros([1, 2, seq_len, 1], (Kind::Float, Device::Cpu)),
            rel_logits.shallow_clone(),
        ],
        -1,
    );
    let shifted = relative_shift(&padded)?;
    assert_eq!(shifted.size(), vec![1, 2, seq_len, seq_len]);
    assert!(shifted.equal(&relative_shift(&rel_logits)?));
    Ok(())
}

#[test]
fn relative_shift_rejects_bad_shapes() {
    let three_d = Tensor::zeros([2, 4, 7], (Kind::Float, Device::Cpu));
    assert!(matches!(
        relative_shift(&three_d),
        Err(EnformerError::ShapeMismatchError(_))
    ));
    let too_wide = Tensor::zeros([1, 1, 3, 9], (Kind::Float, Device::Cpu));
    assert!(matches!(
        relative_shift(&too_wide),
        Err(EnformerError::ShapeMismatchError(_))
    ));
}

#[test]
fn relative_attention_output_shape_and_weights() -> anyhow::Result<()> {
    tch::manual_seed(42);
    let vs = nn::VarStore::new(Device::Cpu);
    let config = small_config();
    let attention = MultiHeadRelativeAttention::new(&vs.root() / "attention", &config)?;

    for seq_len in [1, 5, 12] {
        let input = Tensor::randn([3, seq_len, config.dim], (Kind::Float, Device::Cpu));
        let output = attention.forward_t(&input, false)?;
        assert_eq!(output.hidden_states.size(), vec![3, seq_len, config.dim]);

        let weights = output.attention_weights.expect("attention weights requested");
        assert_eq!(weights.size(), vec![3, config.heads, seq_len, seq_len]);
        assert!(weights.min().double_value(&[]) >= 0.0);
        let row_sums = weights.sum_dim_intlist([-1].as_slice(), false, Kind::Float);
        assert!(max_abs_diff(&row_sums, &row_sums.ones_like()) < 1e-5);
    }
    Ok(())
}

#[test]
fn relative_attention_is_zero_at_init() -> anyhow::Result<()> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let config = small_config();
    let attention = MultiHeadRelativeAttention::new(&vs.root() / "attention", &config)?;

    let input = Tensor::randn([2, 9, config.dim], (Kind::Float, Device::Cpu)) * 10.0;
    for train in [false, true] {
        let output = attention.forward_t(&input, train)?;
        assert_eq!(output.hidden_states.abs().max().double_value(&[]), 0.0);
    }
    Ok(())
}

#[test]
fn relative_attention_weights_without_output_attentions() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let config = EnformerConfig {
        output_attentions: None,
        ..small_config()
    };
    let attention = MultiHeadRelativeAttention::new(vs.root(), &config)?;
    let input = Tensor::randn([1, 4, config.dim], (Kind::Float, Device::Cpu));
    assert!(attention.forward_t(&input, false)?.attention_weights.is_none());
    Ok(())
}

#[test]
fn relative_attention_config_errors() {
    let vs = nn::VarStore::new(Device::Cpu);
    let config = EnformerConfig {
        num_rel_pos_features: Some(8),
        ..small_config()
    };
    assert!(matches!(
        MultiHeadRelativeAttention::new(vs.root(), &config),
        Err(EnformerError::InvalidConfigurationError(_))
    ));

    let config = EnformerConfig {
        dropout: 1.5,
        ..small_config()
    };
    assert!(matches!(
        MultiHeadRelativeAttention::new(vs.root(), &config),
        Err(EnformerError::InvalidConfigurationError(_))
    ));
}

#[test]
fn relative_attention_rejects_wrong_input_width() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let config = small_config();
    let attention = MultiHeadRelativeAttention::new(vs.root(), &config)?;
    let input = Tensor::randn([1, 4, config.dim + 1], (Kind::Float, Device::Cpu));
    assert!(matches!(
        attention.forward_t(&input, false),
        Err(EnformerError::ShapeMismatchError(_))
    ));
    let input = Tensor::randn([4, config.dim], (Kind::Float, Device::Cpu));
    assert!(matches!(
        attention.forward_t(&input, false),
        Err(EnformerError::ShapeMismatchError(_))
    ));
    Ok(())
}

#[test]
fn relative_attention_logits_match_manual_computation() -> anyhow::Result<()> {
    // window of 4 positions, 6 positional features, a single head
    tch::manual_seed(1234);
    let seq_len = 4;
    let vs = nn::VarStore::new(Device::Cpu);
    let config = EnformerConfig {
        dim: 8,
        heads: 1,
        dim_key: 4,
        dim_value: Some(4),
        num_rel_pos_features: Some(6),
        ..Default::default()
    };
    let attention = MultiHeadRelativeAttention::new(&vs.root() / "attention", &config)?;
    let variables = vs.variables();
    let var = |name: &str| variables[&format!("attention.{name}")].shallow_clone();

    let input = Tensor::randn([1, seq_len, config.dim], (Kind::Float, Device::Cpu));
    let scores = tch::no_grad(|| attention.score_t(&input, false))?;

    let to_heads = |t: Tensor| t.view([1, seq_len, 1, 4]).permute([0, 2, 1, 3]);
    let (query, key, expected_content, expected_positional) = tch::no_grad(|| {
        let query = to_heads(input.matmul(&var("to_q.weight").tr())) * 0.5;
        let key = to_heads(input.matmul(&var("to_k.weight").tr()));
        let content = (&query + var("rel_content_bias")).matmul(&key.transpose(-1, -2));

        let basis = get_positional_embed(seq_len, 6, Device::Cpu).unwrap();
        assert_eq!(basis.size(), vec![7, 6]);
        let rel_k = basis.matmul(&var("to_rel_k.weight").tr());
        let raw_positional = (&query + var("rel_pos_bias")).matmul(&rel_k.tr());
        assert_eq!(raw_positional.size(), vec![1, 1, 4, 7]);
        let positional = shift_by_gather(&raw_positional, seq_len);
        (query, key, content, positional)
    });
    assert_eq!(query.size(), key.size());

    let positional_logits = scores.positional_logits.expect("relative attention");
    assert!(max_abs_diff(&scores.content_logits, &expected_content) < 1e-5);
    assert!(max_abs_diff(&positional_logits, &expected_positional) < 1e-5);
    assert!(max_abs_diff(&scores.logits, &(expected_content + expected_positional)) < 1e-5);
    Ok(())
}

#[test]
fn absolute_attention_matches_content_logits_at_init() -> anyhow::Result<()> {
    tch::manual_seed(7);
    let vs = nn::VarStore::new(Device::Cpu);
    let config = EnformerConfig {
        attention_type: AttentionType::absolute,
        input_length: Some(6),
        ..small_config()
    };
    let attention = AbsolutePositionAttention::new(&vs.root() / "attention", &config)?;
    assert!(vs
        .variables()
        .contains_key("attention.pos_embed"));

    let input = Tensor::randn([2, 6, config.dim], (Kind::Float, Device::Cpu));
    let scores = attention.score_t(&input, false)?;
    assert!(scores.positional_logits.is_none());
    assert!(max_abs_diff(&scores.logits, &scores.content_logits) < 1e-6);

    let output = attention.forward_t(&input, false)?;
    assert_eq!(output.hidden_states.size(), vec![2, 6, config.dim]);
    assert_eq!(output.hidden_states.abs().max().double_value(&[]), 0.0);
    let row_sums = output
        .attention_weights
        .expect("attention weights requested")
        .sum_dim_intlist([-1].as_slice(), false, Kind::Float);
    assert!(max_abs_diff(&row_sums, &row_sums.ones_like()) < 1e-5);
    Ok(())
}

#[test]
fn absolute_attention_requires_matching_length() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let config = EnformerConfig {
        attention_type: AttentionType::absolute,
        input_length: Some(6),
        ..small_config()
    };
    let attention = AbsolutePositionAttention::new(vs.root(), &config)?;
    let input = Tensor::randn([1, 5, config.dim], (Kind::Float, Device::Cpu));
    assert!(matches!(
        attention.forward_t(&input, false),
        Err(EnformerError::ShapeMismatchError(_))
    ));

    let config = EnformerConfig {
        attention_type: AttentionType::absolute,
        input_length: None,
        ..small_config()
    };
    assert!(matches!(
        AbsolutePositionAttention::new(vs.root(), &config),
        Err(EnformerError::InvalidConfigurationError(_))
    ));
    Ok(())
}

#[test]
fn attention_variant_follows_configuration() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let relative = AttentionVariant::new(&vs.root() / "relative", &small_config())?;
    assert_eq!(relative.attention_type(), AttentionType::relative);
    assert!(matches!(relative, AttentionVariant::Relative(_)));

    let config = EnformerConfig {
        attention_type: AttentionType::absolute,
        input_length: Some(10),
        ..small_config()
    };
    let absolute = AttentionVariant::new(&vs.root() / "absolute", &config)?;
    assert_eq!(absolute.attention_type(), AttentionType::absolute);

    let input = Tensor::randn([2, 10, config.dim], (Kind::Float, Device::Cpu));
    for variant in [&relative, &absolute] {
        let output = variant.forward_t(&input, false)?;
        assert_eq!(output.hidden_states.size(), vec![2, 10, config.dim]);
        let scores = variant.score_t(&input, false)?;
        assert_eq!(scores.logits.size(), vec![2, config.heads, 10, 10]);
    }
    Ok(())
}
