//! End-to-end tests: graph construction, epoch preparation, training steps
//! and full-sort scoring through the public facade.

use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, VarBuilder, VarMap, SGD};
use lobster::{
    InteractionSet, Lobster, LobsterConfig, ModalityFeatures, Recommender, Trainer,
    TrainingConfig, TripleBatch,
};

fn features(n_items: usize, device: &Device) -> ModalityFeatures {
    ModalityFeatures {
        visual: Tensor::randn(0f32, 1f32, (n_items, 5), device).unwrap(),
        textual: Tensor::randn(0f32, 1f32, (n_items, 7), device).unwrap(),
    }
}

fn toy_interactions() -> InteractionSet {
    InteractionSet::new(
        5,
        6,
        [
            (0, 0),
            (0, 1),
            (1, 1),
            (1, 2),
            (2, 2),
            (2, 3),
            (3, 4),
            (4, 5),
            (4, 0),
        ],
    )
    .unwrap()
}

fn raw_margin(varmap: &VarMap) -> f32 {
    let data = varmap.data().lock().unwrap();
    let users = data["user_embedding"].to_vec2::<f32>().unwrap();
    let items = data["item_embedding"].to_vec2::<f32>().unwrap();
    let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    dot(&users[0], &items[0]) - dot(&users[0], &items[1])
}

#[test]
fn sgd_step_widens_raw_margin() {
    let device = Device::Cpu;
    let mut varmap = VarMap::new();
    let set = InteractionSet::new(2, 2, [(0, 0), (1, 1)]).unwrap();
    let config = LobsterConfig::default()
        .with_embedding_dim(4)
        .with_dropout(0.0)
        .with_layers(0)
        .with_reg_weight(0.0);
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut model = Lobster::new(config, &set, features(2, &device), vb).unwrap();

    // Only the id tables carry signal: no bias, no projected content.
    for (name, shape) in [
        ("factor_u", (4, 4)),
        ("factor_i", (4, 4)),
        ("visual_projection.weight", (4, 5)),
        ("textual_projection.weight", (4, 7)),
    ] {
        varmap
            .set_one(name, Tensor::zeros(shape, DType::F32, &device).unwrap())
            .unwrap();
    }
    for name in ["visual_projection.bias", "textual_projection.bias"] {
        varmap
            .set_one(name, Tensor::zeros(4, DType::F32, &device).unwrap())
            .unwrap();
    }
    let users = Tensor::new(&[[0.5f32, 0.5, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]], &device).unwrap();
    let items = Tensor::new(&[[0.1f32, 0.0, 0.0, 0.0], [0.0, 0.3, 0.0, 0.0]], &device).unwrap();
    varmap.set_one("user_embedding", users).unwrap();
    varmap.set_one("item_embedding", items).unwrap();

    let before = raw_margin(&varmap);
    assert!((before + 0.1).abs() < 1e-6);

    model.pre_epoch_processing().unwrap();
    let batch = TripleBatch::from_triples(&[(0, 0, 1)], &device).unwrap();
    let loss = model.calculate_loss(&batch).unwrap();
    let value: f32 = loss.to_scalar().unwrap();
    assert!(value.is_finite() && value >= 0.0);

    let mut sgd = SGD::new(varmap.all_vars(), 0.1).unwrap();
    sgd.backward_step(&loss).unwrap();

    let after = raw_margin(&varmap);
    assert!(after > before, "margin {before} -> {after}");
}

#[test]
fn full_sort_scores_every_item() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let set = toy_interactions();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = LobsterConfig::default().with_embedding_dim(8).with_layers(2);
    let model = Lobster::new(config, &set, features(6, &device), vb).unwrap();

    let scores = model.full_sort_predict(&[4, 0]).unwrap();
    assert_eq!(scores.dims(), &[2, 6]);
    let values = scores.to_vec2::<f32>().unwrap();
    assert!(values.iter().flatten().all(|v| v.is_finite()));

    // inference ignores edge dropout: same users, same scores
    let again = model.full_sort_predict(&[4, 0]).unwrap().to_vec2::<f32>().unwrap();
    assert_eq!(values, again);
}

#[test]
fn masked_epochs_keep_the_floor_of_retained_edges() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let set = toy_interactions();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = LobsterConfig::default().with_embedding_dim(4).with_dropout(0.5);
    let mut model = Lobster::new(config, &set, features(6, &device), vb).unwrap();

    // floor(9 * 0.5) = 4 edges per epoch, both directions stored
    for _ in 0..4 {
        model.pre_epoch_processing().unwrap();
        let masked = model.masked_adjacency().unwrap();
        assert_eq!(masked.nnz(), 8);
        assert!(masked.source().is_symmetric());
        for (row, col, _) in masked.source().iter() {
            assert!(model.full_adjacency().source().get(row, col).is_some());
        }
    }
}

#[test]
fn trainer_runs_every_epoch() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let set = toy_interactions();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = LobsterConfig::default()
        .with_embedding_dim(8)
        .with_layers(2)
        .with_dropout(0.2);
    let mut model = Lobster::new(config, &set, features(6, &device), vb).unwrap();

    let trainer = Trainer::new(
        TrainingConfig::default()
            .with_epochs(3)
            .with_batch_size(4)
            .with_learning_rate(0.01),
    )
    .unwrap();
    let report = trainer.fit(&mut model, &set, varmap.all_vars()).unwrap();

    assert_eq!(report.loss_history.len(), 3);
    assert!(report.loss_history.iter().all(|l| l.is_finite() && *l >= 0.0));
}
