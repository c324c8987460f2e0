//! Integration tests for the ML module

use super::*;
use crate::ml::boosting::BoostingParams;
use crate::ml::forest::ForestParams;
use crate::ml::neural::NeuralParams;
use crate::ml::tree::MaxFeatures;

fn fast_models(members: Vec<ModelKind>) -> ModelsConfig {
    ModelsConfig {
        members,
        random_forest: ForestParams {
            n_estimators: 20,
            max_depth: 8,
            max_features: MaxFeatures::All,
            ..ForestParams::default()
        },
        gradient_boosting: BoostingParams {
            n_estimators: 60,
            max_depth: 4,
            ..BoostingParams::default()
        },
        neural_network: NeuralParams {
            hidden_layers: vec![16],
            max_epochs: 30,
            learning_rate: 0.005,
            ..NeuralParams::default()
        },
    }
}

fn samples(n: usize) -> Vec<TrainingSample> {
    SyntheticGenerator::new(SyntheticConfig::default(), 0.3).generate(n, 42)
}

#[test]
fn test_full_training_pipeline() {
    let data = samples(1500);
    let trainer = EnsembleTrainer::new(fast_models(ModelKind::ALL.to_vec()))
        .with_split(0.2, 42)
        .with_cv_folds(3);
    let outcome = trainer.train(&data).unwrap();

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.model_set.kinds(), ModelKind::ALL.to_vec());
    assert_eq!(outcome.metrics.len(), 3);

    let meta = &outcome.model_set.metadata;
    assert!(meta.is_trained);
    assert!(meta.is_compatible());
    assert_eq!(meta.sample_count, 1500);
    assert_eq!(meta.members, ModelKind::ALL.to_vec());

    let best = meta.best_model_name.unwrap();
    let best_r2 = outcome.metrics[&best].test_r2;
    assert!(outcome.metrics.values().all(|m| m.test_r2 <= best_r2));

    let rf = &outcome.metrics[&ModelKind::RandomForest];
    assert!(rf.test_r2 > 0.5, "random forest test R² = {}", rf.test_r2);
    assert_eq!(rf.train_samples, 1200);
    assert_eq!(rf.test_samples, 300);
    assert!(rf.cv_r2_mean.is_some() && rf.cv_r2_std.is_some());
    assert!(rf.epochs_trained.is_none());

    let importance = rf.feature_importance.as_ref().unwrap();
    assert_eq!(importance.len(), FEATURE_COUNT);
    assert!((importance.values().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!(importance["volatility"] > importance["market_cap"]);

    let nn = &outcome.metrics[&ModelKind::NeuralNetwork];
    assert!(nn.cv_r2_mean.is_none());
    assert!(nn.feature_importance.is_none());
    let epochs = nn.epochs_trained.unwrap();
    assert!((1..=30).contains(&epochs));
}

#[test]
fn test_predict_all_reports_every_member() {
    let data = samples(800);
    let outcome = EnsembleTrainer::new(fast_models(vec![ModelKind::GradientBoosting, ModelKind::RandomForest]))
        .with_cv_folds(0)
        .train(&data)
        .unwrap();

    let (predictions, failures) = outcome.model_set.predict_all(&data[10].features);
    assert!(failures.is_empty());
    assert_eq!(predictions.len(), 2);
    for value in predictions.values() {
        assert!(value.is_finite());
        assert!(*value > 0.0 && *value < 1.5);
    }

    // Insertion order is kept in the set and the metadata
    assert_eq!(
        outcome.model_set.metadata.members,
        vec![ModelKind::GradientBoosting, ModelKind::RandomForest]
    );
}

#[test]
fn test_scalers_fit_on_training_partition_only() {
    let data = samples(500);
    let outcome = EnsembleTrainer::new(fast_models(vec![ModelKind::RandomForest]))
        .with_split(0.2, 7)
        .with_cv_folds(0)
        .train(&data)
        .unwrap();

    let (train_idx, _) = metrics::train_test_split(data.len(), 0.2, 7).unwrap();
    let mut volatility: Vec<f64> = train_idx.iter().map(|&i| data[i].features.volatility).collect();
    volatility.sort_by(|a, b| a.total_cmp(b));
    let mid = volatility.len() / 2;
    let median = (volatility[mid - 1] + volatility[mid]) / 2.0;

    let member = outcome.model_set.member(ModelKind::RandomForest).unwrap();
    let FeatureScaler::Robust { center, .. } = &member.scaler else {
        panic!("tree members use the robust scaler");
    };
    assert!((center[0] - median).abs() < 1e-12);
}

#[test]
fn test_failing_member_is_omitted() {
    let mut models = fast_models(vec![ModelKind::RandomForest, ModelKind::GradientBoosting]);
    models.random_forest.n_estimators = 0;

    let outcome = EnsembleTrainer::new(models).with_cv_folds(0).train(&samples(300)).unwrap();
    assert_eq!(outcome.model_set.kinds(), vec![ModelKind::GradientBoosting]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].kind, ModelKind::RandomForest);
    assert_eq!(outcome.model_set.best_model(), Some(ModelKind::GradientBoosting));
}

#[test]
fn test_all_members_failing_is_an_error() {
    let mut models = fast_models(vec![ModelKind::RandomForest]);
    models.random_forest.n_estimators = 0;
    let err = EnsembleTrainer::new(models).train(&samples(100)).unwrap_err();
    assert!(matches!(err, crate::error::EngineError::NoMembersTrained));
}

#[test]
fn test_trained_forest_tracks_oracle() {
    let data = samples(2000);
    let outcome = EnsembleTrainer::new(fast_models(vec![ModelKind::RandomForest]))
        .with_cv_folds(0)
        .train(&data)
        .unwrap();
    let member = outcome.model_set.member(ModelKind::RandomForest).unwrap();

    let calm = FeatureVector {
        volatility: 1.0,
        volume_24h: 9e8,
        market_cap: 1.5e10,
        gas_price_gwei: 18.0,
        liquidity_score: 6.0,
        hour_of_day: 3.0,
        day_of_week: 2.0,
        volume_ma_7d: 9e8 * 0.92,
        volatility_ma_7d: 1.08,
        volume_ratio: 1.0 / 0.92,
        gas_trend: (18.0 - 28.0) / 372.0,
        ..Default::default()
    };
    let predicted = member.predict(&calm).unwrap();
    let target = optimal_fee(&calm, 0.3);
    assert!((predicted - target).abs() < 0.05, "predicted {predicted}, oracle {target}");
}
