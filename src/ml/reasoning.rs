//! Plain-language justification for a recommendation

use std::collections::BTreeMap;

use super::ensemble::ModelKind;
use super::features::FeatureVector;
use super::metrics::mean_std;

/// Member spread below which the models agree
const CONSENSUS_STD: f64 = 0.05;
/// Member spread above which the models disagree
const DISAGREEMENT_STD: f64 = 0.15;

/// Reasons for a recommendation, most general first
pub fn explain(
    features: &FeatureVector,
    predictions: &BTreeMap<ModelKind, f64>,
    final_fee: f64,
    base_fee: f64,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if !predictions.is_empty() {
        let values: Vec<f64> = predictions.values().copied().collect();
        let (_, spread) = mean_std(&values);
        if spread < CONSENSUS_STD {
            reasons.push(format!("Strong model consensus (σ={spread:.3})"));
        } else if spread > DISAGREEMENT_STD {
            reasons.push(format!("Model disagreement detected (σ={spread:.3})"));
        }
    }

    let volatility = features.volatility;
    if volatility > 15.0 {
        reasons.push(format!("Extreme volatility ({volatility:.1}%) increases trading risk"));
    } else if volatility > 8.0 {
        reasons.push(format!("High volatility ({volatility:.1}%) detected"));
    } else if volatility < 2.0 {
        reasons.push(format!("Very stable market conditions ({volatility:.1}% volatility)"));
    }

    if features.volume_ratio > 1.5 {
        reasons.push("Above-average trading volume supports lower fees".to_string());
    } else if features.volume_ratio < 0.7 {
        reasons.push("Below-average volume may increase price impact".to_string());
    }

    let gas = features.gas_price_gwei;
    if gas > 80.0 {
        reasons.push(format!("High network congestion ({gas:.0} GWEI)"));
    } else if gas < 20.0 {
        reasons.push("Low network congestion favors efficient execution".to_string());
    }

    match features.hour_of_day as u32 {
        14..=16 => reasons.push("Peak trading hours may increase volatility".to_string()),
        2..=5 => reasons.push("Low-activity period with reduced liquidity".to_string()),
        _ => {}
    }

    if base_fee > 0.0 {
        let ratio = final_fee / base_fee;
        if ratio > 1.5 {
            reasons.push(format!("Fee {:.0}% above base rate due to market conditions", (ratio - 1.0) * 100.0));
        } else if ratio < 0.8 {
            reasons.push(format!("Fee {:.0}% below base rate due to favorable conditions", (1.0 - ratio) * 100.0));
        }
    }

    reasons
}

/// Join reasons into one sentence list with a trailing period
pub fn render(reasons: &[String]) -> String {
    format!("{}.", reasons.join(". "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm_night() -> FeatureVector {
        FeatureVector {
            volatility: 1.0,
            volume_ratio: 1.0,
            gas_price_gwei: 18.0,
            hour_of_day: 3.0,
            ..Default::default()
        }
    }

    fn agreeing() -> BTreeMap<ModelKind, f64> {
        [(ModelKind::RandomForest, 0.27), (ModelKind::GradientBoosting, 0.28)].into_iter().collect()
    }

    #[test]
    fn test_reason_order() {
        let reasons = explain(&calm_night(), &agreeing(), 0.27, 0.3);
        assert_eq!(reasons.len(), 4);
        assert!(reasons[0].starts_with("Strong model consensus (σ=0.005)"));
        assert_eq!(reasons[1], "Very stable market conditions (1.0% volatility)");
        assert_eq!(reasons[2], "Low network congestion favors efficient execution");
        assert_eq!(reasons[3], "Low-activity period with reduced liquidity");
    }

    #[test]
    fn test_stressed_market() {
        let f = FeatureVector {
            volatility: 22.0,
            volume_ratio: 0.5,
            gas_price_gwei: 150.0,
            hour_of_day: 15.0,
            ..Default::default()
        };
        let preds = [(ModelKind::RandomForest, 0.2), (ModelKind::NeuralNetwork, 0.6)].into_iter().collect();
        let reasons = explain(&f, &preds, 0.6, 0.3);
        assert_eq!(
            reasons,
            vec![
                "Model disagreement detected (σ=0.200)".to_string(),
                "Extreme volatility (22.0%) increases trading risk".to_string(),
                "Below-average volume may increase price impact".to_string(),
                "High network congestion (150 GWEI)".to_string(),
                "Peak trading hours may increase volatility".to_string(),
                "Fee 100% above base rate due to market conditions".to_string(),
            ]
        );
    }

    #[test]
    fn test_fee_below_base() {
        let reasons = explain(&FeatureVector { volatility: 5.0, volume_ratio: 1.0, gas_price_gwei: 30.0, hour_of_day: 10.0, ..Default::default() }, &BTreeMap::new(), 0.15, 0.3);
        assert_eq!(reasons, vec!["Fee 50% below base rate due to favorable conditions".to_string()]);
    }

    #[test]
    fn test_render() {
        let reasons = vec!["A".to_string(), "B".to_string()];
        assert_eq!(render(&reasons), "A. B.");
        assert_eq!(render(&[]), ".");
    }
}
