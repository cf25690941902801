//! Taxon to sample-property association tests
//!
//! Tests whether the taxa of one network track a sample property. Numeric
//! properties use Spearman rank correlation between the property and each
//! taxon's abundance; categorical properties use a hypergeometric test for
//! over-representation of the taxon in samples carrying each value.
//!
//! Only the network's own samples and observations count, and a taxon with
//! no observation in a sample has abundance zero there. Results are a
//! derived view; nothing is written back.

use super::types::NetworkRef;
use crate::graph::{NodeId, Observation, Rank, Sample, Taxon};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Options for [`associate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationOptions {
    /// Sample metadata key to test
    pub property: String,
    /// Report results with p below this
    pub alpha: f64,
    /// Metadata value meaning "missing"
    pub null_value: String,
}

impl AssociationOptions {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            alpha: 0.05,
            null_value: "NA".to_string(),
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_null_value(mut self, null_value: impl Into<String>) -> Self {
        self.null_value = null_value.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.property.trim().is_empty() {
            return Err("property name is empty".to_string());
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(format!("alpha must be in (0, 1], got {}", self.alpha));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyTest {
    Spearman,
    Hypergeometric,
}

/// A taxon significantly associated with a property (or one of its values)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyAssociation {
    pub taxon: NodeId,
    pub taxon_name: String,
    pub rank: Rank,
    pub test: PropertyTest,
    /// The category tested, for categorical properties
    pub value: Option<String>,
    /// Spearman's rho, or the number of the taxon's samples with `value`
    pub statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationTable {
    pub network: NetworkRef,
    pub property: String,
    /// Samples with a non-missing value for the property
    pub samples_tested: usize,
    pub numeric: bool,
    /// Sorted by p-value
    pub associations: Vec<PropertyAssociation>,
}

/// Test every taxon of a network against one sample property
pub fn associate(
    network: NetworkRef,
    taxa: &[Taxon],
    samples: &[Sample],
    observations: &[Observation],
    options: &AssociationOptions,
) -> AssociationTable {
    let null_value = options.null_value.trim();
    let values: Vec<(&NodeId, &str)> = samples
        .iter()
        .filter_map(|s| s.metadata.get(&options.property).map(|v| (&s.id, v.trim())))
        .filter(|(_, v)| !v.is_empty() && *v != null_value)
        .collect();

    // Numeric only if every value is
    let numbers: Option<Vec<f64>> = values
        .iter()
        .map(|(_, v)| v.parse::<f64>().ok().filter(|x| x.is_finite()))
        .collect();

    let mut abundance: HashMap<(&NodeId, &NodeId), f64> = HashMap::new();
    for obs in observations {
        *abundance.entry((&obs.taxon_id, &obs.sample_id)).or_insert(0.0) += obs.abundance;
    }
    let abundance_of = |taxon: &NodeId, sample: &NodeId| abundance.get(&(taxon, sample)).copied().unwrap_or(0.0);

    let mut associations = Vec::new();
    match &numbers {
        Some(numbers) if numbers.len() >= 3 => {
            for taxon in taxa {
                let counts: Vec<f64> = values.iter().map(|(s, _)| abundance_of(&taxon.id, *s)).collect();
                let Some(rho) = spearman(&counts, numbers) else { continue };
                let p_value = correlation_p_value(rho, numbers.len());
                if p_value < options.alpha {
                    associations.push(PropertyAssociation {
                        taxon: taxon.id.clone(),
                        taxon_name: taxon.name.clone(),
                        rank: taxon.rank,
                        test: PropertyTest::Spearman,
                        value: None,
                        statistic: rho,
                        p_value,
                    });
                }
            }
        }
        Some(_) => {}
        None => {
            let mut categories: BTreeMap<&str, usize> = BTreeMap::new();
            for (_, v) in &values {
                *categories.entry(*v).or_insert(0) += 1;
            }
            let population = values.len() as u64;

            for taxon in taxa {
                let present: Vec<&str> = values
                    .iter()
                    .filter(|(s, _)| abundance_of(&taxon.id, *s) > 0.0)
                    .map(|(_, v)| *v)
                    .collect();
                for (category, &successes) in &categories {
                    let hits = present.iter().filter(|v| *v == category).count() as u64;
                    if hits == 0 {
                        continue;
                    }
                    let p_value = hypergeom_upper_tail(hits, population, successes as u64, present.len() as u64);
                    if p_value < options.alpha {
                        associations.push(PropertyAssociation {
                            taxon: taxon.id.clone(),
                            taxon_name: taxon.name.clone(),
                            rank: taxon.rank,
                            test: PropertyTest::Hypergeometric,
                            value: Some(category.to_string()),
                            statistic: hits as f64,
                            p_value,
                        });
                    }
                }
            }
        }
    }

    associations.sort_by(|a, b| {
        a.p_value
            .total_cmp(&b.p_value)
            .then_with(|| a.taxon_name.cmp(&b.taxon_name))
            .then_with(|| a.value.cmp(&b.value))
    });

    AssociationTable {
        network,
        property: options.property.clone(),
        samples_tested: values.len(),
        numeric: numbers.is_some(),
        associations,
    }
}

// === Statistics ===

/// Ranks starting at 1, ties sharing their average rank
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let rank = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut denom_x = 0.0;
    let mut denom_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        num += dx * dy;
        denom_x += dx * dx;
        denom_y += dy * dy;
    }

    let denom = (denom_x * denom_y).sqrt();
    if denom < f64::EPSILON {
        None
    } else {
        Some((num / denom).clamp(-1.0, 1.0))
    }
}

/// Spearman's rho; `None` when either side is constant
fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Two-sided p-value of a correlation over `n` pairs, from the t distribution with n-2 df
fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= 0.0 {
        return 0.0;
    }
    let t2 = r * r * df / denom;
    incomplete_beta(df / 2.0, 0.5, df / (df + t2))
}

/// Natural log of the gamma function (Lanczos, g = 7)
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = COEFFICIENTS[0];
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

fn ln_choose(n: u64, k: u64) -> f64 {
    ln_gamma(n as f64 + 1.0) - ln_gamma(k as f64 + 1.0) - ln_gamma((n - k) as f64 + 1.0)
}

/// P(X >= k) for X ~ Hypergeometric(population, successes, draws)
fn hypergeom_upper_tail(k: u64, population: u64, successes: u64, draws: u64) -> f64 {
    let lower = draws.saturating_sub(population - successes);
    let upper = successes.min(draws);
    if k <= lower {
        return 1.0;
    }
    if k > upper {
        return 0.0;
    }
    let denom = ln_choose(population, draws);
    let p: f64 = (k..=upper)
        .map(|i| (ln_choose(successes, i) + ln_choose(population - successes, draws - i) - denom).exp())
        .sum();
    p.min(1.0)
}

/// Regularized incomplete beta function I_x(a, b)
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    if x < (a + 1.0) / (a + b + 2.0) {
        ln_front.exp() * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - ln_front.exp() * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for the incomplete beta (modified Lentz)
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let (qab, qap, qam) = (a + b, a + 1.0, a - 1.0);
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NetworkId, NetworkInfo};
    use crate::provenance::ProvenanceId;
    use chrono::Utc;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    fn network_ref() -> NetworkRef {
        NetworkRef::from(&NetworkInfo {
            id: NetworkId::new(),
            name: "net1".to_string(),
            version: 1,
            created_at: Utc::now(),
            source_path: "net1.tsv".to_string(),
            provenance_id: ProvenanceId::new(),
        })
    }

    fn observation(taxon: &Taxon, sample: &Sample, abundance: f64) -> Observation {
        Observation {
            network_id: NetworkId::from_string("n"),
            sample_id: sample.id.clone(),
            taxon_id: taxon.id.clone(),
            abundance,
        }
    }

    #[test]
    fn ln_gamma_matches_factorials() {
        assert!(close(ln_gamma(1.0), 0.0, 1e-12));
        assert!(close(ln_gamma(5.0), 24f64.ln(), 1e-10));
        assert!(close(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), 1e-10));
    }

    #[test]
    fn incomplete_beta_closed_forms() {
        assert!(close(incomplete_beta(1.0, 1.0, 0.3), 0.3, 1e-10));
        // I_x(1, 3) = 1 - (1 - x)^3
        assert!(close(incomplete_beta(1.0, 3.0, 0.5), 0.875, 1e-10));
        assert!(close(incomplete_beta(3.0, 1.0, 0.8), 0.512, 1e-10));
    }

    #[test]
    fn hypergeometric_tail() {
        // All five draws from the five successes in ten
        assert!(close(hypergeom_upper_tail(5, 10, 5, 5), 1.0 / 252.0, 1e-12));
        assert_eq!(hypergeom_upper_tail(0, 10, 5, 5), 1.0);
        assert_eq!(hypergeom_upper_tail(6, 10, 5, 5), 0.0);
        // P(X >= 1) = 1 - C(5,3)/C(10,3)
        assert!(close(hypergeom_upper_tail(1, 10, 5, 3), 1.0 - 10.0 / 120.0, 1e-12));
    }

    #[test]
    fn ranks_average_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn spearman_of_monotone_series_is_one() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 100.0];
        assert!(close(spearman(&x, &y).unwrap(), 1.0, 1e-12));
        assert!(close(spearman(&x, &[5.0, 4.0, 3.0, 2.0, 1.0]).unwrap(), -1.0, 1e-12));
        assert_eq!(spearman(&x, &[1.0; 5]), None);
    }

    #[test]
    fn correlation_p_value_from_t_distribution() {
        // r = 0.6 over 10 pairs: t = 2.12 on 8 df, two-sided p about 0.067
        let p = correlation_p_value(0.6, 10);
        assert!(p > 0.05 && p < 0.1, "p = {p}");
        assert!(close(correlation_p_value(0.0, 10), 1.0, 1e-12));
        assert_eq!(correlation_p_value(1.0, 10), 0.0);
    }

    #[test]
    fn numeric_property_uses_spearman() {
        let tracker = Taxon::new("Tracker", Rank::Otu);
        let noise = Taxon::new("Noise", Rank::Otu);
        let samples: Vec<Sample> = (0..8)
            .map(|i| Sample::new(format!("S{}", i)).with_metadata("pH", format!("{}.0", i + 4)))
            .collect();
        let mut observations = Vec::new();
        for (i, sample) in samples.iter().enumerate() {
            observations.push(observation(&tracker, sample, (i * i) as f64 + 1.0));
            observations.push(observation(&noise, sample, if i % 2 == 0 { 3.0 } else { 1.0 }));
        }

        let table = associate(
            network_ref(),
            &[tracker.clone(), noise],
            &samples,
            &observations,
            &AssociationOptions::new("pH"),
        );
        assert!(table.numeric);
        assert_eq!(table.samples_tested, 8);
        assert_eq!(table.associations.len(), 1);
        let hit = &table.associations[0];
        assert_eq!(hit.taxon, tracker.id);
        assert_eq!(hit.test, PropertyTest::Spearman);
        assert!(close(hit.statistic, 1.0, 1e-12));
    }

    #[test]
    fn categorical_property_uses_hypergeometric() {
        let gut_only = Taxon::new("GutOnly", Rank::Otu);
        let everywhere = Taxon::new("Everywhere", Rank::Otu);
        let mut samples = Vec::new();
        for i in 0..5 {
            samples.push(Sample::new(format!("G{}", i)).with_metadata("site", "gut"));
            samples.push(Sample::new(format!("K{}", i)).with_metadata("site", "skin"));
        }
        samples.push(Sample::new("X").with_metadata("site", "NA"));

        let mut observations = Vec::new();
        for sample in &samples {
            observations.push(observation(&everywhere, sample, 2.0));
            if sample.identifier.starts_with('G') {
                observations.push(observation(&gut_only, sample, 4.0));
            }
        }

        let table = associate(
            network_ref(),
            &[gut_only.clone(), everywhere],
            &samples,
            &observations,
            &AssociationOptions::new("site"),
        );
        assert!(!table.numeric);
        // The NA sample is left out
        assert_eq!(table.samples_tested, 10);
        assert_eq!(table.associations.len(), 1);
        let hit = &table.associations[0];
        assert_eq!(hit.taxon, gut_only.id);
        assert_eq!(hit.value.as_deref(), Some("gut"));
        assert!(close(hit.p_value, 1.0 / 252.0, 1e-12));
    }

    #[test]
    fn options_are_checked() {
        assert!(AssociationOptions::new("pH").validate().is_ok());
        assert!(AssociationOptions::new(" ").validate().is_err());
        assert!(AssociationOptions::new("pH").with_alpha(0.0).validate().is_err());
    }
}
