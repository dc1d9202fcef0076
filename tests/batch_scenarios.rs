use approx::assert_relative_eq;

use qmra_mc::{
    BatchConfig, BatchScenarioRunner, Compliance, ConcentrationSource, ConcentrationTable,
    DilutionMode, DilutionTable, DoseResponseModel, ModelKind, PathogenParameterStore,
    PathogenRecord, QmraError, ScenarioRecord, SeedPolicy,
};
use qmra_mc::pathogens::DoseResponseParameters;

fn config() -> BatchConfig {
    BatchConfig {
        default_iterations: 2_000,
        ..BatchConfig::default()
    }
}

fn store() -> PathogenParameterStore {
    let mut store = PathogenParameterStore::builtin();
    store
        .insert(PathogenRecord {
            name: "test_exponential".into(),
            dose_response_models: vec![DoseResponseParameters::new(
                DoseResponseModel::exponential(0.04).unwrap(),
            )],
            illness_to_infection_ratio: 0.5,
            dalys_per_case: 0.01,
            exposure_routes: vec!["ingestion".into()],
        })
        .unwrap();
    store
}

fn tables() -> (DilutionTable, ConcentrationTable) {
    let mut dilutions = DilutionTable::new();
    dilutions.push("outfall", 100.0).unwrap();
    for d in [50.0, 120.0, 300.0, 800.0, 2000.0] {
        dilutions.push("estuary", d).unwrap();
    }

    let mut concentrations = ConcentrationTable::new();
    concentrations.insert(
        "test_exponential",
        ConcentrationSource::Fixed {
            concentration: 1.0e6,
            cv: 0.0,
        },
    );
    concentrations.insert(
        "norovirus",
        ConcentrationSource::HockeyStick {
            x_min: 10.0,
            x_median: 100.0,
            x_max: 10_000.0,
            percentile: 95.0,
        },
    );
    (dilutions, concentrations)
}

fn runner(config: BatchConfig) -> BatchScenarioRunner {
    let (dilutions, concentrations) = tables();
    BatchScenarioRunner::new(config, store())
        .with_dilutions(dilutions)
        .with_concentrations(concentrations)
}

fn saturated_scenario(id: &str) -> ScenarioRecord {
    ScenarioRecord::new(id, "test_exponential", 50.0, 20.0)
        .with_location("outfall")
        .with_population(1_000)
}

#[test]
fn saturated_exposure_is_non_compliant() {
    let config = BatchConfig {
        volume_variability: 0.0,
        ..config()
    };
    let outcome = runner(config).run(&[saturated_scenario("E2E")]).unwrap();
    assert!(outcome.failures.is_empty());

    let result = &outcome.results[0];
    // dose = 1e6 / 100 * 50 / 1000 = 500
    let p_event = 1.0 - (-0.04_f64 * 500.0).exp();
    assert_relative_eq!(result.infection.median, p_event, max_relative = 1e-9);
    assert_relative_eq!(result.annual_risk_median, 1.0, epsilon = 1e-6);
    assert_relative_eq!(result.illness.median, 0.5 * p_event, max_relative = 1e-9);
    assert_eq!(result.population_impact, 1_000);
    assert_eq!(result.model, ModelKind::Exponential);
    assert_eq!(result.compliance, Compliance::NonCompliant);
}

#[test]
fn unresolvable_location_fails_only_that_scenario() {
    let scenarios = vec![
        saturated_scenario("A"),
        saturated_scenario("B").with_location("nowhere"),
        saturated_scenario("C"),
    ];
    let outcome = runner(config()).run(&scenarios).unwrap();

    let ids: Vec<_> = outcome.results.iter().map(|r| r.scenario_id.as_str()).collect();
    assert_eq!(ids, ["A", "C"]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].index, 1);
    assert_eq!(outcome.failures[0].scenario_id, "B");
    assert!(matches!(
        outcome.failures[0].error,
        QmraError::ScenarioResolution { .. }
    ));

    let summary = outcome.summary();
    assert_eq!((summary.total, summary.errored), (3, 1));
}

#[test]
fn location_lookup_ignores_case() {
    let scenario = saturated_scenario("case").with_location("Outfall");
    let outcome = runner(config()).run(&[scenario]).unwrap();
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.results[0].location.as_deref(), Some("Outfall"));
}

#[test]
fn fail_fast_emits_no_rows() {
    let scenarios = vec![
        saturated_scenario("A"),
        ScenarioRecord::new("B", "unknown_pathogen", 50.0, 1.0),
        saturated_scenario("C"),
    ];
    for parallel in [false, true] {
        let config = BatchConfig {
            fail_fast: true,
            parallel,
            ..config()
        };
        match runner(config).run(&scenarios) {
            Err(QmraError::ScenarioResolution { scenario_id, .. }) => assert_eq!(scenario_id, "B"),
            other => panic!("expected resolution error, got {other:?}"),
        }
    }
}

#[test]
fn parallel_run_matches_sequential_order_and_values() {
    let scenarios: Vec<_> = (0..6)
        .map(|i| {
            ScenarioRecord::new(format!("S{i}"), "norovirus", 30.0 + i as f64, 5.0)
                .with_location("estuary")
                .with_treatment(i as f64 * 0.5, 0.2)
        })
        .collect();

    let sequential = runner(config()).run(&scenarios).unwrap();
    let parallel = runner(BatchConfig {
        parallel: true,
        ..config()
    })
    .run(&scenarios)
    .unwrap();

    assert_eq!(sequential.results, parallel.results);
}

#[test]
fn treatment_reduces_risk() {
    let untreated = ScenarioRecord::new("raw", "norovirus", 50.0, 10.0).with_location("estuary");
    let treated = untreated.clone().with_treatment(3.0, 0.0);
    let outcome = runner(config()).run(&[untreated, treated]).unwrap();
    assert!(outcome.results[1].infection.median < outcome.results[0].infection.median);
    assert!(outcome.results[1].annual_risk_p95 <= outcome.results[0].annual_risk_p95);
}

#[test]
fn missing_location_means_undiluted() {
    let undiluted = ScenarioRecord::new("u", "norovirus", 50.0, 1.0);
    let diluted = undiluted.clone().with_location("estuary");
    let outcome = runner(config()).run(&[undiluted, diluted]).unwrap();
    assert!(outcome.results[0].infection.median > outcome.results[1].infection.median);
    assert_eq!(outcome.results[0].annual_risk_median, outcome.results[0].infection.median);
}

#[test]
fn seed_policy_and_dilution_mode_are_honoured() {
    let scenarios = vec![
        ScenarioRecord::new("x", "norovirus", 50.0, 1.0).with_location("estuary"),
        ScenarioRecord::new("y", "norovirus", 50.0, 1.0).with_location("estuary"),
    ];

    let fixed = runner(config()).run(&scenarios).unwrap();
    assert_eq!(fixed.results[0].infection.median, fixed.results[1].infection.median);

    let per_scenario = runner(BatchConfig {
        seed_policy: SeedPolicy::PerScenario,
        ..config()
    })
    .run(&scenarios)
    .unwrap();
    assert_ne!(per_scenario.results[0].seed, per_scenario.results[1].seed);
    assert_ne!(
        per_scenario.results[0].infection.median,
        per_scenario.results[1].infection.median
    );

    let median_only = runner(BatchConfig {
        dilution_mode: DilutionMode::MedianOnly,
        median_dilution_cv: 0.0,
        ..config()
    })
    .run(&scenarios)
    .unwrap();
    assert!(median_only.results[0].infection.median.is_finite());
}

#[test]
fn ranking_leaves_canonical_order_untouched() {
    let scenarios = vec![
        ScenarioRecord::new("low", "norovirus", 50.0, 1.0)
            .with_location("estuary")
            .with_treatment(4.0, 0.0),
        saturated_scenario("high"),
    ];
    let outcome = runner(config()).run(&scenarios).unwrap();
    let ranked = outcome.ranked_by_annual_risk();
    assert_eq!(ranked[0].scenario_id, "high");
    assert_eq!(outcome.results[0].scenario_id, "low");
}

#[test]
fn configured_percentiles_and_statistics_reach_the_row() {
    let config = BatchConfig {
        percentiles: vec![2.5, 97.5],
        ..config()
    };
    let scenario = ScenarioRecord::new("pct", "norovirus", 50.0, 4.0).with_location("estuary");
    let outcome = runner(config).run(&[scenario]).unwrap();
    let result = &outcome.results[0];

    let reported: Vec<f64> = result.infection.percentiles.iter().map(|&(p, _)| p).collect();
    assert_eq!(
        reported,
        [1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 97.5, 99.0]
    );
    let (lo, hi) = (result.infection.percentile(2.5), result.infection.percentile(97.5));
    assert!(result.infection.min <= lo && lo <= result.infection.median);
    assert!(result.infection.median <= hi && hi <= result.infection.max);
    assert!(result.infection.std >= 0.0);
    assert_relative_eq!(
        result.illness.percentile(97.5),
        0.6 * hi,
        max_relative = 1e-12
    );

    let header = result.csv_header();
    let record = result.csv_record();
    assert_eq!(header.len(), record.len());
    for column in ["infection_p2.5", "infection_p97.5", "illness_p97.5", "infection_std", "illness_kurtosis"] {
        assert!(header.iter().any(|h| h == column), "missing {column}");
    }
    let at = header.iter().position(|h| h == "infection_p97.5").unwrap();
    assert_eq!(record[at].parse::<f64>().unwrap(), hi);
}
