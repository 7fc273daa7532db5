use anyhow::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tempfile::tempdir;

use idmapper::pipeline::processing::matching::{run_stages, CompositeMatchStage, DirectMatchStage, TargetIndex};
use idmapper::pipeline::processing::{reconcile, IdentifierNormalizer};
use idmapper::pipeline::{
    CancellationFlag, OperationRegistry, OperationServices, ParameterOverrides, PipelineEngine, RunState,
    StepDefinition, StrategyDefinition,
};
use idmapper_core::{ErrorKind, MatchRecord, MatchType};

fn engine() -> Result<PipelineEngine> {
    Ok(PipelineEngine::new(
        Arc::new(OperationRegistry::with_builtin_operations()?),
        OperationServices::default(),
    ))
}

fn step(name: &str, operation: &str, parameters: Value) -> StepDefinition {
    let parameters: Map<String, Value> = match parameters {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    StepDefinition::new(name, operation, parameters)
}

fn strategy(parameters: Value, steps: Vec<StepDefinition>) -> StrategyDefinition {
    StrategyDefinition {
        name: "scenario".to_string(),
        description: String::new(),
        parameters: match parameters {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        steps,
    }
}

#[tokio::test]
async fn test_composite_match_only_after_splitting() -> Result<()> {
    let index = TargetIndex::from_ids(["P002"], IdentifierNormalizer::default());
    let source = IdentifierNormalizer::default().normalize_all(["P001_P002"]);

    let direct_only = run_stages(&[&DirectMatchStage], source.clone(), &index).await?;
    assert!(direct_only.matched.is_empty());
    assert_eq!(direct_only.unmatched.len(), 1);

    let staged = run_stages(&[&DirectMatchStage, &CompositeMatchStage], source, &index).await?;
    assert_eq!(staged.matched.len(), 1);
    let record = &staged.matched[0];
    assert_eq!(record.match_type, MatchType::Composite);
    assert_eq!(record.target_id.as_deref(), Some("P002"));
    assert!(record.confidence >= 0.85 && record.confidence < 0.95);
    assert!(staged.unmatched.is_empty());
    Ok(())
}

#[test]
fn test_two_sources_sharing_a_target_are_not_canonical() -> Result<()> {
    let records = vec![
        MatchRecord::matched("X1", "T1", MatchType::Direct, 1.0, None),
        MatchRecord::matched("X2", "T1", MatchType::Direct, 1.0, None),
    ];
    for record in reconcile(&records)? {
        assert!(record.is_one_to_many_target);
        assert!(!record.is_canonical);
    }
    Ok(())
}

#[test]
fn test_unmatched_source_never_counts_towards_multiplicity() -> Result<()> {
    let records = vec![
        MatchRecord::unmatched("X3"),
        MatchRecord::unmatched("X3"),
        MatchRecord::matched("X4", "T9", MatchType::Direct, 1.0, None),
    ];
    let out = reconcile(&records)?;

    for record in &out[..2] {
        assert!(!record.is_one_to_many_source && !record.is_one_to_many_target && !record.is_canonical);
    }
    assert!(out[2].is_canonical);
    Ok(())
}

#[test]
fn test_canonical_choice_is_unique_per_source() -> Result<()> {
    let records = vec![
        MatchRecord::matched("S1", "T1", MatchType::Composite, 0.85, None),
        MatchRecord::matched("S1", "T1", MatchType::ExternalResolved, 0.95, None),
        MatchRecord::matched("S2", "T2", MatchType::Direct, 1.0, None),
        MatchRecord::matched("S3", "T3", MatchType::Direct, 1.0, None),
        MatchRecord::matched("S3", "T4", MatchType::Direct, 1.0, None),
    ];
    let out = reconcile(&records)?;

    let canonical: Vec<(&str, f64)> = out
        .iter()
        .filter(|r| r.is_canonical)
        .map(|r| (r.record.source_id.as_deref().unwrap_or_default(), r.record.confidence))
        .collect();
    assert_eq!(canonical, vec![("S1", 0.95), ("S2", 1.0)]);
    Ok(())
}

#[tokio::test]
async fn test_optional_step_failure_does_not_stop_the_run() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("in.csv"), "id\nA\nB\n")?;
    let out = dir.path().join("out.csv");

    let strategy = strategy(
        json!({"dir": dir.path().display().to_string()}),
        vec![
            step("load", "load_dataset", json!({"path": "${dir}/in.csv", "output_key": "source"})),
            step(
                "optional_enrich",
                "filter_dataset",
                json!({"input_key": "enrichment", "output_key": "enriched", "column": "id", "operator": "not_null"}),
            )
            .optional(),
            step("export", "export_dataset", json!({"input_key": "source", "path": out.display().to_string()})),
        ],
    );

    let report = engine()?.run(&strategy, &ParameterOverrides::default(), &CancellationFlag::new()).await?;

    assert_eq!(report.state, RunState::Completed);
    assert!(out.exists());
    let failed = report.statistics()["failed_steps"].as_array().cloned().unwrap_or_default();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["step"], json!("optional_enrich"));
    assert_eq!(failed[0]["kind"], json!("context_key"));
    assert_eq!(report.statistics()["steps"]["optional_enrich"]["status"], json!("failed_tolerated"));
    assert!(!report.context.has_dataset("enriched"));
    Ok(())
}

#[tokio::test]
async fn test_required_step_failure_reports_partial_statistics() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("in.csv"), "id\nA\n")?;
    let out = dir.path().join("out.csv");

    let strategy = strategy(
        json!({"dir": dir.path().display().to_string()}),
        vec![
            step("load", "load_dataset", json!({"path": "${dir}/in.csv", "output_key": "source"})),
            step(
                "filter",
                "filter_dataset",
                json!({"input_key": "source", "output_key": "kept", "column": "missing", "operator": "is_null"}),
            ),
            step("export", "export_dataset", json!({"input_key": "source", "path": out.display().to_string()})),
        ],
    );

    let report = engine()?.run(&strategy, &ParameterOverrides::default(), &CancellationFlag::new()).await?;

    assert_eq!(report.state, RunState::Failed);
    let failure = report.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.step, "filter");
    assert_eq!(failure.kind, ErrorKind::Data);
    assert!(!out.exists());
    assert_eq!(report.statistics()["steps"]["load"]["status"], json!("completed"));
    assert_eq!(report.context.dataset("source")?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_parameter_fails_before_any_step() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path().join("never.csv");
    std::fs::write(dir.path().join("in.csv"), "id\nA\n")?;

    let strategy = strategy(
        json!({"dir": dir.path().display().to_string()}),
        vec![
            step("load", "load_dataset", json!({"path": "${dir}/in.csv", "output_key": "source"})),
            step("export", "export_dataset", json!({"input_key": "source", "path": out.display().to_string()})),
            step("broken", "load_dataset", json!({"path": "${missing_key}", "output_key": "other"})),
        ],
    );

    let err = engine()?
        .run(&strategy, &ParameterOverrides::default(), &CancellationFlag::new())
        .await
        .err()
        .expect("pre-flight must fail");

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("missing_key"));
    assert!(!out.exists());
    Ok(())
}

#[tokio::test]
async fn test_default_used_when_parameter_absent() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("in.csv"), "id\nA\n")?;

    let strategy = strategy(
        json!({"dir": dir.path().display().to_string(), "file": ""}),
        vec![step(
            "load",
            "load_dataset",
            json!({"path": "${dir}/${file:-in.csv}", "output_key": "${key:-source}"}),
        )],
    );

    let report = engine()?.run(&strategy, &ParameterOverrides::default(), &CancellationFlag::new()).await?;
    assert!(report.is_success());
    assert!(report.context.has_dataset("source"));
    Ok(())
}

#[tokio::test]
async fn test_external_match_without_authority_fails_preflight() -> Result<()> {
    let strategy = strategy(
        json!({}),
        vec![step(
            "external",
            "external_match",
            json!({"source_key": "s", "target_key": "t", "target_column": "id",
                   "matched_key": "m", "unmatched_key": "u"}),
        )],
    );

    let err = engine()?.prepare(&strategy, &ParameterOverrides::default()).err().expect("no resolver configured");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("step 'external'"));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_step_names_rejected() -> Result<()> {
    let strategy = strategy(
        json!({}),
        vec![
            step("load", "load_dataset", json!({"path": "a.csv", "output_key": "a"})),
            step("load", "load_dataset", json!({"path": "b.csv", "output_key": "b"})),
        ],
    );
    let err = engine()?.prepare(&strategy, &ParameterOverrides::default()).err().expect("duplicate names");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    Ok(())
}

#[test]
fn test_builtin_registry_lists_every_operation() -> Result<()> {
    let registry = OperationRegistry::with_builtin_operations()?;
    assert_eq!(
        registry.names(),
        vec![
            "calculate_overlap",
            "composite_match",
            "direct_match",
            "export_dataset",
            "external_match",
            "filter_dataset",
            "load_dataset",
            "merge_datasets",
            "normalize_identifiers",
            "reconcile",
        ]
    );
    Ok(())
}
