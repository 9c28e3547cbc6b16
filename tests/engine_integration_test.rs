use std::time::{Duration, Instant};
use takeoff_engine::core::diagnostics::DiagnosticSource;
use takeoff_engine::domain::model::{
    InputDeclaration, PriceCatalogEntry, TakeoffModel, VariableDeclaration,
};
use takeoff_engine::domain::value::ValueType;
use takeoff_engine::script::Limits;
use takeoff_engine::{
    EngineError, MemoryStore, RunRequest, RunStatus, ScriptError, TakeoffEngine,
};

const LUMBER_SCRIPT: &str = "\
const w = getUserInput('width', 20)
const l = getUserInput('length', 40)
const s = createSection('Lumber')
s.addPart({ name: 'Studs', qty: w + l, priceLookupKey: '2x4x8' })
";

fn lumber_catalog() -> Vec<PriceCatalogEntry> {
    vec![PriceCatalogEntry {
        name: "2x4x8".to_string(),
        unit_price: 2.5,
        currency: "USD".to_string(),
        category: "lumber".to_string(),
        unit_type: None,
    }]
}

fn store_with(model: TakeoffModel) -> anyhow::Result<MemoryStore> {
    let store = MemoryStore::new();
    store.insert_model(model)?;
    store.insert_catalog("default", lumber_catalog())?;
    Ok(store)
}

fn input(name: &str, default_value: &str, display_order: usize) -> InputDeclaration {
    InputDeclaration {
        name: name.to_string(),
        label: name.to_string(),
        description: None,
        value_type: ValueType::Number,
        default_value: default_value.to_string(),
        component_kind: None,
        component_props: "{}".to_string(),
        display_order,
    }
}

fn variable(name: &str, value: &str, manually_created: bool) -> VariableDeclaration {
    VariableDeclaration {
        name: name.to_string(),
        value: value.to_string(),
        value_type: ValueType::Number,
        description: None,
        manually_created,
    }
}

#[tokio::test]
async fn test_end_to_end_lumber_estimate() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new("house", LUMBER_SCRIPT))?;
    let engine = TakeoffEngine::new(store.clone());

    let outcome = engine
        .run(RunRequest::new("house").with_catalog("default"))
        .await?;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.sections.len(), 1);
    assert_eq!(outcome.sections[0].name, "Lumber");
    let part = &outcome.sections[0].parts[0];
    assert_eq!(part.name, "Studs");
    assert_eq!(part.quantity, 60.0);
    assert_eq!(part.unit_price, 2.5);
    assert_eq!(part.total, 150.0);
    assert_eq!(part.currency, "USD");

    let row = &outcome.rows[0];
    assert_eq!(row.section, "Lumber");
    assert_eq!(row.price_per_unit, 2.5);
    assert_eq!(row.total, 150.0);

    let model = store.model("house").unwrap();
    let persisted: Vec<_> = model
        .ordered_inputs()
        .iter()
        .map(|i| (i.name.as_str(), i.default_value.as_str(), i.display_order))
        .collect();
    assert_eq!(persisted, vec![("width", "20", 0), ("length", "40", 1)]);

    let estimate = model.estimate.expect("commit stores the estimate");
    assert_eq!(estimate.results, outcome.rows);
    assert_eq!(estimate.form_values.len(), 2);
    assert_eq!(estimate.form_values[0].value, "20");
    Ok(())
}

#[tokio::test]
async fn test_schema_is_pruned_to_latest_declarations() -> anyhow::Result<()> {
    let mut model = TakeoffModel::new("m", "getUserInput('A', 1)\ngetUserInput('C', 3)");
    model.inputs = vec![input("A", "1", 0), input("B", "2", 1), input("C", "3", 2)];
    let store = store_with(model)?;

    let outcome = TakeoffEngine::new(store.clone())
        .run(RunRequest::new("m"))
        .await?;
    assert!(outcome.is_success());

    let names: Vec<_> = store
        .model("m")
        .unwrap()
        .ordered_inputs()
        .iter()
        .map(|i| i.name.clone())
        .collect();
    assert_eq!(names, vec!["A", "C"]);
    Ok(())
}

#[tokio::test]
async fn test_manually_created_variables_are_never_pruned() -> anyhow::Result<()> {
    let mut model = TakeoffModel::new("m", "const f = getVariable('fromScript', 1)");
    model.variables = vec![
        variable("fromScript", "1", false),
        variable("stale", "2", false),
        variable("handMade", "3", true),
    ];
    let store = store_with(model)?;

    TakeoffEngine::new(store.clone())
        .run(RunRequest::new("m"))
        .await?;

    let mut names: Vec<_> = store
        .model("m")
        .unwrap()
        .variables
        .into_iter()
        .map(|v| v.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["fromScript", "handMade"]);
    Ok(())
}

#[tokio::test]
async fn test_persisted_variable_value_wins_over_default() -> anyhow::Result<()> {
    let script = "\
const studs = getVariable('studsPerFoot', 1)
createSection('Check').addPart({ name: 'Studs', qty: studs * 2, priceLookupKey: '2x4x8' })
";
    let mut model = TakeoffModel::new("m", script);
    model.variables = vec![variable("studsPerFoot", "5", false)];
    let store = store_with(model)?;

    let outcome = TakeoffEngine::new(store)
        .run(RunRequest::new("m").with_catalog("default"))
        .await?;

    assert_eq!(outcome.rows[0].qty, 10.0);
    Ok(())
}

#[tokio::test]
async fn test_submitted_values_override_stored_defaults() -> anyhow::Result<()> {
    let mut model = TakeoffModel::new("house", LUMBER_SCRIPT);
    model.inputs = vec![input("width", "20", 0), input("length", "40", 1)];
    let store = store_with(model)?;

    let outcome = TakeoffEngine::new(store.clone())
        .run(
            RunRequest::new("house")
                .with_catalog("default")
                .with_override("width", "30")
                .with_override("length", ""),
        )
        .await?;

    assert_eq!(outcome.rows[0].qty, 70.0);
    let model = store.model("house").unwrap();
    let width = model.inputs.iter().find(|i| i.name == "width").unwrap();
    assert_eq!(width.default_value, "30");
    let estimate = model.estimate.unwrap();
    assert_eq!(estimate.form_values[0].name, "width");
    assert_eq!(estimate.form_values[0].value, "30");
    Ok(())
}

#[tokio::test]
async fn test_price_miss_is_a_diagnostic_not_an_error() -> anyhow::Result<()> {
    let script = "\
const p = getPrice('nonexistent')
if (!isNaN(p.value) || p.currency !== '') throw new Error('unexpected price')
createSection('S').addPart({ name: 'Ghost', qty: 2, priceLookupKey: 'nonexistent' })
";
    let store = store_with(TakeoffModel::new("m", script))?;

    let outcome = TakeoffEngine::new(store)
        .run(RunRequest::new("m").with_catalog("default"))
        .await?;

    assert!(outcome.is_success());
    assert!(outcome.rows[0].total.is_nan());
    assert_eq!(outcome.lookups.iter().filter(|l| !l.was_found).count(), 2);
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| d.source == DiagnosticSource::PriceLookup && d.message.contains("nonexistent")));
    Ok(())
}

#[tokio::test]
async fn test_totals_are_fixed_at_add_time() -> anyhow::Result<()> {
    let script = "\
const s = createSection('S')
s.addPart({ name: 'Ten', qty: 10, priceLookupKey: 'x' })
";
    let store = store_with(TakeoffModel::new("m", script))?;
    let request = RunRequest::new("m").with_prices(vec![
        PriceCatalogEntry {
            name: "x".to_string(),
            unit_price: 2.5,
            currency: "USD".to_string(),
            category: "misc".to_string(),
            unit_type: None,
        },
    ]);

    let outcome = TakeoffEngine::new(store).run(request).await?;
    assert_eq!(outcome.rows[0].total, 25.0);
    Ok(())
}

#[tokio::test]
async fn test_infinite_loop_times_out() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new(
        "m",
        "getUserInput('before', 1)\nfor (;;) {}\ngetUserInput('after', 2)",
    ))?;
    let engine = TakeoffEngine::with_limits(
        store.clone(),
        Limits {
            timeout: Duration::from_millis(200),
            ..Limits::default()
        },
    );

    let started = Instant::now();
    let outcome = engine.run(RunRequest::new("m")).await?;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.error, Some(ScriptError::Timeout { limit_ms: 200 }));
    assert!(outcome.sections.is_empty());

    // Declarations made before the loop are still reconciled.
    let names: Vec<_> = store
        .model("m")
        .unwrap()
        .inputs
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["before"]);
    Ok(())
}

#[tokio::test]
async fn test_heavy_string_work_still_reconciles() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new(
        "m",
        "getUserInput('a', 1)\nconst s = 'x'.repeat(60000000)\nconst n = s.split('').length",
    ))?;
    let engine = TakeoffEngine::with_limits(
        store.clone(),
        Limits {
            timeout: Duration::from_millis(200),
            ..Limits::default()
        },
    );

    let outcome = engine.run(RunRequest::new("m")).await?;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(matches!(
        outcome.error,
        Some(ScriptError::Timeout { .. }) | Some(ScriptError::Uncaught { .. })
    ));
    assert!(outcome.reconciled.is_some());
    let names: Vec<_> = store
        .model("m")
        .unwrap()
        .inputs
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn test_runtime_failure_keeps_previous_estimate() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new("house", LUMBER_SCRIPT))?;
    let engine = TakeoffEngine::new(store.clone());
    engine
        .run(RunRequest::new("house").with_catalog("default"))
        .await?;
    let committed = store.model("house").unwrap().estimate;

    let failing = "\
getUserInput('width', 20)
createSection('Lumber').addPart({ name: 'Studs', qty: 1, priceLookupKey: '2x4x8' })
throw new RangeError('width too small')
";
    let outcome = engine
        .run(
            RunRequest::new("house")
                .with_script(failing)
                .with_catalog("default"),
        )
        .await?;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.sections.is_empty());
    assert!(outcome.rows.is_empty());
    assert!(!outcome.committed);
    match &outcome.error {
        Some(ScriptError::Uncaught { message, line }) => {
            assert_eq!(message, "RangeError: width too small");
            assert_eq!(*line, Some(3));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| d.source == DiagnosticSource::Script));

    let model = store.model("house").unwrap();
    assert_eq!(model.estimate, committed);
    // Schema follows the failed run: only `width` was declared.
    assert_eq!(model.inputs.len(), 1);
    assert_eq!(model.inputs[0].name, "width");
    Ok(())
}

#[tokio::test]
async fn test_syntax_error_leaves_everything_untouched() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new("house", LUMBER_SCRIPT))?;
    let engine = TakeoffEngine::new(store.clone());
    engine
        .run(RunRequest::new("house").with_catalog("default"))
        .await?;
    let before = store.model("house").unwrap();

    let outcome = engine
        .run(RunRequest::new("house").with_script("const w = getUserInput('width', 20\n"))
        .await?;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(matches!(outcome.error, Some(ScriptError::Syntax { .. })));
    assert!(outcome.reconciled.is_none());

    let after = store.model("house").unwrap();
    assert_eq!(after.code, LUMBER_SCRIPT);
    assert_eq!(after.inputs, before.inputs);
    Ok(())
}

#[tokio::test]
async fn test_rerun_is_idempotent() -> anyhow::Result<()> {
    let script = "\
insertHeading('Sizes')
const w = getUserInput('width', 20, { label: 'Width (ft)' })
const rooms = getCount('rooms')
const waste = getVariable('waste', 1.1)
createSection('Lumber').addPart({ name: 'Studs', qty: Math.ceil(w * waste), priceLookupKey: '2x4x8' })
";
    let store = store_with(TakeoffModel::new("m", script))?;
    let engine = TakeoffEngine::new(store.clone());

    let first = engine.run(RunRequest::new("m").with_catalog("default")).await?;
    let schema = store.model("m").unwrap();
    let second = engine.run(RunRequest::new("m").with_catalog("default")).await?;
    let schema_again = store.model("m").unwrap();

    assert_eq!(first.sections, second.sections);
    assert_eq!(schema.inputs, schema_again.inputs);
    assert_eq!(schema.variables, schema_again.variables);
    assert_eq!(schema_again.inputs.len(), 3);
    assert!(second.reconciled.unwrap().is_noop());
    Ok(())
}

#[tokio::test]
async fn test_dry_run_does_not_commit_results() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new("house", LUMBER_SCRIPT))?;

    let outcome = TakeoffEngine::new(store.clone())
        .run(
            RunRequest::new("house")
                .with_script(format!("{}getUserInput('extra', 1)\n", LUMBER_SCRIPT))
                .with_catalog("default")
                .dry_run(),
        )
        .await?;

    assert!(outcome.is_success());
    assert_eq!(outcome.rows.len(), 1);
    assert!(!outcome.committed);

    let model = store.model("house").unwrap();
    assert!(model.estimate.is_none());
    assert_eq!(model.code, LUMBER_SCRIPT);
    // The schema still follows the previewed script.
    assert_eq!(model.inputs.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_commit_saves_supplied_script() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new("house", ""))?;

    TakeoffEngine::new(store.clone())
        .run(
            RunRequest::new("house")
                .with_script(LUMBER_SCRIPT)
                .with_catalog("default"),
        )
        .await?;

    assert_eq!(store.model("house").unwrap().code, LUMBER_SCRIPT);
    Ok(())
}

#[tokio::test]
async fn test_persistence_failure_is_an_error() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new("house", LUMBER_SCRIPT))?;
    store.set_fail_writes(true)?;

    let result = TakeoffEngine::new(store)
        .run(RunRequest::new("house").with_catalog("default"))
        .await;

    assert!(matches!(result, Err(EngineError::PersistenceError { .. })));
    Ok(())
}

#[tokio::test]
async fn test_unknown_model_and_catalog() -> anyhow::Result<()> {
    let store = store_with(TakeoffModel::new("house", LUMBER_SCRIPT))?;
    let engine = TakeoffEngine::new(store);

    let missing_model = engine.run(RunRequest::new("nope")).await;
    assert!(matches!(missing_model, Err(EngineError::ModelNotFound { .. })));

    let missing_catalog = engine
        .run(RunRequest::new("house").with_catalog("nope"))
        .await;
    assert!(matches!(missing_catalog, Err(EngineError::CatalogNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_declarations_keep_first_position() -> anyhow::Result<()> {
    let script = "\
getUserInput('a', 1)
getUserInput('b', 2)
getUserInput('a', 3, { label: 'Again' })
";
    let store = store_with(TakeoffModel::new("m", script))?;

    TakeoffEngine::new(store.clone())
        .run(RunRequest::new("m"))
        .await?;

    let model = store.model("m").unwrap();
    let inputs = model.ordered_inputs();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].name, "a");
    assert_eq!(inputs[0].label, "Again");
    assert_eq!(inputs[0].default_value, "3");
    assert_eq!(inputs[1].name, "b");
    Ok(())
}
