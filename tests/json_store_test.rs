use takeoff_engine::domain::model::{PriceCatalogEntry, TakeoffModel};
use takeoff_engine::domain::ports::ModelStore;
use takeoff_engine::{EngineError, JsonFileStore, RunRequest, TakeoffEngine};
use tempfile::TempDir;

const SCRIPT: &str = "\
const w = getUserInput('width', 20)
const l = getUserInput('length', 40)
const s = createSection('Lumber')
s.addPart({ name: 'Studs', qty: w + l, priceLookupKey: '2x4x8' })
";

#[tokio::test]
async fn test_run_against_json_files() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let store = JsonFileStore::new(temp_dir.path());
    store.save_model(&TakeoffModel::new("house", SCRIPT)).await?;

    std::fs::create_dir_all(temp_dir.path().join("catalogs"))?;
    std::fs::write(
        temp_dir.path().join("catalogs").join("lumber.csv"),
        "Name,Unit Type,Price Per Unit,Currency,Category\n2x4x8,piece,2.5,USD,lumber\n",
    )?;

    let engine = TakeoffEngine::new(store.clone());
    let outcome = engine
        .run(RunRequest::new("house").with_catalog("lumber"))
        .await?;

    assert!(outcome.is_success());
    assert_eq!(outcome.rows[0].total, 150.0);

    // The document on disk carries the reconciled schema and the estimate.
    let raw = std::fs::read_to_string(temp_dir.path().join("models").join("house.json"))?;
    let json: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(json["inputs"][0]["name"], "width");
    assert_eq!(json["inputs"][0]["defaultValue"], "20");
    assert_eq!(json["inputs"][1]["defaultValue"], "40");
    assert_eq!(json["estimate"]["results"][0]["pricePerUnit"], 2.5);

    let reloaded = store.load_model("house").await?;
    assert_eq!(reloaded.inputs.len(), 2);
    assert!(reloaded.updated_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_json_catalogs_and_missing_files() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let store = JsonFileStore::new(temp_dir.path());

    store
        .save_catalog(
            "plumbing",
            &[PriceCatalogEntry {
                name: "Toilet".to_string(),
                unit_price: 180.0,
                currency: "USD".to_string(),
                category: "bathroom".to_string(),
                unit_type: None,
            }],
        )
        .await?;
    let entries = store.load_catalog("plumbing").await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].unit_price, 180.0);

    assert!(matches!(
        store.load_catalog("roofing").await,
        Err(EngineError::CatalogNotFound { .. })
    ));
    assert!(matches!(
        store.load_model("house").await,
        Err(EngineError::ModelNotFound { .. })
    ));
    assert!(matches!(
        store.load_model("../house").await,
        Err(EngineError::ValidationError { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_writes_to_missing_model_fail() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let store = JsonFileStore::new(temp_dir.path());

    let result = store.save_script("ghost", "getUserInput('a', 1)").await;
    assert!(matches!(result, Err(EngineError::ModelNotFound { .. })));
    Ok(())
}
